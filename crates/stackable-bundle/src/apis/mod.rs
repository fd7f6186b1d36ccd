//! The bundle document vocabulary.
//!
//! All documents live in the [`API_VERSION`] group and are converted from and to the untyped
//! [`Object`] representation through the [`BundleDocument`] trait.
use std::str::FromStr;

use serde::{Serialize, de::DeserializeOwned};
use snafu::{OptionExt, ResultExt, Snafu, ensure};
use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::object::{NotAnObjectError, Object};

mod bundle;
mod component;
mod file;
mod template;

pub use bundle::*;
pub use component::*;
pub use file::*;
pub use template::*;

pub const API_GROUP: &str = "bundle.stackable.tech";
pub const API_VERSION: &str = const_format::concatcp!(API_GROUP, "/v1alpha1");

/// Annotation carrying the absolute URL of the file an inlined template was read from.
pub const INLINE_PATH_ANNOTATION: &str = const_format::concatcp!(API_GROUP, "/inline-path");

/// Component annotation which switches go-templates into YAML-escaping mode.
pub const SAFE_TEMPLATES_ANNOTATION: &str = const_format::concatcp!(API_GROUP, "/safe-templates");

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("document has no kind"))]
    MissingKind,

    #[snafu(display("unsupported kind {kind:?}, expected one of {expected}"))]
    UnsupportedKind { kind: String, expected: String },

    #[snafu(display("expected kind {expected}, got {kind:?}"))]
    UnexpectedKind { kind: String, expected: Kind },

    #[snafu(display("failed to decode {kind} document {name:?}"))]
    DecodeDocument {
        source: serde_json::Error,
        kind: Kind,
        name: String,
    },

    #[snafu(display("failed to encode {kind} document"))]
    EncodeDocument {
        source: serde_json::Error,
        kind: Kind,
    },

    #[snafu(display("encoded {kind} document is not a map"))]
    EncodedNotAnObject {
        source: NotAnObjectError,
        kind: Kind,
    },

    #[snafu(display(
        "component {component_name:?} with version {version:?} occurs more than once in bundle {set_name:?}"
    ))]
    DuplicateComponent {
        set_name: String,
        component_name: String,
        version: String,
    },
}

/// Every document kind this crate understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, AsRefStr, Display, EnumIter, EnumString)]
pub enum Kind {
    Component,
    ComponentBuilder,
    Bundle,
    BundleBuilder,
    ComponentSet,
    ObjectTemplate,
    ObjectTemplateBuilder,
    PatchTemplate,
    PatchTemplateBuilder,
}

impl Kind {
    /// Returns the bundle kind of `object`, or [`None`] for any other resource.
    pub fn of(object: &Object) -> Option<Self> {
        object.kind().and_then(|kind| Self::from_str(kind).ok())
    }

    /// Whether `object` is a document of this kind.
    ///
    /// Templates embedded in a component commonly omit their `apiVersion`, so a missing or empty
    /// one counts as [`API_VERSION`]. Any other `apiVersion` belongs to a foreign API group.
    pub fn matches(self, object: &Object) -> bool {
        object.kind() == Some(self.as_ref())
            && object
                .api_version()
                .is_none_or(|api_version| api_version.is_empty() || api_version == API_VERSION)
    }
}

/// A typed bundle document backed by serde.
pub trait BundleDocument: Serialize + DeserializeOwned {
    const KIND: Kind;

    /// Decodes `object`, which must be of kind [`Self::KIND`].
    fn from_object(object: &Object) -> Result<Self> {
        let kind = object.kind().context(MissingKindSnafu)?;
        ensure!(
            kind == Self::KIND.as_ref(),
            UnexpectedKindSnafu {
                kind,
                expected: Self::KIND
            }
        );

        serde_json::from_value(object.clone().into_value()).context(DecodeDocumentSnafu {
            kind: Self::KIND,
            name: object.name().unwrap_or_default(),
        })
    }

    fn to_object(&self) -> Result<Object> {
        let value = serde_json::to_value(self).context(EncodeDocumentSnafu { kind: Self::KIND })?;
        Object::try_from(value).context(EncodedNotAnObjectSnafu { kind: Self::KIND })
    }
}

/// A top-level document as read from a file.
#[derive(Clone, Debug, PartialEq)]
pub enum Document {
    Component(Component),
    ComponentBuilder(ComponentBuilder),
    Bundle(Bundle),
    BundleBuilder(BundleBuilder),
    ComponentSet(ComponentSet),
}

impl Document {
    /// Decodes a top-level document, any kind other than the five top-level kinds is rejected.
    pub fn from_object(object: &Object) -> Result<Self> {
        let kind = object.kind().context(MissingKindSnafu)?;
        let unsupported = || {
            UnsupportedKindSnafu {
                kind,
                expected: "Component, ComponentBuilder, Bundle, BundleBuilder or ComponentSet",
            }
            .build()
        };

        Ok(match Kind::from_str(kind).map_err(|_| unsupported())? {
            Kind::Component => Self::Component(Component::from_object(object)?),
            Kind::ComponentBuilder => {
                Self::ComponentBuilder(ComponentBuilder::from_object(object)?)
            }
            Kind::Bundle => Self::Bundle(Bundle::from_object(object)?),
            Kind::BundleBuilder => Self::BundleBuilder(BundleBuilder::from_object(object)?),
            Kind::ComponentSet => Self::ComponentSet(ComponentSet::from_object(object)?),
            _ => return Err(unsupported()),
        })
    }

    pub fn kind(&self) -> Kind {
        match self {
            Self::Component(_) => Kind::Component,
            Self::ComponentBuilder(_) => Kind::ComponentBuilder,
            Self::Bundle(_) => Kind::Bundle,
            Self::BundleBuilder(_) => Kind::BundleBuilder,
            Self::ComponentSet(_) => Kind::ComponentSet,
        }
    }

    pub fn to_object(&self) -> Result<Object> {
        match self {
            Self::Component(component) => component.to_object(),
            Self::ComponentBuilder(builder) => builder.to_object(),
            Self::Bundle(bundle) => bundle.to_object(),
            Self::BundleBuilder(builder) => builder.to_object(),
            Self::ComponentSet(set) => set.to_object(),
        }
    }
}

pub(crate) fn api_version() -> String {
    API_VERSION.to_owned()
}
