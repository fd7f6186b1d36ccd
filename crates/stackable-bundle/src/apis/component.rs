use std::borrow::Cow;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::TypeMeta;
use serde::{Deserialize, Serialize};

use super::{API_VERSION, BundleDocument, File, FileGroup, Kind, api_version};
use crate::object::{Object, Selectable};

/// A named, versioned collection of objects.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    #[serde(default = "api_version")]
    pub api_version: String,

    #[serde(default = "component_kind")]
    pub kind: String,

    #[serde(default)]
    pub metadata: ObjectMeta,

    pub spec: ComponentSpec,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    pub component_name: String,

    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,

    #[serde(default)]
    pub objects: Vec<Object>,
}

impl Component {
    pub fn new(
        component_name: impl Into<String>,
        version: impl Into<String>,
        objects: Vec<Object>,
    ) -> Self {
        Self {
            api_version: API_VERSION.to_owned(),
            kind: Kind::Component.to_string(),
            metadata: ObjectMeta::default(),
            spec: ComponentSpec {
                component_name: component_name.into(),
                version: version.into(),
                app_version: None,
                objects,
            },
        }
    }

    /// The name used when `metadata.name` is not set explicitly.
    pub fn generated_name(&self) -> String {
        format!(
            "{name}-{version}",
            name = self.spec.component_name,
            version = self.spec.version
        )
    }

    /// `metadata.name`, falling back to the [generated name](Self::generated_name).
    pub fn name(&self) -> Cow<'_, str> {
        match &self.metadata.name {
            Some(name) => Cow::Borrowed(name),
            None => Cow::Owned(self.generated_name()),
        }
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()?
            .get(key)
            .map(String::as_str)
    }

    /// Returns a copy of this component holding `objects` instead of the current objects.
    pub fn with_objects(&self, objects: Vec<Object>) -> Self {
        Self {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            metadata: self.metadata.clone(),
            spec: ComponentSpec {
                component_name: self.spec.component_name.clone(),
                version: self.spec.version.clone(),
                app_version: self.spec.app_version.clone(),
                objects,
            },
        }
    }
}

impl BundleDocument for Component {
    const KIND: Kind = Kind::Component;
}

impl Selectable for Component {
    fn type_meta(&self) -> TypeMeta {
        TypeMeta {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
        }
    }

    fn object_meta(&self) -> Cow<'_, ObjectMeta> {
        Cow::Borrowed(&self.metadata)
    }
}

/// Describes how to assemble a [`Component`] from files.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentBuilder {
    #[serde(default = "api_version")]
    pub api_version: String,

    #[serde(default = "component_builder_kind")]
    pub kind: String,

    #[serde(default)]
    pub metadata: ObjectMeta,

    pub component_name: String,

    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,

    /// Files holding one or more YAML documents each.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub object_files: Vec<File>,

    /// Files turned into ConfigMaps, one ConfigMap per group name.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub raw_text_files: Vec<FileGroup>,
}

impl BundleDocument for ComponentBuilder {
    const KIND: Kind = Kind::ComponentBuilder;
}

/// A lightweight listing of the components of a bundle.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSet {
    #[serde(default = "api_version")]
    pub api_version: String,

    #[serde(default = "component_set_kind")]
    pub kind: String,

    #[serde(default)]
    pub metadata: ObjectMeta,

    pub spec: ComponentSetSpec,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSetSpec {
    pub set_name: String,

    pub version: String,

    #[serde(default)]
    pub components: Vec<ComponentReference>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentReference {
    pub component_name: String,
    pub version: String,
}

impl BundleDocument for ComponentSet {
    const KIND: Kind = Kind::ComponentSet;
}

fn component_kind() -> String {
    Kind::Component.to_string()
}

fn component_builder_kind() -> String {
    Kind::ComponentBuilder.to_string()
}

fn component_set_kind() -> String {
    Kind::ComponentSet.to_string()
}
