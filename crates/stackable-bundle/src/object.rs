//! The untyped object model.
//!
//! Bundles carry arbitrary Kubernetes resources, most of which this crate knows nothing about.
//! They are therefore kept as plain JSON maps and only projected into the typed
//! [`TypeMeta`] / [`ObjectMeta`] structs where selection or naming needs them.
use std::{borrow::Cow, collections::BTreeMap, fmt::Display};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::TypeMeta;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(display("expected a structured object, got {value}"))]
pub struct NotAnObjectError {
    value: Value,
}

/// A single structured document (a Kubernetes manifest or a bundle document).
///
/// Cloning an [`Object`] is a deep copy, stages are free to consume and rebuild them.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Object(Map<String, Value>);

impl Object {
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn as_map_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn api_version(&self) -> Option<&str> {
        self.str_field("apiVersion")
    }

    pub fn kind(&self) -> Option<&str> {
        self.str_field("kind")
    }

    pub fn name(&self) -> Option<&str> {
        self.metadata_str("name")
    }

    pub fn namespace(&self) -> Option<&str> {
        self.metadata_str("namespace")
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.0
            .get("metadata")?
            .get("annotations")?
            .get(key)?
            .as_str()
    }

    /// Sets `metadata.name`, creating the metadata map if needed.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.metadata_mut()
            .insert("name".to_owned(), Value::String(name.into()));
    }

    /// Sets a single annotation, creating the intermediate maps if needed.
    pub fn set_annotation(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let annotations = self
            .metadata_mut()
            .entry("annotations")
            .or_insert_with(|| Value::Object(Map::new()));
        if !annotations.is_object() {
            *annotations = Value::Object(Map::new());
        }
        if let Value::Object(annotations) = annotations {
            annotations.insert(key.into(), Value::String(value.into()));
        }
    }

    /// The identifying triple used in logs and error messages.
    pub fn key(&self) -> ObjectKey {
        ObjectKey {
            api_version: self.api_version().unwrap_or_default().to_owned(),
            kind: self.kind().unwrap_or_default().to_owned(),
            name: self.name().unwrap_or_default().to_owned(),
        }
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.0.get(key)?.as_str()
    }

    fn metadata_str(&self, key: &str) -> Option<&str> {
        self.0.get("metadata")?.get(key)?.as_str()
    }

    fn metadata_mut(&mut self) -> &mut Map<String, Value> {
        let metadata = self
            .0
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));
        if !metadata.is_object() {
            *metadata = Value::Object(Map::new());
        }
        match metadata {
            Value::Object(metadata) => metadata,
            _ => unreachable!("metadata was replaced by a map above"),
        }
    }
}

impl TryFrom<Value> for Object {
    type Error = NotAnObjectError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            value => NotAnObjectSnafu { value }.fail(),
        }
    }
}

impl From<Object> for Value {
    fn from(object: Object) -> Self {
        object.into_value()
    }
}

/// `apiVersion`, `kind` and `name` of an object, empty when unset.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct ObjectKey {
    pub api_version: String,
    pub kind: String,
    pub name: String,
}

impl Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Self {
            api_version,
            kind,
            name,
        } = self;
        write!(f, "{api_version}/{kind} {name:?}")
    }
}

/// Anything the filter engine can select: it needs type information and object metadata.
pub trait Selectable {
    fn type_meta(&self) -> TypeMeta;

    fn object_meta(&self) -> Cow<'_, ObjectMeta>;
}

impl Selectable for Object {
    fn type_meta(&self) -> TypeMeta {
        TypeMeta {
            api_version: self.api_version().unwrap_or_default().to_owned(),
            kind: self.kind().unwrap_or_default().to_owned(),
        }
    }

    /// Metadata that does not decode (e.g. a label with a non-string value) is treated as
    /// empty, selection never rejects an object as invalid.
    fn object_meta(&self) -> Cow<'_, ObjectMeta> {
        let metadata = self
            .0
            .get("metadata")
            .cloned()
            .and_then(|metadata| serde_json::from_value(metadata).ok())
            .unwrap_or_default();
        Cow::Owned(metadata)
    }
}

/// Labels or annotations of an [`ObjectMeta`], empty if unset.
pub(crate) fn string_map(
    map: Option<&BTreeMap<String, String>>,
) -> Cow<'_, BTreeMap<String, String>> {
    map.map_or_else(|| Cow::Owned(BTreeMap::new()), Cow::Borrowed)
}
