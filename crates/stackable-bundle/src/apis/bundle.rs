use std::collections::BTreeSet;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use snafu::ensure;

use super::{
    API_VERSION, BundleDocument, Component, ComponentReference, ComponentSet, ComponentSetSpec,
    DuplicateComponentSnafu, File, Kind, Result, api_version,
};

/// An ordered collection of components released together.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    #[serde(default = "api_version")]
    pub api_version: String,

    #[serde(default = "bundle_kind")]
    pub kind: String,

    #[serde(default)]
    pub metadata: ObjectMeta,

    pub set_name: String,

    pub version: String,

    #[serde(default)]
    pub components: Vec<Component>,
}

impl Bundle {
    pub fn new(set_name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            api_version: API_VERSION.to_owned(),
            kind: Kind::Bundle.to_string(),
            metadata: ObjectMeta::default(),
            set_name: set_name.into(),
            version: version.into(),
            components: Vec::new(),
        }
    }

    /// Lists the components of this bundle.
    ///
    /// Fails if a `(componentName, version)` pair occurs more than once.
    pub fn component_set(&self) -> Result<ComponentSet> {
        let mut seen = BTreeSet::new();
        let mut components = Vec::with_capacity(self.components.len());

        for component in &self.components {
            let reference = ComponentReference {
                component_name: component.spec.component_name.clone(),
                version: component.spec.version.clone(),
            };
            ensure!(
                seen.insert(reference.clone()),
                DuplicateComponentSnafu {
                    set_name: &self.set_name,
                    component_name: reference.component_name,
                    version: reference.version,
                }
            );
            components.push(reference);
        }

        Ok(ComponentSet {
            api_version: API_VERSION.to_owned(),
            kind: Kind::ComponentSet.to_string(),
            metadata: ObjectMeta {
                name: Some(format!(
                    "{set_name}-{version}",
                    set_name = self.set_name,
                    version = self.version
                )),
                ..Default::default()
            },
            spec: ComponentSetSpec {
                set_name: self.set_name.clone(),
                version: self.version.clone(),
                components,
            },
        })
    }
}

impl BundleDocument for Bundle {
    const KIND: Kind = Kind::Bundle;
}

/// Describes how to assemble a [`Bundle`] from component files.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleBuilder {
    #[serde(default = "api_version")]
    pub api_version: String,

    #[serde(default = "bundle_builder_kind")]
    pub kind: String,

    #[serde(default)]
    pub metadata: ObjectMeta,

    pub set_name: String,

    pub version: String,

    /// Files holding either a `Component` or a `ComponentBuilder`.
    #[serde(default)]
    pub component_files: Vec<File>,
}

impl BundleDocument for BundleBuilder {
    const KIND: Kind = Kind::BundleBuilder;
}

fn bundle_kind() -> String {
    Kind::Bundle.to_string()
}

fn bundle_builder_kind() -> String {
    Kind::BundleBuilder.to_string()
}
