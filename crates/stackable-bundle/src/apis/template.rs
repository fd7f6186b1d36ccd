use k8s_openapi::{
    apiextensions_apiserver::pkg::apis::apiextensions::v1::JSONSchemaProps,
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString, IntoStaticStr};

use super::{BundleDocument, File, Kind, api_version};
use crate::{filter::Criteria, object::Object};

const GO_TEMPLATE: &str = "go-template";

/// Selects the options applier which renders an [`ObjectTemplate`].
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    AsRefStr,
    Display,
    EnumString,
    IntoStaticStr,
    Deserialize,
    Serialize,
)]
pub enum TemplateType {
    #[default]
    #[serde(rename = "go-template")]
    #[strum(serialize = "go-template")]
    GoTemplate,

    #[serde(rename = "jsonnet")]
    #[strum(serialize = "jsonnet")]
    Jsonnet,
}

impl TemplateType {
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    /// Returns the raw `type` discriminator of a template object.
    ///
    /// An absent type means [`TemplateType::GoTemplate`]. Unknown types are returned verbatim so
    /// that no applier claims them.
    pub fn raw_of(object: &Object) -> &str {
        object
            .get("type")
            .and_then(serde_json::Value::as_str)
            .unwrap_or(GO_TEMPLATE)
    }
}

/// A template rendered into zero or more objects by an options applier.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectTemplate {
    #[serde(default = "api_version")]
    pub api_version: String,

    #[serde(default = "object_template_kind")]
    pub kind: String,

    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(default, rename = "type")]
    pub template_type: TemplateType,

    pub template: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options_schema: Option<JSONSchemaProps>,
}

impl BundleDocument for ObjectTemplate {
    const KIND: Kind = Kind::ObjectTemplate;
}

/// An [`ObjectTemplate`] whose template text still lives in a separate file.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectTemplateBuilder {
    #[serde(default = "api_version")]
    pub api_version: String,

    #[serde(default = "object_template_builder_kind")]
    pub kind: String,

    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(default, rename = "type")]
    pub template_type: TemplateType,

    pub file: File,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options_schema: Option<JSONSchemaProps>,
}

impl BundleDocument for ObjectTemplateBuilder {
    const KIND: Kind = Kind::ObjectTemplateBuilder;
}

/// A templated partial manifest merged into matching objects of a component.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchTemplate {
    #[serde(default = "api_version")]
    pub api_version: String,

    #[serde(default = "patch_template_kind")]
    pub kind: String,

    #[serde(default)]
    pub metadata: ObjectMeta,

    pub template: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options_schema: Option<JSONSchemaProps>,

    /// Restricts the objects the patch is applied to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<Criteria>,
}

impl BundleDocument for PatchTemplate {
    const KIND: Kind = Kind::PatchTemplate;
}

/// The build-time precursor of a [`PatchTemplate`].
///
/// The template is rendered once with build options validated against `build_schema`. Every
/// property of `target_schema` is kept as a placeholder for the later apply step.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchTemplateBuilder {
    #[serde(default = "api_version")]
    pub api_version: String,

    #[serde(default = "patch_template_builder_kind")]
    pub kind: String,

    #[serde(default)]
    pub metadata: ObjectMeta,

    pub template: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_schema: Option<JSONSchemaProps>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_schema: Option<JSONSchemaProps>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<Criteria>,
}

impl BundleDocument for PatchTemplateBuilder {
    const KIND: Kind = Kind::PatchTemplateBuilder;
}

fn object_template_kind() -> String {
    Kind::ObjectTemplate.to_string()
}

fn object_template_builder_kind() -> String {
    Kind::ObjectTemplateBuilder.to_string()
}

fn patch_template_kind() -> String {
    Kind::PatchTemplate.to_string()
}

fn patch_template_builder_kind() -> String {
    Kind::PatchTemplateBuilder.to_string()
}
