//! Build-time compilation of `PatchTemplateBuilder`s into `PatchTemplate`s.
//!
//! A builder is rendered once with the build options. Every property of its target schema is
//! rendered back into its own placeholder, so the resulting patch template still expects these
//! options when it is applied later on.
use serde_json::Value;
use snafu::{ResultExt, Snafu};
use tracing::{debug, instrument};

use crate::{
    apis::{self, API_VERSION, BundleDocument, Component, Kind, PatchTemplate, PatchTemplateBuilder},
    object::Object,
    options::Options,
    schema,
    template::{self, RenderOptions},
};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to decode patch template builder {name:?}"))]
    DecodeBuilder { source: apis::Error, name: String },

    #[snafu(display("invalid build options for patch template builder {name:?}"))]
    InvalidBuildOptions { source: schema::Error, name: String },

    #[snafu(display("failed to render patch template builder {name:?}"))]
    RenderBuilder {
        source: template::Error,
        name: String,
    },

    #[snafu(display("failed to encode patch template compiled from {name:?}"))]
    EncodePatchTemplate { source: apis::Error, name: String },

    #[snafu(display("failed to compile patch template builders of component {component:?}"))]
    CompileComponent {
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
        component: String,
    },
}

/// Compiles a single builder with the given build options.
///
/// Build options are validated against the build schema and win over the placeholders generated
/// from the target schema. Any other reference in the template must be resolvable at build time.
pub fn compile_patch_template_builder(
    builder: &PatchTemplateBuilder,
    options: &Options,
) -> Result<PatchTemplate> {
    let name = builder.metadata.name.clone().unwrap_or_default();
    let build_options = schema::apply_defaults(options, builder.build_schema.as_ref())
        .context(InvalidBuildOptionsSnafu { name: &name })?;

    let mut data = match &builder.target_schema {
        Some(target_schema) => Value::Object(schema::pass_through_defaults(target_schema)),
        None => Value::Object(Options::new()),
    };
    json_patch::merge(&mut data, &Value::Object(build_options));

    let template = template::render(&name, &builder.template, &data, &RenderOptions::default())
        .context(RenderBuilderSnafu { name: &name })?;

    debug!(builder = %name, "compiled patch template builder");
    Ok(PatchTemplate {
        api_version: API_VERSION.to_owned(),
        kind: Kind::PatchTemplate.to_string(),
        metadata: builder.metadata.clone(),
        template,
        options_schema: builder.target_schema.clone(),
        selector: builder.selector.clone(),
    })
}

/// Replaces all `PatchTemplateBuilder`s of `component` by their compiled `PatchTemplate`s.
///
/// The compiled templates are appended after the remaining objects, in the order of their
/// builders.
#[instrument(skip_all, fields(component = %component.name()))]
pub fn compile_component(component: &Component, options: &Options) -> Result<Component> {
    let (builders, mut objects): (Vec<Object>, Vec<Object>) = component
        .spec
        .objects
        .iter()
        .cloned()
        .partition(|object| Kind::PatchTemplateBuilder.matches(object));

    let compile = |object: &Object| -> Result<Object> {
        let name = object.name().unwrap_or_default();
        let builder =
            PatchTemplateBuilder::from_object(object).context(DecodeBuilderSnafu { name })?;
        compile_patch_template_builder(&builder, options)?
            .to_object()
            .context(EncodePatchTemplateSnafu { name })
    };

    for builder in &builders {
        objects.push(compile(builder).context(CompileComponentSnafu {
            component: component.name(),
        })?);
    }

    debug!(compiled = builders.len(), "compiled component");
    Ok(component.with_objects(objects))
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use serde_json::json;

    use super::*;

    fn object(value: Value) -> Object {
        Object::try_from(value).expect("test object is a map")
    }

    fn options(value: Value) -> Options {
        match value {
            Value::Object(map) => map,
            _ => panic!("options must be a map"),
        }
    }

    fn builder(value: Value) -> PatchTemplateBuilder {
        serde_json::from_value(value).expect("test builder is valid")
    }

    fn pod() -> Object {
        object(json!({"apiVersion": "v1", "kind": "Pod", "metadata": {"name": "web"}}))
    }

    #[test]
    fn build_options_are_rendered() {
        let component = Component::new(
            "web",
            "1.0.0",
            vec![
                object(json!({
                    "apiVersion": API_VERSION,
                    "kind": "PatchTemplateBuilder",
                    "metadata": {"name": "namespace"},
                    "template": "kind: Pod\nmetadata:\n  namespace: {{.Namespace}}",
                })),
                pod(),
            ],
        );

        let compiled = compile_component(&component, &options(json!({"Namespace": "foo"})))
            .expect("builder compiles");

        let kinds: Vec<_> = compiled.spec.objects.iter().filter_map(Object::kind).collect();
        assert_eq!(kinds, ["Pod", "PatchTemplate"]);
        let patch_template =
            PatchTemplate::from_object(&compiled.spec.objects[1]).expect("patch template decodes");
        assert!(patch_template.template.contains("namespace: foo"));
        assert_eq!(patch_template.metadata.name.as_deref(), Some("namespace"));
    }

    #[test]
    fn unversioned_builders_are_compiled() {
        let component = Component::new(
            "web",
            "1.0.0",
            vec![
                pod(),
                object(json!({
                    "kind": "PatchTemplateBuilder",
                    "metadata": {"name": "namespace"},
                    "template": "kind: Pod\nmetadata:\n  namespace: {{.Namespace}}",
                })),
                object(json!({
                    "apiVersion": "example.com/v1",
                    "kind": "PatchTemplateBuilder",
                    "metadata": {"name": "foreign"},
                })),
            ],
        );

        let compiled = compile_component(&component, &options(json!({"Namespace": "foo"})))
            .expect("builder compiles");

        let kinds: Vec<_> = compiled.spec.objects.iter().filter_map(Object::kind).collect();
        assert_eq!(kinds, ["Pod", "PatchTemplateBuilder", "PatchTemplate"]);
        assert_eq!(compiled.spec.objects[2].api_version(), Some(API_VERSION));
        let patch_template =
            PatchTemplate::from_object(&compiled.spec.objects[2]).expect("patch template decodes");
        assert!(patch_template.template.contains("namespace: foo"));
    }

    #[test]
    fn target_options_pass_through() {
        let builder = builder(json!({
            "template": indoc! {"
                kind: Pod
                metadata:
                  name: {{.PodName}}
                  namespace: {{.Namespace}}
                  labels:
                    tag: {{.Image.Tag}}
            "},
            "targetSchema": {
                "type": "object",
                "properties": {
                    "PodName": {"type": "string"},
                    "Image": {"type": "object", "properties": {"Tag": {"type": "string"}}},
                },
            },
            "selector": {"kinds": ["Pod"]},
        }));

        let compiled = compile_patch_template_builder(&builder, &options(json!({"Namespace": "foo"})))
            .expect("builder compiles");

        assert!(compiled.template.contains("name: {{.PodName}}"), "{}", compiled.template);
        assert!(compiled.template.contains("tag: {{.Image.Tag}}"), "{}", compiled.template);
        assert!(compiled.template.contains("namespace: foo"), "{}", compiled.template);
        assert_eq!(compiled.options_schema, builder.target_schema);
        assert_eq!(compiled.selector, builder.selector);
    }

    #[test]
    fn build_options_win_over_placeholders() {
        let builder = builder(json!({
            "template": "kind: Pod\nmetadata:\n  name: {{.PodName}}",
            "targetSchema": {"type": "object", "properties": {"PodName": {"type": "string"}}},
        }));

        let compiled = compile_patch_template_builder(&builder, &options(json!({"PodName": "web"})))
            .expect("builder compiles");
        assert_eq!(compiled.template, "kind: Pod\nmetadata:\n  name: web");
    }

    #[test]
    fn build_schema_defaults_and_requirements() {
        let builder = builder(json!({
            "metadata": {"name": "replicas"},
            "template": "kind: Deployment\nspec:\n  replicas: {{.Replicas}}",
            "buildSchema": {
                "type": "object",
                "required": ["Replicas"],
                "properties": {"Replicas": {"type": "integer"}},
            },
        }));

        let error = compile_patch_template_builder(&builder, &Options::new())
            .expect_err("Replicas is required");
        assert!(
            matches!(&error, Error::InvalidBuildOptions { name, .. } if name == "replicas"),
            "{error}"
        );
        let report = snafu::Report::from_error(&error).to_string();
        assert!(report.contains(r#""Replicas""#), "{report}");
    }

    #[test]
    fn unresolvable_references_fail() {
        let builder = builder(json!({
            "metadata": {"name": "broken"},
            "template": "kind: Pod\nmetadata:\n  namespace: {{.Namespace}}",
        }));

        let error = compile_patch_template_builder(&builder, &Options::new())
            .expect_err("Namespace is missing");
        assert!(matches!(error, Error::RenderBuilder { .. }), "{error}");
    }
}
