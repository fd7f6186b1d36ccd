use serde_json::Value;
use snafu::{ResultExt, Snafu};
use tracing::{debug, instrument};

use super::{Applier, GoTemplateSnafu, Options, expand_in_place, template_name};
use crate::{
    apis::{
        self, BundleDocument, Component, Kind, ObjectTemplate, SAFE_TEMPLATES_ANNOTATION,
        TemplateType,
    },
    object::Object,
    schema,
    template::{self, Escaping, MissingKey, RenderOptions},
    yaml,
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to decode object template {name:?}"))]
    DecodeTemplate { source: apis::Error, name: String },

    #[snafu(display("invalid options for object template {name:?}"))]
    InvalidOptions { source: schema::Error, name: String },

    #[snafu(display("failed to render object template {name:?}"))]
    RenderTemplate {
        source: template::Error,
        name: String,
    },

    #[snafu(display("output of object template {name:?} is not valid YAML:\n{rendered}"))]
    ParseOutput {
        source: yaml::Error,
        name: String,
        rendered: String,
    },
}

/// Renders `ObjectTemplate`s of type `go-template` into zero or more objects.
///
/// Defaults of the template's options schema are filled in beneath the supplied options. A
/// component annotated with `bundle.stackable.tech/safe-templates: "true"` quotes every string
/// option that is not a plain YAML scalar, so that options cannot inject structure into the output.
#[derive(Clone, Debug, Default)]
pub struct GoTemplateApplier {
    missing_key: MissingKey,
}

impl GoTemplateApplier {
    pub fn with_missing_key(mut self, missing_key: MissingKey) -> Self {
        self.missing_key = missing_key;
        self
    }

    fn render(
        &self,
        index: usize,
        object: &Object,
        options: &Options,
        escaping: Escaping,
    ) -> Result<Vec<Object>, Error> {
        let name = template_name(object, index);
        let object_template =
            ObjectTemplate::from_object(object).context(DecodeTemplateSnafu { name: &name })?;
        let options = schema::apply_defaults(options, object_template.options_schema.as_ref())
            .context(InvalidOptionsSnafu { name: &name })?;

        let rendered = template::render(
            &name,
            &object_template.template,
            &Value::Object(options),
            &RenderOptions {
                missing_key: self.missing_key,
                escaping,
            },
        )
        .context(RenderTemplateSnafu { name: &name })?;

        let objects = yaml::parse_objects(&rendered).with_context(|_| ParseOutputSnafu {
            name: &name,
            rendered: rendered.clone(),
        })?;
        debug!(template = %name, objects = objects.len(), "rendered go-template");
        Ok(objects)
    }
}

impl Applier for GoTemplateApplier {
    fn name(&self) -> &str {
        TemplateType::GoTemplate.as_str()
    }

    fn claims(&self, object: &Object) -> bool {
        Kind::ObjectTemplate.matches(object)
            && TemplateType::raw_of(object) == TemplateType::GoTemplate.as_str()
    }

    #[instrument(skip_all, fields(component = %component.name()))]
    fn apply_options(&self, component: &Component, options: &Options) -> super::Result<Component> {
        let escaping = match component.annotation(SAFE_TEMPLATES_ANNOTATION) {
            Some("true") => Escaping::Yaml,
            _ => Escaping::None,
        };

        let objects = expand_in_place(
            &component.spec.objects,
            |object| self.claims(object),
            |index, object| self.render(index, object, options, escaping),
        )
        .context(GoTemplateSnafu {
            component: component.name(),
        })?;

        Ok(component.with_objects(objects))
    }
}
