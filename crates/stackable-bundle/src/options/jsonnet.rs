use std::{
    fmt,
    path::{Path, PathBuf},
    rc::Rc,
    sync::Arc,
};

use jrsonnet_evaluator::{EvaluationState, FileImportResolver, ImportResolver};
use serde_json::Value;
use snafu::{ResultExt, Snafu};
use tracing::{debug, instrument};

use super::{Applier, JsonnetSnafu, Options, expand_in_place, template_name};
use crate::{
    apis::{self, BundleDocument, Component, Kind, ObjectTemplate, TemplateType},
    object::Object,
    schema,
};

/// Name of the top-level argument the options are passed in.
const OPTIONS_ARGUMENT: &str = "opts";

/// Creates a fresh import resolver for every evaluation.
pub type ImportResolverFactory = Arc<dyn Fn() -> Box<dyn ImportResolver> + Send + Sync>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to decode object template {name:?}"))]
    DecodeTemplate { source: apis::Error, name: String },

    #[snafu(display("invalid options for object template {name:?}"))]
    InvalidOptions { source: schema::Error, name: String },

    #[snafu(display("failed to serialize options for object template {name:?}"))]
    SerializeOptions {
        source: serde_json::Error,
        name: String,
    },

    #[snafu(display("failed to evaluate jsonnet template {name:?}: {message}"))]
    Evaluate { name: String, message: String },

    #[snafu(display("jsonnet template {name:?} did not manifest valid JSON"))]
    ParseOutput {
        source: serde_json::Error,
        name: String,
    },

    #[snafu(display(
        "jsonnet template {name:?} must evaluate to an object or a list of objects, got {output}"
    ))]
    UnexpectedOutput { name: String, output: Value },
}

/// Evaluates `ObjectTemplate`s of type `jsonnet`.
///
/// The template is called with the options as its single top-level argument `opts`, e.g.
/// `function(opts) { kind: "ConfigMap", metadata: { name: opts.name } }`. It may return an object
/// or a list of objects. Imports are disabled unless an import resolver is configured.
#[derive(Clone, Default)]
pub struct JsonnetApplier {
    import_resolver: Option<ImportResolverFactory>,
}

impl fmt::Debug for JsonnetApplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonnetApplier")
            .field("imports_enabled", &self.import_resolver.is_some())
            .finish()
    }
}

impl JsonnetApplier {
    pub fn with_import_resolver(mut self, factory: ImportResolverFactory) -> Self {
        self.import_resolver = Some(factory);
        self
    }

    /// Enables imports from the given library directories.
    pub fn with_library_paths(self, library_paths: Vec<PathBuf>) -> Self {
        self.with_import_resolver(Arc::new(move || {
            Box::new(FileImportResolver {
                library_paths: library_paths.clone(),
            })
        }))
    }

    fn evaluate(
        &self,
        index: usize,
        object: &Object,
        options: &Options,
    ) -> Result<Vec<Object>, Error> {
        let name = template_name(object, index);
        let object_template =
            ObjectTemplate::from_object(object).context(DecodeTemplateSnafu { name: &name })?;
        let options = schema::apply_defaults(options, object_template.options_schema.as_ref())
            .context(InvalidOptionsSnafu { name: &name })?;
        let options =
            serde_json::to_string(&options).context(SerializeOptionsSnafu { name: &name })?;

        let manifest = self
            .evaluate_snippet(&name, &object_template.template, &options)
            .map_err(|message| Error::Evaluate {
                name: name.clone(),
                message,
            })?;

        let output: Value =
            serde_json::from_str(&manifest).context(ParseOutputSnafu { name: &name })?;
        let objects = match output {
            Value::Object(map) => vec![Object::new(map)],
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::Object(map) => Ok(Object::new(map)),
                    output => UnexpectedOutputSnafu { name: &name, output }.fail(),
                })
                .collect::<Result<_, _>>()?,
            output => return UnexpectedOutputSnafu { name, output }.fail(),
        };

        debug!(template = %name, objects = objects.len(), "evaluated jsonnet template");
        Ok(objects)
    }

    /// The evaluator state is not thread-safe, every evaluation gets its own.
    fn evaluate_snippet(&self, name: &str, code: &str, options: &str) -> Result<String, String> {
        let state = EvaluationState::default();
        state.with_stdlib();
        if let Some(factory) = &self.import_resolver {
            state.set_import_resolver(factory());
        }

        let result = state
            .add_tla_code(OPTIONS_ARGUMENT.into(), options.into())
            .and_then(|()| state.evaluate_snippet_raw(Rc::from(Path::new(name)), code.into()))
            .and_then(|value| state.with_tla(value))
            .and_then(|value| state.manifest(value));

        match result {
            Ok(manifest) => Ok(manifest.to_string()),
            Err(error) => Err(state.stringify_err(&error)),
        }
    }
}

impl Applier for JsonnetApplier {
    fn name(&self) -> &str {
        TemplateType::Jsonnet.as_str()
    }

    fn claims(&self, object: &Object) -> bool {
        Kind::ObjectTemplate.matches(object)
            && TemplateType::raw_of(object) == TemplateType::Jsonnet.as_str()
    }

    #[instrument(skip_all, fields(component = %component.name()))]
    fn apply_options(&self, component: &Component, options: &Options) -> super::Result<Component> {
        let objects = expand_in_place(
            &component.spec.objects,
            |object| self.claims(object),
            |index, object| self.evaluate(index, object, options),
        )
        .context(JsonnetSnafu {
            component: component.name(),
        })?;

        Ok(component.with_objects(objects))
    }
}
