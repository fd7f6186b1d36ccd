//! Applies the defaults of an OpenAPI options schema and validates the resulting options.
//!
//! Defaults are taken from `properties.*.default`, recursing into nested objects and the `items`
//! of arrays. Validation runs the filled-in options through a JSON Schema validator, with the
//! Kubernetes `nullable` extension translated into a `null` type.
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
    JSONSchemaProps, JSONSchemaPropsOrArray,
};
use serde_json::{Map, Value};
use snafu::{ResultExt, Snafu, ensure};
use tracing::trace;

use crate::options::Options;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to serialize options schema"))]
    SerializeSchema { source: serde_json::Error },

    #[snafu(display("options schema is not a valid JSON schema: {message}"))]
    CompileSchema { message: String },

    #[snafu(display("options do not match the schema: {}", violations.join("; ")))]
    Violations { violations: Vec<String> },
}

/// Returns a copy of `options` with all schema defaults filled in beneath the supplied values.
///
/// Nested objects are only created if they end up holding at least one default. The result is
/// validated against `schema`, so missing required options, wrong types and values outside an
/// `enum` are rejected. A missing `schema` returns the options unchanged.
pub fn apply_defaults(options: &Options, schema: Option<&JSONSchemaProps>) -> Result<Options> {
    let mut options = options.clone();
    if let Some(schema) = schema {
        fill_object(&mut options, schema, "");
        validate(&options, schema)?;
    }
    Ok(options)
}

/// Builds an options map which renders every property of `schema` back into its own template
/// placeholder, e.g. `{"Image": {"Tag": "{{.Image.Tag}}"}}`.
pub fn pass_through_defaults(schema: &JSONSchemaProps) -> Options {
    pass_through(schema, "")
}

fn pass_through(schema: &JSONSchemaProps, prefix: &str) -> Options {
    let mut options = Map::new();
    for (key, property) in schema.properties.iter().flatten() {
        let path = join(prefix, key);
        let value = if has_properties(property) {
            Value::Object(pass_through(property, &path))
        } else {
            Value::String(format!("{{{{.{path}}}}}"))
        };
        options.insert(key.clone(), value);
    }
    options
}

fn fill_object(map: &mut Map<String, Value>, schema: &JSONSchemaProps, prefix: &str) {
    for (key, property) in schema.properties.iter().flatten() {
        let path = join(prefix, key);

        if !map.contains_key(key) {
            if let Some(default) = &property.default {
                trace!(option = %path, "applying schema default");
                map.insert(key.clone(), default.0.clone());
            } else if has_properties(property) {
                // the nested object is optional, it only materializes if it carries defaults
                let mut nested = Map::new();
                fill_object(&mut nested, property, &path);
                if !nested.is_empty() {
                    map.insert(key.clone(), Value::Object(nested));
                }
            }
        }

        if let Some(value) = map.get_mut(key) {
            fill_value(value, property, &path);
        }
    }
}

fn fill_value(value: &mut Value, schema: &JSONSchemaProps, path: &str) {
    match value {
        Value::Object(map) if has_properties(schema) => fill_object(map, schema, path),
        Value::Array(items) => {
            if let Some(JSONSchemaPropsOrArray::Schema(item_schema)) = &schema.items {
                for (i, item) in items.iter_mut().enumerate() {
                    fill_value(item, item_schema, &format!("{path}[{i}]"));
                }
            }
        }
        _ => {}
    }
}

fn validate(options: &Options, schema: &JSONSchemaProps) -> Result<()> {
    let mut schema = serde_json::to_value(schema).context(SerializeSchemaSnafu)?;
    translate_nullable(&mut schema);

    let validator = jsonschema::validator_for(&schema).map_err(|error| Error::CompileSchema {
        message: error.to_string(),
    })?;

    let instance = Value::Object(options.clone());
    let violations: Vec<String> = validator
        .iter_errors(&instance)
        .map(|error| {
            let location = error.instance_path.to_string();
            if location.is_empty() {
                error.to_string()
            } else {
                format!("{location}: {error}")
            }
        })
        .collect();
    ensure!(violations.is_empty(), ViolationsSnafu { violations });

    Ok(())
}

/// Rewrites `{"type": T, "nullable": true}` into `{"type": [T, "null"]}` throughout `schema`.
fn translate_nullable(schema: &mut Value) {
    match schema {
        Value::Object(map) => {
            if map.remove("nullable") == Some(Value::Bool(true)) {
                if let Some(Value::String(type_)) = map.get("type") {
                    let types = Value::Array(vec![Value::String(type_.clone()), "null".into()]);
                    map.insert("type".to_owned(), types);
                }
            }
            map.values_mut().for_each(translate_nullable);
        }
        Value::Array(items) => items.iter_mut().for_each(translate_nullable),
        _ => {}
    }
}

fn has_properties(schema: &JSONSchemaProps) -> bool {
    schema
        .properties
        .as_ref()
        .is_some_and(|properties| !properties.is_empty())
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_owned()
    } else {
        format!("{prefix}.{key}")
    }
}
