//! Go `text/template` rendering on top of [`gtmpl`].
//!
//! Templates are parsed once into a [`Template`] and can be rendered any number of times against
//! JSON data:
//!
//! ```
//! use serde_json::json;
//! use stackable_bundle::template::{RenderOptions, Template};
//!
//! let template = Template::parse("greeting", "Hello {{ .Name | upper }}!").unwrap();
//! let output = template
//!     .render(&json!({"Name": "world"}), &RenderOptions::default())
//!     .unwrap();
//! assert_eq!(output, "Hello WORLD!");
//! ```
//!
//! Besides the Go builtins, a handful of Sprig helpers (`default`, `quote`, `toJson`, `toYaml`,
//! `indent`, `nindent`, ...) are available. The [`RenderOptions`] control what a reference to a
//! missing key does and whether string values are escaped for YAML.
use std::{collections::HashMap, fmt, sync::LazyLock};

use regex::Regex;
use serde_json::Value;
use snafu::Snafu;

mod funcs;

/// Scalars matching this can be emitted as plain YAML without changing their meaning, as long as
/// they are not one of the [`YAML_RESERVED`] words.
static PLAIN_YAML_SCALAR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_./-]*$").expect("failed to compile plain YAML scalar regex")
});

const YAML_RESERVED: &[&str] = &[
    "true", "false", "yes", "no", "on", "off", "y", "n", "null", "~",
];

/// What the engine prints for a missing map entry.
const NO_VALUE: &str = "<no value>";

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to parse template {name:?}: {message}"))]
    Parse { name: String, message: String },

    #[snafu(display("failed to execute template {name:?}: {message}"))]
    Execute { name: String, message: String },
}

/// What happens when a template references a map key that does not exist.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MissingKey {
    /// Rendering fails with an error naming the key.
    #[default]
    Error,

    /// The missing value renders as an empty value and is falsy.
    Zero,
}

/// How interpolated values are written into the output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Escaping {
    /// Values are written verbatim.
    #[default]
    None,

    /// Strings which are not plain YAML scalars are written as double-quoted scalars, so that
    /// they can never introduce new structure (keys, list items, documents) into the output.
    Yaml,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderOptions {
    pub missing_key: MissingKey,
    pub escaping: Escaping,
}

impl RenderOptions {
    pub fn with_missing_key(mut self, missing_key: MissingKey) -> Self {
        self.missing_key = missing_key;
        self
    }

    pub fn with_escaping(mut self, escaping: Escaping) -> Self {
        self.escaping = escaping;
        self
    }
}

pub struct Template {
    name: String,
    template: gtmpl::Template,
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template").field("name", &self.name).finish()
    }
}

impl Template {
    /// Parses `text`, `name` identifies the template in error messages.
    pub fn parse(name: impl Into<String>, text: &str) -> Result<Self> {
        let name = name.into();
        let mut template = gtmpl::Template::default();
        for &(helper, func) in funcs::HELPERS {
            template.add_func(helper, func);
        }

        if let Err(error) = template.parse(text) {
            return ParseSnafu {
                name,
                message: error.to_string(),
            }
            .fail();
        }
        Ok(Self { name, template })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn render(&self, data: &Value, options: &RenderOptions) -> Result<String> {
        let context = gtmpl::Context::from(template_value(data, options));
        let rendered = self
            .template
            .render(&context)
            .map_err(|error| Error::Execute {
                name: self.name.clone(),
                message: error.to_string(),
            })?;

        Ok(match options.missing_key {
            MissingKey::Error => rendered,
            MissingKey::Zero => rendered.replace(NO_VALUE, ""),
        })
    }
}

/// Parses and renders `text` in one go.
pub fn render(name: &str, text: &str, data: &Value, options: &RenderOptions) -> Result<String> {
    Template::parse(name, text)?.render(data, options)
}

/// Converts JSON data into the engine's value model.
///
/// Maps become objects when missing keys are errors, since only a missing field of an object
/// fails. With [`MissingKey::Zero`] they become plain maps, where a missing key is no value.
fn template_value(value: &Value, options: &RenderOptions) -> gtmpl_value::Value {
    use gtmpl_value::Value as TemplateValue;

    match value {
        Value::Null => TemplateValue::Nil,
        Value::Bool(b) => TemplateValue::Bool(*b),
        Value::Number(n) => n
            .as_i64()
            .map(TemplateValue::from)
            .or_else(|| n.as_u64().map(TemplateValue::from))
            .or_else(|| n.as_f64().map(TemplateValue::from))
            .unwrap_or(TemplateValue::Nil),
        Value::String(s) => TemplateValue::String(match options.escaping {
            // a JSON string is a valid double-quoted YAML scalar
            Escaping::Yaml if !s.is_empty() && !is_plain_yaml(s) => value.to_string(),
            _ => s.clone(),
        }),
        Value::Array(items) => TemplateValue::Array(
            items
                .iter()
                .map(|item| template_value(item, options))
                .collect(),
        ),
        Value::Object(map) => {
            let map: HashMap<String, TemplateValue> = map
                .iter()
                .map(|(key, value)| (key.clone(), template_value(value, options)))
                .collect();
            match options.missing_key {
                MissingKey::Error => TemplateValue::Object(map),
                MissingKey::Zero => TemplateValue::Map(map),
            }
        }
    }
}

fn is_plain_yaml(s: &str) -> bool {
    PLAIN_YAML_SCALAR_REGEX.is_match(s) && !YAML_RESERVED.contains(&s.to_lowercase().as_str())
}
