// This is adapted from Kubernetes.
// See apimachinery/pkg/util/validation/validation.go in the Kubernetes source

use std::{collections::BTreeSet, fmt::Display, sync::LazyLock};

use const_format::concatcp;
use regex::Regex;
use snafu::Snafu;

use crate::{
    apis::{self, Bundle, Component},
    object::Object,
};

const RFC_1123_LABEL_MAX_LENGTH: usize = 63;
const RFC_1123_LABEL_FMT: &str = "[a-z0-9]([-a-z0-9]*[a-z0-9])?";
const RFC_1123_LABEL_ERROR_MSG: &str = "a lowercase RFC 1123 label must consist of lower case alphanumeric characters or '-', and must start and end with an alphanumeric character";

/// This is a subdomain's max length in DNS (RFC 1123)
const RFC_1123_SUBDOMAIN_MAX_LENGTH: usize = 253;
const RFC_1123_SUBDOMAIN_FMT: &str =
    concatcp!(RFC_1123_LABEL_FMT, "(\\.", RFC_1123_LABEL_FMT, ")*");
const RFC_1123_SUBDOMAIN_ERROR_MSG: &str = "a lowercase RFC 1123 subdomain must consist of lower case alphanumeric characters, '-' or '.', and must start and end with an alphanumeric character";

static RFC_1123_LABEL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!("^{RFC_1123_LABEL_FMT}$")).expect("failed to compile RFC 1123 label regex")
});

static RFC_1123_SUBDOMAIN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!("^{RFC_1123_SUBDOMAIN_FMT}$"))
        .expect("failed to compile RFC 1123 subdomain regex")
});

type Result<T = (), E = Errors> = std::result::Result<T, E>;

/// A collection of errors discovered during validation.
#[derive(Debug)]
pub struct Errors(Vec<Error>);

impl Display for Errors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            let prefix = match i {
                0 => "",
                _ => ", ",
            };
            write!(f, "{prefix}{error}")?;
        }
        Ok(())
    }
}
impl std::error::Error for Errors {}

/// A single validation error.
#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(transparent)]
    Regex { source: RegexError },

    #[snafu(display("input is {length} bytes long but must be no more than {max_length}"))]
    TooLong { length: usize, max_length: usize },
}

#[derive(Debug)]
pub struct RegexError {
    /// The primary error message.
    msg: &'static str,

    /// The regex that the input must match.
    regex: &'static str,

    /// Examples of valid inputs (if non-empty).
    examples: &'static [&'static str],
}

impl Display for RegexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Self {
            msg,
            regex,
            examples,
        } = self;
        write!(f, "{msg} (")?;
        if !examples.is_empty() {
            for (i, example) in examples.iter().enumerate() {
                let prefix = match i {
                    0 => "e.g.",
                    _ => "or",
                };
                write!(f, "{prefix} {example:?}, ")?;
            }
        }
        write!(f, "regex used for validation is {regex:?})")
    }
}

impl std::error::Error for RegexError {}

/// Returns [`Ok`] if `value`'s length fits within `max_length`.
fn validate_str_length(value: &str, max_length: usize) -> Result<(), Error> {
    if value.len() > max_length {
        TooLongSnafu {
            length: value.len(),
            max_length,
        }
        .fail()
    } else {
        Ok(())
    }
}

/// Returns [`Ok`] if `value` matches `regex`.
fn validate_str_regex(
    value: &str,
    regex: &'static Regex,
    error_msg: &'static str,
    examples: &'static [&'static str],
) -> Result<(), Error> {
    if regex.is_match(value) {
        Ok(())
    } else {
        Err(RegexError {
            msg: error_msg,
            regex: regex
                .as_str()
                // Clean up start/end-of-line markers
                .trim_start_matches('^')
                .trim_end_matches('$'),
            examples,
        }
        .into())
    }
}

/// Returns [`Ok`] if *all* validations are [`Ok`], otherwise returns all errors.
fn validate_all(validations: impl IntoIterator<Item = Result<(), Error>>) -> Result {
    let errors = validations
        .into_iter()
        .filter_map(|res| res.err())
        .collect::<Vec<_>>();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(Errors(errors))
    }
}

/// Tests for a string that conforms to the definition of a lowercase label in DNS (RFC 1123).
pub fn is_rfc_1123_label(value: &str) -> Result {
    validate_all([
        validate_str_length(value, RFC_1123_LABEL_MAX_LENGTH),
        validate_str_regex(
            value,
            &RFC_1123_LABEL_REGEX,
            RFC_1123_LABEL_ERROR_MSG,
            &["my-name", "123-abc"],
        ),
    ])
}

/// Tests for a string that conforms to the definition of a lowercase subdomain in DNS (RFC 1123).
///
/// This is the rule Kubernetes applies to most object names.
pub fn is_rfc_1123_subdomain(value: &str) -> Result {
    validate_all([
        validate_str_length(value, RFC_1123_SUBDOMAIN_MAX_LENGTH),
        validate_str_regex(
            value,
            &RFC_1123_SUBDOMAIN_REGEX,
            RFC_1123_SUBDOMAIN_ERROR_MSG,
            &["example.com"],
        ),
    ])
}

/// A structural problem of a component or bundle.
#[derive(Debug, Snafu)]
pub enum ComponentError {
    #[snafu(display("invalid component name {name:?}"))]
    InvalidComponentName { source: Errors, name: String },

    #[snafu(display("invalid metadata.name {name:?}"))]
    InvalidMetadataName { source: Errors, name: String },

    #[snafu(display("invalid version {version:?}, expected a semantic version like 1.2.3"))]
    InvalidVersion {
        source: semver::Error,
        version: String,
    },

    #[snafu(display("object #{index} has no kind"))]
    ObjectWithoutKind { index: usize },

    #[snafu(display("object #{index} ({kind}) has no metadata.name"))]
    ObjectWithoutName { index: usize, kind: String },

    #[snafu(display("object {key} occurs more than once"))]
    DuplicateObject { key: String },

    #[snafu(display("component {name:?} is invalid: {errors}"))]
    InvalidComponent {
        name: String,
        errors: ComponentErrors,
    },

    #[snafu(display("invalid component set"))]
    InvalidComponentSet { source: apis::Error },
}

/// All problems found in a single validation pass.
#[derive(Debug, Default)]
pub struct ComponentErrors(pub Vec<ComponentError>);

impl Display for ComponentErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            let prefix = match i {
                0 => "",
                _ => "; ",
            };
            write!(f, "{prefix}{error}")?;
        }
        Ok(())
    }
}
impl std::error::Error for ComponentErrors {}

impl ComponentErrors {
    fn into_result(self) -> Result<(), Self> {
        if self.0.is_empty() { Ok(()) } else { Err(self) }
    }
}

/// Checks names, the version and the objects of `component`.
pub fn validate_component(component: &Component) -> Result<(), ComponentErrors> {
    let mut errors = ComponentErrors::default();
    let spec = &component.spec;

    if let Err(source) = is_rfc_1123_subdomain(&spec.component_name) {
        errors.0.push(ComponentError::InvalidComponentName {
            source,
            name: spec.component_name.clone(),
        });
    }
    if let Some(name) = &component.metadata.name {
        if let Err(source) = is_rfc_1123_subdomain(name) {
            errors.0.push(ComponentError::InvalidMetadataName {
                source,
                name: name.clone(),
            });
        }
    }
    if let Err(source) = semver::Version::parse(&spec.version) {
        errors.0.push(ComponentError::InvalidVersion {
            source,
            version: spec.version.clone(),
        });
    }

    errors.0.extend(validate_objects(&spec.objects));
    errors.into_result()
}

fn validate_objects(objects: &[Object]) -> Vec<ComponentError> {
    let mut errors = Vec::new();
    let mut seen = BTreeSet::new();

    for (index, object) in objects.iter().enumerate() {
        let Some(kind) = object.kind().filter(|kind| !kind.is_empty()) else {
            errors.push(ComponentError::ObjectWithoutKind { index });
            continue;
        };
        if object.name().is_none_or(str::is_empty) {
            errors.push(ComponentError::ObjectWithoutName {
                index,
                kind: kind.to_owned(),
            });
            continue;
        }

        let namespace = object.namespace().unwrap_or_default().to_owned();
        let key = object.key();
        if !seen.insert((key.clone(), namespace.clone())) {
            let key = match namespace.as_str() {
                "" => key.to_string(),
                namespace => format!("{key} in namespace {namespace:?}"),
            };
            errors.push(ComponentError::DuplicateObject { key });
        }
    }

    errors
}

/// Validates every component of `bundle` and the uniqueness of the components.
pub fn validate_bundle(bundle: &Bundle) -> Result<(), ComponentErrors> {
    let mut errors = ComponentErrors::default();

    for component in &bundle.components {
        if let Err(component_errors) = validate_component(component) {
            errors.0.push(ComponentError::InvalidComponent {
                name: component.name().into_owned(),
                errors: component_errors,
            });
        }
    }
    if let Err(source) = bundle.component_set() {
        errors.0.push(ComponentError::InvalidComponentSet { source });
    }

    errors.into_result()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[rstest]
    #[case("")]
    #[case("-")]
    #[case("a-")]
    #[case("-a")]
    #[case("A")]
    #[case("aBc")]
    #[case("a_b")]
    #[case(".")]
    #[case("a.")]
    #[case(".a")]
    #[case("a..b")]
    #[case("a b")]
    #[case("a@b")]
    #[case(&"a".repeat(254))]
    fn is_rfc_1123_subdomain_fail(#[case] value: &str) {
        assert!(is_rfc_1123_subdomain(value).is_err());
    }

    #[rstest]
    #[case("a")]
    #[case("0")]
    #[case("a-1")]
    #[case("a--1--2--b")]
    #[case("1-a")]
    #[case("a.b.c.d.e")]
    #[case("kafka-3.7.0")]
    #[case(&"a".repeat(253))]
    fn is_rfc_1123_subdomain_pass(#[case] value: &str) {
        assert!(is_rfc_1123_subdomain(value).is_ok());
    }

    #[rstest]
    #[case("a.b")]
    #[case("kafka-3.7.0")]
    #[case(&"a".repeat(64))]
    fn is_rfc_1123_label_fail(#[case] value: &str) {
        assert!(is_rfc_1123_label(value).is_err());
    }

    #[test]
    fn error_message_names_the_rule() {
        let error = is_rfc_1123_subdomain("Not_Valid").expect_err("name is invalid");
        assert!(error.to_string().starts_with("a lowercase RFC 1123 subdomain"));
    }

    fn object(kind: &str, name: &str) -> Object {
        Object::try_from(json!({"apiVersion": "v1", "kind": kind, "metadata": {"name": name}}))
            .expect("test object is a map")
    }

    #[test]
    fn valid_component() {
        let component = Component::new(
            "kafka",
            "3.7.0",
            vec![object("Pod", "broker"), object("Service", "broker")],
        );
        validate_component(&component).expect("component is valid");
    }

    #[test]
    fn invalid_component_reports_every_problem() {
        let component = Component::new(
            "Kafka",
            "latest",
            vec![
                object("Pod", "broker"),
                object("Pod", "broker"),
                object("Pod", ""),
                Object::try_from(json!({"metadata": {"name": "x"}})).expect("map"),
            ],
        );

        let errors = validate_component(&component).expect_err("component is invalid");
        let kinds: Vec<_> = errors
            .0
            .iter()
            .map(|error| match error {
                ComponentError::InvalidComponentName { .. } => "name",
                ComponentError::InvalidVersion { .. } => "version",
                ComponentError::DuplicateObject { .. } => "duplicate",
                ComponentError::ObjectWithoutName { .. } => "unnamed",
                ComponentError::ObjectWithoutKind { .. } => "kindless",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, ["name", "version", "duplicate", "unnamed", "kindless"]);
    }

    #[test]
    fn bundle_with_duplicate_components() {
        let mut bundle = Bundle::new("platform", "1.0.0");
        bundle.components = vec![
            Component::new("kafka", "3.7.0", Vec::new()),
            Component::new("kafka", "3.7.0", Vec::new()),
        ];

        let errors = validate_bundle(&bundle).expect_err("duplicates are rejected");
        assert!(matches!(
            errors.0.as_slice(),
            [ComponentError::InvalidComponentSet { .. }]
        ));
    }
}
