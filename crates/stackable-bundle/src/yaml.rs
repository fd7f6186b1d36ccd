//! Utility functions for processing data in the YAML file format
//!
//! JSON is accepted wherever YAML is, as every JSON document is also a YAML document.
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use snafu::{ResultExt, Snafu};

use crate::object::{NotAnObjectError, Object};

type Result<T, E = Error> = std::result::Result<T, E>;

static DOCUMENT_SEPARATOR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^---[ \t]*\r?$").expect("failed to compile document separator regex")
});

/// Represents every error which can be encountered during YAML (de)serialization.
#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to serialize YAML"))]
    SerializeYaml { source: serde_yaml::Error },

    #[snafu(display("failed to write YAML document separator"))]
    WriteDocumentSeparator { source: std::io::Error },

    #[snafu(display("failed to parse bytes as valid UTF-8 string"))]
    ParseUtf8Bytes { source: std::string::FromUtf8Error },

    #[snafu(display("failed to parse document #{index} as YAML or JSON"))]
    ParseDocument {
        source: serde_yaml::Error,
        index: usize,
    },

    #[snafu(display("document #{index} is not a structured object"))]
    DocumentNotAnObject {
        source: NotAnObjectError,
        index: usize,
    },
}

/// Provides configurable options during YAML serialization.
///
/// For most people the default implementation [`SerializeOptions::default()`] is sufficient as it
/// enables explicit document serialization.
pub struct SerializeOptions {
    /// Adds leading triple dashes (`---`) to the output string.
    pub explicit_document: bool,

    /// Serialize enum variants as YAML maps using the variant name as the key.
    pub singleton_map: bool,
}

impl Default for SerializeOptions {
    fn default() -> Self {
        Self {
            explicit_document: true,
            singleton_map: true,
        }
    }
}

/// Serializes the given data structure and writes it to a [`Writer`](std::io::Write).
pub fn serialize<T, W>(value: &T, mut writer: W, options: SerializeOptions) -> Result<()>
where
    T: serde::Serialize,
    W: std::io::Write,
{
    if options.explicit_document {
        writer
            .write_all(b"---\n")
            .context(WriteDocumentSeparatorSnafu)?;
    }

    let mut serializer = serde_yaml::Serializer::new(writer);

    if options.singleton_map {
        serde_yaml::with::singleton_map_recursive::serialize(value, &mut serializer)
            .context(SerializeYamlSnafu)?;
    } else {
        value
            .serialize(&mut serializer)
            .context(SerializeYamlSnafu)?;
    }

    Ok(())
}

/// Serializes every item as its own explicit document into a single stream.
pub fn to_multi_document_string<'a, T, I>(items: I) -> Result<String>
where
    T: serde::Serialize + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut buffer = Vec::new();
    for item in items {
        serialize(item, &mut buffer, SerializeOptions::default())?;
    }

    String::from_utf8(buffer).context(ParseUtf8BytesSnafu)
}

/// Splits a multi-document stream on `---` lines.
///
/// Segments which are empty or only contain whitespace are dropped.
pub fn split_documents(input: &str) -> Vec<&str> {
    DOCUMENT_SEPARATOR_REGEX
        .split(input)
        .filter(|document| !document.trim().is_empty())
        .collect()
}

/// Parses a (possibly multi-document) YAML or JSON stream into objects.
///
/// Documents consisting only of comments or decoding to `null` are skipped.
pub fn parse_objects(input: &str) -> Result<Vec<Object>> {
    let mut objects = Vec::new();
    for (index, document) in split_documents(input).into_iter().enumerate() {
        if is_comment_only(document) {
            continue;
        }
        let value: Value = serde_yaml::from_str(document).context(ParseDocumentSnafu { index })?;
        if value.is_null() {
            continue;
        }
        objects.push(Object::try_from(value).context(DocumentNotAnObjectSnafu { index })?);
    }

    Ok(objects)
}

/// Parses a stream which must hold exactly one object.
///
/// Returns [`None`] if the stream holds no object.
pub fn parse_object(input: &str) -> Result<Option<Object>> {
    if is_comment_only(input) {
        return Ok(None);
    }
    let value: Value = serde_yaml::from_str(input).context(ParseDocumentSnafu { index: 0usize })?;
    if value.is_null() {
        return Ok(None);
    }

    Object::try_from(value)
        .map(Some)
        .context(DocumentNotAnObjectSnafu { index: 0usize })
}

fn is_comment_only(document: &str) -> bool {
    document
        .lines()
        .map(str::trim)
        .all(|line| line.is_empty() || line.starts_with('#'))
}
