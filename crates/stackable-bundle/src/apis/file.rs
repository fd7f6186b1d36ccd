use serde::{Deserialize, Serialize};

/// A reference to a file, either a bare path or a `file://` URL.
///
/// Relative paths are resolved against the document containing the reference.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct File {
    pub url: String,
}

impl File {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

/// A named group of raw files which are inlined as a single ConfigMap.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileGroup {
    pub name: String,

    #[serde(default)]
    pub files: Vec<File>,

    /// Store the contents base64 encoded in `binaryData` instead of `data`.
    #[serde(default)]
    pub as_binary: bool,
}
