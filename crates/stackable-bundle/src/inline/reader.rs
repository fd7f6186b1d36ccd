use std::{collections::BTreeMap, path::PathBuf};

use async_trait::async_trait;
use snafu::{OptionExt, ResultExt, Snafu, ensure};
use tracing::trace;
use url::Url;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("unsupported URL scheme {scheme:?}, only file URLs can be read"))]
    UnsupportedScheme { scheme: String },

    #[snafu(display("URL does not name a local file"))]
    NotAFilePath,

    #[snafu(display("failed to read file {path:?}"))]
    ReadFile {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("file not found"))]
    NotFound,
}

/// Reads the contents of referenced files.
///
/// Reads are futures, dropping one cancels the read.
#[async_trait]
pub trait FileReader: Send + Sync {
    async fn read_file(&self, url: &Url) -> Result<Vec<u8>, Error>;
}

/// Reads files from the local filesystem.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalFileReader;

#[async_trait]
impl FileReader for LocalFileReader {
    async fn read_file(&self, url: &Url) -> Result<Vec<u8>, Error> {
        ensure!(
            url.scheme() == "file",
            UnsupportedSchemeSnafu {
                scheme: url.scheme()
            }
        );
        let path = url.to_file_path().ok().context(NotAFilePathSnafu)?;

        trace!(?path, "reading file");
        tokio::fs::read(&path).await.context(ReadFileSnafu { path })
    }
}

/// Serves files from memory, keyed by their URL.
#[derive(Clone, Debug, Default)]
pub struct MemoryFileReader {
    files: BTreeMap<Url, Vec<u8>>,
}

impl MemoryFileReader {
    pub fn with_file(mut self, url: Url, contents: impl Into<Vec<u8>>) -> Self {
        self.files.insert(url, contents.into());
        self
    }
}

#[async_trait]
impl FileReader for MemoryFileReader {
    async fn read_file(&self, url: &Url) -> Result<Vec<u8>, Error> {
        self.files.get(url).cloned().context(NotFoundSnafu)
    }
}
