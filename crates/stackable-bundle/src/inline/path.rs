//! Resolution of file references into absolute `file://` URLs.
use std::path::{Component, Path, PathBuf};

use snafu::{OptionExt, ResultExt, Snafu, ensure};
use url::Url;

const FILE_SCHEME_PREFIX: &str = "file://";

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("file reference is empty"))]
    EmptyReference,

    #[snafu(display("{reference:?} does not name an absolute path"))]
    NotAbsolute { reference: String },

    #[snafu(display("failed to determine the current working directory"))]
    CurrentDir { source: std::io::Error },

    #[snafu(display("failed to resolve {reference:?} relative to {parent}"))]
    Join {
        source: url::ParseError,
        reference: String,
        parent: Url,
    },
}

/// Turns a top-level reference into an absolute URL.
///
/// Bare relative paths are resolved against the current working directory. Absolute paths and
/// `file://` URLs are taken as they are.
pub fn absolutize(reference: &str) -> Result<Url> {
    if let Some(path) = reference.strip_prefix(FILE_SCHEME_PREFIX) {
        return file_url(Path::new(path), reference);
    }
    ensure!(!reference.is_empty(), EmptyReferenceSnafu);

    let path = Path::new(reference);
    if path.is_absolute() {
        return file_url(path, reference);
    }
    let path: PathBuf = std::env::current_dir().context(CurrentDirSnafu)?.join(path);
    file_url(&path, reference)
}

/// Resolves `reference` relative to the document at `parent`.
///
/// `file://` URLs and absolute paths ignore the parent. Relative references are file paths, not
/// URL references, so characters such as `#` and `?` are part of the file name.
pub fn resolve(parent: &Url, reference: &str) -> Result<Url> {
    if let Some(path) = reference.strip_prefix(FILE_SCHEME_PREFIX) {
        return file_url(Path::new(path), reference);
    }
    ensure!(!reference.is_empty(), EmptyReferenceSnafu);

    let path = Path::new(reference);
    if path.is_absolute() {
        return file_url(path, reference);
    }

    let Ok(parent_path) = parent.to_file_path() else {
        // Joining a URL replaces its last segment, so references resolve next to the parent.
        return parent
            .join(reference)
            .context(JoinSnafu { reference, parent: parent.clone() });
    };
    let directory = parent_path.parent().unwrap_or_else(|| Path::new("/"));
    file_url(&normalize(&directory.join(path)), reference)
}

/// The last path segment of `url`, used as the key of raw files.
pub fn file_name(url: &Url) -> Option<String> {
    url.to_file_path()
        .ok()?
        .file_name()?
        .to_str()
        .map(str::to_owned)
}

/// Removes `.` and `..` components without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}

fn file_url(path: &Path, reference: &str) -> Result<Url> {
    Url::from_file_path(path)
        .ok()
        .context(NotAbsoluteSnafu { reference })
}
