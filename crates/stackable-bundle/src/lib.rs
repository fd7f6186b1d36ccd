//! Packaging, templating and patching of Kubernetes manifest bundles.
//!
//! A bundle is an ordered list of components, each holding a list of Kubernetes objects. Objects
//! may be templates which are resolved against user supplied options:
//!
//! 1. [`inline`] reads builder documents and embeds all referenced files.
//! 2. [`build`] compiles `PatchTemplateBuilder`s with build-time options.
//! 3. [`options`] renders object templates and applies patch templates.
//!
//! [`filter`] selects objects and components, [`validation`] checks the result.

pub mod apis;
pub mod build;
pub mod filter;
pub mod inline;
pub mod object;
pub mod options;
pub mod patch;
pub mod schema;
pub mod template;
pub mod validation;
pub mod yaml;

// External re-exports
pub use k8s_openapi;
pub use kube;
pub use url;

pub use object::Object;
pub use options::{Applier, MultiApplier, Options};
