//! Options appliers resolve the templates of a component against user supplied options.
//!
//! Every applier claims a subset of the component's objects (its templates), renders or applies
//! them and returns a new component. Objects an applier does not claim are passed through
//! unchanged. The input component is never modified.
use serde_json::{Map, Value};
use snafu::Snafu;

use crate::{apis::Component, object::Object};

mod gotmpl;
mod jsonnet;
mod multi;
mod patchtmpl;

pub use gotmpl::GoTemplateApplier;
pub use jsonnet::{ImportResolverFactory, JsonnetApplier};
pub use multi::MultiApplier;
pub use patchtmpl::PatchTemplateApplier;

/// User supplied options, keyed by option name.
pub type Options = Map<String, Value>;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("failed to apply go-templates to component {component:?}"))]
    GoTemplate {
        source: gotmpl::Error,
        component: String,
    },

    #[snafu(display("failed to apply jsonnet templates to component {component:?}"))]
    Jsonnet {
        source: jsonnet::Error,
        component: String,
    },

    #[snafu(display("failed to apply patch templates to component {component:?}"))]
    PatchTemplate {
        source: patchtmpl::Error,
        component: String,
    },

    #[snafu(display("stage {stage:?} failed"))]
    Stage {
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
        stage: String,
    },

    #[snafu(display("cancelled before component {component:?} was applied"))]
    Cancelled { component: String },
}

/// A strategy resolving one kind of template.
pub trait Applier {
    /// The name used in logs and error messages.
    fn name(&self) -> &str;

    /// Whether `object` is a template this applier resolves.
    fn claims(&self, object: &Object) -> bool;

    /// Returns a copy of `component` with all claimed templates resolved.
    fn apply_options(&self, component: &Component, options: &Options) -> Result<Component>;
}

/// Replaces every object claimed by `claims` with the objects `expand` produces for it.
///
/// Rendered objects take the position of their template, all other objects keep their relative
/// order.
pub(crate) fn expand_in_place<E>(
    objects: &[Object],
    claims: impl Fn(&Object) -> bool,
    mut expand: impl FnMut(usize, &Object) -> Result<Vec<Object>, E>,
) -> Result<Vec<Object>, E> {
    let mut expanded = Vec::with_capacity(objects.len());
    for (index, object) in objects.iter().enumerate() {
        if claims(object) {
            expanded.extend(expand(index, object)?);
        } else {
            expanded.push(object.clone());
        }
    }
    Ok(expanded)
}

/// The name of a template in error messages, falling back to its position in the component.
pub(crate) fn template_name(object: &Object, index: usize) -> String {
    match object.name() {
        Some(name) if !name.is_empty() => name.to_owned(),
        _ => format!("#{index}"),
    }
}
