//! Rendering of patch templates and their application to objects.
//!
//! A rendered patch is a partial object. It applies to every candidate object whose `apiVersion`,
//! `kind` and `metadata.name` equal the ones the patch sets; fields the patch leaves unset match
//! anything. Patches are folded one by one in document order, each seeing the result of the
//! previous one.
use serde_json::Value;
use snafu::{OptionExt, ResultExt, Snafu};
use tracing::{debug, instrument};

use crate::{
    filter::Criteria,
    object::{Object, ObjectKey},
    options::Options,
    template::{self, MissingKey, RenderOptions},
    yaml,
};

mod merge;
mod scheme;

pub use merge::MergeKeys;
pub use scheme::{DEFAULT_SCHEME, Scheme};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to render patch template {name:?}"))]
    RenderTemplate {
        source: template::Error,
        name: String,
    },

    #[snafu(display("rendered patch template {name:?} is not a valid object:\n{rendered}"))]
    DecodePatch {
        source: yaml::Error,
        name: String,
        rendered: String,
    },

    #[snafu(display("rendered patch template {name:?} is empty"))]
    EmptyPatch { name: String },

    #[snafu(display(
        "failed to apply patch {name:?} to {target}\npatch:\n{patch_content}\ntarget:\n{target_content}"
    ))]
    ApplyPatch {
        source: scheme::Error,
        name: String,
        target: ObjectKey,
        patch_content: String,
        target_content: String,
    },
}

/// Renders a patch template into the partial object it describes.
pub fn render(
    name: &str,
    template: &str,
    options: &Options,
    missing_key: MissingKey,
) -> Result<Object> {
    let rendered = template::render(
        name,
        template,
        &Value::Object(options.clone()),
        &RenderOptions::default().with_missing_key(missing_key),
    )
    .context(RenderTemplateSnafu { name })?;

    yaml::parse_object(&rendered)
        .with_context(|_| DecodePatchSnafu {
            name,
            rendered: rendered.clone(),
        })?
        .context(EmptyPatchSnafu { name })
}

/// Whether the identifying fields set in `patch` all equal the ones of `target`.
pub fn applies_to(patch: &Object, target: &Object) -> bool {
    let matches = |wanted: Option<&str>, actual: Option<&str>| match wanted {
        None | Some("") => true,
        Some(wanted) => actual == Some(wanted),
    };

    matches(patch.api_version(), target.api_version())
        && matches(patch.kind(), target.kind())
        && matches(patch.name(), target.name())
}

/// Applies a single patch to `target`, returning the patched copy.
pub fn apply(scheme: &Scheme, name: &str, patch: &Object, target: &Object) -> Result<Object> {
    scheme
        .merge(target, patch)
        .with_context(|_| ApplyPatchSnafu {
            name,
            target: target.key(),
            patch_content: to_yaml(patch),
            target_content: to_yaml(target),
        })
}

/// Applies `patch` to every object in `objects` that the selector allows and the patch
/// [applies to](applies_to). Returns the number of patched objects.
#[instrument(skip(scheme, patch, objects, selectors), fields(objects = objects.len()))]
pub fn apply_to_matching(
    scheme: &Scheme,
    name: &str,
    patch: &Object,
    objects: &mut [Object],
    selectors: &[&Criteria],
) -> Result<usize> {
    let mut patched = 0;
    for object in objects.iter_mut() {
        if !selectors.iter().all(|selector| selector.selects(object)) || !applies_to(patch, object)
        {
            continue;
        }

        debug!(object = %object.key(), "applying patch");
        *object = apply(scheme, name, patch, object)?;
        patched += 1;
    }
    Ok(patched)
}

/// Folds `patches` over `target` in order.
pub fn apply_all<'a>(
    scheme: &Scheme,
    patches: impl IntoIterator<Item = (&'a str, &'a Object)>,
    target: &Object,
) -> Result<Object> {
    patches
        .into_iter()
        .try_fold(target.clone(), |current, (name, patch)| {
            if applies_to(patch, &current) {
                apply(scheme, name, patch, &current)
            } else {
                Ok(current)
            }
        })
}

fn to_yaml(object: &Object) -> String {
    serde_yaml::to_string(object).unwrap_or_else(|_| object.clone().into_value().to_string())
}
