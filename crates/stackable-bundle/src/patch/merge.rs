//! Strategic merge patches on JSON values.
//!
//! Maps merge recursively and `null` deletes a key. Lists whose field name has a merge key are
//! merged element by element, matching elements by that key; all other lists are replaced. The
//! directives `$patch: delete` (on a keyed list element or a map) and `$patch: replace` (on a map,
//! or as a list element to replace the whole list) are honored.
use serde_json::{Map, Value};
use snafu::{OptionExt, Snafu, ensure};

/// `(list field name, merge key)` pairs.
pub type MergeKeys = &'static [(&'static str, &'static str)];

const DIRECTIVE: &str = "$patch";
/// Only affects the order of list elements, which this implementation keeps stable anyway.
const SET_ELEMENT_ORDER_PREFIX: &str = "$setElementOrder/";

#[derive(Debug, PartialEq, Snafu)]
pub enum Error {
    #[snafu(display("element of list {field:?} is missing its merge key {merge_key:?}"))]
    MissingMergeKey {
        field: String,
        merge_key: &'static str,
    },

    #[snafu(display("element of list {field:?} is not a map"))]
    NonObjectListItem { field: String },

    #[snafu(display("unsupported patch directive {directive}"))]
    UnsupportedDirective { directive: String },
}

pub fn strategic_merge(
    target: &Map<String, Value>,
    patch: &Map<String, Value>,
    merge_keys: MergeKeys,
) -> Result<Map<String, Value>, Error> {
    let mut merged = target.clone();
    merge_map(&mut merged, patch, merge_keys)?;
    Ok(merged)
}

fn merge_map(
    target: &mut Map<String, Value>,
    patch: &Map<String, Value>,
    merge_keys: MergeKeys,
) -> Result<(), Error> {
    match directive(patch)? {
        Some(Directive::Replace) => {
            *target = strip_directives(patch)?;
            return Ok(());
        }
        // handled by the caller, which owns the key
        Some(Directive::Delete) | None => {}
    }

    for (key, patch_value) in patch {
        if key == DIRECTIVE || key.starts_with(SET_ELEMENT_ORDER_PREFIX) {
            continue;
        }
        ensure!(
            !key.starts_with('$'),
            UnsupportedDirectiveSnafu {
                directive: key.clone()
            }
        );

        if patch_value.is_null() {
            target.remove(key);
            continue;
        }

        match (target.get_mut(key), patch_value) {
            (_, Value::Object(patch_map)) if directive(patch_map)? == Some(Directive::Delete) => {
                target.remove(key);
            }
            (Some(Value::Object(target_map)), Value::Object(patch_map)) => {
                merge_map(target_map, patch_map, merge_keys)?;
            }
            (Some(Value::Array(target_list)), Value::Array(patch_list)) => {
                match merge_key(merge_keys, key) {
                    Some(merge_key) => {
                        merge_list(target_list, patch_list, key, merge_key, merge_keys)?;
                    }
                    None => *target_list = strip_list(patch_list)?,
                }
            }
            (_, patch_value) => {
                target.insert(key.clone(), strip_value(patch_value)?);
            }
        }
    }

    Ok(())
}

fn merge_list(
    target: &mut Vec<Value>,
    patch: &[Value],
    field: &str,
    merge_key: &'static str,
    merge_keys: MergeKeys,
) -> Result<(), Error> {
    let is_replace_marker = |item: &Value| {
        item.as_object().is_some_and(|map| {
            map.len() == 1 && map.get(DIRECTIVE).and_then(Value::as_str) == Some("replace")
        })
    };
    if patch.iter().any(is_replace_marker) {
        let items: Vec<Value> = patch
            .iter()
            .filter(|item| !is_replace_marker(item))
            .cloned()
            .collect();
        *target = strip_list(&items)?;
        return Ok(());
    }

    for item in patch {
        let patch_map = item.as_object().context(NonObjectListItemSnafu { field })?;
        let key_value = patch_map
            .get(merge_key)
            .context(MissingMergeKeySnafu { field, merge_key })?;
        let position = target
            .iter()
            .position(|existing| existing.get(merge_key) == Some(key_value));

        match (directive(patch_map)?, position) {
            (Some(Directive::Delete), Some(position)) => {
                target.remove(position);
            }
            (Some(Directive::Delete), None) => {}
            (_, Some(position)) => match &mut target[position] {
                Value::Object(existing) => merge_map(existing, patch_map, merge_keys)?,
                existing => *existing = strip_value(item)?,
            },
            (_, None) => target.push(strip_value(item)?),
        }
    }

    Ok(())
}

#[derive(Debug, PartialEq)]
enum Directive {
    Delete,
    Replace,
}

fn directive(map: &Map<String, Value>) -> Result<Option<Directive>, Error> {
    match map.get(DIRECTIVE) {
        None => Ok(None),
        Some(value) => match value.as_str() {
            Some("delete") => Ok(Some(Directive::Delete)),
            Some("replace") => Ok(Some(Directive::Replace)),
            Some("merge") => Ok(None),
            _ => UnsupportedDirectiveSnafu {
                directive: format!("{DIRECTIVE}: {value}"),
            }
            .fail(),
        },
    }
}

fn merge_key(merge_keys: MergeKeys, field: &str) -> Option<&'static str> {
    merge_keys
        .iter()
        .find(|(list, _)| *list == field)
        .map(|(_, key)| *key)
}

/// Removes directives from values that are inserted without a counterpart in the target.
fn strip_value(value: &Value) -> Result<Value, Error> {
    Ok(match value {
        Value::Object(map) => Value::Object(strip_directives(map)?),
        Value::Array(items) => Value::Array(strip_list(items)?),
        other => other.clone(),
    })
}

fn strip_list(items: &[Value]) -> Result<Vec<Value>, Error> {
    items.iter().map(strip_value).collect()
}

fn strip_directives(map: &Map<String, Value>) -> Result<Map<String, Value>, Error> {
    map.iter()
        .filter(|(key, _)| *key != DIRECTIVE && !key.starts_with(SET_ELEMENT_ORDER_PREFIX))
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| Ok((key.clone(), strip_value(value)?)))
        .collect()
}
