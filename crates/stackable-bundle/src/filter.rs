//! Structural selection of objects and components.
//!
//! [`Criteria`] describe a match as an AND of ORs: every non-empty dimension (kinds, names,
//! namespaces, annotations, labels) must match, and a dimension matches if any of its entries
//! matches. Empty dimensions match everything.
//!
//! [`partition`] always splits by the positive criteria. [`select`] and [`filter`] are the
//! convenience views which honor [`Criteria::invert_match`].
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::object::{Selectable, string_map};

/// Separates the apiVersion from the kind in a qualified kind, e.g. `apps/v1,Deployment`.
const QUALIFIED_KIND_SEPARATOR: char = ',';

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Criteria {
    /// Either bare kinds (`Pod`) or kinds qualified by their apiVersion (`v1,Pod`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub names: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Negates the match in [`select`] and [`filter`].
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub invert_match: bool,
}

impl Criteria {
    pub fn with_kinds<I, S>(kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kinds: kinds.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Returns whether `item` matches the positive criteria, ignoring
    /// [`invert_match`](Self::invert_match).
    pub fn matches<T: Selectable>(&self, item: &T) -> bool {
        let type_meta = item.type_meta();
        let meta = item.object_meta();
        let name = meta.name.as_deref().unwrap_or_default();
        let namespace = meta.namespace.as_deref().unwrap_or_default();

        let kinds = self.kinds.is_empty()
            || self.kinds.iter().any(|kind| {
                match kind.split_once(QUALIFIED_KIND_SEPARATOR) {
                    Some((api_version, kind)) => {
                        api_version == type_meta.api_version && kind == type_meta.kind
                    }
                    None => *kind == type_meta.kind,
                }
            });
        let names = self.names.is_empty() || self.names.iter().any(|n| n == name);
        let namespaces =
            self.namespaces.is_empty() || self.namespaces.iter().any(|ns| ns == namespace);
        let annotations = any_entry_matches(
            &self.annotations,
            &string_map(meta.annotations.as_ref()),
        );
        let labels = any_entry_matches(&self.labels, &string_map(meta.labels.as_ref()));

        kinds && names && namespaces && annotations && labels
    }

    /// Returns whether `item` matches after applying [`invert_match`](Self::invert_match).
    pub fn selects<T: Selectable>(&self, item: &T) -> bool {
        self.matches(item) != self.invert_match
    }
}

/// An empty set of wanted entries matches vacuously.
fn any_entry_matches(wanted: &BTreeMap<String, String>, actual: &BTreeMap<String, String>) -> bool {
    wanted.is_empty()
        || wanted
            .iter()
            .any(|(key, value)| actual.get(key).is_some_and(|actual| actual == value))
}

/// Splits `items` into the ones matching the positive criteria and all others.
///
/// Both halves keep the input order, the input itself is left untouched. Missing criteria match
/// everything.
pub fn partition<T>(items: &[T], criteria: Option<&Criteria>) -> (Vec<T>, Vec<T>)
where
    T: Selectable + Clone,
{
    let Some(criteria) = criteria else {
        return (items.to_vec(), Vec::new());
    };

    items
        .iter()
        .cloned()
        .partition(|item| criteria.matches(item))
}

/// Returns the items selected by `criteria`.
pub fn select<T>(items: &[T], criteria: Option<&Criteria>) -> Vec<T>
where
    T: Selectable + Clone,
{
    let (matched, not_matched) = partition(items, criteria);
    match criteria {
        Some(Criteria {
            invert_match: true, ..
        }) => not_matched,
        _ => matched,
    }
}

/// Returns the items remaining after removing the ones selected by `criteria`.
pub fn filter<T>(items: &[T], criteria: Option<&Criteria>) -> Vec<T>
where
    T: Selectable + Clone,
{
    let (matched, not_matched) = partition(items, criteria);
    match criteria {
        Some(Criteria {
            invert_match: true, ..
        }) => matched,
        _ => not_matched,
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;
    use crate::{apis::Component, object::Object};

    fn object(api_version: &str, kind: &str, name: &str, namespace: &str) -> Object {
        Object::try_from(json!({
            "apiVersion": api_version,
            "kind": kind,
            "metadata": {
                "name": name,
                "namespace": namespace,
                "labels": {"tier": if name.starts_with("db") { "data" } else { "web" }},
                "annotations": {"owner": namespace},
            },
        }))
        .expect("test object is a map")
    }

    fn objects() -> Vec<Object> {
        vec![
            object("v1", "Pod", "web-0", "frontend"),
            object("v1", "Pod", "db-0", "backend"),
            object("v1", "Service", "web", "frontend"),
            object("apps/v1", "Deployment", "web", "frontend"),
            object("extensions/v1beta1", "Deployment", "web", "legacy"),
        ]
    }

    fn names(objects: &[Object]) -> Vec<String> {
        objects.iter().map(|o| o.key().to_string()).collect()
    }

    #[rstest]
    #[case::bare_kind(Criteria::with_kinds(["Pod"]), 2)]
    #[case::kinds_are_or(Criteria::with_kinds(["Pod", "Service"]), 3)]
    #[case::names(Criteria::with_names(["web"]), 3)]
    #[case::kind_and_name(
        Criteria { kinds: vec!["Deployment".into()], names: vec!["web".into()], ..Default::default() },
        2
    )]
    #[case::namespaces(
        Criteria { namespaces: vec!["frontend".into(), "backend".into()], ..Default::default() },
        4
    )]
    #[case::labels(
        Criteria { labels: BTreeMap::from([("tier".into(), "data".into())]), ..Default::default() },
        1
    )]
    #[case::annotations_are_or(
        Criteria {
            annotations: BTreeMap::from([
                ("owner".into(), "legacy".into()),
                ("missing".into(), "value".into()),
            ]),
            ..Default::default()
        },
        1
    )]
    #[case::all_dimensions_must_match(
        Criteria {
            kinds: vec!["Pod".into()],
            labels: BTreeMap::from([("tier".into(), "web".into())]),
            namespaces: vec!["backend".into()],
            ..Default::default()
        },
        0
    )]
    #[case::empty_matches_all(Criteria::default(), 5)]
    fn partition_counts(#[case] criteria: Criteria, #[case] expected: usize) {
        let objects = objects();
        let (matched, not_matched) = partition(&objects, Some(&criteria));

        assert_eq!(matched.len(), expected, "{:?}", names(&matched));
        assert_eq!(matched.len() + not_matched.len(), objects.len());
        for object in &objects {
            assert!(
                matched.contains(object) != not_matched.contains(object),
                "{} must be in exactly one half",
                object.key()
            );
        }
    }

    #[test]
    fn partition_is_idempotent() {
        let objects = objects();
        let criteria = Criteria::with_kinds(["Deployment"]);

        let (matched, _) = partition(&objects, Some(&criteria));
        let (rematched, not_matched) = partition(&matched, Some(&criteria));

        assert_eq!(matched, rematched);
        assert!(not_matched.is_empty());
    }

    #[test]
    fn qualified_kinds_disambiguate_api_versions() {
        let objects = objects();

        let selected = select(&objects, Some(&Criteria::with_kinds(["apps/v1,Deployment"])));
        assert_eq!(names(&selected), ["apps/v1/Deployment \"web\""]);

        let selected = select(&objects, Some(&Criteria::with_kinds(["Deployment"])));
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn invert_match_only_affects_select_and_filter() {
        let objects = objects();
        let criteria = Criteria {
            kinds: vec!["Pod".into()],
            invert_match: true,
            ..Default::default()
        };

        let (matched, _) = partition(&objects, Some(&criteria));
        assert_eq!(matched.len(), 2);

        assert_eq!(select(&objects, Some(&criteria)).len(), 3);
        assert_eq!(filter(&objects, Some(&criteria)).len(), 2);
    }

    #[test]
    fn missing_criteria_match_everything() {
        let objects = objects();
        assert_eq!(select(&objects, None), objects);
        assert!(filter(&objects, None).is_empty());
    }

    #[test]
    fn input_is_not_mutated() {
        let objects = objects();
        let before = objects.clone();
        let _ = filter(&objects, Some(&Criteria::with_kinds(["Pod"])));
        assert_eq!(objects, before);
    }

    #[test]
    fn components_are_selectable() {
        let mut kafka = Component::new("kafka", "3.7.0", Vec::new());
        kafka.metadata.name = Some("kafka-3.7.0".to_owned());
        let mut zookeeper = Component::new("zookeeper", "3.9.1", Vec::new());
        zookeeper.metadata.name = Some("zookeeper-3.9.1".to_owned());
        let components = vec![kafka, zookeeper];

        let selected = select(&components, Some(&Criteria::with_names(["kafka-3.7.0"])));
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].spec.component_name, "kafka");

        let remaining = filter(&components, Some(&Criteria::with_kinds(["Component"])));
        assert!(remaining.is_empty());
    }
}
