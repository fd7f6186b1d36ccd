//! The registry of known object types.
//!
//! Objects of a registered type are patched with strategic merge semantics, using the merge keys
//! of their list fields, and must decode as that type before and after patching. All other
//! objects fall back to a plain JSON merge patch.
use std::{collections::HashMap, fmt, sync::LazyLock};

use k8s_openapi::api::{
    apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet},
    batch::v1::{CronJob, Job},
    core::v1::{ConfigMap, Namespace, PersistentVolumeClaim, Pod, Secret, Service, ServiceAccount},
    policy::v1::PodDisruptionBudget,
    rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding},
};
use kube::core::DynamicObject;
use serde::de::DeserializeOwned;
use snafu::{ResultExt, Snafu};
use tracing::trace;

use super::merge::{self, MergeKeys};
use crate::object::Object;

/// The scheme used when no other scheme is configured. It is immutable and can be shared freely.
pub static DEFAULT_SCHEME: LazyLock<Scheme> = LazyLock::new(Scheme::default);

/// Merge keys of lists found in pods and pod templates.
const POD_MERGE_KEYS: MergeKeys = &[
    ("containers", "name"),
    ("initContainers", "name"),
    ("ephemeralContainers", "name"),
    ("volumes", "name"),
    ("env", "name"),
    ("imagePullSecrets", "name"),
    ("volumeMounts", "mountPath"),
    ("volumeDevices", "devicePath"),
    ("ports", "containerPort"),
    ("hostAliases", "ip"),
    ("readinessGates", "conditionType"),
    ("topologySpreadConstraints", "topologyKey"),
    ("resourceClaims", "name"),
    ("schedulingGates", "name"),
    ("ownerReferences", "uid"),
];

const SERVICE_MERGE_KEYS: MergeKeys = &[("ports", "port"), ("ownerReferences", "uid")];

const SERVICE_ACCOUNT_MERGE_KEYS: MergeKeys = &[
    ("secrets", "name"),
    ("imagePullSecrets", "name"),
    ("ownerReferences", "uid"),
];

const METADATA_MERGE_KEYS: MergeKeys = &[("ownerReferences", "uid")];

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to deserialize object {key}"))]
    DeserializeDynamicObject {
        source: serde_json::Error,
        key: String,
    },

    #[snafu(display("failed to parse object as apiVersion {api_version:?} and kind {kind:?}"))]
    ParseDynamicObject {
        source: kube::core::dynamic::ParseDynamicObjectError,
        api_version: String,
        kind: String,
    },

    #[snafu(display("failed to apply strategic merge patch"))]
    StrategicMerge { source: merge::Error },

    #[snafu(display("patched object is not a map"))]
    PatchedNotAnObject {
        source: crate::object::NotAnObjectError,
    },
}

type Decode = fn(&Object) -> Result<(), Error>;

struct Registration {
    decode: Decode,
    merge_keys: MergeKeys,
}

/// Maps `(apiVersion, kind)` to a typed decoder and the merge keys of the type.
pub struct Scheme {
    registrations: HashMap<(String, String), Registration>,
}

impl Default for Scheme {
    /// A scheme holding the common workload, configuration and RBAC types.
    fn default() -> Self {
        let mut scheme = Self::empty();
        scheme
            .register::<Pod>(POD_MERGE_KEYS)
            .register::<Deployment>(POD_MERGE_KEYS)
            .register::<StatefulSet>(POD_MERGE_KEYS)
            .register::<DaemonSet>(POD_MERGE_KEYS)
            .register::<ReplicaSet>(POD_MERGE_KEYS)
            .register::<Job>(POD_MERGE_KEYS)
            .register::<CronJob>(POD_MERGE_KEYS)
            .register::<Service>(SERVICE_MERGE_KEYS)
            .register::<ServiceAccount>(SERVICE_ACCOUNT_MERGE_KEYS)
            .register::<ConfigMap>(METADATA_MERGE_KEYS)
            .register::<Secret>(METADATA_MERGE_KEYS)
            .register::<Namespace>(METADATA_MERGE_KEYS)
            .register::<PersistentVolumeClaim>(METADATA_MERGE_KEYS)
            .register::<PodDisruptionBudget>(METADATA_MERGE_KEYS)
            .register::<Role>(METADATA_MERGE_KEYS)
            .register::<RoleBinding>(METADATA_MERGE_KEYS)
            .register::<ClusterRole>(METADATA_MERGE_KEYS)
            .register::<ClusterRoleBinding>(METADATA_MERGE_KEYS);
        scheme
    }
}

impl fmt::Debug for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.registrations.keys().collect();
        types.sort();
        f.debug_struct("Scheme").field("types", &types).finish()
    }
}

impl Scheme {
    /// A scheme without any registered type, every object is JSON merge patched.
    pub fn empty() -> Self {
        Self {
            registrations: HashMap::new(),
        }
    }

    pub fn register<K>(&mut self, merge_keys: MergeKeys) -> &mut Self
    where
        K: k8s_openapi::Resource + kube::Resource<DynamicType = ()> + DeserializeOwned,
    {
        self.registrations.insert(
            (K::API_VERSION.to_owned(), K::KIND.to_owned()),
            Registration {
                decode: decode_as::<K>,
                merge_keys,
            },
        );
        self
    }

    pub fn is_registered(&self, api_version: &str, kind: &str) -> bool {
        self.registrations
            .contains_key(&(api_version.to_owned(), kind.to_owned()))
    }

    /// Applies `patch` to `target` and returns the patched copy.
    pub fn merge(&self, target: &Object, patch: &Object) -> Result<Object, Error> {
        let type_key = (
            target.api_version().unwrap_or_default().to_owned(),
            target.kind().unwrap_or_default().to_owned(),
        );

        let Some(registration) = self.registrations.get(&type_key) else {
            trace!(object = %target.key(), "type is not registered, applying JSON merge patch");
            let mut merged = target.clone().into_value();
            json_patch::merge(&mut merged, &patch.clone().into_value());
            return Object::try_from(merged).context(PatchedNotAnObjectSnafu);
        };

        trace!(object = %target.key(), "applying strategic merge patch");
        (registration.decode)(target)?;
        let merged =
            merge::strategic_merge(target.as_map(), patch.as_map(), registration.merge_keys)
                .context(StrategicMergeSnafu)?;
        let merged = Object::new(merged);
        (registration.decode)(&merged)?;

        Ok(merged)
    }
}

fn decode_as<K>(object: &Object) -> Result<(), Error>
where
    K: kube::Resource<DynamicType = ()> + DeserializeOwned,
{
    let dynamic: DynamicObject = serde_json::from_value(object.clone().into_value())
        .with_context(|_| DeserializeDynamicObjectSnafu {
            key: object.key().to_string(),
        })?;
    dynamic
        .try_parse::<K>()
        .with_context(|_| ParseDynamicObjectSnafu {
            api_version: K::api_version(&()),
            kind: K::kind(&()),
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    fn object(yaml: &str) -> Object {
        crate::yaml::parse_object(yaml)
            .expect("test object is valid YAML")
            .expect("test object is not empty")
    }

    #[rstest]
    #[case("v1", "Pod", true)]
    #[case("apps/v1", "StatefulSet", true)]
    #[case("apps/v1beta1", "StatefulSet", false)]
    #[case("example.com/v1", "Widget", false)]
    fn registered_types(#[case] api_version: &str, #[case] kind: &str, #[case] expected: bool) {
        assert_eq!(DEFAULT_SCHEME.is_registered(api_version, kind), expected);
    }

    #[test]
    fn registered_types_use_merge_keys() {
        let target = object(indoc! {"
            apiVersion: apps/v1
            kind: StatefulSet
            metadata:
              name: trino
            spec:
              template:
                spec:
                  containers:
                    - name: trino
                      image: trino-image
                      ports:
                        - containerPort: 8443
                          name: https
                    - name: sidecar
                      image: sidecar-image
        "});
        let patch = object(indoc! {"
            spec:
              replicas: 3
              template:
                spec:
                  containers:
                    - name: trino
                      image: custom-image
                      ports:
                        - containerPort: 9090
                          name: metrics
                    - name: sidecar
                      $patch: delete
        "});

        let merged = DEFAULT_SCHEME.merge(&target, &patch).expect("patch applies");
        let merged = merged.into_value();

        assert_eq!(merged["spec"]["replicas"], json!(3));
        assert_eq!(
            merged["spec"]["template"]["spec"]["containers"],
            json!([{
                "name": "trino",
                "image": "custom-image",
                "ports": [
                    {"containerPort": 8443, "name": "https"},
                    {"containerPort": 9090, "name": "metrics"},
                ],
            }])
        );
    }

    #[test]
    fn unregistered_types_use_json_merge_patch() {
        let target = object(indoc! {"
            apiVersion: example.com/v1
            kind: Widget
            spec:
              items: [a, b]
              keep: true
              drop: true
        "});
        let patch = object(indoc! {"
            spec:
              items: [c]
              drop: null
        "});

        let merged = DEFAULT_SCHEME.merge(&target, &patch).expect("patch applies");
        assert_eq!(
            merged.into_value()["spec"],
            json!({"items": ["c"], "keep": true})
        );
    }

    #[test]
    fn empty_scheme_never_uses_strategic_merge() {
        let target = object("apiVersion: v1\nkind: Pod\nspec:\n  containers: [{name: a}]\n");
        let patch = object("spec:\n  containers: [{name: b}]\n");

        let merged = Scheme::empty().merge(&target, &patch).expect("patch applies");
        assert_eq!(
            merged.into_value()["spec"]["containers"],
            json!([{"name": "b"}])
        );
    }

    #[test]
    fn undecodable_registered_objects_are_rejected() {
        let target = object("apiVersion: v1\nkind: Pod\nspec:\n  containers: not-a-list\n");
        let patch = object("metadata:\n  namespace: foo\n");

        let error = DEFAULT_SCHEME
            .merge(&target, &patch)
            .expect_err("target does not decode as a Pod");
        assert!(matches!(error, Error::ParseDynamicObject { .. }), "{error}");
    }
}
