use snafu::{ResultExt, Snafu};
use tracing::{debug, instrument};

use super::{Applier, Options, PatchTemplateSnafu, template_name};
use crate::{
    apis::{self, BundleDocument, Component, Kind, PatchTemplate},
    filter::Criteria,
    object::Object,
    patch::{self, DEFAULT_SCHEME, Scheme},
    schema,
    template::MissingKey,
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to decode patch template {name:?}"))]
    DecodeTemplate { source: apis::Error, name: String },

    #[snafu(display("invalid options for patch template {name:?}"))]
    InvalidOptions { source: schema::Error, name: String },

    #[snafu(display("failed to render patch template {name:?}"))]
    RenderPatch { source: patch::Error, name: String },

    #[snafu(display("failed to apply patch template {name:?}"))]
    ApplyPatch { source: patch::Error, name: String },
}

/// Renders `PatchTemplate`s and merges them into the other objects of a component.
///
/// Patch templates are applied one after the other in document order. A template only patches
/// objects selected by both the applier's selector and its own, and only those whose identifying
/// fields match the rendered patch. The templates themselves are dropped from the output unless
/// [retained](Self::with_retain_templates).
#[derive(Clone, Debug)]
pub struct PatchTemplateApplier {
    scheme: &'static Scheme,
    selector: Option<Criteria>,
    retain_templates: bool,
    missing_key: MissingKey,
}

impl Default for PatchTemplateApplier {
    fn default() -> Self {
        Self {
            scheme: &DEFAULT_SCHEME,
            selector: None,
            retain_templates: false,
            missing_key: MissingKey::Error,
        }
    }
}

impl PatchTemplateApplier {
    /// Restricts all patch templates to the objects selected by `selector`.
    pub fn with_selector(mut self, selector: Criteria) -> Self {
        self.selector = Some(selector);
        self
    }

    /// Keeps the applied patch templates in the output.
    pub fn with_retain_templates(mut self, retain_templates: bool) -> Self {
        self.retain_templates = retain_templates;
        self
    }

    pub fn with_scheme(mut self, scheme: &'static Scheme) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn with_missing_key(mut self, missing_key: MissingKey) -> Self {
        self.missing_key = missing_key;
        self
    }

    fn apply_template(
        &self,
        index: usize,
        object: &Object,
        options: &Options,
        targets: &mut [Object],
    ) -> Result<(), Error> {
        let name = template_name(object, index);
        let patch_template =
            PatchTemplate::from_object(object).context(DecodeTemplateSnafu { name: &name })?;
        let options = schema::apply_defaults(options, patch_template.options_schema.as_ref())
            .context(InvalidOptionsSnafu { name: &name })?;

        let patch = patch::render(&name, &patch_template.template, &options, self.missing_key)
            .context(RenderPatchSnafu { name: &name })?;

        let selectors: Vec<&Criteria> = self
            .selector
            .iter()
            .chain(patch_template.selector.iter())
            .collect();
        let patched = patch::apply_to_matching(self.scheme, &name, &patch, targets, &selectors)
            .context(ApplyPatchSnafu { name: &name })?;

        debug!(template = %name, patched, "applied patch template");
        Ok(())
    }
}

impl Applier for PatchTemplateApplier {
    fn name(&self) -> &str {
        "patch-template"
    }

    fn claims(&self, object: &Object) -> bool {
        Kind::PatchTemplate.matches(object)
    }

    #[instrument(skip_all, fields(component = %component.name()))]
    fn apply_options(&self, component: &Component, options: &Options) -> super::Result<Component> {
        let objects = &component.spec.objects;
        let mut targets: Vec<Object> = objects
            .iter()
            .filter(|object| !self.claims(object))
            .cloned()
            .collect();

        for (index, object) in objects.iter().enumerate() {
            if self.claims(object) {
                self.apply_template(index, object, options, &mut targets)
                    .context(PatchTemplateSnafu {
                        component: component.name(),
                    })?;
            }
        }

        if !self.retain_templates {
            return Ok(component.with_objects(targets));
        }

        let mut patched = targets.into_iter();
        let objects = objects
            .iter()
            .filter_map(|object| {
                if self.claims(object) {
                    Some(object.clone())
                } else {
                    patched.next()
                }
            })
            .collect();
        Ok(component.with_objects(objects))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;
    use crate::apis::API_VERSION;

    const NAMESPACE_PATCH: &str = "kind: Pod\nmetadata:\n  namespace: {{.Name}}";

    fn pod(name: &str, namespace: &str) -> Object {
        Object::try_from(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": name, "namespace": namespace},
        }))
        .expect("test object is a map")
    }

    fn patch_template(name: &str, template: &str, selector: Option<Value>) -> Object {
        let mut value = json!({
            "apiVersion": API_VERSION,
            "kind": "PatchTemplate",
            "metadata": {"name": name},
            "template": template,
        });
        if let Some(selector) = selector {
            value["selector"] = selector;
        }
        Object::try_from(value).expect("test object is a map")
    }

    fn options(value: Value) -> Options {
        match value {
            Value::Object(map) => map,
            _ => panic!("options must be a map"),
        }
    }

    #[test]
    fn patch_overrides_namespace() {
        let component = Component::new(
            "web",
            "1.0.0",
            vec![pod("web", "derp"), patch_template("ns", NAMESPACE_PATCH, None)],
        );

        let applied = PatchTemplateApplier::default()
            .apply_options(&component, &options(json!({"Name": "zed"})))
            .expect("patch applies");

        assert_eq!(applied.spec.objects.len(), 1);
        assert_eq!(applied.spec.objects[0].namespace(), Some("zed"));
        assert_eq!(component.spec.objects[0].namespace(), Some("derp"));
    }

    #[test]
    fn unversioned_templates_are_applied() {
        let mut template = patch_template("ns", NAMESPACE_PATCH, None);
        template.as_map_mut().remove("apiVersion");
        let component = Component::new("web", "1.0.0", vec![pod("web", "derp"), template]);

        let applied = PatchTemplateApplier::default()
            .apply_options(&component, &options(json!({"Name": "zed"})))
            .expect("patch applies");

        assert_eq!(applied.spec.objects, [pod("web", "zed")]);
    }

    #[test]
    fn delete_directive_removes_list_items() {
        let pod = Object::try_from(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "web"},
            "spec": {
                "containers": [
                    {"name": "web", "image": "nginx"},
                    {"name": "sidecar", "image": "busybox"},
                ],
            },
        }))
        .expect("test object is a map");
        let template = patch_template(
            "drop-sidecar",
            "kind: Pod\nspec:\n  containers:\n    - name: {{.Sidecar}}\n      $patch: delete",
            None,
        );
        let component = Component::new("web", "1.0.0", vec![pod, template]);

        let applied = PatchTemplateApplier::default()
            .apply_options(&component, &options(json!({"Sidecar": "sidecar"})))
            .expect("patch applies");

        assert_eq!(applied.spec.objects.len(), 1);
        assert_eq!(
            applied.spec.objects[0].clone().into_value()["spec"]["containers"],
            json!([{"name": "web", "image": "nginx"}])
        );
    }

    #[test]
    fn missing_option_is_named() {
        let component = Component::new(
            "web",
            "1.0.0",
            vec![pod("web", "derp"), patch_template("ns", NAMESPACE_PATCH, None)],
        );

        let error = PatchTemplateApplier::default()
            .apply_options(&component, &Options::new())
            .expect_err("Name is missing");
        let report = snafu::Report::from_error(&error).to_string();
        assert!(report.contains("Name"), "{report}");
        assert!(report.contains(r#""ns""#), "{report}");
    }

    #[test]
    fn template_selector_restricts_targets() {
        let component = Component::new(
            "web",
            "1.0.0",
            vec![
                pod("foof", "a"),
                pod("other", "b"),
                patch_template("ns", NAMESPACE_PATCH, Some(json!({"names": ["foof"]}))),
            ],
        );

        let applied = PatchTemplateApplier::default()
            .apply_options(&component, &options(json!({"Name": "zed"})))
            .expect("patch applies");
        assert_eq!(applied.spec.objects[0].namespace(), Some("zed"));
        assert_eq!(applied.spec.objects[1].namespace(), Some("b"));
    }

    #[test]
    fn applier_selector_restricts_targets() {
        let component = Component::new(
            "web",
            "1.0.0",
            vec![
                pod("foof", "a"),
                pod("other", "b"),
                patch_template("ns", NAMESPACE_PATCH, None),
            ],
        );

        let applied = PatchTemplateApplier::default()
            .with_selector(Criteria::with_names(["other"]))
            .apply_options(&component, &options(json!({"Name": "zed"})))
            .expect("patch applies");
        assert_eq!(applied.spec.objects[0].namespace(), Some("a"));
        assert_eq!(applied.spec.objects[1].namespace(), Some("zed"));
    }

    #[test]
    fn later_patches_see_earlier_results() {
        let component = Component::new(
            "web",
            "1.0.0",
            vec![
                pod("web", "derp"),
                patch_template("first", "kind: Pod\nmetadata:\n  labels:\n    stage: first", None),
                patch_template(
                    "second",
                    "kind: Pod\nmetadata:\n  labels:\n    stage: second\n    seen: {{.Seen}}",
                    None,
                ),
            ],
        );

        let applied = PatchTemplateApplier::default()
            .apply_options(&component, &options(json!({"Seen": "yes"})))
            .expect("patches apply");
        assert_eq!(
            applied.spec.objects[0].clone().into_value()["metadata"]["labels"],
            json!({"stage": "second", "seen": "yes"})
        );
    }

    #[test]
    fn schema_defaults_fill_missing_options() {
        let mut template = patch_template("ns", NAMESPACE_PATCH, None);
        template.as_map_mut().insert(
            "optionsSchema".into(),
            json!({"type": "object", "properties": {"Name": {"type": "string", "default": "fallback"}}}),
        );
        let component = Component::new("web", "1.0.0", vec![pod("web", "derp"), template]);

        let applied = PatchTemplateApplier::default()
            .apply_options(&component, &Options::new())
            .expect("default fills the option");
        assert_eq!(applied.spec.objects[0].namespace(), Some("fallback"));
    }

    #[test]
    fn retained_templates_keep_their_position() {
        let component = Component::new(
            "web",
            "1.0.0",
            vec![
                pod("a", "x"),
                patch_template("ns", NAMESPACE_PATCH, None),
                pod("b", "y"),
            ],
        );

        let applied = PatchTemplateApplier::default()
            .with_retain_templates(true)
            .apply_options(&component, &options(json!({"Name": "zed"})))
            .expect("patch applies");

        let kinds: Vec<_> = applied.spec.objects.iter().filter_map(Object::kind).collect();
        assert_eq!(kinds, ["Pod", "PatchTemplate", "Pod"]);
        assert_eq!(applied.spec.objects[0].namespace(), Some("zed"));
        assert_eq!(applied.spec.objects[2].namespace(), Some("zed"));
    }

    #[test]
    fn unregistered_types_are_json_merge_patched() {
        let widget = Object::try_from(json!({
            "apiVersion": "example.com/v1",
            "kind": "Widget",
            "metadata": {"name": "w"},
            "spec": {"size": 1, "color": "red"},
        }))
        .expect("test object is a map");
        let component = Component::new(
            "web",
            "1.0.0",
            vec![
                widget,
                patch_template("size", "kind: Widget\nspec:\n  size: {{.Size}}\n  color: null", None),
            ],
        );

        let applied = PatchTemplateApplier::default()
            .apply_options(&component, &options(json!({"Size": 3})))
            .expect("patch applies");
        assert_eq!(
            applied.spec.objects[0].clone().into_value()["spec"],
            json!({"size": 3})
        );
    }
}
