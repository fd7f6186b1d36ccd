//! Turns builder documents into self-contained documents.
//!
//! A `BundleBuilder` references component files, a `ComponentBuilder` references object files,
//! raw text files and, through `ObjectTemplateBuilder`s, template files. File references are
//! resolved relative to the document they appear in. The inliner reads every referenced file
//! and embeds its contents, so the result carries no file references anymore.
use std::collections::BTreeMap;

use k8s_openapi::{
    ByteString, api::core::v1::ConfigMap, apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
use snafu::{OptionExt, ResultExt, Snafu, ensure};
use tracing::{debug, info, instrument};
use url::Url;

use crate::{
    apis::{
        self, API_VERSION, Bundle, BundleBuilder, BundleDocument, Component, ComponentBuilder,
        Document, FileGroup, INLINE_PATH_ANNOTATION, Kind, ObjectTemplate,
        ObjectTemplateBuilder,
    },
    object::{NotAnObjectError, Object},
    validation, yaml,
};

mod path;
mod reader;

pub use reader::{FileReader, LocalFileReader, MemoryFileReader};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to resolve file reference {reference:?}"))]
    ResolveReference {
        source: path::Error,
        reference: String,
    },

    #[snafu(display("failed to read {url}"))]
    ReadFile { source: reader::Error, url: Url },

    #[snafu(display("{url} is not valid UTF-8"))]
    InvalidUtf8 {
        source: std::string::FromUtf8Error,
        url: Url,
    },

    #[snafu(display("failed to parse {url}"))]
    ParseFile { source: yaml::Error, url: Url },

    #[snafu(display("{url} holds no document"))]
    EmptyFile { url: Url },

    #[snafu(display("failed to decode document in {url}"))]
    DecodeDocument { source: apis::Error, url: Url },

    #[snafu(display("unsupported kind {kind:?} in {url}, expected {expected}"))]
    UnsupportedKind {
        kind: String,
        url: Url,
        expected: &'static str,
    },

    #[snafu(display("failed to encode inlined object template from {url}"))]
    EncodeObjectTemplate { source: apis::Error, url: Url },

    #[snafu(display("raw file {url} has no file name"))]
    MissingFileName { url: Url },

    #[snafu(display("raw file {key:?} occurs more than once in group {group:?}"))]
    DuplicateRawFile { key: String, group: String },

    #[snafu(display("raw file group {group:?} mixes text and binary files"))]
    MixedRawFileGroup { group: String },

    #[snafu(display("invalid raw file group name {group:?}"))]
    InvalidGroupName {
        source: validation::Errors,
        group: String,
    },

    #[snafu(display("failed to encode ConfigMap {group:?}"))]
    EncodeConfigMap {
        source: serde_json::Error,
        group: String,
    },

    #[snafu(display("encoded ConfigMap {group:?} is not a map"))]
    ConfigMapNotAnObject {
        source: NotAnObjectError,
        group: String,
    },

    #[snafu(display("invalid name {name:?} for component in {url}"))]
    InvalidComponentName {
        source: validation::Errors,
        name: String,
        url: Url,
    },

    #[snafu(display("invalid bundle in {url}"))]
    InvalidBundle { source: apis::Error, url: Url },
}

/// Reads builder documents and inlines all files they reference.
#[derive(Clone, Debug, Default)]
pub struct Inliner<R = LocalFileReader> {
    reader: R,
}

impl<R: FileReader> Inliner<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Inlines the document at `reference`, whatever its kind.
    ///
    /// Builders are turned into the documents they describe, all other top-level documents are
    /// returned as they are.
    #[instrument(skip(self))]
    pub async fn inline_document(&self, reference: &str) -> Result<Document> {
        let url = absolutize(reference)?;
        let object = self.read_object(&url).await?;
        let document =
            Document::from_object(&object).context(DecodeDocumentSnafu { url: url.clone() })?;

        Ok(match document {
            Document::BundleBuilder(builder) => {
                Document::Bundle(self.inline_bundle(&url, &builder).await?)
            }
            Document::ComponentBuilder(builder) => {
                Document::Component(self.inline_component(&url, &builder).await?)
            }
            document => document,
        })
    }

    /// Reads the `BundleBuilder` at `reference` and inlines all its components.
    #[instrument(skip(self))]
    pub async fn bundle_files(&self, reference: &str) -> Result<Bundle> {
        let url = absolutize(reference)?;
        let builder = self.read_document::<BundleBuilder>(&url).await?;
        self.inline_bundle(&url, &builder).await
    }

    /// Reads the `ComponentBuilder` at `reference` and inlines all its files.
    #[instrument(skip(self))]
    pub async fn component_files(&self, reference: &str) -> Result<Component> {
        let url = absolutize(reference)?;
        let builder = self.read_document::<ComponentBuilder>(&url).await?;
        self.inline_component(&url, &builder).await
    }

    async fn inline_bundle(&self, url: &Url, builder: &BundleBuilder) -> Result<Bundle> {
        let mut components = Vec::with_capacity(builder.component_files.len());

        for file in &builder.component_files {
            let component_url = resolve(url, &file.url)?;
            let object = self.read_object(&component_url).await?;

            let component = match Kind::of(&object) {
                Some(Kind::Component) => Component::from_object(&object)
                    .context(DecodeDocumentSnafu { url: component_url })?,
                Some(Kind::ComponentBuilder) => {
                    let builder = ComponentBuilder::from_object(&object).context(
                        DecodeDocumentSnafu {
                            url: component_url.clone(),
                        },
                    )?;
                    self.inline_component(&component_url, &builder).await?
                }
                _ => {
                    return UnsupportedKindSnafu {
                        kind: object.kind().unwrap_or_default(),
                        url: component_url,
                        expected: "Component or ComponentBuilder",
                    }
                    .fail();
                }
            };
            components.push(component);
        }

        let bundle = Bundle {
            metadata: builder.metadata.clone(),
            components,
            ..Bundle::new(&builder.set_name, &builder.version)
        };
        bundle
            .component_set()
            .context(InvalidBundleSnafu { url: url.clone() })?;

        info!(bundle = %bundle.set_name, components = bundle.components.len(), "inlined bundle");
        Ok(bundle)
    }

    async fn inline_component(&self, url: &Url, builder: &ComponentBuilder) -> Result<Component> {
        let mut objects = Vec::new();

        for file in &builder.object_files {
            let file_url = resolve(url, &file.url)?;
            let text = self.read_text(&file_url).await?;
            let parsed = yaml::parse_objects(&text).context(ParseFileSnafu {
                url: file_url.clone(),
            })?;

            for object in parsed {
                if Kind::ObjectTemplateBuilder.matches(&object) {
                    objects.push(self.inline_object_template(&file_url, &object).await?);
                } else {
                    objects.push(object);
                }
            }
        }

        objects.extend(self.raw_file_config_maps(url, &builder.raw_text_files).await?);

        let mut component = Component::new(&builder.component_name, &builder.version, objects);
        component.metadata = builder.metadata.clone();
        component.spec.app_version = builder.app_version.clone();

        let name = component.name().into_owned();
        validation::is_rfc_1123_subdomain(&name).context(InvalidComponentNameSnafu {
            name: &name,
            url: url.clone(),
        })?;
        component.metadata.name = Some(name);

        debug!(
            component = ?component.metadata.name,
            objects = component.spec.objects.len(),
            "inlined component"
        );
        Ok(component)
    }

    /// Replaces an `ObjectTemplateBuilder` by an `ObjectTemplate` holding the template file.
    async fn inline_object_template(&self, parent: &Url, object: &Object) -> Result<Object> {
        let builder = ObjectTemplateBuilder::from_object(object).context(DecodeDocumentSnafu {
            url: parent.clone(),
        })?;
        let template_url = resolve(parent, &builder.file.url)?;
        let template = self.read_text(&template_url).await?;

        let mut metadata = builder.metadata;
        metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(INLINE_PATH_ANNOTATION.to_owned(), template_url.to_string());

        ObjectTemplate {
            api_version: API_VERSION.to_owned(),
            kind: Kind::ObjectTemplate.to_string(),
            metadata,
            template_type: builder.template_type,
            template,
            options_schema: builder.options_schema,
        }
        .to_object()
        .context(EncodeObjectTemplateSnafu { url: template_url })
    }

    /// Builds one ConfigMap per group name. Groups sharing a name are merged.
    async fn raw_file_config_maps(&self, url: &Url, groups: &[FileGroup]) -> Result<Vec<Object>> {
        // Insertion order of group names, so the output follows the builder.
        let mut order: Vec<&str> = Vec::new();
        let mut config_maps: BTreeMap<&str, ConfigMap> = BTreeMap::new();

        for group in groups {
            let config_map = config_maps.entry(&group.name).or_insert_with(|| {
                order.push(&group.name);
                ConfigMap {
                    metadata: ObjectMeta {
                        name: Some(group.name.clone()),
                        ..ObjectMeta::default()
                    },
                    ..ConfigMap::default()
                }
            });

            for file in &group.files {
                let file_url = resolve(url, &file.url)?;
                let key = path::file_name(&file_url).context(MissingFileNameSnafu {
                    url: file_url.clone(),
                })?;
                let contents = self.read(&file_url).await?;

                let data = config_map.data.get_or_insert_with(BTreeMap::new);
                let binary_data = config_map.binary_data.get_or_insert_with(BTreeMap::new);
                ensure!(
                    !data.contains_key(&key) && !binary_data.contains_key(&key),
                    DuplicateRawFileSnafu {
                        key,
                        group: &group.name
                    }
                );

                if group.as_binary {
                    binary_data.insert(key, ByteString(contents));
                } else {
                    let text =
                        String::from_utf8(contents).context(InvalidUtf8Snafu { url: file_url })?;
                    data.insert(key, text);
                }
            }
        }

        order
            .into_iter()
            .filter_map(|group| config_maps.remove(group))
            .map(config_map_object)
            .collect()
    }

    async fn read(&self, url: &Url) -> Result<Vec<u8>> {
        self.reader
            .read_file(url)
            .await
            .context(ReadFileSnafu { url: url.clone() })
    }

    async fn read_text(&self, url: &Url) -> Result<String> {
        String::from_utf8(self.read(url).await?).context(InvalidUtf8Snafu { url: url.clone() })
    }

    async fn read_object(&self, url: &Url) -> Result<Object> {
        let text = self.read_text(url).await?;
        yaml::parse_object(&text)
            .context(ParseFileSnafu { url: url.clone() })?
            .context(EmptyFileSnafu { url: url.clone() })
    }

    async fn read_document<T: BundleDocument>(&self, url: &Url) -> Result<T> {
        let object = self.read_object(url).await?;
        T::from_object(&object).context(DecodeDocumentSnafu { url: url.clone() })
    }
}

fn resolve(parent: &Url, reference: &str) -> Result<Url> {
    path::resolve(parent, reference).context(ResolveReferenceSnafu { reference })
}

fn absolutize(reference: &str) -> Result<Url> {
    path::absolutize(reference).context(ResolveReferenceSnafu { reference })
}

fn config_map_object(mut config_map: ConfigMap) -> Result<Object> {
    let group = config_map.metadata.name.clone().unwrap_or_default();
    validation::is_rfc_1123_subdomain(&group).context(InvalidGroupNameSnafu { group: &group })?;

    let has_data = config_map.data.as_ref().is_some_and(|data| !data.is_empty());
    let has_binary_data = config_map
        .binary_data
        .as_ref()
        .is_some_and(|data| !data.is_empty());
    ensure!(!(has_data && has_binary_data), MixedRawFileGroupSnafu { group });
    if !has_data {
        config_map.data = None;
    }
    if !has_binary_data {
        config_map.binary_data = None;
    }

    let value =
        serde_json::to_value(&config_map).context(EncodeConfigMapSnafu { group: &group })?;
    Object::try_from(value).context(ConfigMapNotAnObjectSnafu { group })
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use serde_json::json;

    use super::*;

    fn url(path: &str) -> Url {
        Url::from_file_path(format!("/bundles{path}")).expect("test path is absolute")
    }

    fn inliner(files: &[(&str, &str)]) -> Inliner<MemoryFileReader> {
        let reader = files
            .iter()
            .fold(MemoryFileReader::default(), |reader, (path, contents)| {
                reader.with_file(url(path), *contents)
            });
        Inliner::new(reader)
    }

    const COMPONENT_BUILDER: &str = indoc! {"
        apiVersion: bundle.stackable.tech/v1alpha1
        kind: ComponentBuilder
        componentName: kafka
        version: 1.2.3
        objectFiles:
          - url: objects/workload.yaml
        rawTextFiles:
          - name: kafka-config
            files:
              - url: config/server.properties
    "};

    const WORKLOAD: &str = indoc! {"
        apiVersion: v1
        kind: ServiceAccount
        metadata:
          name: kafka
        ---
        apiVersion: bundle.stackable.tech/v1alpha1
        kind: ObjectTemplateBuilder
        metadata:
          name: broker
        file:
          url: ../templates/broker.yaml
        ---
        apiVersion: v1
        kind: Service
        metadata:
          name: kafka
    "};

    fn component_inliner() -> Inliner<MemoryFileReader> {
        inliner(&[
            ("/kafka/component.yaml", COMPONENT_BUILDER),
            ("/kafka/objects/workload.yaml", WORKLOAD),
            ("/kafka/templates/broker.yaml", "kind: Pod\nmetadata:\n  name: {{ .Name }}\n"),
            ("/kafka/config/server.properties", "broker.id=1\n"),
        ])
    }

    #[tokio::test]
    async fn component_files_are_inlined() {
        let component = component_inliner()
            .component_files("/bundles/kafka/component.yaml")
            .await
            .expect("component inlines");

        assert_eq!(component.metadata.name.as_deref(), Some("kafka-1.2.3"));
        let kinds: Vec<_> = component.spec.objects.iter().filter_map(Object::kind).collect();
        assert_eq!(kinds, ["ServiceAccount", "ObjectTemplate", "Service", "ConfigMap"]);

        let template = ObjectTemplate::from_object(&component.spec.objects[1])
            .expect("template decodes");
        assert_eq!(template.template, "kind: Pod\nmetadata:\n  name: {{ .Name }}\n");
        assert_eq!(
            component.spec.objects[1].annotation(INLINE_PATH_ANNOTATION),
            Some("file:///bundles/kafka/templates/broker.yaml")
        );

        assert_eq!(
            component.spec.objects[3].clone().into_value(),
            json!({
                "apiVersion": "v1",
                "kind": "ConfigMap",
                "metadata": {"name": "kafka-config"},
                "data": {"server.properties": "broker.id=1\n"},
            })
        );
    }

    #[tokio::test]
    async fn unversioned_builders_and_special_file_names() {
        let inliner = inliner(&[
            (
                "/component.yaml",
                indoc! {"
                    kind: ComponentBuilder
                    componentName: app
                    version: 1.0.0
                    objectFiles:
                      - url: objects.yaml
                    rawTextFiles:
                      - name: app-config
                        files:
                          - url: configs/a#1.properties
                "},
            ),
            (
                "/objects.yaml",
                indoc! {"
                    kind: ObjectTemplateBuilder
                    metadata:
                      name: pod
                    file:
                      url: templates/pod.yaml
                "},
            ),
            ("/templates/pod.yaml", "kind: Pod\n"),
            ("/configs/a#1.properties", "a=1\n"),
        ]);

        let component = inliner
            .component_files("/bundles/component.yaml")
            .await
            .expect("component inlines");

        let kinds: Vec<_> = component.spec.objects.iter().filter_map(Object::kind).collect();
        assert_eq!(kinds, ["ObjectTemplate", "ConfigMap"]);
        let template = ObjectTemplate::from_object(&component.spec.objects[0])
            .expect("template decodes");
        assert_eq!(template.template, "kind: Pod\n");
        assert_eq!(
            component.spec.objects[1].get("data"),
            Some(&json!({"a#1.properties": "a=1\n"}))
        );
    }

    #[tokio::test]
    async fn bundles_resolve_components_relative_to_the_bundle() {
        let inliner = inliner(&[
            (
                "/bundle.yaml",
                indoc! {"
                    apiVersion: bundle.stackable.tech/v1alpha1
                    kind: BundleBuilder
                    setName: data-platform
                    version: 24.3.0
                    componentFiles:
                      - url: kafka/component.yaml
                      - url: file:///bundles/zookeeper.yaml
                "},
            ),
            ("/kafka/component.yaml", COMPONENT_BUILDER),
            ("/kafka/objects/workload.yaml", WORKLOAD),
            ("/kafka/templates/broker.yaml", "kind: Pod\n"),
            ("/kafka/config/server.properties", "broker.id=1\n"),
            (
                "/zookeeper.yaml",
                indoc! {"
                    apiVersion: bundle.stackable.tech/v1alpha1
                    kind: Component
                    spec:
                      componentName: zookeeper
                      version: 3.9.1
                      objects: []
                "},
            ),
        ]);

        let document = inliner
            .inline_document("/bundles/bundle.yaml")
            .await
            .expect("bundle inlines");
        let Document::Bundle(bundle) = document else {
            panic!("expected a bundle");
        };
        let names: Vec<_> = bundle
            .components
            .iter()
            .map(|component| component.spec.component_name.as_str())
            .collect();
        assert_eq!(names, ["kafka", "zookeeper"]);
    }

    #[tokio::test]
    async fn unsupported_component_kinds_fail() {
        let inliner = inliner(&[
            (
                "/bundle.yaml",
                indoc! {"
                    kind: BundleBuilder
                    setName: data-platform
                    version: 24.3.0
                    componentFiles:
                      - url: pod.yaml
                "},
            ),
            ("/pod.yaml", "apiVersion: v1\nkind: Pod\n"),
        ]);

        let error = inliner
            .bundle_files("/bundles/bundle.yaml")
            .await
            .expect_err("pods are not components");
        assert!(
            error.to_string().contains(r#"unsupported kind "Pod""#),
            "{error}"
        );
    }

    #[tokio::test]
    async fn invalid_component_names_fail() {
        let inliner = inliner(&[(
            "/component.yaml",
            "kind: ComponentBuilder\ncomponentName: Kafka_Broker\nversion: 1.0.0\n",
        )]);

        let error = inliner
            .component_files("/bundles/component.yaml")
            .await
            .expect_err("name is not a subdomain");
        assert!(matches!(error, Error::InvalidComponentName { .. }), "{error}");
    }

    #[tokio::test]
    async fn binary_groups_are_base64_encoded() {
        let inliner = inliner(&[
            (
                "/component.yaml",
                indoc! {"
                    kind: ComponentBuilder
                    componentName: certs
                    version: 1.0.0
                    rawTextFiles:
                      - name: certs
                        asBinary: true
                        files:
                          - url: ca.crt
                "},
            ),
            ("/ca.crt", "hello"),
        ]);

        let component = inliner
            .component_files("/bundles/component.yaml")
            .await
            .expect("component inlines");
        assert_eq!(
            component.spec.objects[0].get("binaryData"),
            Some(&json!({"ca.crt": "aGVsbG8="}))
        );
        assert_eq!(component.spec.objects[0].get("data"), None);
    }

    #[tokio::test]
    async fn groups_mixing_text_and_binary_fail() {
        let inliner = inliner(&[
            (
                "/component.yaml",
                indoc! {"
                    kind: ComponentBuilder
                    componentName: mixed
                    version: 1.0.0
                    rawTextFiles:
                      - name: config
                        files:
                          - url: a.txt
                      - name: config
                        asBinary: true
                        files:
                          - url: b.bin
                "},
            ),
            ("/a.txt", "a"),
            ("/b.bin", "b"),
        ]);

        let error = inliner
            .component_files("/bundles/component.yaml")
            .await
            .expect_err("group mixes data and binaryData");
        assert!(matches!(error, Error::MixedRawFileGroup { .. }), "{error}");
    }

    #[tokio::test]
    async fn missing_files_name_the_url() {
        let inliner = inliner(&[(
            "/component.yaml",
            "kind: ComponentBuilder\ncomponentName: a\nversion: 1.0.0\nobjectFiles:\n  - url: gone.yaml\n",
        )]);

        let error = inliner
            .component_files("/bundles/component.yaml")
            .await
            .expect_err("file is missing");
        assert!(
            error.to_string().contains("file:///bundles/gone.yaml"),
            "{error}"
        );
    }
}
