use std::{io, path::PathBuf};

use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use snafu::{ResultExt, Snafu};
use stackable_bundle::{
    Applier, MultiApplier, Object, Options,
    apis::{self, BundleDocument, Document, Kind},
    build,
    filter::{self, Criteria},
    inline::{self, Inliner, LocalFileReader},
    object::NotAnObjectError,
    options::{self, GoTemplateApplier, JsonnetApplier, PatchTemplateApplier},
    template::MissingKey,
    validation,
    yaml::{self, SerializeOptions},
};
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, filter::LevelFilter};

use crate::signal::CancelWatcher;

mod signal;

const LOG_ENV_VAR: &str = "BUNDLECTL_LOG";

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to start the async runtime"))]
    StartRuntime { source: io::Error },

    #[snafu(display("failed to inline {file:?}"))]
    Inline { source: inline::Error, file: String },

    #[snafu(display("cancelled"))]
    Cancelled,

    #[snafu(display("failed to read option file {path}", path = path.display()))]
    ReadOptions { source: io::Error, path: PathBuf },

    #[snafu(display("failed to parse option file {path}", path = path.display()))]
    ParseOptions { source: yaml::Error, path: PathBuf },

    #[snafu(display("merged options are not a map"))]
    OptionsNotAMap { source: NotAnObjectError },

    #[snafu(display("{kind} documents cannot be {action}"))]
    UnsupportedDocument { kind: Kind, action: &'static str },

    #[snafu(display("failed to build patch templates"))]
    Build { source: build::Error },

    #[snafu(display("failed to apply options"))]
    Apply { source: options::Error },

    #[snafu(display("validation failed"))]
    Validate {
        source: validation::ComponentErrors,
    },

    #[snafu(display("failed to encode output document"))]
    EncodeDocument { source: apis::Error },

    #[snafu(display("failed to write output"))]
    WriteOutput { source: yaml::Error },
}

/// Inline, build, apply, filter and validate Kubernetes manifest bundles.
///
/// Input documents may be builders, which are inlined before any other processing. Output is
/// written to stdout as YAML.
#[derive(Debug, Parser)]
#[command(name = "bundlectl", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Embed all files referenced by a bundle or component builder.
    Inline(InputArgs),

    /// Compile the patch template builders of a bundle or component.
    Build(BuildArgs),

    /// Render templates and apply patch templates with the given options.
    Apply(ApplyArgs),

    /// Print the objects (or components) matching the given criteria.
    Filter(FilterArgs),

    /// Check names, versions and objects of a bundle or component.
    Validate(InputArgs),
}

#[derive(Debug, Args)]
struct InputArgs {
    /// Path or file:// URL of the input document.
    file: String,
}

#[derive(Debug, Args)]
struct OptionsArgs {
    /// YAML or JSON option files. Later files are merged over earlier ones.
    #[arg(short = 'o', long = "options", value_name = "FILE")]
    files: Vec<PathBuf>,
}

#[derive(Debug, Args)]
struct BuildArgs {
    #[command(flatten)]
    input: InputArgs,

    #[command(flatten)]
    options: OptionsArgs,
}

#[derive(Debug, Args)]
struct ApplyArgs {
    #[command(flatten)]
    input: InputArgs,

    #[command(flatten)]
    options: OptionsArgs,

    /// Keep the applied patch templates in the output.
    #[arg(long)]
    retain_templates: bool,

    /// Render references to missing options as empty values instead of failing.
    #[arg(long, env = "BUNDLECTL_LENIENT")]
    lenient: bool,

    /// Directories jsonnet templates may import from. Imports are disabled without one.
    #[arg(long = "jsonnet-library", value_name = "DIR")]
    jsonnet_libraries: Vec<PathBuf>,
}

impl ApplyArgs {
    fn applier(&self) -> MultiApplier {
        let missing_key = if self.lenient {
            MissingKey::Zero
        } else {
            MissingKey::Error
        };

        let mut jsonnet = JsonnetApplier::default();
        if !self.jsonnet_libraries.is_empty() {
            jsonnet = jsonnet.with_library_paths(self.jsonnet_libraries.clone());
        }

        MultiApplier::with_appliers(vec![
            Box::new(GoTemplateApplier::default().with_missing_key(missing_key)),
            Box::new(jsonnet),
            Box::new(
                PatchTemplateApplier::default()
                    .with_missing_key(missing_key)
                    .with_retain_templates(self.retain_templates),
            ),
        ])
    }
}

#[derive(Debug, Args)]
struct FilterArgs {
    #[command(flatten)]
    input: InputArgs,

    /// Kinds to match, either bare (`Pod`) or qualified by the apiVersion (`v1,Pod`).
    #[arg(long = "kind")]
    kinds: Vec<String>,

    #[arg(long = "name")]
    names: Vec<String>,

    #[arg(long = "namespace")]
    namespaces: Vec<String>,

    #[arg(long = "label", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    labels: Vec<(String, String)>,

    #[arg(long = "annotation", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    annotations: Vec<(String, String)>,

    /// Print everything that does not match instead.
    #[arg(long)]
    invert: bool,

    /// Match the components of a bundle instead of their objects.
    #[arg(long)]
    components: bool,
}

impl FilterArgs {
    fn criteria(&self) -> Criteria {
        Criteria {
            kinds: self.kinds.clone(),
            names: self.names.clone(),
            namespaces: self.namespaces.clone(),
            labels: self.labels.iter().cloned().collect(),
            annotations: self.annotations.iter().cloned().collect(),
            invert_match: self.invert,
        }
    }
}

fn parse_key_value(input: &str) -> Result<(String, String), String> {
    input
        .split_once('=')
        .map(|(key, value)| (key.to_owned(), value.to_owned()))
        .ok_or_else(|| format!("expected KEY=VALUE, got {input:?}"))
}

#[snafu::report]
fn main() -> Result<(), Error> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_env_var(LOG_ENV_VAR)
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_writer(io::stderr)
        .init();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context(StartRuntimeSnafu)?
        .block_on(run(cli))
}

async fn run(cli: Cli) -> Result<(), Error> {
    let cancel = CancelWatcher::ctrl_c();

    match cli.command {
        Command::Inline(input) => {
            let document = read_document(&input, &cancel).await?;
            write_objects([document.to_object().context(EncodeDocumentSnafu)?].iter())
        }
        Command::Build(args) => {
            let options = load_options(&args.options.files).await?;
            let document = read_document(&args.input, &cancel).await?;
            let built = build_document(document, &options)?;
            write_objects([built.to_object().context(EncodeDocumentSnafu)?].iter())
        }
        Command::Apply(args) => {
            let options = load_options(&args.options.files).await?;
            let document = read_document(&args.input, &cancel).await?;
            let applier = args.applier();

            let applied = match document {
                Document::Bundle(bundle) => Document::Bundle(
                    applier
                        .apply_bundle(&bundle, &options, cancel.receiver())
                        .context(ApplySnafu)?,
                ),
                Document::Component(component) => Document::Component(
                    applier
                        .apply_options(&component, &options)
                        .context(ApplySnafu)?,
                ),
                document => {
                    return UnsupportedDocumentSnafu {
                        kind: document.kind(),
                        action: "applied",
                    }
                    .fail();
                }
            };
            write_objects([applied.to_object().context(EncodeDocumentSnafu)?].iter())
        }
        Command::Filter(args) => {
            let criteria = args.criteria();
            let document = read_document(&args.input, &cancel).await?;
            filter_document(document, &criteria, args.components)
        }
        Command::Validate(input) => {
            match read_document(&input, &cancel).await? {
                Document::Bundle(bundle) => {
                    validation::validate_bundle(&bundle).context(ValidateSnafu)?;
                }
                Document::Component(component) => {
                    validation::validate_component(&component).context(ValidateSnafu)?;
                }
                document => {
                    return UnsupportedDocumentSnafu {
                        kind: document.kind(),
                        action: "validated",
                    }
                    .fail();
                }
            }
            info!(file = %input.file, "document is valid");
            Ok(())
        }
    }
}

/// Reads and inlines the input document, unless Ctrl-C arrives first.
async fn read_document(input: &InputArgs, cancel: &CancelWatcher) -> Result<Document, Error> {
    let inliner = Inliner::new(LocalFileReader);

    tokio::select! {
        document = inliner.inline_document(&input.file) => {
            document.context(InlineSnafu { file: &input.file })
        }
        () = cancel.cancelled() => CancelledSnafu.fail(),
    }
}

/// Merges all option files in order with JSON merge patch semantics.
async fn load_options(files: &[PathBuf]) -> Result<Options, Error> {
    let mut merged = Value::Object(Options::new());

    for path in files {
        let text = tokio::fs::read_to_string(path)
            .await
            .context(ReadOptionsSnafu { path })?;
        if let Some(options) = yaml::parse_object(&text).context(ParseOptionsSnafu { path })? {
            debug!(path = %path.display(), "merging option file");
            json_patch::merge(&mut merged, &options.into_value());
        }
    }

    Ok(Object::try_from(merged)
        .context(OptionsNotAMapSnafu)?
        .into_map())
}

fn build_document(document: Document, options: &Options) -> Result<Document, Error> {
    match document {
        Document::Bundle(mut bundle) => {
            bundle.components = bundle
                .components
                .iter()
                .map(|component| build::compile_component(component, options))
                .collect::<Result<_, _>>()
                .context(BuildSnafu)?;
            Ok(Document::Bundle(bundle))
        }
        Document::Component(component) => Ok(Document::Component(
            build::compile_component(&component, options).context(BuildSnafu)?,
        )),
        document => UnsupportedDocumentSnafu {
            kind: document.kind(),
            action: "built",
        }
        .fail(),
    }
}

fn filter_document(
    document: Document,
    criteria: &Criteria,
    components: bool,
) -> Result<(), Error> {
    match document {
        Document::Bundle(bundle) if components => {
            let selected = filter::select(&bundle.components, Some(criteria))
                .iter()
                .map(BundleDocument::to_object)
                .collect::<Result<Vec<_>, _>>()
                .context(EncodeDocumentSnafu)?;
            write_objects(&selected)
        }
        Document::Bundle(bundle) => {
            let objects: Vec<Object> = bundle
                .components
                .iter()
                .flat_map(|component| filter::select(&component.spec.objects, Some(criteria)))
                .collect();
            write_objects(&objects)
        }
        Document::Component(component) => {
            write_objects(&filter::select(&component.spec.objects, Some(criteria)))
        }
        document => UnsupportedDocumentSnafu {
            kind: document.kind(),
            action: "filtered",
        }
        .fail(),
    }
}

fn write_objects<'a>(objects: impl IntoIterator<Item = &'a Object>) -> Result<(), Error> {
    let mut stdout = io::stdout().lock();
    for object in objects {
        yaml::serialize(object, &mut stdout, SerializeOptions::default())
            .context(WriteOutputSnafu)?;
    }
    Ok(())
}
