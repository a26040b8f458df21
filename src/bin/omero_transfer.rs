use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use omero_transfer_core::app::{App, ProgressSink};
use omero_transfer_core::config::{ConfigLoader, ResolvedConfig};
use omero_transfer_core::descriptor::Ome;
use omero_transfer_core::domain::{MaterializeMode, MetadataField};
use omero_transfer_core::error::TransferError;
use omero_transfer_core::identity::ImageMap;
use omero_transfer_core::memory::MemoryStore;
use omero_transfer_core::output::{JsonOutput, LogSink};

#[derive(Parser)]
#[command(name = "omero-transfer")]
#[command(about = "Reconcile an OME descriptor with an image repository after pixel import")]
#[command(version, author)]
struct Cli {
    /// Log phase progress to stderr.
    #[arg(long, global = true)]
    progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Materialize and link the descriptor graph")]
    Populate(PopulateArgs),
    #[command(about = "Report descriptor objects the pixel import already created")]
    Resolve(InputArgs),
}

#[derive(Args)]
struct InputArgs {
    /// Descriptor graph as JSON.
    #[arg(long)]
    descriptor: PathBuf,

    /// Descriptor image id to imported image id, as a JSON object.
    #[arg(long)]
    image_map: PathBuf,

    /// Store snapshot to run against.
    #[arg(long)]
    state: Utf8PathBuf,
}

#[derive(Args)]
struct PopulateArgs {
    #[command(flatten)]
    input: InputArgs,

    #[arg(long)]
    config: Option<String>,

    /// Reuse same-named containers instead of creating new ones.
    #[arg(long)]
    merge: bool,

    /// Import figure files.
    #[arg(long)]
    figure: bool,

    #[arg(long, value_enum, value_delimiter = ',')]
    metadata: Option<Vec<MetadataField>>,

    /// Folder server-relative payload paths are resolved against.
    #[arg(long)]
    folder: Option<Utf8PathBuf>,

    #[arg(long)]
    checksum: Option<String>,

    /// Run without writing the snapshot back.
    #[arg(long)]
    dry_run: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<TransferError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &TransferError) -> u8 {
    match error {
        TransferError::ConfigRead(_)
        | TransferError::ConfigParse(_)
        | TransferError::DescriptorParse(_)
        | TransferError::InvalidMetadataField(_)
        | TransferError::InvalidSymbolicId(_)
        | TransferError::AmbiguousPlateOrigin(_)
        | TransferError::MissingServerPath(_) => 2,
        TransferError::Store(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let sink: &dyn ProgressSink = if cli.progress { &LogSink } else { &JsonOutput };

    match cli.command {
        Commands::Populate(args) => run_populate(args, sink),
        Commands::Resolve(args) => run_resolve(args, sink),
    }
}

fn run_populate(args: PopulateArgs, sink: &dyn ProgressSink) -> miette::Result<()> {
    let mut config = ConfigLoader::resolve(args.config.as_deref())?;
    apply_overrides(&mut config, &args);

    let descriptor = Ome::from_json_path(&args.input.descriptor)?;
    let image_map = load_image_map(&args.input.image_map)?;
    let store = MemoryStore::load(args.input.state.as_std_path())?;

    let app = App::new(store, config);
    let result = app.populate(&descriptor, &image_map, sink)?;
    if !args.dry_run {
        app.store().save(&args.input.state)?;
    }
    JsonOutput::print_populate(&result).into_diagnostic()?;
    Ok(())
}

fn run_resolve(args: InputArgs, sink: &dyn ProgressSink) -> miette::Result<()> {
    let descriptor = Ome::from_json_path(&args.descriptor)?;
    let image_map = load_image_map(&args.image_map)?;
    let store = MemoryStore::load(args.state.as_std_path())?;

    let app = App::new(store, ResolvedConfig::default());
    let result = app.resolve_existing(&descriptor, &image_map, sink)?;
    JsonOutput::print_resolve(&result).into_diagnostic()?;
    Ok(())
}

fn apply_overrides(config: &mut ResolvedConfig, args: &PopulateArgs) {
    if args.merge {
        config.mode = MaterializeMode::Merge;
    }
    if args.figure {
        config.figure = true;
    }
    if let Some(metadata) = &args.metadata {
        config.metadata = metadata.clone();
    }
    if let Some(folder) = &args.folder {
        config.folder = folder.clone();
    }
    if let Some(checksum) = &args.checksum {
        config.checksum = Some(checksum.clone());
    }
}

fn load_image_map(path: &Path) -> Result<ImageMap, TransferError> {
    let content = fs::read_to_string(path)
        .map_err(|err| TransferError::Filesystem(format!("read {}: {err}", path.display())))?;
    serde_json::from_str(&content).map_err(|err| TransferError::DescriptorParse(err.to_string()))
}
