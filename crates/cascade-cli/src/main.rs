//! cascade - headless node-graph compositor
//!
//! Inspects, renders and exports cascade project documents.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

mod commands;

#[derive(Parser)]
#[command(name = "cascade")]
#[command(author, version, about = "Headless node-graph compositor")]
#[command(long_about = "
Evaluates cascade project documents (node graphs of image operations) on the
CPU or, when built with the `gpu` feature, on a wgpu device.

Examples:
  cascade kinds                               # List node kinds
  cascade backends                            # Show compute backends
  cascade new comp.json -i plate.png          # Starter Read -> Blur -> Write
  cascade info comp.json                      # Nodes, connections, readiness
  cascade render comp.json -n blur -o out.png # Render one node
  cascade export comp.json -n write --frames 0..24
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output (debug logging)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Engine config (YAML)
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    /// Compute backend: auto, cpu, wgpu (overrides config and CASCADE_BACKEND)
    #[arg(short, long, global = true)]
    backend: Option<String>,

    /// Number of threads for the CPU device (0 = auto)
    #[arg(short = 'j', long, global = true, default_value = "0")]
    threads: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered node kinds
    #[command(visible_alias = "k")]
    Kinds(KindsArgs),

    /// Show available compute backends
    Backends,

    /// Describe a project document
    #[command(visible_alias = "i")]
    Info(InfoArgs),

    /// Render one node to an image file
    #[command(visible_alias = "r")]
    Render(RenderArgs),

    /// Export a node, optionally over a frame range
    #[command(visible_alias = "x")]
    Export(ExportArgs),

    /// Write a starter project (Read -> Blur -> Write)
    New(NewArgs),
}

#[derive(Args)]
struct KindsArgs {
    /// Show the property schema of each kind
    #[arg(short, long)]
    properties: bool,
}

#[derive(Args)]
struct InfoArgs {
    /// Project document (JSON)
    project: PathBuf,
}

#[derive(Args)]
struct RenderArgs {
    /// Project document (JSON)
    project: PathBuf,

    /// Node id or name
    #[arg(short, long)]
    node: String,

    /// Output image
    #[arg(short, long)]
    output: PathBuf,

    /// Output color space: linear, srgb
    #[arg(long)]
    color_space: Option<String>,
}

#[derive(Args)]
struct ExportArgs {
    /// Project document (JSON)
    project: PathBuf,

    /// Node id or name (a Write node supplies its own path)
    #[arg(short, long)]
    node: String,

    /// Output image; frames get a `_NNNN` suffix
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Frame range, e.g. `0..24`
    #[arg(short, long, value_parser = commands::parse_frames)]
    frames: Option<std::ops::Range<usize>>,

    /// Output color space: linear, srgb
    #[arg(long)]
    color_space: Option<String>,
}

#[derive(Args)]
struct NewArgs {
    /// Project document to create
    project: PathBuf,

    /// Source image(s) for the Read node, one per frame
    #[arg(short, long)]
    input: Vec<PathBuf>,

    /// Blur radius
    #[arg(short, long, default_value = "4")]
    radius: i32,

    /// Overwrite an existing file
    #[arg(long)]
    force: bool,
}

/// Installs the stderr subscriber and, with `--log-file`, a non-blocking
/// file writer. The guard flushes the file on drop.
fn init_logging(verbose: bool, log_file: Option<&PathBuf>) -> Result<Option<WorkerGuard>> {
    let default = if verbose { "debug" } else { "info" };
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let stderr = tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_target(verbose).with_filter(filter());

    let Some(path) = log_file else {
        tracing_subscriber::registry().with(stderr).init();
        return Ok(None);
    };

    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(std::path::Path::new("."));
    let name = path.file_name().context("--log-file needs a file name")?;
    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
    let file = tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false).with_filter(filter());
    tracing_subscriber::registry().with(stderr).with(file).init();
    Ok(Some(guard))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging(cli.verbose, cli.log_file.as_ref())?;

    // Configure thread pool
    if cli.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(cli.threads)
            .build_global()
            .context("Failed to configure thread pool")?;
    }

    let options = commands::EngineOptions { config: cli.config, backend: cli.backend };

    match cli.command {
        Commands::Kinds(args) => commands::kinds::run(args, cli.verbose),
        Commands::Backends => commands::backends::run(cli.verbose),
        Commands::Info(args) => commands::info::run(args, &options),
        Commands::Render(args) => commands::render::run(args, &options),
        Commands::Export(args) => commands::export::run(args, &options),
        Commands::New(args) => commands::new::run(args, &options),
    }
}
