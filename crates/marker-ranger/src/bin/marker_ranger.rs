//! marker-ranger CLI: replay recorded channels or inspect single images.

use clap::{Args, Parser, Subcommand};
use log::LevelFilter;
use marker_ranger::aruco::builtins;
use marker_ranger::node::DirectoryNode;
use marker_ranger::{CalibrationStore, CameraInfo, PipelineController, RangerConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[cfg(feature = "tracing")]
use marker_ranger::core::init_tracing;
#[cfg(not(feature = "tracing"))]
use marker_ranger::core::init_with_level;

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "marker-ranger")]
#[command(about = "Detect ArUco markers and report their distance from the camera")]
#[command(version)]
struct Cli {
    /// Log verbosity (off, error, warn, info, debug, trace).
    #[arg(long, global = true, default_value = "info")]
    log_level: LevelFilter,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a directory of recorded channels.
    Run(RunArgs),

    /// Process one image and print a JSON report.
    Detect(DetectArgs),

    /// List the embedded dictionaries.
    Dictionaries,
}

#[derive(Debug, Clone, Args)]
struct RunArgs {
    /// Root directory holding the channel directories.
    #[arg(long)]
    root: PathBuf,

    /// JSON configuration (defaults apply when omitted).
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct DetectArgs {
    /// Input image (any format the `image` crate decodes).
    #[arg(long)]
    image: PathBuf,

    /// JSON configuration (defaults apply when omitted).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Camera-info JSON with `K` and `D`; without it no pose is computed.
    #[arg(long)]
    camera_info: Option<PathBuf>,

    /// Where to write the annotated JPEG.
    #[arg(long)]
    out: Option<PathBuf>,
}

fn main() -> CliResult<()> {
    let cli = Cli::parse();

    #[cfg(feature = "tracing")]
    init_tracing(false, cli.log_level);
    #[cfg(not(feature = "tracing"))]
    init_with_level(cli.log_level)?;

    match cli.command {
        Commands::Run(args) => run_node(&args),
        Commands::Detect(args) => run_detect(&args),
        Commands::Dictionaries => run_dictionaries(),
    }
}

fn load_config(path: Option<&Path>) -> CliResult<RangerConfig> {
    Ok(match path {
        Some(path) => RangerConfig::load_json(path)?,
        None => RangerConfig::default(),
    })
}

// ── run ───────────────────────────────────────────────────────────────

fn run_node(args: &RunArgs) -> CliResult<()> {
    let config = load_config(args.config.as_deref())?;
    let node = DirectoryNode::new(&args.root, config);
    let summary = node.run()?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

// ── detect ────────────────────────────────────────────────────────────

fn run_detect(args: &DetectArgs) -> CliResult<()> {
    let config = load_config(args.config.as_deref())?;
    let store = Arc::new(CalibrationStore::new(config.calibration_policy));
    if let Some(seed) = &config.static_calibration {
        store.offer_info(seed)?;
    }
    if let Some(path) = &args.camera_info {
        let info: CameraInfo = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        store.offer_info(&info)?;
    }

    let mut pipeline = PipelineController::new(&config, store)?;
    let processed = pipeline.process_frame(&std::fs::read(&args.image)?)?;
    if let Some(out) = &args.out {
        std::fs::write(out, &processed.jpeg)?;
    }
    println!("{}", serde_json::to_string_pretty(&processed.report)?);
    Ok(())
}

// ── dictionaries ──────────────────────────────────────────────────────

fn run_dictionaries() -> CliResult<()> {
    for dict in builtins::ALL {
        println!(
            "{:<14} {}x{} bits  {:>4} codes  corrects {} bit(s)",
            dict.name,
            dict.marker_size,
            dict.marker_size,
            dict.codes.len(),
            dict.max_correction_bits
        );
    }
    Ok(())
}
