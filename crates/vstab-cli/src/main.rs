//! vstab CLI - L1 optimal video stabilization
//!
//! Reads a directory of frames, stabilizes it and writes the cropped frames
//! plus a manifest to a new directory.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use vstab_media::{
    CropPolicy, CropWindow, DetectorKind, ImageSequenceSink, ImageSequenceSource, ProgressEvent,
    ProgressReporter, Stabilizer, StabilizerConfig,
};

#[derive(Parser)]
#[command(name = "vstab")]
#[command(about = "Video stabilization with an L1 optimal camera path", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable debug output
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stabilize an image sequence
    Run {
        /// Directory of input frames (png/jpg, sorted by name)
        #[arg(short, long)]
        input: PathBuf,

        /// Output directory (must not exist unless --overwrite)
        #[arg(short, long)]
        output: PathBuf,

        /// JSON config file; unspecified values keep their defaults
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Frame rate, overriding the input manifest
        #[arg(long)]
        fps: Option<f64>,

        /// Seed for outlier sampling
        #[arg(long)]
        seed: Option<u64>,

        /// Centered crop window ratio
        #[arg(long)]
        crop_ratio: Option<f64>,

        /// How frames are rendered through the crop window
        #[arg(long, value_enum)]
        policy: Option<PolicyArg>,

        /// Corner detector
        #[arg(long)]
        detector: Option<DetectorKind>,

        /// Run every stage on a single thread
        #[arg(long)]
        sequential: bool,

        /// Replace an existing output directory
        #[arg(long)]
        overwrite: bool,

        /// Write the run report as JSON to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Print the default configuration as JSON
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum PolicyArg {
    Static,
    Translate,
    Warp,
}

impl From<PolicyArg> for CropPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Static => CropPolicy::Static,
            PolicyArg::Translate => CropPolicy::Translate,
            PolicyArg::Warp => CropPolicy::Warp,
        }
    }
}

fn init_tracing(debug: bool) {
    // Colored output for terminals, JSON when LOG_FORMAT=json
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    // "vstab" prefixes both vstab_media and vstab_cli targets
    let default_directive = if debug { "vstab=debug" } else { "vstab=info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

/// Logs stage boundaries at info and per-frame progress at debug.
fn logging_reporter() -> ProgressReporter {
    ProgressReporter::new(Arc::new(|event: ProgressEvent| match event {
        ProgressEvent::StageStarted { stage } => info!("{} Started", stage.log_tag()),
        ProgressEvent::Progress { stage, current, total } => {
            debug!("{} {}/{}", stage.log_tag(), current, total)
        }
        ProgressEvent::StageFinished { stage } => info!("{} Finished", stage.log_tag()),
    }))
}

fn build_config(
    config: Option<PathBuf>,
    seed: Option<u64>,
    crop_ratio: Option<f64>,
    policy: Option<PolicyArg>,
    detector: Option<DetectorKind>,
    sequential: bool,
) -> Result<StabilizerConfig> {
    let mut cfg = match config {
        Some(path) => StabilizerConfig::from_json_file(&path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => StabilizerConfig::default(),
    };
    cfg.apply_env_overrides();

    // Command-line flags win over env and file
    if let Some(seed) = seed {
        cfg.seed = Some(seed);
    }
    if let Some(ratio) = crop_ratio {
        cfg.crop.window = CropWindow::Centered { ratio };
    }
    if let Some(policy) = policy {
        cfg.crop.policy = policy.into();
    }
    if let Some(detector) = detector {
        cfg.tracker.detector = detector;
    }
    if sequential {
        cfg.parallel = false;
    }
    cfg.validate().context("Invalid configuration")?;
    Ok(cfg)
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&StabilizerConfig::default())?);
        }
        Commands::Run {
            input,
            output,
            config,
            fps,
            seed,
            crop_ratio,
            policy,
            detector,
            sequential,
            overwrite,
            report,
        } => {
            let cfg = build_config(config, seed, crop_ratio, policy, detector, sequential)?;
            debug!("Stabilizer config: {:?}", cfg);

            let mut source = ImageSequenceSource::open(&input, fps)
                .with_context(|| format!("Failed to open input {}", input.display()))?;
            let mut sink = ImageSequenceSink::new(&output).with_overwrite(overwrite);
            let mut stabilizer = Stabilizer::new(cfg)?.with_reporter(logging_reporter());
            info!(
                "Stabilizing {} -> {} (seed {})",
                input.display(),
                output.display(),
                stabilizer.seed()
            );

            let summary = stabilizer.run(&mut source, &mut sink)?;
            let json = serde_json::to_string_pretty(&summary)?;
            match report {
                Some(path) => std::fs::write(&path, json)
                    .with_context(|| format!("Failed to write report {}", path.display()))?,
                None => println!("{json}"),
            }
        }
    }
    Ok(())
}

fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.debug);

    if let Err(e) = run(cli) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
