//! alpr-stage - run image files through one recognition activation
//!
//! Smoke/bench runner: every input file becomes one work unit, and the
//! routing of each unit is printed when the activation ends.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use alpr_stage::config::{self, StageConfig};
use alpr_stage::{
    ChannelRouter, EngineFactory, RecognitionStage, Relationship, ReplayEngineFactory, WorkUnit,
};

/// Engine backend to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EngineKind {
    /// Replay recorded responses from the runtime data directory
    Replay,
    /// libopenalpr
    #[cfg(feature = "engine-openalpr")]
    Openalpr,
}

/// alpr-stage - license plate recognition stage runner
#[derive(Parser, Debug)]
#[command(name = "alpr-stage")]
#[command(about = "Runs images through an ALPR engine and routes them to success or failure")]
struct Args {
    /// Stage configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Engine backend
    #[arg(long, value_enum, default_value = "replay")]
    engine: EngineKind,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Write the default configuration to the config path and exit
    #[arg(long)]
    write_default_config: bool,

    /// Image files or directories of images
    inputs: Vec<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => config::default_config_path()?,
    };

    if args.write_default_config {
        config::save_config(&StageConfig::default(), &config_path)
            .with_context(|| format!("Failed to write {:?}", config_path))?;
        println!("Wrote default configuration to {}", config_path.display());
        return Ok(());
    }

    let stage_config = load_or_default_config(&config_path, args.config.is_some())?;

    let factory: Arc<dyn EngineFactory> = match args.engine {
        EngineKind::Replay => Arc::new(ReplayEngineFactory),
        #[cfg(feature = "engine-openalpr")]
        EngineKind::Openalpr => Arc::new(alpr_stage::engine::OpenAlprFactory),
    };

    let workers = stage_config.pool_size;
    let stage = RecognitionStage::new(stage_config, factory).context("Invalid stage configuration")?;
    let activation = stage.prepare().context("Failed to start activation")?;

    let files = collect_inputs(&args.inputs)?;
    info!("Processing {} image(s) with {} worker(s)", files.len(), workers);

    let (router, receivers) = ChannelRouter::unbounded();
    let (unit_tx, unit_rx) = crossbeam_channel::unbounded::<WorkUnit>();

    for path in &files {
        match std::fs::read(path) {
            Ok(bytes) => {
                let unit = WorkUnit::new(bytes).with_attribute("filename", path.display().to_string());
                let _ = unit_tx.send(unit);
            }
            Err(e) => error!("Skipping {:?}: {}", path, e),
        }
    }
    drop(unit_tx);

    std::thread::scope(|scope| {
        for _ in 0..workers {
            let unit_rx = unit_rx.clone();
            let router = router.clone();
            let activation = &activation;
            scope.spawn(move || {
                for unit in unit_rx.iter() {
                    activation.process_and_route(unit, &router);
                }
            });
        }
    });
    drop(router);

    let stats = activation.release();

    for relationship in Relationship::ALL {
        let receiver = match relationship {
            Relationship::Success => &receivers.success,
            Relationship::Failure => &receivers.failure,
        };
        let units: Vec<WorkUnit> = receiver.try_iter().collect();
        println!("{} ({}):", relationship, units.len());
        for unit in units {
            println!(
                "  {} {}",
                unit.id(),
                unit.attribute("filename").unwrap_or("<unnamed>")
            );
        }
    }
    println!(
        "{} processed, {} succeeded, {} failed, {} plates found",
        stats.processed, stats.succeeded, stats.failed, stats.plates_found
    );

    Ok(())
}

/// Load configuration from file, or fall back to defaults when no file was requested
fn load_or_default_config(path: &Path, explicit: bool) -> Result<StageConfig> {
    if path.exists() {
        let config = config::load_config(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path))?;
        info!("Loaded configuration from {:?}", path);
        return Ok(config);
    }
    if explicit {
        anyhow::bail!("Configuration file {:?} does not exist", path);
    }
    info!("Using default configuration");
    Ok(StageConfig::default())
}

/// Expand directories into their files, sorted by name
fn collect_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(input)
                .with_context(|| format!("Failed to list {:?}", input))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| path.is_file())
                .collect();
            entries.sort();
            files.extend(entries);
        } else if input.is_file() {
            files.push(input.clone());
        } else {
            warn!("Input {:?} does not exist", input);
        }
    }
    Ok(files)
}
