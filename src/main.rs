//! CLI entry point for the PLC data logger.
//!
//! # Usage
//!
//! Start logging (simulated controllers, no hardware needed):
//! ```bash
//! plc_logger run --simulate
//! ```
//!
//! Run one retention sweep and exit:
//! ```bash
//! plc_logger sweep
//! ```
//!
//! Validate the configuration:
//! ```bash
//! plc_logger check --config config/plc_logger.toml
//! ```

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

use plc_logger::config::LoggerConfig;
use plc_logger::engine::DataLogger;
use plc_logger::retention;
use plc_logger::sim::SimClientFactory;
use plc_logger::storage::{StorageSelector, SystemVolumeProbe};
use plc_logger::tracing_setup;

#[derive(Parser)]
#[command(name = "plc_logger")]
#[command(about = "Polls PLC controllers and logs samples to rotating CSV files", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config/plc_logger.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the acquisition loop (Ctrl+C to stop)
    Run {
        /// Use simulated controllers instead of a protocol driver
        #[arg(long)]
        simulate: bool,
    },

    /// Run one retention sweep over all output directories and exit
    Sweep,

    /// Load and validate the configuration, then exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = LoggerConfig::load_from(&cli.config)?;
    config.validate()?;
    tracing_setup::init_from_config(&config)?;

    match cli.command {
        Commands::Run { simulate } => run(config, simulate).await,
        Commands::Sweep => sweep(config),
        Commands::Check => check(config, &cli.config),
    }
}

async fn run(config: LoggerConfig, simulate: bool) -> Result<()> {
    if !simulate {
        // The protocol driver plugs in through the ClientFactory seam; this
        // build ships only the simulated backend.
        bail!("no protocol driver built in; run with --simulate");
    }
    if config.devices.is_empty() {
        bail!("no devices configured; nothing to log");
    }

    info!(
        devices = config.devices.len(),
        interval = ?config.acquisition.sample_interval,
        "starting logger"
    );

    let logger = Arc::new(DataLogger::new(
        config,
        Arc::new(SimClientFactory::default()),
        Box::new(SystemVolumeProbe),
    )?);
    logger.start().await?;

    {
        let logger = logger.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received; stopping");
                if let Err(err) = logger.stop().await {
                    error!(error = %err, "shutdown error");
                }
            }
        });
    }

    // Returns on Ctrl+C or when the circuit breaker halts the run.
    logger.wait().await?;
    Ok(())
}

fn sweep(config: LoggerConfig) -> Result<()> {
    let selector = StorageSelector::new(
        Box::new(SystemVolumeProbe),
        config.storage.local_dir.clone(),
        config.storage.min_free_space_bytes,
    );
    let stats = retention::sweep(&selector.sweep_directories(), config.storage.retention_days);
    println!(
        "sweep complete: {} compressed, {} deleted, {} errors",
        stats.compressed, stats.deleted, stats.skipped_errors
    );
    Ok(())
}

fn check(config: LoggerConfig, path: &Path) -> Result<()> {
    println!("{} is valid", path.display());
    println!("  devices:         {}", config.devices.len());
    for device in &config.devices {
        println!("    {} ({} points)", device.address, device.points.len());
    }
    println!("  sample interval: {:?}", config.acquisition.sample_interval);
    println!("  save interval:   {:?}", config.storage.save_interval);
    println!("  retention:       {} days", config.storage.retention_days);
    println!("  local directory: {}", config.storage.local_dir.display());
    Ok(())
}
