//! CLI Entry Point for rov-hub
//!
//! Provides command-line interface for:
//! - Running the hub (all links, polling and serial discovery) until Ctrl-C
//! - Running serial discovery once and printing what was found
//! - Printing the effective configuration
//!
//! # Usage
//!
//! ```bash
//! rov-hub run --config config/rov-hub.toml
//! rov-hub discover --json
//! ROV_HUB_ROV__HOST=10.0.0.5 rov-hub config
//! ```

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rov_hub::config::{HubConfig, DEFAULT_CONFIG_PATH};
use rov_hub::serial::{PortClassifier, SystemSerial};
use rov_hub::state::{Flag, Measurement, SharedState};
use rov_hub::{logging, Hub};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::info;

#[derive(Parser)]
#[command(name = "rov-hub")]
#[command(about = "Shore-side telemetry hub for a towed underwater vehicle", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start every link and run until interrupted
    Run,

    /// Probe the serial ports once and print the device registry
    Discover {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = HubConfig::load_from(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    config.validate().context("Invalid configuration")?;

    match cli.command {
        Commands::Run => {
            logging::init_from_config(&config)?;
            run(config).await
        }
        Commands::Discover { json } => {
            logging::init_from_config(&config)?;
            discover(config, json).await
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

async fn run(config: HubConfig) -> Result<()> {
    info!(name = %config.application.name, "Starting");
    let hub = Hub::start(config).await.context("Failed to start hub")?;

    signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;

    let state = hub.state();
    info!(
        rov = %hub.rov().link_state(),
        camera = %hub.camera().link_state(),
        ping_ms = state.measurement(Measurement::RovPing),
        emergency = state.flag(Flag::EmergencyMode),
        devices = state.registry().len(),
        "Shutting down"
    );
    hub.shutdown();
    Ok(())
}

async fn discover(config: HubConfig, json: bool) -> Result<()> {
    let mut serial = config.serial.clone();
    // a one-shot run should terminate
    if serial.max_rounds == 0 {
        serial.max_rounds = 1;
    }

    let state = Arc::new(SharedState::new(&config.state));
    let classifier = PortClassifier::new(serial, Arc::new(SystemSerial), state.clone());
    let report = classifier.discover().await;

    if json {
        let output = serde_json::json!({
            "rounds": report.rounds,
            "registry": state.registry(),
            "promoted": report.promoted,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("{:<24} ROLE", "PORT");
        for (port, role) in state.registry().iter() {
            println!("{port:<24} {role}");
        }
        println!("({} round(s))", report.rounds);
    }
    Ok(())
}
