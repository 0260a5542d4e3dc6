//! Soundpost server - module entry point
//!
//! Builds the configured microphone and speaker resources against the
//! platform audio host and keeps them alive until the process is told
//! to stop. Discovery can also be run standalone with --list-devices.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use soundpost_common::ResourceConfig;
use soundpost_device::microphone::MICROPHONE_MODEL;
use soundpost_device::speaker::SPEAKER_MODEL;
use soundpost_device::{discovery, Microphone, Speaker};
use soundpost_host::{CpalHost, HostBinding};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "soundpost-server")]
#[command(about = "Host audio module exposing microphones and speakers", long_about = None)]
struct Args {
    /// Path to a JSON file listing resource configs
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enumerate audio devices as resource configs and exit
    #[arg(long)]
    list_devices: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("soundpost server starting");

    let host: Arc<dyn HostBinding> = Arc::new(CpalHost::new()?);
    host.initialize()?;

    if args.list_devices {
        let configs = discovery::discover_resources(host.as_ref());
        for config in &configs {
            info!(
                "{} [{}] {}",
                config.name,
                config.model,
                serde_json::to_string(&config.attributes).unwrap_or_default()
            );
        }
        info!(resources = configs.len(), "discovery complete");
        return Ok(());
    }

    let mut microphones = Vec::new();
    let mut speakers = Vec::new();

    if let Some(path) = &args.config {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let entries: Vec<ResourceConfig> =
            serde_json::from_str(&raw).context("failed to parse config file")?;

        for entry in entries {
            match entry.model.as_str() {
                MICROPHONE_MODEL => {
                    Microphone::validate(&entry.attributes)?;
                    microphones.push(Microphone::new(
                        entry.name,
                        host.clone(),
                        &entry.attributes,
                    )?);
                }
                SPEAKER_MODEL => {
                    Speaker::validate(&entry.attributes)?;
                    speakers.push(Speaker::new(entry.name, host.clone(), &entry.attributes)?);
                }
                other => {
                    error!(model = other, name = %entry.name, "unknown resource model, skipping");
                }
            }
        }
    }

    info!(
        microphones = microphones.len(),
        speakers = speakers.len(),
        "resources ready"
    );

    // Run until asked to stop.
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("failed to set up SIGTERM handler")?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT, shutting down"),
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
    }

    drop(microphones);
    drop(speakers);
    host.terminate()?;
    info!("server shutdown complete");
    Ok(())
}
