//! Sound Bridge
//!
//! Runs one audio port and exposes it over TCP: captured frames go to every
//! connected peer, bytes from peers are played back.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sound_bridge::{
    bridge::Bridge, config::AppConfig, constants::SHUTDOWN_GRACE_MS, network::BroadcastServer,
};

#[derive(Debug, Parser)]
#[command(name = "sound-bridge", version, about = "Audio port to TCP bridge")]
struct Args {
    /// Configuration file (JSON, or TOML by extension)
    config: Option<PathBuf>,

    /// Print the audio devices of the host and exit
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    if args.list_devices {
        return list_devices();
    }

    let path = match args.config {
        Some(path) => path,
        None => AppConfig::default_path().context("no configuration file given")?,
    };
    let config = AppConfig::load(&path)
        .with_context(|| format!("unable to load configuration from {}", path.display()))?;
    tracing::info!("Loaded configuration from {}", path.display());

    tracing::info!("Using {} backend", config.backend);
    let mut port = config.backend.create_port();

    let server = Arc::new(BroadcastServer::new(config.port));
    let bridge = Bridge::new(server.clone());
    let addr = bridge
        .start(port.as_mut(), &config)
        .await
        .context("unable to setup audio bridge")?;
    tracing::info!("Waiting for peers on {}", addr);
    tracing::info!(
        "Audio running: in {} samples @ {} Hz, out {} samples @ {} Hz. Press Ctrl+C to stop",
        config.input.buffer_size,
        config.input.sample_rate,
        config.output.buffer_size,
        config.output.sample_rate
    );

    tokio::signal::ctrl_c()
        .await
        .context("unable to listen for Ctrl+C")?;
    tracing::info!("Shutting down");

    server.stop();
    port.close();
    tokio::time::sleep(Duration::from_millis(SHUTDOWN_GRACE_MS)).await;
    port.dispose();

    let stats = server.stats();
    tracing::info!(
        "Served {} connections: {:.1} KB sent, {:.1} KB received, {} chunks dropped, {} playback underruns",
        stats.connections,
        stats.bytes_sent as f64 / 1024.0,
        stats.bytes_received as f64 / 1024.0,
        stats.dropped_chunks,
        bridge.elastic().underrun_count()
    );
    Ok(())
}

#[cfg(feature = "hardware")]
fn list_devices() -> Result<()> {
    let subsystem = sound_bridge::audio::AudioSubsystem::acquire()?;

    println!("\n=== Available Audio Devices ===");
    for device in subsystem.devices() {
        let device_type = match (device.is_input, device.is_output) {
            (true, true) => "Input/Output",
            (true, false) => "Input",
            (false, true) => "Output",
            _ => "Unknown",
        };
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        let mono_marker = if device.mono { "" } else { " (no mono config)" };
        println!("  {} ({}){}{}", device.name, device_type, default_marker, mono_marker);
        println!("    Sample rates: {:?}", device.sample_rates);
    }
    println!();
    Ok(())
}

#[cfg(not(feature = "hardware"))]
fn list_devices() -> Result<()> {
    anyhow::bail!("built without the `hardware` feature, no devices to list")
}
