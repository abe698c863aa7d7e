//! VolWare CLI Application

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use volware_core::domain::{
    AudioBackend, ChannelRouter, ConfigManager, FrameDispatcher, SessionResolver, VolumeSink,
    VolwareConfig, MASTER,
};
use volware_infra::audio::{default_backend, InMemoryAudioBackend};
use volware_infra::serial::{ConnectionManager, SerialSettings, SystemPortOpener};

#[derive(Parser)]
#[command(name = "volware")]
#[command(about = "Per-application volume control from a serial slider box", long_about = None)]
struct Cli {
    /// Config file to use instead of the one in the user config directory
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial port, overriding the configured one
    #[arg(short, long)]
    port: Option<String>,

    /// Drive an in-memory audio backend instead of the system mixer
    #[arg(long)]
    simulate: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

async fn load_config(cli: &Cli) -> anyhow::Result<VolwareConfig> {
    let mut config = match &cli.config {
        Some(path) => VolwareConfig::load_from_file(path)
            .await
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => {
            let dir = ConfigManager::default_config_dir()?;
            ConfigManager::new(dir).load().await
        }
    };

    if let Some(port) = &cli.port {
        config.com_port = port.clone();
    }
    Ok(config)
}

/// Simulated backend with one session per configured application
fn simulated_backend(config: &VolwareConfig) -> InMemoryAudioBackend {
    let backend = InMemoryAudioBackend::new();
    let apps = config
        .channel_apps
        .values()
        .flatten()
        .filter(|app| !app.eq_ignore_ascii_case(MASTER));

    for (pid, app) in (1000u32..).zip(apps) {
        backend.add_session(pid, format!("/simulated/{}", app));
    }
    backend
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    info!("VolWare starting");

    let config = load_config(&cli).await?;
    let mapping = config.channel_mapping()?;

    let backend: Box<dyn AudioBackend> = if cli.simulate {
        info!("Using simulated audio backend");
        Box::new(simulated_backend(&config))
    } else {
        default_backend().context("Failed to initialize audio backend")?
    };

    let resolver = SessionResolver::with_ttl(config.session_cache_ttl());
    let sink = Arc::new(VolumeSink::new(backend, resolver));
    let router = ChannelRouter::new(&mapping, config.router_settings());
    info!(channels = router.channel_count(), "Channel mapping loaded");
    let dispatcher = Arc::new(FrameDispatcher::new(router, sink));

    let mut connection = ConnectionManager::new(
        SerialSettings::from_config(&config),
        Arc::new(SystemPortOpener),
        dispatcher,
    );
    connection
        .start()
        .context("Failed to start serial connection")?;

    let mut state = connection.subscribe();
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "Failed to listen for shutdown signal");
                }
                break;
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *state.borrow_and_update();
                info!(state = ?current, "Serial connection state changed");
            }
        }
    }

    info!("Shutting down");
    connection.stop();
    Ok(())
}
