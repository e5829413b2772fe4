//! # relay
//!
//! Relay server binary: loads settings, initializes logging and metrics,
//! and serves the desktop/browser WebSocket relay until interrupted.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use relay_server::{RelayServer, ServerConfig};
use relay_settings::{LoggingSettings, RelaySettings};
use tracing::Subscriber;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;

/// Desktop/browser WebSocket relay.
#[derive(Parser, Debug)]
#[command(name = "relay", about = "Desktop/browser WebSocket relay")]
struct Cli {
    /// Host to bind (overrides settings and `HOST`).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings and `PORT`).
    #[arg(long)]
    port: Option<u16>,

    /// JSON settings file (defaults to `$RELAY_SETTINGS` when set).
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn apply(&self, settings: &mut RelaySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
    }
}

/// Warn-level logger used until settings decide the real one, so problems
/// found while loading them are not lost.
fn bootstrap_subscriber<W>(writer: W) -> impl Subscriber + Send + Sync
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("warn"))
        .with_writer(writer)
        .finish()
}

/// `.env`, then the settings file and environment, logged through `writer`.
fn load_layered<W>(config: Option<&Path>, writer: W) -> Result<(RelaySettings, Option<PathBuf>)>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing::subscriber::with_default(bootstrap_subscriber(writer), || {
        let dotenv = relay_settings::load_dotenv();
        let settings =
            relay_settings::load_settings(config).context("Failed to load settings")?;
        Ok((settings, dotenv))
    })
}

fn init_tracing(logging: &LoggingSettings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let (mut settings, dotenv) = load_layered(args.config.as_deref(), std::io::stderr)?;
    args.apply(&mut settings);

    init_tracing(&settings.logging);
    if let Some(path) = dotenv {
        tracing::debug!(path = %path.display(), ".env loaded");
    }

    let metrics_handle =
        relay_server::metrics::install_recorder().context("Failed to install metrics recorder")?;

    let config = ServerConfig::from_settings(&settings.server);
    let server = RelayServer::new(config, metrics_handle);
    let (addr, handle) = server.listen().await.context("Failed to bind server")?;

    tracing::info!("Relay listening on ws://{addr}");

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server
        .shutdown()
        .graceful_shutdown(vec![handle], None)
        .await;

    tracing::info!("Shutdown complete");
    Ok(())
}
