//! `thump` binary: load settings, start the relay, wait for Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use thump_server::{ServerConfig, ThumpServer};
use thump_settings::ThumpSettings;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "thump", about = "Relay server for shared-clock jam sessions")]
struct Cli {
    /// Bind address.
    #[arg(long)]
    host: Option<String>,

    /// Bind port.
    #[arg(long, short)]
    port: Option<u16>,

    /// Settings file (defaults to `~/.thump/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Tempo at startup.
    #[arg(long)]
    bpm: Option<f64>,

    /// Start the simulated participant.
    #[arg(long, default_value_t = false)]
    robo: bool,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    /// Level in effect while settings load.
    fn bootstrap_log_level(&self) -> &str {
        self.log_level
            .as_deref()
            .unwrap_or(thump_core::logging::BOOTSTRAP_LEVEL)
    }

    fn apply(self, settings: &mut ThumpSettings) {
        if let Some(host) = self.host {
            settings.server.host = host;
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(bpm) = self.bpm {
            settings.clock.default_bpm = bpm;
        }
        if self.robo {
            settings.robo.enabled = true;
        }
        if let Some(level) = self.log_level {
            settings.logging.level = level;
        }
    }
}

fn load(cli: Cli) -> Result<ThumpSettings> {
    let mut settings = match &cli.settings {
        Some(path) => thump_settings::load_settings_from_path(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => thump_settings::load_settings().context("failed to load settings")?,
    };
    cli.apply(&mut settings);
    settings.validate().context("invalid settings")?;
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let logging = thump_core::logging::init_subscriber(cli.bootstrap_log_level());
    let settings = load(cli)?;
    if let Some(logging) = &logging {
        logging.set_level(&settings.logging.level);
    }

    let metrics = match thump_server::metrics::install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "metrics recorder unavailable, /metrics disabled");
            None
        }
    };

    let server = Arc::new(ThumpServer::new(ServerConfig::from_settings(&settings), metrics));
    let (addr, handle) = server
        .listen()
        .await
        .with_context(|| format!("failed to bind {}", server.config().bind_addr()))?;
    info!(%addr, bpm = settings.clock.default_bpm, robo = settings.robo.enabled, "thump ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    info!("shutting down");
    server.stop(None).await;
    handle.await.context("server task panicked")?;
    Ok(())
}
