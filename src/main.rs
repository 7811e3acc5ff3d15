//! appupd console host.
//!
//! Thin wrapper that turns the update engine into a long-running console
//! process: load the host configuration, build the scheduler, and run it
//! until Ctrl-C. The agent is headless; there is no interactive CLI
//! beyond the configuration flag.

use std::path::PathBuf;

use anyhow::{Context, Result};
use appupd::config::AgentSettings;
use appupd::constants::DEFAULT_CONFIG_FILENAME;
use appupd::scheduler::UpdateScheduler;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Unattended application update agent.
#[derive(Parser)]
#[command(name = "appupd", version, about)]
struct Cli {
    /// Path to the host configuration file. Defaults to
    /// app-updates-config.json beside the executable.
    #[arg(long, short, env = "APPUPD_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => default_config_path()?,
    };

    info!(config = %config_path.display(), "starting update agent");
    let settings = AgentSettings::load(&config_path).await;

    if settings.manifest_uri.is_none() {
        // Warn and idle rather than exit: unattended hosts have nobody
        // watching a restart loop, and the fix is a config edit + restart.
        warn!(
            config = %config_path.display(),
            "the configuration is missing the required manifest URI; the agent will idle until restarted with a valid configuration"
        );
        tokio::signal::ctrl_c().await.ok();
        return Ok(());
    }
    if settings.installed_apps.is_empty() {
        warn!(
            config = %config_path.display(),
            "the configuration does not list any apps to update; update the file and restart"
        );
    }

    let mut scheduler = UpdateScheduler::new(settings, config_path)
        .context("failed to construct the update scheduler")?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            shutdown_tx.send(true).ok();
        }
    });

    scheduler.run(shutdown_rx).await;
    Ok(())
}

/// The default configuration file lives beside the running executable.
fn default_config_path() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("unable to determine executable path")?;
    let dir = exe
        .parent()
        .context("executable path has no parent directory")?;
    Ok(dir.join(DEFAULT_CONFIG_FILENAME))
}
