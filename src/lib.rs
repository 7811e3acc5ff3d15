//! appupd - unattended application update agent.
//!
//! A headless agent for single hosts (desktops or IoT devices) that
//! periodically consults a published manifest of application packages and
//! brings each locally installed application to the latest available
//! version - downloading, verifying, applying, and relaunching as needed,
//! with no human present.
//!
//! # Architecture Overview
//!
//! The agent follows a manifest model:
//! - the **manifest** (`app-update-manifest.json`, local file or HTTP
//!   endpoint) is the published catalogue of applications and packages,
//!   authored elsewhere and reloaded fresh on every check cycle;
//! - the **host configuration** (`app-updates-config.json` beside the
//!   executable) maps manifest applications onto local install
//!   directories and carries the schedule and optional client
//!   credentials.
//!
//! # Core Modules
//!
//! - [`manifest`] - Application/Package data model and the manifest store
//! - [`engine`] - the per-application update state machine (probe →
//!   fetch → verify → hooks → kill → extract → relaunch)
//! - [`scheduler`] - the daily check loop with cooperative cancellation
//! - [`process`] - platform-aware process lookup, termination, and launch
//! - [`version`] - installed-version probing from PE version resources
//! - [`auth`] - client-credentials bearer token exchange for gated
//!   downloads
//! - [`config`] - host-local settings with explicit, typed defaults
//! - [`core`] - the error taxonomy
//!
//! # Failure Isolation
//!
//! Each application's update is self-contained: any operational failure
//! (transport, checksum, auth, process control) is logged and contained
//! inside the engine, so one broken application never blocks the rest.
//! Only manifest reload failures abort a whole cycle, and those retry on
//! the next due tick.
//!
//! # Example
//!
//! ```rust,no_run
//! use appupd::config::AgentSettings;
//! use appupd::scheduler::UpdateScheduler;
//! use std::path::PathBuf;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let path = PathBuf::from("app-updates-config.json");
//! let settings = AgentSettings::load(&path).await;
//! let mut scheduler = UpdateScheduler::new(settings, path)?;
//!
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! tokio::spawn(async move {
//!     tokio::signal::ctrl_c().await.ok();
//!     shutdown_tx.send(true).ok();
//! });
//! scheduler.run(shutdown_rx).await;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod constants;
pub mod core;
pub mod engine;
pub mod manifest;
pub mod process;
pub mod scheduler;
pub mod version;

#[cfg(feature = "test-utils")]
pub mod test_utils;

pub use config::{AgentSettings, ClientCredentials, InstalledApp};
pub use crate::core::AgentError;
pub use engine::{UpdateEngine, UpdateOutcome};
pub use manifest::{Application, ManifestStore, Package};
pub use scheduler::UpdateScheduler;
