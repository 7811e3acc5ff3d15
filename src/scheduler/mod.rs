//! The background update check loop.
//!
//! One scheduler owns the timing for a running agent: it ticks at a fixed
//! interval, and when the first tick fires or the configured check time
//! comes due it runs a **check cycle** - reload the manifest, then update
//! every configured (application, install target) pair one at a time.
//! Check cycles never overlap; the loop is strictly tick → sleep → tick.
//!
//! Failure isolation is layered:
//! - a manifest reload failure aborts the whole cycle without touching any
//!   application, and the cycle is retried on the next due tick;
//! - per-application failures are contained inside the update engine and
//!   never stop the loop from reaching the remaining applications.
//!
//! Cancellation is cooperative via a [`watch`] channel: the loop observes
//! the signal between ticks, so a cycle already in flight runs to
//! completion. Callers needing bounded shutdown latency must await the
//! loop after signalling, not assume an instantaneous stop.

use std::path::PathBuf;

use chrono::Local;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::config::AgentSettings;
use crate::constants::CHECK_TICK_INTERVAL;
use crate::core::AgentError;
use crate::engine::UpdateEngine;
use crate::manifest::ManifestStore;

/// Owns the daily check schedule and drives the update engine.
pub struct UpdateScheduler {
    settings_path: PathBuf,
    settings: AgentSettings,
    store: ManifestStore,
    engine: UpdateEngine,
    first_check: bool,
    // Guards the settings file against interleaved writers in this process.
    config_lock: Mutex<()>,
}

impl std::fmt::Debug for UpdateScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateScheduler")
            .field("settings_path", &self.settings_path)
            .finish_non_exhaustive()
    }
}

impl UpdateScheduler {
    /// Builds a scheduler from host-local settings.
    ///
    /// Fails with a configuration error when the manifest URI is missing;
    /// everything else (no installed apps, no credentials) merely logs.
    pub fn new(settings: AgentSettings, settings_path: PathBuf) -> Result<Self, AgentError> {
        let manifest_uri = settings.manifest_uri.clone().ok_or_else(|| AgentError::Config {
            message: "the configuration is missing the required manifest URI".to_string(),
        })?;

        if settings.installed_apps.is_empty() {
            warn!("the configuration does not list any apps to update");
        }

        let credentials =
            settings.client_credentials.clone().filter(|c| c.is_complete());
        let engine = UpdateEngine::new(manifest_uri.clone(), credentials)
            .with_allow_installs(settings.allow_installs);

        Ok(Self {
            settings_path,
            settings,
            store: ManifestStore::new(manifest_uri),
            engine,
            first_check: true,
            config_lock: Mutex::new(()),
        })
    }

    /// Replaces the update engine (tests inject mock supervisors/probes).
    #[must_use]
    pub fn with_engine(mut self, engine: UpdateEngine) -> Self {
        self.engine = engine;
        self
    }

    /// The current settings, including the recomputed `next_check_date`.
    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    /// Runs the tick loop until `shutdown` flips to true.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            manifest = %self.store.manifest_uri(),
            apps = self.settings.installed_apps.len(),
            "update scheduler started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let due = self.first_check
                || self
                    .settings
                    .next_check_date
                    .is_none_or(|next| Local::now() >= next);
            if due {
                self.run_check_cycle().await;
            }

            tokio::select! {
                _ = tokio::time::sleep(CHECK_TICK_INTERVAL) => {}
                _ = shutdown.changed() => {}
            }
        }

        info!("update scheduler stopped");
    }

    /// Runs one check cycle immediately.
    ///
    /// Reloads the manifest, updates each installed app sequentially, then
    /// advances `next_check_date` to tomorrow's check time and persists
    /// the settings. A reload failure aborts before any application is
    /// touched and leaves the schedule unchanged so the next due tick
    /// retries.
    pub async fn run_check_cycle(&mut self) {
        self.first_check = false;
        info!("checking for updates");

        if let Err(e) = self.store.load().await {
            warn!(error = %e, "manifest reload failed, aborting check cycle");
            return;
        }

        for install in &self.settings.installed_apps {
            let Some(app) = self.store.find_application(install.application_id) else {
                warn!(
                    application_id = %install.application_id,
                    "app does not exist in the manifest, no update will be applied"
                );
                continue;
            };
            let Some(package) = app.latest_package() else {
                warn!(app = %app.name, "no available package, no update will be applied");
                continue;
            };

            let outcome = self.engine.update(app, package, &install.install_uri).await;
            debug!(app = %app.name, ?outcome, "update finished");
        }

        self.settings.next_check_date = Some(self.settings.next_check_after(Local::now()));
        let _guard = self.config_lock.lock().await;
        if let Err(e) = self.settings.save(&self.settings_path).await {
            warn!(error = %e, "unable to persist agent configuration");
        }
    }
}
