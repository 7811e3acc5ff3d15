//! Host-local agent configuration.
//!
//! Distinct from the manifest: this is per-host state with its own
//! load/save cycle, stored as a JSON file beside the running executable:
//!
//! ```json
//! {
//!   "clientCredentials": { "clientId": "...", "clientSecret": "...", "scope": "..." },
//!   "checkTime": "03:00:00",
//!   "nextCheckDate": "2018-10-03T03:00:00+00:00",
//!   "manifestUri": "https://host/app-update-manifest.json",
//!   "installedApps": [
//!     { "applicationId": "04fc007e-db18-430f-b4fa-f5b54de1e142", "installUri": "file:///opt/testapp" }
//!   ]
//! }
//! ```
//!
//! Every field is an explicit, typed member with a spelled-out default; an
//! absent or unreadable configuration file falls back to defaults with a
//! warning so a freshly imaged device still boots into a working (if idle)
//! agent.

use std::path::Path;

use chrono::{DateTime, Local, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use crate::core::AgentError;

/// Client-credentials triple used to authorize gated package downloads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientCredentials {
    /// Opaque client identifier issued by the manifest host.
    #[serde(default)]
    pub client_id: String,
    /// Shared secret paired with the client id.
    #[serde(default)]
    pub client_secret: String,
    /// Authorization scope requested during the exchange.
    #[serde(default)]
    pub scope: String,
}

impl ClientCredentials {
    /// Credentials take part in the token exchange only when all three
    /// fields are non-blank.
    pub fn is_complete(&self) -> bool {
        !self.client_id.trim().is_empty()
            && !self.client_secret.trim().is_empty()
            && !self.scope.trim().is_empty()
    }
}

/// Maps a manifest application onto a local install directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledApp {
    /// References an [`Application`](crate::manifest::Application) id in the manifest.
    pub application_id: Uuid,
    /// Local filesystem target as a `file://` URI.
    pub install_uri: Url,
}

impl std::fmt::Display for InstalledApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.application_id, self.install_uri)
    }
}

/// The host-local schedule and install configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentSettings {
    /// Optional credentials for gated downloads. `None` (or an incomplete
    /// triple) means downloads are unauthenticated.
    pub client_credentials: Option<ClientCredentials>,
    /// Time of day the daily update check runs.
    pub check_time: NaiveTime,
    /// Next scheduled check; recomputed after every completed cycle.
    pub next_check_date: Option<DateTime<Local>>,
    /// Where the manifest lives. The agent idles with a warning when unset.
    pub manifest_uri: Option<Url>,
    /// Whether a missing version file may be treated as a fresh install.
    /// Disabling this refuses to populate directories that have never seen
    /// the application before.
    pub allow_installs: bool,
    /// The applications this host keeps up to date.
    pub installed_apps: Vec<InstalledApp>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            client_credentials: None,
            check_time: default_check_time(),
            next_check_date: None,
            manifest_uri: None,
            allow_installs: true,
            installed_apps: Vec::new(),
        }
    }
}

fn default_check_time() -> NaiveTime {
    NaiveTime::from_hms_opt(3, 0, 0).expect("03:00:00 is a valid time")
}

impl AgentSettings {
    /// Loads settings from `path`, falling back to defaults when the file
    /// is absent or unreadable. Configuration problems are logged, never
    /// fatal; the agent would rather idle than refuse to start.
    pub async fn load(path: &Path) -> Self {
        match tokio::fs::read_to_string(path).await {
            Ok(body) => match serde_json::from_str(&body) {
                Ok(settings) => {
                    info!(path = %path.display(), "loaded agent configuration");
                    settings
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "invalid agent configuration, using defaults");
                    Self::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no agent configuration found, using defaults");
                Self::default()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unable to read agent configuration, using defaults");
                Self::default()
            }
        }
    }

    /// Persists the settings as pretty-printed JSON.
    ///
    /// Callers that share the file with other writers are expected to hold
    /// their own guard around this call; see the scheduler's config lock.
    pub async fn save(&self, path: &Path) -> Result<(), AgentError> {
        info!(path = %path.display(), "saving agent configuration");
        let body = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, body).await?;
        Ok(())
    }

    /// Computes the next check instant: the *following* day's occurrence of
    /// [`check_time`](Self::check_time), matching the original once-a-day
    /// cadence (today's occurrence is never chosen, even when it is still
    /// ahead of `now`).
    pub fn next_check_after(&self, now: DateTime<Local>) -> DateTime<Local> {
        let tomorrow = now.date_naive() + chrono::Days::new(1);
        match tomorrow.and_time(self.check_time).and_local_timezone(Local) {
            chrono::LocalResult::Single(dt) => dt,
            chrono::LocalResult::Ambiguous(earliest, _) => earliest,
            // DST gap swallowed the configured wall time; fall back to a
            // plain 24h offset.
            chrono::LocalResult::None => now + chrono::Duration::days(1),
        }
    }
}
