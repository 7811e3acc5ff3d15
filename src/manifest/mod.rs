//! App update manifest model and store.
//!
//! The manifest is the published catalogue of applications and their
//! packages, serialized as a JSON array of [`Application`] records:
//!
//! ```json
//! [{
//!   "id": "04fc007e-db18-430f-b4fa-f5b54de1e142",
//!   "name": "Test App 01",
//!   "description": "Test App 01",
//!   "exeFilename": "testapp.exe",
//!   "versionFilename": "testapp.dll",
//!   "commandLine": "param1",
//!   "beforeInstallCommand": "",
//!   "afterInstallCommand": "",
//!   "packages": [{
//!     "id": "61038014-97c6-418a-9262-94d78db167e8",
//!     "isAvailable": true,
//!     "fileVersion": "1.0.1.0",
//!     "releaseDateUtc": "2018-10-02T00:00:00Z",
//!     "sourceUri": "https://host/packages/testapp_1010.zip",
//!     "checksum": "0536276ab1e17869083e9aa5fbbe29ec"
//!   }]
//! }]
//! ```
//!
//! [`ManifestStore`] owns the loaded collection. The manifest is never
//! cached: the scheduler reloads it on every check cycle so edits made by
//! the publishing side take effect without restarting the agent. A
//! successful load fully replaces the previous in-memory collection.
//!
//! The application list is the sole owner of the object graph; the engine
//! receives `(&Application, &Package)` borrows instead of the back-pointers
//! a garbage-collected implementation would use.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;
use url::Url;
use uuid::Uuid;

use crate::core::AgentError;

/// A deployable program described by the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    /// Stable identity across manifest revisions.
    pub id: Uuid,
    /// Human-readable name, used only in log records.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// The launch target inside the install directory.
    pub exe_filename: String,
    /// The file whose embedded file-version string is the version oracle.
    ///
    /// May differ from the launch target (e.g. a library DLL next to a
    /// host executable).
    pub version_filename: String,
    /// Arguments passed to the launch target.
    #[serde(default)]
    pub command_line: String,
    /// Optional shell command run in the install directory before extraction.
    #[serde(default)]
    pub before_install_command: String,
    /// Optional shell command run in the install directory after extraction.
    #[serde(default)]
    pub after_install_command: String,
    /// Published builds, ordered as authored.
    #[serde(default)]
    pub packages: Vec<Package>,
}

/// One published, immutable build of an [`Application`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    /// Package identity, unique within a loaded manifest.
    pub id: Uuid,
    /// Soft-delete / staged-rollout flag. Unavailable packages are never
    /// selected for install.
    pub is_available: bool,
    /// Version string compared by exact equality against the installed
    /// file version. Deliberately not parsed as semver; downgrades are
    /// possible but not auto-detected.
    pub file_version: String,
    /// Publication timestamp; the latest available package wins.
    pub release_date_utc: DateTime<Utc>,
    /// Local file or remote URL of the zip archive.
    pub source_uri: Url,
    /// Lowercase hex MD5 digest of the archive bytes.
    pub checksum: String,
}

impl Application {
    /// Returns the available package with the maximal `release_date_utc`.
    ///
    /// Ties on the release date are broken deterministically by package id
    /// rather than by load order, so two hosts reading the same manifest
    /// always agree on the winner. Returns `None` when no package is
    /// available.
    pub fn latest_package(&self) -> Option<&Package> {
        self.packages.iter().filter(|p| p.is_available).max_by(|a, b| {
            a.release_date_utc.cmp(&b.release_date_utc).then_with(|| a.id.cmp(&b.id))
        })
    }
}

impl std::fmt::Display for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}, {} packages)", self.name, self.id, self.packages.len())
    }
}

impl std::fmt::Display for Package {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} v{} released {}", self.id, self.file_version, self.release_date_utc)
    }
}

/// Resolves a `file://` URL to a local filesystem path.
///
/// Returns `None` for any other scheme or for file URLs that do not map
/// onto a path on this host.
pub fn local_file_path(url: &Url) -> Option<PathBuf> {
    if url.scheme() == "file" { url.to_file_path().ok() } else { None }
}

/// Loads and saves the ordered application collection.
///
/// The store resolves the manifest URI on every [`load`](Self::load): a
/// `file://` URI is read from disk (an absent file is an empty manifest,
/// not an error), anything else is fetched with an HTTP GET. Saving is
/// only supported for file-backed manifests and is guarded by a mutex so a
/// scheduler-triggered save cannot interleave with another in-process
/// writer.
#[derive(Debug)]
pub struct ManifestStore {
    manifest_uri: Url,
    http: reqwest::Client,
    applications: Vec<Application>,
    is_loaded: bool,
    write_lock: Mutex<()>,
}

impl ManifestStore {
    /// Creates a store for the given manifest URI. Nothing is loaded yet.
    pub fn new(manifest_uri: Url) -> Self {
        Self {
            manifest_uri,
            http: reqwest::Client::new(),
            applications: Vec::new(),
            is_loaded: false,
            write_lock: Mutex::new(()),
        }
    }

    /// The manifest URI this store reads from.
    pub fn manifest_uri(&self) -> &Url {
        &self.manifest_uri
    }

    /// True once a load has completed successfully.
    pub fn is_loaded(&self) -> bool {
        self.is_loaded
    }

    /// The applications from the most recent successful load.
    pub fn applications(&self) -> &[Application] {
        &self.applications
    }

    /// Mutable access for manifest authoring (followed by [`save`](Self::save)).
    pub fn applications_mut(&mut self) -> &mut Vec<Application> {
        &mut self.applications
    }

    /// Looks up an application by its stable id.
    pub fn find_application(&self, id: Uuid) -> Option<&Application> {
        self.applications.iter().find(|a| a.id == id)
    }

    /// Reloads the manifest from its source.
    ///
    /// On success the in-memory collection is completely replaced; a parse
    /// failure fails the whole load and leaves the previous collection
    /// untouched.
    pub async fn load(&mut self) -> Result<(), AgentError> {
        info!(manifest = %self.manifest_uri, "loading manifest");
        let body = match local_file_path(&self.manifest_uri) {
            Some(path) => {
                if !path.exists() {
                    info!(path = %path.display(), "manifest file does not exist, using empty manifest");
                    self.applications = Vec::new();
                    self.is_loaded = true;
                    return Ok(());
                }
                tokio::fs::read_to_string(&path).await?
            }
            None => self
                .http
                .get(self.manifest_uri.clone())
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|source| AgentError::Transport {
                    operation: "manifest fetch".to_string(),
                    source,
                })?
                .text()
                .await
                .map_err(|source| AgentError::Transport {
                    operation: "manifest fetch".to_string(),
                    source,
                })?,
        };

        let applications: Vec<Application> =
            serde_json::from_str(&body).map_err(|e| AgentError::ManifestParse {
                uri: self.manifest_uri.to_string(),
                reason: e.to_string(),
            })?;

        info!(applications = applications.len(), "manifest loaded");
        self.applications = applications;
        self.is_loaded = true;
        Ok(())
    }

    /// Serializes the application collection back to the manifest file.
    ///
    /// Returns [`AgentError::ManifestReadOnly`] when the manifest URI is
    /// not a local file.
    pub async fn save(&self) -> Result<(), AgentError> {
        let path = local_file_path(&self.manifest_uri).ok_or_else(|| {
            AgentError::ManifestReadOnly { uri: self.manifest_uri.to_string() }
        })?;

        let _guard = self.write_lock.lock().await;
        info!(path = %path.display(), "saving manifest");
        let body = serde_json::to_string_pretty(&self.applications)?;
        tokio::fs::write(&path, body).await?;
        Ok(())
    }
}
