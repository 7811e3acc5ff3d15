//! The per-application update state machine.
//!
//! [`UpdateEngine::update`] is the unit of work, invoked once per
//! (application, install target) per scheduler tick. The steps run
//! strictly in order with short-circuit exits:
//!
//! 1. Ensure the install directory exists (fresh installs are normal).
//! 2. Probe the installed file version; exact string equality against the
//!    package version decides whether anything needs to happen.
//! 3. Up to date: relaunch the process if it is not running, otherwise do
//!    nothing. No download, no extraction.
//! 4. Fetch: a local source file is used in place; a remote source is
//!    downloaded to a private temp file, authenticating first when client
//!    credentials are configured.
//! 5. Integrity gate: the archive's MD5 must match the manifest checksum.
//! 6. Before-install hook (best effort).
//! 7. Stop the running process, then wait the settle delay so the OS can
//!    release file handles.
//! 8. Extract the archive over the install directory.
//! 9. Restore the executable bit on the launch target (POSIX).
//! 10. After-install hook (best effort).
//! 11. Relaunch, unless the after-install hook already started it.
//! 12. Remove the temp download (guaranteed by scope on every exit path).
//!
//! The engine is the failure isolation boundary: [`UpdateEngine::update`]
//! never returns an error. Every operational failure is logged and folded
//! into [`UpdateOutcome::Failed`] so one broken application cannot starve
//! the rest of the fleet.

mod archive;

use std::path::{Path, PathBuf};
use std::time::Duration;

use md5::{Digest, Md5};
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::auth;
use crate::config::ClientCredentials;
use crate::constants::{INSTALL_HOOK_TIMEOUT, PROCESS_SETTLE_DELAY};
use crate::core::AgentError;
use crate::manifest::{Application, Package, local_file_path};
use crate::process::{ProcessSupervisor, SystemProcessSupervisor};
use crate::version::{PeVersionProbe, VersionProbe};

/// What an [`UpdateEngine::update`] invocation ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Installed version matches and the process is already running.
    UpToDate,
    /// Installed version matches; the process was dead and was restarted.
    Relaunched,
    /// The package was fetched, verified, and applied.
    Updated,
    /// The application is not installed and fresh installs are disabled.
    Skipped,
    /// An operational failure occurred; details are in the log.
    Failed,
}

/// Drives the update state machine for one application at a time.
pub struct UpdateEngine {
    http: reqwest::Client,
    manifest_uri: Url,
    credentials: Option<ClientCredentials>,
    supervisor: Box<dyn ProcessSupervisor>,
    version_probe: Box<dyn VersionProbe>,
    allow_installs: bool,
    settle_delay: Duration,
    download_dir: Option<PathBuf>,
}

impl UpdateEngine {
    /// Creates an engine with the system process supervisor and PE version
    /// probe. The manifest URI supplies the origin for token exchanges.
    pub fn new(manifest_uri: Url, credentials: Option<ClientCredentials>) -> Self {
        Self {
            http: reqwest::Client::new(),
            manifest_uri,
            credentials,
            supervisor: Box::new(SystemProcessSupervisor),
            version_probe: Box::new(PeVersionProbe),
            allow_installs: true,
            settle_delay: PROCESS_SETTLE_DELAY,
            download_dir: None,
        }
    }

    /// Replaces the process supervisor (used by tests and by platforms
    /// with bespoke process control).
    #[must_use]
    pub fn with_supervisor(mut self, supervisor: Box<dyn ProcessSupervisor>) -> Self {
        self.supervisor = supervisor;
        self
    }

    /// Replaces the version probe.
    #[must_use]
    pub fn with_version_probe(mut self, probe: Box<dyn VersionProbe>) -> Self {
        self.version_probe = probe;
        self
    }

    /// Controls whether a missing version file may be treated as a fresh
    /// install (defaults to true).
    #[must_use]
    pub fn with_allow_installs(mut self, allow_installs: bool) -> Self {
        self.allow_installs = allow_installs;
        self
    }

    /// Overrides the post-kill settle delay.
    #[must_use]
    pub fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }

    /// Places temp downloads in a specific directory instead of the OS
    /// default. Lets tests verify that no download file outlives an
    /// update, whichever way it ends.
    #[must_use]
    pub fn with_download_dir(mut self, download_dir: PathBuf) -> Self {
        self.download_dir = Some(download_dir);
        self
    }

    /// Brings one installed application to the given package version.
    ///
    /// Idempotent: repeated invocation with nothing changed performs only
    /// the cheap version probe. Never returns an error; failures are
    /// logged and reported as [`UpdateOutcome::Failed`].
    pub async fn update(
        &self,
        app: &Application,
        package: &Package,
        install_uri: &Url,
    ) -> UpdateOutcome {
        match self.try_update(app, package, install_uri).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(app = %app.name, package = %package.id, error = %e, "unable to update application");
                UpdateOutcome::Failed
            }
        }
    }

    async fn try_update(
        &self,
        app: &Application,
        package: &Package,
        install_uri: &Url,
    ) -> Result<UpdateOutcome, AgentError> {
        let install_dir = local_file_path(install_uri).ok_or_else(|| AgentError::Config {
            message: format!("install URI '{install_uri}' is not a local path"),
        })?;

        // STEP 1 - Make sure the install target exists.
        tokio::fs::create_dir_all(&install_dir).await?;

        // STEP 2 - Probe the installed version.
        let version_path = install_dir.join(&app.version_filename);
        let installed = self.version_probe.file_version(&version_path)?;
        info!(
            app = %app.name,
            installed = installed.as_deref().unwrap_or("<none>"),
            available = %package.file_version,
            "checked installed version"
        );

        // STEP 3 - Up-to-date branch: at most a self-healing relaunch.
        if installed.as_deref() == Some(package.file_version.as_str()) {
            if self.supervisor.find(&app.exe_filename).is_empty() {
                info!(app = %app.name, "application up to date but not running, relaunching");
                self.supervisor.start(&install_dir, &app.exe_filename, &app.command_line)?;
                return Ok(UpdateOutcome::Relaunched);
            }
            debug!(app = %app.name, "application is up to date");
            return Ok(UpdateOutcome::UpToDate);
        }

        if installed.is_none() && !version_path.exists() && !self.allow_installs {
            warn!(app = %app.name, "application is not installed and installs are disabled, skipping");
            return Ok(UpdateOutcome::Skipped);
        }

        // STEP 4 - Fetch. A local source is used in place; a remote source
        // lands in a temp file whose lifetime covers the remaining steps.
        let mut download: Option<NamedTempFile> = None;
        let archive_path: PathBuf = match local_file_path(&package.source_uri) {
            Some(path) => path,
            None => {
                let token = match &self.credentials {
                    Some(credentials) if credentials.is_complete() => Some(
                        auth::exchange_token(&self.http, &self.manifest_uri, credentials).await?,
                    ),
                    _ => None,
                };

                info!(app = %app.name, source = %package.source_uri, "downloading package");
                let mut request = self.http.get(package.source_uri.clone());
                if let Some(token) = &token {
                    request = request.bearer_auth(token);
                }
                let mut response = request
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(|source| AgentError::Transport {
                        operation: "package download".to_string(),
                        source,
                    })?;

                let temp = match &self.download_dir {
                    Some(dir) => NamedTempFile::new_in(dir)?,
                    None => NamedTempFile::new()?,
                };
                // Streamed to disk; archives can exceed the memory budget
                // of small targets.
                let mut out = tokio::fs::File::create(temp.path()).await?;
                while let Some(chunk) =
                    response.chunk().await.map_err(|source| AgentError::Transport {
                        operation: "package download".to_string(),
                        source,
                    })?
                {
                    out.write_all(&chunk).await?;
                }
                out.flush().await?;
                drop(out);
                let path = temp.path().to_path_buf();
                download = Some(temp);
                path
            }
        };

        // STEP 5 - Integrity gate. A mismatch leaves the install untouched.
        let computed = checksum_md5(&archive_path).await?;
        if !computed.eq_ignore_ascii_case(&package.checksum) {
            return Err(AgentError::ChecksumMismatch {
                package: package.id.to_string(),
                expected: package.checksum.to_lowercase(),
                computed,
            });
        }
        debug!(app = %app.name, checksum = %computed, "package checksum verified");

        // STEP 6 - Before-install hook, best effort.
        if !app.before_install_command.trim().is_empty() {
            self.run_install_hook("before-install", &app.before_install_command, &install_dir)
                .await;
        }

        // STEP 7 - Stop the running process and let file handles settle.
        let killed = self.supervisor.terminate(&app.exe_filename)?;
        info!(app = %app.name, killed, "stopped running processes");
        tokio::time::sleep(self.settle_delay).await;

        // STEP 8 - Extract over the install directory.
        let extract_archive = archive_path.clone();
        let extract_dest = install_dir.clone();
        let extracted =
            tokio::task::spawn_blocking(move || archive::extract_archive(&extract_archive, &extract_dest))
                .await
                .map_err(|e| AgentError::Io(std::io::Error::other(e)))??;
        info!(app = %app.name, extracted, "package extracted");

        // STEP 9 - Zip archives rarely preserve POSIX permissions.
        #[cfg(unix)]
        restore_executable_bit(&install_dir.join(&app.exe_filename))?;

        // STEP 10 - After-install hook, best effort.
        if !app.after_install_command.trim().is_empty() {
            self.run_install_hook("after-install", &app.after_install_command, &install_dir)
                .await;
        }

        // STEP 11 - Relaunch, unless the hook already brought it up.
        if self.supervisor.find(&app.exe_filename).is_empty() {
            self.supervisor.start(&install_dir, &app.exe_filename, &app.command_line)?;
        } else {
            debug!(app = %app.name, "process already running after install, skipping relaunch");
        }

        // STEP 12 - Temp download removed when `download` drops.
        drop(download);
        Ok(UpdateOutcome::Updated)
    }

    /// Runs an install hook through the platform shell with a bounded
    /// wait. Hook failures are logged but never abort the update.
    async fn run_install_hook(&self, stage: &str, command: &str, install_dir: &Path) {
        let (shell, flag) = shell_command();
        info!(stage, command, "running install hook");
        let result = tokio::time::timeout(
            INSTALL_HOOK_TIMEOUT,
            tokio::process::Command::new(shell)
                .arg(flag)
                .arg(command)
                .current_dir(install_dir)
                .stdin(std::process::Stdio::null())
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .status(),
        )
        .await;

        match result {
            Ok(Ok(status)) if status.success() => debug!(stage, "install hook completed"),
            Ok(Ok(status)) => warn!(stage, %status, "install hook exited with failure"),
            Ok(Err(e)) => warn!(stage, error = %e, "install hook failed to run"),
            Err(_) => warn!(stage, "install hook timed out"),
        }
    }
}

/// Platform shell pair used to run install hook command strings.
const fn shell_command() -> (&'static str, &'static str) {
    if cfg!(windows) { ("cmd", "/C") } else { ("sh", "-c") }
}

/// Computes the lowercase hex MD5 digest of a file's bytes.
///
/// This is the integrity gate digest; manifest authors publish the same
/// value in the package's `checksum` field.
pub async fn checksum_md5(path: &Path) -> Result<String, AgentError> {
    let bytes = tokio::fs::read(path).await?;
    Ok(md5_hex(&bytes))
}

/// MD5 over a byte slice as lowercase hex.
pub fn md5_hex(bytes: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(unix)]
fn restore_executable_bit(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    if path.exists() {
        let mut perms = std::fs::metadata(path)?.permissions();
        perms.set_mode(perms.mode() | 0o755);
        std::fs::set_permissions(path, perms)?;
    }
    Ok(())
}
