//! Global constants used throughout the update agent.
//!
//! This module contains the default filenames, well-known endpoint paths,
//! and timing parameters shared across modules. Defining them centrally
//! keeps the magic numbers discoverable.

use std::time::Duration;

/// Default app update manifest filename.
pub const DEFAULT_MANIFEST_FILENAME: &str = "app-update-manifest.json";

/// Default host-local agent configuration filename.
///
/// The configuration file lives beside the running executable unless an
/// explicit path is supplied on the command line.
pub const DEFAULT_CONFIG_FILENAME: &str = "app-updates-config.json";

/// Well-known token exchange path on the manifest host.
///
/// Gated package downloads authenticate by POSTing client credentials to
/// this path on the same scheme/host/port that serves the manifest.
pub const TOKEN_ENDPOINT_PATH: &str = "/appupdates/account/token";

/// Interval between scheduler ticks (60 seconds).
///
/// Each tick checks whether the configured check time has come due; the
/// check cycle itself usually runs once a day.
pub const CHECK_TICK_INTERVAL: Duration = Duration::from_secs(60);

/// Settle delay after terminating an application process (1 second).
///
/// Bridges the gap between process termination and OS file-handle release
/// so extraction does not race the dying process.
pub const PROCESS_SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Bounded wait for before/after install hook commands (60 seconds).
pub const INSTALL_HOOK_TIMEOUT: Duration = Duration::from_secs(60);

/// Maximum process name length on POSIX platforms (15 bytes).
///
/// The kernel truncates the comm name at process creation time, so the
/// executable name must be truncated the same way before matching.
pub const POSIX_COMM_NAME_LIMIT: usize = 15;
