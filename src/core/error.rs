//! Error handling for the update agent.
//!
//! The agent uses two layers, the same split used throughout the codebase:
//! 1. [`AgentError`] - strongly-typed failure cases for precise matching
//! 2. [`anyhow::Result`] with `.context()` at operation boundaries
//!
//! # Error Categories
//!
//! - **Configuration**: [`AgentError::Config`] - missing or invalid manifest
//!   URI, malformed install targets
//! - **Transport**: [`AgentError::Transport`] - manifest or package fetch
//!   failures
//! - **Parsing**: [`AgentError::ManifestParse`] - malformed manifest JSON
//! - **Integrity**: [`AgentError::ChecksumMismatch`] - package checksum gate
//! - **Authorization**: [`AgentError::AuthRejected`] - token exchange refused
//! - **Processes**: [`AgentError::Process`] - failed process start or stop
//!
//! Per-package update failures of every category are caught inside the
//! update engine and logged; they never cross the engine boundary. Manifest
//! load/save failures propagate to the scheduler, which logs and waits for
//! the next due tick.

use thiserror::Error;

/// The main error type for update agent operations.
///
/// Each variant represents a specific failure mode with enough context to
/// produce an actionable log record. The agent is headless, so these
/// messages are written for log readers, not interactive users.
#[derive(Error, Debug)]
pub enum AgentError {
    /// Host configuration is missing or invalid.
    ///
    /// Raised for an absent manifest URI, an install URI that is not a
    /// local path, and similar misconfiguration that no retry can fix.
    #[error("configuration error: {message}")]
    Config {
        /// Description of the configuration problem
        message: String,
    },

    /// The manifest is remote and cannot be written from this host.
    ///
    /// [`ManifestStore::save`](crate::manifest::ManifestStore::save) only
    /// supports `file://` manifest URIs; a remote manifest is read-only
    /// from the agent's perspective.
    #[error("manifest '{uri}' is remote and cannot be saved from this host")]
    ManifestReadOnly {
        /// The offending manifest URI
        uri: String,
    },

    /// A network operation failed.
    ///
    /// Covers manifest GETs, token exchanges that never produced a
    /// response, and package downloads.
    #[error("transport failure during {operation}")]
    Transport {
        /// The operation that failed (e.g. "manifest fetch", "package download")
        operation: String,
        /// The underlying HTTP client error
        #[source]
        source: reqwest::Error,
    },

    /// The manifest body could not be parsed.
    ///
    /// Parsing failures fail the whole load; the previous in-memory
    /// collection is left untouched.
    #[error("failed to parse manifest from '{uri}': {reason}")]
    ManifestParse {
        /// The manifest URI that produced the bad document
        uri: String,
        /// The parser's description of the problem
        reason: String,
    },

    /// Package integrity verification failed.
    ///
    /// The computed MD5 of the fetched archive does not match the checksum
    /// declared in the manifest. This is a security boundary; the install
    /// directory is left untouched.
    #[error("checksum mismatch for package '{package}': expected {expected}, computed {computed}")]
    ChecksumMismatch {
        /// The package id whose archive failed verification
        package: String,
        /// The checksum declared in the manifest
        expected: String,
        /// The checksum computed over the fetched bytes
        computed: String,
    },

    /// The token exchange was rejected by the manifest host.
    ///
    /// Any non-200 response is an authorization failure; the agent never
    /// falls back to an unauthenticated download.
    #[error("token exchange rejected with HTTP status {status}")]
    AuthRejected {
        /// The HTTP status returned by the token endpoint
        status: u16,
    },

    /// A process could not be started or stopped.
    #[error("process {operation} failed for '{exe}': {reason}")]
    Process {
        /// The operation that failed ("start" or "kill")
        operation: String,
        /// The executable filename involved
        exe: String,
        /// Why the operation failed
        reason: String,
    },

    /// Archive extraction failed.
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// JSON (de)serialization error outside of manifest parsing.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error from the standard library.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
