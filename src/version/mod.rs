//! Installed-version probing.
//!
//! The version oracle for an installed application is the embedded
//! file-version string of its `versionFilename` - a binary metadata field,
//! not the filename. Deployed applications here are PE images (native
//! executables or .NET assemblies, which are PE even on Linux IoT
//! targets), so the default probe reads the `VS_FIXEDFILEINFO` file
//! version from the PE version resource.
//!
//! The probe sits behind the [`VersionProbe`] trait so the update engine
//! can be exercised in tests without fabricating PE binaries.

use std::path::Path;

use tracing::debug;

use crate::core::AgentError;

/// Reads the embedded file-version string of an installed file.
pub trait VersionProbe: Send + Sync {
    /// Returns `Ok(None)` when the file is missing (the application is not
    /// installed) or carries no readable version; both cases send the
    /// engine down the fetch path.
    fn file_version(&self, path: &Path) -> Result<Option<String>, AgentError>;
}

/// [`VersionProbe`] reading `dwFileVersion` from a PE version resource.
#[derive(Debug, Default)]
pub struct PeVersionProbe;

impl VersionProbe for PeVersionProbe {
    fn file_version(&self, path: &Path) -> Result<Option<String>, AgentError> {
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(path)?;
        match pe_file_version(&bytes) {
            Some(version) => {
                debug!(path = %path.display(), version = %version, "probed file version");
                Ok(Some(version))
            }
            None => {
                // A file without a parsable version resource probes the
                // same as an unversioned install: the update proceeds.
                debug!(path = %path.display(), "no file version resource found");
                Ok(None)
            }
        }
    }
}

/// Extracts `major.minor.patch.build` from a PE image's version resource.
fn pe_file_version(bytes: &[u8]) -> Option<String> {
    let file = pelite::PeFile::from_bytes(bytes).ok()?;
    let resources = file.resources().ok()?;
    let version_info = resources.version_info().ok()?;
    let fixed = version_info.fixed()?;
    let v = fixed.dwFileVersion;
    Some(format!("{}.{}.{}.{}", v.Major, v.Minor, v.Patch, v.Build))
}
