//! Package archive extraction.

use std::io::BufReader;
use std::path::Path;

use tracing::{debug, warn};

use crate::core::AgentError;

/// Unzips every archive entry into `dest`, creating subdirectories as
/// needed and overwriting existing files in place. Returns the number of
/// files written.
///
/// Extraction is not transactional: a crash mid-way can leave a
/// half-updated install directory. Entries whose names escape the
/// destination are skipped.
pub(crate) fn extract_archive(archive_path: &Path, dest: &Path) -> Result<usize, AgentError> {
    let file = std::fs::File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file))?;

    let mut extracted = 0;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let Some(relative) = entry.enclosed_name() else {
            warn!(entry = entry.name(), "skipping archive entry with unsafe path");
            continue;
        };

        let target = dest.join(&relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = std::fs::File::create(&target)?;
        std::io::copy(&mut entry, &mut out)?;
        extracted += 1;
    }

    debug!(archive = %archive_path.display(), dest = %dest.display(), extracted, "archive extracted");
    Ok(extracted)
}
