//! Shared test doubles for exercising the update engine without touching
//! real processes or PE binaries.
//!
//! Only compiled with the `test-utils` feature, which the crate's own
//! dev-dependency enables for the integration suite.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::core::AgentError;
use crate::process::{ProcessInfo, ProcessSupervisor};
use crate::version::VersionProbe;

/// One recorded [`ProcessSupervisor::start`] invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRecord {
    /// Working directory the process was started in.
    pub install_dir: PathBuf,
    /// Executable filename.
    pub exe: String,
    /// Argument string.
    pub args: String,
}

#[derive(Default)]
struct MockState {
    running: AtomicBool,
    started: Mutex<Vec<StartRecord>>,
    terminated: Mutex<Vec<String>>,
}

/// In-memory [`ProcessSupervisor`] that records every call.
///
/// Clones share state, so tests keep one handle and hand another to the
/// engine.
#[derive(Default, Clone)]
pub struct MockProcessSupervisor {
    inner: Arc<MockState>,
}

impl MockProcessSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the supervised process as running or stopped.
    pub fn set_running(&self, running: bool) {
        self.inner.running.store(running, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Every start call recorded so far.
    pub fn started(&self) -> Vec<StartRecord> {
        self.inner.started.lock().unwrap().clone()
    }

    /// Every terminate call recorded so far.
    pub fn terminated(&self) -> Vec<String> {
        self.inner.terminated.lock().unwrap().clone()
    }
}

impl ProcessSupervisor for MockProcessSupervisor {
    fn find(&self, exe_filename: &str) -> Vec<ProcessInfo> {
        if self.is_running() {
            vec![ProcessInfo { pid: 4242, name: exe_filename.to_string() }]
        } else {
            Vec::new()
        }
    }

    fn terminate(&self, exe_filename: &str) -> Result<usize, AgentError> {
        self.inner.terminated.lock().unwrap().push(exe_filename.to_string());
        Ok(usize::from(self.inner.running.swap(false, Ordering::SeqCst)))
    }

    fn start(
        &self,
        install_dir: &Path,
        exe_filename: &str,
        command_line: &str,
    ) -> Result<(), AgentError> {
        self.inner.started.lock().unwrap().push(StartRecord {
            install_dir: install_dir.to_path_buf(),
            exe: exe_filename.to_string(),
            args: command_line.to_string(),
        });
        self.set_running(true);
        Ok(())
    }
}

/// [`VersionProbe`] that treats the version file's *contents* as the
/// version string, so fixtures are plain text instead of PE images.
#[derive(Debug, Default, Clone)]
pub struct TextVersionProbe;

impl VersionProbe for TextVersionProbe {
    fn file_version(&self, path: &Path) -> Result<Option<String>, AgentError> {
        if !path.exists() {
            return Ok(None);
        }
        let body = std::fs::read_to_string(path)?;
        let version = body.trim();
        Ok(if version.is_empty() { None } else { Some(version.to_string()) })
    }
}

/// Writes a zip archive with the given (name, body) entries.
pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    use std::io::Write;
    let file = std::fs::File::create(path).expect("create zip fixture");
    let mut writer = zip::ZipWriter::new(file);
    for (name, body) in entries {
        writer
            .start_file(*name, zip::write::SimpleFileOptions::default())
            .expect("start zip entry");
        writer.write_all(body).expect("write zip entry");
    }
    writer.finish().expect("finish zip fixture");
}
