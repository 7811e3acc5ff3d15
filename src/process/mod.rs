//! Platform-aware process lookup, termination, and launch.
//!
//! The update engine talks to processes only through the
//! [`ProcessSupervisor`] trait so the platform heuristics stay swappable
//! and the engine stays testable without killing anything real.
//!
//! Name matching differs by platform:
//! - **Windows**: process names carry the `.exe` extension; both sides are
//!   compared by file stem, case-insensitively.
//! - **POSIX**: the kernel truncates the comm name to 15 bytes at process
//!   creation, so the executable name is truncated the same way before an
//!   exact comparison.
//!
//! Both strategies are pure functions and unit tested on every platform.

use std::path::Path;
use std::process::Stdio;

use sysinfo::{ProcessStatus, ProcessesToUpdate, System};
use tracing::{debug, info};

use crate::constants::POSIX_COMM_NAME_LIMIT;
use crate::core::AgentError;

/// A running process matched against an application's executable name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    /// OS process id.
    pub pid: u32,
    /// Process name as reported by the OS.
    pub name: String,
}

/// Lookup, termination, and launch of application processes by name.
pub trait ProcessSupervisor: Send + Sync {
    /// Returns the currently running processes matching `exe_filename`.
    fn find(&self, exe_filename: &str) -> Vec<ProcessInfo>;

    /// Terminates every process matching `exe_filename`, returning how
    /// many were signalled. The caller owes the settle delay afterwards
    /// regardless of the count.
    fn terminate(&self, exe_filename: &str) -> Result<usize, AgentError>;

    /// Launches the executable with the install directory as its working
    /// directory and `command_line` split into arguments.
    fn start(
        &self,
        install_dir: &Path,
        exe_filename: &str,
        command_line: &str,
    ) -> Result<(), AgentError>;
}

/// Strips the extension from a filename for Windows-style matching.
fn file_stem(name: &str) -> &str {
    Path::new(name).file_stem().and_then(|s| s.to_str()).unwrap_or(name)
}

/// Truncates a name to the kernel's comm length, respecting char boundaries.
fn truncate_to_comm(name: &str) -> &str {
    if name.len() <= POSIX_COMM_NAME_LIMIT {
        return name;
    }
    let mut end = POSIX_COMM_NAME_LIMIT;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

/// Windows strategy: compare by file stem, case-insensitively.
fn matches_windows(process_name: &str, exe_filename: &str) -> bool {
    file_stem(process_name).eq_ignore_ascii_case(file_stem(exe_filename))
}

/// POSIX strategy: exact match against the raw or comm-truncated name.
fn matches_posix(process_name: &str, exe_filename: &str) -> bool {
    process_name == exe_filename || process_name == truncate_to_comm(exe_filename)
}

/// Platform-selected name matching strategy.
pub fn name_matches(process_name: &str, exe_filename: &str) -> bool {
    if cfg!(windows) {
        matches_windows(process_name, exe_filename)
    } else {
        matches_posix(process_name, exe_filename)
    }
}

/// [`ProcessSupervisor`] backed by the OS process table via `sysinfo`.
#[derive(Debug, Default)]
pub struct SystemProcessSupervisor;

impl SystemProcessSupervisor {
    fn snapshot(&self) -> System {
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::All, true);
        system
    }
}

/// A zombie or dead entry is a process that already exited; it must not
/// count as "running" or the relaunch path would never fire.
fn is_live(process: &sysinfo::Process) -> bool {
    !matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead)
}

impl ProcessSupervisor for SystemProcessSupervisor {
    fn find(&self, exe_filename: &str) -> Vec<ProcessInfo> {
        let system = self.snapshot();
        let matches: Vec<ProcessInfo> = system
            .processes()
            .iter()
            .filter_map(|(pid, process)| {
                let name = process.name().to_string_lossy();
                (is_live(process) && name_matches(&name, exe_filename)).then(|| ProcessInfo {
                    pid: pid.as_u32(),
                    name: name.into_owned(),
                })
            })
            .collect();
        debug!(exe = exe_filename, count = matches.len(), "process lookup");
        matches
    }

    fn terminate(&self, exe_filename: &str) -> Result<usize, AgentError> {
        let system = self.snapshot();
        let mut killed = 0;
        for (pid, process) in system.processes() {
            let name = process.name().to_string_lossy();
            if is_live(process) && name_matches(&name, exe_filename) {
                info!(pid = pid.as_u32(), name = %name, "killing process");
                if process.kill() {
                    killed += 1;
                } else {
                    return Err(AgentError::Process {
                        operation: "kill".to_string(),
                        exe: exe_filename.to_string(),
                        reason: format!("failed to signal pid {pid}"),
                    });
                }
            }
        }
        Ok(killed)
    }

    fn start(
        &self,
        install_dir: &Path,
        exe_filename: &str,
        command_line: &str,
    ) -> Result<(), AgentError> {
        let program = install_dir.join(exe_filename);
        info!(program = %program.display(), args = command_line, "starting process");
        let mut child = std::process::Command::new(&program)
            .args(command_line.split_whitespace())
            .current_dir(install_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| AgentError::Process {
                operation: "start".to_string(),
                exe: exe_filename.to_string(),
                reason: e.to_string(),
            })?;
        // The agent is the parent of every process it launches; the child
        // must be reaped when it exits or a later kill leaves a zombie
        // that still matches lookups.
        std::thread::spawn(move || {
            let _ = child.wait();
        });
        Ok(())
    }
}
