//! Operations invoked from outside the daemon: stop, is-running, status.

use std::path::Path;

use chrono::{DateTime, Utc};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use serde::Serialize;
use tracing::info;

use super::pid_file::{is_process_alive, read_pid, remove_marker, LifecycleError};
use crate::state::StatusFile;
use crate::usage::UsageSource;

/// Result of a `stop` request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// SIGTERM delivered to the daemon
    Stopped { pid: u32 },
    /// No marker present
    NotRunning,
    /// The marker named a dead process and was removed
    StaleMarkerRemoved { pid: u32 },
}

/// Signal the running daemon to shut down
pub fn stop(pid_path: &Path) -> Result<StopOutcome, LifecycleError> {
    let Some(pid) = read_pid(pid_path)? else {
        if pid_path.exists() {
            remove_marker(pid_path)?;
        }
        return Ok(StopOutcome::NotRunning);
    };

    let target = i32::try_from(pid).ok().filter(|p| *p > 0);
    let result = match target {
        Some(raw) => signal::kill(Pid::from_raw(raw), Signal::SIGTERM),
        None => Err(Errno::ESRCH),
    };

    match result {
        Ok(()) => {
            info!(pid, "Sent SIGTERM");
            Ok(StopOutcome::Stopped { pid })
        }
        Err(Errno::ESRCH) => {
            remove_marker(pid_path)?;
            Ok(StopOutcome::StaleMarkerRemoved { pid })
        }
        Err(source) => Err(LifecycleError::Signal { pid, source }),
    }
}

/// Whether a live daemon holds the marker
pub fn is_running(pid_path: &Path) -> bool {
    matches!(read_pid(pid_path), Ok(Some(pid)) if is_process_alive(pid))
}

/// Status as reported to the CLI
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DaemonStatus {
    pub running: bool,
    pub pid: Option<u32>,
    pub source: Option<UsageSource>,
    pub percentage: Option<f64>,
    pub details: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    pub light_ok: Option<bool>,
}

impl DaemonStatus {
    fn not_running() -> Self {
        Self {
            running: false,
            pid: None,
            source: None,
            percentage: None,
            details: None,
            updated_at: None,
            light_ok: None,
        }
    }
}

/// Collect the daemon's last reported status
///
/// A status file left behind by a dead daemon is ignored.
pub fn current_status(pid_path: &Path, status_path: &Path) -> DaemonStatus {
    let pid = match read_pid(pid_path) {
        Ok(Some(pid)) if is_process_alive(pid) => pid,
        _ => return DaemonStatus::not_running(),
    };

    match StatusFile::new(status_path).read() {
        Ok(record) if record.pid == pid => DaemonStatus {
            running: true,
            pid: Some(pid),
            source: Some(record.source),
            percentage: Some(record.percentage),
            details: Some(record.details),
            updated_at: Some(record.updated_at),
            light_ok: Some(record.light_ok),
        },
        _ => DaemonStatus {
            running: true,
            pid: Some(pid),
            ..DaemonStatus::not_running()
        },
    }
}
