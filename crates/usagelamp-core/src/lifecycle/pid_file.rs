//! Single-instance enforcement through a PID marker file.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::sys::signal;
use nix::unistd::Pid;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Lifecycle failures
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// A live daemon already holds the marker
    #[error("usagelamp is already running (PID {pid})")]
    AlreadyRunning { pid: u32 },

    /// Signalling the daemon failed for a reason other than "no such process"
    #[error("failed to signal PID {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: Errno,
    },

    /// Reading or writing the marker failed
    #[error("PID file error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LifecycleError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Whether `pid` names a live process on this machine
pub fn is_process_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    match signal::kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        // Exists but belongs to someone else
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Read the PID stored in the marker
///
/// `Ok(None)` when the file is missing or does not hold a PID.
pub fn read_pid(path: &Path) -> Result<Option<u32>, LifecycleError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content.trim().parse().ok()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(LifecycleError::io(path, e)),
    }
}

/// Remove the marker (missing file is fine)
pub(crate) fn remove_marker(path: &Path) -> Result<(), LifecycleError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(LifecycleError::io(path, e)),
    }
}

/// Manage the PID marker at a given path
///
/// Acquired at start, released at clean shutdown (or on drop).
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    acquired: bool,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            acquired: false,
        }
    }

    /// Take ownership of the marker for the current process
    ///
    /// A marker naming a dead process is treated as stale and replaced.
    pub fn acquire(&mut self) -> Result<(), LifecycleError> {
        if let Some(pid) = read_pid(&self.path)? {
            if pid != std::process::id() && is_process_alive(pid) {
                return Err(LifecycleError::AlreadyRunning { pid });
            }
            warn!(pid, path = %self.path.display(), "Removing stale PID file");
            remove_marker(&self.path)?;
        } else if self.path.exists() {
            warn!(path = %self.path.display(), "Removing unreadable PID file");
            remove_marker(&self.path)?;
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| LifecycleError::io(parent, e))?;
        }

        // create_new so two racing starters cannot both win
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let pid = read_pid(&self.path)?.unwrap_or_default();
                return Err(LifecycleError::AlreadyRunning { pid });
            }
            Err(e) => return Err(LifecycleError::io(&self.path, e)),
        };

        let pid = std::process::id();
        writeln!(file, "{}", pid).map_err(|e| LifecycleError::io(&self.path, e))?;

        self.acquired = true;
        info!(pid, path = %self.path.display(), "PID file acquired");
        Ok(())
    }

    /// Remove the marker. No-op if not acquired or already released.
    pub fn release(&mut self) {
        if !self.acquired {
            return;
        }
        self.acquired = false;
        match remove_marker(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "PID file released"),
            Err(e) => warn!("Failed to remove PID file: {}", e),
        }
    }

    pub fn is_acquired(&self) -> bool {
        self.acquired
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        self.release();
    }
}
