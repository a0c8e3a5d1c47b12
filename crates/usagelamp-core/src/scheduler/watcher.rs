//! File-change watch on the local usage log.
//!
//! The log is written by another program and may not exist when the daemon
//! starts, so the watcher arms lazily: each tick calls [`LogWatcher::poll_arm`]
//! and the watch is installed once the file shows up. The parent directory is
//! watched rather than the file, since trimming replaces the file by rename.

use std::ffi::OsString;
use std::path::PathBuf;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::Trigger;

/// Watch state
pub enum WatchState {
    /// Log not seen yet
    Unarmed,
    /// Watch installed
    Armed(RecommendedWatcher),
    /// Watch unavailable; polling only from here on
    Failed,
}

impl std::fmt::Debug for WatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unarmed => write!(f, "Unarmed"),
            Self::Armed(_) => write!(f, "Armed"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Lazily-armed watcher feeding [`Trigger::LogChanged`] into the scheduler
pub struct LogWatcher {
    path: PathBuf,
    state: WatchState,
    triggers: mpsc::Sender<Trigger>,
}

impl LogWatcher {
    pub fn new(path: impl Into<PathBuf>, triggers: mpsc::Sender<Trigger>) -> Self {
        Self {
            path: path.into(),
            state: WatchState::Unarmed,
            triggers,
        }
    }

    pub fn is_armed(&self) -> bool {
        matches!(self.state, WatchState::Armed(_))
    }

    pub fn has_failed(&self) -> bool {
        matches!(self.state, WatchState::Failed)
    }

    /// Arm the watch if it is unarmed and the log now exists
    ///
    /// Returns true when this call armed it.
    pub fn poll_arm(&mut self) -> bool {
        if !matches!(self.state, WatchState::Unarmed) || !self.path.exists() {
            return false;
        }

        match self.install() {
            Ok(watcher) => {
                info!(path = %self.path.display(), "Watching usage log");
                self.state = WatchState::Armed(watcher);
                true
            }
            Err(e) => {
                self.fail(&e.to_string());
                false
            }
        }
    }

    /// Move to `Failed`, dropping any installed watch
    ///
    /// Warns only on the transition, so repeated errors stay quiet.
    pub fn fail(&mut self, reason: &str) {
        if self.has_failed() {
            debug!("Ignoring watch error after failure: {}", reason);
            return;
        }
        warn!(
            path = %self.path.display(),
            "File watch unavailable, falling back to polling: {}", reason
        );
        self.state = WatchState::Failed;
    }

    /// Release the watch handle
    pub fn close(&mut self) {
        if self.is_armed() {
            debug!(path = %self.path.display(), "Closing usage log watch");
        }
        self.state = WatchState::Unarmed;
    }

    fn install(&self) -> notify::Result<RecommendedWatcher> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = self.path.file_name().map(OsString::from);
        let triggers = self.triggers.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let trigger = match res {
                Ok(event) if touches(&event, file_name.as_deref()) => Trigger::LogChanged,
                Ok(_) => return,
                Err(e) => Trigger::WatchError(e.to_string()),
            };
            // A full queue already holds a pending cycle
            let _ = triggers.try_send(trigger);
        })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        Ok(watcher)
    }
}

/// Whether `event` is a content or name change of the watched file
fn touches(event: &Event, file_name: Option<&std::ffi::OsStr>) -> bool {
    if matches!(event.kind, EventKind::Access(_)) {
        return false;
    }
    let Some(file_name) = file_name else {
        return false;
    };
    event
        .paths
        .iter()
        .any(|p| p.file_name() == Some(file_name))
}
