//! Status file written by the running daemon after every cycle and read by
//! `usagelamp status` from another process.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::usage::{UsageSnapshot, UsageSource};

/// Last cycle outcome as seen by the daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonStatusRecord {
    /// Daemon process ID
    pub pid: u32,
    /// Source of the applied snapshot
    pub source: UsageSource,
    /// Applied fraction (0-1)
    pub percentage: f64,
    /// Breakdown shown to the user
    pub details: String,
    /// When the cycle finished
    pub updated_at: DateTime<Utc>,
    /// Whether the light accepted the last command
    pub light_ok: bool,
    /// Bridge error for the last command, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub light_error: Option<String>,
}

impl DaemonStatusRecord {
    pub fn from_cycle(snapshot: &UsageSnapshot, light_error: Option<String>) -> Self {
        Self {
            pid: std::process::id(),
            source: snapshot.source,
            percentage: snapshot.percentage,
            details: snapshot.details.clone(),
            updated_at: Utc::now(),
            light_ok: light_error.is_none(),
            light_error,
        }
    }
}

/// Manager for the status file
#[derive(Debug, Clone)]
pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the path to the status file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the record atomically using a temp file
    pub fn write(&self, record: &DaemonStatusRecord) -> Result<()> {
        let json = serde_json::to_string_pretty(record).context("Failed to serialize status")?;

        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create state directory: {:?}", dir))?;
        }

        let temp_path = self.path.with_extension("tmp");
        let _ = fs::remove_file(&temp_path);

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .with_context(|| format!("Failed to create temp status file: {:?}", temp_path))?;
        file.write_all(json.as_bytes())
            .with_context(|| format!("Failed to write temp status file: {:?}", temp_path))?;

        fs::rename(&temp_path, &self.path)
            .with_context(|| format!("Failed to rename status file: {:?}", self.path))?;
        Ok(())
    }

    pub fn read(&self) -> Result<DaemonStatusRecord> {
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read status file: {:?}", self.path))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse status file: {:?}", self.path))
    }

    /// Remove the status file (missing file is fine)
    pub fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                Err(e).with_context(|| format!("Failed to remove status file: {:?}", self.path))
            }
        }
    }
}
