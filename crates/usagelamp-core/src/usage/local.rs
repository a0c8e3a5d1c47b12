//! Local fallback: estimate usage by counting prompt timestamps in a rolling
//! window of the append-only log written by the prompt hook.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, warn};

use super::types::{UsageSnapshot, UsageSource};
use crate::config::LocalSettings;

/// Result of counting the log
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalCount {
    /// Entries inside the window (uncapped)
    pub count: usize,
    /// `min(count / max_events, 1)`
    pub percentage: f64,
}

/// Parse one log line as a timestamp
///
/// Accepts RFC 3339 or an integer Unix epoch (seconds below 10^11,
/// milliseconds above).
pub fn parse_timestamp(line: &str) -> Option<DateTime<Utc>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(line) {
        return Some(dt.with_timezone(&Utc));
    }
    let epoch: i64 = line.parse().ok()?;
    if epoch.abs() < 100_000_000_000 {
        DateTime::from_timestamp(epoch, 0)
    } else {
        DateTime::from_timestamp_millis(epoch)
    }
}

fn window_delta(window_ms: u64) -> TimeDelta {
    i64::try_from(window_ms)
        .ok()
        .and_then(TimeDelta::try_milliseconds)
        .unwrap_or(TimeDelta::MAX)
}

/// Read the log, treating a missing file as empty
fn read_log(path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(content) => Some(content),
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => {
            warn!("Failed to read usage log {}: {}", path.display(), e);
            None
        }
    }
}

/// Count log entries within `window_ms` of now
pub fn count(path: &Path, window_ms: u64, max_events: u32) -> LocalCount {
    count_at(path, window_ms, max_events, Utc::now())
}

/// Count log entries within `window_ms` of `now`
pub fn count_at(path: &Path, window_ms: u64, max_events: u32, now: DateTime<Utc>) -> LocalCount {
    let Some(content) = read_log(path) else {
        return LocalCount {
            count: 0,
            percentage: 0.0,
        };
    };

    let window = window_delta(window_ms);
    let count = content
        .lines()
        .filter_map(parse_timestamp)
        .filter(|ts| now.signed_duration_since(*ts) <= window)
        .count();

    let budget = max_events.max(1) as f64;
    LocalCount {
        count,
        percentage: (count as f64 / budget).min(1.0),
    }
}

/// Drop entries older than twice the window
///
/// Returns the number of lines removed. Malformed and blank lines are
/// removed too. The file is only rewritten when something changes, so
/// trimming an already-trimmed log is a no-op.
pub fn trim(path: &Path, window_ms: u64) -> Result<usize> {
    trim_at(path, window_ms, Utc::now())
}

/// [`trim`] relative to `now`
pub fn trim_at(path: &Path, window_ms: u64, now: DateTime<Utc>) -> Result<usize> {
    let Some(content) = read_log(path) else {
        return Ok(0);
    };

    let plan = plan_trim(&content, window_ms, now);
    if plan.removed == 0 {
        return Ok(0);
    }
    commit_trim(path, &plan)?;

    debug!("Trimmed {} entries from {}", plan.removed, path.display());
    Ok(plan.removed)
}

/// Outcome of filtering one read of the log
struct TrimPlan {
    kept: String,
    removed: usize,
    /// Bytes covered by the plan; anything past this is copied verbatim
    consumed: u64,
}

/// Filter the complete lines of `content`
///
/// A trailing line without a newline may still be mid-write, so it is left
/// for [`commit_trim`] to carry over untouched.
fn plan_trim(content: &str, window_ms: u64, now: DateTime<Utc>) -> TrimPlan {
    let consumed = content.rfind('\n').map_or(0, |i| i + 1);
    let keep_within = window_delta(window_ms.saturating_mul(2));
    let mut kept = String::with_capacity(consumed);
    let mut removed = 0;

    for line in content[..consumed].lines() {
        match parse_timestamp(line) {
            Some(ts) if now.signed_duration_since(ts) <= keep_within => {
                kept.push_str(line.trim());
                kept.push('\n');
            }
            _ => removed += 1,
        }
    }

    TrimPlan {
        kept,
        removed,
        consumed: consumed as u64,
    }
}

/// Replace the log with the kept lines plus whatever was appended after
/// the plan was made
fn commit_trim(path: &Path, plan: &TrimPlan) -> Result<()> {
    // Write atomically using temp file
    let temp_path = path.with_extension("trim.tmp");
    let _ = fs::remove_file(&temp_path);
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&temp_path)
        .with_context(|| format!("Failed to create temp log file: {:?}", temp_path))?;
    file.write_all(plan.kept.as_bytes())
        .with_context(|| format!("Failed to write temp log file: {:?}", temp_path))?;

    let mut tail = Vec::new();
    let mut source =
        File::open(path).with_context(|| format!("Failed to reopen usage log: {:?}", path))?;
    source
        .seek(SeekFrom::Start(plan.consumed))
        .and_then(|_| source.read_to_end(&mut tail))
        .with_context(|| format!("Failed to read usage log tail: {:?}", path))?;
    file.write_all(&tail)
        .with_context(|| format!("Failed to write temp log file: {:?}", temp_path))?;

    file.sync_all()
        .with_context(|| format!("Failed to sync temp log file: {:?}", temp_path))?;
    fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to replace usage log: {:?}", path))?;
    Ok(())
}

/// Compute a fresh local-sourced snapshot
pub fn local_snapshot(settings: &LocalSettings) -> UsageSnapshot {
    let result = count(&settings.log_path, settings.window_ms, settings.max_events);
    UsageSnapshot::new(
        result.percentage,
        UsageSource::Local,
        format!(
            "{}/{} prompts in last {}",
            result.count,
            settings.max_events,
            format_window(settings.window_ms)
        ),
    )
}

fn format_window(window_ms: u64) -> String {
    let minutes = window_ms / 60_000;
    if minutes >= 60 && minutes % 60 == 0 {
        format!("{}h", minutes / 60)
    } else if minutes > 0 {
        format!("{}m", minutes)
    } else {
        format!("{}s", window_ms / 1000)
    }
}
