//! Usage data types shared by every source.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How long a remote snapshot is trusted before it must be refreshed
pub const STALE_THRESHOLD: Duration = Duration::from_secs(5 * 60);

/// Provenance of a usage snapshot, in trust order (highest first)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UsageSource {
    /// Delivered to the loopback push endpoint
    Push,
    /// Fetched with the locally stored OAuth token
    Oauth,
    /// Fetched with a web session cookie
    CookieApi,
    /// Computed from the local prompt log
    Local,
}

impl UsageSource {
    /// Whether snapshots of this source expire after [`STALE_THRESHOLD`]
    pub fn is_remote(self) -> bool {
        !matches!(self, UsageSource::Local)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UsageSource::Push => "push",
            UsageSource::Oauth => "oauth",
            UsageSource::CookieApi => "cookie-api",
            UsageSource::Local => "local",
        }
    }
}

impl fmt::Display for UsageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single limit category reported by a remote source (e.g. "five_hour")
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageMeter {
    /// Category name as reported
    pub label: String,
    /// Fraction consumed (0-1)
    pub fraction: f64,
    /// Reset time as reported, if any
    pub resets_at: Option<String>,
}

/// The current best estimate of usage
///
/// Never mutated in place; a new resolution replaces it wholesale.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageSnapshot {
    /// Fraction of the budget consumed (0-1)
    pub percentage: f64,
    /// Where this estimate came from
    pub source: UsageSource,
    /// Human-readable breakdown (display only)
    pub details: String,
    /// When this estimate was acquired
    pub received_at: DateTime<Utc>,
}

impl UsageSnapshot {
    pub fn new(percentage: f64, source: UsageSource, details: impl Into<String>) -> Self {
        Self {
            percentage: percentage.clamp(0.0, 1.0),
            source,
            details: details.into(),
            received_at: Utc::now(),
        }
    }

    /// Override the acquisition time
    pub fn received_at(mut self, at: DateTime<Utc>) -> Self {
        self.received_at = at;
        self
    }

    /// Age relative to `now` (zero if the timestamp is in the future)
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.received_at).to_std().unwrap_or_default()
    }

    /// Whether this snapshot can be served without a refresh
    ///
    /// Local snapshots are never "fresh": they are recomputed every time.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.source.is_remote() && self.age(now) < STALE_THRESHOLD
    }
}

/// Reasons a source produced no data
#[derive(Debug, Error)]
pub enum FetchError {
    /// The source has no credentials configured
    #[error("{source_name} is not configured: {reason}")]
    NotConfigured {
        source_name: &'static str,
        reason: String,
    },

    /// The remote answered with a non-success status
    #[error("{source_name} returned HTTP {status}")]
    Status { source_name: &'static str, status: u16 },

    /// The request failed in transport (DNS, connect, timeout)
    #[error("{source_name} request failed: {message}")]
    Transport {
        source_name: &'static str,
        message: String,
    },

    /// The response carried no usable utilization field
    #[error("{source_name} response had no usable usage data")]
    NoData { source_name: &'static str },

    /// The blocking worker panicked or was cancelled
    #[error("{source_name} worker failed: {message}")]
    Worker {
        source_name: &'static str,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_clamps_percentage() {
        assert_eq!(UsageSnapshot::new(1.4, UsageSource::Oauth, "").percentage, 1.0);
        assert_eq!(UsageSnapshot::new(-0.2, UsageSource::Oauth, "").percentage, 0.0);
    }

    #[test]
    fn test_freshness() {
        let now = Utc::now();
        let fresh = UsageSnapshot::new(0.5, UsageSource::Push, "")
            .received_at(now - chrono::Duration::minutes(4));
        let stale = UsageSnapshot::new(0.5, UsageSource::Push, "")
            .received_at(now - chrono::Duration::minutes(6));
        let local = UsageSnapshot::new(0.5, UsageSource::Local, "").received_at(now);

        assert!(fresh.is_fresh(now));
        assert!(!stale.is_fresh(now));
        assert!(!local.is_fresh(now));
    }

    #[test]
    fn test_source_serializes_kebab_case() {
        let json = serde_json::to_string(&UsageSource::CookieApi).unwrap();
        assert_eq!(json, "\"cookie-api\"");
        assert_eq!(UsageSource::CookieApi.to_string(), "cookie-api");
    }
}
