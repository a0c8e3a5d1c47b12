use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;

use crate::usage::{UsageSnapshot, UsageSource, STALE_THRESHOLD};

/// Shared store type alias
pub type SharedStore = Arc<SnapshotStore>;

#[derive(Debug, Default)]
struct StoreInner {
    /// The single live snapshot
    snapshot: Option<UsageSnapshot>,
    /// When the last push arrived
    last_push_at: Option<DateTime<Utc>>,
    /// When the remote sources were last asked for data
    last_refresh_attempt: Option<DateTime<Utc>>,
}

/// Holder of the current usage snapshot
///
/// Handlers read the current value once, compute a replacement on their own,
/// then hand it back through [`SnapshotStore::commit`], which refuses to let a
/// slow computation overwrite a push that arrived while it was running.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    inner: RwLock<StoreInner>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new shared store
    pub fn shared() -> SharedStore {
        Arc::new(Self::new())
    }

    /// Clone of the current snapshot
    pub fn current(&self) -> Option<UsageSnapshot> {
        self.inner.read().snapshot.clone()
    }

    /// Replace the snapshot with one whose computation began at `started_at`
    ///
    /// Rejected (returns false) when a push snapshot received after
    /// `started_at` is already present.
    pub fn commit(&self, snapshot: UsageSnapshot, started_at: DateTime<Utc>) -> bool {
        let mut inner = self.inner.write();
        if let Some(current) = &inner.snapshot {
            if current.source == UsageSource::Push && current.received_at > started_at {
                tracing::debug!(
                    rejected = %snapshot.source,
                    "Keeping newer push snapshot"
                );
                return false;
            }
        }
        if snapshot.source == UsageSource::Push {
            inner.last_push_at = Some(snapshot.received_at);
        }
        inner.snapshot = Some(snapshot);
        true
    }

    /// Store a pushed snapshot (timestamped on receipt)
    pub fn record_push(&self, snapshot: UsageSnapshot) -> bool {
        let received_at = snapshot.received_at;
        self.commit(snapshot, received_at)
    }

    /// When the last push arrived, if ever
    pub fn last_push_at(&self) -> Option<DateTime<Utc>> {
        self.inner.read().last_push_at
    }

    /// Whether a push arrived within the staleness window
    pub fn push_connected(&self, now: DateTime<Utc>) -> bool {
        self.last_push_at()
            .and_then(|at| (now - at).to_std().ok())
            .is_some_and(|age| age < STALE_THRESHOLD)
    }

    /// Remember that remote sources were asked for data at `at`
    pub fn note_refresh_attempt(&self, at: DateTime<Utc>) {
        self.inner.write().last_refresh_attempt = Some(at);
    }

    /// Whether remote sources should be asked again
    ///
    /// True when the current snapshot is a stale remote one, or when the
    /// last attempt is older than the staleness window (or never happened).
    pub fn refresh_due(&self, now: DateTime<Utc>) -> bool {
        let inner = self.inner.read();
        let stale_remote = inner
            .snapshot
            .as_ref()
            .is_some_and(|s| s.source.is_remote() && !s.is_fresh(now));
        let attempt_expired = match inner.last_refresh_attempt {
            None => true,
            Some(at) => (now - at)
                .to_std()
                .map_or(false, |age| age >= STALE_THRESHOLD),
        };
        stale_remote || attempt_expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn snapshot(source: UsageSource, pct: f64, at: DateTime<Utc>) -> UsageSnapshot {
        UsageSnapshot::new(pct, source, "").received_at(at)
    }

    #[test]
    fn test_commit_replaces() {
        let store = SnapshotStore::new();
        let now = Utc::now();
        assert!(store.current().is_none());

        assert!(store.commit(snapshot(UsageSource::Local, 0.1, now), now));
        assert!(store.commit(snapshot(UsageSource::Oauth, 0.4, now), now));
        assert_eq!(store.current().unwrap().source, UsageSource::Oauth);
    }

    #[test]
    fn test_push_during_poll_wins() {
        let store = SnapshotStore::new();
        let poll_started = Utc::now();
        let push_at = poll_started + TimeDelta::seconds(1);

        assert!(store.record_push(snapshot(UsageSource::Push, 0.7, push_at)));

        // The poll completes afterwards with an older view of the world
        let polled = snapshot(UsageSource::Oauth, 0.2, push_at + TimeDelta::seconds(1));
        assert!(!store.commit(polled, poll_started));

        let current = store.current().unwrap();
        assert_eq!(current.source, UsageSource::Push);
        assert_eq!(current.percentage, 0.7);
    }

    #[test]
    fn test_older_push_is_replaced() {
        let store = SnapshotStore::new();
        let now = Utc::now();
        let old_push = now - TimeDelta::minutes(6);
        store.record_push(snapshot(UsageSource::Push, 0.7, old_push));

        assert!(store.commit(snapshot(UsageSource::Local, 0.1, now), now));
        assert_eq!(store.current().unwrap().source, UsageSource::Local);
        assert_eq!(store.last_push_at(), Some(old_push));
    }

    #[test]
    fn test_newer_push_replaces_push() {
        let store = SnapshotStore::new();
        let now = Utc::now();
        store.record_push(snapshot(UsageSource::Push, 0.3, now));
        assert!(store.record_push(snapshot(UsageSource::Push, 0.5, now + TimeDelta::seconds(2))));
        assert_eq!(store.current().unwrap().percentage, 0.5);
    }

    #[test]
    fn test_refresh_due() {
        let store = SnapshotStore::new();
        let now = Utc::now();
        assert!(store.refresh_due(now));

        store.note_refresh_attempt(now);
        assert!(!store.refresh_due(now + TimeDelta::minutes(1)));
        assert!(store.refresh_due(now + TimeDelta::minutes(5)));

        // A stale remote snapshot forces a refresh regardless of the attempt clock
        store.commit(snapshot(UsageSource::Oauth, 0.2, now - TimeDelta::minutes(10)), now);
        assert!(store.refresh_due(now));
    }

    #[test]
    fn test_push_connected() {
        let store = SnapshotStore::new();
        let now = Utc::now();
        assert!(!store.push_connected(now));

        store.record_push(snapshot(UsageSource::Push, 0.3, now - TimeDelta::minutes(1)));
        assert!(store.push_connected(now));
        assert!(!store.push_connected(now + TimeDelta::minutes(10)));
    }
}
