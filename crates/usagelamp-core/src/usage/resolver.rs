//! Decide which usage number to show right now.
//!
//! Trust order, highest first: push, OAuth, cookie, local. A fresh remote
//! snapshot is served as-is. Otherwise the remote adapters are asked in
//! order (at most once per staleness window), and if none answers the local
//! log is counted. Resolution never fails.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::fetcher::{fetch_in_background, CookieAdapter, OauthAdapter, UsageAdapter};
use super::local::local_snapshot;
use super::types::UsageSnapshot;
use crate::config::{LocalSettings, Settings};
use crate::state::SharedStore;

/// Resolves the current usage snapshot across all sources
pub struct Resolver {
    store: SharedStore,
    /// Remote adapters in trust order
    adapters: Vec<Arc<dyn UsageAdapter>>,
    local: LocalSettings,
}

impl Resolver {
    pub fn new(
        store: SharedStore,
        adapters: Vec<Arc<dyn UsageAdapter>>,
        local: LocalSettings,
    ) -> Self {
        Self {
            store,
            adapters,
            local,
        }
    }

    /// Build with the OAuth and cookie adapters from settings
    pub fn from_settings(store: SharedStore, settings: &Settings) -> Self {
        let adapters: Vec<Arc<dyn UsageAdapter>> = vec![
            Arc::new(OauthAdapter::new(settings)),
            Arc::new(CookieAdapter::new(settings)),
        ];
        Self::new(store, adapters, settings.local.clone())
    }

    /// Resolve the number to show now
    pub async fn resolve(&self) -> UsageSnapshot {
        self.resolve_at(Utc::now()).await
    }

    /// Resolve relative to `now`
    pub async fn resolve_at(&self, now: DateTime<Utc>) -> UsageSnapshot {
        // A fresh remote snapshot (push first of all) needs no network work
        if let Some(current) = self.store.current() {
            if current.is_fresh(now) {
                debug!("Using fresh {} snapshot", current.source);
                return current;
            }
        }

        if self.store.refresh_due(now) {
            if let Some(snapshot) = self.refresh_at(now).await {
                return snapshot;
            }
        }

        let local = local_snapshot(&self.local);
        if self.store.commit(local.clone(), now) {
            local
        } else {
            // A push landed while the log was being counted
            self.store.current().unwrap_or(local)
        }
    }

    /// Ask the remote adapters, in trust order, for a new snapshot
    ///
    /// Returns the committed snapshot, or `None` if every source came up
    /// empty. Failures are logged and never propagated.
    pub async fn refresh(&self) -> Option<UsageSnapshot> {
        self.refresh_at(Utc::now()).await
    }

    async fn refresh_at(&self, started_at: DateTime<Utc>) -> Option<UsageSnapshot> {
        self.store.note_refresh_attempt(started_at);

        for adapter in &self.adapters {
            let source = adapter.source();
            if !adapter.is_configured() {
                debug!("Skipping {} source: not configured", source);
                continue;
            }

            match fetch_in_background(adapter.clone()).await {
                Ok(snapshot) => {
                    info!(
                        source = %source,
                        percentage = snapshot.percentage,
                        "Fetched usage"
                    );
                    if self.store.commit(snapshot.clone(), started_at) {
                        return Some(snapshot);
                    }
                    return self.store.current();
                }
                Err(e) => {
                    info!(source = %source, "Usage source unavailable: {}", e);
                }
            }
        }

        None
    }
}
