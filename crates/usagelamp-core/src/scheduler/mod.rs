//! The daemon's control loop.
//!
//! Three event sources feed one handler (resolve, then apply): the poll timer,
//! the usage-log watch, and the push endpoint. Watch and push events arrive as
//! [`Trigger`]s over an mpsc channel; the timer is owned by the loop itself.

pub mod watcher;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::lifecycle::Shutdown;
use crate::light::{HardwareCommand, LightController};
use crate::state::{DaemonStatusRecord, SharedStore, StatusFile};
use crate::usage::{trim, Resolver, UsageSnapshot};

pub use watcher::{LogWatcher, WatchState};

/// Queue depth for triggers; overflowing watch events are dropped
pub const TRIGGER_CAPACITY: usize = 64;

/// Out-of-band request for a resolve-and-apply cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// The usage log changed on disk
    LogChanged,
    /// A push snapshot was stored
    Push,
    /// The file watch reported an error
    WatchError(String),
}

pub fn trigger_channel() -> (mpsc::Sender<Trigger>, mpsc::Receiver<Trigger>) {
    mpsc::channel(TRIGGER_CAPACITY)
}

/// Outcome of one resolve-and-apply cycle
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub snapshot: UsageSnapshot,
    pub command: Option<HardwareCommand>,
    pub light_error: Option<String>,
}

/// Drives resolution and light updates until shutdown
pub struct Scheduler {
    settings: Arc<Settings>,
    resolver: Resolver,
    controller: LightController,
    status_file: StatusFile,
    watcher: LogWatcher,
}

impl Scheduler {
    pub fn new(
        settings: Arc<Settings>,
        resolver: Resolver,
        controller: LightController,
        triggers: mpsc::Sender<Trigger>,
    ) -> Self {
        let status_file = StatusFile::new(settings.status_path());
        let watcher = LogWatcher::new(&settings.local.log_path, triggers);
        Self {
            settings,
            resolver,
            controller,
            status_file,
            watcher,
        }
    }

    /// Build with the real adapters and bridge client from settings
    pub fn from_settings(
        settings: Arc<Settings>,
        store: SharedStore,
        triggers: mpsc::Sender<Trigger>,
    ) -> Self {
        let resolver = Resolver::from_settings(store, &settings);
        let controller = LightController::from_settings(&settings);
        Self::new(settings, resolver, controller, triggers)
    }

    pub fn watcher(&self) -> &LogWatcher {
        &self.watcher
    }

    /// Upfront remote fetch, then one immediate apply
    pub async fn startup(&mut self) -> CycleOutcome {
        if self.resolver.refresh().await.is_none() {
            info!("No remote usage source answered, starting from local count");
        }
        let outcome = self.cycle().await;
        self.watcher.poll_arm();
        outcome
    }

    /// Resolve, apply, and record the result
    ///
    /// Light failures are logged and recorded; they never stop the loop.
    pub async fn cycle(&self) -> CycleOutcome {
        let snapshot = self.resolver.resolve().await;
        debug!(
            source = %snapshot.source,
            percentage = snapshot.percentage,
            "Resolved usage"
        );

        let (command, light_error) = match self.controller.apply(snapshot.percentage).await {
            Ok(command) => (Some(command), None),
            Err(e) => (None, Some(e.to_string())),
        };

        let record = DaemonStatusRecord::from_cycle(&snapshot, light_error.clone());
        if let Err(e) = self.status_file.write(&record) {
            warn!("Failed to write status file: {:#}", e);
        }

        CycleOutcome {
            snapshot,
            command,
            light_error,
        }
    }

    /// Timer tick: cycle, trim the log, re-arm the watch if possible
    pub async fn on_tick(&mut self) -> CycleOutcome {
        let outcome = self.cycle().await;

        let local = &self.settings.local;
        if let Err(e) = trim(&local.log_path, local.window_ms) {
            warn!("Failed to trim usage log: {:#}", e);
        }

        self.watcher.poll_arm();
        outcome
    }

    /// Handle one out-of-band trigger
    pub async fn handle(&mut self, trigger: Trigger) {
        match trigger {
            Trigger::LogChanged => {
                debug!("Usage log changed");
                self.cycle().await;
            }
            Trigger::Push => {
                debug!("Push received");
                self.cycle().await;
            }
            Trigger::WatchError(reason) => self.watcher.fail(&reason),
        }
    }

    /// Handle a drained batch of triggers in order
    pub async fn handle_batch(&mut self, batch: Vec<Trigger>) {
        for trigger in coalesce(batch) {
            self.handle(trigger).await;
        }
    }

    /// Run until `shutdown` fires. Consumes the scheduler.
    ///
    /// A cycle in progress when shutdown begins is abandoned, not awaited.
    pub async fn run(mut self, mut triggers: mpsc::Receiver<Trigger>, shutdown: Shutdown) {
        let period = self.settings.poll_interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Scheduler running (poll every {}s)", period.as_secs());

        loop {
            // None means a timer tick
            let batch = tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                _ = ticker.tick() => None,
                Some(first) = triggers.recv() => {
                    let mut batch = vec![first];
                    while let Ok(next) = triggers.try_recv() {
                        batch.push(next);
                    }
                    Some(batch)
                }
            };

            let finished = match batch {
                None => shutdown.until_triggered(self.on_tick()).await.is_some(),
                Some(batch) => shutdown
                    .until_triggered(self.handle_batch(batch))
                    .await
                    .is_some(),
            };
            if !finished {
                debug!("Shutdown during cycle, abandoning it");
                break;
            }
        }

        self.watcher.close();
        info!("Scheduler stopped");
    }
}

/// Fold repeated log-change triggers into the first one
///
/// Push triggers and watch errors are kept as-is and in order.
pub fn coalesce(batch: Vec<Trigger>) -> Vec<Trigger> {
    let mut seen_log_change = false;
    batch
        .into_iter()
        .filter(|trigger| match trigger {
            Trigger::LogChanged if seen_log_change => false,
            Trigger::LogChanged => {
                seen_log_change = true;
                true
            }
            _ => true,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::light::{LightBridge, LightError};
    use crate::state::SnapshotStore;
    use crate::usage::{UsageAdapter, UsageSource};
    use chrono::{TimeDelta, Utc};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingBridge {
        sent: Mutex<Vec<HardwareCommand>>,
        fail: bool,
        /// Simulated bridge latency
        delay: Duration,
    }

    impl LightBridge for RecordingBridge {
        fn send(&self, _light_id: &str, command: &HardwareCommand) -> Result<(), LightError> {
            std::thread::sleep(self.delay);
            self.sent.lock().push(command.clone());
            if self.fail {
                Err(LightError::Transport("connection refused".to_string()))
            } else {
                Ok(())
            }
        }
    }

    struct Fixture {
        _dir: TempDir,
        settings: Arc<Settings>,
        store: SharedStore,
        bridge: Arc<RecordingBridge>,
    }

    impl Fixture {
        fn new(fail: bool) -> Self {
            Self::with_bridge(RecordingBridge {
                fail,
                ..Default::default()
            })
        }

        /// Bridge that takes `delay` to answer each command
        fn slow(delay: Duration) -> Self {
            Self::with_bridge(RecordingBridge {
                delay,
                ..Default::default()
            })
        }

        fn with_bridge(bridge: RecordingBridge) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let mut settings = Settings::default();
            settings.local.log_path = dir.path().join("prompts.log");
            settings.local.max_events = 45;
            settings.local.window_ms = 5 * 60 * 60 * 1000;
            settings.daemon.state_dir = Some(dir.path().join("state"));
            settings.poll_interval_ms = 1_000;
            Self {
                _dir: dir,
                settings: Arc::new(settings),
                store: SnapshotStore::shared(),
                bridge: Arc::new(bridge),
            }
        }

        /// Scheduler with no remote sources configured
        fn scheduler(&self, triggers: mpsc::Sender<Trigger>) -> Scheduler {
            let adapters: Vec<Arc<dyn UsageAdapter>> = Vec::new();
            let resolver =
                Resolver::new(self.store.clone(), adapters, self.settings.local.clone());
            let controller = LightController::new(self.bridge.clone(), &self.settings);
            Scheduler::new(self.settings.clone(), resolver, controller, triggers)
        }

        fn log_path(&self) -> &Path {
            &self.settings.local.log_path
        }

        fn write_recent(&self, n: usize) {
            let now = Utc::now();
            let lines: String = (0..n)
                .map(|i| format!("{}\n", (now - TimeDelta::seconds(i as i64)).to_rfc3339()))
                .collect();
            fs::write(self.log_path(), lines).unwrap();
        }

        fn status(&self) -> DaemonStatusRecord {
            StatusFile::new(self.settings.status_path()).read().unwrap()
        }
    }

    #[test]
    fn test_coalesce_folds_log_changes_only() {
        let batch = vec![
            Trigger::LogChanged,
            Trigger::Push,
            Trigger::LogChanged,
            Trigger::Push,
            Trigger::LogChanged,
        ];
        assert_eq!(
            coalesce(batch),
            vec![Trigger::LogChanged, Trigger::Push, Trigger::Push]
        );
    }

    #[tokio::test]
    async fn test_local_fallback_end_to_end() {
        let fixture = Fixture::new(false);
        let (tx, _rx) = trigger_channel();
        let mut scheduler = fixture.scheduler(tx);

        // Empty log
        let outcome = scheduler.startup().await;
        assert_eq!(outcome.snapshot.source, UsageSource::Local);
        assert_eq!(outcome.snapshot.percentage, 0.0);
        assert_eq!(fixture.status().percentage, 0.0);

        fixture.write_recent(10);
        let outcome = scheduler.cycle().await;
        assert_eq!(outcome.snapshot.percentage, 10.0 / 45.0);
        assert_eq!(outcome.snapshot.details, "10/45 prompts in last 5h");
        assert_eq!(fixture.status().source, UsageSource::Local);

        fixture.write_recent(50);
        let outcome = scheduler.cycle().await;
        assert_eq!(outcome.snapshot.percentage, 1.0);
        assert_eq!(outcome.snapshot.details, "50/45 prompts in last 5h");

        // Every cycle reached the light
        assert_eq!(fixture.bridge.sent.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_stale_push_recomputes_local() {
        let fixture = Fixture::new(false);
        let (tx, _rx) = trigger_channel();
        let scheduler = fixture.scheduler(tx);

        let old = UsageSnapshot::new(0.9, UsageSource::Push, "five_hour 90%")
            .received_at(Utc::now() - TimeDelta::minutes(6));
        fixture.store.record_push(old);
        fixture.write_recent(9);

        let outcome = scheduler.cycle().await;
        assert_eq!(outcome.snapshot.source, UsageSource::Local);
        assert_eq!(outcome.snapshot.percentage, 9.0 / 45.0);
    }

    #[tokio::test]
    async fn test_light_failure_recorded_and_loop_continues() {
        let fixture = Fixture::new(true);
        let (tx, _rx) = trigger_channel();
        let mut scheduler = fixture.scheduler(tx);

        let outcome = scheduler.startup().await;
        assert!(outcome.command.is_none());
        assert!(outcome.light_error.is_some());

        let status = fixture.status();
        assert!(!status.light_ok);
        assert!(status.light_error.unwrap().contains("connection refused"));

        // Next cycle still tries the light
        scheduler.on_tick().await;
        assert_eq!(fixture.bridge.sent.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_tick_trims_and_arms_watch() {
        let fixture = Fixture::new(false);
        let (tx, _rx) = trigger_channel();
        let mut scheduler = fixture.scheduler(tx);

        scheduler.startup().await;
        assert!(!scheduler.watcher().is_armed());

        let ancient = (Utc::now() - TimeDelta::hours(24)).to_rfc3339();
        let recent = Utc::now().to_rfc3339();
        fs::write(fixture.log_path(), format!("{}\n{}\n", ancient, recent)).unwrap();

        scheduler.on_tick().await;
        assert!(scheduler.watcher().is_armed());
        let content = fs::read_to_string(fixture.log_path()).unwrap();
        assert_eq!(content.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_run_handles_push_then_stops() {
        let fixture = Fixture::new(false);
        let (tx, rx) = trigger_channel();
        let mut scheduler = fixture.scheduler(tx.clone());
        scheduler.startup().await;

        let shutdown = Shutdown::new();
        let handle = tokio::spawn(scheduler.run(rx, shutdown.clone()));

        fixture
            .store
            .record_push(UsageSnapshot::new(0.42, UsageSource::Push, "five_hour 42%"));
        tx.send(Trigger::Push).await.unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        let status_path = fixture.settings.status_path();
        let mut status = fixture.status();
        while status.source != UsageSource::Push && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if let Ok(record) = StatusFile::new(&status_path).read() {
                status = record;
            }
        }
        assert_eq!(status.source, UsageSource::Push);
        assert_eq!(status.percentage, 0.42);

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("scheduler should stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_watch_error_degrades_to_polling() {
        let fixture = Fixture::new(false);
        let (tx, _rx) = trigger_channel();
        let mut scheduler = fixture.scheduler(tx);

        scheduler
            .handle(Trigger::WatchError("too many open files".to_string()))
            .await;
        assert!(scheduler.watcher().has_failed());

        fs::write(fixture.log_path(), "").unwrap();
        scheduler.on_tick().await;
        assert!(!scheduler.watcher().is_armed());
    }

    #[tokio::test]
    async fn test_shutdown_does_not_wait_for_slow_cycle() {
        let fixture = Fixture::slow(Duration::from_secs(2));
        let (tx, rx) = trigger_channel();
        let scheduler = fixture.scheduler(tx.clone());

        let shutdown = Shutdown::new();
        let handle = tokio::spawn(scheduler.run(rx, shutdown.clone()));

        // Let the cycle reach the bridge, then stop mid-call
        tx.send(Trigger::LogChanged).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let stopped_at = Instant::now();
        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("scheduler should stop")
            .unwrap();
        assert!(stopped_at.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_startup_abandoned_on_shutdown() {
        let fixture = Fixture::slow(Duration::from_secs(2));
        let (tx, _rx) = trigger_channel();
        let mut scheduler = fixture.scheduler(tx);

        let shutdown = Shutdown::new();
        {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                shutdown.trigger();
            });
        }

        let started = Instant::now();
        let outcome = shutdown.until_triggered(scheduler.startup()).await;
        assert!(outcome.is_none());
        assert!(started.elapsed() < Duration::from_millis(600));
    }
}
