//! Graceful shutdown signalling.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{debug, info};

/// One-shot shutdown flag shared by every task
///
/// The first [`Shutdown::trigger`] wins; later calls are no-ops so cleanup
/// runs once no matter how many signals arrive.
#[derive(Clone)]
pub struct Shutdown {
    begun: Arc<AtomicBool>,
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            begun: Arc::new(AtomicBool::new(false)),
            tx: Arc::new(tx),
        }
    }

    /// Begin shutdown. Returns true only for the first call.
    pub fn trigger(&self) -> bool {
        if self.begun.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.tx.send_replace(true);
        true
    }

    pub fn is_triggered(&self) -> bool {
        self.begun.load(Ordering::SeqCst)
    }

    /// Resolve once shutdown has begun
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail
        let _ = rx.wait_for(|begun| *begun).await;
    }

    /// Drive `work` until it finishes or shutdown begins
    ///
    /// Returns `None` when shutdown won. The dropped future is not resumed;
    /// blocking calls it already handed off finish on their own.
    pub async fn until_triggered<F: Future>(&self, work: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.wait() => None,
            output = work => Some(output),
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn a task that triggers `shutdown` on SIGINT or SIGTERM
pub fn spawn_signal_listener(shutdown: Shutdown) -> Result<tokio::task::JoinHandle<()>> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        loop {
            let name = tokio::select! {
                _ = sigint.recv() => "SIGINT",
                _ = sigterm.recv() => "SIGTERM",
            };
            if shutdown.trigger() {
                info!("{} received, shutting down", name);
            } else {
                debug!("{} received while already shutting down", name);
            }
        }
    }))
}
