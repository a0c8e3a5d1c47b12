//! `start`, `stop` and `status` as run from the command line.

use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::process::ExitCode;
use std::sync::Arc;

use usagelamp_core::config::Settings;
use usagelamp_core::lifecycle::{
    self, spawn_signal_listener, DaemonStatus, LifecycleError, PidFile, Shutdown, StopOutcome,
};
use usagelamp_core::scheduler::{trigger_channel, Scheduler};
use usagelamp_core::state::{SnapshotStore, StatusFile};

use crate::web::PushServer;

/// Run the daemon in the foreground until SIGINT or SIGTERM
///
/// Exits with failure when another daemon already holds the PID marker.
pub async fn start(settings: Settings) -> Result<ExitCode> {
    let settings = Arc::new(settings);

    let mut pid_file = PidFile::new(settings.pid_path());
    match pid_file.acquire() {
        Ok(()) => {}
        Err(LifecycleError::AlreadyRunning { pid }) => {
            eprintln!(
                "usagelamp is already running (PID {}). Run `usagelamp stop` first.",
                pid
            );
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => return Err(e).context("Failed to acquire PID file"),
    }

    print!("{}", startup_summary(&settings));

    let shutdown = Shutdown::new();
    spawn_signal_listener(shutdown.clone()).context("Failed to install signal handlers")?;

    let store = SnapshotStore::shared();
    let (triggers, rx) = trigger_channel();

    let _push = if settings.push.enabled {
        PushServer::new(settings.push.port, store.clone(), triggers.clone())
            .start(shutdown.clone())
            .await
    } else {
        tracing::info!("Push endpoint disabled");
        None
    };

    let mut scheduler = Scheduler::from_settings(settings.clone(), store, triggers);
    if shutdown.until_triggered(scheduler.startup()).await.is_some() {
        scheduler.run(rx, shutdown).await;
    } else {
        tracing::info!("Shutdown during startup");
    }

    // In-flight requests are left to finish on their own
    if let Err(e) = StatusFile::new(settings.status_path()).remove() {
        tracing::debug!("Failed to remove status file: {:#}", e);
    }
    pid_file.release();
    println!("usagelamp stopped");

    Ok(ExitCode::SUCCESS)
}

/// Signal a running daemon to stop
pub fn stop(settings: &Settings) -> Result<ExitCode> {
    let outcome =
        lifecycle::stop(&settings.pid_path()).context("Failed to stop usagelamp daemon")?;
    match outcome {
        StopOutcome::Stopped { pid } => println!("Stopping usagelamp (PID {})", pid),
        StopOutcome::NotRunning => println!("usagelamp is not running"),
        StopOutcome::StaleMarkerRemoved { pid } => println!(
            "usagelamp is not running (removed stale PID file for {})",
            pid
        ),
    }
    Ok(ExitCode::SUCCESS)
}

/// Print the daemon's last reported status
pub fn status(settings: &Settings, json: bool) -> Result<ExitCode> {
    let status = lifecycle::current_status(&settings.pid_path(), &settings.status_path());
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print!("{}", render_status(&status));
    }
    Ok(ExitCode::SUCCESS)
}

fn startup_summary(settings: &Settings) -> String {
    let bridge = &settings.bridge;
    let target = if bridge.address.is_empty() {
        "(bridge not configured)".to_string()
    } else {
        bridge.address.clone()
    };

    let mut out = String::new();
    let _ = writeln!(out, "usagelamp started (PID {})", std::process::id());
    let _ = writeln!(out, "  Light:   {} on {}", bridge.light_id, target);
    let _ = writeln!(
        out,
        "  Polling: every {}s",
        settings.poll_interval().as_secs()
    );
    if settings.push.enabled {
        let _ = writeln!(
            out,
            "  Push:    http://127.0.0.1:{}/usage",
            settings.push.port
        );
    }
    let _ = writeln!(out, "  Log:     {}", settings.local.log_path.display());
    out
}

fn render_status(status: &DaemonStatus) -> String {
    let mut out = String::new();
    let Some(pid) = status.pid.filter(|_| status.running) else {
        let _ = writeln!(out, "usagelamp is not running");
        return out;
    };

    let _ = writeln!(out, "usagelamp is running (PID {})", pid);
    let (Some(source), Some(percentage)) = (status.source, status.percentage) else {
        let _ = writeln!(out, "  No update yet");
        return out;
    };

    let _ = writeln!(out, "  Usage:   {:.0}% ({})", percentage * 100.0, source);
    if let Some(details) = status.details.as_deref().filter(|d| !d.is_empty()) {
        let _ = writeln!(out, "  Details: {}", details);
    }
    if let Some(updated_at) = status.updated_at {
        let _ = writeln!(out, "  Updated: {}", updated_at.to_rfc3339());
    }
    if status.light_ok == Some(false) {
        let _ = writeln!(out, "  Light:   last update failed");
    }
    out
}
