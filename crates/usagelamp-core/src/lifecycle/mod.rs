//! Process lifecycle: single-instance marker, shutdown signalling and the
//! operations a CLI uses to control a running daemon.

pub mod control;
pub mod pid_file;
pub mod shutdown;

pub use control::{current_status, is_running, stop, DaemonStatus, StopOutcome};
pub use pid_file::{is_process_alive, LifecycleError, PidFile};
pub use shutdown::{spawn_signal_listener, Shutdown};
