mod settings;

use std::path::PathBuf;

pub use settings::{
    BridgeSettings, ColorStop, DaemonSettings, GradientSettings, LocalSettings, PushSettings,
    Settings, SourceSettings,
};

/// Default runtime directory, preferring XDG_RUNTIME_DIR
pub fn default_state_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(xdg).join("usagelamp")
    } else {
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/tmp/usagelamp-{}", uid))
    }
}
