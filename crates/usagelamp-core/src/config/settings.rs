use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::light::color::hex_to_xy;

/// Daemon settings (from config file)
///
/// Loaded once at daemon start and treated as immutable for the rest of the
/// run. Changing anything here requires a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Polling interval in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Light transition duration in milliseconds
    #[serde(default = "default_transition")]
    pub transition_ms: u64,

    /// Timeout applied to every remote source and bridge request
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Hardware bridge settings
    #[serde(default)]
    pub bridge: BridgeSettings,

    /// Color/brightness endpoints for interpolation
    #[serde(default)]
    pub gradient: GradientSettings,

    /// Local prompt-count fallback settings
    #[serde(default)]
    pub local: LocalSettings,

    /// Remote usage source settings
    #[serde(default)]
    pub sources: SourceSettings,

    /// Push endpoint settings
    #[serde(default)]
    pub push: PushSettings,

    /// Daemon runtime file settings
    #[serde(default)]
    pub daemon: DaemonSettings,
}

fn default_poll_interval() -> u64 {
    60_000
}

fn default_transition() -> u64 {
    2_000
}

fn default_request_timeout() -> u64 {
    5_000
}

/// Hardware bridge settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeSettings {
    /// Bridge address (host or host:port)
    #[serde(default)]
    pub address: String,

    /// Bridge API credential
    #[serde(default)]
    pub username: String,

    /// Identifier of the light to drive
    #[serde(default)]
    pub light_id: String,
}

/// One end of the color gradient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorStop {
    /// Chromaticity x
    pub x: f64,
    /// Chromaticity y
    pub y: f64,
    /// Brightness in percent (0-100)
    pub brightness: u8,
    /// Optional "#rrggbb" color; replaces x/y during validation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hex: Option<String>,
}

/// Gradient endpoints: `start` at 0% usage, `end` at 100%
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientSettings {
    #[serde(default = "default_gradient_start")]
    pub start: ColorStop,
    #[serde(default = "default_gradient_end")]
    pub end: ColorStop,
}

fn default_gradient_start() -> ColorStop {
    // green
    ColorStop {
        x: 0.17,
        y: 0.7,
        brightness: 60,
        hex: None,
    }
}

fn default_gradient_end() -> ColorStop {
    // red
    ColorStop {
        x: 0.675,
        y: 0.322,
        brightness: 100,
        hex: None,
    }
}

impl Default for GradientSettings {
    fn default() -> Self {
        Self {
            start: default_gradient_start(),
            end: default_gradient_end(),
        }
    }
}

/// Local prompt-count fallback settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalSettings {
    /// Append-only timestamp log written by the prompt hook
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,

    /// Rolling window size in milliseconds
    #[serde(default = "default_window")]
    pub window_ms: u64,

    /// Prompt budget per window
    #[serde(default = "default_max_events")]
    pub max_events: u32,
}

fn default_log_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".claude/usagelamp/prompts.log")
}

/// Default window (5 hours)
fn default_window() -> u64 {
    5 * 60 * 60 * 1000
}

fn default_max_events() -> u32 {
    45
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            log_path: default_log_path(),
            window_ms: default_window(),
            max_events: default_max_events(),
        }
    }
}

/// Remote usage source settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSettings {
    /// Try the OAuth usage endpoint with the locally stored token
    #[serde(default = "default_oauth_enabled")]
    pub oauth_enabled: bool,

    /// Credentials file holding the OAuth token
    #[serde(default = "default_credentials_path")]
    pub credentials_path: PathBuf,

    /// Session cookie for the web usage endpoint
    #[serde(default)]
    pub session_key: Option<String>,

    /// Organization id for the web usage endpoint (discovered when unset)
    #[serde(default)]
    pub organization_id: Option<String>,
}

fn default_oauth_enabled() -> bool {
    true
}

fn default_credentials_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".claude/.credentials.json")
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            oauth_enabled: default_oauth_enabled(),
            credentials_path: default_credentials_path(),
            session_key: None,
            organization_id: None,
        }
    }
}

/// Push endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushSettings {
    /// Enable the loopback push listener
    #[serde(default = "default_push_enabled")]
    pub enabled: bool,

    /// Loopback port
    #[serde(default = "default_push_port")]
    pub port: u16,
}

fn default_push_enabled() -> bool {
    true
}

fn default_push_port() -> u16 {
    41_720
}

impl Default for PushSettings {
    fn default() -> Self {
        Self {
            enabled: default_push_enabled(),
            port: default_push_port(),
        }
    }
}

/// Daemon runtime file settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonSettings {
    /// Directory for the PID marker and status file
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            transition_ms: default_transition(),
            request_timeout_ms: default_request_timeout(),
            bridge: BridgeSettings::default(),
            gradient: GradientSettings::default(),
            local: LocalSettings::default(),
            sources: SourceSettings::default(),
            push: PushSettings::default(),
            daemon: DaemonSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from config file or use defaults
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        // Try custom path first
        if let Some(p) = path {
            if p.exists() {
                return Self::from_file(p);
            }
            anyhow::bail!("Config file not found: {}", p.display());
        }

        let default_paths = [
            dirs::config_dir().map(|p| p.join("usagelamp/config.toml")),
            dirs::home_dir().map(|p| p.join(".config/usagelamp/config.toml")),
            dirs::home_dir().map(|p| p.join(".usagelamp.toml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                return Self::from_file(path);
            }
        }

        Ok(Self::default())
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Validate and normalize settings values
    pub fn validate(&mut self) {
        const MIN_POLL_INTERVAL: u64 = 1_000;
        const MIN_REQUEST_TIMEOUT: u64 = 500;

        if self.poll_interval_ms < MIN_POLL_INTERVAL {
            self.poll_interval_ms = MIN_POLL_INTERVAL;
        }
        if self.request_timeout_ms < MIN_REQUEST_TIMEOUT {
            self.request_timeout_ms = MIN_REQUEST_TIMEOUT;
        }
        if self.local.window_ms == 0 {
            self.local.window_ms = 1;
        }
        if self.local.max_events == 0 {
            self.local.max_events = 1;
        }
        let stops = [
            (&mut self.gradient.start, default_gradient_start()),
            (&mut self.gradient.end, default_gradient_end()),
        ];
        for (stop, fallback) in stops {
            if let Some(hex) = stop.hex.as_deref() {
                match hex_to_xy(hex) {
                    Some((x, y)) => {
                        stop.x = x;
                        stop.y = y;
                    }
                    None => tracing::warn!("Ignoring invalid gradient color {:?}", hex),
                }
            }
            if stop.x.is_nan() || stop.y.is_nan() {
                tracing::warn!("Ignoring gradient stop with NaN coordinates");
                stop.x = fallback.x;
                stop.y = fallback.y;
            }
            stop.x = stop.x.clamp(0.0, 1.0);
            stop.y = stop.y.clamp(0.0, 1.0);
            stop.brightness = stop.brightness.min(100);
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Directory holding the PID marker and status file
    pub fn state_dir(&self) -> PathBuf {
        self.daemon
            .state_dir
            .clone()
            .unwrap_or_else(super::default_state_dir)
    }

    pub fn pid_path(&self) -> PathBuf {
        self.state_dir().join("usagelamp.pid")
    }

    pub fn status_path(&self) -> PathBuf {
        self.state_dir().join("status.json")
    }

    /// Whether a session cookie is configured for the web usage endpoint
    pub fn has_cookie_credentials(&self) -> bool {
        self.sources
            .session_key
            .as_deref()
            .is_some_and(|k| !k.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.poll_interval_ms, 60_000);
        assert_eq!(settings.local.window_ms, 18_000_000);
        assert_eq!(settings.local.max_events, 45);
        assert!(settings.sources.oauth_enabled);
        assert!(!settings.has_cookie_credentials());
        assert_eq!(settings.push.port, 41_720);
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
            poll_interval_ms = 30000

            [bridge]
            address = "192.168.1.20"
            username = "abc"
            light_id = "3"

            [gradient.end]
            x = 0.6
            y = 0.3
            brightness = 80

            [local]
            max_events = 100

            [sources]
            session_key = "sk-ant-sid01-xyz"
        "#;

        let settings: Settings = toml::from_str(toml).expect("Should parse TOML");
        assert_eq!(settings.poll_interval_ms, 30_000);
        assert_eq!(settings.bridge.light_id, "3");
        assert_eq!(settings.gradient.end.brightness, 80);
        assert_eq!(settings.gradient.start, default_gradient_start());
        assert_eq!(settings.local.max_events, 100);
        assert_eq!(settings.local.window_ms, default_window());
        assert!(settings.has_cookie_credentials());
    }

    #[test]
    fn test_validate_clamps() {
        let mut settings = Settings::default();
        settings.poll_interval_ms = 5;
        settings.local.max_events = 0;
        settings.gradient.start.x = 1.7;
        settings.gradient.end.brightness = 250;
        settings.validate();

        assert_eq!(settings.poll_interval_ms, 1_000);
        assert_eq!(settings.local.max_events, 1);
        assert_eq!(settings.gradient.start.x, 1.0);
        assert_eq!(settings.gradient.end.brightness, 100);
    }

    #[test]
    fn test_validate_floors_request_timeout() {
        let mut settings = Settings::default();
        settings.request_timeout_ms = 0;
        settings.validate();
        assert_eq!(settings.request_timeout_ms, 500);
        assert_eq!(settings.request_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_validate_replaces_nan_coordinates() {
        let mut settings = Settings::default();
        settings.gradient.start.x = f64::NAN;
        settings.gradient.end.y = f64::NAN;
        settings.validate();

        let (start, end) = (default_gradient_start(), default_gradient_end());
        assert_eq!(settings.gradient.start.x, start.x);
        assert_eq!(settings.gradient.start.y, start.y);
        assert_eq!(settings.gradient.end.x, end.x);
        assert_eq!(settings.gradient.end.y, end.y);
    }

    #[test]
    fn test_validate_applies_hex() {
        let mut settings = Settings::default();
        settings.gradient.start.hex = Some("#0000ff".to_string());
        settings.validate();

        let (x, y) = hex_to_xy("#0000ff").unwrap();
        assert_eq!(settings.gradient.start.x, x);
        assert_eq!(settings.gradient.start.y, y);
    }

    #[test]
    fn test_state_paths_follow_override() {
        let mut settings = Settings::default();
        settings.daemon.state_dir = Some(PathBuf::from("/tmp/lamp-test"));
        assert_eq!(
            settings.pid_path(),
            PathBuf::from("/tmp/lamp-test/usagelamp.pid")
        );
        assert_eq!(
            settings.status_path(),
            PathBuf::from("/tmp/lamp-test/status.json")
        );
    }

    #[test]
    fn test_blank_session_key_is_not_configured() {
        let mut settings = Settings::default();
        settings.sources.session_key = Some("  ".to_string());
        assert!(!settings.has_cookie_credentials());
    }
}
