//! Hardware bridge client.

use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::Settings;
use crate::usage::fetcher::http_agent;

/// A single light command, derived per cycle and never persisted
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HardwareCommand {
    /// Chromaticity (x, y)
    pub xy: (f64, f64),
    /// Brightness in percent (0-100)
    pub brightness_percent: u8,
    /// Brightness in the bridge's own range (1-254)
    pub bri: u8,
    /// Transition duration in milliseconds
    pub transition_ms: u64,
}

/// Reasons a light command did not take effect
#[derive(Debug, Error)]
pub enum LightError {
    /// Bridge address, credential or light id missing
    #[error("bridge is not configured: {0}")]
    NotConfigured(String),

    /// The bridge could not be reached
    #[error("bridge request failed: {0}")]
    Transport(String),

    /// The bridge answered with a non-success HTTP status
    #[error("bridge returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The bridge accepted the request but reported per-command errors
    #[error("bridge reported error: {payload}")]
    Bridge { payload: Value },

    /// The blocking worker panicked or was cancelled
    #[error("bridge worker failed: {0}")]
    Worker(String),
}

/// Something that can put a light into a given state
pub trait LightBridge: Send + Sync {
    /// Send one command. Blocking, single round-trip, no retries.
    fn send(&self, light_id: &str, command: &HardwareCommand) -> Result<(), LightError>;
}

/// Hue-compatible bridge reached over its local REST API
pub struct HueBridge {
    address: String,
    username: String,
    agent: ureq::Agent,
}

impl HueBridge {
    pub fn new(settings: &Settings) -> Self {
        Self {
            address: settings.bridge.address.trim().to_string(),
            username: settings.bridge.username.trim().to_string(),
            agent: http_agent(settings.request_timeout()),
        }
    }

    fn state_url(&self, light_id: &str) -> String {
        format!(
            "http://{}/api/{}/lights/{}/state",
            self.address, self.username, light_id
        )
    }
}

/// Request body for a light state change
fn state_body(command: &HardwareCommand) -> Value {
    json!({
        "on": true,
        "xy": [command.xy.0, command.xy.1],
        "bri": command.bri,
        // deciseconds, capped at the field's u16 range
        "transitiontime": (command.transition_ms / 100).min(u64::from(u16::MAX)),
    })
}

/// Collect per-command `error` entries from a bridge response
fn bridge_errors(doc: &Value) -> Vec<Value> {
    let entries: Vec<&Value> = match doc {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    entries
        .into_iter()
        .filter_map(|entry| entry.get("error").cloned())
        .collect()
}

impl LightBridge for HueBridge {
    fn send(&self, light_id: &str, command: &HardwareCommand) -> Result<(), LightError> {
        if self.address.is_empty() || self.username.is_empty() || light_id.is_empty() {
            return Err(LightError::NotConfigured(
                "bridge.address, bridge.username and bridge.light_id are required".to_string(),
            ));
        }

        let mut response = self
            .agent
            .put(&self.state_url(light_id))
            .send_json(state_body(command))
            .map_err(|e| LightError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| LightError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(LightError::Status {
                status: status.as_u16(),
                body,
            });
        }

        // Some firmware answers with an empty body; treat that as success
        let Ok(doc) = serde_json::from_str::<Value>(&body) else {
            return Ok(());
        };
        let errors = bridge_errors(&doc);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(LightError::Bridge {
                payload: Value::Array(errors),
            })
        }
    }
}
