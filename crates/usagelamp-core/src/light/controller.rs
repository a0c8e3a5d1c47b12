//! Turn a usage fraction into a light command and issue it.

use std::sync::Arc;

use tracing::{debug, warn};

use super::bridge::{HardwareCommand, HueBridge, LightBridge, LightError};
use super::color::{bridge_brightness, interpolate, ColorPoint};
use crate::config::Settings;

/// Drives one light along the configured gradient
///
/// Calls are independent: two `apply` calls in quick succession both reach
/// the bridge, and the bridge keeps whichever lands last.
pub struct LightController {
    bridge: Arc<dyn LightBridge>,
    light_id: String,
    start: ColorPoint,
    end: ColorPoint,
    transition_ms: u64,
}

impl LightController {
    pub fn new(bridge: Arc<dyn LightBridge>, settings: &Settings) -> Self {
        Self {
            bridge,
            light_id: settings.bridge.light_id.clone(),
            start: ColorPoint::from(&settings.gradient.start),
            end: ColorPoint::from(&settings.gradient.end),
            transition_ms: settings.transition_ms,
        }
    }

    /// Build with the Hue bridge client from settings
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(Arc::new(HueBridge::new(settings)), settings)
    }

    /// Command for `percentage`, clamped to [0, 1]
    pub fn command_for(&self, percentage: f64) -> HardwareCommand {
        let point = interpolate(self.start, self.end, percentage);
        HardwareCommand {
            xy: (point.x, point.y),
            brightness_percent: point.brightness.round().clamp(0.0, 100.0) as u8,
            bri: bridge_brightness(point.brightness),
            transition_ms: self.transition_ms,
        }
    }

    /// Apply `percentage` to the light
    ///
    /// The bridge is called exactly once; failures are returned, not retried.
    pub async fn apply(&self, percentage: f64) -> Result<HardwareCommand, LightError> {
        let command = self.command_for(percentage);
        let bridge = self.bridge.clone();
        let light_id = self.light_id.clone();
        let sent = command.clone();

        tokio::task::spawn_blocking(move || bridge.send(&light_id, &sent))
            .await
            .map_err(|e| LightError::Worker(e.to_string()))?
            .inspect_err(|e| warn!(light = %self.light_id, "Light update failed: {}", e))?;

        debug!(
            light = %self.light_id,
            x = command.xy.0,
            y = command.xy.1,
            bri = command.bri,
            "Light updated"
        );
        Ok(command)
    }
}
