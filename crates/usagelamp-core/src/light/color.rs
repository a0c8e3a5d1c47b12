//! Color math: gradient interpolation, brightness mapping and hex →
//! chromaticity conversion.

use serde::Serialize;

use crate::config::ColorStop;

/// Lowest/highest brightness the bridge accepts for a lit bulb
pub const BRIDGE_BRIGHTNESS_MIN: u8 = 1;
pub const BRIDGE_BRIGHTNESS_MAX: u8 = 254;

/// A point on the gradient: chromaticity plus brightness percent
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ColorPoint {
    pub x: f64,
    pub y: f64,
    /// Brightness in percent (0-100), not yet mapped to the bridge range
    pub brightness: f64,
}

impl From<&ColorStop> for ColorPoint {
    fn from(stop: &ColorStop) -> Self {
        Self {
            x: stop.x,
            y: stop.y,
            brightness: stop.brightness as f64,
        }
    }
}

/// Linear interpolation with `t` clamped to [0, 1]
///
/// Written as a weighted sum so both endpoints and the midpoint come out
/// exact. NaN is treated as 0.
pub fn lerp(start: f64, end: f64, t: f64) -> f64 {
    let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
    start * (1.0 - t) + end * t
}

/// Interpolate each channel of the gradient independently
pub fn interpolate(start: ColorPoint, end: ColorPoint, t: f64) -> ColorPoint {
    ColorPoint {
        x: lerp(start.x, end.x, t),
        y: lerp(start.y, end.y, t),
        brightness: lerp(start.brightness, end.brightness, t),
    }
}

/// Map a 0-100 brightness percent onto the bridge's 1-254 range
pub fn bridge_brightness(percent: f64) -> u8 {
    let percent = if percent.is_nan() {
        0.0
    } else {
        percent.clamp(0.0, 100.0)
    };
    let scaled = (percent / 100.0 * BRIDGE_BRIGHTNESS_MAX as f64).round();
    (scaled as u8).clamp(BRIDGE_BRIGHTNESS_MIN, BRIDGE_BRIGHTNESS_MAX)
}

/// Convert "#rrggbb" (or "rrggbb") to CIE xy chromaticity
///
/// Uses sRGB gamma expansion and the wide-gamut RGB → XYZ matrix the bulbs
/// are calibrated against. Black maps to the D65 white point.
pub fn hex_to_xy(hex: &str) -> Option<(f64, f64)> {
    let hex = hex.trim().trim_start_matches('#');
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let channel = |i: usize| -> Option<f64> {
        u8::from_str_radix(&hex[i..i + 2], 16)
            .ok()
            .map(|v| v as f64 / 255.0)
    };
    let (r, g, b) = (
        gamma_expand(channel(0)?),
        gamma_expand(channel(2)?),
        gamma_expand(channel(4)?),
    );

    let x = r * 0.649926 + g * 0.103455 + b * 0.197109;
    let y = r * 0.234327 + g * 0.743075 + b * 0.022598;
    let z = g * 0.053077 + b * 1.035763;

    let sum = x + y + z;
    if sum == 0.0 {
        return Some((0.3127, 0.3290));
    }
    Some((round4(x / sum), round4(y / sum)))
}

fn gamma_expand(c: f64) -> f64 {
    if c > 0.04045 {
        ((c + 0.055) / 1.055).powf(2.4)
    } else {
        c / 12.92
    }
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}
