//! Light control: map a usage fraction onto a color gradient and send it to
//! the bridge.

pub mod bridge;
pub mod color;
pub mod controller;

pub use bridge::{HardwareCommand, HueBridge, LightBridge, LightError};
pub use color::{interpolate, ColorPoint};
pub use controller::LightController;
