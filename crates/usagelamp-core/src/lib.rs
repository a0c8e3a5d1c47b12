//! Core library for usagelamp: usage resolution, light control, scheduling
//! and daemon lifecycle.

pub mod config;
pub mod lifecycle;
pub mod light;
pub mod scheduler;
pub mod state;
pub mod usage;
