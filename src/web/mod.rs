//! Loopback push endpoint
//!
//! Lets a browser extension hand over the usage numbers it already sees, so
//! the daemon does not have to poll for them.

mod api;
mod server;

pub use api::PushState;
pub use server::PushServer;
