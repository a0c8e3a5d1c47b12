mod cli;

pub use cli::{merge_cli, Command, Config};
pub use usagelamp_core::config::Settings;
