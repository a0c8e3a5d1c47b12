use clap::{Parser, Subcommand};
use std::path::PathBuf;

use usagelamp_core::config::Settings;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Show AI usage as the color of a smart light")]
pub struct Config {
    /// Enable debug mode
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the daemon in the foreground until interrupted
    Start {
        /// Polling interval in milliseconds
        #[arg(short = 'i', long)]
        poll_interval: Option<u64>,

        /// Do not open the push endpoint
        #[arg(long)]
        no_push: bool,
    },
    /// Stop the running daemon
    Stop,
    /// Show the daemon's last reported usage
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Config {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Apply command line overrides on top of file settings
pub fn merge_cli(settings: &mut Settings, cli: &Config) {
    if let Command::Start {
        poll_interval,
        no_push,
    } = &cli.command
    {
        if let Some(poll_interval) = poll_interval {
            settings.poll_interval_ms = *poll_interval;
        }
        if *no_push {
            settings.push.enabled = false;
        }
    }
}
