use anyhow::Result;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use usagelamp::config::{merge_cli, Command, Config, Settings};
use usagelamp::daemon;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments
    let cli = Config::parse_args();

    // Setup logging
    setup_logging(cli.debug);

    // Load settings
    let mut settings = Settings::load(cli.config.as_ref())?;
    merge_cli(&mut settings, &cli);
    settings.validate();

    match cli.command {
        Command::Start { .. } => daemon::start(settings).await,
        Command::Stop => daemon::stop(&settings),
        Command::Status { json } => daemon::status(&settings, json),
    }
}

fn setup_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("usagelamp=debug,usagelamp_core=debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("usagelamp=info,usagelamp_core=info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
