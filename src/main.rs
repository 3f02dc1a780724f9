use anyhow::Result;
use clap::Parser;

use intent_engine::cli::{self, Cli};
use intent_engine::config::IntentEngineConfig;
use intent_engine::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    IntentEngineConfig::load_env_file()?;
    let config = IntentEngineConfig::load(cli.config.as_deref())?;
    init_telemetry(&config.observability)?;

    cli::run(cli, config).await
}
