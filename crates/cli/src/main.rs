//! CLI entry point for topicring.

use clap::Parser;
use cli::CliConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CliConfig::parse();
    cli::logging::init(config.log_format)?;
    config.command.run().await
}
