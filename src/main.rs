mod aggregator;
mod auth;
mod cli;
mod config;
mod error;
mod insights;
mod metrics;
mod models;
mod polling;
mod providers;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use log::info;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    info!("Starting PipePulse - Azure DevOps pipeline insights");
    cli.execute().await?;

    Ok(())
}
