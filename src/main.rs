// src/main.rs
use anyhow::Result;
use clap::Parser;
use dotenvy::dotenv;
use tokio::main;

use misskey_streamer::config::Settings;
use misskey_streamer::orchestrator::Orchestrator;

#[derive(Debug, Parser)]
#[command(about = "Streams a Misskey home timeline and fans notes out to handlers")]
struct Cli {
    /// Settings file name, without the `.toml` extension
    #[arg(long, default_value = "Settings")]
    config: String,
}

#[main]
async fn main() -> Result<()> {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let settings = Settings::from_file(&cli.config)?;

    // Build orchestrator
    let orchestrator = Orchestrator::new(&settings)?;

    // Kick it off
    orchestrator.run().await?;

    Ok(())
}
