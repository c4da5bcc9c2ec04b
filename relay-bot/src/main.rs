//! Relay Bot - Main entry point.

use anyhow::Result;
use clap::Parser;
use relay_common::config::{config_path, Config};
use relay_common::logging::init_logging;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "relay-bot")]
#[command(version)]
#[command(about = "Telegram bot relaying per-user chat sessions to a local Ollama server.", long_about = None)]
struct Cli {
    /// Config file (default: ~/.llama-relay/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write a config file with default values and exit
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.init_config {
        let path = cli.config.unwrap_or_else(config_path);
        if path.exists() {
            anyhow::bail!("{} already exists", path.display());
        }
        Config::default().save_to(&path)?;
        println!("Wrote default config to {}", path.display());
        return Ok(());
    }

    let config = Config::load_with_env(cli.config.as_deref())?;

    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
        config.observability.resolved_log_file().as_deref(),
    )?;

    tracing::info!("Relay Bot v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "Invalid configuration");
        anyhow::bail!("Invalid configuration: {e}");
    }

    relay_bot::run(&config).await
}
