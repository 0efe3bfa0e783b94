//! Movies ETL Daemon
//!
//! Propagates changes from the PostgreSQL content schema into the
//! Elasticsearch movies index.
//!
//! # Usage
//!
//! ```bash
//! etl-daemon run [--once]
//! etl-daemon ensure-index
//! etl-daemon state [--stage STAGE]
//! etl-daemon failures [-n N]
//! etl-daemon reset-watermark <ENTITY>
//! etl-daemon show-config
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/movies-etl/config.toml)
//! 3. Environment variables (ETL__*)
//! 4. CLI flags

use anyhow::Result;
use clap::Parser;

use etl_daemon::{
    ensure_index, reset_watermark, run_daemon, show_config, show_failures, show_state, Cli,
    Commands,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.config.as_deref();
    let log_level = cli.log_level.as_deref();

    match cli.command {
        Commands::Run { once } => run_daemon(config, log_level, once).await?,
        Commands::EnsureIndex => ensure_index(config, log_level).await?,
        Commands::State { stage } => show_state(config, stage)?,
        Commands::Failures { limit } => show_failures(config, limit)?,
        Commands::ResetWatermark { entity } => reset_watermark(config, entity)?,
        Commands::ShowConfig => show_config(config, log_level)?,
    }

    Ok(())
}
