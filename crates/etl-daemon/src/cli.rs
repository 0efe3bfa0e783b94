//! CLI argument parsing for the ETL daemon.
//!
//! CLI flags override every other configuration source.

use clap::{Parser, Subcommand};

use etl_types::{EntityKind, Stage};

/// Movies ETL Daemon
///
/// Keeps the movies search index in sync with the content database.
#[derive(Parser, Debug)]
#[command(name = "etl-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/movies-etl/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Daemon commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the pipeline until SIGINT/SIGTERM
    Run {
        /// Drain every entity kind once, then exit
        #[arg(long)]
        once: bool,
    },

    /// Create the search index with the bundled mapping if it is missing
    EnsureIndex,

    /// Print stored checkpoints as JSON (daemon must be stopped)
    State {
        /// Only print this stage's namespace
        #[arg(short, long)]
        stage: Option<Stage>,
    },

    /// Print the failed bulk-write log (daemon must be stopped)
    Failures {
        /// Only print the most recent N entries
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Forget an entity's watermark so the next pass rescans it from the start
    ResetWatermark {
        /// Entity kind (film_work, person, genre)
        entity: EntityKind,
    },

    /// Print the effective configuration as TOML, password redacted
    ShowConfig,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
