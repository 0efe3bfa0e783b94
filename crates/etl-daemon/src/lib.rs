//! ETL daemon library exports.
//!
//! This crate provides the `etl-daemon` binary for the movies ETL.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (run, ensure-index, checkpoint admin)

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands};
pub use commands::{
    ensure_index, reset_watermark, run_daemon, show_config, show_failures, show_state,
};
