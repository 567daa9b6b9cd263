//! CLI argument parsing for the sync daemon.
//!
//! Flags override every other config source.

use clap::{Parser, Subcommand};

/// Search index sync daemon
///
/// Keeps search indices consistent with the database.
#[derive(Parser, Debug)]
#[command(name = "search-sync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides ./search-sync.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Override the Postgres connection string
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Override the document store URL
    #[arg(long, global = true)]
    pub elasticsearch_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Daemon commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Catch every index up, then apply live changes until stopped
    Run {
        /// Drop and rebuild every index from scratch
        #[arg(long)]
        drop: bool,

        /// Exit after catchup instead of listening for changes
        #[arg(long)]
        no_listen: bool,
    },

    /// Print the checkpoint each table would resume from
    Checkpoints,
}
