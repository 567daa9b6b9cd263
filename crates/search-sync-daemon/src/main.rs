//! Search index sync daemon
//!
//! Keeps the users, tracks, playlists, reposts, saves and plays indices
//! consistent with the database.
//!
//! # Usage
//!
//! ```bash
//! search-sync run [--drop] [--no-listen]
//! search-sync checkpoints
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (./search-sync.toml, or --config)
//! 3. Environment variables (SEARCH_SYNC_*)
//! 4. CLI flags

use anyhow::Result;
use clap::Parser;

use search_sync_daemon::{run_sync, show_checkpoints, Cli, Commands, Overrides};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let overrides = Overrides {
        database_url: cli.database_url,
        elasticsearch_url: cli.elasticsearch_url,
        log_level: cli.log_level,
    };

    match cli.command {
        Commands::Run { drop, no_listen } => {
            run_sync(cli.config.as_deref(), &overrides, drop, !no_listen).await?;
        }
        Commands::Checkpoints => {
            show_checkpoints(cli.config.as_deref(), &overrides).await?;
        }
    }

    Ok(())
}
