//! Sync daemon library exports.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (run, checkpoints)

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands};
pub use commands::{
    catch_up, drain_once, drive, load_settings, prepare_cluster, run_sync, show_checkpoints,
    Overrides,
};
