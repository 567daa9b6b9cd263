//! The fixed set of watched source tables.
//!
//! Each variant names both a database table and the LISTEN/NOTIFY channel
//! its trigger publishes on. Tables with their own document index also name
//! the index alias.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Column carrying a row's source version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionField {
    /// Chain block number the row was written at
    Blocknumber,
    /// Row insertion time, for append-only event tables without block numbers
    CreatedAt,
}

impl VersionField {
    /// Column / document field name.
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionField::Blocknumber => "blocknumber",
            VersionField::CreatedAt => "created_at",
        }
    }
}

/// A source table followed by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchedTable {
    Users,
    Tracks,
    Playlists,
    Reposts,
    Saves,
    Follows,
    Plays,
}

impl WatchedTable {
    /// Every watched table, in notification-subscription order.
    pub const ALL: [WatchedTable; 7] = [
        WatchedTable::Users,
        WatchedTable::Tracks,
        WatchedTable::Playlists,
        WatchedTable::Reposts,
        WatchedTable::Saves,
        WatchedTable::Follows,
        WatchedTable::Plays,
    ];

    /// Tables that back a document index of their own.
    pub const INDEXED: [WatchedTable; 6] = [
        WatchedTable::Users,
        WatchedTable::Tracks,
        WatchedTable::Playlists,
        WatchedTable::Reposts,
        WatchedTable::Saves,
        WatchedTable::Plays,
    ];

    /// Table name, channel name and index alias.
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchedTable::Users => "users",
            WatchedTable::Tracks => "tracks",
            WatchedTable::Playlists => "playlists",
            WatchedTable::Reposts => "reposts",
            WatchedTable::Saves => "saves",
            WatchedTable::Follows => "follows",
            WatchedTable::Plays => "plays",
        }
    }

    /// Field holding the row version for checkpointing.
    pub fn version_field(&self) -> VersionField {
        match self {
            WatchedTable::Plays => VersionField::CreatedAt,
            _ => VersionField::Blocknumber,
        }
    }

    /// Whether this table has its own index.
    pub fn is_indexed(&self) -> bool {
        !matches!(self, WatchedTable::Follows)
    }
}

impl fmt::Display for WatchedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WatchedTable {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WatchedTable::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| SyncError::UnknownTable(s.to_string()))
    }
}
