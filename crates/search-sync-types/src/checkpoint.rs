//! Per-table checkpoints derived from the index itself.
//!
//! A checkpoint is never stored on its own: it is recomputed from the
//! highest version field present in each live index, so re-running catchup
//! after a crash picks up from what actually landed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::table::WatchedTable;

/// Highest indexed version per watched table.
///
/// Block numbers for most tables; epoch milliseconds for tables versioned by
/// `created_at`. Missing tables read as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlocknumberCheckpoint {
    values: BTreeMap<WatchedTable, i64>,
}

impl BlocknumberCheckpoint {
    /// Create a checkpoint with an explicit zero entry for every table given.
    pub fn zeroed(tables: &[WatchedTable]) -> Self {
        Self {
            values: tables.iter().map(|t| (*t, 0)).collect(),
        }
    }

    /// Version for a table, zero when absent.
    pub fn get(&self, table: WatchedTable) -> i64 {
        self.values.get(&table).copied().unwrap_or(0)
    }

    /// Record the version for a table.
    pub fn set(&mut self, table: WatchedTable, value: i64) {
        self.values.insert(table, value);
    }

    /// Builder-style [`set`](Self::set).
    pub fn with(mut self, table: WatchedTable, value: i64) -> Self {
        self.set(table, value);
        self
    }

    /// Whether the table has an entry.
    pub fn contains(&self, table: WatchedTable) -> bool {
        self.values.contains_key(&table)
    }

    /// Iterate over `(table, version)` pairs in table order.
    pub fn iter(&self) -> impl Iterator<Item = (WatchedTable, i64)> + '_ {
        self.values.iter().map(|(t, v)| (*t, *v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeroed_has_entry_per_table() {
        let cp = BlocknumberCheckpoint::zeroed(&WatchedTable::ALL);
        for table in WatchedTable::ALL {
            assert!(cp.contains(table));
            assert_eq!(cp.get(table), 0);
        }
    }

    #[test]
    fn test_missing_table_reads_zero() {
        let cp = BlocknumberCheckpoint::default().with(WatchedTable::Tracks, 100);
        assert_eq!(cp.get(WatchedTable::Tracks), 100);
        assert_eq!(cp.get(WatchedTable::Saves), 0);
        assert!(!cp.contains(WatchedTable::Saves));
    }

    #[test]
    fn test_json_keys_are_table_names() {
        let cp = BlocknumberCheckpoint::default()
            .with(WatchedTable::Tracks, 100)
            .with(WatchedTable::Saves, 80);
        let json = serde_json::to_string(&cp).unwrap();
        assert_eq!(json, r#"{"tracks":100,"saves":80}"#);
    }
}
