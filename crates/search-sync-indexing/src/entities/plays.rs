use async_trait::async_trait;
use serde_json::{json, Value};

use search_sync_types::{BlocknumberCheckpoint, WatchedTable};

use crate::index_spec::EntityIndexSpec;

use super::index_body;

/// Raw play events. Versioned by `created_at`, checkpointed in epoch ms.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaysSpec;

#[async_trait]
impl EntityIndexSpec for PlaysSpec {
    fn table(&self) -> WatchedTable {
        WatchedTable::Plays
    }

    fn generation(&self) -> u32 {
        1
    }

    fn mapping(&self) -> Value {
        index_body(json!({
            "id": { "type": "keyword" },
            "user_id": { "type": "keyword" },
            "play_item_id": { "type": "keyword" },
            "source": { "type": "keyword" },
            "slot": { "type": "long" },
            "signature": { "type": "keyword" },
            "created_at": { "type": "date" },
            "updated_at": { "type": "date" }
        }))
    }

    fn base_select(&self) -> String {
        "select * from plays where 1 = 1".to_string()
    }

    fn id_column(&self) -> &'static str {
        "plays.id"
    }

    fn version_column(&self) -> &'static str {
        "plays.created_at"
    }

    fn checkpoint_sql(&self, checkpoint: &BlocknumberCheckpoint) -> String {
        // created_at is stored without a zone and indexed as UTC.
        format!(
            " and plays.created_at >= to_timestamp({} / 1000.0) at time zone 'UTC'",
            checkpoint.get(WatchedTable::Plays)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_is_epoch_millis() {
        let cp = BlocknumberCheckpoint::default().with(WatchedTable::Plays, 1_704_067_201_500);
        assert_eq!(
            PlaysSpec.checkpoint_sql(&cp),
            " and plays.created_at >= to_timestamp(1704067201500 / 1000.0) at time zone 'UTC'"
        );
        assert_eq!(PlaysSpec.table().version_field().as_str(), "created_at");
    }

    #[test]
    fn test_document_id_from_id_column() {
        let row = json!({"id": 9001, "play_item_id": 42}).as_object().cloned().unwrap();
        assert_eq!(PlaysSpec.document_id(&row).as_deref(), Some("9001"));
    }
}
