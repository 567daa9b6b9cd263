use async_trait::async_trait;
use serde_json::{json, Value};

use search_sync_types::{doc_i64, doc_str, BlocknumberCheckpoint, Document, WatchedTable};

use crate::index_spec::EntityIndexSpec;

use super::index_body;

/// Which social action table a [`SocialSpec`] indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocialKind {
    Reposts,
    Saves,
}

impl SocialKind {
    fn table(self) -> WatchedTable {
        match self {
            SocialKind::Reposts => WatchedTable::Reposts,
            SocialKind::Saves => WatchedTable::Saves,
        }
    }

    /// Column naming the kind of item acted on (`track`, `playlist`, `album`).
    pub fn type_column(self) -> &'static str {
        match self {
            SocialKind::Reposts => "repost_type",
            SocialKind::Saves => "save_type",
        }
    }

    /// Column holding the id of the item acted on.
    pub fn item_column(self) -> &'static str {
        match self {
            SocialKind::Reposts => "repost_item_id",
            SocialKind::Saves => "save_item_id",
        }
    }
}

/// Raw repost or save edges, one document per `(user, type, item)`.
#[derive(Debug, Clone, Copy)]
pub struct SocialSpec {
    kind: SocialKind,
}

impl SocialSpec {
    pub fn new(kind: SocialKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> SocialKind {
        self.kind
    }
}

#[async_trait]
impl EntityIndexSpec for SocialSpec {
    fn table(&self) -> WatchedTable {
        self.kind.table()
    }

    fn generation(&self) -> u32 {
        1
    }

    fn mapping(&self) -> Value {
        let mut properties = json!({
            "blocknumber": { "type": "integer" },
            "created_at": { "type": "date" },
            "user_id": { "type": "keyword" },
            "item_key": { "type": "keyword" },
            "is_delete": { "type": "boolean" }
        });
        if let Some(map) = properties.as_object_mut() {
            map.insert(self.kind.type_column().to_string(), json!({ "type": "keyword" }));
            map.insert(self.kind.item_column().to_string(), json!({ "type": "keyword" }));
        }
        index_body(properties)
    }

    fn base_select(&self) -> String {
        let table = self.table();
        format!("select * from {table} where {table}.is_current = true")
    }

    fn id_column(&self) -> &'static str {
        match self.kind {
            SocialKind::Reposts => "reposts.repost_item_id",
            SocialKind::Saves => "saves.save_item_id",
        }
    }

    fn version_column(&self) -> &'static str {
        match self.kind {
            SocialKind::Reposts => "reposts.blocknumber",
            SocialKind::Saves => "saves.blocknumber",
        }
    }

    fn checkpoint_sql(&self, checkpoint: &BlocknumberCheckpoint) -> String {
        let table = self.table();
        format!(" and {table}.blocknumber >= {}", checkpoint.get(table))
    }

    /// `<user_id>-<type>-<item_id>`: a user acts on an item at most once.
    fn document_id(&self, doc: &Document) -> Option<String> {
        let user_id = doc_i64(doc, "user_id")?;
        let item_type = doc_str(doc, self.kind.type_column())?;
        let item_id = doc_i64(doc, self.kind.item_column())?;
        Some(format!("{user_id}-{item_type}-{item_id}"))
    }

    fn with_row(&self, doc: &mut Document) {
        let item_type = doc_str(doc, self.kind.type_column()).map(str::to_string);
        let item_id = doc_i64(doc, self.kind.item_column());
        if let (Some(item_type), Some(item_id)) = (item_type, item_id) {
            doc.insert("item_key".to_string(), Value::String(format!("{item_type}:{item_id}")));
        }
    }
}
