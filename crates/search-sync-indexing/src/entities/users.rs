use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use search_sync_conn::{ConnError, Database};
use search_sync_types::{doc_i64, doc_str, BlocknumberCheckpoint, Document, WatchedTable};

use crate::index_spec::EntityIndexSpec;
use crate::transform::{count_from_array, group_by, id_list, suggest};

use super::index_body;

/// Users, with their public tracks and followee ids embedded.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsersSpec;

#[async_trait]
impl EntityIndexSpec for UsersSpec {
    fn table(&self) -> WatchedTable {
        WatchedTable::Users
    }

    fn generation(&self) -> u32 {
        1
    }

    fn mapping(&self) -> Value {
        index_body(json!({
            "blocknumber": { "type": "integer" },
            "created_at": { "type": "date" },
            "user_id": { "type": "keyword" },
            "handle": { "type": "keyword", "normalizer": "lower_asciifolding" },
            "name": { "type": "text" },
            "bio": { "type": "text" },
            "location": { "type": "keyword" },
            "is_verified": { "type": "boolean" },
            "is_creator": { "type": "boolean" },
            "suggest": { "type": "search_as_you_type" },
            "follower_count": { "type": "integer" },
            "following_count": { "type": "integer" },
            "following_ids": { "type": "keyword" },
            "track_count": { "type": "integer" },
            "tracks": {
                "properties": {
                    "track_id": { "type": "keyword" },
                    "title": { "type": "text" },
                    "genre": { "type": "keyword" },
                    "mood": { "type": "keyword" },
                    "tags": { "type": "keyword" },
                    "created_at": { "type": "date" }
                }
            }
        }))
    }

    fn base_select(&self) -> String {
        "select \
            users.*, \
            (select count(*) from follows \
              where follows.is_current = true \
              and follows.is_delete = false \
              and follows.followee_user_id = users.user_id) as follower_count \
          from users \
          where users.is_current = true"
            .to_string()
    }

    fn id_column(&self) -> &'static str {
        "users.user_id"
    }

    fn version_column(&self) -> &'static str {
        "users.blocknumber"
    }

    fn checkpoint_sql(&self, checkpoint: &BlocknumberCheckpoint) -> String {
        // Follows carry no index of their own; they share the users high-water mark.
        let users = checkpoint.get(WatchedTable::Users);
        let tracks = checkpoint.get(WatchedTable::Tracks);
        format!(
            " and (users.blocknumber >= {users} \
              or users.user_id in (select follower_user_id from follows where follows.blocknumber >= {users}) \
              or users.user_id in (select owner_id from tracks where tracks.blocknumber >= {tracks}))"
        )
    }

    async fn with_batch(&self, db: &dyn Database, docs: &mut [Document]) -> Result<(), ConnError> {
        let ids: Vec<i64> = docs.iter().filter_map(|d| doc_i64(d, "user_id")).collect();
        if ids.is_empty() {
            return Ok(());
        }
        let ids = id_list(ids);

        let tracks = db
            .query(&format!(
                "select owner_id, track_id, title, genre, mood, tags, created_at \
                  from tracks \
                  where is_current = true and is_delete = false and is_unlisted = false \
                  and owner_id in ({ids}) \
                  order by owner_id, track_id"
            ))
            .await?;
        let follows = db
            .query(&format!(
                "select follower_user_id, followee_user_id \
                  from follows \
                  where is_current = true and is_delete = false \
                  and follower_user_id in ({ids}) \
                  order by follower_user_id, followee_user_id"
            ))
            .await?;
        debug!(users = docs.len(), tracks = tracks.len(), follows = follows.len(), "fetched user relations");

        let mut tracks_by_owner = group_by(tracks, "owner_id");
        let mut followees = group_by(follows, "follower_user_id");

        for doc in docs.iter_mut() {
            let Some(user_id) = doc_i64(doc, "user_id") else {
                continue;
            };
            let tracks = tracks_by_owner.remove(&user_id).unwrap_or_default();
            let following_ids: Vec<Value> = followees
                .remove(&user_id)
                .unwrap_or_default()
                .iter()
                .filter_map(|f| f.get("followee_user_id").cloned())
                .collect();
            doc.insert("tracks".to_string(), Value::Array(tracks));
            doc.insert("following_ids".to_string(), Value::Array(following_ids));
        }
        Ok(())
    }

    fn with_row(&self, doc: &mut Document) {
        let text = suggest([doc_str(doc, "handle"), doc_str(doc, "name")]);
        doc.insert("suggest".to_string(), Value::String(text));
        count_from_array(doc, "tracks", "track_count");
        count_from_array(doc, "following_ids", "following_count");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use search_sync_conn::ScriptedDatabase;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_checkpoint_sql_unions_sources() {
        let cp = BlocknumberCheckpoint::default()
            .with(WatchedTable::Users, 500)
            .with(WatchedTable::Tracks, 480);
        let sql = UsersSpec.checkpoint_sql(&cp);
        assert!(sql.starts_with(" and ("));
        assert!(sql.contains("users.blocknumber >= 500"));
        assert!(sql.contains("follows.blocknumber >= 500"));
        assert!(sql.contains("tracks.blocknumber >= 480"));
    }

    #[tokio::test]
    async fn test_with_batch_embeds_relations_in_two_queries() {
        let db = ScriptedDatabase::new();
        db.on_query(
            "from tracks",
            vec![
                doc(json!({"owner_id": 1, "track_id": 10, "title": "a"})),
                doc(json!({"owner_id": 1, "track_id": 11, "title": "b"})),
            ],
        );
        db.on_query(
            "from follows",
            vec![
                doc(json!({"follower_user_id": 2, "followee_user_id": 1})),
                doc(json!({"follower_user_id": 2, "followee_user_id": 3})),
            ],
        );

        let mut docs = vec![
            doc(json!({"user_id": 1, "handle": "lena"})),
            doc(json!({"user_id": 2, "handle": "max"})),
        ];
        UsersSpec.with_batch(&db, &mut docs).await.unwrap();
        for d in docs.iter_mut() {
            UsersSpec.with_row(d);
        }

        assert_eq!(db.queries().len(), 2);
        assert!(db.queries()[0].contains("owner_id in (1,2)"));
        assert_eq!(docs[0]["track_count"], 2);
        assert_eq!(docs[0]["following_count"], 0);
        assert_eq!(docs[1]["track_count"], 0);
        assert_eq!(docs[1]["following_ids"], json!([1, 3]));
        assert_eq!(docs[1]["following_count"], 2);
    }

    #[test]
    fn test_suggest_from_handle_and_name() {
        let mut d = doc(json!({"handle": "lena", "name": "Lena K"}));
        UsersSpec.with_row(&mut d);
        assert_eq!(d["suggest"], "lena Lena K");

        let mut d = doc(json!({"handle": "lena", "name": null}));
        UsersSpec.with_row(&mut d);
        assert_eq!(d["suggest"], "lena");
    }
}
