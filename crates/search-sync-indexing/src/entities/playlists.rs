use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use search_sync_conn::{ConnError, Database};
use search_sync_types::{doc_i64, doc_str, BlocknumberCheckpoint, Document, WatchedTable};

use crate::index_spec::EntityIndexSpec;
use crate::transform::{
    count_from_array, id_list, owner_fields, permalink, prefer_release_date, suggest,
};

use super::{index_body, owner_properties, OWNER_OBJECT_SQL};

/// Playlists and albums, with owner summary and contained tracks embedded.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaylistsSpec;

/// Track ids in playlist order from `playlist_contents.track_ids[].track`.
fn content_track_ids(doc: &Document) -> Vec<i64> {
    doc.get("playlist_contents")
        .and_then(|c| c.get("track_ids"))
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|e| {
                    let track = e.get("track")?;
                    track.as_i64().or_else(|| track.as_f64().map(|f| f as i64))
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl EntityIndexSpec for PlaylistsSpec {
    fn table(&self) -> WatchedTable {
        WatchedTable::Playlists
    }

    fn generation(&self) -> u32 {
        1
    }

    fn mapping(&self) -> Value {
        index_body(json!({
            "blocknumber": { "type": "integer" },
            "created_at": { "type": "date" },
            "playlist_id": { "type": "keyword" },
            "playlist_owner_id": { "type": "keyword" },
            "playlist_name": { "type": "text" },
            "description": { "type": "text" },
            "is_album": { "type": "boolean" },
            "is_private": { "type": "boolean" },
            "is_delete": { "type": "boolean" },
            "permalink": { "type": "keyword" },
            "suggest": { "type": "search_as_you_type" },
            "repost_count": { "type": "integer" },
            "save_count": { "type": "integer" },
            "reposted_by": { "type": "keyword" },
            "saved_by": { "type": "keyword" },
            "track_count": { "type": "integer" },
            "user": owner_properties(),
            "tracks": {
                "properties": {
                    "track_id": { "type": "keyword" },
                    "owner_id": { "type": "keyword" },
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
        format!(
            "select \
                playlists.*, \
                {OWNER_OBJECT_SQL} as user, \
                array(select slug from playlist_routes r \
                  where r.playlist_id = playlists.playlist_id \
                  order by r.blocknumber asc) as routes, \
                array(select user_id from reposts \
                  where reposts.is_current = true and reposts.is_delete = false \
                  and reposts.repost_type in ('playlist', 'album') \
                  and reposts.repost_item_id = playlists.playlist_id \
                  order by reposts.user_id) as reposted_by, \
                array(select user_id from saves \
                  where saves.is_current = true and saves.is_delete = false \
                  and saves.save_type in ('playlist', 'album') \
                  and saves.save_item_id = playlists.playlist_id \
                  order by saves.user_id) as saved_by \
              from playlists \
              join users on playlists.playlist_owner_id = users.user_id and users.is_current = true \
              where playlists.is_current = true"
        )
    }

    fn id_column(&self) -> &'static str {
        "playlists.playlist_id"
    }

    fn version_column(&self) -> &'static str {
        "playlists.blocknumber"
    }

    fn batch_size(&self) -> usize {
        250
    }

    fn checkpoint_sql(&self, checkpoint: &BlocknumberCheckpoint) -> String {
        let playlists = checkpoint.get(WatchedTable::Playlists);
        let users = checkpoint.get(WatchedTable::Users);
        let saves = checkpoint.get(WatchedTable::Saves);
        let reposts = checkpoint.get(WatchedTable::Reposts);
        format!(
            " and (playlists.blocknumber >= {playlists} \
              or playlists.playlist_owner_id in (select user_id from users where users.blocknumber >= {users}) \
              or playlists.playlist_id in (select save_item_id from saves \
                where saves.save_type in ('playlist', 'album') and saves.blocknumber >= {saves}) \
              or playlists.playlist_id in (select repost_item_id from reposts \
                where reposts.repost_type in ('playlist', 'album') and reposts.blocknumber >= {reposts}))"
        )
    }

    async fn with_batch(&self, db: &dyn Database, docs: &mut [Document]) -> Result<(), ConnError> {
        let mut wanted: Vec<i64> = docs.iter().flat_map(content_track_ids).collect();
        wanted.sort_unstable();
        wanted.dedup();

        let mut tracks: HashMap<i64, Value> = HashMap::new();
        if !wanted.is_empty() {
            let rows = db
                .query(&format!(
                    "select track_id, owner_id, title, genre, mood, tags, created_at \
                      from tracks \
                      where is_current = true and is_delete = false \
                      and track_id in ({})",
                    id_list(wanted.iter().copied())
                ))
                .await?;
            debug!(playlists = docs.len(), tracks = rows.len(), "fetched playlist tracks");
            for row in rows {
                if let Some(id) = doc_i64(&row, "track_id") {
                    tracks.insert(id, Value::Object(row));
                }
            }
        }

        for doc in docs.iter_mut() {
            let embedded: Vec<Value> = content_track_ids(doc)
                .iter()
                .filter_map(|id| tracks.get(id).cloned())
                .collect();
            doc.insert("tracks".to_string(), Value::Array(embedded));
        }
        Ok(())
    }

    fn with_row(&self, doc: &mut Document) {
        let (handle, name) = owner_fields(doc);
        let text = suggest([
            doc_str(doc, "playlist_name"),
            handle.as_deref(),
            name.as_deref(),
        ]);
        doc.insert("suggest".to_string(), Value::String(text));

        count_from_array(doc, "reposted_by", "repost_count");
        count_from_array(doc, "saved_by", "save_count");
        count_from_array(doc, "tracks", "track_count");

        if let Some(link) = permalink(doc) {
            doc.insert("permalink".to_string(), Value::String(link));
        }
        if doc.get("is_album").and_then(Value::as_bool) == Some(true) {
            prefer_release_date(doc);
        }
    }
}
