use async_trait::async_trait;
use serde_json::{json, Value};

use search_sync_types::{doc_str, BlocknumberCheckpoint, Document, WatchedTable};

use crate::index_spec::EntityIndexSpec;
use crate::transform::{
    count_from_array, normalize_tags, owner_fields, permalink, prefer_release_date, suggest,
};

use super::{index_body, owner_properties, OWNER_OBJECT_SQL};

/// Trailing window of plays that marks a track changed regardless of version.
const RECENT_PLAYS_WINDOW: &str = "10 minutes";

/// Tracks, with owner summary, reposters, savers and play count embedded.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracksSpec;

/// Total of `track_segments[].duration`, rounded up to whole seconds.
fn segments_duration(doc: &Document) -> Option<i64> {
    let segments = doc.get("track_segments")?.as_array()?;
    if segments.is_empty() {
        return None;
    }
    let total: f64 = segments
        .iter()
        .filter_map(|s| s.get("duration").and_then(Value::as_f64))
        .sum();
    Some(total.ceil() as i64)
}

#[async_trait]
impl EntityIndexSpec for TracksSpec {
    fn table(&self) -> WatchedTable {
        WatchedTable::Tracks
    }

    fn generation(&self) -> u32 {
        1
    }

    fn mapping(&self) -> Value {
        index_body(json!({
            "blocknumber": { "type": "integer" },
            "created_at": { "type": "date" },
            "track_id": { "type": "keyword" },
            "owner_id": { "type": "keyword" },
            "title": { "type": "text" },
            "description": { "type": "text" },
            "genre": { "type": "keyword" },
            "mood": { "type": "keyword" },
            "tags": { "type": "keyword", "normalizer": "lower_asciifolding" },
            "is_delete": { "type": "boolean" },
            "is_unlisted": { "type": "boolean" },
            "downloadable": { "type": "boolean" },
            "duration": { "type": "integer" },
            "permalink": { "type": "keyword" },
            "suggest": { "type": "search_as_you_type" },
            "play_count": { "type": "integer" },
            "repost_count": { "type": "integer" },
            "favorite_count": { "type": "integer" },
            "reposted_by": { "type": "keyword" },
            "saved_by": { "type": "keyword" },
            "user": owner_properties()
        }))
    }

    fn base_select(&self) -> String {
        format!(
            "select \
                tracks.*, \
                (tracks.download->>'is_downloadable')::boolean as downloadable, \
                coalesce(aggregate_plays.count, 0) as play_count, \
                {OWNER_OBJECT_SQL} as user, \
                array(select slug from track_routes r \
                  where r.track_id = tracks.track_id \
                  order by r.blocknumber asc) as routes, \
                array(select user_id from reposts \
                  where reposts.is_current = true and reposts.is_delete = false \
                  and reposts.repost_type = 'track' and reposts.repost_item_id = tracks.track_id \
                  order by reposts.user_id) as reposted_by, \
                array(select user_id from saves \
                  where saves.is_current = true and saves.is_delete = false \
                  and saves.save_type = 'track' and saves.save_item_id = tracks.track_id \
                  order by saves.user_id) as saved_by \
              from tracks \
              join users on tracks.owner_id = users.user_id and users.is_current = true \
              left join aggregate_plays on tracks.track_id = aggregate_plays.play_item_id \
              where tracks.is_current = true"
        )
    }

    fn id_column(&self) -> &'static str {
        "tracks.track_id"
    }

    fn version_column(&self) -> &'static str {
        "tracks.blocknumber"
    }

    fn batch_size(&self) -> usize {
        250
    }

    fn checkpoint_sql(&self, checkpoint: &BlocknumberCheckpoint) -> String {
        let tracks = checkpoint.get(WatchedTable::Tracks);
        let users = checkpoint.get(WatchedTable::Users);
        let saves = checkpoint.get(WatchedTable::Saves);
        let reposts = checkpoint.get(WatchedTable::Reposts);
        format!(
            " and (tracks.blocknumber >= {tracks} \
              or tracks.owner_id in (select user_id from users where users.blocknumber >= {users}) \
              or tracks.track_id in (select save_item_id from saves \
                where saves.save_type = 'track' and saves.blocknumber >= {saves}) \
              or tracks.track_id in (select repost_item_id from reposts \
                where reposts.repost_type = 'track' and reposts.blocknumber >= {reposts}) \
              or tracks.track_id in (select play_item_id from plays \
                where plays.created_at > now() - interval '{RECENT_PLAYS_WINDOW}'))"
        )
    }

    fn with_row(&self, doc: &mut Document) {
        let (handle, name) = owner_fields(doc);
        let text = suggest([doc_str(doc, "title"), handle.as_deref(), name.as_deref()]);
        doc.insert("suggest".to_string(), Value::String(text));

        normalize_tags(doc);
        count_from_array(doc, "reposted_by", "repost_count");
        count_from_array(doc, "saved_by", "favorite_count");

        if let Some(duration) = segments_duration(doc) {
            doc.insert("duration".to_string(), Value::from(duration));
        }
        if let Some(link) = permalink(doc) {
            doc.insert("permalink".to_string(), Value::String(link));
        }
        prefer_release_date(doc);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn sample() -> Document {
        doc(json!({
            "track_id": 42,
            "title": "Night Drive",
            "tags": "synth, night ,synth",
            "user": {"handle": "lena", "name": "Lena K"},
            "routes": ["night-drive", "night-drive-2"],
            "reposted_by": [3, 4],
            "saved_by": [5],
            "track_segments": [{"duration": 6.1}, {"duration": 6.2}, {"duration": 0.5}],
            "created_at": "2023-03-01T10:00:00",
            "release_date": "2023-02-14T00:00:00"
        }))
    }

    #[test]
    fn test_finalize() {
        let mut d = sample();
        TracksSpec.with_row(&mut d);

        assert_eq!(d["suggest"], "Night Drive lena Lena K");
        assert_eq!(d["tags"], json!(["synth", "night"]));
        assert_eq!(d["repost_count"], 2);
        assert_eq!(d["favorite_count"], 1);
        assert_eq!(d["duration"], 13);
        assert_eq!(d["permalink"], "/lena/night-drive-2");
        assert_eq!(d["created_at"], "2023-02-14T00:00:00");
    }

    #[test]
    fn test_finalize_is_deterministic() {
        let mut a = sample();
        let mut b = sample();
        TracksSpec.with_row(&mut a);
        TracksSpec.with_row(&mut b);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_no_segments_keeps_no_duration() {
        let mut d = doc(json!({"track_id": 1, "track_segments": []}));
        TracksSpec.with_row(&mut d);
        assert!(d.get("duration").is_none());
        assert!(d.get("permalink").is_none());
    }

    #[test]
    fn test_checkpoint_sql_includes_recent_plays() {
        let cp = BlocknumberCheckpoint::default()
            .with(WatchedTable::Tracks, 100)
            .with(WatchedTable::Saves, 80)
            .with(WatchedTable::Reposts, 95);
        let sql = TracksSpec.checkpoint_sql(&cp);
        assert!(sql.contains("tracks.blocknumber >= 100"));
        assert!(sql.contains("saves.blocknumber >= 80"));
        assert!(sql.contains("reposts.blocknumber >= 95"));
        assert!(sql.contains("interval '10 minutes'"));
    }
}
