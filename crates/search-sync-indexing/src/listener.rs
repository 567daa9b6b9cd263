//! Change notifications into pending updates.
//!
//! Each watched table publishes its changed row as JSON on a channel named
//! after the table. The listener decodes it, runs any secondary lookups the
//! table needs, then merges the result into the [`PendingBuffer`] under a
//! single lock so a concurrent drain sees all of it or none of it.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use search_sync_conn::{Database, Notification, PgListenConnection};
use search_sync_types::{doc_i64, doc_str, Document, WatchedTable};

use crate::error::IndexingError;
use crate::pending::{PendingBuffer, PendingUpdates};

const TRACKS_BY_OWNER_SQL: &str = "select track_id from tracks \
    where is_current = true and owner_id = $1::bigint";
const PLAYLISTS_BY_OWNER_SQL: &str = "select playlist_id from playlists \
    where is_current = true and playlist_owner_id = $1::bigint";
const PLAYLISTS_CONTAINING_TRACK_SQL: &str = "select playlist_id from playlists \
    where is_current = true \
    and playlist_contents->'track_ids' @> jsonb_build_array(jsonb_build_object('track', $1::bigint))";
const REMIXES_OF_TRACK_SQL: &str = "select child_track_id from remixes \
    where parent_track_id = $1::bigint";

/// Listens for row changes and accumulates what needs re-indexing.
pub struct ChangeListener {
    db: Arc<dyn Database>,
    pending: Arc<PendingBuffer>,
}

impl ChangeListener {
    pub fn new(db: Arc<dyn Database>, pending: Arc<PendingBuffer>) -> Self {
        Self { db, pending }
    }

    /// The accumulator this listener writes to.
    pub fn pending(&self) -> &Arc<PendingBuffer> {
        &self.pending
    }

    /// Take everything accumulated so far, leaving an empty accumulator.
    pub fn drain(&self) -> Option<PendingUpdates> {
        self.pending.take()
    }

    /// Decode and apply one notification.
    pub async fn handle_notification(&self, notification: &Notification) -> Result<(), IndexingError> {
        let table: WatchedTable = notification
            .channel
            .parse()
            .map_err(|_| IndexingError::UnknownChannel(notification.channel.clone()))?;
        let row: Document =
            serde_json::from_str(&notification.payload).map_err(|e| IndexingError::Payload {
                channel: notification.channel.clone(),
                detail: e.to_string(),
            })?;
        self.apply(table, row).await
    }

    /// Mark whatever a changed `row` of `table` makes stale.
    ///
    /// Everything collected is merged in one step, including the row's own id
    /// when a later lookup fails, so the change is not lost with the error.
    pub async fn apply(&self, table: WatchedTable, row: Document) -> Result<(), IndexingError> {
        let mut updates = PendingUpdates::default();
        let result = self.collect(table, row, &mut updates).await;

        debug!(table = %table, marked = updates.len(), "applied change");
        self.pending.merge(updates);
        result
    }

    async fn collect(
        &self,
        table: WatchedTable,
        row: Document,
        updates: &mut PendingUpdates,
    ) -> Result<(), IndexingError> {
        match table {
            WatchedTable::Users => {
                if let Some(user_id) = required_id(table, &row, "user_id") {
                    updates.user_ids.insert(user_id);
                    updates
                        .track_ids
                        .extend(self.db.query_ids(TRACKS_BY_OWNER_SQL, user_id).await?);
                    updates
                        .playlist_ids
                        .extend(self.db.query_ids(PLAYLISTS_BY_OWNER_SQL, user_id).await?);
                }
            }
            WatchedTable::Tracks => {
                if let Some(track_id) = required_id(table, &row, "track_id") {
                    updates.track_ids.insert(track_id);
                    updates.playlist_ids.extend(
                        self.db
                            .query_ids(PLAYLISTS_CONTAINING_TRACK_SQL, track_id)
                            .await?,
                    );
                    updates
                        .track_ids
                        .extend(self.db.query_ids(REMIXES_OF_TRACK_SQL, track_id).await?);
                }
            }
            WatchedTable::Playlists => {
                if let Some(playlist_id) = required_id(table, &row, "playlist_id") {
                    updates.playlist_ids.insert(playlist_id);
                }
            }
            WatchedTable::Reposts => {
                mark_item(updates, &row, "repost_type", "repost_item_id");
                updates.reposts.push(row);
            }
            WatchedTable::Saves => {
                mark_item(updates, &row, "save_type", "save_item_id");
                updates.saves.push(row);
            }
            WatchedTable::Follows => {
                // Only the follower: the followee's counts come from the aggregate refresh.
                if let Some(follower) = required_id(table, &row, "follower_user_id") {
                    updates.user_ids.insert(follower);
                }
            }
            WatchedTable::Plays => updates.plays.push(row),
        }
        Ok(())
    }

    /// Open the listen connection and handle notifications on a background task.
    ///
    /// Undecodable payloads, unknown channels and failed lookups are logged
    /// and skipped. The task ends when the connection closes; callers treat
    /// that as fatal.
    pub async fn start(self: Arc<Self>, database_url: &str) -> Result<JoinHandle<()>, IndexingError> {
        let channels: Vec<&str> = WatchedTable::ALL.iter().map(|t| t.as_str()).collect();
        let mut connection = PgListenConnection::connect(database_url, &channels).await?;

        Ok(tokio::spawn(async move {
            while let Some(notification) = connection.recv().await {
                if let Err(e) = self.handle_notification(&notification).await {
                    warn!(channel = %notification.channel, error = %e, "skipping notification");
                }
            }
            error!("listen connection closed, no further changes will be applied");
        }))
    }
}

fn required_id(table: WatchedTable, row: &Document, key: &str) -> Option<i64> {
    let id = doc_i64(row, key);
    if id.is_none() {
        warn!(table = %table, key = key, "change row has no id");
    }
    id
}

/// Mark the track or playlist a repost/save acts on.
fn mark_item(updates: &mut PendingUpdates, row: &Document, type_key: &str, item_key: &str) {
    let Some(item_id) = doc_i64(row, item_key) else {
        warn!(key = item_key, "social row has no item id");
        return;
    };
    match doc_str(row, type_key) {
        Some("track") => {
            updates.track_ids.insert(item_id);
        }
        Some("playlist") | Some("album") => {
            updates.playlist_ids.insert(item_id);
        }
        other => warn!(item_type = ?other, "unknown social item type"),
    }
}
