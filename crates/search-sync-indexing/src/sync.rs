//! Every entity kind's indexer, driven together.

use std::sync::Arc;

use futures::future::try_join_all;
use tracing::info;

use search_sync_conn::{Database, DocumentStore};
use search_sync_types::{BlocknumberCheckpoint, WatchedTable};

use crate::entities::{PlaylistsSpec, PlaysSpec, SocialKind, SocialSpec, TracksSpec, UsersSpec};
use crate::error::IndexingError;
use crate::indexer::{CatchupStats, EntityIndexer, IndexerConfig, ManagedIndex};
use crate::pending::PendingUpdates;

/// How a kind's catchup was scoped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatchupMode {
    /// Replayed every row into a new or dropped generation
    Full,
    /// Replayed rows changed since the checkpoint
    Incremental,
}

/// Outcome of one kind's catchup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindCatchup {
    pub table: WatchedTable,
    pub mode: CatchupMode,
    pub stats: CatchupStats,
}

/// One indexer per indexed table.
pub struct IndexerSet {
    pub users: EntityIndexer<UsersSpec>,
    pub tracks: EntityIndexer<TracksSpec>,
    pub playlists: EntityIndexer<PlaylistsSpec>,
    pub reposts: EntityIndexer<SocialSpec>,
    pub saves: EntityIndexer<SocialSpec>,
    pub plays: EntityIndexer<PlaysSpec>,
}

impl IndexerSet {
    pub fn new(db: Arc<dyn Database>, store: Arc<dyn DocumentStore>, config: IndexerConfig) -> Self {
        Self {
            users: EntityIndexer::new(UsersSpec, Arc::clone(&db), Arc::clone(&store), config.clone()),
            tracks: EntityIndexer::new(TracksSpec, Arc::clone(&db), Arc::clone(&store), config.clone()),
            playlists: EntityIndexer::new(
                PlaylistsSpec,
                Arc::clone(&db),
                Arc::clone(&store),
                config.clone(),
            ),
            reposts: EntityIndexer::new(
                SocialSpec::new(SocialKind::Reposts),
                Arc::clone(&db),
                Arc::clone(&store),
                config.clone(),
            ),
            saves: EntityIndexer::new(
                SocialSpec::new(SocialKind::Saves),
                Arc::clone(&db),
                Arc::clone(&store),
                config.clone(),
            ),
            plays: EntityIndexer::new(PlaysSpec, db, store, config),
        }
    }

    /// All indexers in table order.
    pub fn all(&self) -> [&dyn ManagedIndex; 6] {
        [
            &self.users,
            &self.tracks,
            &self.playlists,
            &self.reposts,
            &self.saves,
            &self.plays,
        ]
    }

    /// Create every physical index.
    pub async fn create_indices(&self, drop_existing: bool) -> Result<(), IndexingError> {
        for indexer in self.all() {
            indexer.create_index(drop_existing).await?;
        }
        Ok(())
    }

    /// Catch every kind up concurrently.
    ///
    /// A kind whose alias does not point at its current generation, or every
    /// kind when `force_full` is set, is replayed in full; the rest are scoped
    /// to `checkpoint`.
    pub async fn catchup_all(
        &self,
        checkpoint: &BlocknumberCheckpoint,
        force_full: bool,
    ) -> Result<Vec<KindCatchup>, IndexingError> {
        try_join_all(self.all().into_iter().map(|indexer| async move {
            let mode = if force_full || !indexer.is_live().await? {
                CatchupMode::Full
            } else {
                CatchupMode::Incremental
            };
            let scope = match mode {
                CatchupMode::Full => None,
                CatchupMode::Incremental => Some(checkpoint),
            };
            let stats = indexer.catchup(scope).await?;
            Ok::<_, IndexingError>(KindCatchup {
                table: indexer.table(),
                mode,
                stats,
            })
        }))
        .await
    }

    /// Point every alias at its current generation and drop old ones.
    pub async fn cutover_all(&self) -> Result<(), IndexingError> {
        for indexer in self.all() {
            indexer.cutover_alias().await?;
            indexer.cleanup_old_indices().await?;
        }
        Ok(())
    }

    /// Refresh every current generation.
    pub async fn refresh_all(&self) -> Result<(), IndexingError> {
        for indexer in self.all() {
            indexer.refresh().await?;
        }
        Ok(())
    }

    /// Index one drained accumulator. Returns documents written.
    pub async fn process_pending(&self, updates: PendingUpdates) -> Result<usize, IndexingError> {
        let user_ids: Vec<i64> = updates.user_ids.into_iter().collect();
        let track_ids: Vec<i64> = updates.track_ids.into_iter().collect();
        let playlist_ids: Vec<i64> = updates.playlist_ids.into_iter().collect();

        let (users, tracks, playlists, reposts, saves, plays) = futures::try_join!(
            self.users.index_ids(&user_ids),
            self.tracks.index_ids(&track_ids),
            self.playlists.index_ids(&playlist_ids),
            self.reposts.index_rows(updates.reposts),
            self.saves.index_rows(updates.saves),
            self.plays.index_rows(updates.plays),
        )?;

        let written = users + tracks + playlists + reposts + saves + plays;
        info!(
            users = users,
            tracks = tracks,
            playlists = playlists,
            reposts = reposts,
            saves = saves,
            plays = plays,
            "processed pending updates"
        );
        Ok(written)
    }
}
