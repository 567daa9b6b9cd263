//! Accumulator of changes waiting to be indexed.
//!
//! The listener merges into a [`PendingBuffer`]; the drain loop takes the
//! whole accumulator out in one step and leaves an empty one behind.

use std::collections::BTreeSet;
use std::mem;
use std::sync::{Mutex, MutexGuard, PoisonError};

use search_sync_types::Document;

/// Stale entity ids plus raw event rows awaiting indexing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingUpdates {
    pub user_ids: BTreeSet<i64>,
    pub track_ids: BTreeSet<i64>,
    pub playlist_ids: BTreeSet<i64>,
    /// Raw repost rows, indexed as-is
    pub reposts: Vec<Document>,
    /// Raw save rows, indexed as-is
    pub saves: Vec<Document>,
    /// Raw play rows, indexed as-is
    pub plays: Vec<Document>,
}

impl PendingUpdates {
    pub fn is_empty(&self) -> bool {
        self.user_ids.is_empty()
            && self.track_ids.is_empty()
            && self.playlist_ids.is_empty()
            && self.reposts.is_empty()
            && self.saves.is_empty()
            && self.plays.is_empty()
    }

    /// Total number of ids and rows held.
    pub fn len(&self) -> usize {
        self.user_ids.len()
            + self.track_ids.len()
            + self.playlist_ids.len()
            + self.reposts.len()
            + self.saves.len()
            + self.plays.len()
    }

    /// Fold another accumulator into this one.
    pub fn merge(&mut self, other: PendingUpdates) {
        self.user_ids.extend(other.user_ids);
        self.track_ids.extend(other.track_ids);
        self.playlist_ids.extend(other.playlist_ids);
        self.reposts.extend(other.reposts);
        self.saves.extend(other.saves);
        self.plays.extend(other.plays);
    }
}

/// Shared, lock-protected [`PendingUpdates`].
///
/// Owned by the listener and handed to the drain loop by reference.
#[derive(Debug, Default)]
pub struct PendingBuffer {
    inner: Mutex<PendingUpdates>,
}

impl PendingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PendingUpdates> {
        // A panicking writer leaves plain sets behind; keep using them.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Merge a batch of changes under a single lock acquisition.
    pub fn merge(&self, updates: PendingUpdates) {
        if updates.is_empty() {
            return;
        }
        self.lock().merge(updates);
    }

    /// Swap in an empty accumulator and return the previous one.
    ///
    /// Returns `None` when nothing was pending.
    pub fn take(&self) -> Option<PendingUpdates> {
        let mut guard = self.lock();
        if guard.is_empty() {
            return None;
        }
        Some(mem::take(&mut *guard))
    }

    /// Number of ids and rows currently pending.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn tracks(ids: &[i64]) -> PendingUpdates {
        PendingUpdates {
            track_ids: ids.iter().copied().collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_take_empty_returns_none() {
        let buffer = PendingBuffer::new();
        assert!(buffer.take().is_none());
        buffer.merge(PendingUpdates::default());
        assert!(buffer.take().is_none());
    }

    #[test]
    fn test_take_resets() {
        let buffer = PendingBuffer::new();
        buffer.merge(tracks(&[42]));
        buffer.merge(tracks(&[42, 7]));

        let drained = buffer.take().unwrap();
        assert_eq!(drained.track_ids, BTreeSet::from([7, 42]));
        assert!(buffer.is_empty());
        assert!(buffer.take().is_none());
    }

    #[test]
    fn test_concurrent_merge_and_take_loses_nothing() {
        let buffer = Arc::new(PendingBuffer::new());
        let writers: Vec<_> = (0..4)
            .map(|w| {
                let buffer = Arc::clone(&buffer);
                std::thread::spawn(move || {
                    for i in 0..250 {
                        buffer.merge(tracks(&[w * 1000 + i]));
                    }
                })
            })
            .collect();

        let mut seen = BTreeSet::new();
        let mut total = 0;
        for _ in 0..50 {
            if let Some(drained) = buffer.take() {
                total += drained.track_ids.len();
                seen.extend(drained.track_ids);
            }
        }
        for writer in writers {
            writer.join().unwrap();
        }
        if let Some(drained) = buffer.take() {
            total += drained.track_ids.len();
            seen.extend(drained.track_ids);
        }

        // Every id observed exactly once across all drains.
        assert_eq!(seen.len(), 1000);
        assert_eq!(total, 1000);
    }
}
