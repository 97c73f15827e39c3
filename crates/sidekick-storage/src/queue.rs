//! Upload queue view.
//!
//! What the uploader sees: a snapshot of pending recordings to work through,
//! an acknowledge step once the server confirms a file, and the set of
//! recordings that can be purged locally.

use std::sync::Arc;

use tracing::{debug, info};

use sidekick_core::error::Result;
use sidekick_core::types::{Recording, RecordingId};

use crate::db::Database;
use crate::repository::RecordingStore;

/// Pending recordings captured at one point in time.
///
/// Recordings inserted after the snapshot was taken do not appear. Iterating
/// does not consume the batch, so a consumer can restart from the top.
#[derive(Clone, Debug)]
pub struct PendingBatch {
    records: Arc<[Recording]>,
}

impl PendingBatch {
    pub fn iter(&self) -> std::slice::Iter<'_, Recording> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn ids(&self) -> Vec<RecordingId> {
        self.records.iter().map(|r| r.id).collect()
    }
}

impl<'a> IntoIterator for &'a PendingBatch {
    type Item = &'a Recording;
    type IntoIter = std::slice::Iter<'a, Recording>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Consumer-facing view over the recording store.
#[derive(Clone, Debug)]
pub struct UploadQueue {
    store: RecordingStore,
}

impl UploadQueue {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            store: RecordingStore::new(db),
        }
    }

    /// Snapshot of everything still waiting for upload.
    pub fn next_batch(&self) -> Result<PendingBatch> {
        let pending = self.store.get_pending()?;
        debug!(pending = pending.len(), "Upload batch taken");
        Ok(PendingBatch {
            records: pending.into(),
        })
    }

    /// Record a confirmed server-side upload: flag the recording, then drop
    /// it.
    ///
    /// The two steps are separate writes. A crash between them leaves an
    /// uploaded-but-present row, which is harmless; a crash before the first
    /// leaves it pending and it is uploaded again. Unknown ids are no-ops.
    pub fn acknowledge(&self, id: RecordingId) -> Result<()> {
        self.store.mark_uploaded(id)?;
        self.store.delete(id)?;
        debug!(id, "Upload acknowledged");
        Ok(())
    }

    /// Recordings already on the server but still held locally.
    pub fn purgeable(&self) -> Result<Vec<Recording>> {
        self.store.get_uploaded()
    }

    /// Drop every uploaded recording still held locally.
    pub fn purge_uploaded(&self) -> Result<usize> {
        let removed = self.store.delete_uploaded()?;
        info!(removed, "Purged uploaded recordings");
        Ok(removed)
    }

    pub fn pending_count(&self) -> Result<u64> {
        self.store.pending_count()
    }
}

#[cfg(test)]
mod tests {
    use sidekick_core::types::NewRecording;

    use super::*;

    fn make_queue() -> (RecordingStore, UploadQueue) {
        let db = Arc::new(Database::in_memory().unwrap());
        (RecordingStore::new(Arc::clone(&db)), UploadQueue::new(db))
    }

    fn insert(store: &RecordingStore, path: &str) -> RecordingId {
        store
            .insert(&NewRecording::new("cam1", path, path, 42))
            .unwrap()
    }

    #[test]
    fn test_batch_is_a_snapshot() {
        let (store, queue) = make_queue();
        let a = insert(&store, "/data/a.mp4");

        let batch = queue.next_batch().unwrap();
        insert(&store, "/data/b.mp4");

        assert_eq!(batch.ids(), vec![a]);
        assert_eq!(queue.next_batch().unwrap().len(), 2);
    }

    #[test]
    fn test_batch_is_restartable() {
        let (store, queue) = make_queue();
        insert(&store, "/data/a.mp4");
        insert(&store, "/data/b.mp4");

        let batch = queue.next_batch().unwrap();
        let first: Vec<_> = batch.iter().map(|r| r.id).collect();
        let second: Vec<_> = (&batch).into_iter().map(|r| r.id).collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn test_empty_batch() {
        let (_store, queue) = make_queue();
        let batch = queue.next_batch().unwrap();
        assert!(batch.is_empty());
        assert_eq!(batch.iter().count(), 0);
    }

    #[test]
    fn test_acknowledge_removes_record() {
        let (store, queue) = make_queue();
        let a = insert(&store, "/data/a.mp4");
        let b = insert(&store, "/data/b.mp4");

        queue.acknowledge(a).unwrap();
        assert!(store.find_by_id(a).unwrap().is_none());
        assert_eq!(queue.next_batch().unwrap().ids(), vec![b]);
        assert_eq!(queue.pending_count().unwrap(), 1);
    }

    #[test]
    fn test_acknowledge_unknown_id_is_noop() {
        let (store, queue) = make_queue();
        insert(&store, "/data/a.mp4");
        queue.acknowledge(999).unwrap();
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_acknowledge_after_partial_ack() {
        let (store, queue) = make_queue();
        let a = insert(&store, "/data/a.mp4");

        // Crash after the flag was set but before the delete.
        store.mark_uploaded(a).unwrap();
        assert!(queue.next_batch().unwrap().is_empty());
        assert_eq!(queue.purgeable().unwrap().len(), 1);

        queue.acknowledge(a).unwrap();
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_purge_uploaded() {
        let (store, queue) = make_queue();
        let a = insert(&store, "/data/a.mp4");
        let b = insert(&store, "/data/b.mp4");
        store.mark_uploaded(a).unwrap();

        let purgeable: Vec<_> = queue.purgeable().unwrap().iter().map(|r| r.id).collect();
        assert_eq!(purgeable, vec![a]);

        assert_eq!(queue.purge_uploaded().unwrap(), 1);
        assert!(queue.purgeable().unwrap().is_empty());
        assert_eq!(queue.next_batch().unwrap().ids(), vec![b]);
    }
}
