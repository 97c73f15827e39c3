//! Recording store.
//!
//! Sole owner of the `recording` table. Every read and write of recording
//! metadata goes through [`RecordingStore`], which shares one [`Database`]
//! handle with the rest of the process. The only write outside that table is
//! the full local reset in [`RecordingStore::clear_data`], which also empties
//! `event`.

use std::sync::Arc;

use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info, warn};

use sidekick_core::error::{Result, SidekickError};
use sidekick_core::types::{ClearResult, NewRecording, Recording, RecordingId};

use crate::db::Database;

const SELECT_RECORDING: &str =
    "SELECT id, device_name, group_name, device_id, recording_path, uploaded, size, name
     FROM recording";

/// Repository for downloaded recordings awaiting (or past) upload.
#[derive(Clone, Debug)]
pub struct RecordingStore {
    db: Arc<Database>,
}

impl RecordingStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Store a newly downloaded recording and return its id.
    ///
    /// Fails with `UniqueConstraintViolation` when the path is empty or
    /// already held; nothing is written in that case.
    pub fn insert(&self, recording: &NewRecording) -> Result<RecordingId> {
        if recording.recording_path.is_empty() {
            return Err(SidekickError::UniqueConstraintViolation {
                path: String::new(),
            });
        }

        let id = self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO recording
                     (device_name, group_name, device_id, recording_path, uploaded, size, name)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6)",
                params![
                    recording.device_name,
                    recording.group_name,
                    recording.device_id,
                    recording.recording_path,
                    recording.size,
                    recording.name,
                ],
            )
            .map_err(|e| insert_error(e, &recording.recording_path))?;
            Ok(conn.last_insert_rowid())
        })?;

        debug!(
            id,
            device = %recording.device_name,
            path = %recording.recording_path,
            "Recording stored"
        );
        Ok(id)
    }

    /// Find a recording by id.
    pub fn find_by_id(&self, id: RecordingId) -> Result<Option<Recording>> {
        self.db.with_conn(|conn| {
            conn.query_row(
                &format!("{} WHERE id = ?1", SELECT_RECORDING),
                params![id],
                row_to_recording,
            )
            .optional()
            .map_err(|e| SidekickError::StorageUnavailable(e.to_string()))
        })
    }

    /// Every recording, in insertion order.
    pub fn get_all(&self) -> Result<Vec<Recording>> {
        self.db
            .with_conn(|conn| query_recordings(conn, "ORDER BY id", params![]))
    }

    /// Uploaded recordings from one device, for reconciliation with the
    /// device's own file list.
    pub fn get_by_device(&self, device_name: &str) -> Result<Vec<Recording>> {
        self.db.with_conn(|conn| {
            query_recordings(
                conn,
                "WHERE uploaded = 1 AND device_name = ?1 ORDER BY id",
                params![device_name],
            )
        })
    }

    /// Uploaded recordings from one device within a group. `None` matches
    /// recordings stored without a group.
    pub fn get_by_device_in_group(
        &self,
        device_name: &str,
        group_name: Option<&str>,
    ) -> Result<Vec<Recording>> {
        self.db.with_conn(|conn| {
            query_recordings(
                conn,
                "WHERE uploaded = 1 AND device_name = ?1 AND group_name IS ?2 ORDER BY id",
                params![device_name, group_name],
            )
        })
    }

    /// Names of every recording held for a device, uploaded or not. The device
    /// layer diffs this against the device listing to skip known files.
    pub fn get_recording_names_for_device(&self, device_name: &str) -> Result<Vec<String>> {
        self.db.with_conn(|conn| {
            query_names(
                conn,
                "SELECT name FROM recording WHERE device_name = ?1 ORDER BY id",
                params![device_name],
            )
        })
    }

    /// Like [`get_recording_names_for_device`](Self::get_recording_names_for_device),
    /// restricted to one group. `None` matches recordings without a group.
    pub fn get_recording_names_for_device_in_group(
        &self,
        device_name: &str,
        group_name: Option<&str>,
    ) -> Result<Vec<String>> {
        self.db.with_conn(|conn| {
            query_names(
                conn,
                "SELECT name FROM recording
                 WHERE device_name = ?1 AND group_name IS ?2
                 ORDER BY id",
                params![device_name, group_name],
            )
        })
    }

    /// The upload backlog: every recording not yet acknowledged by the server.
    pub fn get_pending(&self) -> Result<Vec<Recording>> {
        self.db
            .with_conn(|conn| query_recordings(conn, "WHERE uploaded = 0 ORDER BY id", params![]))
    }

    /// Recordings the server already has but that are still held locally.
    pub fn get_uploaded(&self) -> Result<Vec<Recording>> {
        self.db
            .with_conn(|conn| query_recordings(conn, "WHERE uploaded = 1 ORDER BY id", params![]))
    }

    /// Flag a recording as uploaded. Returns whether a row was found; an
    /// unknown id is not an error because a delete may have won the race.
    pub fn mark_uploaded(&self, id: RecordingId) -> Result<bool> {
        let changed = self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE recording SET uploaded = 1 WHERE id = ?1",
                params![id],
            )
            .map_err(|e| {
                SidekickError::StorageUnavailable(format!(
                    "Failed to mark recording uploaded: {}",
                    e
                ))
            })
        })?;
        debug!(id, found = changed > 0, "Recording marked uploaded");
        Ok(changed > 0)
    }

    /// Delete a recording row. Returns whether a row was removed; an unknown
    /// id is a no-op.
    pub fn delete(&self, id: RecordingId) -> Result<bool> {
        let removed = self.db.with_conn(|conn| {
            conn.execute("DELETE FROM recording WHERE id = ?1", params![id])
                .map_err(|e| {
                    SidekickError::StorageUnavailable(format!("Failed to delete recording: {}", e))
                })
        })?;
        debug!(id, found = removed > 0, "Recording deleted");
        Ok(removed > 0)
    }

    /// Delete every recording already acknowledged by the server.
    pub fn delete_uploaded(&self) -> Result<usize> {
        self.db.with_conn(|conn| {
            conn.execute("DELETE FROM recording WHERE uploaded = 1", [])
                .map_err(|e| {
                    SidekickError::StorageUnavailable(format!(
                        "Failed to delete uploaded recordings: {}",
                        e
                    ))
                })
        })
    }

    /// Clear the table. Explicit resets only.
    pub fn delete_all(&self) -> Result<usize> {
        let removed = self.db.with_conn(|conn| {
            conn.execute("DELETE FROM recording", []).map_err(|e| {
                SidekickError::StorageUnavailable(format!("Failed to clear recordings: {}", e))
            })
        })?;
        info!(removed, "Recording table cleared");
        Ok(removed)
    }

    /// Remove every recording's media file from disk, then reset the local
    /// tables.
    ///
    /// Files that are already gone are counted, not treated as failures. A
    /// file that cannot be removed is logged and its row deleted anyway, so
    /// the store never points at media it no longer tracks. The recording
    /// rows and the whole `event` table are emptied in one transaction;
    /// recordings inserted after the files were visited are kept.
    pub fn clear_data(&self) -> Result<ClearResult> {
        let mut result = ClearResult::default();
        let recordings = self.get_all()?;

        for recording in &recordings {
            match std::fs::remove_file(&recording.recording_path) {
                Ok(()) => result.files_deleted += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => result.files_missing += 1,
                Err(e) => {
                    warn!(
                        path = %recording.recording_path,
                        error = %e,
                        "Failed to remove recording file"
                    );
                }
            }
        }

        result.records_deleted = self.db.with_transaction(|tx| {
            let mut removed = 0;
            for recording in &recordings {
                removed += tx
                    .execute("DELETE FROM recording WHERE id = ?1", params![recording.id])
                    .map_err(|e| {
                        SidekickError::StorageUnavailable(format!(
                            "Failed to delete recording: {}",
                            e
                        ))
                    })?;
            }
            tx.execute("DELETE FROM event", []).map_err(|e| {
                SidekickError::StorageUnavailable(format!("Failed to clear events: {}", e))
            })?;
            Ok(removed)
        })?;

        info!(
            records_deleted = result.records_deleted,
            files_deleted = result.files_deleted,
            files_missing = result.files_missing,
            "Local recording data cleared"
        );
        Ok(result)
    }

    /// Count all recordings.
    pub fn count(&self) -> Result<u64> {
        self.count_where("")
    }

    /// Count recordings still waiting for upload.
    pub fn pending_count(&self) -> Result<u64> {
        self.count_where("WHERE uploaded = 0")
    }

    fn count_where(&self, filter: &str) -> Result<u64> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row(
                    &format!("SELECT COUNT(*) FROM recording {}", filter),
                    [],
                    |row| row.get(0),
                )
                .map_err(|e| SidekickError::StorageUnavailable(e.to_string()))?;
            Ok(count as u64)
        })
    }
}

// ============================================================================
// Helper functions for row-to-entity conversion.
// ============================================================================

fn query_recordings(
    conn: &Connection,
    filter: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Vec<Recording>> {
    let mut stmt = conn
        .prepare(&format!("{} {}", SELECT_RECORDING, filter))
        .map_err(|e| SidekickError::StorageUnavailable(e.to_string()))?;

    let rows = stmt
        .query_map(params, row_to_recording)
        .map_err(|e| SidekickError::StorageUnavailable(e.to_string()))?;

    let mut recordings = Vec::new();
    for row in rows {
        recordings.push(row.map_err(|e| SidekickError::StorageUnavailable(e.to_string()))?);
    }
    Ok(recordings)
}

fn query_names(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| SidekickError::StorageUnavailable(e.to_string()))?;
    let names = stmt
        .query_map(params, |row| row.get::<_, String>(0))
        .map_err(|e| SidekickError::StorageUnavailable(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| SidekickError::StorageUnavailable(e.to_string()))?;
    Ok(names)
}

fn row_to_recording(row: &Row<'_>) -> rusqlite::Result<Recording> {
    Ok(Recording {
        id: row.get(0)?,
        device_name: row.get(1)?,
        group_name: row.get(2)?,
        device_id: row.get(3)?,
        recording_path: row.get(4)?,
        uploaded: row.get(5)?,
        size: row.get(6)?,
        name: row.get(7)?,
    })
}

/// Map an INSERT failure. Uniqueness violations are expected (the file is
/// already known locally); anything else means the store is unusable.
fn insert_error(err: rusqlite::Error, path: &str) -> SidekickError {
    if let rusqlite::Error::SqliteFailure(ref failure, _) = err {
        if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
            || failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        {
            return SidekickError::UniqueConstraintViolation {
                path: path.to_string(),
            };
        }
    }
    SidekickError::StorageUnavailable(format!("Failed to insert recording: {}", err))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_store() -> RecordingStore {
        RecordingStore::new(Arc::new(Database::in_memory().unwrap()))
    }

    fn make_recording(path: &str) -> NewRecording {
        NewRecording::new("cam1", path, path.trim_start_matches("/data/"), 42).with_group("groupA")
    }

    #[test]
    fn test_insert_and_find() {
        let store = make_store();
        let id = store
            .insert(&make_recording("/data/rec1.mp4").with_size(2048))
            .unwrap();
        assert_eq!(id, 1);

        let found = store.find_by_id(id).unwrap().unwrap();
        assert_eq!(found.device_name, "cam1");
        assert_eq!(found.group_name.as_deref(), Some("groupA"));
        assert_eq!(found.device_id, 42);
        assert_eq!(found.recording_path, "/data/rec1.mp4");
        assert_eq!(found.size, Some(2048));
        assert_eq!(found.name, "rec1.mp4");
        assert!(!found.uploaded);
    }

    #[test]
    fn test_find_nonexistent() {
        let store = make_store();
        assert!(store.find_by_id(99).unwrap().is_none());
    }

    #[test]
    fn test_ids_increase() {
        let store = make_store();
        let a = store.insert(&make_recording("/data/a.mp4")).unwrap();
        let b = store.insert(&make_recording("/data/b.mp4")).unwrap();
        store.delete(b).unwrap();
        let c = store.insert(&make_recording("/data/c.mp4")).unwrap();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_duplicate_path_rejected() {
        let store = make_store();
        store.insert(&make_recording("/data/rec1.mp4")).unwrap();

        let err = store
            .insert(&NewRecording::new("cam2", "/data/rec1.mp4", "other", 7))
            .unwrap_err();
        assert!(matches!(
            err,
            SidekickError::UniqueConstraintViolation { ref path } if path == "/data/rec1.mp4"
        ));

        let all = store.get_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].device_name, "cam1");
    }

    #[test]
    fn test_empty_path_rejected() {
        let store = make_store();
        let err = store.insert(&NewRecording::new("cam1", "", "x", 1)).unwrap_err();
        assert!(err.is_duplicate());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_pending_tracks_upload_flag() {
        let store = make_store();
        let a = store.insert(&make_recording("/data/a.mp4")).unwrap();
        let b = store.insert(&make_recording("/data/b.mp4")).unwrap();

        let pending: Vec<_> = store.get_pending().unwrap().iter().map(|r| r.id).collect();
        assert_eq!(pending, vec![a, b]);

        assert!(store.mark_uploaded(a).unwrap());
        let pending: Vec<_> = store.get_pending().unwrap().iter().map(|r| r.id).collect();
        assert_eq!(pending, vec![b]);
        assert_eq!(store.pending_count().unwrap(), 1);
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_mark_uploaded_is_monotone() {
        let store = make_store();
        let id = store.insert(&make_recording("/data/a.mp4")).unwrap();
        store.mark_uploaded(id).unwrap();
        store.mark_uploaded(id).unwrap();
        assert!(store.find_by_id(id).unwrap().unwrap().uploaded);
        assert!(store.get_pending().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_ids_are_noops() {
        let store = make_store();
        assert!(!store.mark_uploaded(12345).unwrap());
        assert!(!store.delete(12345).unwrap());
    }

    #[test]
    fn test_get_by_device_returns_only_uploaded() {
        let store = make_store();
        let a = store.insert(&make_recording("/data/a.mp4")).unwrap();
        store.insert(&make_recording("/data/b.mp4")).unwrap();
        let c = store
            .insert(&NewRecording::new("cam2", "/data/c.mp4", "c", 7))
            .unwrap();
        store.mark_uploaded(a).unwrap();
        store.mark_uploaded(c).unwrap();

        let uploaded = store.get_by_device("cam1").unwrap();
        assert_eq!(uploaded.len(), 1);
        assert_eq!(uploaded[0].id, a);
    }

    #[test]
    fn test_get_by_device_in_group() {
        let store = make_store();
        let grouped = store.insert(&make_recording("/data/a.mp4")).unwrap();
        let ungrouped = store
            .insert(&NewRecording::new("cam1", "/data/b.mp4", "b", 42))
            .unwrap();
        store.mark_uploaded(grouped).unwrap();
        store.mark_uploaded(ungrouped).unwrap();

        let in_group = store.get_by_device_in_group("cam1", Some("groupA")).unwrap();
        assert_eq!(in_group.len(), 1);
        assert_eq!(in_group[0].id, grouped);

        let no_group = store.get_by_device_in_group("cam1", None).unwrap();
        assert_eq!(no_group.len(), 1);
        assert_eq!(no_group[0].id, ungrouped);
    }

    #[test]
    fn test_recording_names_for_device() {
        let store = make_store();
        let a = store.insert(&make_recording("/data/a.mp4")).unwrap();
        store.insert(&make_recording("/data/b.mp4")).unwrap();
        store
            .insert(&NewRecording::new("cam2", "/data/c.mp4", "c.mp4", 7))
            .unwrap();
        store.mark_uploaded(a).unwrap();

        let names = store.get_recording_names_for_device("cam1").unwrap();
        assert_eq!(names, vec!["a.mp4", "b.mp4"]);
        assert!(store
            .get_recording_names_for_device("unknown")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_recording_names_for_device_in_group() {
        let store = make_store();
        store.insert(&make_recording("/data/a.mp4")).unwrap();
        store
            .insert(&NewRecording::new("cam1", "/data/b.mp4", "b.mp4", 42).with_group("groupB"))
            .unwrap();

        let names = store
            .get_recording_names_for_device_in_group("cam1", Some("groupB"))
            .unwrap();
        assert_eq!(names, vec!["b.mp4"]);
        assert!(store
            .get_recording_names_for_device_in_group("cam1", None)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_delete_and_delete_all() {
        let store = make_store();
        let a = store.insert(&make_recording("/data/a.mp4")).unwrap();
        store.insert(&make_recording("/data/b.mp4")).unwrap();

        assert!(store.delete(a).unwrap());
        assert_eq!(store.count().unwrap(), 1);

        assert_eq!(store.delete_all().unwrap(), 1);
        assert!(store.get_all().unwrap().is_empty());
    }

    #[test]
    fn test_deleted_path_can_be_inserted_again() {
        let store = make_store();
        let id = store.insert(&make_recording("/data/a.mp4")).unwrap();
        store.delete(id).unwrap();
        assert!(store.insert(&make_recording("/data/a.mp4")).is_ok());
    }

    #[test]
    fn test_delete_uploaded() {
        let store = make_store();
        let a = store.insert(&make_recording("/data/a.mp4")).unwrap();
        let b = store.insert(&make_recording("/data/b.mp4")).unwrap();
        store.mark_uploaded(a).unwrap();

        assert_eq!(store.delete_uploaded().unwrap(), 1);
        let remaining: Vec<_> = store.get_all().unwrap().iter().map(|r| r.id).collect();
        assert_eq!(remaining, vec![b]);
    }

    #[test]
    fn test_clear_data_removes_files_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("present.mp4");
        std::fs::write(&present, b"media").unwrap();
        let missing = dir.path().join("missing.mp4");

        let store = make_store();
        store
            .insert(&NewRecording::new("cam1", present.to_string_lossy(), "present", 1))
            .unwrap();
        store
            .insert(&NewRecording::new("cam1", missing.to_string_lossy(), "missing", 1))
            .unwrap();

        let result = store.clear_data().unwrap();
        assert_eq!(
            result,
            ClearResult {
                records_deleted: 2,
                files_deleted: 1,
                files_missing: 1,
            }
        );
        assert!(!present.exists());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_clear_data_empties_event_table() {
        let db = Arc::new(Database::in_memory().unwrap());
        let store = RecordingStore::new(Arc::clone(&db));
        store.insert(&make_recording("/data/gone.mp4")).unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO event (device_id, event_id, timestamp, type, details, uploaded)
                 VALUES (1, 7, '2024-01-01T00:00:00Z', 'motion', '{}', 0)",
                [],
            )
            .map_err(|e| SidekickError::StorageUnavailable(e.to_string()))
        })
        .unwrap();

        let result = store.clear_data().unwrap();
        assert_eq!(result.records_deleted, 1);
        assert_eq!(result.files_missing, 1);

        let events: i64 = db
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM event", [], |row| row.get(0))
                    .map_err(|e| SidekickError::StorageUnavailable(e.to_string()))
            })
            .unwrap();
        assert_eq!(events, 0);
    }

    #[test]
    fn test_closed_store_reports_closed() {
        let db = Arc::new(Database::in_memory().unwrap());
        let store = RecordingStore::new(Arc::clone(&db));
        db.close().unwrap();
        let err = store.insert(&make_recording("/data/a.mp4")).unwrap_err();
        assert!(matches!(err, SidekickError::StoreClosed));
    }
}
