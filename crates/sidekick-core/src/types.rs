use serde::{Deserialize, Serialize};

/// Store-assigned identifier of a recording row.
pub type RecordingId = i64;

// =============================================================================
// Recordings
// =============================================================================

/// Metadata for one media file downloaded from a capture device and held
/// locally until the server has it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recording {
    pub id: RecordingId,
    /// Human-readable label of the source device.
    pub device_name: String,
    /// Logical device group, if the device belongs to one.
    pub group_name: Option<String>,
    /// Stable numeric identity of the source device.
    pub device_id: i64,
    /// Local filesystem location of the downloaded media. Unique per store.
    pub recording_path: String,
    /// Set once the server acknowledged the upload. Never reverts.
    pub uploaded: bool,
    /// File size in bytes, when known.
    pub size: Option<i64>,
    /// Display name, usually the file name on the device.
    pub name: String,
}

impl Recording {
    pub fn is_pending(&self) -> bool {
        !self.uploaded
    }
}

/// A recording as handed over by the device layer, before the store assigns
/// an id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRecording {
    pub device_name: String,
    pub group_name: Option<String>,
    pub device_id: i64,
    pub recording_path: String,
    pub size: Option<i64>,
    pub name: String,
}

impl NewRecording {
    pub fn new(
        device_name: impl Into<String>,
        recording_path: impl Into<String>,
        name: impl Into<String>,
        device_id: i64,
    ) -> Self {
        Self {
            device_name: device_name.into(),
            group_name: None,
            device_id,
            recording_path: recording_path.into(),
            size: None,
            name: name.into(),
        }
    }

    pub fn with_group(mut self, group_name: impl Into<String>) -> Self {
        self.group_name = Some(group_name.into());
        self
    }

    pub fn with_size(mut self, size: i64) -> Self {
        self.size = Some(size);
        self
    }
}

// =============================================================================
// Store lifecycle
// =============================================================================

/// What happened to the on-disk schema when the store was opened.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenOutcome {
    /// Brand-new store, created directly at the current version.
    Created { version: u32 },
    /// Store was already at the current version.
    Current { version: u32 },
    /// Registered migrations upgraded the store.
    Migrated { from: u32, to: u32 },
    /// No migration path existed; the store was emptied and rebuilt. `from`
    /// is the raw persisted tag and may be outside the valid version range.
    Recreated { from: i64, to: u32 },
}

impl OpenOutcome {
    /// Schema version the store is at after opening.
    pub fn version(&self) -> u32 {
        match self {
            OpenOutcome::Created { version } | OpenOutcome::Current { version } => *version,
            OpenOutcome::Migrated { to, .. } | OpenOutcome::Recreated { to, .. } => *to,
        }
    }

    /// True if existing rows were discarded.
    pub fn lost_data(&self) -> bool {
        matches!(self, OpenOutcome::Recreated { .. })
    }
}

/// Counts returned by a full local clear.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearResult {
    /// Rows removed from the recording table.
    pub records_deleted: usize,
    /// Media files removed from disk.
    pub files_deleted: usize,
    /// Media files that were already gone.
    pub files_missing: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_recording_builder() {
        let rec = NewRecording::new("cam1", "/data/rec1.mp4", "rec1", 42)
            .with_group("groupA")
            .with_size(1024);
        assert_eq!(rec.device_name, "cam1");
        assert_eq!(rec.recording_path, "/data/rec1.mp4");
        assert_eq!(rec.name, "rec1");
        assert_eq!(rec.device_id, 42);
        assert_eq!(rec.group_name.as_deref(), Some("groupA"));
        assert_eq!(rec.size, Some(1024));
    }

    #[test]
    fn test_new_recording_defaults() {
        let rec = NewRecording::new("cam1", "/data/rec1.mp4", "rec1", 7);
        assert!(rec.group_name.is_none());
        assert!(rec.size.is_none());
    }

    #[test]
    fn test_open_outcome_version() {
        assert_eq!(OpenOutcome::Created { version: 4 }.version(), 4);
        assert_eq!(OpenOutcome::Current { version: 4 }.version(), 4);
        assert_eq!(OpenOutcome::Migrated { from: 1, to: 4 }.version(), 4);
        assert_eq!(OpenOutcome::Recreated { from: 2, to: 4 }.version(), 4);
    }

    #[test]
    fn test_open_outcome_lost_data() {
        assert!(OpenOutcome::Recreated { from: 2, to: 4 }.lost_data());
        assert!(!OpenOutcome::Migrated { from: 1, to: 4 }.lost_data());
        assert!(!OpenOutcome::Created { version: 4 }.lost_data());
    }

    #[test]
    fn test_recording_is_pending() {
        let mut rec = Recording {
            id: 1,
            device_name: "cam1".into(),
            group_name: None,
            device_id: 42,
            recording_path: "/data/rec1.mp4".into(),
            uploaded: false,
            size: None,
            name: "rec1".into(),
        };
        assert!(rec.is_pending());
        rec.uploaded = true;
        assert!(!rec.is_pending());
    }
}
