use thiserror::Error;

/// Top-level error type for the Sidekick recording store.
///
/// Storage-layer failures are classified once, at the rusqlite boundary, so
/// callers only ever branch on these variants.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SidekickError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// The backing store could not be opened, read or written.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A recording with this path is already held locally.
    #[error("Recording already exists for path: {path}")]
    UniqueConstraintViolation { path: String },

    /// No registered chain of migrations connects the two versions.
    ///
    /// `from` is the tag as persisted, which SQLite stores signed.
    #[error("No migration path from schema version {from} to {to}")]
    NoMigrationPath { from: i64, to: u32 },

    #[error("Store has been closed")]
    StoreClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SidekickError {
    /// True for errors a producer should treat as "already downloaded".
    pub fn is_duplicate(&self) -> bool {
        matches!(self, SidekickError::UniqueConstraintViolation { .. })
    }
}

impl From<toml::de::Error> for SidekickError {
    fn from(err: toml::de::Error) -> Self {
        SidekickError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for SidekickError {
    fn from(err: toml::ser::Error) -> Self {
        SidekickError::Config(err.to_string())
    }
}

/// A specialized `Result` type for Sidekick operations.
pub type Result<T> = std::result::Result<T, SidekickError>;
