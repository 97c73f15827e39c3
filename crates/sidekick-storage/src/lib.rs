//! Sidekick storage crate - durable recording queue on SQLite.
//!
//! Provides a mutex-guarded SQLite database with declarative schema
//! definitions and versioned migrations, the recording store used by the
//! device layer, the upload queue view used by the uploader, and the manager
//! that opens the database exactly once per process.

pub mod db;
pub mod lifecycle;
pub mod migrations;
pub mod queue;
pub mod repository;
pub mod schema;

pub use db::Database;
pub use lifecycle::StoreManager;
pub use migrations::{Migration, MigrationEngine, SchemaChange, CURRENT_VERSION};
pub use queue::{PendingBatch, UploadQueue};
pub use repository::RecordingStore;
