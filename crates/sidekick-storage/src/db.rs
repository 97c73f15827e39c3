//! Database connection management.
//!
//! Wraps a single rusqlite Connection in a Mutex for thread-safe access.
//! Applies the configured PRAGMAs and brings the schema to the current
//! version before the handle is returned to anyone.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::{info, warn};

use sidekick_core::config::{SidekickConfig, StorageConfig};
use sidekick_core::error::{Result, SidekickError};
use sidekick_core::types::OpenOutcome;

use crate::migrations::MigrationEngine;
use crate::schema;

/// Thread-safe SQLite database wrapper.
///
/// The connection slot is emptied by [`Database::close`]; every later call
/// fails with [`SidekickError::StoreClosed`].
pub struct Database {
    conn: Mutex<Option<Connection>>,
    path: Option<PathBuf>,
    outcome: OpenOutcome,
}

impl Database {
    /// Open the database described by `config`, on disk or in memory,
    /// migrating with `engine`.
    pub fn from_config(config: &SidekickConfig, engine: &MigrationEngine) -> Result<Self> {
        if config.storage.in_memory {
            Self::in_memory_with(engine)
        } else {
            Self::open_with(&config.database_path(), &config.storage, engine)
        }
    }

    /// Open (or create) a database at the given path with the shipped
    /// migrations.
    pub fn open(path: &Path, config: &StorageConfig) -> Result<Self> {
        Self::open_with(path, config, &MigrationEngine::default())
    }

    /// Open (or create) a database at the given path, migrating with `engine`.
    pub fn open_with(
        path: &Path,
        config: &StorageConfig,
        engine: &MigrationEngine,
    ) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SidekickError::StorageUnavailable(format!(
                    "Failed to create {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let mut conn = Connection::open(path).map_err(|e| {
            SidekickError::StorageUnavailable(format!("Failed to open database: {}", e))
        })?;
        configure(&conn, config)?;

        let outcome = prepare_schema(&mut conn, engine)?;
        info!(path = %path.display(), outcome = ?outcome, "Database opened");

        Ok(Self {
            conn: Mutex::new(Some(conn)),
            path: Some(path.to_path_buf()),
            outcome,
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::in_memory_with(&MigrationEngine::default())
    }

    fn in_memory_with(engine: &MigrationEngine) -> Result<Self> {
        let mut conn = Connection::open_in_memory().map_err(|e| {
            SidekickError::StorageUnavailable(format!("Failed to open in-memory db: {}", e))
        })?;
        let outcome = prepare_schema(&mut conn, engine)?;

        Ok(Self {
            conn: Mutex::new(Some(conn)),
            path: None,
            outcome,
        })
    }

    /// Backing file, `None` for in-memory databases.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// What happened to the schema when this handle was opened.
    pub fn open_outcome(&self) -> &OpenOutcome {
        &self.outcome
    }

    pub fn schema_version(&self) -> Result<u32> {
        self.with_conn(schema::read_version)
    }

    /// Execute a closure with a reference to the underlying connection.
    ///
    /// The mutex is held for the duration of the closure, so a single
    /// statement issued inside it is atomic with respect to every other
    /// caller.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let guard = self.lock()?;
        let conn = guard.as_ref().ok_or(SidekickError::StoreClosed)?;
        f(conn)
    }

    /// Execute a closure inside an immediate transaction.
    ///
    /// Commits if the closure returns `Ok`, rolls back otherwise.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut guard = self.lock()?;
        let conn = guard.as_mut().ok_or(SidekickError::StoreClosed)?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| {
                SidekickError::StorageUnavailable(format!("Failed to begin transaction: {}", e))
            })?;
        let value = f(&tx)?;
        tx.commit().map_err(|e| {
            SidekickError::StorageUnavailable(format!("Failed to commit transaction: {}", e))
        })?;
        Ok(value)
    }

    /// Close the connection. Idempotent.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.lock()?;
        if let Some(conn) = guard.take() {
            conn.close().map_err(|(_, e)| {
                SidekickError::StorageUnavailable(format!("Failed to close database: {}", e))
            })?;
            info!("Database closed");
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.lock().map(|guard| guard.is_none()).unwrap_or(true)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Connection>>> {
        self.conn.lock().map_err(|e| {
            SidekickError::StorageUnavailable(format!("Database lock poisoned: {}", e))
        })
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("outcome", &self.outcome)
            .finish()
    }
}

fn configure(conn: &Connection, config: &StorageConfig) -> Result<()> {
    let mode: String = conn
        .pragma_update_and_check(None, "journal_mode", &config.journal_mode, |row| {
            row.get(0)
        })
        .map_err(|e| {
            SidekickError::StorageUnavailable(format!("Failed to set journal_mode: {}", e))
        })?;
    if !mode.eq_ignore_ascii_case(&config.journal_mode) {
        warn!(requested = %config.journal_mode, actual = %mode, "Journal mode not applied");
    }

    conn.pragma_update(None, "synchronous", &config.synchronous)
        .map_err(|e| {
            SidekickError::StorageUnavailable(format!("Failed to set synchronous: {}", e))
        })?;
    conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))
        .map_err(|e| {
            SidekickError::StorageUnavailable(format!("Failed to set busy timeout: {}", e))
        })?;
    Ok(())
}

/// Bring the schema to the engine's target version.
///
/// A brand-new database is created directly at the target. An existing one
/// is migrated; if no registered chain reaches the target, or the persisted
/// tag is not a valid version at all, every table is dropped and the schema
/// rebuilt empty. Recordings are a re-fetchable cache, so that loss is
/// accepted and logged.
pub fn prepare_schema(conn: &mut Connection, engine: &MigrationEngine) -> Result<OpenOutcome> {
    let target = engine.target();
    let raw = schema::read_raw_version(conn)?;

    let migrated = match u32::try_from(raw) {
        Ok(version) => {
            if version == 0 && schema::user_tables(conn)?.is_empty() {
                rebuild(conn, target)?;
                info!(version = target, "Created new recording store");
                return Ok(OpenOutcome::Created { version: target });
            }
            if version == target {
                return Ok(OpenOutcome::Current { version });
            }
            engine
                .migrate(conn, version)
                .map(|to| OpenOutcome::Migrated { from: version, to })
        }
        Err(_) => Err(SidekickError::NoMigrationPath {
            from: raw,
            to: target,
        }),
    };

    match migrated {
        Ok(outcome) => Ok(outcome),
        Err(SidekickError::NoMigrationPath { from, to }) => {
            warn!(
                from,
                to, "No migration path for recording store, discarding local data"
            );
            rebuild(conn, target)?;
            Ok(OpenOutcome::Recreated { from, to })
        }
        Err(e) => Err(e),
    }
}

/// Drop everything and create the schema at `version`, atomically.
fn rebuild(conn: &mut Connection, version: u32) -> Result<()> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| {
            SidekickError::StorageUnavailable(format!("Failed to begin schema rebuild: {}", e))
        })?;
    schema::drop_all_tables(&tx)?;
    schema::create_schema(&tx, version)?;
    schema::write_version(&tx, version)?;
    tx.commit().map_err(|e| {
        SidekickError::StorageUnavailable(format!("Failed to commit schema rebuild: {}", e))
    })
}
