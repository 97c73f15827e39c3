//! Store lifecycle.
//!
//! [`StoreManager`] is built once at startup and shared with producers and
//! consumers. It opens the backing database on first use, exactly once, no
//! matter how many threads ask for it concurrently, and refuses to reopen it
//! after [`StoreManager::close`].

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use tracing::info;

use sidekick_core::config::SidekickConfig;
use sidekick_core::error::{Result, SidekickError};

use crate::db::Database;
use crate::migrations::MigrationEngine;
use crate::queue::UploadQueue;
use crate::repository::RecordingStore;

/// Owner of the process's single database handle.
pub struct StoreManager {
    config: SidekickConfig,
    engine: MigrationEngine,
    instance: OnceLock<Arc<Database>>,
    init_lock: Mutex<()>,
    constructions: AtomicUsize,
    closed: AtomicBool,
}

impl StoreManager {
    pub fn new(config: SidekickConfig) -> Self {
        Self::with_engine(config, MigrationEngine::default())
    }

    /// A manager that migrates with a custom engine.
    pub fn with_engine(config: SidekickConfig, engine: MigrationEngine) -> Self {
        Self {
            config,
            engine,
            instance: OnceLock::new(),
            init_lock: Mutex::new(()),
            constructions: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// The shared database, opening (and migrating) it on first call.
    ///
    /// Once open, this is a lock-free read. Concurrent first callers
    /// serialize on the init lock; the loser of the race finds the instance
    /// already built and returns it.
    pub fn instance(&self) -> Result<Arc<Database>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SidekickError::StoreClosed);
        }
        if let Some(db) = self.instance.get() {
            return Ok(Arc::clone(db));
        }

        let _guard = self.init_lock.lock().map_err(|e| {
            SidekickError::StorageUnavailable(format!("Store init lock poisoned: {}", e))
        })?;
        if self.closed.load(Ordering::Acquire) {
            return Err(SidekickError::StoreClosed);
        }
        if let Some(db) = self.instance.get() {
            return Ok(Arc::clone(db));
        }

        let db = Arc::new(self.open()?);
        self.constructions.fetch_add(1, Ordering::SeqCst);
        let db = self.instance.get_or_init(|| db);
        Ok(Arc::clone(db))
    }

    /// A recording store over the shared database.
    pub fn recordings(&self) -> Result<RecordingStore> {
        Ok(RecordingStore::new(self.instance()?))
    }

    /// An upload queue over the shared database.
    pub fn upload_queue(&self) -> Result<UploadQueue> {
        Ok(UploadQueue::new(self.instance()?))
    }

    /// Whether the database has been opened.
    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && self.instance.get().is_some()
    }

    /// How many times the database has been constructed. Never exceeds one.
    pub fn constructions(&self) -> usize {
        self.constructions.load(Ordering::SeqCst)
    }

    /// Close the database for clean shutdown.
    ///
    /// Handles already given out start failing with `StoreClosed`, and the
    /// manager will not open the database again.
    pub fn close(&self) -> Result<()> {
        let _guard = self.init_lock.lock().map_err(|e| {
            SidekickError::StorageUnavailable(format!("Store init lock poisoned: {}", e))
        })?;
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(db) = self.instance.get() {
            db.close()?;
        }
        info!("Recording store closed");
        Ok(())
    }

    fn open(&self) -> Result<Database> {
        let db = Database::from_config(&self.config, &self.engine)?;
        info!(outcome = ?db.open_outcome(), "Recording store ready");
        Ok(db)
    }
}

impl std::fmt::Debug for StoreManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreManager")
            .field("open", &self.is_open())
            .field("constructions", &self.constructions())
            .finish()
    }
}
