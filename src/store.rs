//! Engine facade wiring every component together.

use crate::config::StoreConfig;
use crate::memory::MemoryOptimizer;
use crate::models::{Filter, HealthInfo, RecordId, StateRecord};
use crate::storage::backend::{StorageBackend, StorageStats};
use crate::storage::backup::BackupStrategy;
use crate::storage::pool::ConnectionPool;
use crate::storage::stream::{RecordStream, StreamConfig};
use crate::storage::txn::{TransactionId, TransactionManager};
use crate::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One storage engine: pool, backend, optimizer, and backup strategy.
///
/// This is the surface consumed by adapters (session stores, checkpointers,
/// history views). A `StateStore` embeds exactly one transaction scope;
/// workers that need independent transaction stacks open their own store
/// over the same storage path, sharing nothing but the database file.
#[derive(Debug)]
pub struct StateStore {
    backend: StorageBackend,
    optimizer: Arc<MemoryOptimizer>,
    backup: BackupStrategy,
}

impl StateStore {
    /// Opens a store with a default [`MemoryOptimizer`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Connection`] when the database cannot be
    /// opened or its schema cannot be initialized.
    pub fn open(config: StoreConfig) -> Result<Self> {
        Self::open_with_optimizer(config, Arc::new(MemoryOptimizer::default()))
    }

    /// Opens a store with an injected optimizer (shared across stores when
    /// several streams should coordinate through one controller).
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Connection`] when the database cannot be
    /// opened or its schema cannot be initialized.
    pub fn open_with_optimizer(
        config: StoreConfig,
        optimizer: Arc<MemoryOptimizer>,
    ) -> Result<Self> {
        let pool = ConnectionPool::new(config);
        // Warm one handle so open fails loudly on a bad path or schema
        drop(pool.acquire()?);

        Ok(Self {
            backend: StorageBackend::new(pool),
            optimizer,
            backup: BackupStrategy::new(),
        })
    }

    /// Returns the store configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        self.backend.pool().config()
    }

    /// Returns the injected optimizer.
    #[must_use]
    pub const fn optimizer(&self) -> &Arc<MemoryOptimizer> {
        &self.optimizer
    }

    /// Returns the accumulated operation counters.
    #[must_use]
    pub const fn stats(&self) -> &StorageStats {
        self.backend.stats()
    }

    /// Returns this store's transaction scope.
    #[must_use]
    pub const fn transactions(&self) -> &TransactionManager {
        self.backend.transactions()
    }

    /// Upserts one record. See [`StorageBackend::save`].
    ///
    /// # Errors
    ///
    /// See [`StorageBackend::save`].
    pub fn save(&self, record: &mut StateRecord) -> Result<RecordId> {
        self.backend.save(record)
    }

    /// Upserts a batch atomically. See [`StorageBackend::save_many`].
    ///
    /// # Errors
    ///
    /// See [`StorageBackend::save_many`].
    pub fn save_many(&self, records: &mut [StateRecord]) -> Result<Vec<RecordId>> {
        self.backend.save_many(records)
    }

    /// Fetches a record by id with lazy expiry. See [`StorageBackend::load`].
    ///
    /// # Errors
    ///
    /// See [`StorageBackend::load`].
    pub fn load(&self, id: &RecordId) -> Result<Option<StateRecord>> {
        self.backend.load(id)
    }

    /// Deletes a record. See [`StorageBackend::delete`].
    ///
    /// # Errors
    ///
    /// See [`StorageBackend::delete`].
    pub fn delete(&self, id: &RecordId) -> Result<bool> {
        self.backend.delete(id)
    }

    /// Lists matching records, newest first. See [`StorageBackend::list`].
    ///
    /// # Errors
    ///
    /// See [`StorageBackend::list`].
    pub fn list(&self, filter: &Filter, limit: Option<usize>) -> Result<Vec<StateRecord>> {
        self.backend.list(filter, limit)
    }

    /// Counts matching records. See [`StorageBackend::count`].
    ///
    /// # Errors
    ///
    /// See [`StorageBackend::count`].
    pub fn count(&self, filter: &Filter) -> Result<u64> {
        self.backend.count(filter)
    }

    /// Sweeps expired rows. See [`StorageBackend::cleanup_expired`].
    ///
    /// # Errors
    ///
    /// See [`StorageBackend::cleanup_expired`].
    pub fn cleanup_expired(&self) -> Result<u64> {
        self.backend.cleanup_expired()
    }

    /// Reports health and size statistics. See [`StorageBackend::health_check`].
    ///
    /// # Errors
    ///
    /// See [`StorageBackend::health_check`].
    pub fn health_check(&self) -> Result<HealthInfo> {
        self.backend.health_check()
    }

    /// Opens a streaming read over matching records.
    ///
    /// The stream borrows one pooled connection until it is dropped or
    /// exhausted; size `pool_size` accounting for concurrent streams.
    ///
    /// # Errors
    ///
    /// See [`RecordStream::open`].
    pub fn stream(&self, filter: &Filter, config: StreamConfig) -> Result<RecordStream> {
        RecordStream::open(
            self.backend.pool(),
            Arc::clone(&self.optimizer),
            filter,
            config,
        )
    }

    /// Opens a transaction, or joins this scope's open one.
    ///
    /// # Errors
    ///
    /// See [`TransactionManager::begin`].
    pub fn begin(&self) -> Result<TransactionId> {
        self.backend.transactions().begin()
    }

    /// Commits a transaction level. See [`TransactionManager::commit`].
    ///
    /// # Errors
    ///
    /// See [`TransactionManager::commit`].
    pub fn commit(&self, id: Option<TransactionId>) -> Result<bool> {
        self.backend.transactions().commit(id)
    }

    /// Rolls back a transaction level. See [`TransactionManager::rollback`].
    ///
    /// # Errors
    ///
    /// See [`TransactionManager::rollback`].
    pub fn rollback(&self, id: Option<TransactionId>) -> Result<bool> {
        self.backend.transactions().rollback(id)
    }

    /// Writes an online backup and returns its path.
    ///
    /// With no destination, a timestamped file is created under the
    /// configured `backup_path` and old backups are rotated down to
    /// `max_backup_files`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Operation`] when the copy or rotation fails.
    pub fn backup(&self, dest: Option<&Path>) -> Result<PathBuf> {
        let config = self.config();
        let (dest, rotate) = match dest {
            Some(path) => (path.to_path_buf(), false),
            None => {
                // Millisecond stamp keeps rapid successive backups distinct
                let stamp = chrono::Utc::now().format("%Y%m%d-%H%M%S%3f");
                (config.backup_path.join(format!("state-{stamp}.db")), true)
            },
        };

        self.backup.backup(&config.storage_path, &dest)?;
        if rotate {
            self.backup
                .cleanup_old_backups(&config.backup_path, config.max_backup_files)?;
        }
        Ok(dest)
    }

    /// Restores the store from a backup file.
    ///
    /// Every pooled connection is closed for the duration of the copy; the
    /// pool reopens afterwards and recreates handles lazily. The caller must
    /// ensure no transaction is open and no stream is running in any store
    /// over the same path.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Operation`] when the copy fails; the pool is
    /// reopened either way.
    pub fn restore(&self, backup_path: &Path) -> Result<()> {
        let pool = self.backend.pool();
        pool.close_all();
        let result = self
            .backup
            .restore(backup_path, &self.config().storage_path);
        pool.reopen();
        result
    }

    /// Shuts the store down, closing every pooled connection. Idempotent.
    pub fn close(&self) {
        self.backend.pool().close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> StateStore {
        let config = StoreConfig::new()
            .with_storage_path(dir.path().join("store.db"))
            .with_backup_path(dir.path().join("backups"))
            .with_pool_size(2)
            .with_max_backup_files(2);
        StateStore::open(config).unwrap()
    }

    #[test]
    fn test_open_creates_database() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        assert!(dir.path().join("store.db").exists());
        assert_eq!(store.count(&Filter::new()).unwrap(), 0);
    }

    #[test]
    fn test_open_bad_path_fails() {
        let config =
            StoreConfig::new().with_storage_path("/definitely/not/a/real/dir/store.db");
        assert!(StateStore::open(config).is_err());
    }

    #[test]
    fn test_backup_default_name_and_rotation() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let mut record = StateRecord::with_id("r", b"x".to_vec());
        store.save(&mut record).unwrap();

        let first = store.backup(None).unwrap();
        assert!(first.exists());
        assert!(first
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("state-"));

        // Explicit destination bypasses rotation
        let explicit = dir.path().join("explicit.db");
        let path = store.backup(Some(&explicit)).unwrap();
        assert_eq!(path, explicit);
        assert!(explicit.exists());
    }

    #[test]
    fn test_restore_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let mut record = StateRecord::with_id("keep", b"v1".to_vec());
        store.save(&mut record).unwrap();
        let backup = store.backup(None).unwrap();

        store.delete(&RecordId::new("keep")).unwrap();
        assert!(store.load(&RecordId::new("keep")).unwrap().is_none());

        store.restore(&backup).unwrap();
        let restored = store.load(&RecordId::new("keep")).unwrap().unwrap();
        assert_eq!(restored.payload, b"v1");
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store.close();
        store.close();
        assert!(store.count(&Filter::new()).is_err());
    }

    #[test]
    fn test_facade_transaction_triplet() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.begin().unwrap();
        let mut record = StateRecord::with_id("r", Vec::new());
        store.save(&mut record).unwrap();
        assert!(store.transactions().is_active());
        assert!(store.commit(None).unwrap());
        assert!(!store.transactions().is_active());

        store.begin().unwrap();
        store.delete(&RecordId::new("r")).unwrap();
        assert!(store.rollback(None).unwrap());
        assert!(store.load(&RecordId::new("r")).unwrap().is_some());
    }
}
