//! Record CRUD, filtered queries, TTL enforcement, and health reporting.

use crate::models::{Filter, HealthInfo, HealthStatus, RecordId, StateRecord};
use crate::storage::pool::ConnectionPool;
use crate::storage::sqlite::{
    build_filter_clause_numbered, build_record_from_row, not_expired_clause,
    record_operation_metrics, RecordRow, SELECT_COLUMNS,
};
use crate::storage::txn::TransactionManager;
use crate::{current_timestamp, Error, Result};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

/// Running operation counters, updated on every backend call.
#[derive(Debug, Default)]
pub struct StorageStats {
    saves: AtomicU64,
    loads: AtomicU64,
    deletes: AtomicU64,
    queries: AtomicU64,
    expired_removed: AtomicU64,
}

impl StorageStats {
    /// Records saved (upserts included).
    #[must_use]
    pub fn saves(&self) -> u64 {
        self.saves.load(Ordering::Relaxed)
    }

    /// Single-record loads attempted.
    #[must_use]
    pub fn loads(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    /// Delete calls attempted.
    #[must_use]
    pub fn deletes(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    /// List and count queries executed.
    #[must_use]
    pub fn queries(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    /// Rows removed because their TTL had passed (lazy + sweep).
    #[must_use]
    pub fn expired_removed(&self) -> u64 {
        self.expired_removed.load(Ordering::Relaxed)
    }
}

/// CRUD and query engine over pooled connections.
///
/// Operations run on the scope's open transaction connection when one is
/// active, and otherwise borrow a pooled connection for the duration of the
/// single call. The backend owns no persistent state beyond its pool and
/// transaction references plus accumulated counters.
pub struct StorageBackend {
    pool: Arc<ConnectionPool>,
    txn: TransactionManager,
    stats: StorageStats,
}

impl std::fmt::Debug for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageBackend")
            .field("pool", &self.pool.stats())
            .field("txn", &self.txn)
            .finish_non_exhaustive()
    }
}

impl StorageBackend {
    /// Creates a backend over the given pool.
    #[must_use]
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self {
            txn: TransactionManager::new(Arc::clone(&pool)),
            pool,
            stats: StorageStats::default(),
        }
    }

    /// Returns the connection pool.
    #[must_use]
    pub const fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Returns this scope's transaction manager.
    #[must_use]
    pub const fn transactions(&self) -> &TransactionManager {
        &self.txn
    }

    /// Returns the accumulated operation counters.
    #[must_use]
    pub const fn stats(&self) -> &StorageStats {
        &self.stats
    }

    /// Runs `f` on the active transaction connection, or on a short-lived
    /// pooled connection outside a transaction.
    fn run<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        if let Some(guard) = self.txn.lock_connection() {
            return f(&guard);
        }
        let conn = self.pool.acquire()?;
        f(&conn)
    }

    /// Upserts one record, stamping ids and timestamps.
    ///
    /// - An empty id is replaced with a generated one.
    /// - `created_at` is stamped on first save, `updated_at` on every save.
    /// - When the store has TTL enabled and the record carries no expiry,
    ///   `expires_at` defaults to `created_at + default_ttl_seconds`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for invariant violations and
    /// [`Error::Operation`] when the upsert fails.
    #[instrument(skip(self, record), fields(operation = "save"))]
    pub fn save(&self, record: &mut StateRecord) -> Result<RecordId> {
        let start = Instant::now();
        let result = (|| {
            if record.id.is_empty() {
                record.id = RecordId::generate();
            }
            let now = current_timestamp();
            if record.created_at <= 0.0 {
                record.created_at = now;
            }
            record.updated_at = now;

            let config = self.pool.config();
            if config.enable_ttl && record.expires_at.is_none() {
                if let Some(ttl) = config.default_ttl_seconds {
                    record.expires_at = Some(record.created_at + ttl);
                }
            }

            record.validate()?;

            let metadata = if record.metadata.is_empty() {
                None
            } else {
                Some(
                    serde_json::to_string(&record.metadata).map_err(|e| {
                        Error::Validation(format!("metadata is not serializable: {e}"))
                    })?,
                )
            };

            self.run(|conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO state_records
                     (id, payload, created_at, updated_at, expires_at, compressed, kind, thread_id, session_id, metadata)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        record.id.as_str(),
                        record.payload,
                        record.created_at,
                        record.updated_at,
                        record.expires_at,
                        record.compressed,
                        record.kind.as_deref(),
                        record.thread_id.as_deref(),
                        record.session_id.as_deref(),
                        metadata.as_deref(),
                    ],
                )
                .map_err(|e| Error::Operation {
                    operation: "save_record".to_string(),
                    cause: e.to_string(),
                })?;
                Ok(())
            })?;

            Ok(record.id.clone())
        })();

        self.stats.saves.fetch_add(1, Ordering::Relaxed);
        let status = if result.is_ok() { "success" } else { "error" };
        record_operation_metrics("save", start, status);
        result
    }

    /// Fetches a record by id.
    ///
    /// A row whose TTL has passed is deleted on the spot and reported as
    /// absent (lazy expiry).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Operation`] when the lookup fails.
    #[instrument(skip(self), fields(operation = "load", record.id = %id.as_str()))]
    pub fn load(&self, id: &RecordId) -> Result<Option<StateRecord>> {
        let start = Instant::now();
        let result = self.run(|conn| {
            let sql = format!("SELECT {SELECT_COLUMNS} FROM state_records WHERE id = ?1");
            let row = conn
                .query_row(&sql, params![id.as_str()], RecordRow::from_row)
                .optional()
                .map_err(|e| Error::Operation {
                    operation: "load_record".to_string(),
                    cause: e.to_string(),
                })?;

            let Some(row) = row else {
                return Ok(None);
            };
            let record = build_record_from_row(row)?;

            if record.is_expired(current_timestamp()) {
                conn.execute(
                    "DELETE FROM state_records WHERE id = ?1",
                    params![id.as_str()],
                )
                .map_err(|e| Error::Operation {
                    operation: "delete_expired_record".to_string(),
                    cause: e.to_string(),
                })?;
                self.stats.expired_removed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(record.id = %id.as_str(), "expired record removed on read");
                return Ok(None);
            }

            Ok(Some(record))
        });

        self.stats.loads.fetch_add(1, Ordering::Relaxed);
        let status = if result.is_ok() { "success" } else { "error" };
        record_operation_metrics("load", start, status);
        result
    }

    /// Deletes a record unconditionally.
    ///
    /// Returns whether a row was removed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Operation`] when the delete fails.
    #[instrument(skip(self), fields(operation = "delete", record.id = %id.as_str()))]
    pub fn delete(&self, id: &RecordId) -> Result<bool> {
        let start = Instant::now();
        let result = self.run(|conn| {
            let removed = conn
                .execute(
                    "DELETE FROM state_records WHERE id = ?1",
                    params![id.as_str()],
                )
                .map_err(|e| Error::Operation {
                    operation: "delete_record".to_string(),
                    cause: e.to_string(),
                })?;
            Ok(removed > 0)
        });

        self.stats.deletes.fetch_add(1, Ordering::Relaxed);
        let status = if result.is_ok() { "success" } else { "error" };
        record_operation_metrics("delete", start, status);
        result
    }

    /// Lists records matching the filter, newest first.
    ///
    /// Rows whose TTL has passed are excluded (but not deleted; see
    /// [`Self::cleanup_expired`]).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for unknown filter fields and
    /// [`Error::Operation`] when the query fails.
    #[instrument(skip(self, filter), fields(operation = "list"))]
    pub fn list(&self, filter: &Filter, limit: Option<usize>) -> Result<Vec<StateRecord>> {
        let start = Instant::now();
        let result = (|| {
            let (clause, mut params_vec, next_idx) = build_filter_clause_numbered(filter, 1)?;
            let expiry = not_expired_clause(next_idx);
            params_vec.push(Value::Real(current_timestamp()));

            let mut sql = format!(
                "SELECT {SELECT_COLUMNS} FROM state_records
                 WHERE 1=1{clause}{expiry}
                 ORDER BY created_at DESC, id DESC"
            );
            if let Some(limit) = limit {
                sql.push_str(&format!(" LIMIT {limit}"));
            }

            self.run(move |conn| {
                let mut stmt = conn.prepare(&sql).map_err(|e| Error::Operation {
                    operation: "prepare_list".to_string(),
                    cause: e.to_string(),
                })?;
                let rows = stmt
                    .query_map(params_from_iter(params_vec), RecordRow::from_row)
                    .map_err(|e| Error::Operation {
                        operation: "list_records".to_string(),
                        cause: e.to_string(),
                    })?;

                let mut records = Vec::new();
                for row in rows {
                    let row = row.map_err(|e| Error::Operation {
                        operation: "list_records_row".to_string(),
                        cause: e.to_string(),
                    })?;
                    records.push(build_record_from_row(row)?);
                }
                Ok(records)
            })
        })();

        self.stats.queries.fetch_add(1, Ordering::Relaxed);
        let status = if result.is_ok() { "success" } else { "error" };
        record_operation_metrics("list", start, status);
        result
    }

    /// Counts records matching the filter, excluding expired rows.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for unknown filter fields and
    /// [`Error::Operation`] when the query fails.
    #[instrument(skip(self, filter), fields(operation = "count"))]
    pub fn count(&self, filter: &Filter) -> Result<u64> {
        let start = Instant::now();
        let result = (|| {
            let (clause, mut params_vec, next_idx) = build_filter_clause_numbered(filter, 1)?;
            let expiry = not_expired_clause(next_idx);
            params_vec.push(Value::Real(current_timestamp()));

            let sql = format!("SELECT COUNT(*) FROM state_records WHERE 1=1{clause}{expiry}");
            self.run(move |conn| {
                let count: i64 = conn
                    .query_row(&sql, params_from_iter(params_vec), |row| row.get(0))
                    .map_err(|e| Error::Operation {
                        operation: "count_records".to_string(),
                        cause: e.to_string(),
                    })?;
                Ok(u64::try_from(count).unwrap_or(0))
            })
        })();

        self.stats.queries.fetch_add(1, Ordering::Relaxed);
        let status = if result.is_ok() { "success" } else { "error" };
        record_operation_metrics("count", start, status);
        result
    }

    /// Removes every row whose TTL has passed in one bulk delete.
    ///
    /// Returns the number of rows removed. Used by periodic maintenance and
    /// exposed directly for eager cleanup.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Operation`] when the sweep fails.
    #[instrument(skip(self), fields(operation = "cleanup_expired"))]
    pub fn cleanup_expired(&self) -> Result<u64> {
        let start = Instant::now();
        let result = self.run(|conn| {
            let removed = conn
                .execute(
                    "DELETE FROM state_records WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                    params![current_timestamp()],
                )
                .map_err(|e| Error::Operation {
                    operation: "cleanup_expired".to_string(),
                    cause: e.to_string(),
                })?;
            Ok(u64::try_from(removed).unwrap_or(u64::MAX))
        });

        if let Ok(removed) = &result {
            self.stats
                .expired_removed
                .fetch_add(*removed, Ordering::Relaxed);
            if *removed > 0 {
                tracing::info!(removed, "expired records swept");
            }
        }
        let status = if result.is_ok() { "success" } else { "error" };
        record_operation_metrics("cleanup_expired", start, status);
        result
    }

    /// Reports store health and size statistics.
    ///
    /// A failing probe degrades the status instead of erroring, so health
    /// checks stay usable while the store is unhappy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] only when no connection can be borrowed
    /// at all.
    #[instrument(skip(self), fields(operation = "health_check"))]
    pub fn health_check(&self) -> Result<HealthInfo> {
        let probe: Result<u64> = self.run(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM state_records", [], |row| row.get(0))
                .map_err(|e| Error::Operation {
                    operation: "health_probe".to_string(),
                    cause: e.to_string(),
                })?;
            Ok(u64::try_from(count).unwrap_or(0))
        });

        let (status, total_records) = match probe {
            Ok(count) => (HealthStatus::Healthy, count),
            Err(Error::Connection { operation, cause }) => {
                return Err(Error::Connection { operation, cause });
            },
            Err(e) => {
                tracing::warn!(error = %e, "health probe failed");
                (HealthStatus::Degraded, 0)
            },
        };

        let config = self.pool.config();
        let db_size = file_size(&config.storage_path);
        let wal_size = file_size(&wal_path(&config.storage_path));
        let pool_stats = self.pool.stats();

        Ok(HealthInfo {
            status,
            backing_store_size_bytes: db_size + wal_size,
            total_records,
            pool_size: pool_stats.capacity,
            active_connections: pool_stats.in_use,
        })
    }

    /// Upserts a batch of records inside a single transaction.
    ///
    /// Joins the caller's open transaction when there is one; otherwise the
    /// batch opens its own. Any failure rolls the batch back before the
    /// error propagates.
    ///
    /// # Errors
    ///
    /// Propagates the first save error, and transaction errors from the
    /// surrounding begin/commit.
    #[instrument(skip(self, records), fields(operation = "save_many", count = records.len()))]
    pub fn save_many(&self, records: &mut [StateRecord]) -> Result<Vec<RecordId>> {
        let txn_id = self.txn.begin()?;

        let mut ids = Vec::with_capacity(records.len());
        for record in records.iter_mut() {
            match self.save(record) {
                Ok(id) => ids.push(id),
                Err(e) => {
                    let _ = self.txn.rollback(Some(txn_id));
                    return Err(e);
                },
            }
        }

        self.txn.commit(Some(txn_id))?;
        Ok(ids)
    }
}

/// Size of a file in bytes, 0 when absent.
fn file_size(path: &std::path::Path) -> u64 {
    std::fs::metadata(path).map_or(0, |m| m.len())
}

/// Path of the WAL sidecar for a database file.
fn wal_path(db_path: &std::path::Path) -> std::path::PathBuf {
    let mut name = db_path.as_os_str().to_os_string();
    name.push("-wal");
    std::path::PathBuf::from(name)
}
