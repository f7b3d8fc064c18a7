//! Memory-bounded batch iteration over large result sets.
//!
//! [`RecordStream`] walks the same `created_at DESC, id DESC` ordering as
//! `list`, yielding records in batches instead of materializing the result
//! set. It borrows one pooled connection for its whole life and returns it
//! on drop, so abandoning a stream mid-iteration can never starve the pool.
//!
//! Batch sizing is a live feedback loop: every ten accumulated rows the
//! stream asks its [`MemoryOptimizer`] for the current optimal batch size
//! (passing the observed average record size as a hint) and adopts the
//! answer at the next batch boundary. A batch is also cut early when its
//! approximate in-memory size crosses the configured memory ceiling.
//!
//! Cursor note: rusqlite statements borrow their connection, so one open
//! cursor cannot be stored alongside it. The stream instead re-establishes
//! its position at each batch boundary with a keyset predicate on
//! `(created_at, id)`; for a fixed dataset this produces the exact `list`
//! ordering with no duplicates and no omissions.
//!
//! Expired rows are skipped during the scan but NOT deleted; deletion stays
//! the responsibility of `load` (lazy) and `cleanup_expired` (sweep).

use crate::memory::MemoryOptimizer;
use crate::models::{Filter, StateRecord};
use crate::storage::pool::{ConnectionPool, PooledConnection};
use crate::storage::sqlite::{
    build_filter_clause_numbered, build_record_from_row, RecordRow, SELECT_COLUMNS,
};
use crate::{current_timestamp, Error, Result};
use rusqlite::params_from_iter;
use rusqlite::types::Value;
use std::sync::Arc;

/// How many accumulated rows between optimizer consultations.
const OPTIMIZER_POLL_INTERVAL: u64 = 10;

/// Streaming parameters.
#[derive(Debug, Clone, Copy)]
pub struct StreamConfig {
    /// Batch size before the optimizer's first adjustment.
    pub initial_batch_size: usize,
    /// Approximate per-batch memory ceiling in megabytes; `0.0` disables it.
    pub max_memory_mb: f64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            initial_batch_size: 100,
            max_memory_mb: 100.0,
        }
    }
}

/// Lazy, finite, non-restartable sequence of record batches.
///
/// Consumers that need to restart must open a new stream.
pub struct RecordStream {
    conn: Option<PooledConnection>,
    optimizer: Arc<MemoryOptimizer>,
    /// Filter WHERE fragment with parameters starting at `?1`.
    clause: String,
    params: Vec<Value>,
    next_param_idx: usize,
    batch_size: usize,
    next_batch_size: usize,
    max_memory_bytes: usize,
    /// `(created_at, id)` of the last row pulled, expired rows included.
    last_key: Option<(f64, String)>,
    exhausted: bool,
    rows_seen: u64,
    bytes_seen: u64,
}

impl std::fmt::Debug for RecordStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStream")
            .field("batch_size", &self.batch_size)
            .field("rows_seen", &self.rows_seen)
            .field("exhausted", &self.exhausted)
            .finish_non_exhaustive()
    }
}

impl RecordStream {
    /// Opens a stream over records matching `filter`.
    ///
    /// Borrows a pooled connection immediately; size the pool accounting for
    /// concurrent long-lived streams.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for unknown filter fields and
    /// [`Error::Connection`] when the pool has nothing free.
    pub fn open(
        pool: &Arc<ConnectionPool>,
        optimizer: Arc<MemoryOptimizer>,
        filter: &Filter,
        config: StreamConfig,
    ) -> Result<Self> {
        let (clause, params, next_param_idx) = build_filter_clause_numbered(filter, 1)?;
        let conn = pool.acquire()?;

        let batch_size = config.initial_batch_size.max(1);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let max_memory_bytes = if config.max_memory_mb > 0.0 {
            (config.max_memory_mb * 1024.0 * 1024.0) as usize
        } else {
            usize::MAX
        };

        Ok(Self {
            conn: Some(conn),
            optimizer,
            clause,
            params,
            next_param_idx,
            batch_size,
            next_batch_size: batch_size,
            max_memory_bytes,
            last_key: None,
            exhausted: false,
            rows_seen: 0,
            bytes_seen: 0,
        })
    }

    /// Batch size the next accumulation window will use.
    #[must_use]
    pub const fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Pulls the next batch, or `None` when the cursor is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Operation`] when the scan fails; the stream releases
    /// its connection and terminates.
    pub fn next_batch(&mut self) -> Result<Option<Vec<StateRecord>>> {
        if self.exhausted {
            return Ok(None);
        }
        let Some(conn) = self.conn.take() else {
            return Ok(None);
        };

        match self.scan(&conn) {
            Ok((batch, finished)) => {
                if finished {
                    // End of cursor: release the connection right away
                    self.exhausted = true;
                    drop(conn);
                } else {
                    self.conn = Some(conn);
                }
                // Adopted batch size takes effect at this boundary
                self.batch_size = self.next_batch_size;
                if batch.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(batch))
                }
            },
            Err(e) => {
                self.exhausted = true;
                drop(conn);
                Err(e)
            },
        }
    }

    /// Accumulates one batch from a freshly positioned cursor.
    fn scan(&mut self, conn: &PooledConnection) -> Result<(Vec<StateRecord>, bool)> {
        let mut sql = format!(
            "SELECT {SELECT_COLUMNS} FROM state_records WHERE 1=1{}",
            self.clause
        );
        let mut params = self.params.clone();
        if let Some((created_at, id)) = &self.last_key {
            let (i0, i1, i2) = (
                self.next_param_idx,
                self.next_param_idx + 1,
                self.next_param_idx + 2,
            );
            sql.push_str(&format!(
                " AND (created_at < ?{i0} OR (created_at = ?{i1} AND id < ?{i2}))"
            ));
            params.push(Value::Real(*created_at));
            params.push(Value::Real(*created_at));
            params.push(Value::Text(id.clone()));
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC");

        let mut stmt = conn.prepare(&sql).map_err(|e| Error::Operation {
            operation: "prepare_stream".to_string(),
            cause: e.to_string(),
        })?;
        let mut rows = stmt
            .query(params_from_iter(params))
            .map_err(|e| Error::Operation {
                operation: "stream_query".to_string(),
                cause: e.to_string(),
            })?;

        let now = current_timestamp();
        let mut batch = Vec::new();
        let mut batch_bytes = 0usize;
        let mut finished = false;

        loop {
            let row = match rows.next() {
                Ok(Some(row)) => row,
                Ok(None) => {
                    finished = true;
                    break;
                },
                Err(e) => {
                    return Err(Error::Operation {
                        operation: "stream_row".to_string(),
                        cause: e.to_string(),
                    });
                },
            };

            let raw = RecordRow::from_row(row).map_err(|e| Error::Operation {
                operation: "stream_decode".to_string(),
                cause: e.to_string(),
            })?;
            self.last_key = Some((raw.created_at, raw.id.clone()));

            let record = build_record_from_row(raw)?;
            if record.is_expired(now) {
                // Lazy-skip only; the sweep owns deletion
                continue;
            }

            self.rows_seen += 1;
            let size = record.approximate_size();
            self.bytes_seen += size as u64;
            batch_bytes += size;
            batch.push(record);

            if self.rows_seen % OPTIMIZER_POLL_INTERVAL == 0 {
                #[allow(clippy::cast_possible_truncation)]
                let hint = (self.bytes_seen / self.rows_seen) as usize;
                self.next_batch_size = self.optimizer.optimal_batch_size(Some(hint)).max(1);
                if self.next_batch_size != self.batch_size {
                    tracing::debug!(
                        current = self.batch_size,
                        next = self.next_batch_size,
                        "stream adopting new batch size"
                    );
                }
            }

            if batch.len() >= self.batch_size {
                break;
            }
            if batch_bytes >= self.max_memory_bytes {
                tracing::debug!(
                    batch_bytes,
                    limit = self.max_memory_bytes,
                    rows = batch.len(),
                    "batch cut early by memory ceiling"
                );
                break;
            }
        }

        Ok((batch, finished))
    }
}

impl Iterator for RecordStream {
    type Item = Result<Vec<StateRecord>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_batch() {
            Ok(Some(batch)) => Some(Ok(batch)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::memory::{MemorySample, OptimizerConfig};
    use crate::models::Filter;
    use crate::storage::backend::StorageBackend;
    use std::time::Duration;
    use tempfile::TempDir;

    fn seeded_backend(count: usize) -> (StorageBackend, Arc<ConnectionPool>, TempDir) {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig::new()
            .with_storage_path(dir.path().join("stream.db"))
            .with_pool_size(2);
        let pool = ConnectionPool::new(config);
        let backend = StorageBackend::new(Arc::clone(&pool));
        for i in 0..count {
            let mut record =
                StateRecord::with_id(format!("r-{i:03}"), vec![0u8; 64]).with_kind("item");
            record.created_at = 1000.0 + i as f64;
            backend.save(&mut record).unwrap();
        }
        (backend, pool, dir)
    }

    fn quiet_optimizer() -> Arc<MemoryOptimizer> {
        // Never adjusts: interval is long, the sample is neutral, and the
        // steady-state size matches the test streams' initial batch size
        Arc::new(MemoryOptimizer::with_sampler(
            OptimizerConfig::default()
                .with_initial_batch_size(10)
                .with_sample_interval(Duration::from_secs(3600)),
            MemorySample::default,
        ))
    }

    #[test]
    fn test_stream_matches_list() {
        let (backend, pool, _dir) = seeded_backend(25);
        let listed = backend.list(&Filter::new(), None).unwrap();

        let stream = RecordStream::open(
            &pool,
            quiet_optimizer(),
            &Filter::new(),
            StreamConfig {
                initial_batch_size: 10,
                max_memory_mb: 100.0,
            },
        )
        .unwrap();

        let mut batch_lens = Vec::new();
        let mut streamed = Vec::new();
        for batch in stream {
            let batch = batch.unwrap();
            batch_lens.push(batch.len());
            streamed.extend(batch);
        }

        assert_eq!(batch_lens, vec![10, 10, 5]);
        assert_eq!(streamed, listed);
    }

    #[test]
    fn test_stream_applies_filter() {
        let (backend, pool, _dir) = seeded_backend(10);
        let mut other = StateRecord::with_id("other", Vec::new()).with_kind("misc");
        backend.save(&mut other).unwrap();

        let stream = RecordStream::open(
            &pool,
            quiet_optimizer(),
            &Filter::new().with_eq("kind", "item"),
            StreamConfig::default(),
        )
        .unwrap();

        let streamed: Vec<_> = stream.map(|b| b.unwrap()).flatten().collect();
        assert_eq!(streamed.len(), 10);
        assert!(streamed.iter().all(|r| r.kind.as_deref() == Some("item")));
    }

    #[test]
    fn test_stream_holds_connection_until_drop() {
        let (_backend, pool, _dir) = seeded_backend(5);
        let small_pool = ConnectionPool::new(pool.config().clone().with_pool_size(1));

        let stream = RecordStream::open(
            &small_pool,
            quiet_optimizer(),
            &Filter::new(),
            StreamConfig::default(),
        )
        .unwrap();

        assert!(small_pool.acquire().is_err());
        drop(stream);
        assert!(small_pool.acquire().is_ok());
    }

    #[test]
    fn test_abandoned_stream_releases_connection() {
        let (_backend, pool, _dir) = seeded_backend(30);
        let mut stream = RecordStream::open(
            &pool,
            quiet_optimizer(),
            &Filter::new(),
            StreamConfig {
                initial_batch_size: 5,
                max_memory_mb: 100.0,
            },
        )
        .unwrap();

        // Pull one batch, then walk away
        let first = stream.next_batch().unwrap().unwrap();
        assert_eq!(first.len(), 5);
        assert_eq!(pool.stats().in_use, 1);

        drop(stream);
        assert_eq!(pool.stats().in_use, 0);
    }

    #[test]
    fn test_connection_released_at_exhaustion() {
        let (_backend, pool, _dir) = seeded_backend(3);
        let mut stream = RecordStream::open(
            &pool,
            quiet_optimizer(),
            &Filter::new(),
            StreamConfig::default(),
        )
        .unwrap();

        let batch = stream.next_batch().unwrap().unwrap();
        assert_eq!(batch.len(), 3);
        // Final partial batch implies the cursor is done and the handle is back
        assert_eq!(pool.stats().in_use, 0);
        assert!(stream.next_batch().unwrap().is_none());
    }

    #[test]
    fn test_expired_rows_skipped_not_deleted() {
        let (backend, pool, _dir) = seeded_backend(5);
        let now = current_timestamp();
        let mut dead = StateRecord::with_id("dead", Vec::new()).with_kind("item");
        dead.created_at = now - 100.0;
        dead.expires_at = Some(now - 1.0);
        backend.save(&mut dead).unwrap();

        let stream = RecordStream::open(
            &pool,
            quiet_optimizer(),
            &Filter::new(),
            StreamConfig::default(),
        )
        .unwrap();
        let streamed: Vec<_> = stream.map(|b| b.unwrap()).flatten().collect();
        assert_eq!(streamed.len(), 5);
        assert!(streamed.iter().all(|r| r.id.as_str() != "dead"));

        // Still on disk: streaming never deletes
        assert_eq!(backend.health_check().unwrap().total_records, 6);
    }

    #[test]
    fn test_memory_ceiling_cuts_batches() {
        let (_backend, pool, _dir) = seeded_backend(6);
        let stream = RecordStream::open(
            &pool,
            quiet_optimizer(),
            &Filter::new(),
            StreamConfig {
                initial_batch_size: 100,
                // Each 64-byte-payload record approximates to ~200 bytes
                max_memory_mb: 0.0001,
            },
        )
        .unwrap();

        let batches: Vec<_> = stream.map(|b| b.unwrap()).collect();
        assert!(batches.len() >= 6, "tiny ceiling should cut every batch");
        assert_eq!(batches.iter().map(Vec::len).sum::<usize>(), 6);
    }

    #[test]
    fn test_optimizer_feedback_shrinks_batches() {
        let (_backend, pool, _dir) = seeded_backend(20);
        let config = OptimizerConfig::default()
            .with_bounds(2, 100)
            .with_initial_batch_size(8)
            .with_sample_interval(Duration::ZERO);
        let optimizer = Arc::new(MemoryOptimizer::with_sampler(config, || MemorySample {
            process_memory_pct: 95.0,
            system_memory_pct: 95.0,
            available_mb: 10_000.0,
            process_rss_mb: 512.0,
        }));

        let stream = RecordStream::open(
            &pool,
            optimizer,
            &Filter::new(),
            StreamConfig {
                initial_batch_size: 10,
                max_memory_mb: 100.0,
            },
        )
        .unwrap();

        let batch_lens: Vec<usize> = stream.map(|b| b.unwrap().len()).collect();
        assert_eq!(batch_lens.iter().sum::<usize>(), 20);
        // Pressure at every poll: the second batch runs at the shrunken size
        assert_eq!(batch_lens[0], 10);
        assert!(batch_lens[1] < 10, "expected shrink, got {batch_lens:?}");
    }

    #[test]
    fn test_unknown_filter_field_rejected_before_acquire() {
        let (_backend, pool, _dir) = seeded_backend(1);
        let result = RecordStream::open(
            &pool,
            quiet_optimizer(),
            &Filter::new().with_eq("bogus", 1.0),
            StreamConfig::default(),
        );
        assert!(matches!(result, Err(Error::Validation(_))));
        assert_eq!(pool.stats().in_use, 0);
    }
}
