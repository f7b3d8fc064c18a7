//! Fixed-capacity connection pool with fail-fast acquire.
//!
//! The pool owns every [`rusqlite::Connection`] it ever creates. Handles are
//! created lazily up to `pool_size`, configured once at creation time, and
//! lent out exclusively through the [`PooledConnection`] RAII guard. When the
//! pool is at capacity with nothing free, `acquire` fails immediately -
//! backpressure is pushed to the caller instead of queueing.

use crate::config::StoreConfig;
use crate::storage::sqlite::{acquire_lock, configure_connection};
use crate::{Error, Result};
use rusqlite::Connection;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Schema initialization run exactly once per new connection handle.
///
/// `CREATE ... IF NOT EXISTS` keeps repeated runs cheap; the statements are
/// idempotent across handles and processes.
const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS state_records (
    id          TEXT PRIMARY KEY,
    payload     BLOB NOT NULL,
    created_at  REAL NOT NULL,
    updated_at  REAL NOT NULL,
    expires_at  REAL,
    compressed  INTEGER NOT NULL DEFAULT 0,
    kind        TEXT,
    thread_id   TEXT,
    session_id  TEXT,
    metadata    TEXT
);
CREATE INDEX IF NOT EXISTS idx_state_records_kind ON state_records(kind);
CREATE INDEX IF NOT EXISTS idx_state_records_thread_id ON state_records(thread_id);
CREATE INDEX IF NOT EXISTS idx_state_records_session_id ON state_records(session_id);
CREATE INDEX IF NOT EXISTS idx_state_records_created_at ON state_records(created_at DESC);
CREATE INDEX IF NOT EXISTS idx_state_records_expires_at
    ON state_records(expires_at) WHERE expires_at IS NOT NULL;
";

/// Counters describing pool occupancy.
#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    /// Configured maximum number of handles.
    pub capacity: usize,
    /// Handles currently alive (free + lent out).
    pub created: usize,
    /// Handles currently lent out.
    pub in_use: usize,
    /// Handles sitting in the free list.
    pub free: usize,
}

/// Fixed-capacity free list of configured `SQLite` connections.
///
/// The free list is the only shared mutable structure; it is guarded by a
/// mutex with O(1) acquire/release. Everything else is atomic counters.
#[derive(Debug)]
pub struct ConnectionPool {
    config: StoreConfig,
    free: Mutex<Vec<Connection>>,
    created: AtomicUsize,
    in_use: AtomicUsize,
    closed: AtomicBool,
}

impl ConnectionPool {
    /// Creates an empty pool for the given configuration.
    ///
    /// Connections are created lazily on first acquire, so constructing a
    /// pool performs no I/O.
    #[must_use]
    pub fn new(config: StoreConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            free: Mutex::new(Vec::new()),
            created: AtomicUsize::new(0),
            in_use: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Returns the store configuration this pool was built from.
    #[must_use]
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Borrows a connection from the pool.
    ///
    /// Fail-fast: when every handle is lent out, this returns
    /// [`Error::Connection`] immediately instead of blocking. Callers that
    /// need a wait must implement it around this call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] when the pool is closed, exhausted, or a
    /// fresh connection cannot be opened and configured.
    pub fn acquire(self: &Arc<Self>) -> Result<PooledConnection> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Connection {
                operation: "acquire".to_string(),
                cause: "pool is closed".to_string(),
            });
        }

        let reused = acquire_lock(&self.free).pop();
        let conn = match reused {
            Some(conn) => conn,
            None => {
                // Reserve a creation slot before opening so concurrent
                // acquires cannot overshoot capacity.
                loop {
                    let created = self.created.load(Ordering::Acquire);
                    if created >= self.config.pool_size {
                        metrics::counter!("statehouse_pool_exhausted_total").increment(1);
                        tracing::debug!(
                            capacity = self.config.pool_size,
                            "connection pool exhausted"
                        );
                        return Err(Error::Connection {
                            operation: "acquire".to_string(),
                            cause: format!(
                                "pool exhausted ({} connections in use)",
                                self.config.pool_size
                            ),
                        });
                    }
                    if self
                        .created
                        .compare_exchange(
                            created,
                            created + 1,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        break;
                    }
                }
                match self.open_connection() {
                    Ok(conn) => conn,
                    Err(e) => {
                        self.created.fetch_sub(1, Ordering::AcqRel);
                        return Err(e);
                    },
                }
            },
        };

        self.in_use.fetch_add(1, Ordering::AcqRel);
        Ok(PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(self),
        })
    }

    /// Closes every pooled handle. Idempotent; called once during shutdown.
    ///
    /// Handles still lent out are closed as they come back instead of being
    /// re-pooled.
    pub fn close_all(&self) {
        self.closed.store(true, Ordering::Release);
        let mut free = acquire_lock(&self.free);
        let drained = free.len();
        for conn in free.drain(..) {
            self.created.fetch_sub(1, Ordering::AcqRel);
            drop(conn);
        }
        if drained > 0 {
            tracing::debug!(closed = drained, "connection pool shut down");
        }
    }

    /// Current occupancy counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.config.pool_size,
            created: self.created.load(Ordering::Acquire),
            in_use: self.in_use.load(Ordering::Acquire),
            free: acquire_lock(&self.free).len(),
        }
    }

    /// Reopens a closed pool so fresh connections can be created again.
    ///
    /// Used by restore, which must tear every handle down while the database
    /// file is replaced underneath.
    pub(crate) fn reopen(&self) {
        self.closed.store(false, Ordering::Release);
    }

    /// Opens, configures, and schema-initializes one new handle.
    fn open_connection(&self) -> Result<Connection> {
        let conn =
            Connection::open(&self.config.storage_path).map_err(|e| Error::Connection {
                operation: "open_connection".to_string(),
                cause: e.to_string(),
            })?;

        configure_connection(&conn, &self.config)?;

        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| Error::Connection {
                operation: "initialize_schema".to_string(),
                cause: e.to_string(),
            })?;

        tracing::debug!(
            path = %self.config.storage_path.display(),
            "created pooled connection"
        );
        Ok(conn)
    }

    /// Returns a handle to the free list, or closes it when the pool no
    /// longer wants it.
    fn release(&self, conn: Connection) {
        self.in_use.fetch_sub(1, Ordering::AcqRel);

        if self.closed.load(Ordering::Acquire) {
            self.created.fetch_sub(1, Ordering::AcqRel);
            drop(conn);
            return;
        }

        let mut free = acquire_lock(&self.free);
        if free.len() < self.config.pool_size {
            free.push(conn);
        } else {
            // Defensive: cannot normally happen with a fixed creation cap
            drop(free);
            self.created.fetch_sub(1, Ordering::AcqRel);
            drop(conn);
        }
    }
}

/// Exclusive lease on one pooled connection.
///
/// Dereferences to [`rusqlite::Connection`]; the handle returns to the pool
/// when the guard drops, including on panic and error paths. `Send` but not
/// `Sync`: a handle is never shared across concurrent callers.
#[derive(Debug)]
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<ConnectionPool>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // Invariant: `conn` is only None after drop
        self.conn
            .as_ref()
            .unwrap_or_else(|| unreachable!("pooled connection used after drop"))
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}
