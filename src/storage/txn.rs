//! Per-scope nested transaction management.
//!
//! A [`TransactionManager`] gives one logical caller (thread or task)
//! transactional semantics while letting reentrant code "join" an open
//! transaction instead of failing: only the depth 0→1 `begin` issues a real
//! `BEGIN IMMEDIATE`, and only the depth 1→0 `commit`/`rollback` reaches the
//! backend. The manager borrows one pooled connection for the lifetime of
//! the outermost transaction and returns it at the final boundary.
//!
//! One manager per logical scope. Sharing a manager across concurrent
//! callers is not supported: the stack would interleave begins and commits
//! from unrelated operations.

use crate::storage::pool::{ConnectionPool, PooledConnection};
use crate::storage::sqlite::acquire_lock;
use crate::{Error, Result};
use rusqlite::Connection;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Identifier for one `begin` in a transaction scope.
///
/// Nested joins get their own id so commit/rollback calls can name the level
/// they are closing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(u64);

impl TransactionId {
    /// Returns the raw id value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn-{}", self.0)
    }
}

struct TxnState {
    /// Open transaction levels, outermost first.
    stack: Vec<TransactionId>,
    /// Connection held while the scope is open.
    conn: Option<PooledConnection>,
    /// Set by a nested rollback; turns the outermost commit into a rollback.
    rollback_requested: bool,
}

/// Nested-transaction stack bound to one connection pool.
pub struct TransactionManager {
    pool: Arc<ConnectionPool>,
    state: Mutex<TxnState>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("depth", &self.depth())
            .finish_non_exhaustive()
    }
}

impl TransactionManager {
    /// Creates a manager drawing connections from `pool`.
    #[must_use]
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self {
            pool,
            state: Mutex::new(TxnState {
                stack: Vec::new(),
                conn: None,
                rollback_requested: false,
            }),
            next_id: AtomicU64::new(1),
        }
    }

    /// Opens a transaction, or joins the one already open in this scope.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] when no pooled connection is available
    /// at depth 0, or [`Error::Transaction`] when `BEGIN` fails.
    pub fn begin(&self) -> Result<TransactionId> {
        let mut state = acquire_lock(&self.state);
        let id = TransactionId(self.next_id.fetch_add(1, Ordering::Relaxed));

        if state.stack.is_empty() {
            let conn = self.pool.acquire()?;
            conn.execute_batch("BEGIN IMMEDIATE")
                .map_err(|e| Error::Transaction {
                    operation: "begin".to_string(),
                    cause: e.to_string(),
                })?;
            state.conn = Some(conn);
            state.rollback_requested = false;
            tracing::debug!(id = %id, "transaction opened");
        } else {
            tracing::debug!(id = %id, depth = state.stack.len() + 1, "joined open transaction");
        }

        state.stack.push(id);
        Ok(id)
    }

    /// Commits the given transaction level, or the most recent one.
    ///
    /// Only the outermost commit reaches the backend; inner commits pop the
    /// stack. If a nested level rolled back earlier, the outermost "commit"
    /// issues a real `ROLLBACK` instead and returns `false`.
    ///
    /// Calling without a matching `begin` is a logged no-op returning
    /// `Ok(false)`, never an error - best-effort cleanup code stays simple.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transaction`] when the real `COMMIT`/`ROLLBACK`
    /// fails.
    pub fn commit(&self, id: Option<TransactionId>) -> Result<bool> {
        self.close_level(id, false)
    }

    /// Rolls back the given transaction level, or the most recent one.
    ///
    /// An inner rollback pops its level and poisons the scope: every pending
    /// change is discarded when the outermost level closes. Only the
    /// outermost rollback reaches the backend.
    ///
    /// Calling without a matching `begin` is a logged no-op returning
    /// `Ok(false)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transaction`] when the real `ROLLBACK` fails.
    pub fn rollback(&self, id: Option<TransactionId>) -> Result<bool> {
        self.close_level(id, true)
    }

    /// Whether a transaction is open in this scope.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !acquire_lock(&self.state).stack.is_empty()
    }

    /// Open transaction ids, outermost first.
    #[must_use]
    pub fn active_ids(&self) -> Vec<TransactionId> {
        acquire_lock(&self.state).stack.clone()
    }

    /// Current nesting depth.
    #[must_use]
    pub fn depth(&self) -> usize {
        acquire_lock(&self.state).stack.len()
    }

    /// Runs `f` on the connection held by the open transaction.
    ///
    /// Returns `Ok(None)` when no transaction is active, so callers can fall
    /// back to a pool acquire.
    ///
    /// # Errors
    ///
    /// Propagates errors from `f`.
    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T>,
    ) -> Result<Option<T>> {
        let state = acquire_lock(&self.state);
        match state.conn.as_ref() {
            Some(conn) => f(conn).map(Some),
            None => Ok(None),
        }
    }

    /// Borrows the open transaction's connection, or `None` outside a
    /// transaction. The guard holds the scope lock for its lifetime.
    pub(crate) fn lock_connection(&self) -> Option<TxnConnGuard<'_>> {
        let guard = acquire_lock(&self.state);
        if guard.conn.is_some() {
            Some(TxnConnGuard { guard })
        } else {
            None
        }
    }

    /// Shared implementation of commit/rollback.
    fn close_level(&self, id: Option<TransactionId>, is_rollback: bool) -> Result<bool> {
        let op = if is_rollback { "rollback" } else { "commit" };
        let mut state = acquire_lock(&self.state);

        if state.stack.is_empty() {
            tracing::warn!(operation = op, "no active transaction; ignoring");
            return Ok(false);
        }

        let target = match id {
            Some(id) if !state.stack.contains(&id) => {
                tracing::warn!(operation = op, id = %id, "unknown transaction id; ignoring");
                return Ok(false);
            },
            Some(id) => id,
            None => match state.stack.last() {
                Some(top) => *top,
                None => return Ok(false),
            },
        };

        // Pop the target and any levels begun after it; closing an outer
        // level implicitly closes the joins nested inside it.
        while let Some(popped) = state.stack.pop() {
            if popped == target {
                break;
            }
            tracing::debug!(id = %popped, "implicitly closed nested transaction");
        }

        if is_rollback {
            state.rollback_requested = true;
        }

        if !state.stack.is_empty() {
            // Inner boundary: nothing reaches the backend
            tracing::debug!(id = %target, operation = op, depth = state.stack.len(), "nested boundary popped");
            return Ok(true);
        }

        // Outermost boundary: one real statement reaches SQLite. The
        // connection is released back to the pool whatever happens.
        let rollback = state.rollback_requested;
        state.rollback_requested = false;
        let conn = state.conn.take();
        drop(state);

        let Some(conn) = conn else {
            tracing::warn!(operation = op, "transaction stack had no connection");
            return Ok(false);
        };

        let sql = if rollback { "ROLLBACK" } else { "COMMIT" };
        let result = conn.execute_batch(sql).map_err(|e| Error::Transaction {
            operation: op.to_string(),
            cause: e.to_string(),
        });
        drop(conn);
        result?;

        if rollback && !is_rollback {
            tracing::warn!(id = %target, "commit demoted to rollback after nested rollback");
            return Ok(false);
        }
        tracing::debug!(id = %target, operation = op, "transaction closed");
        Ok(true)
    }
}

/// Lock-holding view of the open transaction's connection.
pub(crate) struct TxnConnGuard<'a> {
    guard: std::sync::MutexGuard<'a, TxnState>,
}

impl std::ops::Deref for TxnConnGuard<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // Invariant: the guard is only constructed while `conn` is Some
        self.guard
            .conn
            .as_ref()
            .unwrap_or_else(|| unreachable!("transaction guard without connection"))
    }
}
