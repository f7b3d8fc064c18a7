//! # Statehouse
//!
//! Embedded state persistence engine for agent and workflow platforms.
//!
//! Statehouse stores versioned state records (snapshots, history entries,
//! generic items) in SQLite with TTL expiry, transactional consistency,
//! connection pooling, and memory-aware streaming for large result sets.
//! One engine serves many adapters; the adapters stay out of this crate.
//!
//! ## Features
//!
//! - Fixed-capacity connection pool with fail-fast acquire
//! - Nested transactions that join an already-open scope
//! - Flat predicate filters translated to indexed SQL
//! - Lazy + bulk TTL expiry
//! - Streaming reads with a live memory feedback loop
//! - Online backup and rotation via SQLite's native backup API
//!
//! ## Example
//!
//! ```rust,ignore
//! use statehouse::{StateStore, StateRecord, StoreConfig};
//!
//! let store = StateStore::open(StoreConfig::new().with_storage_path("./state.db"))?;
//! let mut record = StateRecord::new(b"payload".to_vec()).with_kind("snapshot");
//! let id = store.save(&mut record)?;
//! let loaded = store.load(&id)?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
// multiple_crate_versions is inherently crate-level (detects duplicate transitive dependencies).
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

// Module declarations
pub mod config;
pub mod memory;
pub mod models;
pub mod observability;
pub mod storage;
pub mod store;

// Re-exports for convenience
pub use config::{StoreConfig, SyncMode, TempStore};
pub use memory::{AdjustmentEvent, AdjustmentReason, MemoryOptimizer, OptimizerConfig};
pub use models::{Filter, HealthInfo, HealthStatus, Predicate, RecordId, StateRecord};
pub use storage::{
    BackupStrategy, ConnectionPool, PooledConnection, RecordStream, StorageBackend,
    StorageStats, StreamConfig, TransactionId, TransactionManager,
};
pub use store::StateStore;

/// Error type for statehouse operations.
///
/// Uses `thiserror` for automatic `Display` and `Error` trait implementations.
/// Low-level `rusqlite` failures are always wrapped into one of these kinds
/// before they cross the engine boundary; callers never see raw backend
/// errors.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `Connection` | Pool exhausted, connection open/configure failure |
/// | `Operation` | A single CRUD call failed against SQLite |
/// | `Transaction` | Outermost begin/commit/rollback failed |
/// | `Validation` | Malformed record or filter |
#[derive(Debug, ThisError)]
pub enum Error {
    /// A connection could not be provided.
    ///
    /// Raised when:
    /// - The pool is exhausted (fail-fast, no queueing)
    /// - Opening the SQLite database fails
    /// - Pragma configuration of a fresh connection fails
    #[error("connection '{operation}' failed: {cause}")]
    Connection {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// A storage operation failed.
    ///
    /// Raised when:
    /// - SQLite statement preparation or execution fails
    /// - Row decoding fails (corrupt metadata JSON, bad column types)
    /// - Filesystem I/O during backup/restore fails
    #[error("operation '{operation}' failed: {cause}")]
    Operation {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// An outermost transaction boundary failed.
    ///
    /// Raised when:
    /// - `BEGIN IMMEDIATE` fails at depth 0
    /// - The real `COMMIT`/`ROLLBACK` fails at depth 1
    ///
    /// Nested commit/rollback without a matching begin is deliberately NOT
    /// an error; it is a logged no-op returning `false`.
    #[error("transaction '{operation}' failed: {cause}")]
    Transaction {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// Invalid input was provided.
    ///
    /// Raised when:
    /// - A record carries `expires_at <= created_at`
    /// - A filter references an unknown field name
    /// - Metadata cannot be serialized to JSON
    #[error("invalid input: {0}")]
    Validation(String),
}

/// Result type alias for statehouse operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns the current Unix timestamp as floating-point seconds.
///
/// All record timestamps use floating-point seconds since epoch so that
/// comparisons stay numeric. Falls back to 0.0 if the system clock is
/// before the Unix epoch.
///
/// # Examples
///
/// ```rust
/// use statehouse::current_timestamp;
///
/// let ts = current_timestamp();
/// assert!(ts > 0.0);
/// ```
#[must_use]
pub fn current_timestamp() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
