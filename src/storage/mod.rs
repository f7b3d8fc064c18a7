//! Storage engine: pool, transactions, CRUD backend, streaming, backup.
//!
//! Layering, leaves first:
//! - [`sqlite`]: shared connection configuration, SQL building, row decoding
//! - [`pool`]: fixed-capacity connection free list with fail-fast acquire
//! - [`txn`]: per-scope nested transaction stack
//! - [`backend`]: record CRUD, filtered queries, TTL enforcement, health
//! - [`stream`]: memory-bounded batch iteration over large result sets
//! - [`backup`]: online backup, restore, and rotation

// Allow cast precision loss for size calculations where exact precision is not critical.
#![allow(clippy::cast_precision_loss)]
// Allow significant_drop_tightening - dropping database connections slightly early
// provides no meaningful benefit.
#![allow(clippy::significant_drop_tightening)]

pub mod backend;
pub mod backup;
pub mod pool;
pub mod sqlite;
pub mod stream;
pub mod txn;

pub use backend::{StorageBackend, StorageStats};
pub use backup::{BackupRecord, BackupStrategy};
pub use pool::{ConnectionPool, PoolStats, PooledConnection};
pub use stream::{RecordStream, StreamConfig};
pub use txn::{TransactionId, TransactionManager};
