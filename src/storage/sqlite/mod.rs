//! Shared `SQLite` infrastructure for the storage engine.
//!
//! Common utilities used by the pool, backend, and streaming layers:
//!
//! - [`connection`]: lock acquisition with poison recovery, per-connection
//!   pragma configuration
//! - [`sql`]: filter-to-WHERE translation with numbered parameters
//! - [`record_row`]: row conversion for [`StateRecord`](crate::models::StateRecord)
//! - [`metrics`]: shared metrics recording helpers

mod connection;
mod metrics;
mod record_row;
mod sql;

pub use connection::{acquire_lock, configure_connection};
pub use metrics::record_operation_metrics;
pub use record_row::{build_record_from_row, RecordRow, SELECT_COLUMNS};
pub use sql::{build_filter_clause_numbered, not_expired_clause};
