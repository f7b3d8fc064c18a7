//! Shared connection handling.
//!
//! Utilities for managing `SQLite` connections with proper mutex handling,
//! poison recovery, and per-connection pragma configuration.

use crate::config::StoreConfig;
use crate::Result;
use rusqlite::Connection;
use std::sync::{Mutex, MutexGuard};

/// Helper to acquire a mutex lock with poison recovery.
///
/// If the mutex is poisoned (due to a panic in a previous critical section),
/// we recover the inner value and log a warning. This prevents cascading
/// failures when one operation panics.
pub fn acquire_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            // Recover from poison - the guarded state is still structurally valid
            tracing::warn!("statehouse mutex was poisoned, recovering");
            metrics::counter!("statehouse_mutex_poison_recovery_total").increment(1);
            poisoned.into_inner()
        },
    }
}

/// Configures a `SQLite` connection from the store configuration.
///
/// # Configuration Applied
///
/// - **Journal mode**: WAL when `durability_mode` is on (concurrent readers
///   with a single writer), rollback journal otherwise
/// - **Synchronous level**: from `sync_mode`
/// - **`busy_timeout`**: from `connect_timeout`, so lock contention waits
///   instead of failing immediately
/// - **Foreign keys**: from `enforce_referential_integrity`
/// - **Cache size / temp store**: only when overridden
///
/// Applied exactly once per connection, at creation time in the pool.
///
/// # Errors
///
/// Currently infallible; pragma results are ignored because `journal_mode`
/// returns a value row rather than an empty result. The `Result` return is
/// kept so configuration failures can become [`crate::Error::Connection`]
/// without an API break.
pub fn configure_connection(conn: &Connection, config: &StoreConfig) -> Result<()> {
    // journal_mode returns a string like "wal" which would cause
    // execute_batch to fail, so pragma_update results are ignored
    let journal = if config.durability_mode { "WAL" } else { "DELETE" };
    let _ = conn.pragma_update(None, "journal_mode", journal);
    let _ = conn.pragma_update(None, "synchronous", config.sync_mode.as_pragma());
    let _ = conn.pragma_update(
        None,
        "busy_timeout",
        i64::try_from(config.connect_timeout.as_millis()).unwrap_or(i64::MAX),
    );
    let _ = conn.pragma_update(None, "foreign_keys", config.enforce_referential_integrity);
    if let Some(cache_size) = config.cache_size {
        let _ = conn.pragma_update(None, "cache_size", cache_size);
    }
    let _ = conn.pragma_update(None, "temp_store", config.temp_store.as_pragma());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SyncMode, TempStore};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_acquire_lock_success() {
        let mutex = Mutex::new(42);
        let guard = acquire_lock(&mutex);
        assert_eq!(*guard, 42);
    }

    #[test]
    fn test_acquire_lock_concurrent() {
        let mutex = Arc::new(Mutex::new(0));
        let mut handles = vec![];

        for _ in 0..10 {
            let mutex_clone = Arc::clone(&mutex);
            let handle = thread::spawn(move || {
                let mut guard = acquire_lock(&mutex_clone);
                *guard += 1;
            });
            handles.push(handle);
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let guard = acquire_lock(&mutex);
        assert_eq!(*guard, 10);
    }

    #[test]
    fn test_configure_connection_defaults() {
        let conn = Connection::open_in_memory().unwrap();
        let config = StoreConfig::default();
        configure_connection(&conn, &config).unwrap();

        // In-memory SQLite databases cannot use WAL mode - they report "memory"
        let journal_mode: String = conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .unwrap();
        assert!(
            journal_mode.to_lowercase() == "wal" || journal_mode.to_lowercase() == "memory",
            "Expected 'wal' or 'memory' journal mode, got '{journal_mode}'"
        );

        // NORMAL = 1
        let synchronous: i32 = conn
            .pragma_query_value(None, "synchronous", |row| row.get(0))
            .unwrap();
        assert_eq!(synchronous, 1);

        let busy_timeout: i32 = conn
            .pragma_query_value(None, "busy_timeout", |row| row.get(0))
            .unwrap();
        assert_eq!(busy_timeout, 30_000);

        let foreign_keys: i32 = conn
            .pragma_query_value(None, "foreign_keys", |row| row.get(0))
            .unwrap();
        assert_eq!(foreign_keys, 1);
    }

    #[test]
    fn test_configure_connection_overrides() {
        let conn = Connection::open_in_memory().unwrap();
        let config = StoreConfig::default()
            .with_durability_mode(false)
            .with_sync_mode(SyncMode::Off)
            .with_cache_size(-4000)
            .with_temp_store(TempStore::Memory);
        configure_connection(&conn, &config).unwrap();

        // OFF = 0
        let synchronous: i32 = conn
            .pragma_query_value(None, "synchronous", |row| row.get(0))
            .unwrap();
        assert_eq!(synchronous, 0);

        let cache_size: i64 = conn
            .pragma_query_value(None, "cache_size", |row| row.get(0))
            .unwrap();
        assert_eq!(cache_size, -4000);

        // MEMORY = 2
        let temp_store: i32 = conn
            .pragma_query_value(None, "temp_store", |row| row.get(0))
            .unwrap();
        assert_eq!(temp_store, 2);
    }
}
