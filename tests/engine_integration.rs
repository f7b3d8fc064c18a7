//! Integration tests for the statehouse engine.
#![allow(
    clippy::panic,
    clippy::too_many_lines,
    clippy::cast_precision_loss,
    clippy::uninlined_format_args,
    clippy::doc_markdown,
    clippy::redundant_closure_for_method_calls
)]

use statehouse::{
    current_timestamp, Filter, RecordId, StateRecord, StateStore, StoreConfig, StreamConfig,
};
use tempfile::TempDir;

fn open_store(dir: &TempDir, pool_size: usize) -> StateStore {
    let config = StoreConfig::new()
        .with_storage_path(dir.path().join("engine.db"))
        .with_backup_path(dir.path().join("backups"))
        .with_pool_size(pool_size);
    StateStore::open(config).unwrap()
}

/// Pool size 2; save 3 records with kind "x"; list returns exactly 3 ordered
/// newest first; count returns 3; deleting one drops count to 2.
#[test]
fn test_example_scenario() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, 2);

    let mut ids = Vec::new();
    for i in 0..3 {
        let mut record =
            StateRecord::new(format!("payload-{i}").into_bytes()).with_kind("x");
        record.created_at = 1000.0 + f64::from(i);
        ids.push(store.save(&mut record).unwrap());
    }

    let filter = Filter::new().with_eq("kind", "x");
    let listed = store.list(&filter, None).unwrap();
    assert_eq!(listed.len(), 3);
    let created: Vec<f64> = listed.iter().map(|r| r.created_at).collect();
    assert_eq!(created, vec![1002.0, 1001.0, 1000.0]);

    assert_eq!(store.count(&filter).unwrap(), 3);

    assert!(store.delete(&ids[0]).unwrap());
    assert_eq!(store.count(&filter).unwrap(), 2);
}

#[test]
fn test_round_trip_preserves_record() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, 2);

    let mut record = StateRecord::new(b"state bytes".to_vec())
        .with_kind("snapshot")
        .with_thread_id("thread-7")
        .with_session_id("session-1")
        .with_metadata_entry("attempt", serde_json::json!(2))
        .with_metadata_entry("labels", serde_json::json!(["a", "b"]));

    let id = store.save(&mut record).unwrap();
    let loaded = store.load(&id).unwrap().expect("record should exist");

    // Equal modulo timestamp stamping, which save wrote back into `record`
    assert_eq!(loaded, record);
}

#[test]
fn test_ttl_expiry_everywhere() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, 2);
    let now = current_timestamp();

    let mut expired = StateRecord::with_id("expired", Vec::new()).with_kind("x");
    expired.created_at = now - 10.0;
    expired.expires_at = Some(now - 1.0);
    store.save(&mut expired).unwrap();

    let mut live = StateRecord::with_id("live", Vec::new()).with_kind("x");
    store.save(&mut live).unwrap();

    // Absent from list and stream
    let listed = store.list(&Filter::new(), None).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id.as_str(), "live");

    let stream = store.stream(&Filter::new(), StreamConfig::default()).unwrap();
    let streamed: Vec<StateRecord> = stream.flat_map(|b| b.unwrap()).collect();
    assert_eq!(streamed.len(), 1);
    assert_eq!(streamed[0].id.as_str(), "live");

    // Absent from load (and lazily deleted by it)
    assert!(store.load(&RecordId::new("expired")).unwrap().is_none());

    // A fresh expired row is removed by the sweep
    let mut expired2 = StateRecord::with_id("expired-2", Vec::new());
    expired2.created_at = now - 10.0;
    expired2.expires_at = Some(now - 1.0);
    store.save(&mut expired2).unwrap();
    assert_eq!(store.cleanup_expired().unwrap(), 1);
    assert_eq!(store.health_check().unwrap().total_records, 1);
}

#[test]
fn test_upsert_keeps_latest_payload() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, 2);

    let mut v1 = StateRecord::with_id("doc", b"v1".to_vec());
    store.save(&mut v1).unwrap();
    let mut v2 = StateRecord::with_id("doc", b"v2".to_vec());
    store.save(&mut v2).unwrap();

    assert_eq!(store.count(&Filter::new()).unwrap(), 1);
    assert_eq!(store.load(&RecordId::new("doc")).unwrap().unwrap().payload, b"v2");
}

/// begin(); begin(); commit(); commit() reaches the backend exactly once:
/// a reader on a second store sees nothing until the outer commit.
#[test]
fn test_nested_transactions_commit_once() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, 2);
    let reader = open_store(&dir, 2);

    store.begin().unwrap();
    store.begin().unwrap();

    let mut record = StateRecord::with_id("staged", Vec::new());
    store.save(&mut record).unwrap();

    assert!(store.commit(None).unwrap());
    // Inner commit only popped the stack
    assert!(reader.load(&RecordId::new("staged")).unwrap().is_none());

    assert!(store.commit(None).unwrap());
    assert!(reader.load(&RecordId::new("staged")).unwrap().is_some());
}

/// begin(); [begin(); commit();] rollback() discards both changes.
#[test]
fn test_outer_rollback_discards_nested_commit() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, 2);

    store.begin().unwrap();
    let mut outer_change = StateRecord::with_id("outer", Vec::new());
    store.save(&mut outer_change).unwrap();

    store.begin().unwrap();
    let mut nested_change = StateRecord::with_id("nested", Vec::new());
    store.save(&mut nested_change).unwrap();
    assert!(store.commit(None).unwrap());

    assert!(store.rollback(None).unwrap());

    assert_eq!(store.count(&Filter::new()).unwrap(), 0);
    assert!(store.load(&RecordId::new("outer")).unwrap().is_none());
    assert!(store.load(&RecordId::new("nested")).unwrap().is_none());
}

#[test]
fn test_commit_without_begin_is_logged_noop() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, 2);
    assert!(!store.commit(None).unwrap());
    assert!(!store.rollback(None).unwrap());
}

/// Streaming a fixed non-expiring dataset equals list with no limit:
/// no duplicates, no omissions, same order.
#[test]
fn test_streaming_completeness() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, 3);

    for i in 0..57 {
        let mut record = StateRecord::new(vec![b'x'; 32]).with_kind("bulk");
        record.created_at = 5000.0 + i as f64;
        store.save(&mut record).unwrap();
    }

    let listed = store.list(&Filter::new(), None).unwrap();
    assert_eq!(listed.len(), 57);

    let stream = store
        .stream(
            &Filter::new(),
            StreamConfig {
                initial_batch_size: 10,
                max_memory_mb: 50.0,
            },
        )
        .unwrap();
    let streamed: Vec<StateRecord> = stream.flat_map(|b| b.unwrap()).collect();

    assert_eq!(streamed, listed);

    let mut seen = std::collections::HashSet::new();
    for record in &streamed {
        assert!(seen.insert(record.id.as_str().to_string()), "duplicate id");
    }
}

/// Acquiring pool_size + 1 connections without releasing fails the last
/// acquire immediately and deterministically.
#[test]
fn test_pool_exhaustion_is_fail_fast() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, 2);

    let stream_a = store.stream(&Filter::new(), StreamConfig::default()).unwrap();
    let stream_b = store.stream(&Filter::new(), StreamConfig::default()).unwrap();

    let started = std::time::Instant::now();
    let err = store
        .stream(&Filter::new(), StreamConfig::default())
        .unwrap_err();
    assert!(err.to_string().contains("pool exhausted"));
    assert!(
        started.elapsed() < std::time::Duration::from_millis(500),
        "acquire must fail fast, not block"
    );

    drop(stream_a);
    drop(stream_b);
    assert!(store.stream(&Filter::new(), StreamConfig::default()).is_ok());
}

#[test]
fn test_filter_operators_end_to_end() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, 2);

    for (id, kind, created) in [
        ("a", "snapshot", 100.0),
        ("b", "snapshot", 200.0),
        ("c", "history", 300.0),
        ("d", "item", 400.0),
    ] {
        let mut record = StateRecord::with_id(id, Vec::new()).with_kind(kind);
        record.created_at = created;
        record.session_id = Some(format!("run-{id}"));
        store.save(&mut record).unwrap();
    }

    let snapshots = store
        .count(&Filter::new().with_eq("kind", "snapshot"))
        .unwrap();
    assert_eq!(snapshots, 2);

    let recent = store
        .list(&Filter::new().with_gt("created_at", 250.0), None)
        .unwrap();
    assert_eq!(recent.len(), 2);

    let either = store
        .count(&Filter::new().with_in("kind", ["history", "item"]))
        .unwrap();
    assert_eq!(either, 2);

    let not_snapshot = store
        .count(&Filter::new().with_ne("kind", "snapshot"))
        .unwrap();
    assert_eq!(not_snapshot, 2);

    let by_session = store
        .list(&Filter::new().with_like("session_id", "run-%"), None)
        .unwrap();
    assert_eq!(by_session.len(), 4);

    let window = store
        .count(
            &Filter::new()
                .with_gte("created_at", 200.0)
                .with_lte("created_at", 300.0),
        )
        .unwrap();
    assert_eq!(window, 2);
}

#[test]
fn test_backup_restore_and_rotation() {
    let dir = TempDir::new().unwrap();
    let config = StoreConfig::new()
        .with_storage_path(dir.path().join("engine.db"))
        .with_backup_path(dir.path().join("backups"))
        .with_pool_size(2)
        .with_max_backup_files(2);
    let store = StateStore::open(config).unwrap();

    let mut record = StateRecord::with_id("precious", b"v1".to_vec());
    store.save(&mut record).unwrap();

    let backup = store.backup(None).unwrap();
    assert!(backup.exists());

    // Diverge, then restore
    store.delete(&RecordId::new("precious")).unwrap();
    let mut other = StateRecord::with_id("later", Vec::new());
    store.save(&mut other).unwrap();

    store.restore(&backup).unwrap();
    assert!(store.load(&RecordId::new("precious")).unwrap().is_some());
    assert!(store.load(&RecordId::new("later")).unwrap().is_none());

    // Rotation keeps at most max_backup_files
    for _ in 0..4 {
        store.backup(None).unwrap();
        // Distinct mtimes for deterministic rotation ordering
        std::thread::sleep(std::time::Duration::from_millis(20));
    }
    let remaining = std::fs::read_dir(dir.path().join("backups")).unwrap().count();
    assert!(remaining <= 2, "expected rotation to cap backups, found {remaining}");
}

#[test]
fn test_default_ttl_applies_to_new_records() {
    let dir = TempDir::new().unwrap();
    let config = StoreConfig::new()
        .with_storage_path(dir.path().join("engine.db"))
        .with_pool_size(2)
        .with_default_ttl(0.5);
    let store = StateStore::open(config).unwrap();

    let mut record = StateRecord::with_id("fleeting", Vec::new());
    store.save(&mut record).unwrap();
    assert!(record.expires_at.is_some());
    assert!(store.load(&RecordId::new("fleeting")).unwrap().is_some());

    std::thread::sleep(std::time::Duration::from_millis(600));
    assert!(store.load(&RecordId::new("fleeting")).unwrap().is_none());
}

#[test]
fn test_health_check_reflects_store() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, 4);

    for i in 0..5 {
        let mut record = StateRecord::with_id(format!("r-{i}"), vec![0u8; 256]);
        store.save(&mut record).unwrap();
    }

    let health = store.health_check().unwrap();
    assert_eq!(health.status.as_str(), "healthy");
    assert_eq!(health.total_records, 5);
    assert_eq!(health.pool_size, 4);
    assert!(health.backing_store_size_bytes > 0);

    // A held stream shows up as an active connection
    let stream = store.stream(&Filter::new(), StreamConfig::default()).unwrap();
    let health = store.health_check().unwrap();
    assert_eq!(health.active_connections, 1);
    drop(stream);
}
