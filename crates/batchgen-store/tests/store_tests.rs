use batchgen_core::{
    BreakerState, CircuitBreakerState, EntryId, EntryStatus, FailureCategory, FailureRecord, Queue, QueueEntry,
    FAILURE_RECORD_SCHEMA_VERSION,
};
use batchgen_store::{FailureLog, FileQueueStore, MemoryQueueStore, QueueStore, StoreError};
use tempfile::tempdir;

fn entry(id: &str) -> QueueEntry {
    QueueEntry::new(EntryId::parse(id).unwrap(), 2, 0)
}

#[test]
fn test_breaker_state_is_saved_with_entries() {
    let dir = tempdir().unwrap();
    let store = FileQueueStore::new(dir.path().join("priority-queue.json"));
    let mut loaded = store.load().unwrap();
    loaded.file.queue.push(entry("rubygems:rails")).unwrap();
    loaded.file.queue.breakers.set(
        "rubygems",
        CircuitBreakerState { state: BreakerState::Open, consecutive_failures: 3, opened_at_unix: Some(100) },
    );
    store.save(loaded.fingerprint.as_deref(), &mut loaded.file, 200).unwrap();

    let again = store.load().unwrap();
    assert_eq!(again.file.queue.breakers.state_of("rubygems"), BreakerState::Open);
    assert_eq!(again.file.queue.entries[0].id.as_str(), "rubygems:rails");
}

#[test]
fn test_unknown_schema_version_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("q.json");
    std::fs::write(&path, r#"{"schema_version":2,"updated_at":0,"entries":[]}"#).unwrap();
    let err = FileQueueStore::new(&path).load().unwrap_err();
    assert!(matches!(err, StoreError::UnsupportedSchema { found: 2, supported: 1 }));
}

#[test]
fn test_malformed_queue_file_is_an_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("q.json");
    std::fs::write(&path, "{ not json").unwrap();
    assert!(matches!(FileQueueStore::new(&path).load(), Err(StoreError::Parse { .. })));
}

#[test]
fn test_memory_store_matches_file_store_conflicts() {
    let store = MemoryQueueStore::with_queue(Queue::new(vec![entry("go:task")])).unwrap();
    let mut a = store.load().unwrap();
    let mut b = store.load().unwrap();
    a.file.queue.entries[0].status = EntryStatus::Skipped;
    store.save(a.fingerprint.as_deref(), &mut a.file, 1).unwrap();
    assert!(matches!(store.save(b.fingerprint.as_deref(), &mut b.file, 2), Err(StoreError::Conflict { .. })));
}

#[test]
fn test_failure_log_never_rewrites_lines() {
    let dir = tempdir().unwrap();
    let log = FailureLog::new(dir.path());
    let rec = |ts| FailureRecord {
        schema_version: FAILURE_RECORD_SCHEMA_VERSION,
        package_id: EntryId::parse("pypi:numpy").unwrap(),
        environment: "linux-x86_64".into(),
        category: FailureCategory::ValidationFailed,
        subcategory: None,
        blocked_by: vec![],
        message: "checksum mismatch".into(),
        timestamp_unix: ts,
    };
    log.append(&[rec(1)]).unwrap();
    let path = log.partition_path("pypi", "linux-x86_64").unwrap();
    let first = std::fs::read_to_string(&path).unwrap();
    log.append(&[rec(2)]).unwrap();
    let second = std::fs::read_to_string(&path).unwrap();
    assert!(second.starts_with(&first));
    assert_eq!(second.lines().count(), 2);
}
