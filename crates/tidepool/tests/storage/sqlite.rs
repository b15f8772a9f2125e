//! SqliteStorage tests — the LocalStorage contract against a real
//! (in-memory) database.

use pretty_assertions::assert_eq;

use tidepool::error::StorageError;
use tidepool::storage::{LocalStorage, SqliteStorage};
use tidepool::types::{DatasetMetadata, Record, PENDING_DELETE_SYNC_COUNT};

const ID: &str = "us-east-1:identity-a";
const DS: &str = "d1";

fn store() -> SqliteStorage {
    SqliteStorage::open_in_memory().unwrap()
}

fn record(key: &str, value: Option<&str>, sync_count: i64, modified: bool) -> Record {
    Record {
        key: key.to_string(),
        value: value.map(|v| v.to_string()),
        sync_count,
        last_modified_date: 1_000,
        last_modified_by: Some("device-1".to_string()),
        device_last_modified_date: 1_000,
        modified,
    }
}

// --- put_value / get_value ---

#[test]
fn put_and_get_value() {
    let s = store();
    s.put_value(ID, DS, "score", Some("100")).unwrap();
    assert_eq!(s.get_value(ID, DS, "score").unwrap().as_deref(), Some("100"));
    assert_eq!(s.get_value(ID, DS, "missing").unwrap(), None);
}

#[test]
fn put_value_marks_modified_and_preserves_sync_count() {
    let s = store();
    // Seed a clean, synced record.
    s.put_records(ID, DS, &[record("score", Some("100"), 7, false)])
        .unwrap();

    s.put_value(ID, DS, "score", Some("200")).unwrap();
    let r = s.get_record(ID, DS, "score").unwrap().unwrap();
    assert_eq!(r.value.as_deref(), Some("200"));
    assert_eq!(r.sync_count, 7);
    assert!(r.modified);
    assert!(r.device_last_modified_date > 1_000);
}

#[test]
fn writing_the_same_value_is_a_no_op() {
    let s = store();
    s.put_records(ID, DS, &[record("score", Some("100"), 7, false)])
        .unwrap();

    s.put_value(ID, DS, "score", Some("100")).unwrap();
    let r = s.get_record(ID, DS, "score").unwrap().unwrap();
    assert!(!r.modified, "unchanged value must not dirty the record");
    assert_eq!(r.device_last_modified_date, 1_000);
}

#[test]
fn tombstone_hides_value_but_keeps_record() {
    let s = store();
    s.put_records(ID, DS, &[record("score", Some("100"), 7, false)])
        .unwrap();

    s.put_value(ID, DS, "score", None).unwrap();
    assert_eq!(s.get_value(ID, DS, "score").unwrap(), None);
    let r = s.get_record(ID, DS, "score").unwrap().unwrap();
    assert!(r.is_deleted());
    assert!(r.modified);
    assert_eq!(r.sync_count, 7, "tombstones keep their version");
}

#[test]
fn removing_an_absent_key_stores_nothing() {
    let s = store();
    s.put_value(ID, DS, "never-stored", None).unwrap();
    assert_eq!(s.get_record(ID, DS, "never-stored").unwrap(), None);
}

// --- record sets ---

#[test]
fn modified_records_include_tombstones_only_when_dirty() {
    let s = store();
    s.put_records(
        ID,
        DS,
        &[
            record("clean", Some("a"), 1, false),
            record("dirty", Some("b"), 2, true),
            record("gone", None, 3, true),
            record("confirmed-gone", None, 4, false),
        ],
    )
    .unwrap();

    let mut modified: Vec<String> = s
        .get_modified_records(ID, DS)
        .unwrap()
        .into_iter()
        .map(|r| r.key)
        .collect();
    modified.sort();
    assert_eq!(modified, vec!["dirty".to_string(), "gone".to_string()]);
    assert_eq!(s.get_records(ID, DS).unwrap().len(), 4);
}

#[test]
fn put_records_stores_flags_verbatim() {
    let s = store();
    s.put_records(
        ID,
        DS,
        &[
            record("pulled", Some("remote"), 9, false),
            record("kept-local", Some("mine"), 9, true),
        ],
    )
    .unwrap();

    assert!(!s.get_record(ID, DS, "pulled").unwrap().unwrap().modified);
    assert!(s.get_record(ID, DS, "kept-local").unwrap().unwrap().modified);
}

// --- conditionally_put_records ---

#[test]
fn push_confirmation_cleans_unraced_rows() {
    let s = store();
    let pushed = record("score", Some("100"), 3, true);
    s.put_records(ID, DS, &[pushed.clone()]).unwrap();

    let confirmed = record("score", Some("100"), 4, false);
    s.conditionally_put_records(ID, DS, &[confirmed], &[pushed])
        .unwrap();

    let r = s.get_record(ID, DS, "score").unwrap().unwrap();
    assert_eq!(r.sync_count, 4);
    assert!(!r.modified);
    assert_eq!(r.value.as_deref(), Some("100"));
}

#[test]
fn push_confirmation_skips_rows_mutated_in_flight() {
    let s = store();
    let pushed = record("score", Some("100"), 3, true);
    s.put_records(ID, DS, &[pushed.clone()]).unwrap();
    // A concurrent local write lands while the push is on the wire.
    s.put_value(ID, DS, "score", Some("999")).unwrap();

    let confirmed = record("score", Some("100"), 4, false);
    s.conditionally_put_records(ID, DS, &[confirmed], &[pushed])
        .unwrap();

    let r = s.get_record(ID, DS, "score").unwrap().unwrap();
    assert_eq!(r.value.as_deref(), Some("999"), "raced write must survive");
    assert_eq!(r.sync_count, 3, "stale confirmation must not apply");
    assert!(r.modified, "raced row stays dirty for the next push");
}

#[test]
fn push_confirmation_ignores_unknown_keys() {
    let s = store();
    let pushed = record("a", Some("1"), 0, true);
    s.put_records(ID, DS, &[pushed.clone()]).unwrap();

    // Server confirms a key we never pushed this round.
    let stray = record("b", Some("2"), 5, false);
    s.conditionally_put_records(ID, DS, &[stray], &[pushed])
        .unwrap();
    assert_eq!(s.get_record(ID, DS, "b").unwrap(), None);
}

// --- last_sync_count / dataset lifecycle ---

#[test]
fn last_sync_count_defaults_to_zero() {
    let s = store();
    assert_eq!(s.get_last_sync_count(ID, "unknown").unwrap(), 0);
}

#[test]
fn last_sync_count_round_trip() {
    let s = store();
    s.create_dataset(ID, DS).unwrap();
    s.update_last_sync_count(ID, DS, 42).unwrap();
    assert_eq!(s.get_last_sync_count(ID, DS).unwrap(), 42);
}

#[test]
fn delete_marks_pending_and_keeps_records() {
    let s = store();
    s.put_records(ID, DS, &[record("score", Some("100"), 3, true)])
        .unwrap();

    s.delete_dataset(ID, DS).unwrap();
    assert_eq!(
        s.get_last_sync_count(ID, DS).unwrap(),
        PENDING_DELETE_SYNC_COUNT
    );
    assert_eq!(s.get_records(ID, DS).unwrap().len(), 1);
}

#[test]
fn delete_unknown_dataset_errors() {
    let s = store();
    let err = s.delete_dataset(ID, "nope").unwrap_err();
    assert!(matches!(err, StorageError::DatasetNotFound { .. }));
}

#[test]
fn purge_removes_records_and_metadata() {
    let s = store();
    s.put_records(ID, DS, &[record("score", Some("100"), 3, true)])
        .unwrap();

    s.purge_dataset(ID, DS).unwrap();
    assert_eq!(s.get_records(ID, DS).unwrap().len(), 0);
    assert_eq!(s.get_dataset_metadata(ID, DS).unwrap(), None);
}

// --- metadata ---

#[test]
fn metadata_aggregates_count_live_records_only() {
    let s = store();
    s.put_records(
        ID,
        DS,
        &[
            record("ab", Some("cdé"), 1, false), // 2 + 4 bytes
            record("gone", None, 2, false),
        ],
    )
    .unwrap();

    let m = s.get_dataset_metadata(ID, DS).unwrap().unwrap();
    assert_eq!(m.record_count, 1);
    assert_eq!(m.storage_size_bytes, 6);
}

#[test]
fn metadata_refresh_preserves_last_sync_count() {
    let s = store();
    s.create_dataset(ID, DS).unwrap();
    s.update_last_sync_count(ID, DS, 9).unwrap();

    let remote = DatasetMetadata {
        dataset_name: DS.to_string(),
        creation_date: 111,
        last_modified_date: 222,
        last_modified_by: Some("other-device".to_string()),
        storage_size_bytes: 0,
        record_count: 0,
    };
    s.update_dataset_metadata(ID, &[remote]).unwrap();

    let m = s.get_dataset_metadata(ID, DS).unwrap().unwrap();
    assert_eq!(m.creation_date, 111);
    assert_eq!(m.last_modified_by.as_deref(), Some("other-device"));
    assert_eq!(s.get_last_sync_count(ID, DS).unwrap(), 9);
}

#[test]
fn get_datasets_lists_only_the_identity() {
    let s = store();
    s.create_dataset(ID, "d1").unwrap();
    s.create_dataset(ID, "d2").unwrap();
    s.create_dataset("other-identity", "d3").unwrap();

    let names: Vec<String> = s
        .get_datasets(ID)
        .unwrap()
        .into_iter()
        .map(|m| m.dataset_name)
        .collect();
    assert_eq!(names, vec!["d1".to_string(), "d2".to_string()]);
}

// --- identity change ---

#[test]
fn identity_change_moves_datasets() {
    let s = store();
    s.put_records(ID, DS, &[record("score", Some("100"), 3, true)])
        .unwrap();

    s.change_identity_id(ID, "us-east-1:identity-b").unwrap();
    assert_eq!(s.get_records(ID, DS).unwrap().len(), 0);
    let moved = s
        .get_record("us-east-1:identity-b", DS, "score")
        .unwrap()
        .unwrap();
    assert_eq!(moved.value.as_deref(), Some("100"));
}

#[test]
fn identity_change_renames_colliding_datasets() {
    let s = store();
    let new_id = "us-east-1:identity-b";
    s.put_records(ID, DS, &[record("old", Some("1"), 0, true)])
        .unwrap();
    s.put_records(new_id, DS, &[record("new", Some("2"), 0, true)])
        .unwrap();

    s.change_identity_id(ID, new_id).unwrap();

    let renamed = format!("{DS}.{ID}");
    assert!(s
        .get_record(new_id, &renamed, "old")
        .unwrap()
        .is_some());
    assert!(s.get_record(new_id, DS, "new").unwrap().is_some());
    let names: Vec<String> = s
        .get_datasets(new_id)
        .unwrap()
        .into_iter()
        .map(|m| m.dataset_name)
        .collect();
    assert_eq!(names, vec![DS.to_string(), renamed]);
}

// --- wipe / meta ---

#[test]
fn wipe_clears_all_identities() {
    let s = store();
    s.put_records(ID, DS, &[record("a", Some("1"), 0, true)])
        .unwrap();
    s.put_records("other", DS, &[record("b", Some("2"), 0, true)])
        .unwrap();
    s.set_meta("device_id:x", "device-1").unwrap();

    s.wipe().unwrap();
    assert_eq!(s.get_records(ID, DS).unwrap().len(), 0);
    assert_eq!(s.get_records("other", DS).unwrap().len(), 0);
    assert_eq!(s.get_meta("device_id:x").unwrap(), None);
}

#[test]
fn meta_round_trip() {
    let s = store();
    assert_eq!(s.get_meta("k").unwrap(), None);
    s.set_meta("k", "v1").unwrap();
    s.set_meta("k", "v2").unwrap();
    assert_eq!(s.get_meta("k").unwrap().as_deref(), Some("v2"));
}

// --- persistence ---

#[test]
fn file_backed_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sync.db");
    let path = path.to_str().unwrap();

    {
        let s = SqliteStorage::open(path).unwrap();
        s.put_records(ID, DS, &[record("score", Some("100"), 3, false)])
            .unwrap();
        s.update_last_sync_count(ID, DS, 3).unwrap();
    }

    let s = SqliteStorage::open(path).unwrap();
    let r = s.get_record(ID, DS, "score").unwrap().unwrap();
    assert_eq!(r.value.as_deref(), Some("100"));
    assert_eq!(s.get_last_sync_count(ID, DS).unwrap(), 3);
}
