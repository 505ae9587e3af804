use crate::engine::StoreError;

use super::helpers::{fresh_store, small_binary_config};

#[test]
fn round_trip_returns_exact_bytes() {
    let (_tmp, store) = fresh_store(small_binary_config());
    let payload = b"hello tsstore";
    store.put_object(1_000, payload).unwrap();

    let got = store.get_object_by_time(1_000, false).unwrap();
    assert_eq!(got, payload);
}

#[test]
fn missing_timestamp_errors() {
    let (_tmp, store) = fresh_store(small_binary_config());
    let err = store.get_object_by_time(42, false).unwrap_err();
    assert!(matches!(err, StoreError::TimestampNotFound(42)));
}

#[test]
fn zero_timestamp_is_rejected() {
    let (_tmp, store) = fresh_store(small_binary_config());
    let err = store.put_object(0, b"x").unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
}

#[test]
fn empty_payload_is_rejected() {
    let (_tmp, store) = fresh_store(small_binary_config());
    let err = store.put_object(1, b"").unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
}

#[test]
fn duplicate_timestamp_is_rejected() {
    let (_tmp, store) = fresh_store(small_binary_config());
    store.put_object(1_000, b"a").unwrap();
    let err = store.put_object(1_000, b"b").unwrap_err();
    assert!(matches!(err, StoreError::DuplicateTimestamp(1_000)));

    // The failed attempt must not have mutated the store.
    assert_eq!(store.get_object_by_time(1_000, false).unwrap(), b"a");
}

#[test]
fn out_of_order_put_inserts_via_binary_search() {
    let (_tmp, store) = fresh_store(small_binary_config());
    store.put_object(2_000, b"b").unwrap();
    store.put_object(1_000, b"a").unwrap();
    store.put_object(3_000, b"c").unwrap();

    assert_eq!(store.get_object_by_time(1_000, false).unwrap(), b"a");
    assert_eq!(store.get_object_by_time(2_000, false).unwrap(), b"b");
    assert_eq!(store.get_object_by_time(3_000, false).unwrap(), b"c");
}

#[test]
fn delete_removes_the_record() {
    let (_tmp, store) = fresh_store(small_binary_config());
    store.put_object(1_000, b"a").unwrap();
    store.delete_object_by_time(1_000).unwrap();

    let err = store.get_object_by_time(1_000, false).unwrap_err();
    assert!(matches!(err, StoreError::TimestampNotFound(1_000)));
}

#[test]
fn delete_of_sole_record_zeroes_oldest_and_newest() {
    let (_tmp, store) = fresh_store(small_binary_config());
    store.put_object(1_000, b"a").unwrap();
    store.delete_object_by_time(1_000).unwrap();

    let stats = store.stats().unwrap();
    assert_eq!(stats.active, 0);
    assert_eq!(stats.oldest_ts, 0);
    assert_eq!(stats.newest_ts, 0);
}

// Scenario 1: Create (N=8, B=64), Put(1000, "a"), Put(2000, "b"),
// GetNewestObjects(2) returns [2000, 1000] with payloads "b" then "a".
#[test]
fn scenario_newest_objects_in_descending_order() {
    let (_tmp, store) = fresh_store(small_binary_config());
    store.put_object(1_000, b"a").unwrap();
    store.put_object(2_000, b"b").unwrap();

    let handles = store.get_newest_objects(2).unwrap();
    assert_eq!(handles.len(), 2);
    assert_eq!(handles[0].ts, 2_000);
    assert_eq!(handles[1].ts, 1_000);

    assert_eq!(store.get_object(&handles[0]).unwrap(), b"b");
    assert_eq!(store.get_object(&handles[1]).unwrap(), b"a");
}
