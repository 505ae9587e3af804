use super::helpers::{fresh_store, tiny_eviction_config};

// Scenario 2: Create (N=4, B=64), Put(1..4) one byte each, Put(5, "e")
// triggers eviction; oldest_ts becomes 2, index count remains 4.
#[test]
fn scenario_put_past_capacity_evicts_oldest() {
    let (_tmp, store) = fresh_store(tiny_eviction_config());
    store.put_object(1, b"a").unwrap();
    store.put_object(2, b"b").unwrap();
    store.put_object(3, b"c").unwrap();
    store.put_object(4, b"d").unwrap();

    store.put_object(5, b"e").unwrap();

    let stats = store.stats().unwrap();
    assert_eq!(stats.active, 4);
    assert_eq!(stats.oldest_ts, 2);
    assert_eq!(stats.newest_ts, 5);

    let err = store.get_object_by_time(1, false).unwrap_err();
    assert!(matches!(err, crate::engine::StoreError::TimestampNotFound(1)));
    assert_eq!(store.get_object_by_time(5, false).unwrap(), b"e");
}

#[test]
fn eviction_preserves_block_conservation() {
    let (_tmp, store) = fresh_store(tiny_eviction_config());
    for ts in 1..=20i64 {
        store.put_object(ts, b"x").unwrap();
    }
    let stats = store.stats().unwrap();
    assert_eq!(stats.active, 4);
    assert_eq!(stats.oldest_ts, 17);
    assert_eq!(stats.newest_ts, 20);
}

#[test]
fn duplicate_timestamp_on_a_full_store_is_rejected_before_any_eviction() {
    let (_tmp, store) = fresh_store(tiny_eviction_config());
    for ts in 1..=4i64 {
        store.put_object(ts, b"x").unwrap();
    }

    let err = store.put_object(1, b"y").unwrap_err();
    assert!(matches!(err, crate::engine::StoreError::DuplicateTimestamp(1)));

    let stats = store.stats().unwrap();
    assert_eq!(stats.active, 4);
    assert_eq!(stats.oldest_ts, 1);
    assert_eq!(stats.newest_ts, 4);
    assert_eq!(store.get_object_by_time(1, false).unwrap(), b"x");
}

#[test]
fn eviction_needing_more_than_one_victim_frees_enough_room() {
    let (_tmp, store) = fresh_store(tiny_eviction_config());
    // Fill with 1-byte records.
    for ts in 1..=4i64 {
        store.put_object(ts, b"x").unwrap();
    }
    // A payload needing 2 blocks must evict twice.
    let capacity = crate::block::BlockFile::payload_capacity(64);
    let big = vec![b'y'; capacity + 1];
    store.put_object(5, &big).unwrap();

    let stats = store.stats().unwrap();
    assert_eq!(stats.active, 3);
    assert_eq!(stats.oldest_ts, 3);
    assert_eq!(stats.newest_ts, 5);
}
