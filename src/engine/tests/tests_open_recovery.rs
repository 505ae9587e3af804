use crate::block::BlockFile;
use crate::engine::{Store, StoreConfig};
use crate::meta::DataType;

use super::helpers::init_tracing;

#[test]
fn reopen_preserves_all_records() {
    init_tracing();
    let tmp = tempfile::TempDir::new().unwrap();
    let dir = tmp.path().join("store");

    let store = Store::create(&dir, StoreConfig::new(8, 64, DataType::Binary)).unwrap();
    store.put_object(1, b"a").unwrap();
    store.put_object(2, b"b").unwrap();
    store.close().unwrap();
    drop(store);

    let reopened = Store::open(&dir).unwrap();
    assert_eq!(reopened.get_object_by_time(1, false).unwrap(), b"a");
    assert_eq!(reopened.get_object_by_time(2, false).unwrap(), b"b");
    let stats = reopened.stats().unwrap();
    assert_eq!(stats.active, 2);
}

// Simulates a crash between writing a chain and recording it in the
// index: a block is left holding a primary header with no index entry
// pointing at it. Open must reclaim it to the free list rather than
// leaking it forever.
#[test]
fn open_reclaims_orphan_blocks_left_by_an_interrupted_put() {
    init_tracing();
    let tmp = tempfile::TempDir::new().unwrap();
    let dir = tmp.path().join("store");

    let store = Store::create(&dir, StoreConfig::new(4, 64, DataType::Binary)).unwrap();
    store.put_object(1, b"a").unwrap();
    store.put_object(2, b"b").unwrap();
    store.close().unwrap();
    drop(store);

    // Directly write an orphan chain into one of the two free blocks,
    // bypassing the index and meta updates a real put would also do.
    {
        let block_file = BlockFile::open(&dir.join("data.tsdb"), 4, 64).unwrap();
        block_file.write_chain(&[2], b"orphan", 999, 0).unwrap();
        block_file.sync().unwrap();
    }

    let reopened = Store::open(&dir).unwrap();

    // The orphan's timestamp was never indexed and must not be visible.
    let err = reopened.get_object_by_time(999, false).unwrap_err();
    assert!(matches!(err, crate::engine::StoreError::TimestampNotFound(999)));

    let stats = reopened.stats().unwrap();
    assert_eq!(stats.active, 2);

    // Both the reclaimed orphan block and the one genuinely-free block
    // must be usable: fill the store to capacity without any eviction.
    reopened.put_object(3, b"c").unwrap();
    reopened.put_object(4, b"d").unwrap();
    let stats = reopened.stats().unwrap();
    assert_eq!(stats.active, 4);
    assert_eq!(stats.oldest_ts, 1);

    // The pool is now genuinely full: one more put must evict.
    reopened.put_object(5, b"e").unwrap();
    let stats = reopened.stats().unwrap();
    assert_eq!(stats.active, 4);
    assert_eq!(stats.oldest_ts, 2);
}

#[test]
fn open_on_a_fresh_store_is_empty() {
    init_tracing();
    let tmp = tempfile::TempDir::new().unwrap();
    let dir = tmp.path().join("store");
    Store::create(&dir, StoreConfig::new(4, 64, DataType::Binary))
        .unwrap()
        .close()
        .unwrap();

    let store = Store::open(&dir).unwrap();
    let stats = store.stats().unwrap();
    assert_eq!(stats.active, 0);
    assert_eq!(stats.oldest_ts, 0);
    assert_eq!(stats.newest_ts, 0);
}
