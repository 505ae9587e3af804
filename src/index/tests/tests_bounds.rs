use crate::index::IndexFile;
use tempfile::TempDir;

fn populated(tss: &[i64]) -> (TempDir, IndexFile, u32) {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("index.tsdb");
    let idx = IndexFile::create(&path, 32).unwrap();
    let mut active = 0;
    for &ts in tss {
        active = idx.insert(active, ts, ts as u32).unwrap().0;
    }
    (tmp, idx, active)
}

#[test]
fn find_exact_hit_and_miss() {
    let (_tmp, idx, active) = populated(&[10, 20, 30]);
    assert_eq!(idx.find_exact(active, 20).unwrap(), Some(1));
    assert_eq!(idx.find_exact(active, 25).unwrap(), None);
}

#[test]
fn find_range_unbounded_both_sides_returns_everything() {
    let (_tmp, idx, active) = populated(&[10, 20, 30]);
    let (lo, hi) = idx.find_range(active, 0, 0).unwrap();
    assert_eq!((lo, hi), (0, 3));
}

#[test]
fn find_range_bounded() {
    let (_tmp, idx, active) = populated(&[10, 20, 30, 40, 50]);
    let (lo, hi) = idx.find_range(active, 20, 40).unwrap();
    assert_eq!((lo, hi), (1, 4));
}

#[test]
fn find_range_unbounded_below() {
    let (_tmp, idx, active) = populated(&[10, 20, 30]);
    let (lo, hi) = idx.find_range(active, 0, 20).unwrap();
    assert_eq!((lo, hi), (0, 2));
}

#[test]
fn find_range_unbounded_above() {
    let (_tmp, idx, active) = populated(&[10, 20, 30]);
    let (lo, hi) = idx.find_range(active, 20, 0).unwrap();
    assert_eq!((lo, hi), (1, 3));
}

#[test]
fn find_oldest_and_newest() {
    let (_tmp, idx, active) = populated(&[10, 20, 30, 40]);
    let oldest = idx.find_oldest(active, 2).unwrap();
    assert_eq!(oldest.iter().map(|e| e.ts).collect::<Vec<_>>(), vec![10, 20]);

    let newest = idx.find_newest(active, 2).unwrap();
    assert_eq!(newest.iter().map(|e| e.ts).collect::<Vec<_>>(), vec![40, 30]);
}

#[test]
fn find_oldest_k_greater_than_active_is_capped() {
    let (_tmp, idx, active) = populated(&[10, 20]);
    let oldest = idx.find_oldest(active, 10).unwrap();
    assert_eq!(oldest.len(), 2);
}

#[test]
fn empty_index_returns_empty_ranges() {
    let tmp = TempDir::new().unwrap();
    let idx = IndexFile::create(&tmp.path().join("index.tsdb"), 8).unwrap();
    assert_eq!(idx.find_range(0, 0, 0).unwrap(), (0, 0));
    assert_eq!(idx.find_exact(0, 100).unwrap(), None);
    assert!(idx.find_oldest(0, 5).unwrap().is_empty());
}
