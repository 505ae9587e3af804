use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

use crate::engine::{Store, StoreConfig};
use crate::meta::DataType;

/// Installs a test-scoped `tracing` subscriber. Safe to call from every
/// test; only the first call in the process actually installs one.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A small binary store: N=8, B=64.
pub fn small_binary_config() -> StoreConfig {
    StoreConfig::new(8, 64, DataType::Binary)
}

/// A tiny store (N=4) sized to make eviction easy to trigger.
pub fn tiny_eviction_config() -> StoreConfig {
    StoreConfig::new(4, 64, DataType::Binary)
}

/// A JSON store.
pub fn json_config(num_blocks: u32, block_size: u32) -> StoreConfig {
    StoreConfig::new(num_blocks, block_size, DataType::Json)
}

/// A text store.
pub fn text_config(num_blocks: u32, block_size: u32) -> StoreConfig {
    StoreConfig::new(num_blocks, block_size, DataType::Text)
}

/// A schema store.
pub fn schema_config(num_blocks: u32, block_size: u32) -> StoreConfig {
    StoreConfig::new(num_blocks, block_size, DataType::Schema)
}

/// Creates a fresh store in a fresh temp directory, returning both so the
/// directory isn't dropped (and deleted) while the store is still live.
pub fn fresh_store(config: StoreConfig) -> (TempDir, Store) {
    init_tracing();
    let tmp = TempDir::new().expect("tempdir");
    let store = Store::create(tmp.path().join("store"), config).expect("create store");
    (tmp, store)
}
