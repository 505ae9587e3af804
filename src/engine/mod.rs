//! # Store Engine
//!
//! This module implements a **synchronous**, pre-allocated, fixed-capacity
//! time-series store: append-heavy ingestion, time-keyed random reads,
//! range scans, and circular (oldest-first) eviction once the block pool
//! is exhausted.
//!
//! ## Design Overview
//!
//! A store is a directory holding three files, each owned by its own
//! module:
//!
//! 1. [`crate::block`] — the fixed-size block pool (`data.tsdb`).
//! 2. [`crate::index`] — the sorted timestamp index (`index.tsdb`).
//! 3. [`crate::meta`] — the 64-byte metadata header (`meta.tsdb`).
//!
//! [`crate::freelist`] tracks available blocks in memory, rebuilt at
//! [`Store::open`] by reconciling block headers against the index.
//! [`crate::schema`] is consulted only for stores of `data_type = Schema`.
//!
//! ## Concurrency Model
//!
//! All mutable state is protected by a single `Arc<RwLock<StoreInner>>`.
//! Reads acquire a **read lock**; every mutating operation (`put_object`,
//! `delete_object_by_time`, eviction, `set_schema`) acquires a **write
//! lock** and holds it across the whole multi-step operation so that a
//! concurrent reader never observes a partially-applied put or delete.
//!
//! ## Guarantees
//!
//! - **Durability:** `meta.tsdb` is fsynced on every mutation by default
//!   (`StoreConfig::fsync_meta`); `data.tsdb` is not, by default
//!   (`StoreConfig::fsync_data`).
//! - **Crash recovery:** on [`Store::open`], blocks whose state is not
//!   free but are unreferenced by any index entry are reclaimed to the
//!   free list (orphaned by a crash between writing the chain and
//!   updating the index/meta).
//! - **Eviction:** the only capacity policy — when there is no room for
//!   an incoming object, the oldest record is evicted until there is.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::block::{BlockFile, BlockFileError, BlockState};
use crate::freelist::FreeList;
use crate::index::{IndexFile, IndexFileError};
use crate::meta::{DataType, Meta, MetaError};
use crate::schema::{Field, Schema, SchemaError, SchemaSet};

#[cfg(test)]
mod tests;

const META_FILE: &str = "meta.tsdb";
const DATA_FILE: &str = "data.tsdb";
const INDEX_FILE: &str = "index.tsdb";
const SCHEMA_FILE: &str = "schema.json";

// ------------------------------------------------------------------------------------------------
// Errors
// ------------------------------------------------------------------------------------------------

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Error originating from the block file.
    #[error("block file error: {0}")]
    Block(#[from] BlockFileError),

    /// Error originating from the index file.
    #[error("index file error: {0}")]
    Index(#[from] IndexFileError),

    /// Error originating from the metadata header.
    #[error("meta error: {0}")]
    Meta(#[from] MetaError),

    /// Error originating from the schema set.
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Bad argument: invalid timestamp, empty payload, wrong content type,
    /// or a non-power-of-two block size at creation.
    #[error("validation error: {0}")]
    Validation(String),

    /// No record exists at the requested timestamp.
    #[error("no record at timestamp {0}")]
    TimestampNotFound(i64),

    /// The store holds no records.
    #[error("store is empty")]
    EmptyStore,

    /// `put_object` was asked to insert a timestamp already present.
    #[error("duplicate timestamp {0}")]
    DuplicateTimestamp(i64),

    /// `create` was called against a directory that already holds a store.
    #[error("store already exists at {0}")]
    StoreAlreadyExists(PathBuf),

    /// The free list could not satisfy an allocation even after evicting
    /// every record (requested more blocks than the store has).
    #[error("store has insufficient capacity for {requested} blocks (N={num_blocks})")]
    Capacity {
        /// Blocks requested.
        requested: usize,
        /// Store's total block count.
        num_blocks: u32,
    },

    /// The store detected an on-disk invariant violation and is now
    /// refusing further operations until closed and reopened.
    #[error("store is corrupted and faulted: {0}")]
    Corruption(String),

    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation attempted on a store that already faulted, or whose lock
    /// was poisoned by a panicking thread.
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// StoreConfig
// ------------------------------------------------------------------------------------------------

/// Creation-time and behavioral configuration for a [`Store`].
pub struct StoreConfig {
    /// Fixed number of blocks (`N`). Immutable after creation.
    pub num_blocks: u32,
    /// Fixed block size in bytes (`B`), must be a power of two `>= 64`.
    pub data_block_size: u32,
    /// Payload kind for this store. Immutable after creation.
    pub data_type: DataType,
    /// Fsync `meta.tsdb` on every mutating operation. Default `true`.
    pub fsync_meta: bool,
    /// Fsync `data.tsdb` on every mutating operation. Default `false`.
    pub fsync_data: bool,
    /// Reject unknown keys in `Compact` rather than passing them through.
    /// Default `false`.
    pub reject_unknown_fields: bool,
}

impl StoreConfig {
    /// A config with the documented defaults for `fsync_meta`,
    /// `fsync_data`, and `reject_unknown_fields`.
    pub fn new(num_blocks: u32, data_block_size: u32, data_type: DataType) -> Self {
        StoreConfig {
            num_blocks,
            data_block_size,
            data_type,
            fsync_meta: true,
            fsync_data: false,
            reject_unknown_fields: false,
        }
    }

    fn validate(&self) -> Result<(), StoreError> {
        if self.num_blocks == 0 {
            return Err(StoreError::Validation("num_blocks must be > 0".into()));
        }
        if self.data_block_size < 64 || !self.data_block_size.is_power_of_two() {
            return Err(StoreError::Validation(format!(
                "data_block_size must be a power of two >= 64, got {}",
                self.data_block_size
            )));
        }
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// ObjectHandle / StoreStats
// ------------------------------------------------------------------------------------------------

/// A lightweight reference to a stored object, returned by writes and
/// range queries without pulling the payload off disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectHandle {
    /// Record timestamp, nanoseconds.
    pub ts: i64,
    /// Primary block number.
    pub primary: u32,
    /// Object length in bytes.
    pub size: u32,
    /// Number of blocks in the object's chain.
    pub block_count: u32,
}

/// Snapshot of store statistics returned by [`Store::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    /// Payload kind.
    pub data_type: DataType,
    /// Fixed block count (`N`).
    pub num_blocks: u32,
    /// Fixed block size (`B`).
    pub data_block_size: u32,
    /// Currently active (occupied) blocks.
    pub active: u32,
    /// Oldest live record's timestamp, or 0 if empty.
    pub oldest_ts: i64,
    /// Newest live record's timestamp, or 0 if empty.
    pub newest_ts: i64,
}

// ------------------------------------------------------------------------------------------------
// StoreInner
// ------------------------------------------------------------------------------------------------

struct StoreInner {
    block_file: BlockFile,
    index_file: IndexFile,
    meta: Meta,
    free_list: FreeList,
    schema_set: SchemaSet,
    dir: PathBuf,
    config: StoreConfig,
    faulted: Option<String>,
}

impl StoreInner {
    fn check_faulted(&self) -> Result<(), StoreError> {
        match &self.faulted {
            Some(reason) => Err(StoreError::Corruption(reason.clone())),
            None => Ok(()),
        }
    }

    fn fault(&mut self, reason: impl Into<String>) -> StoreError {
        let reason = reason.into();
        tracing::error!(%reason, "store faulted");
        self.faulted = Some(reason.clone());
        StoreError::Corruption(reason)
    }

    fn flush_meta(&self) -> Result<(), StoreError> {
        let path = self.dir.join(META_FILE);
        Meta::write_atomic(&path, &self.meta, self.config.fsync_meta)?;
        Ok(())
    }

    fn payload_capacity(&self) -> usize {
        BlockFile::payload_capacity(self.config.data_block_size)
    }

    /// Evicts the record at index slot 0, releasing its blocks.
    fn evict_oldest(&mut self) -> Result<(), StoreError> {
        if self.meta.active == 0 {
            return Err(StoreError::EmptyStore);
        }
        let entries = self.index_file.read_all(self.meta.active)?;
        let victim = entries[0];

        let chain = self.collect_chain_blocks(victim.primary)?;
        for block in &chain {
            self.block_file.free_block(*block)?;
        }
        self.free_list.release_all(chain.iter().copied());

        let new_active = self.index_file.delete(self.meta.active, 0)?;
        self.meta.active = new_active;
        self.meta.index_count = new_active;
        self.update_oldest_newest(new_active)?;
        self.flush_meta()?;

        info!(ts = victim.ts, primary = victim.primary, "evicted oldest record");
        Ok(())
    }

    /// Walks a chain purely by block number (no payload read) to collect
    /// every block it occupies.
    fn collect_chain_blocks(&self, primary: u32) -> Result<Vec<u32>, StoreError> {
        let header = self.block_file.read_header(primary)?;
        if header.state != BlockState::Primary {
            return Err(StoreError::Corruption(format!(
                "block {primary} referenced by index is not primary"
            )));
        }
        let capacity = self.payload_capacity();
        let max_hops = (header.total_size as usize).div_ceil(capacity.max(1)).max(1);

        let mut blocks = vec![primary];
        let mut current = header;
        let mut hops = 0usize;
        while current.next_block != crate::block::TERMINATOR {
            hops += 1;
            if hops > max_hops {
                return Err(StoreError::Corruption(format!(
                    "chain at primary {primary} exceeded expected {max_hops} hops"
                )));
            }
            blocks.push(current.next_block);
            current = self.block_file.read_header(current.next_block)?;
        }
        Ok(blocks)
    }

    fn update_oldest_newest(&mut self, active: u32) -> Result<(), StoreError> {
        if active == 0 {
            self.meta.oldest_ts = 0;
            self.meta.newest_ts = 0;
            return Ok(());
        }
        let oldest = self.index_file.read_all(1)?;
        self.meta.oldest_ts = oldest[0].ts;
        let newest = self.index_file.find_newest(active, 1)?;
        self.meta.newest_ts = newest[0].ts;
        Ok(())
    }

    fn validate_content_type(&self, payload: &[u8]) -> Result<(), StoreError> {
        match self.config.data_type {
            DataType::Binary => Ok(()),
            DataType::Text => {
                std::str::from_utf8(payload)
                    .map_err(|e| StoreError::Validation(format!("payload is not valid UTF-8: {e}")))?;
                Ok(())
            }
            DataType::Json | DataType::Schema => {
                serde_json::from_slice::<serde_json::Value>(payload).map_err(|e| {
                    StoreError::Validation(format!("payload is not valid JSON: {e}"))
                })?;
                Ok(())
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Store
// ------------------------------------------------------------------------------------------------

/// A handle to an open store.
///
/// Cheap to clone — clones share the same underlying lock and files.
pub struct Store {
    inner: Arc<RwLock<StoreInner>>,
}

impl Clone for Store {
    fn clone(&self) -> Self {
        Store {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Store {
    /// Creates a new store at `dir`, which must not already exist or must
    /// be empty. Pre-allocates `data.tsdb`, `index.tsdb`, and `meta.tsdb`.
    pub fn create(dir: impl AsRef<Path>, config: StoreConfig) -> Result<Self, StoreError> {
        config.validate()?;
        let dir = dir.as_ref().to_path_buf();

        if dir.join(META_FILE).exists() {
            return Err(StoreError::StoreAlreadyExists(dir));
        }
        fs::create_dir_all(&dir)?;

        let block_file = BlockFile::create(&dir.join(DATA_FILE), config.num_blocks, config.data_block_size)?;
        let index_file = IndexFile::create(&dir.join(INDEX_FILE), config.num_blocks)?;
        let meta = Meta::new_empty(config.num_blocks, config.data_block_size, config.data_type);
        Meta::create(&dir.join(META_FILE), &meta)?;

        let free_list = FreeList::from_free_blocks(0..config.num_blocks);

        info!(?dir, num_blocks = config.num_blocks, block_size = config.data_block_size, "created store");

        Ok(Store {
            inner: Arc::new(RwLock::new(StoreInner {
                block_file,
                index_file,
                meta,
                free_list,
                schema_set: SchemaSet::empty(),
                dir,
                config,
                faulted: None,
            })),
        })
    }

    /// Opens an existing store at `dir`.
    ///
    /// Reconciles the on-disk free list: any block whose state is not
    /// free but is unreferenced by any index entry (left over from a
    /// crash between writing a chain and updating the index/meta) is
    /// reclaimed back to the free list.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        let meta = Meta::load(&dir.join(META_FILE))?;
        let block_file = BlockFile::open(&dir.join(DATA_FILE), meta.num_blocks, meta.block_size)?;
        let index_file = IndexFile::open(&dir.join(INDEX_FILE), meta.num_blocks)?;
        let schema_set = SchemaSet::load(&dir.join(SCHEMA_FILE))?;

        let entries = index_file.read_all(meta.active)?;
        let mut referenced = std::collections::HashSet::new();
        for entry in &entries {
            let header = block_file.read_header(entry.primary)?;
            if header.state != BlockState::Primary || header.timestamp != entry.ts {
                return Err(StoreError::Corruption(format!(
                    "index entry at ts={} points at block {} which is not a matching primary",
                    entry.ts, entry.primary
                )));
            }
            referenced.insert(entry.primary);
            let capacity = BlockFile::payload_capacity(meta.block_size);
            let max_hops = (header.total_size as usize).div_ceil(capacity.max(1)).max(1);
            let mut current = header;
            let mut hops = 0usize;
            while current.next_block != crate::block::TERMINATOR {
                hops += 1;
                if hops > max_hops {
                    return Err(StoreError::Corruption(format!(
                        "chain at primary {} exceeded expected {max_hops} hops during open scan",
                        entry.primary
                    )));
                }
                referenced.insert(current.next_block);
                current = block_file.read_header(current.next_block)?;
            }
        }

        let mut free_blocks = Vec::new();
        let mut reclaimed = 0u32;
        for block_num in 0..meta.num_blocks {
            if referenced.contains(&block_num) {
                continue;
            }
            let header = block_file.read_header(block_num)?;
            if header.state == BlockState::Free {
                free_blocks.push(block_num);
            } else {
                block_file.free_block(block_num)?;
                free_blocks.push(block_num);
                reclaimed += 1;
            }
        }
        if reclaimed > 0 {
            warn!(reclaimed, "reclaimed orphan blocks unreferenced by the index at open");
        }

        let data_type = meta.data_type;
        let config = StoreConfig::new(meta.num_blocks, meta.block_size, data_type);

        info!(?dir, active = meta.active, "opened store");

        Ok(Store {
            inner: Arc::new(RwLock::new(StoreInner {
                block_file,
                index_file,
                meta,
                free_list: FreeList::from_free_blocks(free_blocks),
                schema_set,
                dir,
                config,
                faulted: None,
            })),
        })
    }

    /// Flushes and fsyncs every file. Does not remove the store.
    pub fn close(&self) -> Result<(), StoreError> {
        let inner = self.read_inner()?;
        inner.block_file.sync().map_err(StoreError::from).ok();
        inner.index_file.sync().map_err(StoreError::from).ok();
        let dir_file = fs::File::open(&inner.dir)?;
        dir_file.sync_all()?;
        debug!(dir = ?inner.dir, "closed store");
        Ok(())
    }

    /// Removes the store's directory entirely. Consumes the handle.
    pub fn delete(self) -> Result<(), StoreError> {
        let dir = {
            let inner = self.read_inner()?;
            inner.dir.clone()
        };
        fs::remove_dir_all(&dir)?;
        info!(?dir, "deleted store");
        Ok(())
    }

    fn read_inner(&self) -> Result<std::sync::RwLockReadGuard<'_, StoreInner>, StoreError> {
        self.inner
            .read()
            .map_err(|_| StoreError::Internal("RwLock poisoned".into()))
    }

    fn write_inner(&self) -> Result<std::sync::RwLockWriteGuard<'_, StoreInner>, StoreError> {
        self.inner
            .write()
            .map_err(|_| StoreError::Internal("RwLock poisoned".into()))
    }

    /// Returns a snapshot of store statistics.
    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let inner = self.read_inner()?;
        inner.check_faulted()?;
        Ok(StoreStats {
            data_type: inner.meta.data_type,
            num_blocks: inner.meta.num_blocks,
            data_block_size: inner.meta.block_size,
            active: inner.meta.active,
            oldest_ts: inner.meta.oldest_ts,
            newest_ts: inner.meta.newest_ts,
        })
    }

    /// Inserts a new object at `ts`. `payload` is stored as-is, except
    /// for `data_type = Schema` stores: if it parses as an expanded
    /// `{name: value}` JSON object it is compacted first via the current
    /// schema.
    pub fn put_object(&self, ts: i64, payload: &[u8]) -> Result<ObjectHandle, StoreError> {
        if ts <= 0 {
            return Err(StoreError::Validation("timestamp must be > 0".into()));
        }
        if payload.is_empty() {
            return Err(StoreError::Validation("payload must be non-empty".into()));
        }

        let mut inner = self.write_inner()?;
        inner.check_faulted()?;
        inner.validate_content_type(payload)?;

        let (stored, schema_version) = if inner.config.data_type == DataType::Schema
            && inner.schema_set.current().is_some()
        {
            let compacted = inner
                .schema_set
                .compact(payload, inner.config.reject_unknown_fields)?;
            (compacted, inner.schema_set.current_version())
        } else {
            (payload.to_vec(), 0)
        };

        if inner.index_file.find_exact(inner.meta.active, ts)?.is_some() {
            return Err(StoreError::DuplicateTimestamp(ts));
        }

        let capacity = inner.payload_capacity();
        let k = stored.len().div_ceil(capacity).max(1);

        if k > inner.meta.num_blocks as usize {
            return Err(StoreError::Capacity {
                requested: k,
                num_blocks: inner.meta.num_blocks,
            });
        }

        while inner.free_list.size() < k {
            inner.evict_oldest()?;
        }

        let blocks = inner
            .free_list
            .allocate_n(k)
            .ok_or_else(|| StoreError::Internal("allocate_n failed after eviction loop".into()))?;

        if let Err(e) = inner.block_file.write_chain(&blocks, &stored, ts, schema_version) {
            inner.free_list.release_all(blocks.iter().copied());
            return Err(e.into());
        }

        let insert_result = inner.index_file.insert(inner.meta.active, ts, blocks[0]);
        let (new_active, _slot) = match insert_result {
            Ok(v) => v,
            Err(IndexFileError::DuplicateTimestamp(ts)) => {
                for block in &blocks {
                    inner.block_file.free_block(*block)?;
                }
                inner.free_list.release_all(blocks.iter().copied());
                return Err(StoreError::DuplicateTimestamp(ts));
            }
            Err(e) => return Err(e.into()),
        };

        inner.meta.active = new_active;
        inner.meta.index_count = new_active;
        if ts < inner.meta.oldest_ts || inner.meta.oldest_ts == 0 {
            inner.meta.oldest_ts = ts;
        }
        if ts > inner.meta.newest_ts {
            inner.meta.newest_ts = ts;
        }
        inner.flush_meta()?;
        if inner.config.fsync_data {
            inner.block_file.sync()?;
        }

        debug!(ts, primary = blocks[0], block_count = k, "put_object complete");
        Ok(ObjectHandle {
            ts,
            primary: blocks[0],
            size: stored.len() as u32,
            block_count: k as u32,
        })
    }

    /// Reads the object stored at exactly `ts`. When `expand` is true and
    /// the store has a schema, the payload is expanded back to
    /// `{name: value}` JSON using the schema version recorded at write
    /// time.
    pub fn get_object_by_time(&self, ts: i64, expand: bool) -> Result<Vec<u8>, StoreError> {
        let inner = self.read_inner()?;
        inner.check_faulted()?;

        let slot = inner
            .index_file
            .find_exact(inner.meta.active, ts)?
            .ok_or(StoreError::TimestampNotFound(ts))?;
        let entries = inner.index_file.read_all(inner.meta.active)?;
        let primary = entries[slot as usize].primary;

        let (payload, _ts, schema_version) = inner.block_file.read_chain(primary)?;
        if expand {
            Ok(inner.schema_set.expand(&payload, schema_version)?)
        } else {
            Ok(payload)
        }
    }

    /// Reads the object referenced by a previously-returned handle.
    pub fn get_object(&self, handle: &ObjectHandle) -> Result<Vec<u8>, StoreError> {
        let inner = self.read_inner()?;
        inner.check_faulted()?;
        let (payload, _, _) = inner.block_file.read_chain(handle.primary)?;
        Ok(payload)
    }

    /// Deletes the object at exactly `ts`.
    pub fn delete_object_by_time(&self, ts: i64) -> Result<(), StoreError> {
        let mut inner = self.write_inner()?;
        inner.check_faulted()?;

        let slot = inner
            .index_file
            .find_exact(inner.meta.active, ts)?
            .ok_or(StoreError::TimestampNotFound(ts))?;
        let entries = inner.index_file.read_all(inner.meta.active)?;
        let primary = entries[slot as usize].primary;

        let chain = inner.collect_chain_blocks(primary)?;
        for block in &chain {
            inner.block_file.free_block(*block)?;
        }
        inner.free_list.release_all(chain.iter().copied());

        let new_active = inner.index_file.delete(inner.meta.active, slot)?;
        inner.meta.active = new_active;
        inner.meta.index_count = new_active;
        inner.update_oldest_newest(new_active)?;
        inner.flush_meta()?;

        debug!(ts, "delete_object_by_time complete");
        Ok(())
    }

    /// Returns handles (no payload) for every record in `[start, end]`,
    /// in ascending timestamp order. `start == 0` means unbounded below,
    /// `end == 0` means unbounded above, `limit == 0` means no cap.
    pub fn get_objects_in_range(
        &self,
        start: i64,
        end: i64,
        limit: usize,
    ) -> Result<Vec<ObjectHandle>, StoreError> {
        let inner = self.read_inner()?;
        inner.check_faulted()?;

        let (lo, hi) = inner.index_file.find_range(inner.meta.active, start, end)?;
        let entries = inner.index_file.read_all(hi)?;
        let mut out = Vec::new();
        for entry in &entries[lo as usize..hi as usize] {
            if limit != 0 && out.len() >= limit {
                break;
            }
            let header = inner.block_file.read_header(entry.primary)?;
            let block_count = (header.total_size as usize)
                .div_ceil(inner.payload_capacity().max(1))
                .max(1) as u32;
            out.push(ObjectHandle {
                ts: entry.ts,
                primary: entry.primary,
                size: header.total_size,
                block_count,
            });
        }
        Ok(out)
    }

    /// Equivalent to `get_objects_in_range(now_ns - since_ns, 0, limit)`.
    pub fn get_objects_since(&self, since_ns: i64, limit: usize) -> Result<Vec<ObjectHandle>, StoreError> {
        let now_ns = now_nanos()?;
        let start = (now_ns - since_ns).max(1);
        self.get_objects_in_range(start, 0, limit)
    }

    /// The oldest `k` objects' handles, ascending order, capped to the
    /// number of active records.
    pub fn get_oldest_objects(&self, k: usize) -> Result<Vec<ObjectHandle>, StoreError> {
        let inner = self.read_inner()?;
        inner.check_faulted()?;
        let entries = inner.index_file.find_oldest(inner.meta.active, k as u32)?;
        self.handles_for(&inner, &entries)
    }

    /// The newest `k` objects' handles, descending timestamp order,
    /// capped to the number of active records.
    pub fn get_newest_objects(&self, k: usize) -> Result<Vec<ObjectHandle>, StoreError> {
        let inner = self.read_inner()?;
        inner.check_faulted()?;
        let entries = inner.index_file.find_newest(inner.meta.active, k as u32)?;
        self.handles_for(&inner, &entries)
    }

    fn handles_for(
        &self,
        inner: &StoreInner,
        entries: &[crate::index::IndexEntry],
    ) -> Result<Vec<ObjectHandle>, StoreError> {
        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            let header = inner.block_file.read_header(entry.primary)?;
            let block_count = (header.total_size as usize)
                .div_ceil(inner.payload_capacity().max(1))
                .max(1) as u32;
            out.push(ObjectHandle {
                ts: entry.ts,
                primary: entry.primary,
                size: header.total_size,
                block_count,
            });
        }
        Ok(out)
    }

    /// Reads the current schema, if any.
    pub fn get_schema(&self) -> Result<Option<Schema>, StoreError> {
        let inner = self.read_inner()?;
        inner.check_faulted()?;
        Ok(inner.schema_set.current().cloned())
    }

    /// Records a new, append-only schema version and persists it.
    pub fn set_schema(&self, fields: Vec<Field>) -> Result<u32, StoreError> {
        let mut inner = self.write_inner()?;
        inner.check_faulted()?;
        let version = inner.schema_set.set_schema(fields)?;
        inner.meta.schema_version = version;
        inner.schema_set.save(&inner.dir.join(SCHEMA_FILE))?;
        inner.flush_meta()?;
        Ok(version)
    }

    /// Compacts an expanded `{name: value}` JSON payload against the
    /// current schema.
    pub fn validate_and_compact(&self, expanded: &[u8]) -> Result<Vec<u8>, StoreError> {
        let inner = self.read_inner()?;
        inner.check_faulted()?;
        Ok(inner
            .schema_set
            .compact(expanded, inner.config.reject_unknown_fields)?)
    }

    /// Expands a compact `{index: value}` JSON payload against schema
    /// `version` (`0` = current).
    pub fn expand_data(&self, compact: &[u8], version: u32) -> Result<Vec<u8>, StoreError> {
        let inner = self.read_inner()?;
        inner.check_faulted()?;
        Ok(inner.schema_set.expand(compact, version)?)
    }

    /// Returns a clone of the full schema version history.
    pub fn get_schema_set(&self) -> Result<SchemaSet, StoreError> {
        let inner = self.read_inner()?;
        inner.check_faulted()?;
        Ok(inner.schema_set.clone())
    }
}

/// Substring filter over a raw payload, optionally case-insensitive. A
/// pure helper exposed for callers building list views; not part of the
/// index.
pub fn filter_payload(payload: &[u8], needle: &[u8], case_insensitive: bool) -> bool {
    if needle.is_empty() {
        return true;
    }
    if !case_insensitive {
        return contains_subslice(payload, needle);
    }
    let haystack_lower: Vec<u8> = payload.iter().map(|b| b.to_ascii_lowercase()).collect();
    let needle_lower: Vec<u8> = needle.iter().map(|b| b.to_ascii_lowercase()).collect();
    contains_subslice(&haystack_lower, &needle_lower)
}

fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.len() > haystack.len() {
        return false;
    }
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn now_nanos() -> Result<i64, StoreError> {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| StoreError::Internal(format!("system clock before epoch: {e}")))?;
    i64::try_from(duration.as_nanos())
        .map_err(|_| StoreError::Internal("system time overflowed i64 nanoseconds".into()))
}
