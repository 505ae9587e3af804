//! # Free List
//!
//! An in-memory, sorted set of block numbers currently in the free state.
//! Rebuilt at `Open` by scanning block headers; never persisted on its
//! own (a block's state byte in `data.tsdb` is the durable source of
//! truth — this structure is a cache over it).

#[cfg(test)]
mod tests;

use std::collections::BTreeSet;

use tracing::trace;

/// Ordered set of available block numbers.
#[derive(Debug, Default)]
pub struct FreeList {
    free: BTreeSet<u32>,
}

impl FreeList {
    /// Builds a free list from an explicit set of free block numbers,
    /// e.g. collected while scanning `data.tsdb` at Open.
    pub fn from_free_blocks(blocks: impl IntoIterator<Item = u32>) -> Self {
        FreeList {
            free: blocks.into_iter().collect(),
        }
    }

    /// Number of free blocks.
    pub fn size(&self) -> usize {
        self.free.len()
    }

    /// Returns and removes the smallest free block number, if any.
    pub fn allocate(&mut self) -> Option<u32> {
        let block = *self.free.iter().next()?;
        self.free.remove(&block);
        trace!(block, remaining = self.free.len(), "freelist allocate");
        Some(block)
    }

    /// Returns and removes the `k` smallest free block numbers, if `k`
    /// are available; otherwise leaves the free list untouched and
    /// returns `None` so the caller can evict and retry.
    pub fn allocate_n(&mut self, k: usize) -> Option<Vec<u32>> {
        if self.free.len() < k {
            return None;
        }
        let chosen: Vec<u32> = self.free.iter().take(k).copied().collect();
        for block in &chosen {
            self.free.remove(block);
        }
        trace!(count = chosen.len(), remaining = self.free.len(), "freelist allocate_n");
        Some(chosen)
    }

    /// Returns a block to the free set.
    pub fn release(&mut self, block_num: u32) {
        self.free.insert(block_num);
        trace!(block = block_num, size = self.free.len(), "freelist release");
    }

    /// Returns a batch of blocks to the free set.
    pub fn release_all(&mut self, blocks: impl IntoIterator<Item = u32>) {
        for block in blocks {
            self.free.insert(block);
        }
    }

    /// True if `block_num` is currently free.
    pub fn contains(&self, block_num: u32) -> bool {
        self.free.contains(&block_num)
    }
}
