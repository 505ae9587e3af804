//! # Index File
//!
//! A flat, contiguous array of 16-byte entries in `index.tsdb`, sorted by
//! timestamp ascending with no duplicates. Supports binary-search point
//! and range lookups, and in-place insert/delete via bulk positioned
//! shifts of the tail of the array.
//!
//! ## On-disk entry layout
//!
//! ```text
//! byte 0..8   timestamp  i64 LE
//! byte 8..12  primary    u32 LE (block number)
//! byte 12..16 flags      u32 LE (reserved; always 0 in this implementation)
//! ```
//!
//! The active-entry count is not stored in this file; it lives in the
//! store's metadata header (`meta.tsdb`) and is passed in by the caller.

#[cfg(test)]
mod tests;

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;

use thiserror::Error;
use tracing::trace;

use crate::encoding::{self, Decode, Encode, EncodingError};

/// Size in bytes of a single index entry.
pub const ENTRY_SIZE: usize = 16;

// ------------------------------------------------------------------------------------------------
// Errors
// ------------------------------------------------------------------------------------------------

/// Errors produced by index file operations.
#[derive(Debug, Error)]
pub enum IndexFileError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// `insert` was called with a timestamp already present in the index.
    #[error("duplicate timestamp {0}")]
    DuplicateTimestamp(i64),

    /// A slot index fell outside the active range.
    #[error("slot {slot} out of range (active={active})")]
    SlotOutOfRange {
        /// The offending slot.
        slot: u32,
        /// The number of currently active entries.
        active: u32,
    },

    /// The on-disk array was found not strictly increasing in timestamp.
    #[error("index out of order at slot {0}")]
    IndexOutOfOrder(u32),

    /// Invariant violation not covered by a more specific variant.
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// IndexEntry
// ------------------------------------------------------------------------------------------------

/// One (timestamp, primary block) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Record timestamp, nanoseconds.
    pub ts: i64,
    /// Primary block number holding the record.
    pub primary: u32,
    /// Reserved for future use; always 0 in this implementation (the
    /// per-record schema-version pointer lives in the block header
    /// instead, next to the record's bytes).
    pub flags: u32,
}

impl IndexEntry {
    /// Encodes this entry through the crate's [`Encode`] wire format.
    fn encode(&self) -> Result<[u8; ENTRY_SIZE], IndexFileError> {
        let bytes = encoding::encode_to_vec(self).map_err(|e| IndexFileError::Internal(e.to_string()))?;
        let mut arr = [0u8; ENTRY_SIZE];
        arr.copy_from_slice(&bytes);
        Ok(arr)
    }

    fn decode(buf: &[u8]) -> Result<Self, IndexFileError> {
        let (entry, _) =
            encoding::decode_from_slice::<IndexEntry>(buf).map_err(|e| IndexFileError::Internal(e.to_string()))?;
        Ok(entry)
    }
}

impl Encode for IndexEntry {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.ts.encode_to(buf)?;
        self.primary.encode_to(buf)?;
        self.flags.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for IndexEntry {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (ts, n) = i64::decode_from(&buf[offset..])?;
        offset += n;
        let (primary, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let (flags, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        Ok((IndexEntry { ts, primary, flags }, offset))
    }
}

// ------------------------------------------------------------------------------------------------
// IndexFile
// ------------------------------------------------------------------------------------------------

/// Fixed-capacity (`N` entries) sorted index backing a store's
/// `index.tsdb` file.
///
/// The caller (the store engine) is the sole source of truth for how many
/// of the `N` slots are currently active; every operation here takes or
/// returns that count explicitly rather than caching it.
pub struct IndexFile {
    file: File,
    num_entries: u32,
}

impl IndexFile {
    /// Creates a new `index.tsdb` sized for `num_entries` (`N`) slots.
    pub fn create(path: &Path, num_entries: u32) -> Result<Self, IndexFileError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        file.set_len(u64::from(num_entries) * ENTRY_SIZE as u64)?;
        file.sync_all()?;
        Ok(IndexFile { file, num_entries })
    }

    /// Opens an existing `index.tsdb`.
    pub fn open(path: &Path, num_entries: u32) -> Result<Self, IndexFileError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(IndexFile { file, num_entries })
    }

    /// Capacity of the index in entries (`N`).
    pub fn capacity(&self) -> u32 {
        self.num_entries
    }

    fn read_slot(&self, slot: u32) -> Result<IndexEntry, IndexFileError> {
        let mut buf = [0u8; ENTRY_SIZE];
        self.file
            .read_exact_at(&mut buf, u64::from(slot) * ENTRY_SIZE as u64)?;
        IndexEntry::decode(&buf)
    }

    fn write_slot(&self, slot: u32, entry: &IndexEntry) -> Result<(), IndexFileError> {
        self.file
            .write_all_at(&entry.encode()?, u64::from(slot) * ENTRY_SIZE as u64)?;
        Ok(())
    }

    /// Reads all `active` entries into memory, in slot order.
    pub fn read_all(&self, active: u32) -> Result<Vec<IndexEntry>, IndexFileError> {
        let mut out = Vec::with_capacity(active as usize);
        for slot in 0..active {
            out.push(self.read_slot(slot)?);
        }
        Ok(out)
    }

    /// Binary search for a slot whose timestamp is exactly `ts`.
    pub fn find_exact(&self, active: u32, ts: i64) -> Result<Option<u32>, IndexFileError> {
        let (lo, hi) = self.bounds(active, ts, ts)?;
        if lo < hi {
            Ok(Some(lo))
        } else {
            Ok(None)
        }
    }

    /// Returns the half-open slot range `[lo, hi)` covering
    /// `start <= ts <= end`. `start == 0` means unbounded below (`lo = 0`),
    /// `end == 0` means unbounded above (`hi = active`).
    pub fn find_range(&self, active: u32, start: i64, end: i64) -> Result<(u32, u32), IndexFileError> {
        let effective_start = if start == 0 { i64::MIN } else { start };
        let effective_end = if end == 0 { i64::MAX } else { end };
        self.bounds(active, effective_start, effective_end)
    }

    fn bounds(&self, active: u32, start: i64, end: i64) -> Result<(u32, u32), IndexFileError> {
        let lo = self.lower_bound(active, start)?;
        let hi = self.upper_bound(active, end)?;
        Ok((lo, hi.max(lo)))
    }

    /// Smallest slot whose timestamp is `>= ts` (or `active` if none).
    fn lower_bound(&self, active: u32, ts: i64) -> Result<u32, IndexFileError> {
        let mut lo = 0u32;
        let mut hi = active;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let entry = self.read_slot(mid)?;
            if entry.ts < ts {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    /// Smallest slot whose timestamp is `> ts` (or `active` if none).
    fn upper_bound(&self, active: u32, ts: i64) -> Result<u32, IndexFileError> {
        let mut lo = 0u32;
        let mut hi = active;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let entry = self.read_slot(mid)?;
            if entry.ts <= ts {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    /// The oldest `k` entries (ascending order), `k` capped to `active`.
    pub fn find_oldest(&self, active: u32, k: u32) -> Result<Vec<IndexEntry>, IndexFileError> {
        let n = k.min(active);
        let mut out = Vec::with_capacity(n as usize);
        for slot in 0..n {
            out.push(self.read_slot(slot)?);
        }
        Ok(out)
    }

    /// The newest `k` entries, in descending timestamp order, `k` capped
    /// to `active`.
    pub fn find_newest(&self, active: u32, k: u32) -> Result<Vec<IndexEntry>, IndexFileError> {
        let n = k.min(active);
        let mut out = Vec::with_capacity(n as usize);
        for i in 0..n {
            out.push(self.read_slot(active - 1 - i)?);
        }
        Ok(out)
    }

    /// Inserts `(ts, primary)`, keeping the array sorted.
    ///
    /// When `ts` is greater than the current last entry's timestamp (the
    /// common append-heavy case), the insert is O(1). Otherwise the
    /// insertion slot is located via binary search and every entry at or
    /// after it is shifted right by one entry width via a single bulk
    /// positioned read + write.
    ///
    /// Returns the new active count and the slot the entry landed in.
    pub fn insert(&self, active: u32, ts: i64, primary: u32) -> Result<(u32, u32), IndexFileError> {
        if active >= self.num_entries {
            return Err(IndexFileError::Io(io::Error::other(format!(
                "index file full: active={active} >= N={}",
                self.num_entries
            ))));
        }

        let slot = self.lower_bound(active, ts)?;
        if slot < active {
            let existing = self.read_slot(slot)?;
            if existing.ts == ts {
                return Err(IndexFileError::DuplicateTimestamp(ts));
            }
        }

        if slot < active {
            self.shift_right(slot, active)?;
        }

        self.write_slot(
            slot,
            &IndexEntry {
                ts,
                primary,
                flags: 0,
            },
        )?;

        trace!(ts, primary, slot, "index insert");
        Ok((active + 1, slot))
    }

    /// Deletes the entry at `slot`, shifting everything after it left by
    /// one entry width via a single bulk positioned read + write.
    ///
    /// Returns the new active count.
    pub fn delete(&self, active: u32, slot: u32) -> Result<u32, IndexFileError> {
        if slot >= active {
            return Err(IndexFileError::SlotOutOfRange { slot, active });
        }
        if slot + 1 < active {
            self.shift_left(slot, active)?;
        }
        Ok(active - 1)
    }

    /// Shifts entries `[from, active)` right by one slot (into
    /// `[from+1, active+1)`), reading and writing the whole span in one
    /// pair of positioned calls.
    fn shift_right(&self, from: u32, active: u32) -> Result<(), IndexFileError> {
        let count = (active - from) as usize;
        let mut buf = vec![0u8; count * ENTRY_SIZE];
        self.file
            .read_exact_at(&mut buf, u64::from(from) * ENTRY_SIZE as u64)?;
        self.file
            .write_all_at(&buf, u64::from(from + 1) * ENTRY_SIZE as u64)?;
        Ok(())
    }

    /// Shifts entries `[slot+1, active)` left by one slot (into
    /// `[slot, active-1)`).
    fn shift_left(&self, slot: u32, active: u32) -> Result<(), IndexFileError> {
        let count = (active - slot - 1) as usize;
        let mut buf = vec![0u8; count * ENTRY_SIZE];
        self.file
            .read_exact_at(&mut buf, u64::from(slot + 1) * ENTRY_SIZE as u64)?;
        self.file
            .write_all_at(&buf, u64::from(slot) * ENTRY_SIZE as u64)?;
        Ok(())
    }

    /// Flushes OS buffers for the index file.
    pub fn sync(&self) -> Result<(), IndexFileError> {
        self.file.sync_data()?;
        Ok(())
    }
}
