//! # Block File
//!
//! Fixed-size block storage backing `data.tsdb`. Each block is a
//! header-plus-payload cell of `block_size` (`B`) bytes; multi-block
//! objects chain through `next_block` pointers — a singly linked list
//! over stable block-number indices, not a pointer graph. Block numbers
//! are themselves the arena: a `Vec`-indexed region of fixed size `N`.
//!
//! ## On-disk block layout
//!
//! ```text
//! byte  0..8   timestamp       i64 LE, 0 if free
//! byte  8..12  state           u32 LE (0=free, 1=primary, 2=continuation)
//! byte 12..16  next_block      u32 LE (0xFFFF_FFFF = terminator)
//! byte 16..20  total_size      u32 LE (primary only; object length in bytes)
//! byte 20..24  schema_version  u32 LE (per-record schema pointer; primary only)
//! byte 24..B   payload
//! ```
//!
//! All accesses are positioned I/O at `block_num * B`, via `pread`/`pwrite`
//! (`FileExt::read_at`/`write_at`) so that reads never need to take the
//! store's write lock — only mutating callers serialize through it.


use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;

use thiserror::Error;
use tracing::{debug, trace};

use crate::encoding::{self, Decode, Encode, EncodingError};

/// Size in bytes of a block's fixed header.
pub const HEADER_SIZE: usize = 24;

/// Sentinel `next_block` value marking the end of a chain.
pub const TERMINATOR: u32 = 0xFFFF_FFFF;

// ------------------------------------------------------------------------------------------------
// Errors
// ------------------------------------------------------------------------------------------------

/// Errors produced by block file operations.
#[derive(Debug, Error)]
pub enum BlockFileError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A block number fell outside `[0, num_blocks)`.
    #[error("block number {block} out of range (N={num_blocks})")]
    BlockOutOfRange {
        /// The offending block number.
        block: u32,
        /// The store's configured block count.
        num_blocks: u32,
    },

    /// A header's state byte did not decode to a known [`BlockState`].
    #[error("invalid block state value {0}")]
    InvalidState(u32),

    /// Walking a chain did not terminate cleanly against `total_size`.
    #[error("object chain corrupted at primary block {primary}: {reason}")]
    ChainCorrupted {
        /// The primary block the chain started from.
        primary: u32,
        /// Human-readable description of the mismatch.
        reason: String,
    },

    /// A payload exceeded the per-block payload capacity.
    #[error("payload of {len} bytes exceeds per-block capacity of {capacity} bytes")]
    PayloadTooLarge {
        /// Length of the payload that was rejected.
        len: usize,
        /// Maximum payload bytes a single block can carry.
        capacity: usize,
    },

    /// Invariant violation not covered by a more specific variant.
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// BlockState
// ------------------------------------------------------------------------------------------------

/// The occupancy state of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    /// Unused, available for allocation.
    Free = 0,
    /// Head of an object's chain; the index points at this block.
    Primary = 1,
    /// Non-head link in an object's chain.
    Continuation = 2,
}

impl BlockState {
    fn from_u32(v: u32) -> Result<Self, BlockFileError> {
        match v {
            0 => Ok(BlockState::Free),
            1 => Ok(BlockState::Primary),
            2 => Ok(BlockState::Continuation),
            other => Err(BlockFileError::InvalidState(other)),
        }
    }

    fn to_u32(self) -> u32 {
        self as u32
    }
}

// ------------------------------------------------------------------------------------------------
// BlockHeader
// ------------------------------------------------------------------------------------------------

/// The fixed 24-byte header stored at the start of every block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Object timestamp (nanoseconds). Shared by primary and continuation
    /// blocks of the same chain so crash recovery can reassociate them.
    pub timestamp: i64,
    /// Occupancy state.
    pub state: BlockState,
    /// Next block in the chain, or [`TERMINATOR`] if this is the tail.
    pub next_block: u32,
    /// Total object length in bytes. Only meaningful on the primary block.
    pub total_size: u32,
    /// Schema version that was current when this record was written.
    /// Only meaningful on the primary block; lets a later expand-on-read
    /// use the field dictionary that was in effect at write time rather
    /// than whatever is current now.
    pub schema_version: u32,
}

impl BlockHeader {
    /// The header written into a freshly allocated (unused) block.
    pub fn free() -> Self {
        BlockHeader {
            timestamp: 0,
            state: BlockState::Free,
            next_block: TERMINATOR,
            total_size: 0,
            schema_version: 0,
        }
    }

    /// Encodes this header through the crate's [`Encode`] wire format,
    /// routing the same 24-byte layout through `encoding::encode_to_vec`
    /// rather than hand-rolling `to_le_bytes` slicing here.
    fn encode(&self) -> Result<[u8; HEADER_SIZE], BlockFileError> {
        let bytes = encoding::encode_to_vec(self).map_err(|e| BlockFileError::Internal(e.to_string()))?;
        let mut arr = [0u8; HEADER_SIZE];
        arr.copy_from_slice(&bytes);
        Ok(arr)
    }

    fn decode(buf: &[u8]) -> Result<Self, BlockFileError> {
        let (header, _) =
            encoding::decode_from_slice::<BlockHeader>(buf).map_err(|e| BlockFileError::Internal(e.to_string()))?;
        Ok(header)
    }
}

impl Encode for BlockHeader {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.timestamp.encode_to(buf)?;
        self.state.to_u32().encode_to(buf)?;
        self.next_block.encode_to(buf)?;
        self.total_size.encode_to(buf)?;
        self.schema_version.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for BlockHeader {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (timestamp, n) = i64::decode_from(&buf[offset..])?;
        offset += n;
        let (state_raw, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let state = BlockState::from_u32(state_raw).map_err(|e| EncodingError::Custom(e.to_string()))?;
        let (next_block, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let (total_size, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let (schema_version, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            BlockHeader {
                timestamp,
                state,
                next_block,
                total_size,
                schema_version,
            },
            offset,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// BlockFile
// ------------------------------------------------------------------------------------------------

/// Fixed-capacity block pool backing a store's `data.tsdb` file.
pub struct BlockFile {
    file: File,
    num_blocks: u32,
    block_size: u32,
}

impl BlockFile {
    /// Per-block payload capacity (`block_size - HEADER_SIZE`).
    pub fn payload_capacity(block_size: u32) -> usize {
        block_size as usize - HEADER_SIZE
    }

    /// Creates a new `data.tsdb`, pre-allocating `num_blocks` free blocks.
    pub fn create(path: &Path, num_blocks: u32, block_size: u32) -> Result<Self, BlockFileError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        let blank = BlockHeader::free().encode()?;
        let payload_zeros = vec![0u8; Self::payload_capacity(block_size)];
        for block_num in 0..num_blocks {
            let offset = u64::from(block_num) * u64::from(block_size);
            file.write_at(&blank, offset)?;
            file.write_at(&payload_zeros, offset + HEADER_SIZE as u64)?;
        }
        file.sync_all()?;

        debug!(num_blocks, block_size, "created data.tsdb with free blocks");
        Ok(BlockFile {
            file,
            num_blocks,
            block_size,
        })
    }

    /// Opens an existing `data.tsdb`.
    pub fn open(path: &Path, num_blocks: u32, block_size: u32) -> Result<Self, BlockFileError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let expected_len = u64::from(num_blocks) * u64::from(block_size);
        let actual_len = file.metadata()?.len();
        if actual_len != expected_len {
            return Err(BlockFileError::Internal(format!(
                "data.tsdb size {actual_len} does not match N*B ({expected_len})"
            )));
        }
        Ok(BlockFile {
            file,
            num_blocks,
            block_size,
        })
    }

    /// Number of blocks in the pool.
    pub fn num_blocks(&self) -> u32 {
        self.num_blocks
    }

    /// Configured block size in bytes.
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    fn check_range(&self, block_num: u32) -> Result<(), BlockFileError> {
        if block_num >= self.num_blocks {
            return Err(BlockFileError::BlockOutOfRange {
                block: block_num,
                num_blocks: self.num_blocks,
            });
        }
        Ok(())
    }

    fn offset(&self, block_num: u32) -> Result<u64, BlockFileError> {
        self.check_range(block_num)?;
        Ok(u64::from(block_num) * u64::from(self.block_size))
    }

    /// Reads a block's header.
    pub fn read_header(&self, block_num: u32) -> Result<BlockHeader, BlockFileError> {
        let offset = self.offset(block_num)?;
        let mut buf = [0u8; HEADER_SIZE];
        self.file.read_exact_at(&mut buf, offset)?;
        BlockHeader::decode(&buf)
    }

    /// Writes a block's header.
    pub fn write_header(&self, block_num: u32, header: &BlockHeader) -> Result<(), BlockFileError> {
        let offset = self.offset(block_num)?;
        self.file.write_all_at(&header.encode()?, offset)?;
        Ok(())
    }

    /// Reads a block's raw payload bytes (full per-block capacity; callers
    /// trim to `total_size` when reassembling a chain).
    pub fn read_payload(&self, block_num: u32) -> Result<Vec<u8>, BlockFileError> {
        let offset = self.offset(block_num)? + HEADER_SIZE as u64;
        let capacity = Self::payload_capacity(self.block_size);
        let mut buf = vec![0u8; capacity];
        self.file.read_exact_at(&mut buf, offset)?;
        Ok(buf)
    }

    /// Writes a block's payload bytes, zero-padding up to the per-block
    /// capacity. Errors if `bytes` exceeds that capacity.
    pub fn write_payload(&self, block_num: u32, bytes: &[u8]) -> Result<(), BlockFileError> {
        let capacity = Self::payload_capacity(self.block_size);
        if bytes.len() > capacity {
            return Err(BlockFileError::PayloadTooLarge {
                len: bytes.len(),
                capacity,
            });
        }
        let offset = self.offset(block_num)? + HEADER_SIZE as u64;
        if bytes.len() == capacity {
            self.file.write_all_at(bytes, offset)?;
        } else {
            let mut padded = vec![0u8; capacity];
            padded[..bytes.len()].copy_from_slice(bytes);
            self.file.write_all_at(&padded, offset)?;
        }
        Ok(())
    }

    /// Walks `next_block` pointers from `primary_num`, concatenating
    /// payload bytes until `total_size` have been collected or the
    /// terminator is hit. A mismatch between the two is reported as
    /// [`BlockFileError::ChainCorrupted`].
    ///
    /// Returns `(payload, timestamp, schema_version)`.
    pub fn read_chain(&self, primary_num: u32) -> Result<(Vec<u8>, i64, u32), BlockFileError> {
        let primary_header = self.read_header(primary_num)?;
        if primary_header.state != BlockState::Primary {
            return Err(BlockFileError::ChainCorrupted {
                primary: primary_num,
                reason: format!("block {primary_num} is not a primary block"),
            });
        }

        let total_size = primary_header.total_size as usize;
        let capacity = Self::payload_capacity(self.block_size);
        let mut out = Vec::with_capacity(total_size);
        let mut current = primary_num;
        let mut hops = 0usize;
        let max_hops = total_size.div_ceil(capacity.max(1)).max(1);

        loop {
            let header = if current == primary_num {
                primary_header
            } else {
                self.read_header(current)?
            };
            let remaining = total_size.saturating_sub(out.len());
            let take = remaining.min(capacity);
            let payload = self.read_payload(current)?;
            out.extend_from_slice(&payload[..take]);
            hops += 1;

            if out.len() >= total_size {
                break;
            }
            if header.next_block == TERMINATOR {
                return Err(BlockFileError::ChainCorrupted {
                    primary: primary_num,
                    reason: format!(
                        "chain terminated after {} bytes, expected {total_size}",
                        out.len()
                    ),
                });
            }
            if hops > max_hops {
                return Err(BlockFileError::ChainCorrupted {
                    primary: primary_num,
                    reason: format!("chain exceeded expected {max_hops} hops"),
                });
            }
            current = header.next_block;
        }

        trace!(primary_num, total_size, hops, "read_chain complete");
        Ok((out, primary_header.timestamp, primary_header.schema_version))
    }

    /// Writes `payload` across the pre-allocated `blocks`, in order. The
    /// first block becomes the primary (carrying `total_size` and
    /// `schema_version`); subsequent blocks are continuations carrying the
    /// same timestamp (for crash recovery) and a zero `total_size`. The
    /// last block in `blocks` is terminated.
    pub fn write_chain(
        &self,
        blocks: &[u32],
        payload: &[u8],
        ts: i64,
        schema_version: u32,
    ) -> Result<(), BlockFileError> {
        if blocks.is_empty() {
            return Err(BlockFileError::Internal(
                "write_chain called with an empty block list".into(),
            ));
        }
        let capacity = Self::payload_capacity(self.block_size);
        let total_size = u32::try_from(payload.len())
            .map_err(|_| BlockFileError::Internal("payload length exceeds u32::MAX".into()))?;

        for (i, &block_num) in blocks.iter().enumerate() {
            let start = i * capacity;
            let end = ((i + 1) * capacity).min(payload.len());
            let chunk = if start < payload.len() {
                &payload[start..end]
            } else {
                &[]
            };
            let next_block = blocks.get(i + 1).copied().unwrap_or(TERMINATOR);
            let header = BlockHeader {
                timestamp: ts,
                state: if i == 0 {
                    BlockState::Primary
                } else {
                    BlockState::Continuation
                },
                next_block,
                total_size: if i == 0 { total_size } else { 0 },
                schema_version: if i == 0 { schema_version } else { 0 },
            };
            self.write_header(block_num, &header)?;
            self.write_payload(block_num, chunk)?;
        }

        debug!(
            primary = blocks[0],
            block_count = blocks.len(),
            total_size,
            "write_chain complete"
        );
        Ok(())
    }

    /// Resets a block to the free state, zeroing its header and payload.
    pub fn free_block(&self, block_num: u32) -> Result<(), BlockFileError> {
        self.write_header(block_num, &BlockHeader::free())?;
        let capacity = Self::payload_capacity(self.block_size);
        self.file
            .write_all_at(&vec![0u8; capacity], self.offset(block_num)? + HEADER_SIZE as u64)?;
        Ok(())
    }

    /// Flushes OS buffers for the data file. Called by the store engine
    /// when `StoreConfig::fsync_data` is enabled.
    pub fn sync(&self) -> Result<(), BlockFileError> {
        self.file.sync_data()?;
        Ok(())
    }
}
