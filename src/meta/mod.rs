//! # Metadata Header
//!
//! The 64-byte `meta.tsdb` header: format identity, the store's fixed
//! geometry (`N`, `B`, `data_type`), and the mutable counters (`active`,
//! `index_count`, `oldest`, `newest`, `schema_version`) that the index and
//! schema modules otherwise don't persist themselves.
//!
//! Writes are atomic: serialize to a temp file in the store directory,
//! fsync, rename over `meta.tsdb`, then fsync the directory — the same
//! tmp-file-plus-rename discipline used elsewhere in this codebase for
//! crash-safe metadata updates, simplified here to a single fixed-size
//! struct instead of a WAL-backed snapshot.
//!
//! ## On-disk layout (64 bytes)
//!
//! ```text
//! byte  0..6   magic            b"TSDB\x00\x01"
//! byte  6..8   version          u16 LE
//! byte  8..12  num_blocks (N)   u32 LE
//! byte 12..16  block_size (B)   u32 LE
//! byte 16..17  data_type        u8
//! byte 17..20  pad              3 zero bytes
//! byte 20..24  active           u32 LE
//! byte 24..28  index_count      u32 LE
//! byte 28..36  oldest_ts        i64 LE
//! byte 36..44  newest_ts        i64 LE
//! byte 44..48  schema_version   u32 LE
//! byte 48..52  header_crc32     u32 LE (CRC32 of bytes 0..48)
//! byte 52..64  reserved         12 zero bytes
//! ```

#[cfg(test)]
mod tests;

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use crc32fast::Hasher as Crc32;
use thiserror::Error;
use tracing::{debug, warn};

use crate::encoding::{self, Decode, Encode, EncodingError};

/// Total on-disk size of the metadata header.
pub const META_SIZE: usize = 64;

const MAGIC: [u8; 6] = *b"TSDB\x00\x01";
const FORMAT_VERSION: u16 = 1;
const CHECKSUMMED_LEN: usize = 48;

// ------------------------------------------------------------------------------------------------
// DataType
// ------------------------------------------------------------------------------------------------

/// The kind of payload a store holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    /// Arbitrary opaque bytes.
    Binary = 0,
    /// UTF-8 text.
    Text = 1,
    /// Arbitrary JSON documents.
    Json = 2,
    /// JSON validated and compacted against a [`crate::schema::SchemaSet`].
    Schema = 3,
}

impl DataType {
    fn from_u8(v: u8) -> Result<Self, MetaError> {
        match v {
            0 => Ok(DataType::Binary),
            1 => Ok(DataType::Text),
            2 => Ok(DataType::Json),
            3 => Ok(DataType::Schema),
            other => Err(MetaError::Corruption(format!("invalid data_type byte {other}"))),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Errors
// ------------------------------------------------------------------------------------------------

/// Errors produced by metadata header operations.
#[derive(Debug, Error)]
pub enum MetaError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The header failed magic, length, or checksum validation.
    #[error("metadata corruption: {0}")]
    Corruption(String),
}

// ------------------------------------------------------------------------------------------------
// Meta
// ------------------------------------------------------------------------------------------------

/// In-memory mirror of the 64-byte `meta.tsdb` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Meta {
    /// Fixed block count (`N`).
    pub num_blocks: u32,
    /// Fixed block size in bytes (`B`).
    pub block_size: u32,
    /// Payload kind for this store.
    pub data_type: DataType,
    /// Number of currently active (primary) blocks.
    pub active: u32,
    /// Number of currently active index entries (equal to `active`; see
    /// invariant I1).
    pub index_count: u32,
    /// Timestamp of the oldest live record, or 0 if the store is empty.
    pub oldest_ts: i64,
    /// Timestamp of the newest live record, or 0 if the store is empty.
    pub newest_ts: i64,
    /// Current schema version (0 if the store has no schema).
    pub schema_version: u32,
}

impl Meta {
    /// Builds the header for a freshly created, empty store.
    pub fn new_empty(num_blocks: u32, block_size: u32, data_type: DataType) -> Self {
        Meta {
            num_blocks,
            block_size,
            data_type,
            active: 0,
            index_count: 0,
            oldest_ts: 0,
            newest_ts: 0,
            schema_version: 0,
        }
    }

    /// Encodes this header through the crate's [`Encode`] wire format.
    fn encode(&self) -> Result<[u8; META_SIZE], MetaError> {
        let bytes = encoding::encode_to_vec(self).map_err(|e| MetaError::Corruption(e.to_string()))?;
        let mut arr = [0u8; META_SIZE];
        arr.copy_from_slice(&bytes);
        Ok(arr)
    }

    fn decode(buf: &[u8]) -> Result<Self, MetaError> {
        if buf.len() != META_SIZE {
            return Err(MetaError::Corruption(format!(
                "meta.tsdb has {} bytes, expected {META_SIZE}",
                buf.len()
            )));
        }
        let (meta, _) = encoding::decode_from_slice::<Meta>(buf).map_err(|e| MetaError::Corruption(e.to_string()))?;
        Ok(meta)
    }

    /// Creates `meta.tsdb` for a new store.
    pub fn create(path: &Path, meta: &Meta) -> Result<(), MetaError> {
        let mut f = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        f.write_all(&meta.encode()?)?;
        f.sync_all()?;
        debug!(?path, "created meta.tsdb");
        Ok(())
    }

    /// Loads `meta.tsdb`, verifying magic and checksum.
    pub fn load(path: &Path) -> Result<Meta, MetaError> {
        let bytes = fs::read(path)?;
        Meta::decode(&bytes)
    }

    /// Atomically rewrites `meta.tsdb`: write to a temp file in the same
    /// directory, rename over the target, and — when `fsync` is true —
    /// flush the temp file and the directory entry to disk. Callers that
    /// pass `fsync = false` (`StoreConfig::fsync_meta == false`) still get
    /// an atomic rename, just without the durability guarantee across a
    /// crash.
    pub fn write_atomic(path: &Path, meta: &Meta, fsync: bool) -> Result<(), MetaError> {
        let dir = path.parent().ok_or_else(|| {
            MetaError::Corruption("meta.tsdb path has no parent directory".into())
        })?;
        let tmp_path = dir.join("meta.tsdb.tmp");
        {
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            f.write_all(&meta.encode()?)?;
            if fsync {
                f.sync_all()?;
            }
        }
        fs::rename(&tmp_path, path)?;

        if fsync {
            let dir_file = File::open(dir)?;
            if let Err(e) = dir_file.sync_all() {
                warn!(%e, "failed to fsync store directory after meta.tsdb rename");
            }
        }
        Ok(())
    }
}

impl Encode for Meta {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        let start = buf.len();
        buf.extend_from_slice(&MAGIC);
        buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        self.num_blocks.encode_to(buf)?;
        self.block_size.encode_to(buf)?;
        (self.data_type as u8).encode_to(buf)?;
        buf.extend_from_slice(&[0u8; 3]); // pad
        self.active.encode_to(buf)?;
        self.index_count.encode_to(buf)?;
        self.oldest_ts.encode_to(buf)?;
        self.newest_ts.encode_to(buf)?;
        self.schema_version.encode_to(buf)?;

        let mut hasher = Crc32::new();
        hasher.update(&buf[start..start + CHECKSUMMED_LEN]);
        let crc = hasher.finalize();
        buf.extend_from_slice(&crc.to_le_bytes());
        buf.extend_from_slice(&[0u8; 12]); // reserved
        Ok(())
    }
}

impl Decode for Meta {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        if buf.len() < META_SIZE {
            return Err(EncodingError::UnexpectedEof {
                needed: META_SIZE,
                available: buf.len(),
            });
        }
        if buf[0..6] != MAGIC {
            return Err(EncodingError::Custom("bad magic".into()));
        }

        let stored_crc = u32::from_le_bytes(
            buf[48..52]
                .try_into()
                .map_err(|_| EncodingError::Custom("crc slice conversion failed".into()))?,
        );
        let mut hasher = Crc32::new();
        hasher.update(&buf[0..CHECKSUMMED_LEN]);
        if hasher.finalize() != stored_crc {
            return Err(EncodingError::Custom("header checksum mismatch".into()));
        }

        let num_blocks = u32::from_le_bytes(buf[8..12].try_into().unwrap_or([0; 4]));
        let block_size = u32::from_le_bytes(buf[12..16].try_into().unwrap_or([0; 4]));
        let data_type = DataType::from_u8(buf[16]).map_err(|e| EncodingError::Custom(e.to_string()))?;
        let active = u32::from_le_bytes(buf[20..24].try_into().unwrap_or([0; 4]));
        let index_count = u32::from_le_bytes(buf[24..28].try_into().unwrap_or([0; 4]));
        let oldest_ts = i64::from_le_bytes(buf[28..36].try_into().unwrap_or([0; 8]));
        let newest_ts = i64::from_le_bytes(buf[36..44].try_into().unwrap_or([0; 8]));
        let schema_version = u32::from_le_bytes(buf[44..48].try_into().unwrap_or([0; 4]));

        Ok((
            Meta {
                num_blocks,
                block_size,
                data_type,
                active,
                index_count,
                oldest_ts,
                newest_ts,
                schema_version,
            },
            META_SIZE,
        ))
    }
}
