//! # Sorted Table (SSTable) Module
//!
//! Immutable, sorted on-disk tables holding internal-key → value entries.
//! Tables are produced by memtable flushes and compactions, never modified
//! in place, and read concurrently without locks.
//!
//! # On-disk layout
//!
//! ```text
//! [data block 1][trailer]
//! [data block 2][trailer]
//! ...
//! [metaindex block][trailer]
//! [index block][trailer]
//! [footer (48 bytes)]
//! ```
//!
//! - **Data blocks** — prefix-compressed entry runs with restart points
//!   (see [`block`]), at most ~`block_size` bytes of user data each.
//! - **Metaindex block** — reserved directory of auxiliary blocks; written
//!   empty (the engine carries no filter blocks).
//! - **Index block** — one entry per data block mapping a shortened
//!   separator key (≥ every key in the block, < every key in the next) to
//!   the block's [`BlockHandle`].
//! - **Block trailer** (5 bytes) — `compression_tag(1) ‖ masked_crc32c(4)`
//!   where the CRC covers the stored block bytes followed by the tag.
//! - **Footer** (48 bytes) — the metaindex and index handles as varints,
//!   zero-padded, then the table magic.
//!
//! # Guarantees
//!
//! - **Immutability:** once a table file is published under its final name
//!   it never changes; readers may mmap it for its whole lifetime.
//! - **Integrity:** every block carries a CRC32C; a flipped byte surfaces
//!   as [`TableError::Corruption`], never as silently wrong data.
//! - **Pluggable compression:** blocks are stored per
//!   [`CompressionType`]; the builder falls back to `None` whenever the
//!   codec does not shrink a block enough to matter.

// ------------------------------------------------------------------------------------------------
// Sub-modules
// ------------------------------------------------------------------------------------------------

pub mod block;
pub mod builder;
pub mod iterator;

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::cache::ShardedCache;
use crate::checksum;
use crate::encoding::{
    EncodingError, decode_fixed32, get_varint64, put_fixed64, put_varint64,
};
use crate::env::RandomAccessFile;
use crate::keys::Comparator;
use crate::options::{CompressionType, ReadOptions};
use self::block::{Block, BlockIter};
use self::iterator::TableIterator;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// `metaindex_handle ‖ index_handle` padded to 40 bytes, plus the magic.
pub const FOOTER_SIZE: usize = 2 * MAX_ENCODED_HANDLE_SIZE + 8;

/// A varint-encoded `BlockHandle` never exceeds two 10-byte varints.
pub const MAX_ENCODED_HANDLE_SIZE: usize = 20;

/// `compression_tag(1) ‖ masked_crc32c(4)` after every stored block.
pub const BLOCK_TRAILER_SIZE: usize = 5;

/// Table file magic, stored little-endian in the footer's final 8 bytes.
pub const TABLE_MAGIC: u64 = 0xdb47_7524_8b80_fb57;

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors surfaced while building or reading tables.
///
/// Cloneable so that iterators can hold and re-report a sticky status.
#[derive(Debug, Error, Clone)]
pub enum TableError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),

    /// The file contents contradict the format: bad magic, impossible
    /// lengths, checksum mismatches, undecodable varints.
    #[error("Corruption: {0}")]
    Corruption(String),
}

impl From<io::Error> for TableError {
    fn from(err: io::Error) -> TableError {
        TableError::Io(Arc::new(err))
    }
}

impl From<EncodingError> for TableError {
    fn from(err: EncodingError) -> TableError {
        TableError::Corruption(err.to_string())
    }
}

// ------------------------------------------------------------------------------------------------
// Block handles and the footer
// ------------------------------------------------------------------------------------------------

/// Location of a stored block: offset and size of the block bytes,
/// excluding the trailer that follows them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockHandle {
    pub offset: u64,
    pub size: u64,
}

impl BlockHandle {
    pub fn new(offset: u64, size: u64) -> BlockHandle {
        BlockHandle { offset, size }
    }

    /// Append `varint64(offset) ‖ varint64(size)`.
    pub fn encode_to(&self, buf: &mut Vec<u8>) {
        put_varint64(buf, self.offset);
        put_varint64(buf, self.size);
    }

    pub fn encoded(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MAX_ENCODED_HANDLE_SIZE);
        self.encode_to(&mut buf);
        buf
    }

    /// Decode from the front of `buf`, returning the bytes consumed.
    pub fn decode_from(buf: &[u8]) -> Result<(BlockHandle, usize), TableError> {
        let (offset, n) = get_varint64(buf)?;
        let (size, m) = get_varint64(&buf[n..])?;
        Ok((BlockHandle { offset, size }, n + m))
    }
}

/// Fixed-size table footer: the two root handles plus the magic.
#[derive(Debug, Clone, Copy, Default)]
pub struct Footer {
    pub metaindex_handle: BlockHandle,
    pub index_handle: BlockHandle,
}

impl Footer {
    /// Encode to exactly [`FOOTER_SIZE`] bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FOOTER_SIZE);
        self.metaindex_handle.encode_to(&mut buf);
        self.index_handle.encode_to(&mut buf);
        buf.resize(2 * MAX_ENCODED_HANDLE_SIZE, 0);
        put_fixed64(&mut buf, TABLE_MAGIC);
        debug_assert_eq!(buf.len(), FOOTER_SIZE);
        buf
    }

    /// Decode from exactly [`FOOTER_SIZE`] bytes.
    pub fn decode(buf: &[u8]) -> Result<Footer, TableError> {
        if buf.len() != FOOTER_SIZE {
            return Err(TableError::Corruption(format!(
                "footer is {} bytes, expected {FOOTER_SIZE}",
                buf.len()
            )));
        }
        let magic = crate::encoding::decode_fixed64(&buf[FOOTER_SIZE - 8..]);
        if magic != TABLE_MAGIC {
            return Err(TableError::Corruption(
                "not an sstable (bad magic number)".to_string(),
            ));
        }
        let (metaindex_handle, n) = BlockHandle::decode_from(buf)?;
        let (index_handle, _) = BlockHandle::decode_from(&buf[n..])?;
        Ok(Footer {
            metaindex_handle,
            index_handle,
        })
    }
}

// ------------------------------------------------------------------------------------------------
// Stored-block reading
// ------------------------------------------------------------------------------------------------

/// Read and verify the block at `handle`, undoing compression.
pub fn read_block(
    file: &dyn RandomAccessFile,
    verify_checksums: bool,
    handle: BlockHandle,
) -> Result<Block, TableError> {
    let size = handle.size as usize;
    let raw = file.read_at(handle.offset, size + BLOCK_TRAILER_SIZE)?;

    if verify_checksums {
        let expected = checksum::unmask(decode_fixed32(&raw[size + 1..]));
        let actual = checksum::value(&raw[..size + 1]);
        if actual != expected {
            return Err(TableError::Corruption(
                "block checksum mismatch".to_string(),
            ));
        }
    }

    let contents = match CompressionType::from_u8(raw[size]) {
        Some(CompressionType::None) => raw[..size].to_vec(),
        Some(CompressionType::Snappy) => snap::raw::Decoder::new()
            .decompress_vec(&raw[..size])
            .map_err(|err| {
                TableError::Corruption(format!("corrupted snappy block: {err}"))
            })?,
        None => {
            return Err(TableError::Corruption(format!(
                "unknown block compression tag {}",
                raw[size]
            )));
        }
    };

    Block::new(contents)
}

// ------------------------------------------------------------------------------------------------
// Block cache
// ------------------------------------------------------------------------------------------------

/// Uncompressed blocks, shared across every open table.
///
/// Keyed by `(table cache id, block offset)`: cache ids are allocated per
/// opened table so that reopening a recycled file number cannot alias a
/// stale block.
pub type BlockCache = ShardedCache<(u64, u64), Block>;

// ------------------------------------------------------------------------------------------------
// Table reader
// ------------------------------------------------------------------------------------------------

/// An open, immutable sorted table.
///
/// Thread-safe: the underlying file is random-access and all mutable state
/// lives in the shared block cache.
pub struct Table {
    file: Box<dyn RandomAccessFile>,
    cmp: Arc<dyn Comparator>,
    block_cache: Option<Arc<BlockCache>>,
    cache_id: u64,
    metaindex_handle: BlockHandle,
    index_block: Arc<Block>,
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("cache_id", &self.cache_id)
            .field("metaindex_handle", &self.metaindex_handle)
            .finish_non_exhaustive()
    }
}

impl Table {
    /// Open the table stored in bytes `[0, file_size)` of `file`.
    ///
    /// Reads the footer and index block eagerly; data blocks load on
    /// demand through the block cache.
    pub fn open(
        cmp: Arc<dyn Comparator>,
        block_cache: Option<Arc<BlockCache>>,
        file: Box<dyn RandomAccessFile>,
        file_size: u64,
        verify_checksums: bool,
    ) -> Result<Table, TableError> {
        if (file_size as usize) < FOOTER_SIZE {
            return Err(TableError::Corruption(
                "file is too short to be an sstable".to_string(),
            ));
        }

        let footer_bytes = file.read_at(file_size - FOOTER_SIZE as u64, FOOTER_SIZE)?;
        let footer = Footer::decode(&footer_bytes)?;

        let index_block = read_block(file.as_ref(), verify_checksums, footer.index_handle)?;
        let cache_id = block_cache.as_ref().map_or(0, |cache| cache.new_id());

        Ok(Table {
            file,
            cmp,
            block_cache,
            cache_id,
            metaindex_handle: footer.metaindex_handle,
            index_block: Arc::new(index_block),
        })
    }

    /// Load the data block named by `handle`, through the cache when one is
    /// attached and `options.fill_cache` permits.
    pub(crate) fn block_reader(
        &self,
        options: &ReadOptions,
        handle: BlockHandle,
    ) -> Result<Arc<Block>, TableError> {
        match &self.block_cache {
            Some(cache) => {
                let key = (self.cache_id, handle.offset);
                if let Some(block) = cache.lookup(&key) {
                    return Ok(block);
                }
                let block = Arc::new(read_block(
                    self.file.as_ref(),
                    options.verify_checksums,
                    handle,
                )?);
                if options.fill_cache {
                    cache.insert(key, Arc::clone(&block), block.data_len());
                }
                Ok(block)
            }
            None => Ok(Arc::new(read_block(
                self.file.as_ref(),
                options.verify_checksums,
                handle,
            )?)),
        }
    }

    /// Iterator over every entry in the table, in comparator order.
    pub fn iter(self: &Arc<Self>, options: &ReadOptions) -> TableIterator {
        TableIterator::new(
            Arc::clone(self),
            options.clone(),
            BlockIter::new(Arc::clone(&self.index_block), Arc::clone(&self.cmp)),
        )
    }

    /// Point lookup: the first entry with key ≥ `target`, if the index
    /// places one in this table.
    pub fn internal_get(
        &self,
        options: &ReadOptions,
        target: &[u8],
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>, TableError> {
        let mut index_iter = BlockIter::new(Arc::clone(&self.index_block), Arc::clone(&self.cmp));
        index_iter.seek(target);
        if !index_iter.valid() {
            index_iter.status()?;
            return Ok(None);
        }

        let (handle, _) = BlockHandle::decode_from(index_iter.value())?;
        let block = self.block_reader(options, handle)?;
        let mut block_iter = BlockIter::new(block, Arc::clone(&self.cmp));
        block_iter.seek(target);
        if !block_iter.valid() {
            block_iter.status()?;
            return Ok(None);
        }
        Ok(Some((block_iter.key().to_vec(), block_iter.value().to_vec())))
    }

    /// Approximate file offset where data for `target` begins.
    pub fn approximate_offset_of(&self, target: &[u8]) -> u64 {
        let mut index_iter = BlockIter::new(Arc::clone(&self.index_block), Arc::clone(&self.cmp));
        index_iter.seek(target);
        if index_iter.valid()
            && let Ok((handle, _)) = BlockHandle::decode_from(index_iter.value())
        {
            return handle.offset;
        }
        // Past the last key (or an undecodable entry): everything before
        // the metaindex is data.
        self.metaindex_handle.offset
    }

    pub(crate) fn comparator(&self) -> &Arc<dyn Comparator> {
        &self.cmp
    }
}
