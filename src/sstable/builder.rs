//! Table construction: block building, compression, and file assembly.
//!
//! [`TableBuilder`] consumes a strictly ascending stream of internal-key /
//! value pairs and writes the full table layout described in the module
//! docs of [`crate::sstable`].  Index entries use shortened separators so
//! the index block stays small: after each data block is cut, the entry key
//! is the shortest string ≥ every key in the block and < the first key of
//! the next.

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::cmp::Ordering;
use std::sync::Arc;

use crate::checksum;
use crate::encoding::{put_fixed32, put_varint32};
use crate::env::WritableFile;
use crate::keys::Comparator;
use crate::options::{CompressionType, DbConfig};
use crate::sstable::{BLOCK_TRAILER_SIZE, BlockHandle, Footer, TableError};

// ------------------------------------------------------------------------------------------------
// BlockBuilder
// ------------------------------------------------------------------------------------------------

/// Accumulates prefix-compressed entries for one block.
pub struct BlockBuilder {
    restart_interval: usize,
    buffer: Vec<u8>,
    restarts: Vec<u32>,

    /// Entries since the last restart point.
    counter: usize,
    finished: bool,
    last_key: Vec<u8>,
}

impl BlockBuilder {
    pub fn new(restart_interval: usize) -> BlockBuilder {
        debug_assert!(restart_interval >= 1);
        BlockBuilder {
            restart_interval,
            buffer: Vec::new(),
            restarts: vec![0],
            counter: 0,
            finished: false,
            last_key: Vec::new(),
        }
    }

    /// Append an entry. Keys must arrive in strictly ascending order.
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        debug_assert!(!self.finished);
        debug_assert!(self.counter <= self.restart_interval);

        let mut shared = 0;
        if self.counter < self.restart_interval {
            // Share a prefix with the previous entry.
            let max = self.last_key.len().min(key.len());
            while shared < max && self.last_key[shared] == key[shared] {
                shared += 1;
            }
        } else {
            // Restart point: store the key in full.
            self.restarts.push(self.buffer.len() as u32);
            self.counter = 0;
        }
        let non_shared = key.len() - shared;

        put_varint32(&mut self.buffer, shared as u32);
        put_varint32(&mut self.buffer, non_shared as u32);
        put_varint32(&mut self.buffer, value.len() as u32);
        self.buffer.extend_from_slice(&key[shared..]);
        self.buffer.extend_from_slice(value);

        self.last_key.truncate(shared);
        self.last_key.extend_from_slice(&key[shared..]);
        debug_assert_eq!(self.last_key, key);
        self.counter += 1;
    }

    /// Append the restart directory and return the finished block bytes.
    pub fn finish(&mut self) -> &[u8] {
        for &restart in &self.restarts {
            put_fixed32(&mut self.buffer, restart);
        }
        put_fixed32(&mut self.buffer, self.restarts.len() as u32);
        self.finished = true;
        &self.buffer
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.restarts.clear();
        self.restarts.push(0);
        self.counter = 0;
        self.finished = false;
        self.last_key.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Uncompressed size of the block if finished now.
    pub fn current_size_estimate(&self) -> usize {
        self.buffer.len() + self.restarts.len() * 4 + 4
    }
}

// ------------------------------------------------------------------------------------------------
// TableBuilder
// ------------------------------------------------------------------------------------------------

/// Builds one table file from ascending entries.
///
/// The caller owns file sync and close; [`TableBuilder::finish`] flushes
/// the builder's buffered bytes but deliberately does not fsync, because
/// compaction outputs sync once at the end.
pub struct TableBuilder {
    cmp: Arc<dyn Comparator>,
    compression: CompressionType,
    block_size: usize,

    file: Box<dyn WritableFile>,
    offset: u64,
    num_entries: u64,
    closed: bool,

    data_block: BlockBuilder,
    index_block: BlockBuilder,
    last_key: Vec<u8>,

    /// Handle of the last cut data block, awaiting its index entry.  The
    /// entry is deferred until the next key arrives so the separator can be
    /// shortened against it.
    pending_handle: Option<BlockHandle>,
}

impl TableBuilder {
    pub fn new(config: &DbConfig, cmp: Arc<dyn Comparator>, file: Box<dyn WritableFile>) -> TableBuilder {
        TableBuilder {
            cmp,
            compression: config.compression,
            block_size: config.block_size,
            file,
            offset: 0,
            num_entries: 0,
            closed: false,
            data_block: BlockBuilder::new(config.block_restart_interval),
            index_block: BlockBuilder::new(1),
            last_key: Vec::new(),
            pending_handle: None,
        }
    }

    /// Append an entry. `key` must order after every previously added key.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<(), TableError> {
        debug_assert!(!self.closed);
        debug_assert!(
            self.num_entries == 0 || self.cmp.compare(key, &self.last_key) == Ordering::Greater,
            "table keys must be strictly ascending"
        );

        if let Some(handle) = self.pending_handle.take() {
            // First key after a block cut: emit the deferred index entry
            // with a separator shortened against this key.
            let mut separator = std::mem::take(&mut self.last_key);
            self.cmp.find_shortest_separator(&mut separator, key);
            self.index_block.add(&separator, &handle.encoded());
        }

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.num_entries += 1;
        self.data_block.add(key, value);

        if self.data_block.current_size_estimate() >= self.block_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Cut the current data block even if undersized.
    pub fn flush(&mut self) -> Result<(), TableError> {
        debug_assert!(!self.closed);
        if self.data_block.is_empty() {
            return Ok(());
        }
        debug_assert!(self.pending_handle.is_none());

        let handle = Self::write_block(
            &mut self.file,
            &mut self.offset,
            self.compression,
            &mut self.data_block,
        )?;
        self.pending_handle = Some(handle);
        self.file.flush()?;
        Ok(())
    }

    /// Write the metaindex and index blocks plus the footer.
    ///
    /// The file is flushed but not synced; callers decide durability.
    pub fn finish(&mut self) -> Result<(), TableError> {
        self.flush()?;
        debug_assert!(!self.closed);
        self.closed = true;

        // Metaindex: present for format compatibility, currently empty.
        let mut metaindex_block = BlockBuilder::new(1);
        let metaindex_handle = Self::write_block(
            &mut self.file,
            &mut self.offset,
            self.compression,
            &mut metaindex_block,
        )?;

        if let Some(handle) = self.pending_handle.take() {
            // The table ends after this block: any short successor of its
            // last key works as the final index entry.
            let mut separator = std::mem::take(&mut self.last_key);
            self.cmp.find_short_successor(&mut separator);
            self.index_block.add(&separator, &handle.encoded());
        }
        let index_handle = Self::write_block(
            &mut self.file,
            &mut self.offset,
            self.compression,
            &mut self.index_block,
        )?;

        let footer = Footer {
            metaindex_handle,
            index_handle,
        };
        let encoded = footer.encode();
        self.file.append(&encoded)?;
        self.offset += encoded.len() as u64;
        self.file.flush()?;
        Ok(())
    }

    /// Discard the build; the half-written file is the caller's to delete.
    pub fn abandon(&mut self) {
        debug_assert!(!self.closed);
        self.closed = true;
    }

    /// Fsync the output file; called once after [`TableBuilder::finish`].
    pub fn sync(&mut self) -> Result<(), TableError> {
        self.file.sync()?;
        Ok(())
    }

    pub fn num_entries(&self) -> u64 {
        self.num_entries
    }

    /// Bytes written so far; after [`TableBuilder::finish`], the final file
    /// size.
    pub fn file_size(&self) -> u64 {
        self.offset
    }

    // --------------------------------------------------------------------------------------------
    // Block output
    // --------------------------------------------------------------------------------------------

    fn write_block(
        file: &mut Box<dyn WritableFile>,
        offset: &mut u64,
        compression: CompressionType,
        block: &mut BlockBuilder,
    ) -> Result<BlockHandle, TableError> {
        let raw = block.finish();

        // Compress, falling back to raw storage unless the codec saves at
        // least 1/8th — tiny savings are not worth the decompression cost.
        let mut compressed = None;
        let block_type = match compression {
            CompressionType::None => CompressionType::None,
            CompressionType::Snappy => match snap::raw::Encoder::new().compress_vec(raw) {
                Ok(output) if output.len() < raw.len() - raw.len() / 8 => {
                    compressed = Some(output);
                    CompressionType::Snappy
                }
                _ => CompressionType::None,
            },
        };

        let contents: &[u8] = compressed.as_deref().unwrap_or(raw);
        let handle = Self::write_raw_block(file, offset, contents, block_type)?;
        block.reset();
        Ok(handle)
    }

    fn write_raw_block(
        file: &mut Box<dyn WritableFile>,
        offset: &mut u64,
        contents: &[u8],
        block_type: CompressionType,
    ) -> Result<BlockHandle, TableError> {
        let handle = BlockHandle::new(*offset, contents.len() as u64);
        file.append(contents)?;

        let mut trailer = Vec::with_capacity(BLOCK_TRAILER_SIZE);
        trailer.push(block_type as u8);
        let crc = checksum::extend(checksum::value(contents), &[block_type as u8]);
        put_fixed32(&mut trailer, checksum::mask(crc));
        file.append(&trailer)?;

        *offset += (contents.len() + BLOCK_TRAILER_SIZE) as u64;
        Ok(handle)
    }
}
