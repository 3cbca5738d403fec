//! Prefix-compressed key/value block and its iterator.
//!
//! Entry encoding, relative to the previous entry in the block:
//!
//! ```text
//! entry := varint32(shared) varint32(non_shared) varint32(value_len)
//!          key_delta[non_shared] value[value_len]
//! ```
//!
//! Every `block_restart_interval` entries a **restart point** stores its
//! key in full (`shared == 0`); the offsets of all restart points sit in a
//! fixed32 array at the end of the block, followed by their count:
//!
//! ```text
//! block := entry* restart_offset[num_restarts] fixed32(num_restarts)
//! ```
//!
//! Seeks binary-search the restart array, then decode linearly — at most
//! one restart interval of entries per seek.

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::cmp::Ordering;
use std::sync::Arc;

use crate::encoding::{decode_fixed32, get_varint32};
use crate::keys::Comparator;
use crate::sstable::TableError;

// ------------------------------------------------------------------------------------------------
// Block
// ------------------------------------------------------------------------------------------------

/// An owned, decoded-enough block: raw bytes plus the restart directory
/// bounds, validated at construction.
pub struct Block {
    data: Vec<u8>,
    restart_offset: usize,
    num_restarts: u32,
}

impl Block {
    /// Adopt block contents, validating the restart directory.
    pub fn new(data: Vec<u8>) -> Result<Block, TableError> {
        if data.len() < 4 {
            return Err(TableError::Corruption(
                "block too small for restart count".to_string(),
            ));
        }
        let num_restarts = decode_fixed32(&data[data.len() - 4..]);
        let max_restarts = ((data.len() - 4) / 4) as u32;
        if num_restarts > max_restarts {
            return Err(TableError::Corruption(
                "block restart count exceeds block size".to_string(),
            ));
        }
        let restart_offset = data.len() - 4 - 4 * num_restarts as usize;
        Ok(Block {
            data,
            restart_offset,
            num_restarts,
        })
    }

    /// Bytes of entry data plus the restart directory; the charge a cached
    /// block accounts against the block cache capacity.
    pub fn data_len(&self) -> usize {
        self.data.len()
    }

    fn restart_point(&self, index: u32) -> usize {
        debug_assert!(index < self.num_restarts);
        let at = self.restart_offset + 4 * index as usize;
        decode_fixed32(&self.data[at..]) as usize
    }
}

// ------------------------------------------------------------------------------------------------
// Block iterator
// ------------------------------------------------------------------------------------------------

/// Cursor over one block.  Holds the block via `Arc`, so cached blocks stay
/// alive for as long as any iterator reads them.
pub struct BlockIter {
    block: Arc<Block>,
    cmp: Arc<dyn Comparator>,

    /// Offset of the current entry, or `restart_offset` when invalid.
    current: usize,

    /// Restart block containing the current entry.
    restart_index: u32,

    /// Materialised key of the current entry (delta-decoded).
    key: Vec<u8>,

    /// Value bounds of the current entry within the block data.
    value_range: (usize, usize),

    status: Option<TableError>,
}

impl BlockIter {
    pub fn new(block: Arc<Block>, cmp: Arc<dyn Comparator>) -> BlockIter {
        let restart_offset = block.restart_offset;
        BlockIter {
            block,
            cmp,
            current: restart_offset,
            restart_index: 0,
            key: Vec::new(),
            value_range: (0, 0),
            status: None,
        }
    }

    pub fn valid(&self) -> bool {
        self.current < self.block.restart_offset
    }

    pub fn status(&self) -> Result<(), TableError> {
        match &self.status {
            None => Ok(()),
            Some(err) => Err(err.clone()),
        }
    }

    pub fn key(&self) -> &[u8] {
        debug_assert!(self.valid());
        &self.key
    }

    pub fn value(&self) -> &[u8] {
        debug_assert!(self.valid());
        &self.block.data[self.value_range.0..self.value_range.1]
    }

    pub fn seek_to_first(&mut self) {
        if self.block.num_restarts == 0 {
            self.mark_invalid();
            return;
        }
        self.seek_to_restart_point(0);
        self.parse_next_key();
    }

    pub fn seek_to_last(&mut self) {
        if self.block.num_restarts == 0 {
            self.mark_invalid();
            return;
        }
        self.seek_to_restart_point(self.block.num_restarts - 1);
        while self.parse_next_key() && self.next_entry_offset() < self.block.restart_offset {
            // Keep advancing to the last entry of the final restart run.
        }
    }

    /// Position at the first entry with key ≥ `target`.
    pub fn seek(&mut self, target: &[u8]) {
        if self.block.num_restarts == 0 {
            self.mark_invalid();
            return;
        }

        // Binary search the restart array for the last restart whose key is
        // strictly less than the target.
        let mut left: u32 = 0;
        let mut right: u32 = self.block.num_restarts - 1;
        while left < right {
            let mid = left + (right - left + 1) / 2;
            let region_offset = self.block.restart_point(mid);
            let Some((shared, non_shared, _value_len, key_offset)) =
                decode_entry_header(&self.block.data, region_offset, self.block.restart_offset)
            else {
                self.corruption();
                return;
            };
            if shared != 0 {
                // Restart points always store their key in full.
                self.corruption();
                return;
            }
            let mid_key = &self.block.data[key_offset..key_offset + non_shared];
            if self.cmp.compare(mid_key, target) == Ordering::Less {
                left = mid;
            } else {
                right = mid - 1;
            }
        }

        // Linear scan from that restart to the first entry ≥ target.
        self.seek_to_restart_point(left);
        loop {
            if !self.parse_next_key() {
                return;
            }
            if self.cmp.compare(&self.key, target) != Ordering::Less {
                return;
            }
        }
    }

    pub fn next(&mut self) {
        debug_assert!(self.valid());
        self.parse_next_key();
    }

    pub fn prev(&mut self) {
        debug_assert!(self.valid());

        // Back up to the restart point strictly before the current entry,
        // then walk forward to the entry preceding it.
        let original = self.current;
        while self.block.restart_point(self.restart_index) >= original {
            if self.restart_index == 0 {
                self.mark_invalid();
                return;
            }
            self.restart_index -= 1;
        }

        self.seek_to_restart_point(self.restart_index);
        while self.parse_next_key() && self.next_entry_offset() < original {
            // Walk to the entry just before `original`.
        }
    }

    // --------------------------------------------------------------------------------------------
    // Decoding internals
    // --------------------------------------------------------------------------------------------

    #[inline]
    fn next_entry_offset(&self) -> usize {
        self.value_range.1
    }

    fn seek_to_restart_point(&mut self, index: u32) {
        self.key.clear();
        self.restart_index = index;
        // `parse_next_key` starts from the end of the "previous" value.
        let offset = self.block.restart_point(index);
        self.value_range = (offset, offset);
    }

    fn mark_invalid(&mut self) {
        self.current = self.block.restart_offset;
        self.restart_index = self.block.num_restarts;
    }

    fn corruption(&mut self) {
        self.mark_invalid();
        self.key.clear();
        if self.status.is_none() {
            self.status = Some(TableError::Corruption(
                "bad entry in block".to_string(),
            ));
        }
    }

    /// Decode the entry at `next_entry_offset`, or invalidate at block end.
    fn parse_next_key(&mut self) -> bool {
        self.current = self.next_entry_offset();
        if self.current >= self.block.restart_offset {
            // No more entries.
            self.mark_invalid();
            return false;
        }

        let Some((shared, non_shared, value_len, key_offset)) =
            decode_entry_header(&self.block.data, self.current, self.block.restart_offset)
        else {
            self.corruption();
            return false;
        };
        if self.key.len() < shared {
            self.corruption();
            return false;
        }

        self.key.truncate(shared);
        self.key
            .extend_from_slice(&self.block.data[key_offset..key_offset + non_shared]);
        self.value_range = (key_offset + non_shared, key_offset + non_shared + value_len);

        // Track which restart run the cursor is in.
        while self.restart_index + 1 < self.block.num_restarts
            && self.block.restart_point(self.restart_index + 1) < self.current
        {
            self.restart_index += 1;
        }
        true
    }
}

/// Decode `(shared, non_shared, value_len)` at `offset`, bounds-checked
/// against `limit`.  Returns the offset of the key delta bytes.
fn decode_entry_header(
    data: &[u8],
    offset: usize,
    limit: usize,
) -> Option<(usize, usize, usize, usize)> {
    let mut at = offset;
    let read_varint = |at: &mut usize| -> Option<u32> {
        if *at >= limit {
            return None;
        }
        let (v, n) = get_varint32(&data[*at..limit]).ok()?;
        *at += n;
        Some(v)
    };
    let shared = read_varint(&mut at)? as usize;
    let non_shared = read_varint(&mut at)? as usize;
    let value_len = read_varint(&mut at)? as usize;
    if at + non_shared + value_len > limit {
        return None;
    }
    Some((shared, non_shared, value_len, at))
}
