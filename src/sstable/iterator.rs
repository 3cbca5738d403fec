//! Two-level iteration over a table: an index-block cursor whose values
//! open data-block cursors on demand.
//!
//! Only one data block is resident per iterator at a time, so a full-table
//! scan touches each block once and a seek touches exactly one.  Blocks
//! that fail to load poison the iterator's status; iteration then skips to
//! the next loadable block rather than spinning on the bad one.

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::sync::Arc;

use crate::iterator::StorageIterator;
use crate::options::ReadOptions;
use crate::sstable::block::BlockIter;
use crate::sstable::{BlockHandle, Table, TableError};

// ------------------------------------------------------------------------------------------------
// TableIterator
// ------------------------------------------------------------------------------------------------

/// Iterator over every entry of one table.
pub struct TableIterator {
    table: Arc<Table>,
    options: ReadOptions,
    index_iter: BlockIter,
    data_iter: Option<BlockIter>,

    /// Encoded handle of the block `data_iter` reads, to skip a reload when
    /// the index lands on the same block again.
    data_block_handle: Vec<u8>,

    status: Option<TableError>,
}

impl TableIterator {
    pub(crate) fn new(table: Arc<Table>, options: ReadOptions, index_iter: BlockIter) -> TableIterator {
        TableIterator {
            table,
            options,
            index_iter,
            data_iter: None,
            data_block_handle: Vec::new(),
            status: None,
        }
    }

    /// (Re)open the data block the index cursor points at.
    fn init_data_block(&mut self) {
        if !self.index_iter.valid() {
            self.data_iter = None;
            return;
        }
        let handle_bytes = self.index_iter.value();
        if self.data_iter.is_some() && self.data_block_handle == handle_bytes {
            // Already positioned in this block.
            return;
        }

        match BlockHandle::decode_from(handle_bytes)
            .and_then(|(handle, _)| self.table.block_reader(&self.options, handle))
        {
            Ok(block) => {
                self.data_block_handle = self.index_iter.value().to_vec();
                self.data_iter = Some(BlockIter::new(
                    block,
                    Arc::clone(self.table.comparator()),
                ));
            }
            Err(err) => {
                if self.status.is_none() {
                    self.status = Some(err);
                }
                self.data_iter = None;
            }
        }
    }

    fn skip_empty_data_blocks_forward(&mut self) {
        while self.data_iter.as_ref().is_none_or(|it| !it.valid()) {
            if !self.index_iter.valid() {
                self.data_iter = None;
                return;
            }
            self.index_iter.next();
            self.init_data_block();
            if let Some(data_iter) = &mut self.data_iter {
                data_iter.seek_to_first();
            }
        }
    }

    fn skip_empty_data_blocks_backward(&mut self) {
        while self.data_iter.as_ref().is_none_or(|it| !it.valid()) {
            if !self.index_iter.valid() {
                self.data_iter = None;
                return;
            }
            self.index_iter.prev();
            self.init_data_block();
            if let Some(data_iter) = &mut self.data_iter {
                data_iter.seek_to_last();
            }
        }
    }
}

impl StorageIterator for TableIterator {
    fn valid(&self) -> bool {
        self.data_iter.as_ref().is_some_and(|it| it.valid())
    }

    fn seek_to_first(&mut self) {
        self.index_iter.seek_to_first();
        self.init_data_block();
        if let Some(data_iter) = &mut self.data_iter {
            data_iter.seek_to_first();
        }
        self.skip_empty_data_blocks_forward();
    }

    fn seek_to_last(&mut self) {
        self.index_iter.seek_to_last();
        self.init_data_block();
        if let Some(data_iter) = &mut self.data_iter {
            data_iter.seek_to_last();
        }
        self.skip_empty_data_blocks_backward();
    }

    fn seek(&mut self, target: &[u8]) {
        self.index_iter.seek(target);
        self.init_data_block();
        if let Some(data_iter) = &mut self.data_iter {
            data_iter.seek(target);
        }
        self.skip_empty_data_blocks_forward();
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        if let Some(data_iter) = &mut self.data_iter {
            data_iter.next();
        }
        self.skip_empty_data_blocks_forward();
    }

    fn prev(&mut self) {
        debug_assert!(self.valid());
        if let Some(data_iter) = &mut self.data_iter {
            data_iter.prev();
        }
        self.skip_empty_data_blocks_backward();
    }

    fn key(&self) -> &[u8] {
        self.data_iter
            .as_ref()
            .expect("key() on invalid iterator")
            .key()
    }

    fn value(&self) -> &[u8] {
        self.data_iter
            .as_ref()
            .expect("value() on invalid iterator")
            .value()
    }

    fn status(&self) -> Result<(), TableError> {
        if let Some(err) = &self.status {
            return Err(err.clone());
        }
        self.index_iter.status()?;
        if let Some(data_iter) = &self.data_iter {
            data_iter.status()?;
        }
        Ok(())
    }
}
