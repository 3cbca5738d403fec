//! Cache of open table handles, keyed by file number.
//!
//! Opening a table costs a footer read plus an index-block decode; the
//! engine touches the same handful of files over and over, so handles are
//! kept in a [`ShardedCache`] charged one unit each, capped below
//! `max_open_files`.  Evicted handles close (drop their mmap) once the last
//! iterator using them finishes.

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::path::PathBuf;
use std::sync::Arc;

use crate::cache::ShardedCache;
use crate::env::Env;
use crate::iterator::{EmptyIterator, StorageIterator};
use crate::keys::Comparator;
use crate::options::{DbConfig, ReadOptions};
use crate::sstable::{BlockCache, Table, TableError};

use super::files::table_file_name;

// ------------------------------------------------------------------------------------------------
// TableCache
// ------------------------------------------------------------------------------------------------

pub(crate) struct TableCache {
    env: Arc<dyn Env>,
    db_path: PathBuf,
    cmp: Arc<dyn Comparator>,
    cache: ShardedCache<u64, Table>,
    block_cache: Arc<BlockCache>,
    paranoid_checks: bool,
}

impl TableCache {
    pub(crate) fn new(
        db_path: PathBuf,
        config: &DbConfig,
        cmp: Arc<dyn Comparator>,
        entries: usize,
    ) -> TableCache {
        TableCache {
            env: Arc::clone(&config.env),
            db_path,
            cmp,
            cache: ShardedCache::new(entries),
            block_cache: Arc::new(ShardedCache::new(config.block_cache_capacity)),
            paranoid_checks: config.paranoid_checks,
        }
    }

    /// The table handle for `file_number`, opening the file on a miss.
    pub(crate) fn find_table(
        &self,
        file_number: u64,
        file_size: u64,
    ) -> Result<Arc<Table>, TableError> {
        if let Some(table) = self.cache.lookup(&file_number) {
            return Ok(table);
        }

        let path = table_file_name(&self.db_path, file_number);
        let file = self.env.new_random_access_file(&path)?;
        let table = Arc::new(Table::open(
            Arc::clone(&self.cmp),
            Some(Arc::clone(&self.block_cache)),
            file,
            file_size,
            self.paranoid_checks,
        )?);
        self.cache.insert(file_number, Arc::clone(&table), 1);
        Ok(table)
    }

    /// Iterator over the whole table; a failed open yields an iterator that
    /// carries the error in its status.
    pub(crate) fn iter(
        &self,
        options: &ReadOptions,
        file_number: u64,
        file_size: u64,
    ) -> Box<dyn StorageIterator> {
        match self.find_table(file_number, file_size) {
            Ok(table) => Box::new(table.iter(options)),
            Err(err) => Box::new(EmptyIterator::with_error(err)),
        }
    }

    /// Point lookup inside one table.
    pub(crate) fn get(
        &self,
        options: &ReadOptions,
        file_number: u64,
        file_size: u64,
        target: &[u8],
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>, TableError> {
        let table = self.find_table(file_number, file_size)?;
        table.internal_get(options, target)
    }

    /// Approximate in-file offset of `target`, 0 when the table cannot open.
    pub(crate) fn approximate_offset_of(
        &self,
        file_number: u64,
        file_size: u64,
        target: &[u8],
    ) -> u64 {
        self.find_table(file_number, file_size)
            .map(|table| table.approximate_offset_of(target))
            .unwrap_or(0)
    }

    /// Drop the handle for a deleted file.
    pub(crate) fn evict(&self, file_number: u64) {
        self.cache.erase(&file_number);
    }
}
