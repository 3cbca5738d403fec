//! Table-building fixtures shared by the sstable tests.

use std::path::Path;
use std::sync::Arc;

use crate::cache::ShardedCache;
use crate::env::{Env, StdEnv};
use crate::keys::BytewiseComparator;
use crate::options::{CompressionType, DbConfig};
use crate::sstable::builder::TableBuilder;
use crate::sstable::{BlockCache, Table};

/// Config with a tiny block size so small tests span many blocks.
pub fn small_block_config(compression: CompressionType) -> DbConfig {
    DbConfig {
        block_size: 64,
        block_restart_interval: 4,
        compression,
        ..DbConfig::default()
    }
}

/// Build a table at `path` from pre-sorted `(key, value)` pairs.
pub fn build_table(path: &Path, config: &DbConfig, entries: &[(Vec<u8>, Vec<u8>)]) {
    let file = StdEnv.new_writable_file(path).unwrap();
    let mut builder = TableBuilder::new(config, Arc::new(BytewiseComparator), file);
    for (key, value) in entries {
        builder.add(key, value).unwrap();
    }
    builder.finish().unwrap();
    assert_eq!(builder.num_entries(), entries.len() as u64);
}

/// Open the table at `path`, optionally with a block cache.
pub fn open_table(path: &Path, cache: Option<Arc<BlockCache>>) -> Arc<Table> {
    let size = StdEnv.file_size(path).unwrap();
    let file = StdEnv.new_random_access_file(path).unwrap();
    Arc::new(Table::open(Arc::new(BytewiseComparator), cache, file, size, true).unwrap())
}

/// A deterministic sorted key/value corpus.
pub fn corpus(n: usize) -> Vec<(Vec<u8>, Vec<u8>)> {
    (0..n)
        .map(|i| {
            (
                format!("key{i:06}").into_bytes(),
                format!("value-{i}-{}", "x".repeat(i % 37)).into_bytes(),
            )
        })
        .collect()
}

pub fn block_cache(capacity: usize) -> Arc<BlockCache> {
    Arc::new(ShardedCache::new(capacity))
}
