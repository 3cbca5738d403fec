//! Fixtures for version-layer tests.

use std::path::Path;
use std::sync::Arc;

use crate::engine::table_cache::TableCache;
use crate::keys::{
    BytewiseComparator, InternalKey, InternalKeyComparator, MAX_SEQUENCE, RecordKind,
};
use crate::options::DbConfig;
use crate::version::set::VersionSet;
use crate::version::{FileMetaData, Version};

pub fn icmp() -> InternalKeyComparator {
    InternalKeyComparator::new(Arc::new(BytewiseComparator))
}

/// Internal key at a fixed sequence, convenient for building file bounds.
pub fn ikey(user_key: &[u8], sequence: u64) -> InternalKey {
    InternalKey::new(user_key, sequence, RecordKind::Value)
}

/// A file covering `[smallest, largest]` user keys.
pub fn file(number: u64, smallest: &[u8], largest: &[u8]) -> Arc<FileMetaData> {
    Arc::new(FileMetaData::new(
        number,
        1000,
        ikey(smallest, MAX_SEQUENCE),
        ikey(largest, 1),
    ))
}

/// A version with the given files placed at one level.
pub fn version_with_level(level: usize, files: Vec<Arc<FileMetaData>>) -> Version {
    let mut version = Version::empty();
    version.files[level] = files;
    version
}

pub fn version_set(db_path: &Path) -> VersionSet {
    let config = DbConfig::default();
    let cmp = icmp();
    let table_cache = Arc::new(TableCache::new(
        db_path.to_path_buf(),
        &config,
        Arc::new(cmp.clone()),
        100,
    ));
    VersionSet::new(db_path.to_path_buf(), &config, cmp, table_cache)
}
