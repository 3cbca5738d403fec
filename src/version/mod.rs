//! # Versions, Edits, and the Manifest
//!
//! The engine's on-disk state is a set of table files arranged in levels.
//! A [`Version`] is one immutable snapshot of that arrangement; the
//! [`VersionSet`](set::VersionSet) owns the current version, the shared
//! counters (file numbers, last sequence), and the manifest log through
//! which every change is made durable **before** it becomes visible.
//!
//! ## Level invariants
//!
//! - Level 0 files may overlap each other; they are searched newest-first.
//! - Every level ≥ 1 holds files sorted by smallest key and pairwise
//!   disjoint, so one binary search finds the only candidate file.
//!
//! ## Lifetimes
//!
//! Versions are shared via `Arc`: iterators and running compactions pin
//! the version they started from, and table files stay on disk while any
//! live version references them.  The version set keeps a weak registry of
//! handed-out versions so the obsolete-file sweep can compute the union of
//! files any reader might still touch — reference counts plus a sweep,
//! never a cyclic graph.

// ------------------------------------------------------------------------------------------------
// Sub-modules
// ------------------------------------------------------------------------------------------------

pub(crate) mod edit;
pub(crate) mod set;

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::cmp::Ordering;
use std::io;
use std::sync::Arc;
use std::sync::atomic::AtomicI64;

use thiserror::Error;

use crate::engine::table_cache::TableCache;
use crate::iterator::StorageIterator;
use crate::keys::{
    Comparator, InternalKey, InternalKeyComparator, KIND_FOR_SEEK, LookupKey, MAX_SEQUENCE,
    RecordKind, parse_internal_key,
};
use crate::options::ReadOptions;
use crate::sstable::TableError;

// ------------------------------------------------------------------------------------------------
// Level constants
// ------------------------------------------------------------------------------------------------

/// Number of levels in the tree.
pub(crate) const NUM_LEVELS: usize = 7;

/// Level-0 file count that triggers a compaction.
pub(crate) const L0_COMPACTION_TRIGGER: usize = 4;

/// Level-0 file count at which writers are briefly delayed.
pub(crate) const L0_SLOWDOWN_WRITES_TRIGGER: usize = 8;

/// Level-0 file count at which writers stop until compaction catches up.
pub(crate) const L0_STOP_WRITES_TRIGGER: usize = 12;

/// Highest level a fresh memtable flush may be placed at when nothing
/// overlaps it.
pub(crate) const MAX_MEM_COMPACT_LEVEL: usize = 2;

/// Byte budgets: level L ≥ 1 holds at most `10^L · 10 MiB`.
pub(crate) fn max_bytes_for_level(level: usize) -> f64 {
    let mut result = 10.0 * 1048576.0;
    let mut level = level;
    while level > 1 {
        result *= 10.0;
        level -= 1;
    }
    result
}

/// A compaction output may overlap at most this many grandparent bytes.
pub(crate) fn max_grandparent_overlap_bytes(max_file_size: u64) -> u64 {
    10 * max_file_size
}

/// Cap on the total size of an expanded compaction's inputs.
pub(crate) fn expanded_compaction_byte_size_limit(max_file_size: u64) -> u64 {
    25 * max_file_size
}

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors from manifest handling and versioned reads.
#[derive(Debug, Error)]
pub enum VersionError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Manifest log append/sync failure.
    #[error("WAL error: {0}")]
    Wal(#[from] crate::wal::WalError),

    /// Table read failure during a versioned operation.
    #[error(transparent)]
    Table(#[from] TableError),

    /// The manifest, CURRENT file, or an edit record is malformed.
    #[error("Corruption: {0}")]
    Corruption(String),

    /// The database was created with a differently-named comparator.
    #[error("Invalid argument: {0}")]
    ComparatorMismatch(String),
}

// ------------------------------------------------------------------------------------------------
// FileMetaData
// ------------------------------------------------------------------------------------------------

/// One table file and its key coverage.
#[derive(Debug)]
pub(crate) struct FileMetaData {
    pub number: u64,
    pub file_size: u64,
    pub smallest: InternalKey,
    pub largest: InternalKey,

    /// Read-miss budget.  Seeks that consult this file without finding
    /// their key decrement it; at zero the file becomes a compaction
    /// candidate, bounding wasted probes into cold overlapping files.
    pub allowed_seeks: AtomicI64,
}

impl FileMetaData {
    pub fn new(number: u64, file_size: u64, smallest: InternalKey, largest: InternalKey) -> FileMetaData {
        // One seek costs about as much as reading 16 KiB; a file earns a
        // proportional budget, floored so tiny files are not churned.
        let allowed_seeks = (file_size / 16384).max(100) as i64;
        FileMetaData {
            number,
            file_size,
            smallest,
            largest,
            allowed_seeks: AtomicI64::new(allowed_seeks),
        }
    }
}

/// Sum of the sizes of `files`.
pub(crate) fn total_file_size(files: &[Arc<FileMetaData>]) -> u64 {
    files.iter().map(|f| f.file_size).sum()
}

// ------------------------------------------------------------------------------------------------
// File searching
// ------------------------------------------------------------------------------------------------

/// Index of the first file whose largest key is ≥ `target`; `files.len()`
/// when every file ends before it.  Requires sorted, disjoint `files`.
pub(crate) fn find_file(
    icmp: &InternalKeyComparator,
    files: &[Arc<FileMetaData>],
    target: &[u8],
) -> usize {
    files.partition_point(|f| icmp.compare(f.largest.encoded(), target) == Ordering::Less)
}

fn after_file(ucmp: &Arc<dyn Comparator>, user_key: Option<&[u8]>, file: &FileMetaData) -> bool {
    user_key.is_some_and(|key| ucmp.compare(key, file.largest.user_key()) == Ordering::Greater)
}

fn before_file(ucmp: &Arc<dyn Comparator>, user_key: Option<&[u8]>, file: &FileMetaData) -> bool {
    user_key.is_some_and(|key| ucmp.compare(key, file.smallest.user_key()) == Ordering::Less)
}

/// Does any file overlap the user-key range `[smallest, largest]`?
/// `None` bounds extend to infinity on that side.
pub(crate) fn some_file_overlaps_range(
    icmp: &InternalKeyComparator,
    disjoint_sorted_files: bool,
    files: &[Arc<FileMetaData>],
    smallest_user_key: Option<&[u8]>,
    largest_user_key: Option<&[u8]>,
) -> bool {
    let ucmp = icmp.user_comparator();
    if !disjoint_sorted_files {
        // Level 0: check every file.
        return files.iter().any(|f| {
            !(after_file(ucmp, smallest_user_key, f) || before_file(ucmp, largest_user_key, f))
        });
    }

    // Binary search for the first file that might contain `smallest`.
    let index = match smallest_user_key {
        Some(key) => {
            let probe = InternalKey::new(key, MAX_SEQUENCE, KIND_FOR_SEEK);
            find_file(icmp, files, probe.encoded())
        }
        None => 0,
    };
    if index >= files.len() {
        return false;
    }
    !before_file(ucmp, largest_user_key, &files[index])
}

// ------------------------------------------------------------------------------------------------
// Version
// ------------------------------------------------------------------------------------------------

/// Result of a versioned point lookup.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum VersionGet {
    Value(Vec<u8>),
    Deleted,
    NotFound,
}

/// Charge information from a lookup: the first file consulted without an
/// answer, when more than one file had to be consulted.
pub(crate) type SeekCharge = Option<(usize, Arc<FileMetaData>)>;

/// Immutable snapshot of the per-level file lists.
pub(crate) struct Version {
    pub(crate) files: [Vec<Arc<FileMetaData>>; NUM_LEVELS],

    /// Level whose size-vs-budget ratio is highest, and that ratio; filled
    /// by `VersionSet::finalize` before the version is installed.
    pub(crate) compaction_level: usize,
    pub(crate) compaction_score: f64,
}

impl Version {
    pub(crate) fn empty() -> Version {
        Version {
            files: Default::default(),
            compaction_level: 0,
            compaction_score: -1.0,
        }
    }

    pub(crate) fn num_files(&self, level: usize) -> usize {
        self.files[level].len()
    }

    /// Look `key` up through the levels, newest-first.
    ///
    /// Also returns the seek-charge candidate so the caller can debit
    /// `allowed_seeks` under its own lock.
    pub(crate) fn get(
        &self,
        options: &ReadOptions,
        key: &LookupKey,
        icmp: &InternalKeyComparator,
        table_cache: &TableCache,
    ) -> Result<(VersionGet, SeekCharge), VersionError> {
        let ucmp = icmp.user_comparator();
        let user_key = key.user_key();
        let internal_key = key.internal_key();

        let mut seek_charge: SeekCharge = None;
        let mut last_file_read: SeekCharge = None;

        // Level 0: overlapping files, newest (highest number) first.
        let mut level0: Vec<&Arc<FileMetaData>> = self.files[0]
            .iter()
            .filter(|f| {
                ucmp.compare(user_key, f.smallest.user_key()) != Ordering::Less
                    && ucmp.compare(user_key, f.largest.user_key()) != Ordering::Greater
            })
            .collect();
        level0.sort_by(|a, b| b.number.cmp(&a.number));

        let mut candidates: Vec<(usize, Arc<FileMetaData>)> = level0
            .into_iter()
            .map(|f| (0usize, Arc::clone(f)))
            .collect();

        // Deeper levels: at most one candidate each.
        for level in 1..NUM_LEVELS {
            let files = &self.files[level];
            if files.is_empty() {
                continue;
            }
            let index = find_file(icmp, files, internal_key);
            if index < files.len() {
                let file = &files[index];
                if ucmp.compare(user_key, file.smallest.user_key()) != Ordering::Less {
                    candidates.push((level, Arc::clone(file)));
                }
            }
        }

        for (level, file) in candidates {
            // Consulting a second file charges the first one consulted.
            if last_file_read.is_some() && seek_charge.is_none() {
                seek_charge = last_file_read.take();
            }
            last_file_read = Some((level, Arc::clone(&file)));

            let found = table_cache.get(options, file.number, file.file_size, internal_key)?;
            let Some((found_key, found_value)) = found else {
                continue;
            };
            let Some(parsed) = parse_internal_key(&found_key) else {
                return Err(VersionError::Corruption(format!(
                    "bad internal key in table {:06}",
                    file.number
                )));
            };
            if ucmp.compare(parsed.user_key, user_key) != Ordering::Equal {
                continue;
            }
            return Ok((
                match parsed.kind {
                    RecordKind::Value => VersionGet::Value(found_value),
                    RecordKind::Deletion => VersionGet::Deleted,
                },
                seek_charge,
            ));
        }

        Ok((VersionGet::NotFound, seek_charge))
    }

    /// True when any file at `level` overlaps `[smallest, largest]`.
    pub(crate) fn overlap_in_level(
        &self,
        icmp: &InternalKeyComparator,
        level: usize,
        smallest_user_key: Option<&[u8]>,
        largest_user_key: Option<&[u8]>,
    ) -> bool {
        some_file_overlaps_range(
            icmp,
            level > 0,
            &self.files[level],
            smallest_user_key,
            largest_user_key,
        )
    }

    /// Deepest level a memtable flush covering `[smallest, largest]` may
    /// land at: push past L0 while nothing overlaps and the grandparent
    /// overlap stays bounded.
    pub(crate) fn pick_level_for_memtable_output(
        &self,
        icmp: &InternalKeyComparator,
        max_file_size: u64,
        smallest_user_key: &[u8],
        largest_user_key: &[u8],
    ) -> usize {
        let mut level = 0;
        if self.overlap_in_level(icmp, 0, Some(smallest_user_key), Some(largest_user_key)) {
            return level;
        }

        let start = InternalKey::new(smallest_user_key, MAX_SEQUENCE, KIND_FOR_SEEK);
        let limit = InternalKey::new(largest_user_key, 0, RecordKind::Deletion);
        while level < MAX_MEM_COMPACT_LEVEL {
            if self.overlap_in_level(
                icmp,
                level + 1,
                Some(smallest_user_key),
                Some(largest_user_key),
            ) {
                break;
            }
            if level + 2 < NUM_LEVELS {
                let overlaps =
                    self.overlapping_inputs(icmp, level + 2, Some(&start), Some(&limit));
                if total_file_size(&overlaps) > max_grandparent_overlap_bytes(max_file_size) {
                    break;
                }
            }
            level += 1;
        }
        level
    }

    /// Files at `level` whose user-key range touches `[begin, end]`.
    ///
    /// At level 0 an overlapping file widens the search range (its own
    /// bounds may pull in further files), so the scan restarts until the
    /// range is stable.
    pub(crate) fn overlapping_inputs(
        &self,
        icmp: &InternalKeyComparator,
        level: usize,
        begin: Option<&InternalKey>,
        end: Option<&InternalKey>,
    ) -> Vec<Arc<FileMetaData>> {
        let ucmp = icmp.user_comparator();
        let mut user_begin = begin.map(|k| k.user_key().to_vec());
        let mut user_end = end.map(|k| k.user_key().to_vec());

        let mut inputs: Vec<Arc<FileMetaData>> = Vec::new();
        let mut i = 0;
        while i < self.files[level].len() {
            let file = &self.files[level][i];
            i += 1;

            let file_start = file.smallest.user_key();
            let file_limit = file.largest.user_key();
            if user_begin
                .as_deref()
                .is_some_and(|b| ucmp.compare(file_limit, b) == Ordering::Less)
            {
                continue; // entirely before the range
            }
            if user_end
                .as_deref()
                .is_some_and(|e| ucmp.compare(file_start, e) == Ordering::Greater)
            {
                continue; // entirely after the range
            }

            inputs.push(Arc::clone(file));
            if level == 0 {
                // Overlapping files: the accepted file may extend the range.
                if let Some(b) = user_begin.as_deref()
                    && ucmp.compare(file_start, b) == Ordering::Less
                {
                    user_begin = Some(file_start.to_vec());
                    inputs.clear();
                    i = 0;
                    continue;
                }
                if let Some(e) = user_end.as_deref()
                    && ucmp.compare(file_limit, e) == Ordering::Greater
                {
                    user_end = Some(file_limit.to_vec());
                    inputs.clear();
                    i = 0;
                }
            }
        }
        inputs
    }

    /// One iterator per L0 file plus one concatenating iterator per deeper
    /// non-empty level.
    pub(crate) fn iterators(
        &self,
        options: &ReadOptions,
        icmp: &InternalKeyComparator,
        table_cache: &Arc<TableCache>,
    ) -> Vec<Box<dyn StorageIterator>> {
        let mut iters: Vec<Box<dyn StorageIterator>> = Vec::new();
        for file in &self.files[0] {
            iters.push(table_cache.iter(options, file.number, file.file_size));
        }
        for level in 1..NUM_LEVELS {
            if !self.files[level].is_empty() {
                iters.push(Box::new(LevelIterator::new(
                    icmp.clone(),
                    self.files[level].clone(),
                    Arc::clone(table_cache),
                    options.clone(),
                )));
            }
        }
        iters
    }
}

// ------------------------------------------------------------------------------------------------
// Level-concatenating iterator
// ------------------------------------------------------------------------------------------------

/// Walks the files of one level ≥ 1 in order, opening each table lazily.
pub(crate) struct LevelIterator {
    icmp: InternalKeyComparator,
    files: Vec<Arc<FileMetaData>>,
    table_cache: Arc<TableCache>,
    options: ReadOptions,

    /// `files.len()` means invalid.
    index: usize,
    data_iter: Option<Box<dyn StorageIterator>>,
    status: Option<TableError>,
}

impl LevelIterator {
    pub(crate) fn new(
        icmp: InternalKeyComparator,
        files: Vec<Arc<FileMetaData>>,
        table_cache: Arc<TableCache>,
        options: ReadOptions,
    ) -> LevelIterator {
        let index = files.len();
        LevelIterator {
            icmp,
            files,
            table_cache,
            options,
            index,
            data_iter: None,
            status: None,
        }
    }

    fn set_file(&mut self, index: usize) {
        self.capture_child_status();
        self.index = index;
        self.data_iter = if index >= self.files.len() {
            None
        } else {
            let file = &self.files[index];
            Some(
                self.table_cache
                    .iter(&self.options, file.number, file.file_size),
            )
        };
    }

    fn capture_child_status(&mut self) {
        if self.status.is_none()
            && let Some(iter) = &self.data_iter
            && let Err(err) = iter.status()
        {
            self.status = Some(err);
        }
    }

    fn skip_forward(&mut self) {
        while self.data_iter.as_ref().is_none_or(|it| !it.valid()) {
            if self.index + 1 >= self.files.len() {
                self.capture_child_status();
                self.index = self.files.len();
                self.data_iter = None;
                return;
            }
            let next = self.index + 1;
            self.set_file(next);
            if let Some(iter) = &mut self.data_iter {
                iter.seek_to_first();
            }
        }
    }

    fn skip_backward(&mut self) {
        while self.data_iter.as_ref().is_none_or(|it| !it.valid()) {
            if self.index == 0 {
                self.capture_child_status();
                self.index = self.files.len();
                self.data_iter = None;
                return;
            }
            let prev = self.index - 1;
            self.set_file(prev);
            if let Some(iter) = &mut self.data_iter {
                iter.seek_to_last();
            }
        }
    }
}

impl StorageIterator for LevelIterator {
    fn valid(&self) -> bool {
        self.data_iter.as_ref().is_some_and(|it| it.valid())
    }

    fn seek_to_first(&mut self) {
        if self.files.is_empty() {
            return;
        }
        self.set_file(0);
        if let Some(iter) = &mut self.data_iter {
            iter.seek_to_first();
        }
        self.skip_forward();
    }

    fn seek_to_last(&mut self) {
        if self.files.is_empty() {
            return;
        }
        self.set_file(self.files.len() - 1);
        if let Some(iter) = &mut self.data_iter {
            iter.seek_to_last();
        }
        self.skip_backward();
    }

    fn seek(&mut self, target: &[u8]) {
        let index = find_file(&self.icmp, &self.files, target);
        if index >= self.files.len() {
            self.index = self.files.len();
            self.data_iter = None;
            return;
        }
        self.set_file(index);
        if let Some(iter) = &mut self.data_iter {
            iter.seek(target);
        }
        self.skip_forward();
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        if let Some(iter) = &mut self.data_iter {
            iter.next();
        }
        self.skip_forward();
    }

    fn prev(&mut self) {
        debug_assert!(self.valid());
        if let Some(iter) = &mut self.data_iter {
            iter.prev();
        }
        self.skip_backward();
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
        if let Some(iter) = &self.data_iter {
            iter.status()?;
        }
        Ok(())
    }
}
