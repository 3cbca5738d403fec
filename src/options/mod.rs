//! Engine configuration and per-operation option structs.
//!
//! [`DbConfig`] is passed to [`Engine::open`](crate::engine::Engine::open)
//! and fixes the on-disk knobs for the lifetime of the instance.
//! [`ReadOptions`] / [`WriteOptions`] tune individual operations.

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::sync::Arc;

use crate::env::{Env, StdEnv};
use crate::keys::{BytewiseComparator, Comparator};
use crate::snapshot::Snapshot;

// ------------------------------------------------------------------------------------------------
// Compression selector
// ------------------------------------------------------------------------------------------------

/// Per-block compression applied by the table builder.
///
/// The engine only dispatches on the stored tag; the codec itself is an
/// opaque compress/decompress pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompressionType {
    /// Store block bytes verbatim.
    None = 0,

    /// Snappy framing-free block compression.  The builder falls back to
    /// [`CompressionType::None`] when compression does not shrink the block.
    Snappy = 1,
}

impl CompressionType {
    /// Decode a block-trailer tag. Unknown tags mean a corrupt table.
    pub fn from_u8(byte: u8) -> Option<CompressionType> {
        match byte {
            0 => Some(CompressionType::None),
            1 => Some(CompressionType::Snappy),
            _ => None,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Engine configuration
// ------------------------------------------------------------------------------------------------

/// Configuration for an [`Engine`](crate::engine::Engine) instance.
///
/// Controls memtable sizing, table file layout, cache capacities, and the
/// pluggable comparator / environment seams. Passed to `Engine::open`.
#[derive(Clone)]
pub struct DbConfig {
    /// User-key ordering. Persisted by name in the manifest; reopening with
    /// a differently-named comparator fails.
    pub comparator: Arc<dyn Comparator>,

    /// Filesystem / locking seam. Tests may interpose; production uses
    /// [`StdEnv`].
    pub env: Arc<dyn Env>,

    /// Max memtable size (bytes) before rotation to the immutable table.
    pub write_buffer_size: usize,

    /// Max number of open table files held by the table cache.
    pub max_open_files: usize,

    /// Target uncompressed size (bytes) of a table data block.
    pub block_size: usize,

    /// Number of entries between restart points in a data block.
    pub block_restart_interval: usize,

    /// Size (bytes) at which a compaction output file is rolled.
    pub max_file_size: u64,

    /// Per-block compression codec.
    pub compression: CompressionType,

    /// Capacity (bytes of uncompressed block data) of the shared block cache.
    pub block_cache_capacity: usize,

    /// When true, recovery and iteration treat any detected corruption as
    /// fatal instead of skipping the damaged tail.
    pub paranoid_checks: bool,
}

impl Default for DbConfig {
    fn default() -> DbConfig {
        DbConfig {
            comparator: Arc::new(BytewiseComparator),
            env: Arc::new(StdEnv),
            write_buffer_size: 4 * 1024 * 1024,
            max_open_files: 1000,
            block_size: 4 * 1024,
            block_restart_interval: 16,
            max_file_size: 2 * 1024 * 1024,
            compression: CompressionType::Snappy,
            block_cache_capacity: 8 * 1024 * 1024,
            paranoid_checks: false,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Per-operation options
// ------------------------------------------------------------------------------------------------

/// Options for read operations (`get`, iterators).
#[derive(Clone)]
pub struct ReadOptions {
    /// Re-verify block checksums on every read, not just on open.
    pub verify_checksums: bool,

    /// When false, blocks read by this operation bypass the block cache —
    /// used by bulk scans (compaction) to avoid cache wipeout.
    pub fill_cache: bool,

    /// Read as of this snapshot instead of the current state.
    pub snapshot: Option<Snapshot>,
}

impl Default for ReadOptions {
    /// Defaults for user-facing reads: cache-filling, no re-verification.
    fn default() -> ReadOptions {
        ReadOptions {
            verify_checksums: false,
            fill_cache: true,
            snapshot: None,
        }
    }
}

impl ReadOptions {
    pub fn new() -> ReadOptions {
        ReadOptions::default()
    }
}

/// Options for write operations (`put`, `delete`, `write`).
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Fsync the write-ahead log before acknowledging the write. Without
    /// this, a machine crash may drop the most recent writes (process
    /// crashes lose nothing either way).
    pub sync: bool,
}
