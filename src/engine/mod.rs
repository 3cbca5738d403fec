//! # Storage Engine
//!
//! The public face of the database: open/recover, the write path, point
//! reads, iterators, snapshots, and the hooks that drive compaction.
//!
//! ## Concurrency model
//!
//! One mutex guards all mutable engine state ([`EngineInner`]).  Long I/O
//! never runs under it:
//!
//! - **Writers** queue up under the mutex; the queue head becomes the
//!   *leader*, coalesces the batches behind it, then releases the mutex
//!   while appending to the WAL and inserting into the memtable.  Sequence
//!   numbers are assigned in queue order, so a reader that observes
//!   sequence `s` observes every write at or below `s`.
//! - **Readers** copy out `Arc` handles to the memtables and the current
//!   version, then probe them lock-free.
//! - **One background worker** performs memtable flushes and compactions,
//!   woken over a channel; `bg_finished` waiters (stalled writers, manual
//!   compaction, shutdown) are signalled through a condition variable.
//!
//! ## Durability
//!
//! Every mutation reaches the write-ahead log before the memtable;
//! `WriteOptions::sync` additionally fsyncs before the write is
//! acknowledged.  A WAL or manifest write failure latches a sticky
//! background error: the engine keeps serving reads but refuses writes
//! until reopened, because the log may now disagree with memory.

// ------------------------------------------------------------------------------------------------
// Sub-modules
// ------------------------------------------------------------------------------------------------

pub(crate) mod compaction;
pub(crate) mod files;
pub(crate) mod table_cache;
pub mod visibility;

#[cfg(test)]
mod tests;

pub use visibility::DbIter;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrd};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use crossbeam::channel::{Sender, unbounded};
use thiserror::Error;
use tracing::{info, warn};

use crate::batch::{BATCH_HEADER_SIZE, BatchError, WriteBatch};
use crate::engine::compaction::{CompactionStats, build_table};
use crate::engine::files::{
    FileKind, current_file_name, lock_file_name, log_file_name, parse_file_name, table_file_name,
};
use crate::engine::table_cache::TableCache;
use crate::env::FileLock;
use crate::iterator::{MergingIterator, StorageIterator};
use crate::keys::{
    InternalKey, InternalKeyComparator, KIND_FOR_SEEK, LookupKey, MAX_SEQUENCE, RecordKind,
    SequenceNumber,
};
use crate::memtable::{MemTable, MemTableGet};
use crate::options::{DbConfig, ReadOptions, WriteOptions};
use crate::snapshot::{Snapshot, SnapshotList};
use crate::sstable::TableError;
use crate::version::edit::VersionEdit;
use crate::version::set::VersionSet;
use crate::version::{
    FileMetaData, L0_SLOWDOWN_WRITES_TRIGGER, L0_STOP_WRITES_TRIGGER, NUM_LEVELS, VersionError,
    VersionGet,
};
use crate::wal::{CorruptionReporter, LogReader, LogWriter, WalError};

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors surfaced by engine operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Write-ahead log failure.
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    /// Table build/read failure.
    #[error(transparent)]
    Table(#[from] TableError),

    /// Version/manifest failure.
    #[error(transparent)]
    Version(#[from] VersionError),

    /// Malformed write batch (recovered from a damaged log).
    #[error(transparent)]
    Batch(#[from] BatchError),

    /// On-disk state contradicts itself.
    #[error("Corruption: {0}")]
    Corruption(String),

    /// The caller asked for something the engine cannot do.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Recognised but unimplemented request.
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// A previous background failure made the engine read-only.
    #[error("Background error: {0}")]
    Background(String),
}

// ------------------------------------------------------------------------------------------------
// Internal plumbing types
// ------------------------------------------------------------------------------------------------

/// Message to the background worker.
pub(crate) enum Work {
    Compact,
    Shutdown,
}

/// A writer parked in the FIFO.  `batch: None` marks a force-rotation
/// request (used by [`Engine::compact_mem_table`]).
struct QueuedWriter {
    id: u64,
    sync: bool,
    batch: Option<WriteBatch>,
}

/// A requested manual compaction, processed one unit at a time.
pub(crate) struct ManualCompaction {
    id: u64,
    pub(crate) level: usize,
    pub(crate) done: bool,

    /// Progress cursor: advanced past each round's consumed range.
    pub(crate) begin: Option<InternalKey>,
    pub(crate) end: Option<InternalKey>,
}

/// All mutable engine state, guarded by the one engine mutex.
pub(crate) struct EngineInner {
    pub(crate) mem: Arc<MemTable>,
    pub(crate) imm: Option<Arc<MemTable>>,
    pub(crate) log: Option<LogWriter>,
    pub(crate) log_file_number: u64,
    pub(crate) versions: VersionSet,

    writers: VecDeque<QueuedWriter>,
    finished_writes: HashMap<u64, Result<(), String>>,

    pub(crate) snapshots: SnapshotList,

    /// Output files of in-flight flushes/compactions, protected from the
    /// obsolete-file sweep before their edit lands.
    pub(crate) pending_outputs: HashSet<u64>,

    pub(crate) bg_compaction_scheduled: bool,
    pub(crate) bg_error: Option<String>,
    pub(crate) manual_compaction: Option<ManualCompaction>,

    /// Seek-triggered compaction candidate (a file whose `allowed_seeks`
    /// ran out).
    pub(crate) file_to_compact: Option<(usize, Arc<FileMetaData>)>,

    pub(crate) stats: [CompactionStats; NUM_LEVELS],

    worker: Option<thread::JoinHandle<()>>,
    _db_lock: Option<Box<dyn FileLock>>,
}

/// State shared between user handles and the background worker.
pub(crate) struct EngineShared {
    pub(crate) config: DbConfig,
    pub(crate) icmp: InternalKeyComparator,
    pub(crate) db_path: PathBuf,
    pub(crate) table_cache: Arc<TableCache>,

    inner: Mutex<EngineInner>,

    /// Wakes queued writers (leadership or completion).
    writers_cv: Condvar,

    /// Signals the end of a background work unit.
    pub(crate) bg_cv: Condvar,

    pub(crate) work_tx: Sender<Work>,
    pub(crate) shutting_down: AtomicBool,

    /// Mirror of `inner.imm.is_some()` readable without the mutex, checked
    /// by long compactions between keys.
    pub(crate) has_imm: AtomicBool,

    next_writer_id: AtomicU64,
    next_manual_id: AtomicU64,
}

impl EngineShared {
    pub(crate) fn lock_inner(&self) -> MutexGuard<'_, EngineInner> {
        self.inner.lock().expect("engine mutex poisoned")
    }
}

// ------------------------------------------------------------------------------------------------
// Engine
// ------------------------------------------------------------------------------------------------

/// The database handle.
///
/// Cheap to clone; all clones share one engine instance.  Readers and
/// writers may call in from any number of threads.
pub struct Engine {
    shared: Arc<EngineShared>,
}

impl Clone for Engine {
    fn clone(&self) -> Engine {
        Engine {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Engine {
    // --------------------------------------------------------------------------------------------
    // Open and recovery
    // --------------------------------------------------------------------------------------------

    /// Open (creating if absent) the database rooted at `path`.
    ///
    /// Takes the directory's advisory lock, replays the manifest and any
    /// write-ahead logs newer than it, flushes recovered state to level-0
    /// tables, and starts the background worker.
    pub fn open(path: impl AsRef<Path>, config: DbConfig) -> Result<Engine, EngineError> {
        let db_path = path.as_ref().to_path_buf();
        let env = Arc::clone(&config.env);
        env.create_dir(&db_path)?;

        let db_lock = env.lock_file(&lock_file_name(&db_path))?;
        let icmp = InternalKeyComparator::new(Arc::clone(&config.comparator));
        let table_cache = Arc::new(TableCache::new(
            db_path.clone(),
            &config,
            Arc::new(icmp.clone()),
            config.max_open_files.saturating_sub(10).max(10),
        ));

        if !env.file_exists(&current_file_name(&db_path)) {
            info!(path = %db_path.display(), "creating new database");
            VersionSet::create_new_db(env.as_ref(), &db_path, config.comparator.name())?;
        }

        let mut versions = VersionSet::new(
            db_path.clone(),
            &config,
            icmp.clone(),
            Arc::clone(&table_cache),
        );
        versions.recover()?;

        // Every table the recovered version references must exist.
        let current = versions.current();
        for files in &current.files {
            for file in files {
                let table_path = table_file_name(&db_path, file.number);
                if !env.file_exists(&table_path) {
                    return Err(EngineError::Corruption(format!(
                        "missing table file {:06}.ldb",
                        file.number
                    )));
                }
            }
        }
        drop(current);

        // Replay write-ahead logs the manifest does not yet cover, oldest
        // first so sequence numbers apply in order.
        let mut edit = VersionEdit::new();
        let mut max_sequence: SequenceNumber = 0;
        let min_log = versions.log_number();
        let mut logs: Vec<u64> = env
            .children(&db_path)?
            .iter()
            .filter_map(|name| match parse_file_name(name) {
                Some(FileKind::Log(number)) if number >= min_log => Some(number),
                _ => None,
            })
            .collect();
        logs.sort_unstable();

        for &log_number in &logs {
            replay_wal(
                &config,
                &db_path,
                &icmp,
                &table_cache,
                &mut versions,
                log_number,
                &mut edit,
                &mut max_sequence,
            )?;
            versions.mark_file_number_used(log_number);
        }

        // Fresh WAL for the new memtable generation; committing its number
        // makes the replayed logs obsolete.
        let new_log_number = versions.new_file_number();
        let log_file = env.new_writable_file(&log_file_name(&db_path, new_log_number))?;
        let log = LogWriter::new(log_file);
        edit.log_number = Some(new_log_number);
        if max_sequence > versions.last_sequence() {
            versions.set_last_sequence(max_sequence);
        }
        versions.log_and_apply(&mut edit)?;

        let inner = EngineInner {
            mem: Arc::new(MemTable::new(icmp.clone())),
            imm: None,
            log: Some(log),
            log_file_number: new_log_number,
            versions,
            writers: VecDeque::new(),
            finished_writes: HashMap::new(),
            snapshots: SnapshotList::new(),
            pending_outputs: HashSet::new(),
            bg_compaction_scheduled: false,
            bg_error: None,
            manual_compaction: None,
            file_to_compact: None,
            stats: [CompactionStats::default(); NUM_LEVELS],
            worker: None,
            _db_lock: Some(db_lock),
        };

        let (work_tx, work_rx) = unbounded();
        let shared = Arc::new(EngineShared {
            config,
            icmp,
            db_path: db_path.clone(),
            table_cache,
            inner: Mutex::new(inner),
            writers_cv: Condvar::new(),
            bg_cv: Condvar::new(),
            work_tx,
            shutting_down: AtomicBool::new(false),
            has_imm: AtomicBool::new(false),
            next_writer_id: AtomicU64::new(1),
            next_manual_id: AtomicU64::new(1),
        });

        // The worker holds only a weak handle: dropping the last engine
        // handle closes the channel and the thread winds down on its own.
        let weak = Arc::downgrade(&shared);
        let worker = thread::Builder::new()
            .name("sedimentdb-compactor".to_string())
            .spawn(move || {
                while let Ok(work) = work_rx.recv() {
                    match work {
                        Work::Shutdown => break,
                        Work::Compact => {
                            let Some(shared) = weak.upgrade() else { break };
                            shared.background_call();
                        }
                    }
                }
            })?;

        {
            let mut guard = shared.lock_inner();
            guard.worker = Some(worker);
            shared.remove_obsolete_files(&mut guard);
            shared.maybe_schedule_compaction(&mut guard);
        }

        info!(path = %db_path.display(), "opened database");
        Ok(Engine { shared })
    }

    /// Gracefully stop background work and release the directory lock.
    ///
    /// The memtable is *not* flushed: its contents are already durable in
    /// the write-ahead log and replay on the next open.
    pub fn close(&self) -> Result<(), EngineError> {
        self.shared.shutting_down.store(true, AtomicOrd::Release);

        let mut guard = self.shared.lock_inner();
        while guard.bg_compaction_scheduled {
            guard = self
                .shared
                .bg_cv
                .wait(guard)
                .expect("engine mutex poisoned");
        }
        if let Some(log) = guard.log.as_mut() {
            let _ = log.sync();
        }
        let worker = guard.worker.take();
        drop(guard);

        let _ = self.shared.work_tx.send(Work::Shutdown);
        if let Some(handle) = worker {
            let _ = handle.join();
        }
        info!(path = %self.shared.db_path.display(), "closed database");
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Writes
    // --------------------------------------------------------------------------------------------

    /// Insert or overwrite `key`.
    pub fn put(&self, options: &WriteOptions, key: &[u8], value: &[u8]) -> Result<(), EngineError> {
        let mut batch = WriteBatch::new();
        batch.put(key, value);
        self.write(options, batch)
    }

    /// Delete `key`; deleting an absent key succeeds.
    pub fn delete(&self, options: &WriteOptions, key: &[u8]) -> Result<(), EngineError> {
        let mut batch = WriteBatch::new();
        batch.delete(key);
        self.write(options, batch)
    }

    /// Apply `batch` atomically: either every operation becomes visible
    /// (at consecutive sequence numbers) or none does.
    pub fn write(&self, options: &WriteOptions, batch: WriteBatch) -> Result<(), EngineError> {
        self.shared.write_internal(options, Some(batch))
    }

    // --------------------------------------------------------------------------------------------
    // Reads
    // --------------------------------------------------------------------------------------------

    /// Point lookup.
    ///
    /// `Ok(None)` covers both a never-written key and one whose newest
    /// visible entry is a tombstone.
    pub fn get(&self, options: &ReadOptions, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError> {
        let (mem, imm, version, sequence) = {
            let guard = self.shared.lock_inner();
            let sequence = options
                .snapshot
                .as_ref()
                .map(Snapshot::sequence)
                .unwrap_or_else(|| guard.versions.last_sequence());
            (
                Arc::clone(&guard.mem),
                guard.imm.clone(),
                guard.versions.current(),
                sequence,
            )
        };

        let lookup = LookupKey::new(key, sequence);

        match mem.get(&lookup) {
            MemTableGet::Value(value) => return Ok(Some(value)),
            MemTableGet::Deleted => return Ok(None),
            MemTableGet::NotFound => {}
        }
        if let Some(imm) = &imm {
            match imm.get(&lookup) {
                MemTableGet::Value(value) => return Ok(Some(value)),
                MemTableGet::Deleted => return Ok(None),
                MemTableGet::NotFound => {}
            }
        }

        let (result, charge) =
            version.get(options, &lookup, &self.shared.icmp, &self.shared.table_cache)?;

        // A read that had to consult more than one file debits the first
        // one; an exhausted budget makes that file a compaction candidate.
        if let Some((level, file)) = charge {
            let mut guard = self.shared.lock_inner();
            let remaining = file.allowed_seeks.fetch_sub(1, AtomicOrd::Relaxed) - 1;
            if remaining <= 0 && guard.file_to_compact.is_none() {
                guard.file_to_compact = Some((level, file));
                self.shared.maybe_schedule_compaction(&mut guard);
            }
        }

        Ok(match result {
            VersionGet::Value(value) => Some(value),
            VersionGet::Deleted | VersionGet::NotFound => None,
        })
    }

    /// Iterator over the live keys visible at `options.snapshot` (or the
    /// current state).  The iterator pins what it reads: concurrent writes
    /// and compactions never disturb it.
    pub fn iter(&self, options: &ReadOptions) -> DbIter {
        let guard = self.shared.lock_inner();
        let sequence = options
            .snapshot
            .as_ref()
            .map(Snapshot::sequence)
            .unwrap_or_else(|| guard.versions.last_sequence());
        let mem = Arc::clone(&guard.mem);
        let imm = guard.imm.clone();
        let version = guard.versions.current();

        let mut children: Vec<Box<dyn StorageIterator>> = Vec::new();
        children.push(Box::new(mem.iter()));
        if let Some(imm) = &imm {
            children.push(Box::new(imm.iter()));
        }
        children.extend(version.iterators(options, &self.shared.icmp, &self.shared.table_cache));
        drop(guard);

        let merging = MergingIterator::new(Arc::new(self.shared.icmp.clone()), children);
        DbIter::new(
            Arc::clone(self.shared.icmp.user_comparator()),
            merging,
            sequence,
            mem,
            imm,
            version,
        )
    }

    // --------------------------------------------------------------------------------------------
    // Snapshots
    // --------------------------------------------------------------------------------------------

    /// Pin the current sequence; reads through the handle see exactly the
    /// state as of now.
    pub fn snapshot(&self) -> Snapshot {
        let mut guard = self.shared.lock_inner();
        let sequence = guard.versions.last_sequence();
        guard.snapshots.create(sequence)
    }

    /// Release a snapshot, letting compaction reclaim versions only it
    /// could see.
    pub fn release_snapshot(&self, snapshot: Snapshot) {
        let mut guard = self.shared.lock_inner();
        guard.snapshots.release(&snapshot);
    }

    // --------------------------------------------------------------------------------------------
    // Introspection
    // --------------------------------------------------------------------------------------------

    /// Engine properties, named `sedimentdb.<prop>`:
    ///
    /// - `num-files-at-level<N>` — file count at level `N`
    /// - `stats` — per-level compaction statistics table
    /// - `sstables` — per-level table listing with key ranges
    /// - `approximate-memory-usage` — memtable bytes held
    pub fn property(&self, name: &str) -> Option<String> {
        let rest = name.strip_prefix("sedimentdb.")?;
        let guard = self.shared.lock_inner();

        if let Some(level) = rest.strip_prefix("num-files-at-level") {
            let level: usize = level.parse().ok()?;
            if level >= NUM_LEVELS {
                return None;
            }
            return Some(guard.versions.num_level_files(level).to_string());
        }

        match rest {
            "stats" => {
                let mut out = String::from(
                    "                               Compactions\n\
                     Level  Files Size(MB) Time(sec) Read(MB) Write(MB)\n\
                     --------------------------------------------------\n",
                );
                for level in 0..NUM_LEVELS {
                    let files = guard.versions.num_level_files(level);
                    let stats = &guard.stats[level];
                    if files == 0 && stats.micros == 0 {
                        continue;
                    }
                    out.push_str(&format!(
                        "{:3} {:8} {:8.0} {:9.3} {:8.3} {:9.3}\n",
                        level,
                        files,
                        guard.versions.num_level_bytes(level) as f64 / 1048576.0,
                        stats.micros as f64 / 1e6,
                        stats.bytes_read as f64 / 1048576.0,
                        stats.bytes_written as f64 / 1048576.0,
                    ));
                }
                Some(out)
            }
            "sstables" => {
                let current = guard.versions.current();
                let mut out = String::new();
                for (level, files) in current.files.iter().enumerate() {
                    out.push_str(&format!("--- level {level} ---\n"));
                    for file in files {
                        out.push_str(&format!(
                            "{}:{}[{:?} .. {:?}]\n",
                            file.number, file.file_size, file.smallest, file.largest
                        ));
                    }
                }
                Some(out)
            }
            "approximate-memory-usage" => {
                let mut total = guard.mem.approximate_memory_usage();
                if let Some(imm) = &guard.imm {
                    total += imm.approximate_memory_usage();
                }
                Some(total.to_string())
            }
            _ => None,
        }
    }

    /// Approximate on-disk bytes consumed by each `[start, limit)` range.
    /// Memtable contents are not counted.
    pub fn approximate_sizes(&self, ranges: &[(&[u8], &[u8])]) -> Vec<u64> {
        let guard = self.shared.lock_inner();
        let version = guard.versions.current();
        ranges
            .iter()
            .map(|(start, limit)| {
                let k1 = InternalKey::new(start, MAX_SEQUENCE, KIND_FOR_SEEK);
                let k2 = InternalKey::new(limit, MAX_SEQUENCE, KIND_FOR_SEEK);
                let begin = guard.versions.approximate_offset_of(&version, &k1);
                let end = guard.versions.approximate_offset_of(&version, &k2);
                end.saturating_sub(begin)
            })
            .collect()
    }

    // --------------------------------------------------------------------------------------------
    // Manual compaction
    // --------------------------------------------------------------------------------------------

    /// Compact every level holding data in `[begin, end]` (whole keyspace
    /// for `None` bounds) down the tree.  Blocks until done.
    pub fn compact_range(
        &self,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<(), EngineError> {
        let mut max_level_with_files = 1;
        {
            let guard = self.shared.lock_inner();
            let current = guard.versions.current();
            for level in 1..NUM_LEVELS {
                if current.overlap_in_level(&self.shared.icmp, level, begin, end) {
                    max_level_with_files = level;
                }
            }
        }

        self.compact_mem_table()?;
        for level in 0..max_level_with_files {
            self.compact_level(level, begin, end)?;
        }
        Ok(())
    }

    /// Rotate the current memtable and wait for it to reach a table file.
    pub fn compact_mem_table(&self) -> Result<(), EngineError> {
        // An empty batch slot forces rotation through the writer queue,
        // keeping the single-writer discipline intact.
        self.shared.write_internal(&WriteOptions::default(), None)?;

        let mut guard = self.shared.lock_inner();
        while guard.imm.is_some() && guard.bg_error.is_none() {
            guard = self
                .shared
                .bg_cv
                .wait(guard)
                .expect("engine mutex poisoned");
        }
        if let Some(err) = &guard.bg_error {
            return Err(EngineError::Background(err.clone()));
        }
        Ok(())
    }

    /// Run manual compaction of one level over `[begin, end]` to completion.
    fn compact_level(
        &self,
        level: usize,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<(), EngineError> {
        let shared = &self.shared;
        let id = shared.next_manual_id.fetch_add(1, AtomicOrd::Relaxed);
        let mut pending = Some(ManualCompaction {
            id,
            level,
            done: false,
            begin: begin.map(|b| InternalKey::new(b, MAX_SEQUENCE, KIND_FOR_SEEK)),
            end: end.map(|e| InternalKey::new(e, 0, RecordKind::Deletion)),
        });

        let mut guard = shared.lock_inner();
        loop {
            if shared.shutting_down.load(AtomicOrd::Acquire) {
                return Ok(());
            }
            if let Some(err) = &guard.bg_error {
                return Err(EngineError::Background(err.clone()));
            }

            match &guard.manual_compaction {
                Some(mine) if mine.id == id => {
                    if mine.done {
                        guard.manual_compaction = None;
                        return Ok(());
                    }
                    guard = shared.bg_cv.wait(guard).expect("engine mutex poisoned");
                }
                Some(_other) => {
                    // Another manual compaction is running; wait our turn.
                    guard = shared.bg_cv.wait(guard).expect("engine mutex poisoned");
                }
                None => match pending.take() {
                    Some(manual) => {
                        guard.manual_compaction = Some(manual);
                        shared.maybe_schedule_compaction(&mut guard);
                    }
                    None => return Ok(()),
                },
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Write path internals
// ------------------------------------------------------------------------------------------------

impl EngineShared {
    /// The writer-queue protocol described in the module docs.  `batch:
    /// None` requests a forced memtable rotation instead of a write.
    pub(crate) fn write_internal(
        self: &Arc<Self>,
        options: &WriteOptions,
        batch: Option<WriteBatch>,
    ) -> Result<(), EngineError> {
        let id = self.next_writer_id.fetch_add(1, AtomicOrd::Relaxed);
        let force = batch.is_none();

        let mut guard = self.lock_inner();
        guard.writers.push_back(QueuedWriter {
            id,
            sync: options.sync,
            batch,
        });

        // Park until a leader finished this write, or leadership arrives.
        loop {
            if let Some(result) = guard.finished_writes.remove(&id) {
                return result.map_err(EngineError::Background);
            }
            if guard.writers.front().map(|w| w.id) == Some(id) {
                break;
            }
            guard = self.writers_cv.wait(guard).expect("engine mutex poisoned");
        }

        let (mut guard, room) = self.make_room_for_write(guard, force);
        if let Err(err) = room {
            guard.writers.pop_front();
            self.writers_cv.notify_all();
            return Err(err);
        }
        if force {
            guard.writers.pop_front();
            self.writers_cv.notify_all();
            return Ok(());
        }

        // Coalesce compatible followers behind the leader.  A small leader
        // batch only absorbs limited company, so a latency-sensitive tiny
        // write is not taxed with megabytes of followers.
        let leader_sync = guard.writers.front().map(|w| w.sync).unwrap_or(false);
        let mut group = guard
            .writers
            .front_mut()
            .and_then(|w| w.batch.take())
            .expect("leader lost its batch");
        let first_size = group.approximate_size();
        let max_size = if first_size <= 128 * 1024 {
            first_size + 128 * 1024
        } else {
            1 << 20
        };
        let mut group_size = first_size;
        let mut consumed = 1usize;
        let mut follower_ids: Vec<u64> = Vec::new();
        for follower in guard.writers.iter_mut().skip(1) {
            // A sync write must not piggyback on a non-sync leader: its
            // durability request would be silently dropped.
            if follower.sync && !leader_sync {
                break;
            }
            let Some(follower_batch) = follower.batch.as_ref() else {
                break; // force marker runs alone
            };
            let size = follower_batch.approximate_size() - BATCH_HEADER_SIZE;
            if group_size + size > max_size {
                break;
            }
            let follower_batch = follower.batch.take().expect("checked above");
            group.append(&follower_batch);
            group_size += size;
            consumed += 1;
            follower_ids.push(follower.id);
        }

        let sequence = guard.versions.last_sequence() + 1;
        group.set_sequence(sequence);
        let count = u64::from(group.count());
        // An empty batch consumes no sequence numbers.
        let last_sequence = if count == 0 {
            sequence - 1
        } else {
            sequence + count - 1
        };

        // The heavy part runs unlocked: only the leader touches the WAL
        // and memtable, and `make_room_for_write` pinned both.
        let mut log = guard.log.take().expect("log writer present");
        let mem = Arc::clone(&guard.mem);
        drop(guard);

        let mut failure: Option<EngineError> = None;
        if let Err(err) = log.add_record(group.contents()) {
            failure = Some(err.into());
        }
        if failure.is_none()
            && leader_sync
            && let Err(err) = log.sync()
        {
            failure = Some(err.into());
        }
        if failure.is_none()
            && let Err(err) = group.insert_into(&mem)
        {
            failure = Some(err.into());
        }

        let mut guard = self.lock_inner();
        guard.log = Some(log);
        let broadcast: Result<(), String> = match &failure {
            None => {
                guard.versions.set_last_sequence(last_sequence);
                Ok(())
            }
            Some(err) => {
                // The log may now disagree with memory: refuse all writes
                // until a reopen replays a consistent prefix.
                let message = err.to_string();
                self.record_background_error(&mut guard, message.clone());
                Err(message)
            }
        };

        for _ in 0..consumed {
            guard.writers.pop_front();
        }
        for follower_id in follower_ids {
            guard.finished_writes.insert(follower_id, broadcast.clone());
        }
        self.writers_cv.notify_all();
        drop(guard);

        match failure {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    /// Ensure the memtable can take the next write, applying backpressure
    /// from level 0 and rotating to a fresh memtable + WAL when full.
    fn make_room_for_write<'e>(
        self: &'e Arc<Self>,
        mut guard: MutexGuard<'e, EngineInner>,
        mut force: bool,
    ) -> (MutexGuard<'e, EngineInner>, Result<(), EngineError>) {
        let mut allow_delay = !force;
        loop {
            if let Some(err) = &guard.bg_error {
                let err = err.clone();
                return (guard, Err(EngineError::Background(err)));
            }

            if allow_delay && guard.versions.num_level_files(0) >= L0_SLOWDOWN_WRITES_TRIGGER {
                // Hand the CPU to the compactor for a moment instead of
                // stalling this write for seconds once L0 hits the hard
                // limit.  At most one delay per write.
                drop(guard);
                thread::sleep(Duration::from_millis(1));
                allow_delay = false;
                guard = self.lock_inner();
                continue;
            }

            if !force
                && guard.mem.approximate_memory_usage() <= self.config.write_buffer_size
            {
                return (guard, Ok(()));
            }

            if guard.imm.is_some() {
                // Both memtables are occupied; wait for the flush.
                guard = self.bg_cv.wait(guard).expect("engine mutex poisoned");
                continue;
            }

            if guard.versions.num_level_files(0) >= L0_STOP_WRITES_TRIGGER {
                warn!("too many level-0 files; stalling writes");
                guard = self.bg_cv.wait(guard).expect("engine mutex poisoned");
                continue;
            }

            // Rotate: the current memtable becomes immutable and a fresh
            // WAL generation begins.
            let new_log_number = guard.versions.new_file_number();
            let file = match self
                .config
                .env
                .new_writable_file(&log_file_name(&self.db_path, new_log_number))
            {
                Ok(file) => file,
                Err(err) => return (guard, Err(err.into())),
            };
            if let Some(mut old_log) = guard.log.take() {
                let _ = old_log.flush();
            }
            guard.log = Some(LogWriter::new(file));
            guard.log_file_number = new_log_number;

            let full = std::mem::replace(
                &mut guard.mem,
                Arc::new(MemTable::new(self.icmp.clone())),
            );
            guard.imm = Some(full);
            self.has_imm.store(true, AtomicOrd::Release);
            force = false;
            self.maybe_schedule_compaction(&mut guard);
        }
    }
}

// ------------------------------------------------------------------------------------------------
// WAL replay
// ------------------------------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
fn replay_wal(
    config: &DbConfig,
    db_path: &Path,
    icmp: &InternalKeyComparator,
    table_cache: &TableCache,
    versions: &mut VersionSet,
    log_number: u64,
    edit: &mut VersionEdit,
    max_sequence: &mut SequenceNumber,
) -> Result<(), EngineError> {
    struct Reporter {
        first: Option<String>,
    }
    impl CorruptionReporter for Reporter {
        fn corruption(&mut self, bytes: usize, reason: &str) {
            warn!(bytes, reason, "corruption in write-ahead log");
            if self.first.is_none() {
                self.first = Some(reason.to_string());
            }
        }
    }

    let path = log_file_name(db_path, log_number);
    let file = config.env.new_sequential_file(&path)?;
    let mut reporter = Reporter { first: None };
    let mut mem: Option<Arc<MemTable>> = None;
    let mut records = 0usize;
    let mut bad_batches = 0usize;

    {
        let mut reader = LogReader::new(file, Some(&mut reporter), true, 0);
        while let Some(record) = reader.read_record() {
            records += 1;
            if record.len() < BATCH_HEADER_SIZE {
                bad_batches += 1;
                continue;
            }
            let batch = match WriteBatch::from_contents(record) {
                Ok(batch) => batch,
                Err(_) => {
                    bad_batches += 1;
                    continue;
                }
            };

            let memtable =
                mem.get_or_insert_with(|| Arc::new(MemTable::new(icmp.clone())));
            if let Err(err) = batch.insert_into(memtable) {
                if config.paranoid_checks {
                    return Err(err.into());
                }
                warn!(%err, "skipping damaged batch during recovery");
                bad_batches += 1;
                continue;
            }

            if batch.count() > 0 {
                let last = batch.sequence() + u64::from(batch.count()) - 1;
                if last > *max_sequence {
                    *max_sequence = last;
                }
            }

            if memtable.approximate_memory_usage() > config.write_buffer_size {
                let number = versions.new_file_number();
                let built =
                    build_table(config, db_path, icmp, table_cache, Box::new(memtable.iter()), number)?;
                if let Some((file_size, smallest, largest)) = built {
                    // Recovery flushes always land at level 0: there is no
                    // installed version to place them deeper against yet.
                    edit.add_file(0, number, file_size, smallest, largest);
                }
                mem = None;
            }
        }
    }

    if reporter.first.is_some() && config.paranoid_checks {
        return Err(EngineError::Corruption(format!(
            "log {log_number:06}: {}",
            reporter.first.unwrap_or_default()
        )));
    }

    if let Some(memtable) = mem
        && memtable.approximate_memory_usage() > 0
    {
        let number = versions.new_file_number();
        let built = build_table(
            config,
            db_path,
            icmp,
            table_cache,
            Box::new(memtable.iter()),
            number,
        )?;
        if let Some((file_size, smallest, largest)) = built {
            edit.add_file(0, number, file_size, smallest, largest);
        }
    }

    info!(
        log = log_number,
        records, bad_batches, "replayed write-ahead log"
    );
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// Destruction
// ------------------------------------------------------------------------------------------------

/// Delete the database at `path`: every file the engine recognises, then
/// the directory itself.  Foreign files are left untouched (and then the
/// directory removal fails, which is reported as success-with-leftovers by
/// the caller's own listing).
pub fn destroy_db(path: impl AsRef<Path>, config: &DbConfig) -> Result<(), EngineError> {
    let db_path = path.as_ref();
    let env = &config.env;

    let Ok(children) = env.children(db_path) else {
        // Missing directory: nothing to destroy.
        return Ok(());
    };

    let lock_path = lock_file_name(db_path);
    let lock = env.lock_file(&lock_path)?;

    let mut result: Result<(), EngineError> = Ok(());
    for name in children {
        match parse_file_name(&name) {
            Some(FileKind::Lock) | None => {}
            Some(_) => {
                if let Err(err) = env.remove_file(&db_path.join(&name))
                    && result.is_ok()
                {
                    result = Err(err.into());
                }
            }
        }
    }

    drop(lock);
    let _ = env.remove_file(&lock_path);
    let _ = env.remove_dir(db_path);
    result
}
