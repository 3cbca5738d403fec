//! Background work: memtable flushes, leveled compactions, and the
//! obsolete-file sweep.
//!
//! All of this runs on the engine's single worker thread.  Each unit —
//! one flush or one compaction — follows the same shape: decide under the
//! engine mutex, do the heavy I/O with the mutex released, then re-lock to
//! install the result through the version set.  The memtable flush has
//! priority: a long compaction checks for a newly rotated immutable
//! memtable between keys, because writers stall once both memtables are
//! occupied.

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::sync::MutexGuard;
use std::sync::atomic::Ordering as AtomicOrd;
use std::time::Instant;

use tracing::{debug, info, warn};

use std::cmp::Ordering;
use std::sync::Arc;

use crate::engine::files::table_file_name;
use crate::engine::{EngineError, EngineInner, EngineShared};
use crate::iterator::{MergingIterator, StorageIterator};
use crate::keys::{InternalKey, MAX_SEQUENCE, RecordKind, parse_internal_key};
use crate::options::ReadOptions;
use crate::sstable::builder::TableBuilder;
use crate::version::set::Compaction;
use crate::version::{LevelIterator, total_file_size};

// ------------------------------------------------------------------------------------------------
// Per-level statistics
// ------------------------------------------------------------------------------------------------

/// Work accounted against the level that received the output.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct CompactionStats {
    pub micros: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

impl CompactionStats {
    fn add(&mut self, micros: u64, bytes_read: u64, bytes_written: u64) {
        self.micros += micros;
        self.bytes_read += bytes_read;
        self.bytes_written += bytes_written;
    }
}

// ------------------------------------------------------------------------------------------------
// Compaction output state
// ------------------------------------------------------------------------------------------------

struct Output {
    number: u64,
    file_size: u64,
    smallest: InternalKey,
    largest: InternalKey,
}

struct CompactionState {
    outputs: Vec<Output>,
    builder: Option<TableBuilder>,
    current_number: u64,
    current_smallest: Option<InternalKey>,
    current_largest: Option<InternalKey>,
}

impl CompactionState {
    fn new() -> CompactionState {
        CompactionState {
            outputs: Vec::new(),
            builder: None,
            current_number: 0,
            current_smallest: None,
            current_largest: None,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Table construction
// ------------------------------------------------------------------------------------------------

/// Drain `iter` into a new table file, returning its size and bounds, or
/// `None` when the iterator was empty (no file is created).
///
/// Used by both the background flush and recovery, which runs before the
/// shared engine state exists.
pub(crate) fn build_table(
    config: &crate::options::DbConfig,
    db_path: &std::path::Path,
    icmp: &crate::keys::InternalKeyComparator,
    table_cache: &crate::engine::table_cache::TableCache,
    mut iter: Box<dyn StorageIterator>,
    file_number: u64,
) -> Result<Option<(u64, InternalKey, InternalKey)>, EngineError> {
    iter.seek_to_first();
    if !iter.valid() {
        iter.status()?;
        return Ok(None);
    }

    let path = table_file_name(db_path, file_number);
    let file = config.env.new_writable_file(&path)?;
    let mut builder = TableBuilder::new(config, Arc::new(icmp.clone()), file);

    let build = (|| -> Result<(InternalKey, InternalKey), EngineError> {
        let smallest = InternalKey::from_encoded(iter.key());
        let mut largest = smallest.clone();
        while iter.valid() {
            largest = InternalKey::from_encoded(iter.key());
            builder.add(iter.key(), iter.value())?;
            iter.next();
        }
        iter.status()?;
        builder.finish()?;
        builder.sync()?;
        Ok((smallest, largest))
    })();

    match build {
        Ok((smallest, largest)) => {
            let file_size = builder.file_size();
            // Confirm the file is usable before publishing it.
            table_cache.find_table(file_number, file_size)?;
            Ok(Some((file_size, smallest, largest)))
        }
        Err(err) => {
            builder.abandon();
            let _ = config.env.remove_file(&path);
            Err(err)
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Background work
// ------------------------------------------------------------------------------------------------

impl EngineShared {
    /// One worker wakeup: run a single flush or compaction unit.
    pub(crate) fn background_call(self: &Arc<Self>) {
        let mut inner = self.lock_inner();
        debug_assert!(inner.bg_compaction_scheduled);

        if !self.shutting_down.load(AtomicOrd::Acquire) && inner.bg_error.is_none() {
            inner = self.background_compaction(inner);
        }

        inner.bg_compaction_scheduled = false;

        // The unit just finished may have pushed a level over its budget.
        self.maybe_schedule_compaction(&mut inner);
        self.bg_cv.notify_all();
        self.writers_cv.notify_all();
    }

    fn background_compaction<'e>(
        self: &'e Arc<Self>,
        mut inner: MutexGuard<'e, EngineInner>,
    ) -> MutexGuard<'e, EngineInner> {
        if inner.imm.is_some() {
            let (inner, result) = self.flush_imm_locked(inner);
            if let Err(err) = result {
                warn!(%err, "memtable flush failed");
            }
            return inner;
        }

        let is_manual = inner
            .manual_compaction
            .as_ref()
            .is_some_and(|manual| !manual.done);
        let mut manual_end: Option<InternalKey> = None;

        // Split the guard so the manual-compaction cursor and the version
        // set can be borrowed side by side.
        let state = &mut *inner;
        let compaction = if is_manual {
            let manual = state
                .manual_compaction
                .as_mut()
                .expect("manual compaction checked above");
            let begin = manual.begin.clone();
            let compaction =
                state
                    .versions
                    .compact_range(manual.level, begin.as_ref(), manual.end.as_ref());
            match &compaction {
                None => manual.done = true,
                Some(c) => {
                    manual_end = Some(c.input(0, c.num_input_files(0) - 1).largest.clone());
                }
            }
            compaction
        } else if state.versions.needs_compaction() {
            state.versions.pick_compaction(None)
        } else if let Some(hint) = state.file_to_compact.take() {
            state.versions.pick_compaction(Some(hint))
        } else {
            None
        };

        match compaction {
            None => {}
            Some(mut c) if !is_manual && c.is_trivial_move() => {
                // Re-parent the file instead of rewriting it.
                let file = Arc::clone(c.input(0, 0));
                let level = c.level();
                c.edit.remove_file(level, file.number);
                c.edit.add_file(
                    level + 1,
                    file.number,
                    file.file_size,
                    file.smallest.clone(),
                    file.largest.clone(),
                );
                match inner.versions.log_and_apply(&mut c.edit) {
                    Ok(()) => {
                        info!(
                            file = file.number,
                            from_level = level,
                            bytes = file.file_size,
                            summary = %inner.versions.level_summary(),
                            "moved file to next level"
                        );
                    }
                    Err(err) => {
                        self.record_background_error(&mut inner, err.to_string());
                    }
                }
            }
            Some(c) => {
                let (returned, result) = self.do_compaction_work(inner, c);
                inner = returned;
                match result {
                    Ok(()) => {}
                    Err(err) => {
                        if self.shutting_down.load(AtomicOrd::Acquire) {
                            debug!("compaction interrupted by shutdown");
                        } else {
                            self.record_background_error(&mut inner, err.to_string());
                        }
                    }
                }
            }
        }

        // Hand manual-compaction progress back to the requester.
        if is_manual {
            let state = &mut *inner;
            if let Some(manual) = state.manual_compaction.as_mut() {
                if state.bg_error.is_some() {
                    manual.done = true;
                }
                if !manual.done {
                    // Resume after the highest key this round consumed.
                    manual.begin = manual_end;
                }
            }
        }
        inner
    }

    // --------------------------------------------------------------------------------------------
    // Memtable flush
    // --------------------------------------------------------------------------------------------

    /// Flush the immutable memtable to one table file and retire its WAL.
    pub(crate) fn flush_imm_locked<'e>(
        self: &'e Arc<Self>,
        mut inner: MutexGuard<'e, EngineInner>,
    ) -> (MutexGuard<'e, EngineInner>, Result<(), EngineError>) {
        let Some(imm) = inner.imm.clone() else {
            return (inner, Ok(()));
        };

        let file_number = inner.versions.new_file_number();
        inner.pending_outputs.insert(file_number);
        let base = inner.versions.current();
        let log_file_number = inner.log_file_number;
        drop(inner);

        let started = Instant::now();
        let built = build_table(
            &self.config,
            &self.db_path,
            &self.icmp,
            &self.table_cache,
            Box::new(imm.iter()),
            file_number,
        );

        let mut inner = self.lock_inner();
        let result = match built {
            Err(err) => {
                inner.pending_outputs.remove(&file_number);
                self.record_background_error(&mut inner, err.to_string());
                Err(err)
            }
            Ok(built) => {
                let mut edit = crate::version::edit::VersionEdit::new();
                let mut level = 0;
                if let Some((file_size, smallest, largest)) = &built {
                    level = base.pick_level_for_memtable_output(
                        &self.icmp,
                        self.config.max_file_size,
                        smallest.user_key(),
                        largest.user_key(),
                    );
                    edit.add_file(
                        level,
                        file_number,
                        *file_size,
                        smallest.clone(),
                        largest.clone(),
                    );
                }

                // Everything up to the current WAL is now durably in
                // tables; older logs become garbage.
                edit.log_number = Some(log_file_number);

                match inner.versions.log_and_apply(&mut edit) {
                    Ok(()) => {
                        let micros = started.elapsed().as_micros() as u64;
                        let bytes = built.as_ref().map_or(0, |(size, ..)| *size);
                        inner.stats[level].add(micros, 0, bytes);
                        inner.imm = None;
                        self.has_imm.store(false, AtomicOrd::Release);
                        inner.pending_outputs.remove(&file_number);
                        info!(
                            file = file_number,
                            level,
                            bytes,
                            summary = %inner.versions.level_summary(),
                            "flushed memtable"
                        );
                        self.remove_obsolete_files(&mut inner);
                        Ok(())
                    }
                    Err(err) => {
                        inner.pending_outputs.remove(&file_number);
                        let message = err.to_string();
                        self.record_background_error(&mut inner, message);
                        Err(err.into())
                    }
                }
            }
        };

        // Writers may be stalled in make_room_for_write waiting for imm.
        self.bg_cv.notify_all();
        self.writers_cv.notify_all();
        (inner, result)
    }

    // --------------------------------------------------------------------------------------------
    // Full compaction
    // --------------------------------------------------------------------------------------------

    fn make_input_iterator(&self, compaction: &Compaction) -> MergingIterator {
        // Bulk reads must not evict the hot read path from the block cache.
        let options = ReadOptions {
            verify_checksums: self.config.paranoid_checks,
            fill_cache: false,
            snapshot: None,
        };

        let mut children: Vec<Box<dyn StorageIterator>> = Vec::new();
        for which in 0..2 {
            if compaction.inputs[which].is_empty() {
                continue;
            }
            if compaction.level() + which == 0 {
                for file in &compaction.inputs[which] {
                    children.push(self.table_cache.iter(&options, file.number, file.file_size));
                }
            } else {
                children.push(Box::new(LevelIterator::new(
                    self.icmp.clone(),
                    compaction.inputs[which].clone(),
                    Arc::clone(&self.table_cache),
                    options.clone(),
                )));
            }
        }
        MergingIterator::new(Arc::new(self.icmp.clone()), children)
    }

    fn open_compaction_output(
        self: &Arc<Self>,
        state: &mut CompactionState,
    ) -> Result<(), EngineError> {
        let file_number = {
            let mut inner = self.lock_inner();
            let number = inner.versions.new_file_number();
            inner.pending_outputs.insert(number);
            number
        };

        let path = table_file_name(&self.db_path, file_number);
        let file = self.config.env.new_writable_file(&path)?;
        state.builder = Some(TableBuilder::new(
            &self.config,
            Arc::new(self.icmp.clone()),
            file,
        ));
        state.current_number = file_number;
        state.current_smallest = None;
        state.current_largest = None;
        Ok(())
    }

    fn finish_compaction_output(
        self: &Arc<Self>,
        state: &mut CompactionState,
        input: &MergingIterator,
    ) -> Result<(), EngineError> {
        let mut builder = state.builder.take().expect("no open compaction output");
        let entries = builder.num_entries();
        debug_assert!(entries > 0);

        let result = input
            .status()
            .map_err(EngineError::from)
            .and_then(|()| Ok(builder.finish()?))
            .and_then(|()| Ok(builder.sync()?));
        let file_size = builder.file_size();

        match result {
            Ok(()) => {
                state.outputs.push(Output {
                    number: state.current_number,
                    file_size,
                    smallest: state
                        .current_smallest
                        .take()
                        .expect("output file without keys"),
                    largest: state
                        .current_largest
                        .take()
                        .expect("output file without keys"),
                });
                // Verify the new table is readable before it is published.
                self.table_cache
                    .find_table(state.current_number, file_size)?;
                debug!(
                    file = state.current_number,
                    entries, file_size, "generated compaction output"
                );
                Ok(())
            }
            Err(err) => {
                builder.abandon();
                let _ = self
                    .config
                    .env
                    .remove_file(&table_file_name(&self.db_path, state.current_number));
                Err(err)
            }
        }
    }

    fn do_compaction_work<'e>(
        self: &'e Arc<Self>,
        inner: MutexGuard<'e, EngineInner>,
        mut compaction: Compaction,
    ) -> (MutexGuard<'e, EngineInner>, Result<(), EngineError>) {
        let started = Instant::now();
        info!(
            level = compaction.level(),
            base_files = compaction.num_input_files(0),
            next_files = compaction.num_input_files(1),
            "compacting"
        );

        let smallest_snapshot = if inner.snapshots.is_empty() {
            inner.versions.last_sequence()
        } else {
            inner.snapshots.oldest()
        };
        drop(inner);

        let mut input = self.make_input_iterator(&compaction);
        input.seek_to_first();

        let mut state = CompactionState::new();
        let ucmp = Arc::clone(self.icmp.user_comparator());
        let mut current_user_key: Option<Vec<u8>> = None;
        let mut last_sequence_for_key = MAX_SEQUENCE;
        let mut roll_pending = false;

        let mut status: Result<(), EngineError> = Ok(());

        while input.valid() {
            if self.shutting_down.load(AtomicOrd::Acquire) {
                status = Err(EngineError::Background(
                    "compaction interrupted by shutdown".to_string(),
                ));
                break;
            }

            // A rotated memtable outranks this compaction: writers stall
            // while it waits.
            if self.has_imm.load(AtomicOrd::Acquire) {
                let guard = self.lock_inner();
                let (guard, flush) = self.flush_imm_locked(guard);
                drop(guard);
                if let Err(err) = flush {
                    status = Err(err);
                    break;
                }
            }

            let key = input.key().to_vec();

            // Output-file cut points.  Files are only cut between distinct
            // user keys, so no user key ever spans two files of one level
            // and range searches stay file-local.
            let stop_for_grandparents = compaction.should_stop_before(&key);
            let user_key_changed = match (&current_user_key, parse_internal_key(&key)) {
                (Some(current), Some(parsed)) => {
                    ucmp.compare(parsed.user_key, current) != Ordering::Equal
                }
                _ => true,
            };
            if state.builder.is_some() && (stop_for_grandparents || roll_pending) && user_key_changed
            {
                roll_pending = false;
                if let Err(err) = self.finish_compaction_output(&mut state, &input) {
                    status = Err(err);
                    break;
                }
            }

            // Shadowing and tombstone elimination.
            let mut drop_entry = false;
            match parse_internal_key(&key) {
                None => {
                    // Corrupted key: keep it so the damage stays visible.
                    current_user_key = None;
                    last_sequence_for_key = MAX_SEQUENCE;
                }
                Some(parsed) => {
                    let first_occurrence = match &current_user_key {
                        None => true,
                        Some(current) => {
                            ucmp.compare(parsed.user_key, current) != Ordering::Equal
                        }
                    };
                    if first_occurrence {
                        current_user_key = Some(parsed.user_key.to_vec());
                        last_sequence_for_key = MAX_SEQUENCE;
                    }

                    if last_sequence_for_key <= smallest_snapshot {
                        // Shadowed by a newer entry that every live
                        // snapshot already sees.
                        drop_entry = true;
                    } else if parsed.kind == RecordKind::Deletion
                        && parsed.sequence <= smallest_snapshot
                        && compaction.is_base_level_for_key(parsed.user_key)
                    {
                        // Tombstone with nothing left to delete below.
                        drop_entry = true;
                    }
                    last_sequence_for_key = parsed.sequence;
                }
            }

            if !drop_entry {
                if state.builder.is_none() {
                    if let Err(err) = self.open_compaction_output(&mut state) {
                        status = Err(err);
                        break;
                    }
                }
                let builder = state.builder.as_mut().expect("output just opened");
                if builder.num_entries() == 0 {
                    state.current_smallest = Some(InternalKey::from_encoded(&key));
                }
                state.current_largest = Some(InternalKey::from_encoded(&key));
                if let Err(err) = builder.add(&key, input.value()) {
                    status = Err(err.into());
                    break;
                }
                if builder.file_size() >= compaction.max_output_file_size() {
                    roll_pending = true;
                }
            }

            input.next();
        }

        if status.is_ok() && self.shutting_down.load(AtomicOrd::Acquire) {
            status = Err(EngineError::Background(
                "compaction interrupted by shutdown".to_string(),
            ));
        }
        if status.is_ok() && state.builder.is_some() {
            status = self.finish_compaction_output(&mut state, &input);
        }
        if status.is_ok() {
            status = input.status().map_err(EngineError::from);
        }
        if status.is_ok()
            && let Some(builder) = &mut state.builder
        {
            // Unreachable in practice; keep the file set tidy regardless.
            builder.abandon();
            state.builder = None;
        }
        drop(input);

        let micros = started.elapsed().as_micros() as u64;
        let bytes_read = total_file_size(&compaction.inputs[0])
            + total_file_size(&compaction.inputs[1]);
        let bytes_written: u64 = state.outputs.iter().map(|o| o.file_size).sum();

        let mut inner = self.lock_inner();
        inner.stats[compaction.level() + 1].add(micros, bytes_read, bytes_written);

        if status.is_ok() {
            let level = compaction.level();
            let output_count = state.outputs.len();
            compaction.add_input_deletions();
            for output in &state.outputs {
                compaction.edit.add_file(
                    level + 1,
                    output.number,
                    output.file_size,
                    output.smallest.clone(),
                    output.largest.clone(),
                );
            }
            status = inner
                .versions
                .log_and_apply(&mut compaction.edit)
                .map_err(EngineError::from);
            if status.is_ok() {
                info!(
                    level,
                    outputs = output_count,
                    bytes_written,
                    micros,
                    summary = %inner.versions.level_summary(),
                    "compacted"
                );
            }
        }

        for output in &state.outputs {
            inner.pending_outputs.remove(&output.number);
        }
        // A failed open output never made it into `outputs`.
        inner.pending_outputs.remove(&state.current_number);

        self.remove_obsolete_files(&mut inner);
        (inner, status)
    }

    // --------------------------------------------------------------------------------------------
    // Obsolete files
    // --------------------------------------------------------------------------------------------

    /// Delete every file in the directory that no live version, pending
    /// output, or current log/manifest needs.
    pub(crate) fn remove_obsolete_files(self: &Arc<Self>, inner: &mut EngineInner) {
        if inner.bg_error.is_some() {
            // After a background error the version edit may not have
            // landed; guessing at liveness could delete real data.
            return;
        }

        let mut live = inner.pending_outputs.clone();
        live.extend(inner.versions.live_files());

        let Ok(children) = self.config.env.children(&self.db_path) else {
            return;
        };

        for name in children {
            use crate::engine::files::FileKind;
            let keep = match crate::engine::files::parse_file_name(&name) {
                None => true, // foreign file: not ours to delete
                Some(FileKind::Log(number)) => number >= inner.versions.log_number(),
                Some(FileKind::Manifest(number)) => {
                    number >= inner.versions.manifest_file_number()
                }
                Some(FileKind::Table(number)) => live.contains(&number),
                Some(FileKind::Temp(number)) => live.contains(&number),
                Some(FileKind::Current | FileKind::Lock | FileKind::InfoLog) => true,
            };
            if keep {
                continue;
            }

            if let Some(FileKind::Table(number)) = crate::engine::files::parse_file_name(&name) {
                self.table_cache.evict(number);
            }
            debug!(file = %name, "deleting obsolete file");
            if let Err(err) = self.config.env.remove_file(&self.db_path.join(&name)) {
                warn!(file = %name, %err, "failed to delete obsolete file");
            }
        }
    }

    // --------------------------------------------------------------------------------------------
    // Scheduling
    // --------------------------------------------------------------------------------------------

    /// Wake the worker when there is work and nothing blocks it.
    pub(crate) fn maybe_schedule_compaction(self: &Arc<Self>, inner: &mut EngineInner) {
        if inner.bg_compaction_scheduled
            || self.shutting_down.load(AtomicOrd::Acquire)
            || inner.bg_error.is_some()
        {
            return;
        }
        let work = inner.imm.is_some()
            || inner
                .manual_compaction
                .as_ref()
                .is_some_and(|manual| !manual.done)
            || inner.file_to_compact.is_some()
            || inner.versions.needs_compaction();
        if !work {
            return;
        }
        inner.bg_compaction_scheduled = true;
        let _ = self.work_tx.send(crate::engine::Work::Compact);
    }

    /// Latch the first background failure; the engine refuses writes until
    /// reopened.
    pub(crate) fn record_background_error(&self, inner: &mut EngineInner, message: String) {
        if inner.bg_error.is_none() {
            tracing::error!(error = %message, "background error; engine is now read-only");
            inner.bg_error = Some(message);
        }
        self.bg_cv.notify_all();
        self.writers_cv.notify_all();
    }
}
