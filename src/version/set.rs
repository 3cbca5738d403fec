//! The version set: current version, shared counters, manifest log, and
//! compaction selection.
//!
//! Every change to the file set follows one path:
//! [`VersionSet::log_and_apply`] builds the successor version, appends the
//! edit to the manifest (fsynced), and only then installs the version as
//! current.  A crash between append and install replays the edit on the
//! next open; a crash before the append leaves no trace.  On startup
//! [`VersionSet::recover`] rebuilds the current version by folding every
//! edit of the manifest named by `CURRENT`.

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use tracing::{error, info};

use crate::engine::files::{current_file_name, manifest_file_name, set_current_file};
use crate::engine::table_cache::TableCache;
use crate::env::Env;
use crate::keys::{Comparator, InternalKey, InternalKeyComparator, SequenceNumber};
use crate::options::DbConfig;
use crate::version::edit::VersionEdit;
use crate::version::{
    FileMetaData, L0_COMPACTION_TRIGGER, NUM_LEVELS, Version, VersionError,
    expanded_compaction_byte_size_limit, max_bytes_for_level, max_grandparent_overlap_bytes,
    total_file_size,
};
use crate::wal::{CorruptionReporter, LogReader, LogWriter};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Manifest size past which the next edit starts a fresh manifest with a
/// full snapshot, bounding recovery replay time.
const MAX_MANIFEST_FILE_SIZE: u64 = 4 << 20;

// ------------------------------------------------------------------------------------------------
// VersionSet
// ------------------------------------------------------------------------------------------------

pub(crate) struct VersionSet {
    env: Arc<dyn Env>,
    db_path: PathBuf,
    icmp: InternalKeyComparator,
    max_file_size: u64,
    table_cache: Arc<TableCache>,

    next_file_number: u64,
    manifest_file_number: u64,
    last_sequence: SequenceNumber,

    /// WALs numbered below this are fully represented by table files.
    log_number: u64,

    current: Arc<Version>,

    /// Weak registry of every version handed out, for the live-file sweep.
    live: Vec<Weak<Version>>,

    /// Per-level cursor for round-robin compaction file selection.
    compact_pointers: [Option<InternalKey>; NUM_LEVELS],

    manifest_log: Option<LogWriter>,
    manifest_size: u64,
}

impl VersionSet {
    pub(crate) fn new(
        db_path: PathBuf,
        config: &DbConfig,
        icmp: InternalKeyComparator,
        table_cache: Arc<TableCache>,
    ) -> VersionSet {
        VersionSet {
            env: Arc::clone(&config.env),
            db_path,
            icmp,
            max_file_size: config.max_file_size,
            table_cache,
            next_file_number: 2,
            manifest_file_number: 0,
            last_sequence: 0,
            log_number: 0,
            current: Arc::new(Version::empty()),
            live: Vec::new(),
            compact_pointers: Default::default(),
            manifest_log: None,
            manifest_size: 0,
        }
    }

    // --------------------------------------------------------------------------------------------
    // Accessors
    // --------------------------------------------------------------------------------------------

    pub(crate) fn current(&self) -> Arc<Version> {
        Arc::clone(&self.current)
    }

    pub(crate) fn last_sequence(&self) -> SequenceNumber {
        self.last_sequence
    }

    pub(crate) fn set_last_sequence(&mut self, sequence: SequenceNumber) {
        debug_assert!(sequence >= self.last_sequence);
        self.last_sequence = sequence;
    }

    pub(crate) fn log_number(&self) -> u64 {
        self.log_number
    }

    pub(crate) fn manifest_file_number(&self) -> u64 {
        self.manifest_file_number
    }

    pub(crate) fn new_file_number(&mut self) -> u64 {
        let number = self.next_file_number;
        self.next_file_number += 1;
        number
    }

    pub(crate) fn mark_file_number_used(&mut self, number: u64) {
        if self.next_file_number <= number {
            self.next_file_number = number + 1;
        }
    }

    pub(crate) fn num_level_files(&self, level: usize) -> usize {
        self.current.files[level].len()
    }

    pub(crate) fn num_level_bytes(&self, level: usize) -> u64 {
        total_file_size(&self.current.files[level])
    }

    pub(crate) fn needs_compaction(&self) -> bool {
        self.current.compaction_score >= 1.0
    }

    /// One-line per-level file-count summary for diagnostics.
    pub(crate) fn level_summary(&self) -> String {
        let counts: Vec<String> = (0..NUM_LEVELS)
            .map(|level| self.current.files[level].len().to_string())
            .collect();
        format!("files[ {} ]", counts.join(" "))
    }

    // --------------------------------------------------------------------------------------------
    // Creating a fresh database
    // --------------------------------------------------------------------------------------------

    /// Write the bootstrap manifest of an empty database and point
    /// `CURRENT` at it.
    pub(crate) fn create_new_db(
        env: &dyn Env,
        db_path: &std::path::Path,
        user_comparator_name: &str,
    ) -> Result<(), VersionError> {
        let mut edit = VersionEdit::new();
        edit.comparator_name = Some(user_comparator_name.to_string());
        edit.log_number = Some(0);
        edit.next_file_number = Some(2);
        edit.last_sequence = Some(0);

        let manifest_number = 1;
        let path = manifest_file_name(db_path, manifest_number);
        let file = env.new_writable_file(&path)?;
        let mut log = LogWriter::new(file);
        let write = (|| {
            log.add_record(&edit.encode())?;
            log.sync()
        })();
        if let Err(err) = write {
            let _ = env.remove_file(&path);
            return Err(err.into());
        }
        drop(log);

        if let Err(err) = set_current_file(env, db_path, manifest_number) {
            let _ = env.remove_file(&path);
            return Err(err.into());
        }
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Recovery
    // --------------------------------------------------------------------------------------------

    /// Rebuild the current version from the manifest named by `CURRENT`.
    pub(crate) fn recover(&mut self) -> Result<(), VersionError> {
        let current_path = current_file_name(&self.db_path);
        let mut current_file = self.env.new_sequential_file(&current_path)?;
        let contents = current_file.read(1024)?;
        let name = std::str::from_utf8(&contents)
            .ok()
            .and_then(|text| text.strip_suffix('\n'))
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                VersionError::Corruption("CURRENT file does not name a manifest".to_string())
            })?
            .to_string();

        let manifest_path = self.db_path.join(&name);
        let manifest_file = self.env.new_sequential_file(&manifest_path)?;

        struct Reporter {
            first: Option<String>,
        }
        impl CorruptionReporter for Reporter {
            fn corruption(&mut self, bytes: usize, reason: &str) {
                if self.first.is_none() {
                    self.first = Some(format!("{reason} ({bytes} bytes dropped)"));
                }
            }
        }
        let mut reporter = Reporter { first: None };

        let mut builder = Builder::new(self.icmp.clone(), self.current());
        let mut log_number: Option<u64> = None;
        let mut next_file: Option<u64> = None;
        let mut last_sequence: Option<SequenceNumber> = None;
        let mut read_records = 0usize;

        {
            let mut reader =
                LogReader::new(manifest_file, Some(&mut reporter), true, 0);
            while let Some(record) = reader.read_record() {
                read_records += 1;
                let edit = VersionEdit::decode(&record)?;

                if let Some(edit_cmp) = &edit.comparator_name {
                    let ours = self.icmp.user_comparator().name();
                    if edit_cmp != ours {
                        return Err(VersionError::ComparatorMismatch(format!(
                            "{edit_cmp} does not match existing comparator {ours}"
                        )));
                    }
                }

                for (level, key) in &edit.compact_pointers {
                    self.compact_pointers[*level] = Some(key.clone());
                }
                builder.apply(&edit);

                if edit.log_number.is_some() {
                    log_number = edit.log_number;
                }
                if edit.next_file_number.is_some() {
                    next_file = edit.next_file_number;
                }
                if edit.last_sequence.is_some() {
                    last_sequence = edit.last_sequence;
                }
            }
        }

        if let Some(reason) = reporter.first {
            return Err(VersionError::Corruption(format!(
                "manifest {name}: {reason}"
            )));
        }

        let next_file =
            next_file.ok_or_else(|| VersionError::Corruption("no next-file entry in manifest".into()))?;
        let log_number =
            log_number.ok_or_else(|| VersionError::Corruption("no log-number entry in manifest".into()))?;
        let last_sequence = last_sequence
            .ok_or_else(|| VersionError::Corruption("no last-sequence entry in manifest".into()))?;

        let mut version = Version::empty();
        builder.finish(&mut version)?;
        self.finalize(&mut version);
        self.append_version(version);

        self.next_file_number = next_file;
        self.mark_file_number_used(log_number);
        self.manifest_file_number = self.new_file_number();
        self.last_sequence = last_sequence;
        self.log_number = log_number;

        info!(
            manifest = %name,
            records = read_records,
            next_file = self.next_file_number,
            last_sequence = self.last_sequence,
            log_number = self.log_number,
            "recovered version state"
        );
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Applying edits
    // --------------------------------------------------------------------------------------------

    /// Make `edit` durable and install the resulting version as current.
    pub(crate) fn log_and_apply(&mut self, edit: &mut VersionEdit) -> Result<(), VersionError> {
        match edit.log_number {
            None => edit.log_number = Some(self.log_number),
            Some(n) => {
                debug_assert!(n >= self.log_number);
                debug_assert!(n < self.next_file_number);
            }
        }
        edit.next_file_number = Some(self.next_file_number);
        edit.last_sequence = Some(self.last_sequence);

        for (level, key) in &edit.compact_pointers {
            self.compact_pointers[*level] = Some(key.clone());
        }

        let mut version = Version::empty();
        let mut builder = Builder::new(self.icmp.clone(), self.current());
        builder.apply(edit);
        builder.finish(&mut version)?;
        self.finalize(&mut version);

        // Open a fresh manifest (with a full snapshot as its first record)
        // on first use or when the old one has grown past the rotation
        // threshold.
        let mut created_manifest: Option<u64> = None;
        if self.manifest_log.is_none() || self.manifest_size > MAX_MANIFEST_FILE_SIZE {
            if self.manifest_log.is_some() {
                self.manifest_file_number = self.new_file_number();
                // The rotation must be reflected in the edit's counters.
                edit.next_file_number = Some(self.next_file_number);
            }
            let number = self.manifest_file_number;
            let path = manifest_file_name(&self.db_path, number);
            let file = self.env.new_writable_file(&path)?;
            let mut log = LogWriter::new(file);
            if let Err(err) = self.write_snapshot(&mut log) {
                error!(manifest = number, "failed to write manifest snapshot");
                let _ = self.env.remove_file(&path);
                return Err(err);
            }
            self.manifest_log = Some(log);
            self.manifest_size = 0;
            created_manifest = Some(number);
        }

        let record = edit.encode();
        let result = (|| {
            let log = self
                .manifest_log
                .as_mut()
                .expect("manifest log just ensured");
            log.add_record(&record)?;
            log.sync()
        })();
        if let Err(err) = result {
            error!(%err, "manifest append failed");
            if let Some(number) = created_manifest {
                self.manifest_log = None;
                let _ = self
                    .env
                    .remove_file(&manifest_file_name(&self.db_path, number));
            }
            return Err(err.into());
        }
        self.manifest_size += record.len() as u64;

        if let Some(number) = created_manifest {
            set_current_file(self.env.as_ref(), &self.db_path, number)?;
        }

        self.append_version(version);
        self.log_number = edit.log_number.expect("log number set above");
        Ok(())
    }

    fn append_version(&mut self, version: Version) {
        let version = Arc::new(version);
        self.live.retain(|weak| weak.strong_count() > 0);
        self.live.push(Arc::downgrade(&version));
        self.current = version;
    }

    /// Score each level; the highest ratio decides the next size-triggered
    /// compaction.
    fn finalize(&self, version: &mut Version) {
        let mut best_level = 0;
        let mut best_score: f64 = -1.0;

        for level in 0..NUM_LEVELS - 1 {
            let score = if level == 0 {
                // File count, not bytes: every L0 file widens every read,
                // and a small write buffer would otherwise never trigger.
                version.files[0].len() as f64 / L0_COMPACTION_TRIGGER as f64
            } else {
                total_file_size(&version.files[level]) as f64 / max_bytes_for_level(level)
            };
            if score > best_score {
                best_level = level;
                best_score = score;
            }
        }

        version.compaction_level = best_level;
        version.compaction_score = best_score;
    }

    /// Serialise the entire current state as one edit.
    fn write_snapshot(&self, log: &mut LogWriter) -> Result<(), VersionError> {
        let mut edit = VersionEdit::new();
        edit.comparator_name = Some(self.icmp.user_comparator().name().to_string());

        for (level, pointer) in self.compact_pointers.iter().enumerate() {
            if let Some(key) = pointer {
                edit.set_compact_pointer(level, key.clone());
            }
        }
        for (level, files) in self.current.files.iter().enumerate() {
            for file in files {
                edit.add_file(
                    level,
                    file.number,
                    file.file_size,
                    file.smallest.clone(),
                    file.largest.clone(),
                );
            }
        }

        log.add_record(&edit.encode())?;
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Live files and sizes
    // --------------------------------------------------------------------------------------------

    /// File numbers referenced by any version still reachable from an
    /// iterator, a compaction, or `current`.
    pub(crate) fn live_files(&mut self) -> HashSet<u64> {
        let mut live = HashSet::new();
        self.live.retain(|weak| weak.strong_count() > 0);
        for weak in &self.live {
            if let Some(version) = weak.upgrade() {
                for files in &version.files {
                    for file in files {
                        live.insert(file.number);
                    }
                }
            }
        }
        live
    }

    /// Approximate byte offset of `key` within the keyspace of `version`.
    pub(crate) fn approximate_offset_of(&self, version: &Version, key: &InternalKey) -> u64 {
        let mut result = 0;
        for (level, files) in version.files.iter().enumerate() {
            for file in files {
                if self
                    .icmp
                    .compare(file.largest.encoded(), key.encoded())
                    .is_le()
                {
                    result += file.file_size;
                } else if self
                    .icmp
                    .compare(file.smallest.encoded(), key.encoded())
                    .is_gt()
                {
                    // Everything in this file is past `key`; deeper files
                    // of a sorted level are too.
                    if level > 0 {
                        break;
                    }
                } else {
                    result += self.table_cache.approximate_offset_of(
                        file.number,
                        file.file_size,
                        key.encoded(),
                    );
                }
            }
        }
        result
    }

    /// Largest next-level overlap of any single file, a gauge of future
    /// compaction work.
    pub(crate) fn max_next_level_overlapping_bytes(&self) -> u64 {
        let mut worst = 0;
        for level in 1..NUM_LEVELS - 1 {
            for file in &self.current.files[level] {
                let overlaps = self.current.overlapping_inputs(
                    &self.icmp,
                    level + 1,
                    Some(&file.smallest),
                    Some(&file.largest),
                );
                worst = worst.max(total_file_size(&overlaps));
            }
        }
        worst
    }

    // --------------------------------------------------------------------------------------------
    // Compaction selection
    // --------------------------------------------------------------------------------------------

    /// Smallest and largest internal key across `files`.
    fn key_range(&self, files: &[Arc<FileMetaData>]) -> (InternalKey, InternalKey) {
        debug_assert!(!files.is_empty());
        let mut smallest = files[0].smallest.clone();
        let mut largest = files[0].largest.clone();
        for file in &files[1..] {
            if self.icmp.compare_keys(&file.smallest, &smallest).is_lt() {
                smallest = file.smallest.clone();
            }
            if self.icmp.compare_keys(&file.largest, &largest).is_gt() {
                largest = file.largest.clone();
            }
        }
        (smallest, largest)
    }

    fn key_range2(
        &self,
        a: &[Arc<FileMetaData>],
        b: &[Arc<FileMetaData>],
    ) -> (InternalKey, InternalKey) {
        let all: Vec<Arc<FileMetaData>> = a.iter().chain(b.iter()).cloned().collect();
        self.key_range(&all)
    }

    /// Choose the next compaction: size-triggered first, else the
    /// seek-triggered candidate, else nothing.
    pub(crate) fn pick_compaction(
        &mut self,
        seek_file: Option<(usize, Arc<FileMetaData>)>,
    ) -> Option<Compaction> {
        let current = self.current();

        let mut compaction = if current.compaction_score >= 1.0 {
            let level = current.compaction_level;
            debug_assert!(level + 1 < NUM_LEVELS);

            // Round-robin within the level: first file past the pointer.
            let mut inputs: Vec<Arc<FileMetaData>> = Vec::new();
            for file in &current.files[level] {
                let past_pointer = match &self.compact_pointers[level] {
                    None => true,
                    Some(pointer) => self
                        .icmp
                        .compare(file.largest.encoded(), pointer.encoded())
                        .is_gt(),
                };
                if past_pointer {
                    inputs.push(Arc::clone(file));
                    break;
                }
            }
            if inputs.is_empty() {
                // Pointer wrapped: start over at the beginning.
                inputs.push(Arc::clone(&current.files[level][0]));
            }

            let mut compaction =
                Compaction::new(self.icmp.clone(), level, self.max_file_size, Arc::clone(&current));
            compaction.inputs[0] = inputs;
            compaction
        } else if let Some((level, file)) = seek_file {
            let mut compaction =
                Compaction::new(self.icmp.clone(), level, self.max_file_size, Arc::clone(&current));
            compaction.inputs[0] = vec![file];
            compaction
        } else {
            return None;
        };

        if compaction.level == 0 {
            // L0 files overlap: widen to every file touching the range.
            let (smallest, largest) = self.key_range(&compaction.inputs[0]);
            compaction.inputs[0] =
                current.overlapping_inputs(&self.icmp, 0, Some(&smallest), Some(&largest));
            debug_assert!(!compaction.inputs[0].is_empty());
        }

        self.setup_other_inputs(&mut compaction);
        Some(compaction)
    }

    /// Manual compaction of `level` over `[begin, end]`.
    pub(crate) fn compact_range(
        &mut self,
        level: usize,
        begin: Option<&InternalKey>,
        end: Option<&InternalKey>,
    ) -> Option<Compaction> {
        let current = self.current();
        let mut inputs = current.overlapping_inputs(&self.icmp, level, begin, end);
        if inputs.is_empty() {
            return None;
        }

        // A manual compaction over many files would tie up the worker for
        // a long time; at sorted levels, trim to roughly one output's
        // worth and let the caller loop.
        if level > 0 {
            let mut total = 0;
            let mut keep = inputs.len();
            for (i, file) in inputs.iter().enumerate() {
                total += file.file_size;
                if total >= self.max_file_size {
                    keep = i + 1;
                    break;
                }
            }
            inputs.truncate(keep);
        }

        let mut compaction =
            Compaction::new(self.icmp.clone(), level, self.max_file_size, current);
        compaction.inputs[0] = inputs;
        self.setup_other_inputs(&mut compaction);
        Some(compaction)
    }

    /// Fill in the next-level inputs and grandparents; grow the base-level
    /// input set while that does not widen the next-level overlap.
    fn setup_other_inputs(&mut self, compaction: &mut Compaction) {
        let current = Arc::clone(&compaction.input_version);
        let level = compaction.level;

        let (smallest, mut largest) = self.key_range(&compaction.inputs[0]);
        compaction.inputs[1] =
            current.overlapping_inputs(&self.icmp, level + 1, Some(&smallest), Some(&largest));

        let (mut all_start, mut all_limit) =
            self.key_range2(&compaction.inputs[0], &compaction.inputs[1]);

        if !compaction.inputs[1].is_empty() {
            let expanded0 =
                current.overlapping_inputs(&self.icmp, level, Some(&all_start), Some(&all_limit));
            let inputs1_size = total_file_size(&compaction.inputs[1]);
            let expanded0_size = total_file_size(&expanded0);
            if expanded0.len() > compaction.inputs[0].len()
                && inputs1_size + expanded0_size
                    < expanded_compaction_byte_size_limit(self.max_file_size)
            {
                let (new_start, new_limit) = self.key_range(&expanded0);
                let expanded1 = current.overlapping_inputs(
                    &self.icmp,
                    level + 1,
                    Some(&new_start),
                    Some(&new_limit),
                );
                if expanded1.len() == compaction.inputs[1].len() {
                    info!(
                        level,
                        from_files = compaction.inputs[0].len(),
                        to_files = expanded0.len(),
                        "expanding compaction inputs"
                    );
                    largest = new_limit;
                    compaction.inputs[0] = expanded0;
                    compaction.inputs[1] = expanded1;
                    (all_start, all_limit) =
                        self.key_range2(&compaction.inputs[0], &compaction.inputs[1]);
                }
            }
        }

        if level + 2 < NUM_LEVELS {
            compaction.grandparents = current.overlapping_inputs(
                &self.icmp,
                level + 2,
                Some(&all_start),
                Some(&all_limit),
            );
        }

        // Future compactions of this level resume past what we consumed.
        // Recorded in the edit too, so the cursor survives restarts.
        self.compact_pointers[level] = Some(largest.clone());
        compaction.edit.set_compact_pointer(level, largest);
    }
}

// ------------------------------------------------------------------------------------------------
// Builder — fold edits over a base version
// ------------------------------------------------------------------------------------------------

struct Builder {
    icmp: InternalKeyComparator,
    base: Arc<Version>,
    deleted: [HashSet<u64>; NUM_LEVELS],
    added: [Vec<Arc<FileMetaData>>; NUM_LEVELS],
}

impl Builder {
    fn new(icmp: InternalKeyComparator, base: Arc<Version>) -> Builder {
        Builder {
            icmp,
            base,
            deleted: Default::default(),
            added: Default::default(),
        }
    }

    fn apply(&mut self, edit: &VersionEdit) {
        for (level, number) in &edit.deleted_files {
            self.deleted[*level].insert(*number);
        }
        for (level, file) in &edit.new_files {
            self.deleted[*level].remove(&file.number);
            self.added[*level].push(Arc::new(FileMetaData::new(
                file.number,
                file.file_size,
                file.smallest.clone(),
                file.largest.clone(),
            )));
        }
    }

    fn finish(self, version: &mut Version) -> Result<(), VersionError> {
        for level in 0..NUM_LEVELS {
            let mut files: Vec<Arc<FileMetaData>> = self.base.files[level]
                .iter()
                .chain(self.added[level].iter())
                .filter(|f| !self.deleted[level].contains(&f.number))
                .cloned()
                .collect();
            files.sort_by(|a, b| {
                self.icmp
                    .compare_keys(&a.smallest, &b.smallest)
                    .then(a.number.cmp(&b.number))
            });

            if level > 0 {
                for pair in files.windows(2) {
                    if self
                        .icmp
                        .compare(pair[0].largest.encoded(), pair[1].smallest.encoded())
                        .is_ge()
                    {
                        return Err(VersionError::Corruption(format!(
                            "overlapping files {:06} and {:06} at level {level}",
                            pair[0].number, pair[1].number
                        )));
                    }
                }
            }
            version.files[level] = files;
        }
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Compaction
// ------------------------------------------------------------------------------------------------

/// A selected compaction: inputs at `level` and `level + 1`, the
/// grandparent files used to bound output size, and the edit under
/// construction.
pub(crate) struct Compaction {
    icmp: InternalKeyComparator,
    pub(crate) level: usize,
    max_file_size: u64,
    pub(crate) input_version: Arc<Version>,
    pub(crate) edit: VersionEdit,
    pub(crate) inputs: [Vec<Arc<FileMetaData>>; 2],
    grandparents: Vec<Arc<FileMetaData>>,

    // `should_stop_before` scan state.
    grandparent_index: usize,
    seen_key: bool,
    overlapped_bytes: u64,

    // `is_base_level_for_key` scan state: per-level cursors that only move
    // forward, valid because compaction keys arrive in ascending order.
    level_ptrs: [usize; NUM_LEVELS],
}

impl Compaction {
    fn new(
        icmp: InternalKeyComparator,
        level: usize,
        max_file_size: u64,
        input_version: Arc<Version>,
    ) -> Compaction {
        Compaction {
            icmp,
            level,
            max_file_size,
            input_version,
            edit: VersionEdit::new(),
            inputs: [Vec::new(), Vec::new()],
            grandparents: Vec::new(),
            grandparent_index: 0,
            seen_key: false,
            overlapped_bytes: 0,
            level_ptrs: [0; NUM_LEVELS],
        }
    }

    pub(crate) fn level(&self) -> usize {
        self.level
    }

    pub(crate) fn max_output_file_size(&self) -> u64 {
        self.max_file_size
    }

    pub(crate) fn num_input_files(&self, which: usize) -> usize {
        self.inputs[which].len()
    }

    pub(crate) fn input(&self, which: usize, index: usize) -> &Arc<FileMetaData> {
        &self.inputs[which][index]
    }

    /// A single input file with nothing to merge against can simply be
    /// re-parented to the next level — unless it drags too much
    /// grandparent overlap along, which would make future compactions at
    /// `level + 1` oversized.
    pub(crate) fn is_trivial_move(&self) -> bool {
        self.num_input_files(0) == 1
            && self.num_input_files(1) == 0
            && total_file_size(&self.grandparents)
                <= max_grandparent_overlap_bytes(self.max_file_size)
    }

    /// Record every input file as deleted.
    pub(crate) fn add_input_deletions(&mut self) {
        for which in 0..2 {
            for file in &self.inputs[which] {
                self.edit.remove_file(self.level + which, file.number);
            }
        }
    }

    /// True when no level deeper than the output can contain `user_key` —
    /// the condition under which a tombstone may be dropped.
    pub(crate) fn is_base_level_for_key(&mut self, user_key: &[u8]) -> bool {
        let ucmp = self.icmp.user_comparator();
        for level in (self.level + 2)..NUM_LEVELS {
            let files = &self.input_version.files[level];
            while self.level_ptrs[level] < files.len() {
                let file = &files[self.level_ptrs[level]];
                if ucmp.compare(user_key, file.largest.user_key()).is_le() {
                    if ucmp.compare(user_key, file.smallest.user_key()).is_ge() {
                        return false;
                    }
                    break;
                }
                self.level_ptrs[level] += 1;
            }
        }
        true
    }

    /// Should the current output file be cut before `internal_key`?
    /// Bounds how much grandparent data any one output file overlaps.
    pub(crate) fn should_stop_before(&mut self, internal_key: &[u8]) -> bool {
        while self.grandparent_index < self.grandparents.len()
            && self
                .icmp
                .compare(
                    internal_key,
                    self.grandparents[self.grandparent_index].largest.encoded(),
                )
                .is_gt()
        {
            if self.seen_key {
                self.overlapped_bytes += self.grandparents[self.grandparent_index].file_size;
            }
            self.grandparent_index += 1;
        }
        self.seen_key = true;

        if self.overlapped_bytes > max_grandparent_overlap_bytes(self.max_file_size) {
            self.overlapped_bytes = 0;
            true
        } else {
            false
        }
    }
}
