//! # Write-Ahead Log
//!
//! Block-framed record log used for both memtable durability (`<n>.log`)
//! and the manifest (`MANIFEST-<n>`).  Records survive crashes up to the
//! last fully-synced byte; a torn tail is detected and discarded rather
//! than misread.
//!
//! # On-disk layout
//!
//! A log file is a sequence of 32 KiB blocks.  Each block holds physical
//! records; a logical record too large for the space left in a block is
//! split across blocks:
//!
//! ```text
//! block := physical_record* trailer?
//! physical_record := masked_crc32c(4 LE) length(2 LE) type(1) payload[length]
//! type := Zero | Full | First | Middle | Last
//! ```
//!
//! - `Full` — the whole logical record in one fragment.
//! - `First`/`Middle`/`Last` — fragments of one logical record, in order.
//! - `Zero` — padding emitted by preallocating writers; skipped on read.
//! - A block tail of fewer than 7 bytes cannot hold a header and is
//!   zero-filled.
//!
//! The CRC covers `type ‖ payload` and is stored masked (see
//! [`crate::checksum`]) so that records containing embedded CRCs — the
//! manifest logs table checksums, for instance — stay well-conditioned.
//!
//! # Corruption handling
//!
//! The reader validates each header before trusting its length field.  A
//! bad checksum or impossible length drops the **rest of the block** (the
//! length itself may be corrupt, so resynchronisation within the block is
//! unsafe) and notifies the caller's [`CorruptionReporter`].  End-of-file
//! inside a record or header is *not* corruption: it is the signature of a
//! writer that crashed mid-append, and the partial record is silently
//! dropped.
//!
//! A reader may start at a byte offset into the log. It skips to the
//! containing block and discards physical records that began earlier; while
//! resynchronising, a `Middle` fragment is skipped and a `Last` fragment is
//! consumed **without being surfaced**, since its beginning predates the
//! starting offset.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::io;

use thiserror::Error;

use crate::checksum;
use crate::encoding::{decode_fixed32, put_fixed32};
use crate::env::{SequentialFile, WritableFile};

// ------------------------------------------------------------------------------------------------
// Constants and record types
// ------------------------------------------------------------------------------------------------

/// Size of a log block.
pub const BLOCK_SIZE: usize = 32 * 1024;

/// Bytes of `crc(4) ‖ length(2) ‖ type(1)` preceding each payload.
pub const HEADER_SIZE: usize = 7;

const MAX_RECORD_TYPE: u8 = RecordType::Last as u8;

/// Physical record type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum RecordType {
    /// Preallocation padding.
    Zero = 0,
    Full = 1,
    First = 2,
    Middle = 3,
    Last = 4,
}

// ------------------------------------------------------------------------------------------------
// Error type and corruption reporting
// ------------------------------------------------------------------------------------------------

/// Errors returned by the log writer.
#[derive(Debug, Error)]
pub enum WalError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Receives notice of every byte range the reader had to drop.
///
/// Replay decides the policy: default recovery tolerates a torn tail, while
/// paranoid mode promotes any drop to a hard failure.
pub trait CorruptionReporter {
    /// `bytes` were skipped because of `reason`.
    fn corruption(&mut self, bytes: usize, reason: &str);
}

// ------------------------------------------------------------------------------------------------
// Writer
// ------------------------------------------------------------------------------------------------

/// Appends logical records, fragmenting across 32 KiB block boundaries.
pub struct LogWriter {
    dest: Box<dyn WritableFile>,

    /// Byte offset within the current block.
    block_offset: usize,

    /// CRCs of each type byte, precomputed so per-record work is a single
    /// extend over the payload.
    type_crc: [u32; (MAX_RECORD_TYPE + 1) as usize],
}

impl LogWriter {
    /// Writer for a fresh, empty log file.
    pub fn new(dest: Box<dyn WritableFile>) -> LogWriter {
        let mut type_crc = [0u32; (MAX_RECORD_TYPE + 1) as usize];
        for (tag, slot) in type_crc.iter_mut().enumerate() {
            *slot = checksum::value(&[tag as u8]);
        }
        LogWriter {
            dest,
            block_offset: 0,
            type_crc,
        }
    }

    /// Append one logical record. Durable only after [`LogWriter::sync`]
    /// (or the file's own close-time flush) unless the caller syncs.
    pub fn add_record(&mut self, record: &[u8]) -> Result<(), WalError> {
        let mut left = record;
        let mut begin = true;

        // Empty records still emit one zero-length Full fragment.
        loop {
            let leftover = BLOCK_SIZE - self.block_offset;
            if leftover < HEADER_SIZE {
                // Not enough room for a header: zero-fill the trailer and
                // open a new block.
                if leftover > 0 {
                    self.dest.append(&[0u8; HEADER_SIZE - 1][..leftover])?;
                }
                self.block_offset = 0;
            }

            let available = BLOCK_SIZE - self.block_offset - HEADER_SIZE;
            let fragment_length = left.len().min(available);
            let end = fragment_length == left.len();

            let record_type = match (begin, end) {
                (true, true) => RecordType::Full,
                (true, false) => RecordType::First,
                (false, true) => RecordType::Last,
                (false, false) => RecordType::Middle,
            };

            self.emit_physical_record(record_type, &left[..fragment_length])?;
            left = &left[fragment_length..];
            begin = false;
            if left.is_empty() {
                break;
            }
        }
        Ok(())
    }

    /// Fsync the underlying file.
    pub fn sync(&mut self) -> Result<(), WalError> {
        self.dest.sync()?;
        Ok(())
    }

    /// Flush buffered bytes to the OS without fsync.
    pub fn flush(&mut self) -> Result<(), WalError> {
        self.dest.flush()?;
        Ok(())
    }

    fn emit_physical_record(
        &mut self,
        record_type: RecordType,
        payload: &[u8],
    ) -> Result<(), WalError> {
        debug_assert!(payload.len() <= 0xffff);
        debug_assert!(self.block_offset + HEADER_SIZE + payload.len() <= BLOCK_SIZE);

        let crc = checksum::extend(self.type_crc[record_type as usize], payload);

        let mut header = Vec::with_capacity(HEADER_SIZE);
        put_fixed32(&mut header, checksum::mask(crc));
        header.push((payload.len() & 0xff) as u8);
        header.push((payload.len() >> 8) as u8);
        header.push(record_type as u8);

        self.dest.append(&header)?;
        self.dest.append(payload)?;
        self.dest.flush()?;
        self.block_offset += HEADER_SIZE + payload.len();
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Reader
// ------------------------------------------------------------------------------------------------

/// Outcome of reading one physical record.
enum Physical {
    Record(RecordType, Vec<u8>),

    /// Clean or torn end of input.
    Eof,

    /// Dropped bytes (bad header, bad checksum, pre-initial-offset record,
    /// or zero-padding); reading may continue at the next block.
    Bad,

    /// A header byte carried a type outside the known set.
    Unknown(u8, Vec<u8>),
}

/// Reads logical records back, reassembling fragments and skipping
/// corruption per the module docs.
pub struct LogReader<'a> {
    file: Box<dyn SequentialFile>,
    reporter: Option<&'a mut dyn CorruptionReporter>,
    verify_checksums: bool,

    /// Bytes of the current block not yet consumed.
    block: Vec<u8>,
    pos: usize,
    eof: bool,

    /// File offset one past the buffered block.
    end_of_buffer_offset: u64,

    /// Offset of the start of the last record returned.
    last_record_offset: u64,

    initial_offset: u64,
    resyncing: bool,
}

impl<'a> LogReader<'a> {
    /// Start reading at `initial_offset` (0 for the whole log).
    pub fn new(
        file: Box<dyn SequentialFile>,
        reporter: Option<&'a mut dyn CorruptionReporter>,
        verify_checksums: bool,
        initial_offset: u64,
    ) -> LogReader<'a> {
        LogReader {
            file,
            reporter,
            verify_checksums,
            block: Vec::new(),
            pos: 0,
            eof: false,
            end_of_buffer_offset: 0,
            last_record_offset: 0,
            initial_offset,
            resyncing: initial_offset > 0,
        }
    }

    /// File offset where the most recently returned record begins.
    pub fn last_record_offset(&self) -> u64 {
        self.last_record_offset
    }

    /// Read the next logical record, or `None` at end of log.
    pub fn read_record(&mut self) -> Option<Vec<u8>> {
        if self.last_record_offset < self.initial_offset && !self.skip_to_initial_block() {
            return None;
        }

        let mut scratch: Vec<u8> = Vec::new();
        let mut in_fragmented_record = false;
        // Offset of the first fragment of the record being assembled.
        let mut prospective_offset = 0u64;

        loop {
            let physical = self.read_physical_record();

            // Offset of the fragment just returned, accounting for the
            // consumed header.
            let fragment_len = match &physical {
                Physical::Record(_, payload) | Physical::Unknown(_, payload) => payload.len(),
                _ => 0,
            };
            let physical_offset = self
                .end_of_buffer_offset
                .wrapping_sub(self.remaining() as u64)
                .wrapping_sub(HEADER_SIZE as u64)
                .wrapping_sub(fragment_len as u64);

            if self.resyncing {
                match physical {
                    Physical::Record(RecordType::Middle, _) => continue,
                    Physical::Record(RecordType::Last, _) => {
                        // The record began before our starting offset:
                        // consume without surfacing it.
                        self.resyncing = false;
                        continue;
                    }
                    _ => self.resyncing = false,
                }
            }

            match physical {
                Physical::Record(RecordType::Full, payload) => {
                    if in_fragmented_record && !scratch.is_empty() {
                        // Tolerated writer quirk: an empty First fragment at
                        // a block tail followed by a Full record.
                        self.report_corruption(scratch.len(), "partial record without end(1)");
                    }
                    self.last_record_offset = physical_offset;
                    return Some(payload);
                }

                Physical::Record(RecordType::First, payload) => {
                    if in_fragmented_record && !scratch.is_empty() {
                        self.report_corruption(scratch.len(), "partial record without end(2)");
                    }
                    prospective_offset = physical_offset;
                    scratch = payload;
                    in_fragmented_record = true;
                }

                Physical::Record(RecordType::Middle, payload) => {
                    if !in_fragmented_record {
                        self.report_corruption(
                            payload.len(),
                            "missing start of fragmented record(1)",
                        );
                    } else {
                        scratch.extend_from_slice(&payload);
                    }
                }

                Physical::Record(RecordType::Last, payload) => {
                    if !in_fragmented_record {
                        self.report_corruption(
                            payload.len(),
                            "missing start of fragmented record(2)",
                        );
                    } else {
                        scratch.extend_from_slice(&payload);
                        self.last_record_offset = prospective_offset;
                        return Some(scratch);
                    }
                }

                Physical::Record(RecordType::Zero, _) => {
                    // Zero-length padding records are filtered out by
                    // `read_physical_record`; a non-empty Zero record is an
                    // unknown-type corruption.
                    let dropped =
                        fragment_len + if in_fragmented_record { scratch.len() } else { 0 };
                    self.report_corruption(dropped, "unknown record type 0");
                    in_fragmented_record = false;
                    scratch.clear();
                }

                Physical::Eof => {
                    // A torn fragment at EOF means the writer died
                    // mid-record; drop it without reporting.
                    return None;
                }

                Physical::Bad => {
                    if in_fragmented_record {
                        self.report_corruption(scratch.len(), "error in middle of record");
                        in_fragmented_record = false;
                        scratch.clear();
                    }
                }

                Physical::Unknown(tag, payload) => {
                    let dropped =
                        payload.len() + if in_fragmented_record { scratch.len() } else { 0 };
                    self.report_corruption(dropped, &format!("unknown record type {tag}"));
                    in_fragmented_record = false;
                    scratch.clear();
                }
            }
        }
    }

    #[inline]
    fn remaining(&self) -> usize {
        self.block.len() - self.pos
    }

    fn skip_to_initial_block(&mut self) -> bool {
        let offset_in_block = self.initial_offset % BLOCK_SIZE as u64;
        let mut block_start = self.initial_offset - offset_in_block;

        // An offset inside a block's zero-filled trailer belongs to the
        // next block.
        if offset_in_block > (BLOCK_SIZE - 6) as u64 {
            block_start += BLOCK_SIZE as u64;
        }

        self.end_of_buffer_offset = block_start;

        if block_start > 0
            && let Err(err) = self.file.skip(block_start)
        {
            self.report_drop(block_start as usize, &err.to_string());
            return false;
        }
        true
    }

    fn read_physical_record(&mut self) -> Physical {
        loop {
            if self.remaining() < HEADER_SIZE {
                if !self.eof {
                    // Whatever is left is a block trailer: discard and read
                    // the next block.
                    self.block.clear();
                    self.pos = 0;
                    match self.file.read(BLOCK_SIZE) {
                        Ok(data) => {
                            self.end_of_buffer_offset += data.len() as u64;
                            if data.len() < BLOCK_SIZE {
                                self.eof = true;
                            }
                            self.block = data;
                        }
                        Err(err) => {
                            self.report_drop(BLOCK_SIZE, &err.to_string());
                            self.eof = true;
                            return Physical::Eof;
                        }
                    }
                    continue;
                }
                // A non-empty remainder here is a header truncated by a
                // crash; report EOF rather than corruption.
                self.block.clear();
                self.pos = 0;
                return Physical::Eof;
            }

            let header = &self.block[self.pos..self.pos + HEADER_SIZE];
            let length = usize::from(header[4]) | usize::from(header[5]) << 8;
            let tag = header[6];

            if HEADER_SIZE + length > self.remaining() {
                let drop_size = self.remaining();
                self.block.clear();
                self.pos = 0;
                if !self.eof {
                    self.report_corruption(drop_size, "bad record length");
                    return Physical::Bad;
                }
                // Writer died while writing this record's payload.
                return Physical::Eof;
            }

            if tag == RecordType::Zero as u8 && length == 0 {
                // Preallocation artifact; skip the rest of the block
                // without reporting.
                self.block.clear();
                self.pos = 0;
                return Physical::Bad;
            }

            if self.verify_checksums {
                let expected = checksum::unmask(decode_fixed32(header));
                let actual =
                    checksum::value(&self.block[self.pos + 6..self.pos + HEADER_SIZE + length]);
                if actual != expected {
                    // The length field itself may be corrupt; trusting it
                    // could resynchronise onto garbage that happens to look
                    // like a record, so drop the whole remainder.
                    let drop_size = self.remaining();
                    self.block.clear();
                    self.pos = 0;
                    self.report_corruption(drop_size, "checksum mismatch");
                    return Physical::Bad;
                }
            }

            let payload =
                self.block[self.pos + HEADER_SIZE..self.pos + HEADER_SIZE + length].to_vec();
            self.pos += HEADER_SIZE + length;

            // Skip physical records that started before the initial offset.
            if self
                .end_of_buffer_offset
                .wrapping_sub(self.remaining() as u64)
                .wrapping_sub(HEADER_SIZE as u64)
                .wrapping_sub(length as u64)
                < self.initial_offset
            {
                return Physical::Bad;
            }

            return match tag {
                0 => Physical::Record(RecordType::Zero, payload),
                1 => Physical::Record(RecordType::Full, payload),
                2 => Physical::Record(RecordType::First, payload),
                3 => Physical::Record(RecordType::Middle, payload),
                4 => Physical::Record(RecordType::Last, payload),
                other => Physical::Unknown(other, payload),
            };
        }
    }

    fn report_corruption(&mut self, bytes: usize, reason: &str) {
        self.report_drop(bytes, reason);
    }

    fn report_drop(&mut self, bytes: usize, reason: &str) {
        let dropped_end = self
            .end_of_buffer_offset
            .wrapping_sub(self.remaining() as u64)
            .wrapping_sub(bytes as u64);
        if let Some(reporter) = self.reporter.as_deref_mut()
            && dropped_end >= self.initial_offset
        {
            reporter.corruption(bytes, reason);
        }
    }
}
