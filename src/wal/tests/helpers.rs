//! Shared fixtures for the log reader/writer tests.

use std::fs;
use std::path::Path;

use crate::env::{Env, StdEnv};
use crate::wal::{CorruptionReporter, LogReader, LogWriter};

/// Reporter that accumulates every drop it is told about.
#[derive(Debug, Default)]
pub struct CountingReporter {
    pub drops: usize,
    pub bytes: usize,
    pub reasons: Vec<String>,
}

impl CorruptionReporter for CountingReporter {
    fn corruption(&mut self, bytes: usize, reason: &str) {
        self.drops += 1;
        self.bytes += bytes;
        self.reasons.push(reason.to_string());
    }
}

/// Write `records` into a fresh log file at `path`.
pub fn write_log(path: &Path, records: &[Vec<u8>]) {
    let mut writer = LogWriter::new(StdEnv.new_writable_file(path).unwrap());
    for record in records {
        writer.add_record(record).unwrap();
    }
    writer.sync().unwrap();
}

/// Read every record from `path`, reporting drops into `reporter`.
pub fn read_log(path: &Path, reporter: &mut CountingReporter) -> Vec<Vec<u8>> {
    read_log_from(path, reporter, 0)
}

/// Read every record starting at `initial_offset`.
pub fn read_log_from(
    path: &Path,
    reporter: &mut CountingReporter,
    initial_offset: u64,
) -> Vec<Vec<u8>> {
    let file = StdEnv.new_sequential_file(path).unwrap();
    let mut reader = LogReader::new(file, Some(reporter), true, initial_offset);
    let mut records = Vec::new();
    while let Some(record) = reader.read_record() {
        records.push(record);
    }
    records
}

/// Flip one byte of the file at `offset`.
pub fn corrupt_byte(path: &Path, offset: usize) {
    let mut data = fs::read(path).unwrap();
    data[offset] ^= 0xFF;
    fs::write(path, data).unwrap();
}

/// Cut the file down to `len` bytes.
pub fn truncate_to(path: &Path, len: usize) {
    let mut data = fs::read(path).unwrap();
    data.truncate(len);
    fs::write(path, data).unwrap();
}

/// A record of `len` bytes filled with a value derived from `seed`.
pub fn blob(seed: u8, len: usize) -> Vec<u8> {
    vec![seed.wrapping_mul(31).wrapping_add(7); len]
}
