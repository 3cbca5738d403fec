//! Serialised diffs over the file set, the records of the manifest log.
//!
//! An edit is a sparse bag of tagged fields:
//!
//! ```text
//! edit  := field*
//! field := varint32(tag) payload
//!
//! tag 1  comparator       varstring(name)
//! tag 2  log number       varint64
//! tag 3  next file number varint64
//! tag 4  last sequence    varint64
//! tag 5  compact pointer  varint32(level) varstring(internal key)
//! tag 6  deleted file     varint32(level) varint64(number)
//! tag 7  new file         varint32(level) varint64(number) varint64(size)
//!                         varstring(smallest) varstring(largest)
//! ```
//!
//! Unknown tags are corruption: the manifest is the source of truth for
//! which files exist, and guessing at it risks orphaning or resurrecting
//! data.

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use crate::encoding::{
    get_length_prefixed_slice, get_varint32, get_varint64, put_length_prefixed_slice, put_varint32,
    put_varint64,
};
use crate::keys::{InternalKey, SequenceNumber};
use crate::version::{NUM_LEVELS, VersionError};

// ------------------------------------------------------------------------------------------------
// Field tags
// ------------------------------------------------------------------------------------------------

const TAG_COMPARATOR: u32 = 1;
const TAG_LOG_NUMBER: u32 = 2;
const TAG_NEXT_FILE_NUMBER: u32 = 3;
const TAG_LAST_SEQUENCE: u32 = 4;
const TAG_COMPACT_POINTER: u32 = 5;
const TAG_DELETED_FILE: u32 = 6;
const TAG_NEW_FILE: u32 = 7;

// ------------------------------------------------------------------------------------------------
// New-file record
// ------------------------------------------------------------------------------------------------

/// File addition carried by an edit; becomes a
/// [`FileMetaData`](crate::version::FileMetaData) when the edit is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NewFile {
    pub number: u64,
    pub file_size: u64,
    pub smallest: InternalKey,
    pub largest: InternalKey,
}

// ------------------------------------------------------------------------------------------------
// VersionEdit
// ------------------------------------------------------------------------------------------------

/// One manifest record: everything that changed between two versions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct VersionEdit {
    pub comparator_name: Option<String>,
    pub log_number: Option<u64>,
    pub next_file_number: Option<u64>,
    pub last_sequence: Option<SequenceNumber>,
    pub compact_pointers: Vec<(usize, InternalKey)>,
    pub deleted_files: Vec<(usize, u64)>,
    pub new_files: Vec<(usize, NewFile)>,
}

impl VersionEdit {
    pub fn new() -> VersionEdit {
        VersionEdit::default()
    }

    pub fn add_file(
        &mut self,
        level: usize,
        number: u64,
        file_size: u64,
        smallest: InternalKey,
        largest: InternalKey,
    ) {
        self.new_files.push((
            level,
            NewFile {
                number,
                file_size,
                smallest,
                largest,
            },
        ));
    }

    pub fn remove_file(&mut self, level: usize, number: u64) {
        self.deleted_files.push((level, number));
    }

    pub fn set_compact_pointer(&mut self, level: usize, key: InternalKey) {
        self.compact_pointers.push((level, key));
    }

    // --------------------------------------------------------------------------------------------
    // Serialisation
    // --------------------------------------------------------------------------------------------

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();

        if let Some(name) = &self.comparator_name {
            put_varint32(&mut buf, TAG_COMPARATOR);
            put_length_prefixed_slice(&mut buf, name.as_bytes());
        }
        if let Some(log_number) = self.log_number {
            put_varint32(&mut buf, TAG_LOG_NUMBER);
            put_varint64(&mut buf, log_number);
        }
        if let Some(next_file) = self.next_file_number {
            put_varint32(&mut buf, TAG_NEXT_FILE_NUMBER);
            put_varint64(&mut buf, next_file);
        }
        if let Some(last_sequence) = self.last_sequence {
            put_varint32(&mut buf, TAG_LAST_SEQUENCE);
            put_varint64(&mut buf, last_sequence);
        }
        for (level, key) in &self.compact_pointers {
            put_varint32(&mut buf, TAG_COMPACT_POINTER);
            put_varint32(&mut buf, *level as u32);
            put_length_prefixed_slice(&mut buf, key.encoded());
        }
        for (level, number) in &self.deleted_files {
            put_varint32(&mut buf, TAG_DELETED_FILE);
            put_varint32(&mut buf, *level as u32);
            put_varint64(&mut buf, *number);
        }
        for (level, file) in &self.new_files {
            put_varint32(&mut buf, TAG_NEW_FILE);
            put_varint32(&mut buf, *level as u32);
            put_varint64(&mut buf, file.number);
            put_varint64(&mut buf, file.file_size);
            put_length_prefixed_slice(&mut buf, file.smallest.encoded());
            put_length_prefixed_slice(&mut buf, file.largest.encoded());
        }
        buf
    }

    pub fn decode(record: &[u8]) -> Result<VersionEdit, VersionError> {
        let mut edit = VersionEdit::new();
        let mut rest = record;

        let corrupt = |what: &str| VersionError::Corruption(format!("bad version edit: {what}"));

        while !rest.is_empty() {
            let (tag, n) = get_varint32(rest).map_err(|_| corrupt("tag"))?;
            rest = &rest[n..];
            match tag {
                TAG_COMPARATOR => {
                    let (name, n) =
                        get_length_prefixed_slice(rest).map_err(|_| corrupt("comparator name"))?;
                    let name = std::str::from_utf8(name)
                        .map_err(|_| corrupt("comparator name"))?
                        .to_string();
                    edit.comparator_name = Some(name);
                    rest = &rest[n..];
                }
                TAG_LOG_NUMBER => {
                    let (value, n) = get_varint64(rest).map_err(|_| corrupt("log number"))?;
                    edit.log_number = Some(value);
                    rest = &rest[n..];
                }
                TAG_NEXT_FILE_NUMBER => {
                    let (value, n) = get_varint64(rest).map_err(|_| corrupt("next file number"))?;
                    edit.next_file_number = Some(value);
                    rest = &rest[n..];
                }
                TAG_LAST_SEQUENCE => {
                    let (value, n) = get_varint64(rest).map_err(|_| corrupt("last sequence"))?;
                    edit.last_sequence = Some(value);
                    rest = &rest[n..];
                }
                TAG_COMPACT_POINTER => {
                    let (level, rem) = decode_level(rest).ok_or_else(|| corrupt("compact pointer"))?;
                    let (key, n) =
                        get_length_prefixed_slice(rem).map_err(|_| corrupt("compact pointer"))?;
                    edit.compact_pointers
                        .push((level, InternalKey::from_encoded(key)));
                    rest = &rem[n..];
                }
                TAG_DELETED_FILE => {
                    let (level, rem) = decode_level(rest).ok_or_else(|| corrupt("deleted file"))?;
                    let (number, n) = get_varint64(rem).map_err(|_| corrupt("deleted file"))?;
                    edit.deleted_files.push((level, number));
                    rest = &rem[n..];
                }
                TAG_NEW_FILE => {
                    let (level, rem) = decode_level(rest).ok_or_else(|| corrupt("new file"))?;
                    let (number, n) = get_varint64(rem).map_err(|_| corrupt("new file"))?;
                    let rem = &rem[n..];
                    let (file_size, n) = get_varint64(rem).map_err(|_| corrupt("new file"))?;
                    let rem = &rem[n..];
                    let (smallest, n) =
                        get_length_prefixed_slice(rem).map_err(|_| corrupt("new file"))?;
                    let rem = &rem[n..];
                    let (largest, n) =
                        get_length_prefixed_slice(rem).map_err(|_| corrupt("new file"))?;
                    edit.new_files.push((
                        level,
                        NewFile {
                            number,
                            file_size,
                            smallest: InternalKey::from_encoded(smallest),
                            largest: InternalKey::from_encoded(largest),
                        },
                    ));
                    rest = &rem[n..];
                }
                other => {
                    return Err(corrupt(&format!("unknown tag {other}")));
                }
            }
        }
        Ok(edit)
    }
}

/// Decode a level field and bounds-check it.
fn decode_level(buf: &[u8]) -> Option<(usize, &[u8])> {
    let (level, n) = get_varint32(buf).ok()?;
    let level = level as usize;
    if level >= NUM_LEVELS {
        return None;
    }
    Some((level, &buf[n..]))
}
