//! Names of the files inside a database directory.
//!
//! ```text
//! CURRENT          ->  "MANIFEST-<n>\n", the active manifest
//! MANIFEST-<n>     ->  log of version edits
//! <n>.log          ->  write-ahead log of one memtable generation
//! <n>.ldb          ->  sorted table
//! <n>.dbtmp        ->  scratch file promoted via rename
//! LOCK             ->  advisory lock
//! LOG, LOG.old     ->  legacy diagnostic logs (recognised for cleanup)
//! ```
//!
//! Numbers come from one shared counter, so a file number identifies a
//! file regardless of its role.

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::io;
use std::path::{Path, PathBuf};

use crate::env::Env;

// ------------------------------------------------------------------------------------------------
// File kinds
// ------------------------------------------------------------------------------------------------

/// Decoded role of a file found in the database directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FileKind {
    Log(u64),
    Table(u64),
    Manifest(u64),
    Current,
    Lock,
    InfoLog,
    Temp(u64),
}

// ------------------------------------------------------------------------------------------------
// Name construction
// ------------------------------------------------------------------------------------------------

pub(crate) fn log_file_name(db: &Path, number: u64) -> PathBuf {
    db.join(format!("{number:06}.log"))
}

pub(crate) fn table_file_name(db: &Path, number: u64) -> PathBuf {
    db.join(format!("{number:06}.ldb"))
}

pub(crate) fn manifest_file_name(db: &Path, number: u64) -> PathBuf {
    db.join(format!("MANIFEST-{number:06}"))
}

pub(crate) fn current_file_name(db: &Path) -> PathBuf {
    db.join("CURRENT")
}

pub(crate) fn lock_file_name(db: &Path) -> PathBuf {
    db.join("LOCK")
}

pub(crate) fn temp_file_name(db: &Path, number: u64) -> PathBuf {
    db.join(format!("{number:06}.dbtmp"))
}

// ------------------------------------------------------------------------------------------------
// Name parsing
// ------------------------------------------------------------------------------------------------

/// Classify a directory entry, or `None` for foreign files.
pub(crate) fn parse_file_name(name: &str) -> Option<FileKind> {
    match name {
        "CURRENT" => return Some(FileKind::Current),
        "LOCK" => return Some(FileKind::Lock),
        "LOG" | "LOG.old" => return Some(FileKind::InfoLog),
        _ => {}
    }

    if let Some(rest) = name.strip_prefix("MANIFEST-") {
        let number = parse_number(rest)?;
        return Some(FileKind::Manifest(number));
    }

    let (stem, extension) = name.split_once('.')?;
    let number = parse_number(stem)?;
    match extension {
        "log" => Some(FileKind::Log(number)),
        "ldb" => Some(FileKind::Table(number)),
        "dbtmp" => Some(FileKind::Temp(number)),
        _ => None,
    }
}

fn parse_number(text: &str) -> Option<u64> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

// ------------------------------------------------------------------------------------------------
// CURRENT maintenance
// ------------------------------------------------------------------------------------------------

/// Point `CURRENT` at `MANIFEST-<manifest_number>`.
///
/// Written to a temp file first and renamed into place, so `CURRENT` is
/// never observed empty or half-written; the directory is synced to make
/// the rename itself durable.
pub(crate) fn set_current_file(
    env: &dyn Env,
    db: &Path,
    manifest_number: u64,
) -> io::Result<()> {
    let contents = format!("MANIFEST-{manifest_number:06}\n");
    let temp = temp_file_name(db, manifest_number);

    let mut file = env.new_writable_file(&temp)?;
    file.append(contents.as_bytes())?;
    file.sync()?;
    drop(file);

    if let Err(err) = env.rename_file(&temp, &current_file_name(db)) {
        let _ = env.remove_file(&temp);
        return Err(err);
    }
    env.sync_dir(db)
}
