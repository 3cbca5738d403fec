//! # Environment Abstraction
//!
//! Every filesystem touch the engine makes goes through the [`Env`] trait:
//! sequential reads (WAL replay), random-access reads (table blocks),
//! append-only writes (WAL, manifest, table builds), directory listing,
//! renames, and the advisory lock that keeps two processes out of the same
//! database directory.
//!
//! The seam exists so tests can interpose failure-injecting or in-memory
//! environments; production code uses [`StdEnv`], which backs random-access
//! reads with `memmap2` memory maps and buffers appends through
//! `BufWriter`.
//!
//! Background scheduling is deliberately **not** part of this trait — the
//! engine owns a single dedicated worker thread and wakes it over a channel.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt as FileLockExt;
use memmap2::Mmap;

// ------------------------------------------------------------------------------------------------
// File traits
// ------------------------------------------------------------------------------------------------

/// A file read front to back (WAL and manifest replay).
pub trait SequentialFile: Send {
    /// Read up to `n` bytes, returning fewer only at end of file.
    fn read(&mut self, n: usize) -> io::Result<Vec<u8>>;

    /// Skip `n` bytes forward.
    fn skip(&mut self, n: u64) -> io::Result<()>;
}

/// A file read at arbitrary offsets (table blocks). Implementations must be
/// usable from several threads at once.
pub trait RandomAccessFile: Send + Sync {
    /// Read exactly `n` bytes starting at `offset`.
    ///
    /// Reading past the end of the file is an error (`UnexpectedEof`), since
    /// every caller reads structures whose size it already knows.
    fn read_at(&self, offset: u64, n: usize) -> io::Result<Vec<u8>>;
}

/// An append-only file (WAL, manifest, table outputs).
pub trait WritableFile: Send {
    /// Buffer `data` at the end of the file.
    fn append(&mut self, data: &[u8]) -> io::Result<()>;

    /// Push buffered data to the operating system.
    fn flush(&mut self) -> io::Result<()>;

    /// Flush, then fsync file contents to stable storage.
    fn sync(&mut self) -> io::Result<()>;
}

/// Advisory lock over a database directory, released on drop.
pub trait FileLock: Send {}

// ------------------------------------------------------------------------------------------------
// Env trait
// ------------------------------------------------------------------------------------------------

/// Filesystem and locking capabilities required by the engine.
pub trait Env: Send + Sync {
    fn new_sequential_file(&self, path: &Path) -> io::Result<Box<dyn SequentialFile>>;

    fn new_random_access_file(&self, path: &Path) -> io::Result<Box<dyn RandomAccessFile>>;

    /// Create (truncating) a new writable file.
    fn new_writable_file(&self, path: &Path) -> io::Result<Box<dyn WritableFile>>;

    fn file_exists(&self, path: &Path) -> bool;

    /// File names (not full paths) of the direct children of `dir`.
    fn children(&self, dir: &Path) -> io::Result<Vec<String>>;

    fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Create `dir`, succeeding if it already exists.
    fn create_dir(&self, path: &Path) -> io::Result<()>;

    /// Remove `dir`; fails while it still has children.
    fn remove_dir(&self, path: &Path) -> io::Result<()>;

    fn file_size(&self, path: &Path) -> io::Result<u64>;

    fn rename_file(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Take the advisory lock on `path`, creating the file if needed.
    ///
    /// Fails when another process (or another handle in this process)
    /// already holds it.
    fn lock_file(&self, path: &Path) -> io::Result<Box<dyn FileLock>>;

    /// Fsync the directory itself so renames within it are durable.
    fn sync_dir(&self, path: &Path) -> io::Result<()>;
}

// ------------------------------------------------------------------------------------------------
// StdEnv — the production filesystem
// ------------------------------------------------------------------------------------------------

/// [`Env`] backed by the host filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdEnv;

struct StdSequentialFile {
    reader: BufReader<File>,
}

impl SequentialFile for StdSequentialFile {
    fn read(&mut self, n: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        let mut filled = 0;
        while filled < n {
            match self.reader.read(&mut buf[filled..])? {
                0 => break,
                read => filled += read,
            }
        }
        buf.truncate(filled);
        Ok(buf)
    }

    fn skip(&mut self, n: u64) -> io::Result<()> {
        self.reader.seek(SeekFrom::Current(n as i64))?;
        Ok(())
    }
}

/// Memory-mapped random-access file.
///
/// Mapping an immutable table once avoids a syscall per block read; the map
/// stays valid for the life of this handle because table files are never
/// rewritten in place.
struct MmapFile {
    map: Mmap,
}

impl RandomAccessFile for MmapFile {
    fn read_at(&self, offset: u64, n: usize) -> io::Result<Vec<u8>> {
        let offset = usize::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset exceeds usize"))?;
        let end = offset
            .checked_add(n)
            .filter(|&end| end <= self.map.len())
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::UnexpectedEof, "read past end of file")
            })?;
        Ok(self.map[offset..end].to_vec())
    }
}

struct StdWritableFile {
    writer: BufWriter<File>,
}

impl WritableFile for StdWritableFile {
    fn append(&mut self, data: &[u8]) -> io::Result<()> {
        self.writer.write_all(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    fn sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()
    }
}

struct StdFileLock {
    file: File,
    path: PathBuf,
}

impl FileLock for StdFileLock {}

impl Drop for StdFileLock {
    fn drop(&mut self) {
        if let Err(err) = FileLockExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), %err, "failed to release lock file");
        }
    }
}

impl Env for StdEnv {
    fn new_sequential_file(&self, path: &Path) -> io::Result<Box<dyn SequentialFile>> {
        let file = File::open(path)?;
        Ok(Box::new(StdSequentialFile {
            reader: BufReader::new(file),
        }))
    }

    fn new_random_access_file(&self, path: &Path) -> io::Result<Box<dyn RandomAccessFile>> {
        let file = File::open(path)?;
        // SAFETY of the map: table files are immutable once published
        // (written to a temp name or fully sealed before first open), so the
        // mapping cannot observe concurrent modification.
        let map = unsafe { Mmap::map(&file)? };
        Ok(Box::new(MmapFile { map }))
    }

    fn new_writable_file(&self, path: &Path) -> io::Result<Box<dyn WritableFile>> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Box::new(StdWritableFile {
            writer: BufWriter::new(file),
        }))
    }

    fn file_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn children(&self, dir: &Path) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir(path)
    }

    fn file_size(&self, path: &Path) -> io::Result<u64> {
        Ok(fs::metadata(path)?.len())
    }

    fn rename_file(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn lock_file(&self, path: &Path) -> io::Result<Box<dyn FileLock>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        match FileLockExt::try_lock_exclusive(&file) {
            Ok(true) => Ok(Box::new(StdFileLock {
                file,
                path: path.to_path_buf(),
            })),
            Ok(false) => Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                format!("lock on {} already held", path.display()),
            )),
            Err(err) => Err(err),
        }
    }

    fn sync_dir(&self, path: &Path) -> io::Result<()> {
        File::open(path)?.sync_all()
    }
}
