//! # SedimentDB
//!
//! An embeddable, crash-safe key-value store built on a **leveled
//! log-structured merge-tree**. Multi-reader / single-writer semantics
//! under a background compaction worker, with snapshot-consistent reads
//! at arbitrary points in time.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                         Engine                             │
//! │  ┌────────────┐   ┌────────────┐   ┌────────────────────┐  │
//! │  │  Memtable  │   │ Immutable  │   │  Leveled tables    │  │
//! │  │  + WAL     │   │  memtable  │   │  L0 .. L6 (.ldb)   │  │
//! │  └─────┬──────┘   └─────┬──────┘   └─────────┬──────────┘  │
//! │        │  rotate        │  flush             │ compact     │
//! │        └──────────►     └─────────►          │             │
//! │                                              │             │
//! │  ┌───────────────────────────────────────────┘             │
//! │  │   Background worker (flush + leveled compaction)        │
//! │  └──────────────────────────────────────────────────────┐  │
//! │                                                         │  │
//! │  ┌──────────────────────────────────────────────────────┴┐ │
//! │  │        VersionSet + manifest (edit log + CURRENT)     │ │
//! │  └───────────────────────────────────────────────────────┘ │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | Open/recover, writes, reads, iterators, compaction control |
//! | [`memtable`] | Skiplist-backed multi-version in-memory write buffer |
//! | [`wal`] | Block-framed, CRC-protected write-ahead log |
//! | [`sstable`] | Immutable sorted tables: blocks, builder, reader |
//! | [`version`] | Leveled file metadata, version edits, the manifest |
//! | [`cache`] | Sharded LRU backing the table and block caches |
//! | [`keys`] | Internal-key format and comparators |
//! | [`batch`] | Atomic multi-operation write batches |
//! | [`snapshot`] | Pinned-sequence read snapshots |
//! | [`env`] | Filesystem and locking abstraction |
//! | [`encoding`] | Fixed/varint wire primitives |
//!
//! ## Guarantees
//!
//! - **Durability** — every mutation is in the write-ahead log before it
//!   is acknowledged; `WriteOptions::sync` extends that to an fsync.
//! - **Crash recovery** — reopening replays the manifest and any logs it
//!   does not cover, restoring exactly the committed prefix.
//! - **Snapshot isolation** — a [`Snapshot`] pins a sequence number; reads
//!   through it are immune to later writes and compactions.
//! - **Atomic batches** — a [`WriteBatch`] applies all-or-nothing, at
//!   consecutive sequence numbers.
//! - **Integrity** — every log record and table block is CRC32C-protected;
//!   a flipped bit surfaces as corruption, never as wrong data.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sedimentdb::{DbConfig, Engine, ReadOptions, WriteOptions};
//!
//! let engine = Engine::open("/tmp/my-db", DbConfig::default()).unwrap();
//!
//! let wopts = WriteOptions::default();
//! engine.put(&wopts, b"hello", b"world").unwrap();
//! assert_eq!(
//!     engine.get(&ReadOptions::new(), b"hello").unwrap(),
//!     Some(b"world".to_vec())
//! );
//!
//! // Snapshot-consistent reads
//! let snap = engine.snapshot();
//! engine.put(&wopts, b"hello", b"moon").unwrap();
//! let at_snap = ReadOptions { snapshot: Some(snap.clone()), ..ReadOptions::new() };
//! assert_eq!(engine.get(&at_snap, b"hello").unwrap(), Some(b"world".to_vec()));
//! engine.release_snapshot(snap);
//!
//! // Ordered scans
//! let mut iter = engine.iter(&ReadOptions::new());
//! iter.seek_to_first();
//! while iter.valid() {
//!     println!("{:?} = {:?}", iter.key(), iter.value());
//!     iter.next();
//! }
//!
//! engine.close().unwrap();
//! ```

pub mod batch;
pub mod cache;
pub mod checksum;
pub mod encoding;
pub mod engine;
pub mod env;
pub mod iterator;
pub mod keys;
pub mod memtable;
pub mod options;
pub mod skiplist;
pub mod snapshot;
pub mod sstable;
pub mod version;
pub mod wal;

pub use batch::WriteBatch;
pub use engine::{DbIter, Engine, EngineError, destroy_db};
pub use keys::{BytewiseComparator, Comparator};
pub use options::{CompressionType, DbConfig, ReadOptions, WriteOptions};
pub use snapshot::Snapshot;
