//! Shared fixtures for engine tests.

use std::path::Path;

use tracing_subscriber::EnvFilter;

use crate::engine::Engine;
use crate::options::{CompressionType, DbConfig, ReadOptions, WriteOptions};

/// Initialize tracing subscriber controlled by `RUST_LOG` env var.
/// Safe to call multiple times — only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Config large enough that nothing spills to disk on its own.
pub fn memtable_only_config() -> DbConfig {
    init_tracing();
    DbConfig {
        write_buffer_size: 4 * 1024 * 1024,
        compression: CompressionType::None,
        ..DbConfig::default()
    }
}

/// Tiny write buffer: a few hundred bytes of writes force a rotation.
pub fn small_buffer_config() -> DbConfig {
    init_tracing();
    DbConfig {
        write_buffer_size: 1024,
        block_size: 512,
        max_file_size: 16 * 1024,
        compression: CompressionType::None,
        ..DbConfig::default()
    }
}

pub fn open(path: &Path, config: DbConfig) -> Engine {
    Engine::open(path, config).expect("open")
}

pub fn reopen(path: &Path, config: DbConfig) -> Engine {
    Engine::open(path, config).expect("reopen")
}

pub fn wopts() -> WriteOptions {
    WriteOptions::default()
}

pub fn ropts() -> ReadOptions {
    ReadOptions::new()
}

/// `key_0042`-style keys with padded numbering so byte order == numeric.
pub fn key(i: usize) -> Vec<u8> {
    format!("key_{i:06}").into_bytes()
}

pub fn value(i: usize) -> Vec<u8> {
    format!("value_{i:06}_{}", "p".repeat(i % 23)).into_bytes()
}

/// Write `n` keys; every key is visible afterwards.
pub fn fill(engine: &Engine, n: usize) {
    for i in 0..n {
        engine.put(&wopts(), &key(i), &value(i)).expect("put");
    }
}

/// Assert every one of the `n` keys reads back its expected value.
pub fn verify(engine: &Engine, n: usize) {
    for i in 0..n {
        assert_eq!(
            engine.get(&ropts(), &key(i)).expect("get"),
            Some(value(i)),
            "key {i}"
        );
    }
}

/// Collect the full forward scan as (key, value) pairs.
pub fn collect(engine: &Engine) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut iter = engine.iter(&ropts());
    iter.seek_to_first();
    let mut out = Vec::new();
    while iter.valid() {
        out.push((iter.key().to_vec(), iter.value().to_vec()));
        iter.next();
    }
    iter.status().expect("scan status");
    out
}

/// File count at a level, via the public property interface.
pub fn files_at_level(engine: &Engine, level: usize) -> usize {
    engine
        .property(&format!("sedimentdb.num-files-at-level{level}"))
        .expect("property")
        .parse()
        .expect("numeric property")
}
