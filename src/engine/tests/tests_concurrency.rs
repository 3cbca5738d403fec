//! Multi-threaded readers and writers against one engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use tempfile::TempDir;

use crate::engine::tests::helpers::*;

#[test]
fn concurrent_writers_land_all_writes() {
    let tmp = TempDir::new().unwrap();
    let engine = open(tmp.path(), memtable_only_config());

    let threads: Vec<_> = (0..4)
        .map(|t| {
            let engine = engine.clone();
            thread::spawn(move || {
                for i in 0..250usize {
                    let k = format!("w{t}_{i:04}").into_bytes();
                    let v = format!("v{t}_{i:04}").into_bytes();
                    engine.put(&wopts(), &k, &v).unwrap();
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    for t in 0..4 {
        for i in 0..250usize {
            let k = format!("w{t}_{i:04}").into_bytes();
            let v = format!("v{t}_{i:04}").into_bytes();
            assert_eq!(engine.get(&ropts(), &k).unwrap(), Some(v));
        }
    }
    engine.close().unwrap();
}

#[test]
fn readers_run_concurrently_with_writers_and_flushes() {
    let tmp = TempDir::new().unwrap();
    let engine = open(tmp.path(), small_buffer_config());
    let stop = Arc::new(AtomicBool::new(false));

    // A stable prefix that readers continuously verify.
    for i in 0..50 {
        engine.put(&wopts(), &key(i), &value(i)).unwrap();
    }

    let readers: Vec<_> = (0..3)
        .map(|_| {
            let engine = engine.clone();
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while !stop.load(Ordering::Acquire) {
                    for i in 0..50 {
                        assert_eq!(
                            engine.get(&ropts(), &key(i)).unwrap(),
                            Some(value(i)),
                            "stable key {i} disappeared mid-flight"
                        );
                    }
                }
            })
        })
        .collect();

    // Writer churn over a different key range forces rotations, flushes,
    // and compactions while the readers run.
    for round in 0..20 {
        for i in 100..200 {
            let v = format!("round{round}").into_bytes();
            engine.put(&wopts(), &key(i), &v).unwrap();
        }
    }
    stop.store(true, Ordering::Release);
    for r in readers {
        r.join().unwrap();
    }

    verify(&engine, 50);
    engine.close().unwrap();
}

#[test]
fn scans_stay_consistent_under_concurrent_writes() {
    let tmp = TempDir::new().unwrap();
    let engine = open(tmp.path(), memtable_only_config());
    fill(&engine, 100);

    let stop = Arc::new(AtomicBool::new(false));
    let scanner = {
        let engine = engine.clone();
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            while !stop.load(Ordering::Acquire) {
                // Each iterator sees ≥ 100 sorted keys regardless of the
                // concurrent overwrites.
                let all = collect(&engine);
                assert!(all.len() >= 100);
                assert!(all.windows(2).all(|w| w[0].0 < w[1].0));
            }
        })
    };

    for round in 0..50 {
        for i in 0..100 {
            let v = format!("round{round}-{i}").into_bytes();
            engine.put(&wopts(), &key(i), &v).unwrap();
        }
    }
    stop.store(true, Ordering::Release);
    scanner.join().unwrap();
    engine.close().unwrap();
}
