//! StdEnv behaviour against a real temporary directory.

use tempfile::TempDir;

use crate::env::{Env, StdEnv};

#[test]
fn writable_then_sequential_roundtrip() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("file.bin");

    let mut w = StdEnv.new_writable_file(&path).unwrap();
    w.append(b"hello ").unwrap();
    w.append(b"world").unwrap();
    w.sync().unwrap();
    drop(w);

    let mut r = StdEnv.new_sequential_file(&path).unwrap();
    assert_eq!(r.read(6).unwrap(), b"hello ");
    assert_eq!(r.read(64).unwrap(), b"world");
    assert_eq!(r.read(8).unwrap(), b"");
}

#[test]
fn sequential_skip_moves_the_cursor() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("file.bin");

    let mut w = StdEnv.new_writable_file(&path).unwrap();
    w.append(b"0123456789").unwrap();
    w.flush().unwrap();
    drop(w);

    let mut r = StdEnv.new_sequential_file(&path).unwrap();
    r.skip(4).unwrap();
    assert_eq!(r.read(3).unwrap(), b"456");
}

#[test]
fn random_access_reads_at_offsets() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("file.bin");

    let mut w = StdEnv.new_writable_file(&path).unwrap();
    w.append(b"abcdefgh").unwrap();
    w.sync().unwrap();
    drop(w);

    let r = StdEnv.new_random_access_file(&path).unwrap();
    assert_eq!(r.read_at(0, 3).unwrap(), b"abc");
    assert_eq!(r.read_at(5, 3).unwrap(), b"fgh");
    assert!(r.read_at(5, 4).is_err(), "read past EOF must fail");
}

#[test]
fn children_lists_file_names() {
    let tmp = TempDir::new().unwrap();
    for name in ["a.log", "b.ldb"] {
        let mut w = StdEnv.new_writable_file(&tmp.path().join(name)).unwrap();
        w.append(b"x").unwrap();
        w.flush().unwrap();
    }
    let mut names = StdEnv.children(tmp.path()).unwrap();
    names.sort();
    assert_eq!(names, ["a.log", "b.ldb"]);
}

#[test]
fn lock_file_excludes_second_holder() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("LOCK");

    let lock = StdEnv.lock_file(&path).unwrap();
    assert!(StdEnv.lock_file(&path).is_err());

    // Released on drop; the lock becomes available again.
    drop(lock);
    let relock = StdEnv.lock_file(&path);
    assert!(relock.is_ok());
}

#[test]
fn rename_and_size_and_remove() {
    let tmp = TempDir::new().unwrap();
    let a = tmp.path().join("a");
    let b = tmp.path().join("b");

    let mut w = StdEnv.new_writable_file(&a).unwrap();
    w.append(b"12345").unwrap();
    w.flush().unwrap();
    drop(w);

    StdEnv.rename_file(&a, &b).unwrap();
    assert!(!StdEnv.file_exists(&a));
    assert_eq!(StdEnv.file_size(&b).unwrap(), 5);

    StdEnv.remove_file(&b).unwrap();
    assert!(!StdEnv.file_exists(&b));
}
