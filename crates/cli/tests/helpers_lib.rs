use std::fs;

use jitlens::{canonicalize_or_current, sha256_file};
use tempfile::tempdir;

#[test]
fn sha256_file_matches_known_digest() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("abc.txt");
    fs::write(&path, "abc").expect("write");

    assert_eq!(
        sha256_file(&path).expect("hash"),
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
}

#[test]
fn sha256_file_reports_missing_file() {
    let dir = tempdir().expect("tempdir");
    let err = sha256_file(&dir.path().join("missing.json")).expect_err("should fail");
    assert!(err.to_string().contains("Failed to open snapshot for hashing"));
}

#[test]
fn canonicalize_or_current_keeps_missing_absolute_paths() {
    let dir = tempdir().expect("tempdir");
    let missing = dir.path().join("nope.json");
    let resolved = canonicalize_or_current(missing.to_str().expect("utf8 path")).expect("resolve");
    assert_eq!(resolved, missing);
}

#[test]
fn canonicalize_or_current_joins_missing_relative_paths() {
    let cwd = std::env::current_dir().expect("cwd");
    let resolved = canonicalize_or_current("does-not-exist/target.json").expect("resolve");
    assert_eq!(resolved, cwd.join("does-not-exist/target.json"));
}
