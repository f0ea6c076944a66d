#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

fn scratch(name: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join(format!("{name}.blobkv"));
    (dir, path)
}

fn set(db: &Path, key: &str, value: &str) {
    cargo_bin_cmd!("blobkv")
        .args(["set", "--synchronous", "off"])
        .arg(db)
        .args([key, value])
        .assert()
        .success();
}

fn get(db: &Path, key: &str) -> Vec<u8> {
    cargo_bin_cmd!("blobkv")
        .arg("get")
        .arg(db)
        .arg(key)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone()
}

#[test]
fn set_append_prepend_get() {
    let (_dir, db) = scratch("basic");
    set(&db, "greeting", "hello");
    cargo_bin_cmd!("blobkv")
        .arg("append")
        .arg(&db)
        .args(["greeting", " world"])
        .assert()
        .success();
    cargo_bin_cmd!("blobkv")
        .arg("prepend")
        .arg(&db)
        .args(["greeting", "> "])
        .assert()
        .success();
    assert_eq!(get(&db, "greeting"), b"> hello world");
}

#[test]
fn missing_keys_exit_with_code_two() {
    let (_dir, db) = scratch("missing");
    set(&db, "present", "x");
    for sub in ["append", "prepend"] {
        cargo_bin_cmd!("blobkv")
            .arg(sub)
            .arg(&db)
            .args(["absent", "data"])
            .assert()
            .code(2);
    }
    cargo_bin_cmd!("blobkv")
        .arg("get")
        .arg(&db)
        .arg("absent")
        .assert()
        .code(2);
    cargo_bin_cmd!("blobkv")
        .arg("delete")
        .arg(&db)
        .arg("present")
        .assert()
        .success();
    cargo_bin_cmd!("blobkv")
        .arg("delete")
        .arg(&db)
        .arg("present")
        .assert()
        .code(2);
}

#[test]
fn oversized_growth_exits_with_code_three() {
    let (dir, db) = scratch("limits");
    let config = dir.path().join("blobkv.toml");
    fs::write(&config, "max_value_size = 300\nmax_in_node_value_size = 100\n")
        .expect("write config");
    let base = "a".repeat(295);
    cargo_bin_cmd!("blobkv")
        .arg("--config")
        .arg(&config)
        .arg("set")
        .arg(&db)
        .args(["k", base.as_str()])
        .assert()
        .success();
    cargo_bin_cmd!("blobkv")
        .arg("--config")
        .arg(&config)
        .arg("append")
        .arg(&db)
        .args(["k", "123456"])
        .assert()
        .code(3);
    cargo_bin_cmd!("blobkv")
        .arg("--config")
        .arg(&config)
        .arg("prepend")
        .arg(&db)
        .args(["k", "12345"])
        .assert()
        .success();
    let value = get(&db, "k");
    assert_eq!(value.len(), 300);
    assert!(value.starts_with(b"12345a"));
}

#[test]
fn payload_from_file_and_stats() {
    let (dir, db) = scratch("file");
    let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    let payload_path = dir.path().join("payload.bin");
    fs::write(&payload_path, &payload).expect("write payload");

    set(&db, "blob", "head-");
    cargo_bin_cmd!("blobkv")
        .arg("append")
        .arg(&db)
        .arg("blob")
        .arg("--file")
        .arg(&payload_path)
        .assert()
        .success();
    let mut expected = b"head-".to_vec();
    expected.extend_from_slice(&payload);
    assert_eq!(get(&db, "blob"), expected);

    let stats = cargo_bin_cmd!("blobkv")
        .arg("stats")
        .arg(&db)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(stats).expect("utf8 stats");
    assert!(text.contains("btree:"));
    assert!(text.contains("latches:"));
}

#[test]
fn open_commands_refuse_missing_databases() {
    let (_dir, db) = scratch("never");
    cargo_bin_cmd!("blobkv")
        .arg("get")
        .arg(&db)
        .arg("k")
        .assert()
        .failure();
    assert!(!db.exists());
}
