//! Drives the `ember` binary in a scratch directory.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn scratch() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("ember-cli-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn ember(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_ember"))
        .current_dir(dir)
        .env_remove("EMBER_LOG")
        .args(args)
        .output()
        .unwrap()
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

#[test]
fn init_writes_config_once() {
    let dir = scratch();
    let first = ember(&dir, &["init"]);
    assert!(first.status.success());
    assert!(dir.join("ember.toml").exists());

    let second = ember(&dir, &["init"]);
    assert!(!second.status.success());
    assert!(String::from_utf8_lossy(&second.stderr).contains("already exists"));
    std::fs::remove_dir_all(dir).ok();
}

#[test]
fn store_put_get_rm() {
    let dir = scratch();
    assert!(ember(&dir, &["init"]).status.success());
    std::fs::write(dir.join("prog.pc"), [1u8, 2, 3, 4]).unwrap();

    let put = ember(&dir, &["store", "put", "prog.pc"]);
    assert!(put.status.success(), "{:?}", put);
    assert!(stdout(&put).contains("as blob 1"));

    let ls = ember(&dir, &["store", "ls"]);
    assert!(stdout(&ls).contains("4 bytes"));

    let get = ember(&dir, &["store", "get", "1"]);
    assert_eq!(get.stdout, vec![1, 2, 3, 4]);

    assert!(ember(&dir, &["store", "rm", "1"]).status.success());
    let missing = ember(&dir, &["store", "get", "1"]);
    assert!(!missing.status.success());
    assert!(String::from_utf8_lossy(&missing.stderr).contains("blob not found"));
    std::fs::remove_dir_all(dir).ok();
}

#[test]
fn run_for_a_fixed_duration() {
    let dir = scratch();
    assert!(ember(&dir, &["init"]).status.success());
    std::fs::write(dir.join("prog.pc"), [9u8; 16]).unwrap();

    let out = ember(
        &dir,
        &["run", "prog.pc", "--period-ms", "5", "--duration-ms", "100"],
    );
    assert!(out.status.success(), "{:?}", out);
    let text = stdout(&out);
    assert!(text.contains("Loaded"));
    assert!(text.contains("Stopped"));
    std::fs::remove_dir_all(dir).ok();
}

#[test]
fn run_without_programs_is_usage_error() {
    let dir = scratch();
    assert!(ember(&dir, &["init"]).status.success());
    let out = ember(&dir, &["run"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("nothing to run"));
    std::fs::remove_dir_all(dir).ok();
}

#[test]
fn bad_config_is_reported() {
    let dir = scratch();
    std::fs::write(dir.join("ember.toml"), "[tick]\nperiod_ms = \"soon\"\n").unwrap();
    let out = ember(&dir, &["store", "ls"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("invalid config"));
    std::fs::remove_dir_all(dir).ok();
}

#[test]
fn store_ids_are_not_reissued_after_rm() {
    let dir = scratch();
    assert!(ember(&dir, &["init"]).status.success());
    std::fs::write(dir.join("prog.pc"), [5u8; 3]).unwrap();

    assert!(stdout(&ember(&dir, &["store", "put", "prog.pc"])).contains("as blob 1"));
    assert!(ember(&dir, &["store", "rm", "1"]).status.success());
    assert!(stdout(&ember(&dir, &["store", "put", "prog.pc"])).contains("as blob 2"));
    assert!(!ember(&dir, &["store", "get", "1"]).status.success());
    std::fs::remove_dir_all(dir).ok();
}
