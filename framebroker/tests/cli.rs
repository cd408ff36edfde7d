use std::fs;
use std::path::Path;
use std::process::{Command, Output};

const ERROR_LOG: &str = "execution_error_log.txt";

fn framebroker(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_framebroker"))
        .args(args)
        .current_dir(dir)
        .env("RUST_LOG", "off")
        .output()
        .expect("failed to run framebroker")
}

fn error_log(dir: &Path) -> String {
    fs::read_to_string(dir.join(ERROR_LOG)).expect("error log not written")
}

#[test]
fn missing_port_writes_usage_to_error_log() {
    let dir = tempfile::tempdir().unwrap();
    let out = framebroker(dir.path(), &[]);

    assert_eq!(out.status.code(), Some(1));
    let log = error_log(dir.path());
    let first = log.lines().next().unwrap();
    assert!(first.starts_with("Usage: "), "{log}");
    assert!(first.ends_with(" <PORT NUMBER>"), "{log}");
    assert!(String::from_utf8_lossy(&out.stderr).contains("Usage: "));
}

#[test]
fn unparsable_port_is_a_usage_error() {
    let dir = tempfile::tempdir().unwrap();
    let out = framebroker(dir.path(), &["not-a-port"]);

    assert_eq!(out.status.code(), Some(1));
    let log = error_log(dir.path());
    assert!(log.starts_with("Usage: "), "{log}");
    assert!(log.contains("not-a-port"), "{log}");
}

#[test]
fn zero_workers_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let out = framebroker(dir.path(), &["5555", "--workers", "0"]);

    assert_eq!(out.status.code(), Some(1));
    assert!(error_log(dir.path()).contains("at least one worker"));
}

#[test]
fn help_exits_cleanly_without_error_log() {
    let dir = tempfile::tempdir().unwrap();
    let out = framebroker(dir.path(), &["--help"]);

    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).contains("PORT NUMBER"));
    assert!(!dir.path().join(ERROR_LOG).exists());
}
