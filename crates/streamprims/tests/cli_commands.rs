#![cfg(feature = "cli")]

use std::process::{Command, Output};

fn streamprims(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_streamprims"))
        .args(args)
        .args(["--log-level", "off"])
        .output()
        .expect("binary should run")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn version_prints_package_version() {
    let output = streamprims(&["version"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn encode_emits_length_prefixed_hex() {
    let output = streamprims(&["encode", "hello", "--format", "json"]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let json: serde_json::Value = serde_json::from_str(&stdout(&output)).expect("json output");
    assert_eq!(json["hex"], "0568656c6c6f");
    assert_eq!(json["total_bytes"], 6);
}

#[test]
fn decode_splits_concatenated_frames() {
    let output = streamprims(&["decode", "0568656c6c6f0378797a", "--format", "json"]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let out = stdout(&output);
    assert!(out.contains("hello"), "unexpected output: {out}");
    assert!(out.contains("xyz"), "unexpected output: {out}");
}

#[test]
fn decode_rejects_invalid_hex() {
    let output = streamprims(&["decode", "zz", "--format", "json"]);
    assert_eq!(output.status.code(), Some(60));
}

#[test]
fn decode_enforces_max_data_length() {
    let output = streamprims(&[
        "decode",
        "0568656c6c6f",
        "--max-data-length",
        "2",
        "--format",
        "json",
    ]);
    assert_eq!(output.status.code(), Some(60));
}

#[test]
fn encode_and_file_conflict_is_usage_error() {
    let output = streamprims(&["encode", "--file", "/nonexistent", "--hex"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn simulate_verifies_every_stream() {
    let output = streamprims(&[
        "simulate",
        "--streams",
        "2",
        "--payload-size",
        "2000",
        "--max-message-size",
        "256",
        "--format",
        "json",
    ]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let json: serde_json::Value = serde_json::from_str(&stdout(&output)).expect("json output");
    assert_eq!(json["verified"], true);
    assert_eq!(json["streams"], 2);
    assert_eq!(json["bytes_received"], 4000);
}

#[test]
fn simulate_rejects_zero_streams() {
    let output = streamprims(&["simulate", "--streams", "0", "--format", "json"]);
    assert_eq!(output.status.code(), Some(64));
}
