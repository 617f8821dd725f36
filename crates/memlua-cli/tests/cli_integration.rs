//! Integration tests for the memlua binary.
//!
//! Each test writes a small image file and runs the binary against it with
//! the in-process engine.

use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

fn memlua(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_memlua"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run memlua")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn fixture(dir: &TempDir) -> String {
    let mut image = vec![0u8; 0x200];
    image[0x100..0x107].copy_from_slice(&[0x48, 0x8B, 0x05, 0x10, 0x20, 0x30, 0x40]);
    image[0x40..0x44].copy_from_slice(&1234i32.to_le_bytes());
    image[0x80..0x84].copy_from_slice(&1234i32.to_le_bytes());
    let path = dir.path().join("game.bin");
    std::fs::write(&path, image).unwrap();
    path.to_string_lossy().into_owned()
}

#[test]
fn test_pattern_prints_canonical_form() {
    let output = memlua(&["pattern", "48 8b ?? 0a"]);
    assert!(output.status.success());
    assert_eq!(stdout(&output).trim(), "48 8B ?? 0A");
}

#[test]
fn test_pattern_rejects_malformed_input() {
    let output = memlua(&["pattern", "4 8"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("invalid pattern token"));
}

#[test]
fn test_aob_finds_single_match() {
    let dir = TempDir::new().unwrap();
    let image = fixture(&dir);
    let output = memlua(&["aob", &image, "48 8B 05 ?? ?? ?? ??"]);
    assert!(output.status.success());
    assert_eq!(stdout(&output).trim(), "0x100");
}

#[test]
fn test_aob_with_base_and_module() {
    let dir = TempDir::new().unwrap();
    let image = fixture(&dir);
    let output = memlua(&[
        "aob",
        &image,
        "48 8B 05",
        "--base",
        "0x400000",
        "--module",
        "game.exe",
    ]);
    assert!(output.status.success());
    assert_eq!(stdout(&output).trim(), "0x400100");
}

#[test]
fn test_aob_alignment_filters() {
    let dir = TempDir::new().unwrap();
    let image = fixture(&dir);

    let output = memlua(&["aob", &image, "D2 04 00 00", "--aligned", "80"]);
    assert!(output.status.success());
    assert_eq!(stdout(&output).trim(), "0x80");

    let output = memlua(&["aob", &image, "D2 04", "--last-digits", "40"]);
    assert_eq!(stdout(&output).trim(), "0x40");

    let output = memlua(&["aob", &image, "D2", "--aligned", "4", "--last-digits", "0"]);
    assert!(!output.status.success());
}

#[test]
fn test_scan_with_next_pass() {
    let dir = TempDir::new().unwrap();
    let image = fixture(&dir);

    let output = memlua(&["scan", &image, "--value", "1234"]);
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("first scan: 2 result(s)"));
    assert!(text.contains("0x40"));
    assert!(text.contains("0x80"));

    // values are unchanged, so an exact next scan keeps both
    let output = memlua(&["scan", &image, "--value", "4D2", "--hex", "--next", "4D2"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("next scan 1: 2 result(s)"));
}

#[test]
fn test_scan_reads_config_file() {
    let dir = TempDir::new().unwrap();
    let image = fixture(&dir);
    let config = dir.path().join("memlua.toml");
    std::fs::write(
        &config,
        "[scan]\nprotection_flags = \"+W\"\nalignment = \"aligned\"\nalignment_param = \"80\"\n",
    )
    .unwrap();

    let output = memlua(&[
        "--config",
        config.to_str().unwrap(),
        "scan",
        &image,
        "--value",
        "1234",
    ]);
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("first scan: 1 result(s)"));
    assert!(text.contains("0x80"));
}

#[test]
fn test_native_engine_without_library_fails() {
    let dir = TempDir::new().unwrap();
    let image = fixture(&dir);
    let output = memlua(&["--engine", "native", "aob", &image, "48"]);
    assert!(!output.status.success());
    assert!(Path::new(&image).exists());
}
