use assert_cmd::Command;
use destripe_rs::{meta_path_for, RecordingMeta};
use predicates::prelude::*;
use std::io::Write;
use std::path::{Path, PathBuf};

fn destripe() -> Command {
    Command::cargo_bin("destripe").unwrap()
}

/// Write a small 5-channel recording (4 analog + 1 sync) with a common
/// 1 kHz stripe, and return the .bin path.
fn write_session(dir: &Path) -> PathBuf {
    const FS: f64 = 30_000.0;
    const NS: usize = 4000;
    let bin = dir.join("session.bin");
    let mut file = std::fs::File::create(&bin).unwrap();
    for t in 0..NS {
        let stripe = 50e-6 * (2.0 * std::f64::consts::PI * 1000.0 * t as f64 / FS).sin();
        for c in 0..4 {
            let own = (((c + 1) * 7919 + t * 104_729) % 1000) as f64 / 1000.0 - 0.5;
            let counts = ((stripe + own * 10e-6) / 2.34e-6).round() as i16;
            file.write_all(&counts.to_le_bytes()).unwrap();
        }
        let sync: i16 = i16::from(t % 100 < 50);
        file.write_all(&sync.to_le_bytes()).unwrap();
    }
    let meta = RecordingMeta {
        n_channels: 5,
        n_sync_channels: 1,
        sample_rate: FS,
        conversion_factors: vec![2.34e-6],
    };
    meta.save(meta_path_for(&bin)).unwrap();
    bin
}

// =============================================================================
// GENERAL
// =============================================================================

#[test]
fn test_no_args_shows_help() {
    destripe()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}

#[test]
fn test_version_flag() {
    destripe()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("destripe"));
}

#[test]
fn test_help_flag() {
    destripe()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("destriping"));
}

// =============================================================================
// INFO SUBCOMMAND
// =============================================================================

#[test]
fn test_info_text_output() {
    let dir = tempfile::tempdir().unwrap();
    let bin = write_session(dir.path());
    destripe()
        .arg("info")
        .arg("--file")
        .arg(&bin)
        .assert()
        .success()
        .stdout(predicate::str::contains("destripe CLI v"))
        .stdout(predicate::str::contains("4 analog + 1 sync"));
}

#[test]
fn test_info_json_output() {
    let dir = tempfile::tempdir().unwrap();
    let bin = write_session(dir.path());
    let output = destripe()
        .arg("info")
        .arg("--file")
        .arg(&bin)
        .arg("--json")
        .assert()
        .success();

    let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(parsed["n_channels"], 5);
    assert_eq!(parsed["n_samples"], 4000);
}

#[test]
fn test_info_missing_file() {
    destripe()
        .arg("info")
        .arg("--file")
        .arg("/nonexistent/session.bin")
        .assert()
        .failure()
        .code(2);
}

// =============================================================================
// VALIDATE SUBCOMMAND
// =============================================================================

#[test]
fn test_validate_valid_recording() {
    let dir = tempfile::tempdir().unwrap();
    let bin = write_session(dir.path());
    destripe()
        .arg("validate")
        .arg("--file")
        .arg(&bin)
        .assert()
        .success()
        .stdout(predicate::str::contains("is valid"));
}

#[test]
fn test_validate_missing_meta() {
    let dir = tempfile::tempdir().unwrap();
    let bin = dir.path().join("orphan.bin");
    std::fs::write(&bin, vec![0_u8; 100]).unwrap();
    let output = destripe()
        .arg("validate")
        .arg("--file")
        .arg(&bin)
        .arg("--json")
        .assert()
        .failure()
        .code(2);

    let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(parsed["exists"], true);
    assert_eq!(parsed["meta_found"], false);
}

#[test]
fn test_validate_resume_alignment_follows_dtype() {
    let dir = tempfile::tempdir().unwrap();
    let bin = write_session(dir.path());
    // 3 int16 rows of 5 channels, a valid int16 resume point but a torn int32 row
    let target = dir.path().join("partial.bin");
    std::fs::write(&target, vec![0_u8; 3 * 5 * 2]).unwrap();

    let aligned_for = |dtype: &str| -> bool {
        let output = destripe()
            .arg("validate")
            .arg("--file")
            .arg(&bin)
            .arg("--output")
            .arg(&target)
            .arg("--dtype")
            .arg(dtype)
            .arg("--json")
            .assert()
            .success();
        let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
        parsed["resume_aligned"].as_bool().unwrap()
    };

    assert!(aligned_for("int16"));
    assert!(!aligned_for("int32"));
}

// =============================================================================
// DETECT SUBCOMMAND
// =============================================================================

#[test]
fn test_detect_writes_label_report() {
    let dir = tempfile::tempdir().unwrap();
    let bin = write_session(dir.path());
    let labels = dir.path().join("labels.json");
    destripe()
        .arg("detect")
        .arg("--file")
        .arg(&bin)
        .arg("--duration")
        .arg("0.1")
        .arg("--output")
        .arg(&labels)
        .assert()
        .success();

    let parsed: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&labels).unwrap()).unwrap();
    assert_eq!(parsed["labels"].as_array().unwrap().len(), 4);
    assert!(parsed["features"]["xcor_hf"].as_array().unwrap().len() == 4);
}

// =============================================================================
// RUN SUBCOMMAND
// =============================================================================

#[test]
fn test_run_produces_output_files() {
    let dir = tempfile::tempdir().unwrap();
    let bin = write_session(dir.path());
    let out = dir.path().join("clean.bin");
    let output = destripe()
        .arg("run")
        .arg("--file")
        .arg(&bin)
        .arg("--output")
        .arg(&out)
        .arg("--batch-size")
        .arg("1024")
        .arg("--taper")
        .arg("64")
        .arg("--workers")
        .arg("2")
        .arg("--quiet")
        .assert()
        .success();

    let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();
    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(report["samples_written"], 4000);

    assert_eq!(
        std::fs::metadata(&out).unwrap().len(),
        4000 * 5 * 2,
        "output size"
    );
    assert!(dir.path().join("clean.rms.bin").exists());
}

#[test]
fn test_run_rejects_overwriting_input() {
    let dir = tempfile::tempdir().unwrap();
    let bin = write_session(dir.path());
    destripe()
        .arg("run")
        .arg("--file")
        .arg(&bin)
        .arg("--output")
        .arg(&bin)
        .assert()
        .failure()
        .code(2);
}

#[test]
fn test_run_rejects_bad_batch_config() {
    let dir = tempfile::tempdir().unwrap();
    let bin = write_session(dir.path());
    destripe()
        .arg("run")
        .arg("--file")
        .arg(&bin)
        .arg("--batch-size")
        .arg("64")
        .arg("--taper")
        .arg("64")
        .assert()
        .failure()
        .code(2);
}
