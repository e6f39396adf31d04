// Reproducibility tests.
//
// Identical patches must compile to byte-identical programs, both through
// the library and through the `patchflow` binary.

use std::path::PathBuf;
use std::process::Command;

fn patchflow_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_patchflow"))
}

fn run_patchflow(args: &[&str]) -> String {
    let output = Command::new(patchflow_binary())
        .args(args)
        .output()
        .expect("failed to run patchflow");
    assert!(
        output.status.success(),
        "patchflow failed with args {:?}\nstderr: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout).expect("utf-8 output")
}

#[test]
fn library_fingerprint_is_stable() {
    let reg = patchflow::stdlib::standard_registry().unwrap();
    for name in ["dots", "ring", "delay-loop"] {
        let patch = patchflow::demos::by_name(name, 5).unwrap();
        let a = patchflow::compile(&patch, &reg).unwrap();
        let b = patchflow::compile(&patch, &reg).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint(), "{name}");
        assert_eq!(a.fingerprint().len(), 64);
        assert_eq!(a.schedule.to_string(), b.schedule.to_string());
    }
}

#[test]
fn fingerprint_tracks_the_patch() {
    let reg = patchflow::stdlib::standard_registry().unwrap();
    let five = patchflow::compile(&patchflow::demos::dots(5), &reg).unwrap();
    let six = patchflow::compile(&patchflow::demos::dots(6), &reg).unwrap();
    assert_ne!(five.fingerprint(), six.fingerprint());
    assert_eq!(five.registry_fingerprint, six.registry_fingerprint);
}

#[test]
fn cli_fingerprint_is_reproducible() {
    let args = ["dots", "--count", "7", "--emit", "fingerprint"];
    let first = run_patchflow(&args);
    let second = run_patchflow(&args);
    assert_eq!(first, second);
    assert_eq!(first.trim().len(), 64);
}

#[test]
fn cli_fingerprint_matches_the_library() {
    let reg = patchflow::stdlib::standard_registry().unwrap();
    let program = patchflow::compile(&patchflow::demos::ring(9), &reg).unwrap();
    let printed = run_patchflow(&["ring", "--count", "9", "--emit", "fingerprint"]);
    assert_eq!(printed.trim(), program.fingerprint());
}

#[test]
fn cli_schedule_output_is_reproducible() {
    let first = run_patchflow(&["ring", "--emit", "schedule"]);
    let second = run_patchflow(&["ring", "--emit", "schedule"]);
    assert_eq!(first, second);
    assert!(!first.is_empty());
}

#[test]
fn cli_frames_emit_json() {
    let out = run_patchflow(&["dots", "--count", "3", "--emit", "frames", "--frames", "2", "--json"]);
    let frames: serde_json::Value = serde_json::from_str(&out).expect("valid json");
    let frames = frames.as_array().expect("array of frames");
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].as_array().map(Vec::len), Some(3));
}

#[test]
fn cli_rejects_feedback_with_exit_code_one() {
    let output = Command::new(patchflow_binary())
        .args(["feedback"])
        .output()
        .expect("failed to run patchflow");
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("E0300"), "stderr: {stderr}");
}
