//! End-to-end runs of the demo binary: real fork children over the pipe
//! transport, exit codes, and the result file.

use std::process::{Command, Output};

fn run_demo(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_oxmark-demos"))
        .args(args)
        .output()
        .expect("demo binary runs")
}

#[test]
fn forked_run_prints_scores_and_exits_clean() {
    let dir = tempfile::tempdir().unwrap();
    let result = dir.path().join("out.tsv");
    let out = run_demo(&[
        "concat_push",
        "-f",
        "1",
        "--warmup-iterations",
        "0",
        "-i",
        "2",
        "--measurement-time",
        "20ms",
        "--result",
        result.to_str().unwrap(),
    ]);
    let stdout = String::from_utf8_lossy(&out.stdout);
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert_eq!(
        out.status.code(),
        Some(0),
        "stdout:\n{stdout}\nstderr:\n{stderr}"
    );
    assert!(stdout.contains("Benchmark"));
    assert!(stdout.contains("concat_push"));

    let tsv = std::fs::read_to_string(&result).unwrap();
    assert!(tsv.starts_with("name\tmode\tsamples\tmean\terror\tunit"));
    // 1 fork x 2 measurement iterations.
    assert!(tsv.contains("concat_push\tavgt\t2\t"));
}

#[test]
fn list_prints_matches() {
    let out = run_demo(&["--list", "concat"]);
    assert_eq!(out.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&out.stdout);
    for name in ["concat_format", "concat_push", "concat_prealloc"] {
        assert!(stdout.lines().any(|line| line == name), "missing {name}");
    }
}

#[test]
fn unmatched_pattern_is_a_config_error() {
    let out = run_demo(&["definitely_not_registered"]);
    assert_eq!(out.status.code(), Some(1));
}

#[test]
fn zero_measurement_time_is_a_config_error() {
    let out = run_demo(&["concat_push", "--measurement-time", "0s"]);
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("measurement_time"));
}

#[test]
fn malformed_config_file_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("oxmark.toml"), "[runner]\nforks = \"two\"\n").unwrap();
    let out = Command::new(env!("CARGO_BIN_EXE_oxmark-demos"))
        .current_dir(dir.path())
        .args(["--list", "concat"])
        .output()
        .expect("demo binary runs");
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("oxmark.toml"));
}
