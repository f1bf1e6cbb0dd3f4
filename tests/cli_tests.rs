//! Integration tests for the tsrollup binary and layered config: file, env overrides, CLI
//! flags, and a full report run over JSON-lines samples.

use std::io::Write;
use std::path::Path;
use std::process::Command;

use tempfile::{NamedTempFile, TempDir};
use tsrollup::{Duration, PipelineConfig};

/// Run tsrollup in a subprocess with the given args and env. Returns (success, stdout, stderr).
fn run_tsrollup(args: &[&str], env_extra: &[(&str, &str)]) -> (bool, String, String) {
    let exe = env!("CARGO_BIN_EXE_tsrollup");
    let mut cmd = Command::new(exe);
    cmd.args(args);
    cmd.env_remove("TSROLLUP_CONFIG");
    for (k, v) in env_extra {
        cmd.env(k, v);
    }
    let out = cmd.output().expect("run tsrollup");
    let stdout = String::from_utf8_lossy(&out.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&out.stderr).into_owned();
    (out.status.success(), stdout, stderr)
}

fn toml_file(contents: &str) -> NamedTempFile {
    let mut f = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    f.write_all(contents.as_bytes()).unwrap();
    f.flush().unwrap();
    f
}

fn path_str(p: &Path) -> &str {
    p.to_str().unwrap()
}

#[test]
fn test_load_from_file_overrides_defaults() {
    let f = toml_file(
        r#"
nan_on_counter_wrap = true
default_span = "6h"
resolution_divisor = 24
"#,
    );
    let config = PipelineConfig::load(Some(f.path())).unwrap();
    assert!(config.nan_on_counter_wrap);
    assert_eq!(config.default_span, Duration::hours(6));
    assert_eq!(config.resolution_divisor, 24);
    assert_eq!(
        config.ingest_queue_capacity,
        PipelineConfig::default().ingest_queue_capacity
    );
}

#[test]
fn test_invalid_file_values_rejected() {
    let f = toml_file("resolution_divisor = 0\n");
    assert!(PipelineConfig::load(Some(f.path())).is_err());
    let f = toml_file("default_span = \"tomorrow\"\n");
    assert!(PipelineConfig::load(Some(f.path())).is_err());
}

#[test]
fn validate_config_prints_defaults() {
    let (ok, stdout, stderr) = run_tsrollup(&["--validate-config"], &[]);
    assert!(ok, "stderr: {}", stderr);
    assert!(stdout.contains("nan_on_counter_wrap=false"), "stdout: {}", stdout);
    assert!(stdout.contains("default_span=86400s"), "stdout: {}", stdout);
    assert!(stdout.contains("resolution_divisor=10"), "stdout: {}", stdout);
}

#[test]
fn validate_config_env_overrides_file() {
    let f = toml_file("resolution_divisor = 24\n");
    let (ok, stdout, stderr) = run_tsrollup(
        &["--validate-config", "--config", path_str(f.path())],
        &[("TSROLLUP__RESOLUTION_DIVISOR", "48")],
    );
    assert!(ok, "stderr: {}", stderr);
    assert!(stdout.contains("resolution_divisor=48"), "env should win: {}", stdout);
}

#[test]
fn validate_config_cli_flag_overrides_env() {
    let (ok, stdout, _) = run_tsrollup(
        &["--validate-config", "--nan-on-counter-wrap"],
        &[("TSROLLUP__NAN_ON_COUNTER_WRAP", "false")],
    );
    assert!(ok);
    assert!(stdout.contains("nan_on_counter_wrap=true"), "stdout: {}", stdout);
}

#[test]
fn validate_config_missing_file_fails() {
    let (ok, _, stderr) = run_tsrollup(
        &["--validate-config", "--config", "/nonexistent/tsrollup.toml"],
        &[],
    );
    assert!(!ok);
    assert!(stderr.contains("config file not found"), "stderr: {}", stderr);
}

#[test]
fn report_run_prints_json_rows() {
    let dir = TempDir::new().unwrap();
    let report = dir.path().join("report.toml");
    std::fs::write(
        &report,
        r#"
step = 300
exports = ["m0-avg", "double"]

[[datasources]]
label = "m0-avg"
source = "m0"
heartbeat = "10m"
function = "average"

[[calculations]]
label = "double"
op = "multiply"
left = "m0-avg"
right = 2
"#,
    )
    .unwrap();

    let samples = dir.path().join("samples.jsonl");
    let mut lines = String::new();
    for i in 0..=24i64 {
        let v = if i == 0 || ((i - 1) / 6) % 2 == 0 { 1.0 } else { 3.0 };
        lines.push_str(&format!(
            "{{\"timestamp\":{},\"resource\":\"node1\",\"name\":\"m0\",\"type\":\"gauge\",\"value\":{}}}\n",
            (900_000_000 + i * 300) * 1000,
            v
        ));
    }
    std::fs::write(&samples, lines).unwrap();

    let (ok, stdout, stderr) = run_tsrollup(
        &[
            "--report",
            path_str(&report),
            "--samples",
            path_str(&samples),
            "--resource",
            "node1",
            "--start",
            "900003600",
            "--end",
            "900007200",
            "--resolution",
            "1h",
        ],
        &[],
    );
    assert!(ok, "stderr: {}", stderr);

    let rows: Vec<serde_json::Value> = stdout
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(rows.len(), 2);
    let rendered = stdout.replace(' ', "");
    assert!(rendered.contains("\"name\":\"double\""), "stdout: {}", stdout);
    assert!(rendered.contains("\"value\":4.0"), "stdout: {}", stdout);
}

#[test]
fn report_run_without_report_fails() {
    let (ok, _, stderr) = run_tsrollup(&["--resource", "node1"], &[]);
    assert!(!ok);
    assert!(stderr.contains("--report"), "stderr: {}", stderr);
}
