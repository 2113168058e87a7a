//! Integration tests for the Tessera CLI
//!
//! These tests run the actual CLI binary and verify output.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// Get the binary to test
fn tessera_cmd() -> Command {
    let mut cmd = Command::cargo_bin("tessera").unwrap();
    cmd.env("NO_COLOR", "1").env_remove("RUST_LOG");
    cmd
}

const COUNTER: &str = r#"
name: counter
template: |
  <div id="label">${label}: ${count}</div>
  <button id="inc" onclick="${_increment}">+</button>
methods: [_increment]
attrs:
  label:
    - attr: title
      pattern: "{label}"
scripts:
  render: "state.renders = (state.renders || 0) + 1"
"#;

fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_help_flag() {
    tessera_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("reactive template binding engine"))
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("render"));
}

#[test]
fn test_render_help() {
    tessera_cmd()
        .args(["render", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--set"))
        .stdout(predicate::str::contains("--events"));
}

// ============================================================================
// Validation
// ============================================================================

#[test]
fn test_validate_valid_widget() {
    let dir = TempDir::new().unwrap();
    let widget = write(&dir, "counter.yaml", COUNTER);

    tessera_cmd()
        .arg("validate")
        .arg(&widget)
        .assert()
        .success()
        .stdout(predicate::str::contains("is valid"))
        .stdout(predicate::str::contains("Name: counter"))
        .stdout(predicate::str::contains("Nodes: 2"))
        .stdout(predicate::str::contains("Callbacks: 1"))
        .stdout(predicate::str::contains("Scripts: 1"));
}

#[test]
fn test_validate_unterminated_placeholder() {
    let dir = TempDir::new().unwrap();
    let widget = write(&dir, "broken.yaml", "template: '<p>${oops</p>'\n");

    tessera_cmd()
        .arg("validate")
        .arg(&widget)
        .assert()
        .failure()
        .stderr(predicate::str::contains("TSR-010"))
        .stderr(predicate::str::contains("Fix:"));
}

#[test]
fn test_validate_callback_without_id() {
    let dir = TempDir::new().unwrap();
    let widget = write(
        &dir,
        "anon.yaml",
        "template: '<button onclick=\"${_go}\">Go</button>'\nmethods: [_go]\n",
    );

    tessera_cmd()
        .arg("validate")
        .arg(&widget)
        .assert()
        .failure()
        .stderr(predicate::str::contains("TSR-012"));
}

#[test]
fn test_validate_missing_file() {
    tessera_cmd()
        .args(["validate", "does-not-exist.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("TSR-004"));
}

// ============================================================================
// Rendering
// ============================================================================

#[test]
fn test_render_with_model_file() {
    let dir = TempDir::new().unwrap();
    let widget = write(&dir, "counter.yaml", COUNTER);
    let model = write(&dir, "model.json", r#"{"label": "Clicks", "count": 2}"#);

    tessera_cmd()
        .arg("render")
        .arg(&widget)
        .arg("--model")
        .arg(&model)
        .assert()
        .success()
        .stdout(predicate::str::contains("<div id=\"label-w1\">Clicks: 2</div>"))
        .stdout(predicate::str::contains("<button id=\"inc-w1\">+</button>"));
}

#[test]
fn test_render_applies_set_changes() {
    let dir = TempDir::new().unwrap();
    let widget = write(&dir, "counter.yaml", COUNTER);
    let model = write(&dir, "model.json", r#"{"data": {"label": "Clicks", "count": 2}}"#);

    tessera_cmd()
        .arg("render")
        .arg(&widget)
        .arg("--model")
        .arg(&model)
        .args(["--id", "c7", "--set", "count=5", "--set", "label=Taps"])
        .assert()
        .success()
        .stdout(predicate::str::contains("<div id=\"label-c7\">Taps: 5</div>"));
}

#[test]
fn test_render_prints_event_log() {
    let dir = TempDir::new().unwrap();
    let widget = write(&dir, "counter.yaml", COUNTER);

    tessera_cmd()
        .arg("render")
        .arg(&widget)
        .arg("--events")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"initialized\""))
        .stdout(predicate::str::contains("\"rendered\""))
        .stdout(predicate::str::contains("\"outbound\""));
}

#[test]
fn test_render_rejects_bad_assignment() {
    let dir = TempDir::new().unwrap();
    let widget = write(&dir, "counter.yaml", COUNTER);

    tessera_cmd()
        .arg("render")
        .arg(&widget)
        .args(["--set", "no-equals-sign"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("TSR-051"));
}

#[test]
fn test_malformed_config_is_reported() {
    let dir = TempDir::new().unwrap();
    let widget = write(&dir, "counter.yaml", COUNTER);
    let config = write(&dir, "tessera.toml", "max_script_depth = \"deep\"\n");

    tessera_cmd()
        .arg("render")
        .arg(&widget)
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("TSR-003"));
}
