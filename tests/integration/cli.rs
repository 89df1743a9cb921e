use std::{fs, path::Path};

use assert_cmd::Command;
use predicates::prelude::*;
use predicates::str::contains;
use tempfile::tempdir;

fn svcctl() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("svcctl"))
}

/// A `direct_command` service whose "process" is a marker file.
fn marker_manifest(dir: &Path) -> (String, String) {
    let marker = dir.join("marker.up");
    let marker = marker.to_str().unwrap().to_string();
    let config_path = dir.join("svcctl.yaml");
    fs::write(
        &config_path,
        format!(
            r#"version: "1"
settings:
  poll_interval: "100ms"
  probe_timeout: "5s"
services:
  marker:
    strategy: direct_command
    commands:
      start: ["touch", "{marker}"]
      stop: ["rm", "-f", "{marker}"]
      status: ["test", "-f", "{marker}"]
    health_check:
      command: ["test", "-f", "{marker}"]
    wait_for_healthy: true
    wait_timeout: "10s"
"#
        ),
    )
    .expect("failed to write config");
    (config_path.to_str().unwrap().to_string(), marker)
}

#[cfg(unix)]
#[test]
fn apply_status_and_stop_round_trip() {
    let temp = tempdir().expect("failed to create tempdir");
    let (config, marker) = marker_manifest(temp.path());

    svcctl()
        .args(["apply", "--config", &config])
        .assert()
        .success()
        .stdout(contains("marker").and(contains("direct_command")));
    assert!(Path::new(&marker).exists(), "start command did not run");

    svcctl()
        .args(["status", "--config", &config, "--json"])
        .assert()
        .success()
        .stdout(contains(r#""running": true"#).and(contains(r#""healthy": true"#)));

    svcctl()
        .args(["stop", "--config", &config, "--service", "marker"])
        .assert()
        .success();
    assert!(!Path::new(&marker).exists(), "stop command did not run");

    svcctl()
        .args(["status", "-c", &config, "--json"])
        .assert()
        .success()
        .stdout(contains(r#""running": false"#));
}

#[test]
fn deps_prints_the_tree() {
    let temp = tempdir().expect("failed to create tempdir");
    let config_path = temp.path().join("svcctl.yaml");
    fs::write(
        &config_path,
        r#"version: "1"
services:
  api:
    depends_on:
      - service: db
      - service: cache
        type: optional
  db: {}
"#,
    )
    .unwrap();

    svcctl()
        .args(["deps", "api", "--config", config_path.to_str().unwrap()])
        .assert()
        .success()
        .stdout(
            contains("api")
                .and(contains("- db (required, blocking)"))
                .and(contains("- cache (optional, best-effort)")),
        );
}

#[test]
fn deps_reports_cycles() {
    let temp = tempdir().expect("failed to create tempdir");
    let config_path = temp.path().join("svcctl.yaml");
    fs::write(
        &config_path,
        r#"version: "1"
services:
  a:
    depends_on:
      - service: b
  b:
    depends_on:
      - service: a
"#,
    )
    .unwrap();

    svcctl()
        .args(["deps", "a", "-c", config_path.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(contains("a -> b -> a"));
}

#[test]
fn invalid_wait_timeout_is_a_configuration_error() {
    let temp = tempdir().expect("failed to create tempdir");
    let config_path = temp.path().join("svcctl.yaml");
    fs::write(
        &config_path,
        r#"version: "1"
services:
  api:
    wait_for_healthy: true
    wait_timeout: "soon"
"#,
    )
    .unwrap();

    svcctl()
        .args(["apply", "-c", config_path.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(contains("Invalid duration value"));
}

#[test]
fn unknown_service_is_rejected() {
    let temp = tempdir().expect("failed to create tempdir");
    let (config, _) = marker_manifest(temp.path());

    svcctl()
        .args(["status", "-c", &config, "-s", "ghost"])
        .assert()
        .failure()
        .stderr(contains("Unknown service"));
}

#[test]
fn missing_manifest_fails() {
    let temp = tempdir().expect("failed to create tempdir");
    svcctl()
        .current_dir(temp.path())
        .arg("status")
        .assert()
        .failure()
        .stderr(contains("svcctl.yaml"));
}
