use std::{fs, path::Path, sync::Arc};

use svcctl::{
    config::{Config, DependencyType, load_config},
    context::Context,
    dependencies::{ContainerRuntimeDetector, DependencyDetector},
    error::LifecycleError,
    executor::CommandOutput,
    orchestrator::LifecycleOrchestrator,
    test_utils::ScriptedExecutor,
};
use tempfile::tempdir;

fn write_manifest(dir: &Path, body: &str) -> Config {
    let path = dir.join("svcctl.yaml");
    fs::write(&path, body).expect("failed to write manifest");
    load_config(Some(path.to_str().unwrap())).expect("manifest should load")
}

#[test]
fn manifest_cycle_is_rejected_before_any_command() {
    let temp = tempdir().expect("failed to create tempdir");
    let config = write_manifest(
        temp.path(),
        r#"version: "1"
services:
  a:
    enabled: true
    strategy: launchd
    depends_on:
      - service: b
  b:
    depends_on:
      - service: c
  c:
    depends_on:
      - service: a
"#,
    );
    let executor = Arc::new(ScriptedExecutor::new());
    let orchestrator = LifecycleOrchestrator::from_config(executor.clone(), &config).unwrap();

    let err = orchestrator
        .apply(&Context::background(), "a", config.service("a").unwrap())
        .unwrap_err();
    match err {
        LifecycleError::DependencyCycle { service, cycle } => {
            assert!(["a", "b", "c"].contains(&service.as_str()));
            assert_eq!(cycle, "a -> b -> c -> a");
        }
        other => panic!("expected a dependency cycle, got {other:?}"),
    }
    assert!(executor.calls().is_empty());
}

#[test]
fn acyclic_manifest_validates() {
    let temp = tempdir().expect("failed to create tempdir");
    let config = write_manifest(
        temp.path(),
        r#"version: "1"
services:
  a:
    depends_on:
      - service: b
  b:
    depends_on:
      - service: c
  c: {}
"#,
    );
    let orchestrator =
        LifecycleOrchestrator::from_config(Arc::new(ScriptedExecutor::new()), &config).unwrap();
    orchestrator
        .dependencies()
        .validate_dependency_chain(&Context::background(), "a")
        .unwrap();
}

#[test]
fn stopping_a_service_ignores_its_dependencies() {
    let temp = tempdir().expect("failed to create tempdir");
    let config = write_manifest(
        temp.path(),
        r#"version: "1"
services:
  a:
    state: stopped
    strategy: direct_command
    commands:
      start: ["actl", "up"]
      stop: ["actl", "down"]
      status: ["actl", "state"]
    depends_on:
      - service: a
"#,
    );
    let executor = Arc::new(ScriptedExecutor::new());
    executor.respond("actl state", CommandOutput::new(0, "", ""));
    executor.respond("actl down", CommandOutput::new(0, "", ""));
    let orchestrator = LifecycleOrchestrator::from_config(executor.clone(), &config).unwrap();

    orchestrator
        .apply(&Context::background(), "a", config.service("a").unwrap())
        .unwrap();
    assert_eq!(executor.count("actl down"), 1);
}

#[test]
fn container_backed_service_waits_for_docker_first() {
    let temp = tempdir().expect("failed to create tempdir");
    let config = write_manifest(
        temp.path(),
        r#"version: "1"
settings:
  poll_interval: "10ms"
services:
  minikube:
    strategy: direct_command
  docker:
    strategy: direct_command
    commands:
      start: ["colima", "start"]
      stop: ["colima", "stop"]
      status: ["colima", "status"]
"#,
    );

    let executor = Arc::new(ScriptedExecutor::new());
    executor.respond_sequence(
        "colima status",
        vec![CommandOutput::new(1, "", ""), CommandOutput::new(0, "", "")],
    );
    executor.respond("colima start", CommandOutput::new(0, "", ""));
    executor.respond_sequence(
        "docker info",
        vec![
            CommandOutput::new(1, "", "Cannot connect to the Docker daemon"),
            CommandOutput::new(0, "", ""),
        ],
    );
    executor.respond_sequence(
        "minikube status",
        vec![CommandOutput::new(7, "", ""), CommandOutput::new(0, "", "")],
    );
    executor.respond("minikube start", CommandOutput::new(0, "", ""));
    let orchestrator = LifecycleOrchestrator::from_config(executor.clone(), &config).unwrap();

    let state = orchestrator
        .apply(&Context::background(), "minikube", config.service("minikube").unwrap())
        .unwrap();
    assert!(state.running);

    let commands = executor.commands();
    let position = |needle: &str| {
        commands
            .iter()
            .position(|c| c == needle)
            .unwrap_or_else(|| panic!("{needle} never ran: {commands:?}"))
    };
    assert!(position("colima start") < position("docker info"));
    assert!(position("docker info") < position("minikube start"));
    assert!(executor.count("docker info") >= 2);
}

#[test]
fn failed_required_dependency_blocks_the_dependent() {
    let temp = tempdir().expect("failed to create tempdir");
    let config = write_manifest(
        temp.path(),
        r#"version: "1"
services:
  app:
    strategy: direct_command
    commands:
      start: ["app", "up"]
      stop: ["app", "down"]
    depends_on:
      - service: db
  db:
    strategy: direct_command
    commands:
      start: ["db", "up"]
      stop: ["db", "down"]
      status: ["db", "state"]
"#,
    );
    let executor = Arc::new(ScriptedExecutor::new());
    executor.respond("db state", CommandOutput::new(1, "", ""));
    executor.respond("db up", CommandOutput::new(1, "", "address already in use"));
    let orchestrator = LifecycleOrchestrator::from_config(executor.clone(), &config).unwrap();

    let err = orchestrator
        .apply(&Context::background(), "app", config.service("app").unwrap())
        .unwrap_err();
    assert!(
        matches!(err, LifecycleError::DependencyFailed { ref dependency, .. } if dependency == "db"),
        "{err:?}"
    );
    assert_eq!(executor.count("app up"), 0);
}

#[test]
fn optional_dependency_failures_do_not_block() {
    let temp = tempdir().expect("failed to create tempdir");
    let config = write_manifest(
        temp.path(),
        r#"version: "1"
settings:
  blocking_dependencies: [required]
services:
  app:
    strategy: direct_command
    commands:
      start: ["app", "up"]
      stop: ["app", "down"]
      status: ["app", "state"]
    depends_on:
      - service: edge
        type: proxy
      - service: metrics
        type: optional
  edge:
    strategy: direct_command
    commands:
      start: ["edge", "up"]
      stop: ["edge", "down"]
      status: ["edge", "state"]
"#,
    );
    let executor = Arc::new(ScriptedExecutor::new());
    executor.respond_sequence(
        "app state",
        vec![CommandOutput::new(1, "", ""), CommandOutput::new(0, "", "")],
    );
    executor.respond("app up", CommandOutput::new(0, "", ""));
    executor.respond("edge state", CommandOutput::new(1, "", ""));
    executor.respond("edge up", CommandOutput::new(1, "", "bind failed"));
    let orchestrator = LifecycleOrchestrator::from_config(executor.clone(), &config).unwrap();

    let state = orchestrator
        .apply(&Context::background(), "app", config.service("app").unwrap())
        .unwrap();
    assert!(state.running);
    assert_eq!(executor.count("edge up"), 1);
    assert_eq!(executor.count("metrics"), 0);
    assert!(!orchestrator.dependencies().policy().is_blocking(DependencyType::Proxy));
}

#[test]
fn builtin_container_detector_is_registered() {
    let detector = ContainerRuntimeDetector::builtin();
    let found = detector.detect(&Context::background(), "kind").unwrap();
    assert_eq!(found[0].target_service, "docker");
}
