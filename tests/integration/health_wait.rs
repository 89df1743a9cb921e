use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use svcctl::{
    config::{
        CustomCommands, HealthCheckConfig, ManagementStrategy, RunState, ServiceConfig,
    },
    context::Context,
    dependencies::{DependencyManager, DependencyPolicy},
    error::LifecycleError,
    executor::CommandOutput,
    factory::ServiceStrategyFactory,
    orchestrator::LifecycleOrchestrator,
    strategy::InitSystem,
    test_utils::ScriptedExecutor,
    wait::PollSettings,
};

fn orchestrator(executor: Arc<ScriptedExecutor>, poll: PollSettings) -> LifecycleOrchestrator {
    let factory = ServiceStrategyFactory::new(executor).with_init_system(InitSystem::Systemd);
    let dependencies = DependencyManager::new(factory.clone(), DependencyPolicy::default(), poll);
    LifecycleOrchestrator::new(factory, dependencies, poll)
}

fn api_config(wait_timeout: &str) -> ServiceConfig {
    ServiceConfig {
        state: RunState::Running,
        strategy: ManagementStrategy::DirectCommand,
        commands: Some(CustomCommands::from_static(
            &["apictl", "start"],
            &["apictl", "stop"],
            Some(&["apictl", "status"]),
        )),
        health_check: Some(HealthCheckConfig {
            command: Some(vec!["api-ready".into()]),
            ..HealthCheckConfig::default()
        }),
        wait_for_healthy: true,
        wait_timeout: Some(wait_timeout.into()),
        ..ServiceConfig::default()
    }
}

fn running_api(executor: &ScriptedExecutor) {
    executor.respond_sequence(
        "apictl status",
        vec![CommandOutput::new(1, "", ""), CommandOutput::new(0, "", "")],
    );
    executor.respond("apictl start", CommandOutput::new(0, "", ""));
}

#[test]
fn late_probes_still_get_a_full_budget() {
    let executor = Arc::new(ScriptedExecutor::new());
    running_api(&executor);
    // Healthy only on the 8th probe, close to the 500ms deadline.
    executor.respond_with("api-ready", |hit| {
        if hit >= 7 {
            CommandOutput::new(0, "", "")
        } else {
            CommandOutput::new(1, "", "warming up")
        }
    });

    let poll = PollSettings {
        interval: Duration::from_millis(50),
        probe_timeout: Duration::from_secs(3),
    };
    let state = orchestrator(executor.clone(), poll)
        .apply(&Context::background(), "api", &api_config("500ms"))
        .expect("api should become healthy before the deadline");
    assert!(state.healthy);

    let probes: Vec<_> = executor
        .calls()
        .into_iter()
        .filter(|call| call.command == "api-ready")
        .collect();
    assert!(probes.len() >= 8, "only {} probes", probes.len());
    for probe in probes {
        assert!(!probe.expired, "probe issued with an expired context");
        let remaining = probe.remaining.expect("probe context has a deadline");
        assert!(
            remaining > Duration::from_millis(2500),
            "probe budget was cut to {remaining:?}"
        );
    }
}

#[test]
fn never_healthy_times_out_near_the_wait_timeout() {
    let executor = Arc::new(ScriptedExecutor::new());
    running_api(&executor);
    executor.respond("api-ready", CommandOutput::new(1, "", "still down"));

    let poll = PollSettings {
        interval: Duration::from_millis(40),
        probe_timeout: Duration::from_secs(1),
    };
    let started = Instant::now();
    let err = orchestrator(executor.clone(), poll)
        .apply(&Context::background(), "api", &api_config("400ms"))
        .unwrap_err();
    let elapsed = started.elapsed();

    match err {
        LifecycleError::HealthTimeout { ref service, timeout } => {
            assert_eq!(service, "api");
            assert_eq!(timeout, Duration::from_millis(400));
        }
        other => panic!("expected a health timeout, got {other:?}"),
    }
    assert!(elapsed >= Duration::from_millis(400), "gave up early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(3), "gave up late: {elapsed:?}");
    assert!(executor.count("api-ready") >= 5);
}

#[test]
fn probe_execution_errors_are_retried() {
    let executor = Arc::new(ScriptedExecutor::new());
    running_api(&executor);
    executor.fail("api-ready", "exec format error");
    let poll = PollSettings {
        interval: Duration::from_millis(20),
        probe_timeout: Duration::from_secs(1),
    };
    let orchestrator = orchestrator(executor.clone(), poll);

    let ready = executor.clone();
    let fixer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(150));
        ready.respond("api-ready", CommandOutput::new(0, "", ""));
    });

    let state = orchestrator
        .apply(&Context::background(), "api", &api_config("5s"))
        .expect("wait should survive failing probes");
    fixer.join().unwrap();
    assert!(state.healthy);
}

#[test]
fn caller_cancellation_ends_the_wait() {
    let executor = Arc::new(ScriptedExecutor::new());
    running_api(&executor);
    executor.respond("api-ready", CommandOutput::new(1, "", ""));
    let poll = PollSettings {
        interval: Duration::from_millis(20),
        probe_timeout: Duration::from_secs(1),
    };
    let orchestrator = orchestrator(executor, poll);

    let umbrella = Context::background().with_cancel();
    let canceller = umbrella.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        canceller.cancel();
    });

    let started = Instant::now();
    let err = orchestrator
        .apply(&umbrella, "api", &api_config("60s"))
        .unwrap_err();
    handle.join().unwrap();

    assert!(matches!(err, LifecycleError::Cancelled { .. }), "{err:?}");
    assert!(!err.is_timeout());
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn expired_context_is_rejected_before_spawning() {
    let executor = Arc::new(ScriptedExecutor::new());
    let ctx = Context::background().with_timeout(Duration::ZERO);
    thread::sleep(Duration::from_millis(5));

    let strategy = ServiceStrategyFactory::new(executor.clone())
        .with_init_system(InitSystem::Systemd)
        .create_lifecycle_strategy(ManagementStrategy::Launchd, None, "nginx", None)
        .unwrap();
    let err = strategy.status_check(&ctx, "nginx").unwrap_err();

    assert!(err.to_string().contains("context already expired"), "{err}");
    let calls = executor.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].expired);
}
