use std::{
    fs,
    path::Path,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use svcctl::{
    config::{Config, CustomCommands, ManagementStrategy, load_config},
    context::Context,
    executor::CommandOutput,
    factory::ServiceStrategyFactory,
    orchestrator::LifecycleOrchestrator,
    strategy::InitSystem,
    test_utils::ScriptedExecutor,
};
use tempfile::tempdir;

#[derive(Default)]
struct BrewState {
    running: bool,
    registered: bool,
}

/// Scripts `brew services` for `name`, keeping run-state and registration in sync
/// with the subcommands issued.
fn fake_brew(executor: &ScriptedExecutor, name: &str, initial: BrewState) -> Arc<Mutex<BrewState>> {
    let state = Arc::new(Mutex::new(initial));
    executor.respond(
        "brew services list",
        CommandOutput::new(0, format!("Name Status User File\n{name} none\n"), ""),
    );

    let info = state.clone();
    let info_name = name.to_string();
    executor.respond_with(&format!("brew services info {name}"), move |_| {
        let state = info.lock().unwrap();
        CommandOutput::new(
            0,
            format!(
                r#"[{{"name":"{info_name}","running":{},"loaded":{},"registered":{},"status":"{}"}}]"#,
                state.running,
                state.registered,
                state.registered,
                if state.running { "started" } else { "none" },
            ),
            "",
        )
    });

    let transitions: [(&str, Option<bool>, Option<bool>); 4] = [
        ("run", Some(true), None),
        ("start", Some(true), Some(true)),
        ("stop --keep", Some(false), None),
        ("stop", Some(false), Some(false)),
    ];
    for (verb, running, registered) in transitions {
        let state = state.clone();
        executor.respond_with(&format!("brew services {verb} {name}"), move |_| {
            let mut state = state.lock().unwrap();
            if let Some(running) = running {
                state.running = running;
            }
            if let Some(registered) = registered {
                state.registered = registered;
            }
            CommandOutput::new(0, "", "")
        });
    }
    state
}

fn write_manifest(dir: &Path, body: &str) -> Config {
    let path = dir.join("svcctl.yaml");
    fs::write(&path, body).expect("failed to write manifest");
    load_config(Some(path.to_str().unwrap())).expect("manifest should load")
}

#[test]
fn redis_auto_strategy_starts_and_waits_for_ping() {
    let temp = tempdir().expect("failed to create tempdir");
    let config = write_manifest(
        temp.path(),
        r#"version: "1"
settings:
  poll_interval: "20ms"
  probe_timeout: "2s"
services:
  redis:
    state: running
    strategy: auto
    wait_for_healthy: true
    wait_timeout: "30s"
"#,
    );

    let executor = Arc::new(ScriptedExecutor::new());
    let brew = fake_brew(&executor, "redis", BrewState::default());
    executor.respond_sequence(
        "redis-cli ping",
        vec![
            CommandOutput::new(1, "", "Could not connect to Redis"),
            CommandOutput::new(1, "", "Could not connect to Redis"),
            CommandOutput::new(0, "PONG\n", ""),
        ],
    );

    let orchestrator =
        LifecycleOrchestrator::from_config(executor.clone(), &config).expect("orchestrator");
    let started = Instant::now();
    let state = orchestrator
        .apply(&Context::background(), "redis", config.service("redis").unwrap())
        .expect("redis should come up");

    assert!(started.elapsed() < Duration::from_secs(30));
    assert_eq!(state.strategy, ManagementStrategy::BrewServices);
    assert!(state.running);
    assert!(state.healthy);
    assert!(brew.lock().unwrap().running);
    // Started without touching login registration.
    assert!(!brew.lock().unwrap().registered);
    assert_eq!(executor.count("brew services run redis"), 1);
    assert!(executor.count("redis-cli ping") >= 3);
}

#[test]
fn brew_enabled_but_stopped_keeps_axes_apart() {
    let temp = tempdir().expect("failed to create tempdir");
    let config = write_manifest(
        temp.path(),
        r#"version: "1"
services:
  postgresql@16:
    state: stopped
    enabled: true
    strategy: brew_services
"#,
    );

    let executor = Arc::new(ScriptedExecutor::new());
    let brew = fake_brew(&executor, "postgresql@16", BrewState::default());
    let orchestrator = LifecycleOrchestrator::from_config(executor.clone(), &config).unwrap();

    let state = orchestrator
        .apply(
            &Context::background(),
            "postgresql@16",
            config.service("postgresql@16").unwrap(),
        )
        .unwrap();

    assert!(state.enabled);
    assert!(!state.running);
    let brew = brew.lock().unwrap();
    assert!(brew.registered);
    assert!(!brew.running);
}

#[test]
fn brew_running_but_disabled_keeps_axes_apart() {
    let temp = tempdir().expect("failed to create tempdir");
    let config = write_manifest(
        temp.path(),
        r#"version: "1"
services:
  memcached:
    state: running
    enabled: false
    strategy: brew_services
"#,
    );

    let executor = Arc::new(ScriptedExecutor::new());
    let brew = fake_brew(
        &executor,
        "memcached",
        BrewState {
            running: true,
            registered: true,
        },
    );
    let orchestrator = LifecycleOrchestrator::from_config(executor.clone(), &config).unwrap();

    orchestrator
        .apply(&Context::background(), "memcached", config.service("memcached").unwrap())
        .unwrap();

    let brew = brew.lock().unwrap();
    assert!(brew.running);
    assert!(!brew.registered);
}

#[test]
fn start_and_stop_are_idempotent_for_every_strategy() {
    let executor = Arc::new(ScriptedExecutor::new());
    executor.respond(
        "systemctl show web",
        CommandOutput::new(
            0,
            "LoadState=loaded\nActiveState=active\nUnitFileState=enabled\nMainPID=9\n",
            "",
        ),
    );
    executor.respond(
        "brew services info web",
        CommandOutput::new(0, r#"[{"name":"web","running":true}]"#, ""),
    );
    executor.respond("brew services list", CommandOutput::new(0, "web started\n", ""));
    executor.respond("webctl status", CommandOutput::new(0, "", ""));
    executor.respond("pgrep -x web", CommandOutput::new(0, "9\n", ""));

    let factory = ServiceStrategyFactory::new(executor.clone()).with_init_system(InitSystem::Systemd);
    let commands = CustomCommands::from_static(
        &["webctl", "start"],
        &["webctl", "stop"],
        Some(&["webctl", "status"]),
    );
    let ctx = Context::background();

    for tag in [
        ManagementStrategy::Auto,
        ManagementStrategy::BrewServices,
        ManagementStrategy::DirectCommand,
        ManagementStrategy::Launchd,
        ManagementStrategy::ProcessOnly,
    ] {
        let strategy = factory
            .create_lifecycle_strategy(tag, Some(&commands), "web", None)
            .unwrap();
        executor.clear_calls();
        strategy.start_service(&ctx, "web").unwrap();
        strategy.start_service(&ctx, "web").unwrap();

        let mutating: Vec<String> = executor
            .commands()
            .into_iter()
            .filter(|c| {
                !c.starts_with("systemctl show")
                    && !c.starts_with("brew services info")
                    && !c.starts_with("brew services list")
                    && !c.starts_with("webctl status")
                    && !c.starts_with("pgrep")
            })
            .collect();
        assert!(mutating.is_empty(), "{tag} issued {mutating:?}");
    }

    // Now everything reports stopped.
    executor.respond(
        "systemctl show web",
        CommandOutput::new(0, "LoadState=loaded\nActiveState=inactive\nMainPID=0\n", ""),
    );
    executor.respond(
        "brew services info web",
        CommandOutput::new(0, r#"[{"name":"web","running":false}]"#, ""),
    );
    executor.respond("webctl status", CommandOutput::new(3, "", ""));
    executor.respond("pgrep -x web", CommandOutput::new(1, "", ""));

    for tag in [
        ManagementStrategy::BrewServices,
        ManagementStrategy::DirectCommand,
        ManagementStrategy::Launchd,
        ManagementStrategy::ProcessOnly,
    ] {
        let strategy = factory
            .create_lifecycle_strategy(tag, Some(&commands), "web", None)
            .unwrap();
        executor.clear_calls();
        strategy.stop_service(&ctx, "web").unwrap();

        assert_eq!(executor.count("systemctl stop"), 0, "{tag}");
        assert_eq!(executor.count("brew services stop"), 0, "{tag}");
        assert_eq!(executor.count("webctl stop"), 0, "{tag}");
        assert_eq!(executor.count("pkill"), 0, "{tag}");
    }
}

#[test]
fn process_only_ignores_enabled_flag() {
    let temp = tempdir().expect("failed to create tempdir");
    let config = write_manifest(
        temp.path(),
        r#"version: "1"
services:
  caddy:
    strategy: process_only
    enabled: true
    commands:
      start: ["caddy", "start"]
"#,
    );

    let executor = Arc::new(ScriptedExecutor::new());
    executor.respond_sequence(
        "pgrep -x caddy",
        vec![CommandOutput::new(1, "", ""), CommandOutput::new(0, "77\n", "")],
    );
    executor.respond("caddy start", CommandOutput::new(0, "", ""));
    let orchestrator = LifecycleOrchestrator::from_config(executor.clone(), &config).unwrap();

    let state = orchestrator
        .apply(&Context::background(), "caddy", config.service("caddy").unwrap())
        .unwrap();

    assert!(state.running);
    assert!(!state.enabled);
    assert_eq!(state.process_id, "77");
    assert_eq!(executor.count("caddy start"), 1);
}

#[test]
fn direct_command_default_table_and_missing_commands() {
    let temp = tempdir().expect("failed to create tempdir");
    let config = write_manifest(
        temp.path(),
        r#"version: "1"
services:
  colima:
    strategy: direct_command
  homegrown:
    strategy: direct_command
"#,
    );

    let executor = Arc::new(ScriptedExecutor::new());
    executor.respond_sequence(
        "colima status",
        vec![CommandOutput::new(1, "", ""), CommandOutput::new(0, "", "")],
    );
    executor.respond("colima start", CommandOutput::new(0, "", ""));
    let orchestrator = LifecycleOrchestrator::from_config(executor.clone(), &config).unwrap();

    orchestrator
        .apply(&Context::background(), "colima", config.service("colima").unwrap())
        .unwrap();
    assert_eq!(executor.count("colima start"), 1);

    executor.clear_calls();
    let err = orchestrator
        .apply(&Context::background(), "homegrown", config.service("homegrown").unwrap())
        .unwrap_err();
    assert!(err.to_string().contains("No commands available"), "{err}");
    assert!(executor.calls().is_empty());
}
