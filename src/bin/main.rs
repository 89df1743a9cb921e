use std::{error::Error, sync::Arc};

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use svcctl::{
    cli::{Cli, Commands, parse_args},
    config::{Config, RunState, ServiceConfig, load_config},
    context::Context,
    dependencies::DependencyManager,
    executor::SystemExecutor,
    orchestrator::{LifecycleOrchestrator, ServiceState},
    packages::PackageServiceMap,
};

fn main() -> Result<(), Box<dyn Error>> {
    let args = parse_args();
    init_logging(&args);

    let umbrella = Context::background().with_cancel();
    register_signal_handler(&umbrella)?;

    match args.command {
        Commands::Apply {
            config,
            service,
            json,
        } => {
            let (config, orchestrator) = build(&config)?;
            let mut states = Vec::new();
            let mut failures = 0;
            for name in selected(&config, service.as_deref())? {
                let desired = config.service(&name)?;
                match orchestrator.apply(&umbrella, &name, desired) {
                    Ok(state) => states.push(state),
                    Err(err) => {
                        error!("Failed to apply '{name}': {err}");
                        failures += 1;
                    }
                }
                if umbrella.is_done() {
                    warn!("Interrupted; remaining services were not applied");
                    break;
                }
            }
            print_states(&states, json)?;
            if failures > 0 {
                return Err(format!("{failures} service(s) failed to apply").into());
            }
        }
        Commands::Status {
            config,
            service,
            json,
        } => {
            let (config, orchestrator) = build(&config)?;
            let mut states = Vec::new();
            for name in selected(&config, service.as_deref())? {
                states.push(orchestrator.refresh(&umbrella, &name, config.service(&name)?)?);
            }
            print_states(&states, json)?;
        }
        Commands::Stop {
            config,
            service,
            disable,
        } => {
            let (config, orchestrator) = build(&config)?;
            for name in selected(&config, service.as_deref())? {
                let declared = config.service(&name)?;
                if disable {
                    orchestrator.teardown(&umbrella, &name, declared)?;
                } else {
                    let stopped = ServiceConfig {
                        state: RunState::Stopped,
                        enabled: None,
                        wait_for_healthy: false,
                        ..declared.clone()
                    };
                    orchestrator.apply(&umbrella, &name, &stopped)?;
                }
                info!("Service '{name}' stopped");
            }
        }
        Commands::Deps { config, service } => {
            let (_, orchestrator) = build(&config)?;
            let manager = orchestrator.dependencies();
            manager.validate_dependency_chain(&umbrella, &service)?;
            println!("{service}");
            print_tree(manager, &umbrella, &service, 1)?;
        }
    }

    Ok(())
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn register_signal_handler(umbrella: &Context) -> Result<(), Box<dyn Error>> {
    let umbrella = umbrella.clone();
    ctrlc::set_handler(move || {
        eprintln!("svcctl interrupted; cancelling pending operations");
        umbrella.cancel();
    })?;

    Ok(())
}

fn build(config_path: &str) -> Result<(Config, LifecycleOrchestrator), Box<dyn Error>> {
    let config = load_config(Some(config_path))?;
    let orchestrator = LifecycleOrchestrator::from_config(Arc::new(SystemExecutor::new()), &config)?;
    Ok((config, orchestrator))
}

fn selected(config: &Config, service: Option<&str>) -> Result<Vec<String>, Box<dyn Error>> {
    match service {
        Some(name) => Ok(config.select(name, &PackageServiceMap::builtin())?),
        None => Ok(config.service_names()),
    }
}

fn print_states(states: &[ServiceState], json: bool) -> Result<(), Box<dyn Error>> {
    if json {
        println!("{}", serde_json::to_string_pretty(states)?);
        return Ok(());
    }

    println!(
        "{:<24} {:<14} {:<8} {:<8} {:<8} {:<8}",
        "SERVICE", "STRATEGY", "RUNNING", "ENABLED", "HEALTHY", "PID"
    );
    for state in states {
        println!(
            "{:<24} {:<14} {:<8} {:<8} {:<8} {:<8}",
            state.name,
            state.strategy.as_ref(),
            yes_no(state.running),
            yes_no(state.enabled),
            yes_no(state.healthy),
            if state.process_id.is_empty() { "-" } else { state.process_id.as_str() },
        );
    }
    Ok(())
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

fn print_tree(
    manager: &DependencyManager,
    ctx: &Context,
    service: &str,
    depth: usize,
) -> Result<(), Box<dyn Error>> {
    for dependency in manager.detect_dependencies(ctx, service)? {
        let blocking = if manager.policy().is_blocking(dependency.dependency_type) {
            "blocking"
        } else {
            "best-effort"
        };
        println!(
            "{}- {} ({}, {blocking})",
            "  ".repeat(depth),
            dependency.target_service,
            dependency.dependency_type,
        );
        print_tree(manager, ctx, &dependency.target_service, depth + 1)?;
    }
    Ok(())
}
