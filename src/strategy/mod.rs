//! Lifecycle strategies: the mechanisms that actually start, stop and probe services.
//!
//! Every strategy is idempotent for start and stop: acting on a service that
//! is already in the requested state succeeds without issuing a mutating
//! command. A service the mechanism does not know about is reported as not
//! running rather than as an error; only failures to *execute* a command are
//! propagated.
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::{
    config::ManagementStrategy,
    constants::{CONTROL_COMMAND_TIMEOUT, STATUS_COMMAND_TIMEOUT},
    context::Context,
    error::LifecycleError,
    executor::{CommandOutput, Executor, run_argv},
    health::{DefaultHealthChecks, HealthCheck, HealthChecker},
    packages::PackageServiceMap,
};

/// `auto` meta-strategy.
pub mod auto;
/// `brew services` wrapper.
pub mod brew;
/// Caller-supplied command vectors.
pub mod direct;
/// Native init system (launchd / systemd).
pub mod init;
/// Process probing.
pub mod process;

pub use auto::AutoStrategy;
pub use brew::BrewServicesStrategy;
pub use direct::DirectCommandStrategy;
pub use init::{InitSystem, InitSystemStrategy};
pub use process::ProcessOnlyStrategy;

/// Result of a status probe. Produced fresh on every query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatusInfo {
    /// Whether the service is currently running.
    pub running: bool,
    /// Whether the service starts at boot/login.
    pub enabled: bool,
    /// Main process id, empty when unknown.
    pub process_id: String,
    /// Mechanism that answered.
    pub strategy: ManagementStrategy,
    /// Free-form diagnostics.
    pub details: String,
}

impl ServiceStatusInfo {
    /// Status for a service the mechanism does not know about.
    pub fn not_found(strategy: ManagementStrategy, details: impl Into<String>) -> Self {
        Self {
            running: false,
            enabled: false,
            process_id: String::new(),
            strategy,
            details: details.into(),
        }
    }
}

/// Result of a health probe. A running service is not necessarily healthy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceHealthInfo {
    /// Whether the service reports itself ready.
    pub healthy: bool,
    /// Mechanism that answered.
    pub strategy: ManagementStrategy,
    /// Free-form diagnostics.
    pub details: String,
}

/// Capability shared by every control mechanism.
pub trait ServiceLifecycleStrategy: Send + Sync {
    /// Starts the service; a running service is left alone.
    fn start_service(&self, ctx: &Context, name: &str) -> Result<(), LifecycleError>;

    /// Stops the service; a stopped service is left alone.
    fn stop_service(&self, ctx: &Context, name: &str) -> Result<(), LifecycleError>;

    /// Restarts the service.
    fn restart_service(&self, ctx: &Context, name: &str) -> Result<(), LifecycleError>;

    /// Whether the service is running. Unknown services are not running.
    fn is_running(&self, ctx: &Context, name: &str) -> Result<bool, LifecycleError>;

    /// Full status snapshot.
    fn status_check(&self, ctx: &Context, name: &str)
    -> Result<ServiceStatusInfo, LifecycleError>;

    /// Health snapshot.
    fn health_check(&self, ctx: &Context, name: &str)
    -> Result<ServiceHealthInfo, LifecycleError>;

    /// Tag of this strategy.
    fn strategy_name(&self) -> ManagementStrategy;

    /// Whether startup-enablement means anything for this mechanism.
    fn supports_startup(&self) -> bool {
        true
    }

    /// Enables or disables start at boot without touching the run-state.
    fn set_startup(
        &self,
        ctx: &Context,
        name: &str,
        enabled: bool,
    ) -> Result<(), LifecycleError>;

    /// Whether the mechanism gives a recognizable answer for `name`. Used by
    /// the `auto` strategy during discovery.
    fn recognizes(&self, _ctx: &Context, _name: &str) -> Result<bool, LifecycleError> {
        Ok(false)
    }
}

/// Collaborators shared by every concrete strategy.
#[derive(Clone)]
pub struct Toolkit {
    /// Runs the native control tools.
    pub executor: Arc<dyn Executor>,
    /// Runs health probes.
    pub checker: HealthChecker,
    /// Health checks used when the caller supplies none.
    pub health_defaults: Arc<DefaultHealthChecks>,
    /// Package table consulted for default health checks.
    pub packages: Arc<PackageServiceMap>,
}

impl Toolkit {
    /// Bundles the collaborators.
    pub fn new(
        executor: Arc<dyn Executor>,
        health_defaults: Arc<DefaultHealthChecks>,
        packages: Arc<PackageServiceMap>,
    ) -> Self {
        Self {
            checker: HealthChecker::new(executor.clone()),
            executor,
            health_defaults,
            packages,
        }
    }

    /// Runs a mutating command; a non-zero exit is an error.
    pub fn control(
        &self,
        ctx: &Context,
        service: &str,
        action: &str,
        program: &str,
        args: &[&str],
    ) -> Result<CommandOutput, LifecycleError> {
        let output = self
            .executor
            .run(ctx, program, args, CONTROL_COMMAND_TIMEOUT)
            .map_err(|source| LifecycleError::Execution {
                service: service.to_string(),
                action: action.to_string(),
                source,
            })?;
        ensure_success(service, action, output)
    }

    /// Runs a mutating command vector; a non-zero exit is an error.
    pub fn control_argv(
        &self,
        ctx: &Context,
        service: &str,
        action: &str,
        argv: &[String],
    ) -> Result<CommandOutput, LifecycleError> {
        let output = run_argv(self.executor.as_ref(), ctx, argv, CONTROL_COMMAND_TIMEOUT)
            .map_err(|source| LifecycleError::Execution {
                service: service.to_string(),
                action: action.to_string(),
                source,
            })?;
        ensure_success(service, action, output)
    }

    /// Runs a read-only query; the caller interprets the exit code.
    pub fn query(
        &self,
        ctx: &Context,
        service: &str,
        program: &str,
        args: &[&str],
    ) -> Result<CommandOutput, LifecycleError> {
        self.executor
            .run(ctx, program, args, STATUS_COMMAND_TIMEOUT)
            .map_err(|source| LifecycleError::Execution {
                service: service.to_string(),
                action: "query".to_string(),
                source,
            })
    }

    /// Read-only query from a command vector.
    pub fn query_argv(
        &self,
        ctx: &Context,
        service: &str,
        argv: &[String],
    ) -> Result<CommandOutput, LifecycleError> {
        run_argv(self.executor.as_ref(), ctx, argv, STATUS_COMMAND_TIMEOUT).map_err(|source| {
            LifecycleError::Execution {
                service: service.to_string(),
                action: "query".to_string(),
                source,
            }
        })
    }

    /// Evaluates health: the override, else the built-in default for the
    /// service, else the run-state as a proxy.
    pub fn health(
        &self,
        ctx: &Context,
        service: &str,
        strategy: ManagementStrategy,
        override_check: Option<&HealthCheck>,
        running: impl FnOnce() -> Result<bool, LifecycleError>,
    ) -> Result<ServiceHealthInfo, LifecycleError> {
        let check = match override_check {
            Some(check) => Some(check.clone()),
            None => self.health_defaults.lookup(service, &self.packages),
        };

        let Some(check) = check else {
            let running = running()?;
            debug!("No health check for '{service}'; using run-state ({running})");
            return Ok(ServiceHealthInfo {
                healthy: running,
                strategy,
                details: if running {
                    "running (no health check configured)".to_string()
                } else {
                    "not running".to_string()
                },
            });
        };

        let report = self.checker.check(ctx, &check).map_err(|source| {
            LifecycleError::Execution {
                service: service.to_string(),
                action: "health-check".to_string(),
                source,
            }
        })?;

        Ok(ServiceHealthInfo {
            healthy: report.healthy,
            strategy,
            details: report.details,
        })
    }
}

fn ensure_success(
    service: &str,
    action: &str,
    output: CommandOutput,
) -> Result<CommandOutput, LifecycleError> {
    if output.success() {
        Ok(output)
    } else {
        Err(LifecycleError::CommandFailed {
            service: service.to_string(),
            action: action.to_string(),
            exit_code: output.exit_code,
            stderr: output.stderr.trim().to_string(),
        })
    }
}
