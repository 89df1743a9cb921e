//! Brings a service to its desired run-state and startup-enablement.
//!
//! Run-state and startup are independent axes: `apply` only touches startup
//! when `enabled` is set, and never starts or stops anything as a side effect
//! of enabling or disabling. Every state reported back comes from probes
//! issued after the last mutating call.
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    config::{Config, ManagementStrategy, RunState, ServiceConfig},
    context::{Context, scoped},
    dependencies::{ConfiguredDependencyDetector, ContainerRuntimeDetector, DependencyManager},
    error::LifecycleError,
    executor::Executor,
    factory::ServiceStrategyFactory,
    strategy::{ServiceHealthInfo, ServiceLifecycleStrategy},
    wait::{PollSettings, wait_for_healthy},
};

/// Observed state of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceState {
    /// Service name.
    pub name: String,
    /// Whether the service is running.
    pub running: bool,
    /// Whether the service starts at boot/login.
    pub enabled: bool,
    /// Whether the last health probe succeeded.
    pub healthy: bool,
    /// Main process id, empty when unknown.
    pub process_id: String,
    /// Mechanism that answered.
    pub strategy: ManagementStrategy,
    /// Status diagnostics.
    pub status_details: String,
    /// Health diagnostics.
    pub health_details: String,
}

/// Applies desired state to services and reads their actual state back.
pub struct LifecycleOrchestrator {
    factory: ServiceStrategyFactory,
    dependencies: DependencyManager,
    poll: PollSettings,
}

impl LifecycleOrchestrator {
    /// Assembles an orchestrator from its parts.
    pub fn new(
        factory: ServiceStrategyFactory,
        dependencies: DependencyManager,
        poll: PollSettings,
    ) -> Self {
        Self {
            factory,
            dependencies,
            poll,
        }
    }

    /// Orchestrator for a manifest: declared dependencies plus the container
    /// runtime detector, with the manifest's poll settings and policy.
    pub fn from_config(executor: Arc<dyn Executor>, config: &Config) -> Result<Self, LifecycleError> {
        let poll = config.poll_settings()?;
        let factory = ServiceStrategyFactory::new(executor);
        let dependencies =
            DependencyManager::new(factory.clone(), config.dependency_policy(), poll)
                .with_detector(Box::new(ConfiguredDependencyDetector::from_config(config)?))
                .with_detector(Box::new(ContainerRuntimeDetector::builtin()))
                .with_targets(config.services.clone());
        Ok(Self::new(factory, dependencies, poll))
    }

    /// The dependency manager used before starting services.
    pub fn dependencies(&self) -> &DependencyManager {
        &self.dependencies
    }

    /// Builds the strategy described by `config`. Performs no I/O.
    pub fn strategy_for(
        &self,
        name: &str,
        config: &ServiceConfig,
    ) -> Result<Box<dyn ServiceLifecycleStrategy>, LifecycleError> {
        self.factory.create_lifecycle_strategy(
            config.strategy,
            config.commands.as_ref(),
            name,
            config.health_check()?,
        )
    }

    /// Drives `name` to the state described by `config` and returns the
    /// freshly observed result.
    ///
    /// Configuration problems and dependency cycles are reported before any
    /// mutating command runs.
    pub fn apply(
        &self,
        ctx: &Context,
        name: &str,
        config: &ServiceConfig,
    ) -> Result<ServiceState, LifecycleError> {
        let wait_timeout = if config.wait_for_healthy {
            Some(config.wait_timeout()?)
        } else {
            None
        };
        let strategy = self.strategy_for(name, config)?;
        info!(
            "Applying state '{}' to service '{name}' via {}",
            config.state,
            strategy.strategy_name()
        );

        if config.state == RunState::Running {
            self.dependencies.validate_dependency_chain(ctx, name)?;
        }

        if let Some(enabled) = config.enabled {
            if strategy.supports_startup() {
                strategy.set_startup(ctx, name, enabled)?;
            } else {
                info!(
                    "{} has no startup registration; ignoring enabled={enabled} for '{name}'",
                    strategy.strategy_name()
                );
            }
        }

        match config.state {
            RunState::Running => {
                self.dependencies.ensure_dependencies(ctx, name)?;
                strategy.start_service(ctx, name)?;
                if let Some(timeout) = wait_timeout {
                    wait_for_healthy(ctx, name, timeout, &self.poll, |probe_ctx| {
                        strategy.health_check(probe_ctx, name)
                    })?;
                }
            }
            RunState::Stopped => {
                if config.wait_for_healthy {
                    debug!("Ignoring wait_for_healthy for '{name}'; desired state is stopped");
                }
                strategy.stop_service(ctx, name)?;
            }
        }

        self.observe(ctx, name, strategy.as_ref())
    }

    /// Re-reads status and health from scratch.
    pub fn refresh(
        &self,
        ctx: &Context,
        name: &str,
        config: &ServiceConfig,
    ) -> Result<ServiceState, LifecycleError> {
        let strategy = self.strategy_for(name, config)?;
        self.observe(ctx, name, strategy.as_ref())
    }

    /// Stops the service and removes its startup registration. Failures are
    /// logged and do not abort the rest of the teardown.
    pub fn teardown(
        &self,
        ctx: &Context,
        name: &str,
        config: &ServiceConfig,
    ) -> Result<(), LifecycleError> {
        let strategy = self.strategy_for(name, config)?;
        info!("Tearing down service '{name}' via {}", strategy.strategy_name());

        if let Err(err) = strategy.stop_service(ctx, name) {
            warn!("Failed to stop '{name}' during teardown: {err}");
        }

        if !strategy.supports_startup() {
            return Ok(());
        }
        match strategy.set_startup(ctx, name, false) {
            Ok(()) => {}
            Err(LifecycleError::Unsupported { .. }) => {
                debug!("Startup registration of '{name}' cannot be removed; skipping");
            }
            Err(err) => warn!("Failed to disable '{name}' during teardown: {err}"),
        }
        Ok(())
    }

    fn observe(
        &self,
        ctx: &Context,
        name: &str,
        strategy: &dyn ServiceLifecycleStrategy,
    ) -> Result<ServiceState, LifecycleError> {
        if ctx.is_done() {
            return Err(LifecycleError::Cancelled {
                service: name.to_string(),
            });
        }

        let status = {
            let probe = scoped(self.poll.probe_timeout);
            strategy.status_check(&probe, name)?
        };
        let health = {
            let probe = scoped(self.poll.probe_timeout);
            strategy
                .health_check(&probe, name)
                .unwrap_or_else(|err| {
                    warn!("Health probe for '{name}' failed: {err}");
                    ServiceHealthInfo {
                        healthy: false,
                        strategy: status.strategy,
                        details: err.to_string(),
                    }
                })
        };

        Ok(ServiceState {
            name: name.to_string(),
            running: status.running,
            enabled: status.enabled,
            healthy: health.healthy,
            process_id: status.process_id,
            strategy: status.strategy,
            status_details: status.details,
            health_details: health.details,
        })
    }
}
