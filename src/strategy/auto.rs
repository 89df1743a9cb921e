//! `auto`: delegate to the first mechanism that recognizes the service.
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use tracing::{debug, info};

use super::{ServiceHealthInfo, ServiceLifecycleStrategy, ServiceStatusInfo};
use crate::{
    config::ManagementStrategy, constants::DISCOVERY_PROBE_TIMEOUT, context::Context,
    error::LifecycleError,
};

/// Meta-strategy over an ordered list of candidates.
///
/// Discovery runs lazily on the first call for a service name, probes each
/// candidate in order with a short timeout, and caches the winner so every
/// later call for that name is answered by the same mechanism.
pub struct AutoStrategy {
    candidates: Vec<Box<dyn ServiceLifecycleStrategy>>,
    resolved: Mutex<HashMap<String, usize>>,
}

impl AutoStrategy {
    /// Creates the meta-strategy; `candidates` are tried in the given order.
    pub fn new(candidates: Vec<Box<dyn ServiceLifecycleStrategy>>) -> Self {
        Self {
            candidates,
            resolved: Mutex::new(HashMap::new()),
        }
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<String, usize>> {
        self.resolved.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// The concrete mechanism chosen for `name`, running discovery if needed.
    pub fn resolve(
        &self,
        ctx: &Context,
        name: &str,
    ) -> Result<&dyn ServiceLifecycleStrategy, LifecycleError> {
        if let Some(&index) = self.cache().get(name) {
            return Ok(self.candidates[index].as_ref());
        }

        for (index, candidate) in self.candidates.iter().enumerate() {
            let probe_ctx = ctx.with_timeout(DISCOVERY_PROBE_TIMEOUT);
            let answer = candidate.recognizes(&probe_ctx, name);
            probe_ctx.cancel();

            match answer {
                Ok(true) => {
                    info!(
                        "Resolved strategy for '{name}': {}",
                        candidate.strategy_name()
                    );
                    self.cache().insert(name.to_string(), index);
                    return Ok(candidate.as_ref());
                }
                Ok(false) => {
                    debug!("{} does not recognize '{name}'", candidate.strategy_name());
                }
                Err(err) => {
                    debug!(
                        "{} discovery probe for '{name}' failed: {err}",
                        candidate.strategy_name()
                    );
                }
            }

            if let Some(reason) = ctx.err() {
                debug!("Discovery for '{name}' interrupted: {reason}");
                return Err(LifecycleError::Cancelled {
                    service: name.to_string(),
                });
            }
        }

        Err(LifecycleError::NoMechanism {
            service: name.to_string(),
        })
    }

    /// The mechanism already chosen for `name`, without probing.
    pub fn resolved_strategy(&self, name: &str) -> Option<ManagementStrategy> {
        self.cache()
            .get(name)
            .map(|&index| self.candidates[index].strategy_name())
    }
}

impl ServiceLifecycleStrategy for AutoStrategy {
    fn start_service(&self, ctx: &Context, name: &str) -> Result<(), LifecycleError> {
        self.resolve(ctx, name)?.start_service(ctx, name)
    }

    fn stop_service(&self, ctx: &Context, name: &str) -> Result<(), LifecycleError> {
        self.resolve(ctx, name)?.stop_service(ctx, name)
    }

    fn restart_service(&self, ctx: &Context, name: &str) -> Result<(), LifecycleError> {
        self.resolve(ctx, name)?.restart_service(ctx, name)
    }

    fn is_running(&self, ctx: &Context, name: &str) -> Result<bool, LifecycleError> {
        self.resolve(ctx, name)?.is_running(ctx, name)
    }

    fn status_check(
        &self,
        ctx: &Context,
        name: &str,
    ) -> Result<ServiceStatusInfo, LifecycleError> {
        self.resolve(ctx, name)?.status_check(ctx, name)
    }

    fn health_check(
        &self,
        ctx: &Context,
        name: &str,
    ) -> Result<ServiceHealthInfo, LifecycleError> {
        self.resolve(ctx, name)?.health_check(ctx, name)
    }

    fn strategy_name(&self) -> ManagementStrategy {
        ManagementStrategy::Auto
    }

    fn set_startup(
        &self,
        ctx: &Context,
        name: &str,
        enabled: bool,
    ) -> Result<(), LifecycleError> {
        self.resolve(ctx, name)?.set_startup(ctx, name, enabled)
    }
}
