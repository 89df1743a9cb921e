//! Dependency discovery, cycle detection and ordered satisfaction.
use std::collections::{HashMap, HashSet};

use tracing::{debug, info, warn};

use crate::{
    config::{Config, DependencyType, ServiceConfig},
    constants::DEFAULT_DEPENDENCY_HEALTH_TIMEOUT,
    context::Context,
    error::LifecycleError,
    factory::ServiceStrategyFactory,
    health::HealthCheck,
    packages::base_name,
    wait::{PollSettings, wait_for_healthy},
};

/// An edge from a dependent service to a service it needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDependency {
    /// Service that must be up first.
    pub target_service: String,
    /// Kind of edge; decides whether a failure blocks the dependent.
    pub dependency_type: DependencyType,
    /// Health gate to pass before the dependent starts.
    pub health_check: Option<HealthCheck>,
}

impl ServiceDependency {
    /// A `required` edge without a health gate.
    pub fn required(target: &str) -> Self {
        Self {
            target_service: target.to_string(),
            dependency_type: DependencyType::Required,
            health_check: None,
        }
    }

    /// Same edge with a different type.
    pub fn of_type(mut self, dependency_type: DependencyType) -> Self {
        self.dependency_type = dependency_type;
        self
    }

    /// Same edge gated on `check`.
    pub fn gated(mut self, check: HealthCheck) -> Self {
        self.health_check = Some(check);
        self
    }
}

/// Infers the services another service needs.
pub trait DependencyDetector: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Dependencies of `service`; empty when the detector has nothing to say.
    fn detect(&self, ctx: &Context, service: &str)
    -> Result<Vec<ServiceDependency>, LifecycleError>;
}

/// Edges declared with `depends_on` in the manifest.
#[derive(Debug, Clone, Default)]
pub struct ConfiguredDependencyDetector {
    edges: HashMap<String, Vec<ServiceDependency>>,
}

impl ConfiguredDependencyDetector {
    /// An empty detector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Collects every `depends_on` entry of `config`.
    pub fn from_config(config: &Config) -> Result<Self, LifecycleError> {
        let mut detector = Self::new();
        for (name, service) in &config.services {
            for declared in service.depends_on.iter().flatten() {
                let health_check = declared
                    .health_check
                    .as_ref()
                    .map(|check| check.resolve())
                    .transpose()
                    .map_err(|err| {
                        LifecycleError::config(format!(
                            "service '{name}', dependency '{}': {err}",
                            declared.service
                        ))
                    })?;
                detector.add(
                    name,
                    ServiceDependency {
                        target_service: declared.service.clone(),
                        dependency_type: declared.kind,
                        health_check,
                    },
                );
            }
        }
        Ok(detector)
    }

    /// Declares that `service` depends on `dependency`.
    pub fn add(&mut self, service: &str, dependency: ServiceDependency) {
        self.edges
            .entry(service.to_string())
            .or_default()
            .push(dependency);
    }

    /// Builder form of [`ConfiguredDependencyDetector::add`].
    pub fn with(mut self, service: &str, dependency: ServiceDependency) -> Self {
        self.add(service, dependency);
        self
    }
}

impl DependencyDetector for ConfiguredDependencyDetector {
    fn name(&self) -> &str {
        "configured"
    }

    fn detect(
        &self,
        _ctx: &Context,
        service: &str,
    ) -> Result<Vec<ServiceDependency>, LifecycleError> {
        Ok(self.edges.get(service).cloned().unwrap_or_default())
    }
}

/// Tools that only work while a container runtime is up.
const CONTAINER_BACKED: &[&str] = &["minikube", "kind", "localstack", "k3d", "tilt"];

/// Services backed by containers depend on the container runtime.
#[derive(Debug, Clone)]
pub struct ContainerRuntimeDetector {
    runtime: String,
    runtime_check: HealthCheck,
    dependents: HashSet<String>,
}

impl ContainerRuntimeDetector {
    /// Detector for an arbitrary runtime and the services it hosts.
    pub fn new<I, S>(runtime: &str, runtime_check: HealthCheck, dependents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            runtime: runtime.to_string(),
            runtime_check,
            dependents: dependents.into_iter().map(Into::into).collect(),
        }
    }

    /// Docker, gated on `docker info`, for the well-known container-backed tools.
    pub fn builtin() -> Self {
        Self::new(
            "docker",
            HealthCheck::command(&["docker", "info"]),
            CONTAINER_BACKED.iter().copied(),
        )
    }
}

impl DependencyDetector for ContainerRuntimeDetector {
    fn name(&self) -> &str {
        "container-runtime"
    }

    fn detect(
        &self,
        _ctx: &Context,
        service: &str,
    ) -> Result<Vec<ServiceDependency>, LifecycleError> {
        if service == self.runtime || !self.dependents.contains(base_name(service)) {
            return Ok(Vec::new());
        }
        Ok(vec![ServiceDependency {
            target_service: self.runtime.clone(),
            dependency_type: DependencyType::Container,
            health_check: Some(self.runtime_check.clone()),
        }])
    }
}

/// Which dependency types block the dependent service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyPolicy {
    blocking: Vec<DependencyType>,
}

impl DependencyPolicy {
    /// Policy blocking on exactly `types`.
    pub fn blocking(types: Vec<DependencyType>) -> Self {
        Self { blocking: types }
    }

    /// Whether a failure of a `kind` dependency prevents the dependent from starting.
    pub fn is_blocking(&self, kind: DependencyType) -> bool {
        self.blocking.contains(&kind)
    }

    /// Optional dependencies are left alone unless explicitly made blocking.
    pub fn is_skipped(&self, kind: DependencyType) -> bool {
        kind == DependencyType::Optional && !self.is_blocking(kind)
    }
}

impl Default for DependencyPolicy {
    fn default() -> Self {
        Self::blocking(vec![
            DependencyType::Required,
            DependencyType::Proxy,
            DependencyType::Container,
        ])
    }
}

/// Discovers, validates and satisfies dependencies before a service starts.
pub struct DependencyManager {
    factory: ServiceStrategyFactory,
    detectors: Vec<Box<dyn DependencyDetector>>,
    policy: DependencyPolicy,
    poll: PollSettings,
    targets: HashMap<String, ServiceConfig>,
}

impl DependencyManager {
    /// A manager without detectors.
    pub fn new(factory: ServiceStrategyFactory, policy: DependencyPolicy, poll: PollSettings) -> Self {
        Self {
            factory,
            detectors: Vec::new(),
            policy,
            poll,
            targets: HashMap::new(),
        }
    }

    /// Registers another detector; results of all detectors are concatenated.
    pub fn register_detector(&mut self, detector: Box<dyn DependencyDetector>) {
        self.detectors.push(detector);
    }

    /// Builder form of [`DependencyManager::register_detector`].
    pub fn with_detector(mut self, detector: Box<dyn DependencyDetector>) -> Self {
        self.register_detector(detector);
        self
    }

    /// How dependency targets are controlled. Targets without an entry use `auto`.
    pub fn with_targets(mut self, targets: HashMap<String, ServiceConfig>) -> Self {
        self.targets = targets;
        self
    }

    /// The active policy.
    pub fn policy(&self) -> &DependencyPolicy {
        &self.policy
    }

    /// Runs every detector for `service`. Detector failures are logged and
    /// skipped; only cancellation of `ctx` is an error.
    pub fn detect_dependencies(
        &self,
        ctx: &Context,
        service: &str,
    ) -> Result<Vec<ServiceDependency>, LifecycleError> {
        let mut found = Vec::new();
        for detector in &self.detectors {
            if ctx.is_done() {
                return Err(LifecycleError::Cancelled {
                    service: service.to_string(),
                });
            }
            match detector.detect(ctx, service) {
                Ok(dependencies) => found.extend(dependencies),
                Err(err) => warn!(
                    "Dependency detector '{}' failed for '{service}': {err}",
                    detector.name()
                ),
            }
        }
        Ok(found)
    }

    /// Fails with [`LifecycleError::DependencyCycle`] when the graph reachable
    /// from `service` contains a cycle. Issues no mutating calls.
    pub fn validate_dependency_chain(
        &self,
        ctx: &Context,
        service: &str,
    ) -> Result<(), LifecycleError> {
        let mut visiting = Vec::new();
        let mut visited = HashSet::new();
        self.visit(ctx, service, &mut visiting, &mut visited)
    }

    fn visit(
        &self,
        ctx: &Context,
        service: &str,
        visiting: &mut Vec<String>,
        visited: &mut HashSet<String>,
    ) -> Result<(), LifecycleError> {
        if let Some(start) = visiting.iter().position(|name| name == service) {
            let mut cycle = visiting[start..].to_vec();
            cycle.push(service.to_string());
            return Err(LifecycleError::DependencyCycle {
                service: service.to_string(),
                cycle: cycle.join(" -> "),
            });
        }
        if visited.contains(service) {
            return Ok(());
        }

        visiting.push(service.to_string());
        for dependency in self.detect_dependencies(ctx, service)? {
            self.visit(ctx, &dependency.target_service, visiting, visited)?;
        }
        visiting.pop();
        visited.insert(service.to_string());
        Ok(())
    }

    /// Brings every dependency of `service` up, transitively and leaves first.
    ///
    /// The chain is validated before anything is started. Failures of
    /// blocking dependency types abort with [`LifecycleError::DependencyFailed`];
    /// others are logged.
    pub fn ensure_dependencies(&self, ctx: &Context, service: &str) -> Result<(), LifecycleError> {
        self.validate_dependency_chain(ctx, service)?;
        let mut satisfied = HashSet::new();
        self.satisfy(ctx, service, &mut satisfied)
    }

    fn satisfy(
        &self,
        ctx: &Context,
        service: &str,
        satisfied: &mut HashSet<String>,
    ) -> Result<(), LifecycleError> {
        for dependency in self.detect_dependencies(ctx, service)? {
            let target = dependency.target_service.as_str();
            if self.policy.is_skipped(dependency.dependency_type) {
                debug!("Skipping optional dependency '{target}' of '{service}'");
                continue;
            }
            if satisfied.contains(target) {
                continue;
            }

            let outcome = self
                .satisfy(ctx, target, satisfied)
                .and_then(|()| self.bring_up(ctx, &dependency));
            satisfied.insert(target.to_string());

            match outcome {
                Ok(()) => {}
                Err(err @ LifecycleError::Cancelled { .. }) => return Err(err),
                Err(err) if self.policy.is_blocking(dependency.dependency_type) => {
                    return Err(LifecycleError::DependencyFailed {
                        service: service.to_string(),
                        dependency: target.to_string(),
                        source: Box::new(err),
                    });
                }
                Err(err) => warn!(
                    "Continuing without {} dependency '{target}' of '{service}': {err}",
                    dependency.dependency_type
                ),
            }
        }
        Ok(())
    }

    fn bring_up(&self, ctx: &Context, dependency: &ServiceDependency) -> Result<(), LifecycleError> {
        let target = dependency.target_service.as_str();
        let config = self.targets.get(target).cloned().unwrap_or_default();
        let health_check = match &dependency.health_check {
            Some(check) => Some(check.clone()),
            None => config.health_check()?,
        };

        let strategy = self.factory.create_lifecycle_strategy(
            config.strategy,
            config.commands.as_ref(),
            target,
            health_check.clone(),
        )?;

        if strategy.is_running(ctx, target)? {
            debug!("Dependency '{target}' already running");
        } else {
            info!("Starting dependency '{target}' via {}", strategy.strategy_name());
            strategy.start_service(ctx, target)?;
        }

        if dependency.health_check.is_none() && !config.wait_for_healthy {
            return Ok(());
        }

        let timeout = if config.wait_for_healthy {
            config.wait_timeout()?
        } else {
            DEFAULT_DEPENDENCY_HEALTH_TIMEOUT
        };
        let settings = match health_check.as_ref().and_then(|check| check.interval) {
            Some(interval) => self.poll.with_interval(interval),
            None => self.poll,
        };
        wait_for_healthy(ctx, target, timeout, &settings, |probe_ctx| {
            strategy.health_check(probe_ctx, target)
        })?;
        Ok(())
    }
}
