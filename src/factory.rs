//! Construction of lifecycle strategies from a strategy tag.
use std::{collections::HashMap, sync::Arc};

use crate::{
    config::{CustomCommands, ManagementStrategy},
    constants::AUTO_DISCOVERY_ORDER,
    error::LifecycleError,
    executor::Executor,
    health::{DefaultHealthChecks, HealthCheck},
    packages::PackageServiceMap,
    strategy::{
        AutoStrategy, BrewServicesStrategy, DirectCommandStrategy, InitSystem,
        InitSystemStrategy, ProcessOnlyStrategy, ServiceLifecycleStrategy, Toolkit,
    },
};

/// Built-in command vectors for services that have no init-system presence.
fn builtin_commands() -> Vec<(&'static str, CustomCommands)> {
    vec![
        (
            "colima",
            CustomCommands::from_static(&["colima", "start"], &["colima", "stop"], Some(&["colima", "status"])),
        ),
        (
            "podman",
            CustomCommands::from_static(
                &["podman", "machine", "start"],
                &["podman", "machine", "stop"],
                Some(&["podman", "info"]),
            ),
        ),
        (
            "minikube",
            CustomCommands::from_static(
                &["minikube", "start"],
                &["minikube", "stop"],
                Some(&["minikube", "status"]),
            ),
        ),
        (
            "docker-desktop",
            CustomCommands::from_static(
                &["open", "-a", "Docker"],
                &["osascript", "-e", "quit app \"Docker\""],
                Some(&["docker", "info"]),
            ),
        ),
    ]
}

/// Read-only table of default command vectors keyed by service name.
#[derive(Debug, Clone, Default)]
pub struct DefaultCommandTable {
    commands: HashMap<String, CustomCommands>,
}

impl DefaultCommandTable {
    /// The table shipped with svcctl.
    pub fn builtin() -> Self {
        Self {
            commands: builtin_commands()
                .into_iter()
                .map(|(name, commands)| (name.to_string(), commands))
                .collect(),
        }
    }

    /// Adds or replaces an entry.
    pub fn with(mut self, name: &str, commands: CustomCommands) -> Self {
        self.commands.insert(name.to_string(), commands);
        self
    }

    /// Commands for `name`, if any.
    pub fn get(&self, name: &str) -> Option<&CustomCommands> {
        self.commands.get(name)
    }
}

/// Builds [`ServiceLifecycleStrategy`] instances. Construction performs no I/O.
#[derive(Clone)]
pub struct ServiceStrategyFactory {
    toolkit: Toolkit,
    default_commands: Arc<DefaultCommandTable>,
    init_system: InitSystem,
}

impl ServiceStrategyFactory {
    /// Creates a factory with the built-in tables and the host's init system.
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self::with_tables(
            executor,
            Arc::new(PackageServiceMap::builtin()),
            Arc::new(DefaultHealthChecks::builtin()),
            Arc::new(DefaultCommandTable::builtin()),
        )
    }

    /// Creates a factory with explicit tables.
    pub fn with_tables(
        executor: Arc<dyn Executor>,
        packages: Arc<PackageServiceMap>,
        health_defaults: Arc<DefaultHealthChecks>,
        default_commands: Arc<DefaultCommandTable>,
    ) -> Self {
        Self {
            toolkit: Toolkit::new(executor, health_defaults, packages),
            default_commands,
            init_system: InitSystem::native(),
        }
    }

    /// Overrides the init system (launchd vs systemd).
    pub fn with_init_system(mut self, init_system: InitSystem) -> Self {
        self.init_system = init_system;
        self
    }

    /// Collaborators handed to every strategy.
    pub fn toolkit(&self) -> &Toolkit {
        &self.toolkit
    }

    /// Built-in commands for `name`; `None` when unknown.
    pub fn default_commands_for_service(&self, name: &str) -> Option<CustomCommands> {
        self.default_commands.get(name).cloned()
    }

    /// Builds the strategy for `strategy`.
    ///
    /// For `direct_command` without `custom_commands`, the default table is
    /// consulted; when that has nothing either, the returned strategy fails
    /// with [`LifecycleError::MissingCommands`] on first use.
    pub fn create_lifecycle_strategy(
        &self,
        strategy: ManagementStrategy,
        custom_commands: Option<&CustomCommands>,
        service_name: &str,
        health_check: Option<HealthCheck>,
    ) -> Result<Box<dyn ServiceLifecycleStrategy>, LifecycleError> {
        let toolkit = self.toolkit.clone();
        let built: Box<dyn ServiceLifecycleStrategy> = match strategy {
            ManagementStrategy::BrewServices => {
                Box::new(BrewServicesStrategy::new(toolkit, health_check))
            }
            ManagementStrategy::Launchd => Box::new(InitSystemStrategy::new(
                toolkit,
                health_check,
                self.init_system.clone(),
            )),
            ManagementStrategy::DirectCommand => {
                let commands = custom_commands
                    .filter(|commands| commands.has_lifecycle())
                    .cloned()
                    .or_else(|| self.default_commands_for_service(service_name));
                Box::new(DirectCommandStrategy::new(toolkit, health_check, commands)?)
            }
            ManagementStrategy::ProcessOnly => Box::new(ProcessOnlyStrategy::new(
                toolkit,
                health_check,
                custom_commands.and_then(|commands| commands.start.clone()),
            )),
            ManagementStrategy::Auto => {
                let mut candidates = Vec::with_capacity(AUTO_DISCOVERY_ORDER.len());
                for candidate in AUTO_DISCOVERY_ORDER {
                    candidates.push(self.create_lifecycle_strategy(
                        candidate,
                        custom_commands,
                        service_name,
                        health_check.clone(),
                    )?);
                }
                Box::new(AutoStrategy::new(candidates))
            }
        };
        Ok(built)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{context::Context, executor::CommandOutput, test_utils::ScriptedExecutor};

    fn factory(executor: Arc<ScriptedExecutor>) -> ServiceStrategyFactory {
        ServiceStrategyFactory::new(executor).with_init_system(InitSystem::Systemd)
    }

    #[test]
    fn builds_each_tag() {
        let executor = Arc::new(ScriptedExecutor::new());
        let factory = factory(executor.clone());
        for tag in [
            ManagementStrategy::Auto,
            ManagementStrategy::BrewServices,
            ManagementStrategy::DirectCommand,
            ManagementStrategy::Launchd,
            ManagementStrategy::ProcessOnly,
        ] {
            let strategy = factory
                .create_lifecycle_strategy(tag, None, "redis", None)
                .unwrap();
            assert_eq!(strategy.strategy_name(), tag);
        }
        assert!(executor.calls().is_empty(), "construction must not run commands");
    }

    #[test]
    fn auto_discovery_order_is_init_then_brew_then_process() {
        assert_eq!(
            AUTO_DISCOVERY_ORDER,
            [
                ManagementStrategy::Launchd,
                ManagementStrategy::BrewServices,
                ManagementStrategy::ProcessOnly,
            ]
        );
    }

    #[test]
    fn default_commands_lookup() {
        let factory = factory(Arc::new(ScriptedExecutor::new()));
        let colima = factory.default_commands_for_service("colima").unwrap();
        assert_eq!(colima.start, Some(vec!["colima".to_string(), "start".to_string()]));
        assert!(factory.default_commands_for_service("nginx").is_none());
    }

    #[test]
    fn direct_command_falls_back_to_default_table() {
        let executor = Arc::new(ScriptedExecutor::new());
        executor.respond("colima status", CommandOutput::new(1, "", "colima is not running"));
        executor.respond("colima start", CommandOutput::new(0, "", ""));

        let strategy = factory(executor.clone())
            .create_lifecycle_strategy(ManagementStrategy::DirectCommand, None, "colima", None)
            .unwrap();
        strategy.start_service(&Context::background(), "colima").unwrap();
        assert_eq!(executor.count("colima start"), 1);
    }

    #[test]
    fn direct_command_without_any_commands_fails_on_use() {
        let executor = Arc::new(ScriptedExecutor::new());
        let strategy = factory(executor.clone())
            .create_lifecycle_strategy(ManagementStrategy::DirectCommand, None, "mystery", None)
            .unwrap();

        let err = strategy
            .start_service(&Context::background(), "mystery")
            .unwrap_err();
        assert!(matches!(err, LifecycleError::MissingCommands { ref service } if service == "mystery"));
        assert!(executor.calls().is_empty());
    }
}
