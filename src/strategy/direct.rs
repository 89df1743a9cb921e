//! Direct execution of caller-supplied (or built-in default) command vectors.
use regex::Regex;
use tracing::{debug, info};

use super::{ServiceHealthInfo, ServiceLifecycleStrategy, ServiceStatusInfo, Toolkit};
use crate::{
    config::{CustomCommands, ManagementStrategy},
    constants::PGREP_BIN,
    context::Context,
    error::LifecycleError,
    health::HealthCheck,
};

/// Runs explicit start/stop/status commands.
///
/// Construction never fails for missing commands; the first operation that
/// needs them does, so an empty command vector is never executed.
pub struct DirectCommandStrategy {
    toolkit: Toolkit,
    health_check: Option<HealthCheck>,
    commands: Option<CustomCommands>,
    status_pattern: Option<Regex>,
}

impl DirectCommandStrategy {
    /// Creates the strategy. An invalid `status_pattern` is a configuration error.
    pub fn new(
        toolkit: Toolkit,
        health_check: Option<HealthCheck>,
        commands: Option<CustomCommands>,
    ) -> Result<Self, LifecycleError> {
        let status_pattern = commands
            .as_ref()
            .and_then(|c| c.status_pattern.as_deref())
            .map(|pattern| {
                Regex::new(pattern).map_err(|err| {
                    LifecycleError::config(format!("Invalid status_pattern '{pattern}': {err}"))
                })
            })
            .transpose()?;

        Ok(Self {
            toolkit,
            health_check,
            commands,
            status_pattern,
        })
    }

    fn commands(&self, name: &str) -> Result<&CustomCommands, LifecycleError> {
        self.commands
            .as_ref()
            .filter(|commands| commands.has_lifecycle())
            .ok_or_else(|| LifecycleError::MissingCommands {
                service: name.to_string(),
            })
    }

    fn status_output_running(&self, exit_code: i32, stdout: &str) -> bool {
        exit_code == 0
            && self
                .status_pattern
                .as_ref()
                .is_none_or(|pattern| pattern.is_match(stdout))
    }

    /// Falls back to an exact process-name lookup when no status command is configured.
    fn probe_process(&self, ctx: &Context, name: &str) -> Result<(bool, String), LifecycleError> {
        let output = self.toolkit.query(ctx, name, PGREP_BIN, &["-x", name])?;
        let pid = output.stdout.lines().next().unwrap_or("").trim().to_string();
        Ok((output.success(), pid))
    }
}

impl ServiceLifecycleStrategy for DirectCommandStrategy {
    fn start_service(&self, ctx: &Context, name: &str) -> Result<(), LifecycleError> {
        let commands = self.commands(name)?;
        if self.is_running(ctx, name)? {
            debug!("Service '{name}' already running; nothing to start");
            return Ok(());
        }

        let start = commands.start.as_deref().unwrap_or_default();
        info!("Starting service '{name}' with `{}`", start.join(" "));
        self.toolkit.control_argv(ctx, name, "start", start)?;
        Ok(())
    }

    fn stop_service(&self, ctx: &Context, name: &str) -> Result<(), LifecycleError> {
        let commands = self.commands(name)?;
        if !self.is_running(ctx, name)? {
            debug!("Service '{name}' already stopped; nothing to stop");
            return Ok(());
        }

        let stop = commands.stop.as_deref().unwrap_or_default();
        info!("Stopping service '{name}' with `{}`", stop.join(" "));
        self.toolkit.control_argv(ctx, name, "stop", stop)?;
        Ok(())
    }

    fn restart_service(&self, ctx: &Context, name: &str) -> Result<(), LifecycleError> {
        let commands = self.commands(name)?;
        match commands.restart.as_deref().filter(|argv| !argv.is_empty()) {
            Some(restart) => {
                info!("Restarting service '{name}' with `{}`", restart.join(" "));
                self.toolkit.control_argv(ctx, name, "restart", restart)?;
                Ok(())
            }
            None => {
                self.stop_service(ctx, name)?;
                self.start_service(ctx, name)
            }
        }
    }

    fn is_running(&self, ctx: &Context, name: &str) -> Result<bool, LifecycleError> {
        Ok(self.status_check(ctx, name)?.running)
    }

    fn status_check(
        &self,
        ctx: &Context,
        name: &str,
    ) -> Result<ServiceStatusInfo, LifecycleError> {
        let status_argv = self
            .commands
            .as_ref()
            .and_then(|c| c.status.as_deref())
            .filter(|argv| !argv.is_empty());

        let (running, process_id, details) = match status_argv {
            Some(argv) => {
                let output = self.toolkit.query_argv(ctx, name, argv)?;
                let running = self.status_output_running(output.exit_code, &output.stdout);
                (
                    running,
                    String::new(),
                    format!("`{}` exited with {}", argv.join(" "), output.exit_code),
                )
            }
            None => {
                let (running, pid) = self.probe_process(ctx, name)?;
                (running, pid, "process lookup by name".to_string())
            }
        };

        Ok(ServiceStatusInfo {
            running,
            // Boot-time state cannot be observed through plain commands.
            enabled: false,
            process_id,
            strategy: ManagementStrategy::DirectCommand,
            details,
        })
    }

    fn health_check(
        &self,
        ctx: &Context,
        name: &str,
    ) -> Result<ServiceHealthInfo, LifecycleError> {
        self.toolkit.health(
            ctx,
            name,
            ManagementStrategy::DirectCommand,
            self.health_check.as_ref(),
            || self.is_running(ctx, name),
        )
    }

    fn strategy_name(&self) -> ManagementStrategy {
        ManagementStrategy::DirectCommand
    }

    fn set_startup(
        &self,
        ctx: &Context,
        name: &str,
        enabled: bool,
    ) -> Result<(), LifecycleError> {
        let operation = if enabled { "enable" } else { "disable" };
        let argv = self
            .commands
            .as_ref()
            .filter(|commands| commands.has_startup())
            .and_then(|commands| {
                if enabled {
                    commands.enable.as_deref()
                } else {
                    commands.disable.as_deref()
                }
            })
            .ok_or_else(|| LifecycleError::Unsupported {
                strategy: ManagementStrategy::DirectCommand.to_string(),
                operation: operation.to_string(),
            })?;

        info!("Running {operation} command for '{name}': `{}`", argv.join(" "));
        self.toolkit.control_argv(ctx, name, operation, argv)?;
        Ok(())
    }
}
