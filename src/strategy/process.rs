//! Process probing without any service manager.
//!
//! There is no notion of boot-time enablement here: [`ProcessOnlyStrategy::set_startup`]
//! is a documented no-op and [`ProcessOnlyStrategy::supports_startup`] returns `false`.
use tracing::{debug, info};

use super::{ServiceHealthInfo, ServiceLifecycleStrategy, ServiceStatusInfo, Toolkit};
use crate::{
    config::ManagementStrategy,
    constants::{PGREP_BIN, PKILL_BIN},
    context::Context,
    error::LifecycleError,
    health::HealthCheck,
};

/// Finds and signals processes by exact name.
pub struct ProcessOnlyStrategy {
    toolkit: Toolkit,
    health_check: Option<HealthCheck>,
    start_command: Option<Vec<String>>,
}

impl ProcessOnlyStrategy {
    /// Creates the strategy. `start_command` is the only way it can launch anything.
    pub fn new(
        toolkit: Toolkit,
        health_check: Option<HealthCheck>,
        start_command: Option<Vec<String>>,
    ) -> Self {
        Self {
            toolkit,
            health_check,
            start_command: start_command.filter(|argv| !argv.is_empty()),
        }
    }

    /// Pids of processes named exactly `name`.
    fn pids(&self, ctx: &Context, name: &str) -> Result<Vec<String>, LifecycleError> {
        let output = self.toolkit.query(ctx, name, PGREP_BIN, &["-x", name])?;
        match output.exit_code {
            0 => Ok(output
                .stdout
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect()),
            1 => Ok(Vec::new()),
            code => Err(LifecycleError::CommandFailed {
                service: name.to_string(),
                action: "query".to_string(),
                exit_code: code,
                stderr: output.stderr.trim().to_string(),
            }),
        }
    }
}

impl ServiceLifecycleStrategy for ProcessOnlyStrategy {
    fn start_service(&self, ctx: &Context, name: &str) -> Result<(), LifecycleError> {
        if self.is_running(ctx, name)? {
            debug!("Process '{name}' already running; nothing to start");
            return Ok(());
        }

        let Some(argv) = &self.start_command else {
            return Err(LifecycleError::Unsupported {
                strategy: ManagementStrategy::ProcessOnly.to_string(),
                operation: "start without a start command".to_string(),
            });
        };

        info!("Starting process '{name}' with `{}`", argv.join(" "));
        self.toolkit.control_argv(ctx, name, "start", argv)?;
        Ok(())
    }

    fn stop_service(&self, ctx: &Context, name: &str) -> Result<(), LifecycleError> {
        if !self.is_running(ctx, name)? {
            debug!("Process '{name}' already stopped; nothing to stop");
            return Ok(());
        }

        info!("Stopping process '{name}'");
        let output = self.toolkit.query(ctx, name, PKILL_BIN, &["-x", name])?;
        // 1 means the process exited between the probe and the signal.
        if output.exit_code > 1 {
            return Err(LifecycleError::CommandFailed {
                service: name.to_string(),
                action: "stop".to_string(),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(())
    }

    fn restart_service(&self, ctx: &Context, name: &str) -> Result<(), LifecycleError> {
        self.stop_service(ctx, name)?;
        self.start_service(ctx, name)
    }

    fn is_running(&self, ctx: &Context, name: &str) -> Result<bool, LifecycleError> {
        Ok(!self.pids(ctx, name)?.is_empty())
    }

    fn status_check(
        &self,
        ctx: &Context,
        name: &str,
    ) -> Result<ServiceStatusInfo, LifecycleError> {
        let pids = self.pids(ctx, name)?;
        Ok(ServiceStatusInfo {
            running: !pids.is_empty(),
            enabled: false,
            process_id: pids.first().cloned().unwrap_or_default(),
            strategy: ManagementStrategy::ProcessOnly,
            details: format!("{} matching process(es)", pids.len()),
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
            ManagementStrategy::ProcessOnly,
            self.health_check.as_ref(),
            || self.is_running(ctx, name),
        )
    }

    fn strategy_name(&self) -> ManagementStrategy {
        ManagementStrategy::ProcessOnly
    }

    fn supports_startup(&self) -> bool {
        false
    }

    /// No-op: plain processes have no boot-time registration.
    fn set_startup(
        &self,
        _ctx: &Context,
        name: &str,
        enabled: bool,
    ) -> Result<(), LifecycleError> {
        debug!("Ignoring startup={enabled} for '{name}'; process_only has no boot registration");
        Ok(())
    }

    /// Last-resort mechanism: any working `pgrep` gives a usable answer.
    fn recognizes(&self, ctx: &Context, name: &str) -> Result<bool, LifecycleError> {
        Ok(self.pids(ctx, name).is_ok())
    }
}
