//! Homebrew `brew services` wrapper.
//!
//! Run-state and login registration are kept independent: starting an
//! unregistered service uses `brew services run`, and stopping a registered
//! one passes `--keep` so the registration survives.
use serde::Deserialize;
use tracing::{debug, info};

use super::{ServiceHealthInfo, ServiceLifecycleStrategy, ServiceStatusInfo, Toolkit};
use crate::{
    config::ManagementStrategy,
    constants::BREW_BIN,
    context::Context,
    error::LifecycleError,
    health::HealthCheck,
};

/// Subset of `brew services info --json` that svcctl relies on.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct BrewServiceInfo {
    /// Formula name.
    pub name: String,
    /// Whether launchd reports the service running.
    #[serde(default)]
    pub running: bool,
    /// Whether the service is registered to start at login.
    #[serde(default)]
    pub registered: Option<bool>,
    /// Main pid, when running.
    #[serde(default)]
    pub pid: Option<u64>,
    /// Brew's own status word (started, stopped, none, error, ...).
    #[serde(default)]
    pub status: Option<String>,
}

impl BrewServiceInfo {
    /// Registered at login; absent means not registered.
    pub fn is_registered(&self) -> bool {
        self.registered.unwrap_or(false)
    }
}

/// One row of `brew services list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrewListEntry {
    /// Formula name.
    pub name: String,
    /// Status column.
    pub status: String,
}

/// Parses the tabular output of `brew services list`.
pub fn parse_services_list(stdout: &str) -> Vec<BrewListEntry> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter(|line| !line.starts_with("Name "))
        .filter_map(|line| {
            let mut columns = line.split_whitespace();
            let name = columns.next()?;
            let status = columns.next().unwrap_or("unknown");
            Some(BrewListEntry {
                name: name.to_string(),
                status: status.to_string(),
            })
        })
        .collect()
}

/// Parses `brew services info <name> --json`.
pub fn parse_service_info(stdout: &str, name: &str) -> Result<Option<BrewServiceInfo>, String> {
    let entries: Vec<BrewServiceInfo> =
        serde_json::from_str(stdout.trim()).map_err(|err| err.to_string())?;
    Ok(entries.into_iter().find(|entry| entry.name == name))
}

fn looks_unknown(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    ["no available formula", "not installed", "no such", "not found", "unknown service"]
        .iter()
        .any(|needle| lower.contains(needle))
}

/// Controls services through `brew services`.
pub struct BrewServicesStrategy {
    toolkit: Toolkit,
    health_check: Option<HealthCheck>,
}

impl BrewServicesStrategy {
    /// Creates the wrapper with an optional health check override.
    pub fn new(toolkit: Toolkit, health_check: Option<HealthCheck>) -> Self {
        Self {
            toolkit,
            health_check,
        }
    }

    /// Current brew view of `name`; `None` when brew does not know the service.
    pub fn service_info(
        &self,
        ctx: &Context,
        name: &str,
    ) -> Result<Option<BrewServiceInfo>, LifecycleError> {
        let output = self
            .toolkit
            .query(ctx, name, BREW_BIN, &["services", "info", name, "--json"])?;

        if !output.success() {
            if looks_unknown(&output.stderr) {
                return Ok(None);
            }
            return Err(LifecycleError::CommandFailed {
                service: name.to_string(),
                action: "query".to_string(),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }

        parse_service_info(&output.stdout, name).map_err(|err| {
            LifecycleError::CommandFailed {
                service: name.to_string(),
                action: "query".to_string(),
                exit_code: output.exit_code,
                stderr: format!("unparsable brew output: {err}"),
            }
        })
    }

    fn brew(&self, ctx: &Context, name: &str, action: &str, args: &[&str]) -> Result<(), LifecycleError> {
        let mut full = vec!["services"];
        full.extend_from_slice(args);
        full.push(name);
        self.toolkit.control(ctx, name, action, BREW_BIN, &full)?;
        Ok(())
    }
}

impl ServiceLifecycleStrategy for BrewServicesStrategy {
    fn start_service(&self, ctx: &Context, name: &str) -> Result<(), LifecycleError> {
        let info = self.service_info(ctx, name)?.unwrap_or_default();
        if info.running {
            debug!("Service '{name}' already running under brew; nothing to start");
            return Ok(());
        }

        info!("Starting service '{name}' via brew services");
        if info.is_registered() {
            self.brew(ctx, name, "start", &["start"])
        } else {
            self.brew(ctx, name, "start", &["run"])
        }
    }

    fn stop_service(&self, ctx: &Context, name: &str) -> Result<(), LifecycleError> {
        let info = self.service_info(ctx, name)?.unwrap_or_default();
        if !info.running {
            debug!("Service '{name}' already stopped under brew; nothing to stop");
            return Ok(());
        }

        info!("Stopping service '{name}' via brew services");
        if info.is_registered() {
            self.brew(ctx, name, "stop", &["stop", "--keep"])
        } else {
            self.brew(ctx, name, "stop", &["stop"])
        }
    }

    fn restart_service(&self, ctx: &Context, name: &str) -> Result<(), LifecycleError> {
        let info = self.service_info(ctx, name)?.unwrap_or_default();
        info!("Restarting service '{name}' via brew services");
        if info.is_registered() {
            // `restart` re-registers, which is already the desired startup state.
            return self.brew(ctx, name, "restart", &["restart"]);
        }
        if info.running {
            self.brew(ctx, name, "restart", &["stop"])?;
        }
        self.brew(ctx, name, "restart", &["run"])
    }

    fn is_running(&self, ctx: &Context, name: &str) -> Result<bool, LifecycleError> {
        Ok(self.service_info(ctx, name)?.is_some_and(|info| info.running))
    }

    fn status_check(
        &self,
        ctx: &Context,
        name: &str,
    ) -> Result<ServiceStatusInfo, LifecycleError> {
        let Some(info) = self.service_info(ctx, name)? else {
            return Ok(ServiceStatusInfo::not_found(
                ManagementStrategy::BrewServices,
                format!("brew does not manage a service named '{name}'"),
            ));
        };

        Ok(ServiceStatusInfo {
            running: info.running,
            enabled: info.is_registered(),
            process_id: info.pid.map(|pid| pid.to_string()).unwrap_or_default(),
            strategy: ManagementStrategy::BrewServices,
            details: format!(
                "brew status: {}",
                info.status.as_deref().unwrap_or("unknown")
            ),
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
            ManagementStrategy::BrewServices,
            self.health_check.as_ref(),
            || self.is_running(ctx, name),
        )
    }

    fn strategy_name(&self) -> ManagementStrategy {
        ManagementStrategy::BrewServices
    }

    fn set_startup(
        &self,
        ctx: &Context,
        name: &str,
        enabled: bool,
    ) -> Result<(), LifecycleError> {
        let info = self.service_info(ctx, name)?.unwrap_or_default();
        if info.is_registered() == enabled {
            debug!("Service '{name}' login registration already {enabled}");
            return Ok(());
        }

        // brew only registers through start/stop, so restore the run-state afterwards.
        if enabled {
            info!("Registering service '{name}' to start at login");
            self.brew(ctx, name, "enable", &["start"])?;
            if !info.running {
                self.brew(ctx, name, "enable", &["stop", "--keep"])?;
            }
        } else {
            info!("Unregistering service '{name}' from login startup");
            self.brew(ctx, name, "disable", &["stop"])?;
            if info.running {
                self.brew(ctx, name, "disable", &["run"])?;
            }
        }
        Ok(())
    }

    fn recognizes(&self, ctx: &Context, name: &str) -> Result<bool, LifecycleError> {
        let output = self.toolkit.query(ctx, name, BREW_BIN, &["services", "list"])?;
        if !output.success() {
            return Ok(false);
        }
        Ok(parse_services_list(&output.stdout)
            .iter()
            .any(|entry| entry.name == name))
    }
}
