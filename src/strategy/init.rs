//! Native init-system control: launchd on macOS, systemd elsewhere.
use std::collections::HashMap;

use tracing::{debug, info};

use super::{ServiceHealthInfo, ServiceLifecycleStrategy, ServiceStatusInfo, Toolkit};
use crate::{
    config::ManagementStrategy,
    constants::{LAUNCHCTL_BIN, SYSTEMCTL_BIN},
    context::Context,
    error::LifecycleError,
    health::HealthCheck,
};

/// Which init system to talk to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitSystem {
    /// launchd, addressed through a domain such as `gui/501` or `system`.
    Launchd {
        /// Domain target prefix for `launchctl` verbs.
        domain: String,
    },
    /// systemd via `systemctl`.
    Systemd,
}

impl InitSystem {
    /// The init system of the host platform.
    pub fn native() -> Self {
        if cfg!(target_os = "macos") {
            let uid = nix::unistd::Uid::current();
            let domain = if uid.is_root() {
                "system".to_string()
            } else {
                format!("gui/{}", uid.as_raw())
            };
            InitSystem::Launchd { domain }
        } else {
            InitSystem::Systemd
        }
    }
}

/// Parses `systemctl show --property=...` output into key/value pairs.
pub fn parse_systemctl_show(stdout: &str) -> HashMap<String, String> {
    stdout
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect()
}

/// Extracts the `"PID" = 123;` entry from `launchctl list <label>`.
pub fn parse_launchctl_pid(stdout: &str) -> Option<u32> {
    stdout.lines().find_map(|line| {
        let (key, value) = line.trim().split_once('=')?;
        if key.trim().trim_matches('"') != "PID" {
            return None;
        }
        value.trim().trim_end_matches(';').trim().parse().ok()
    })
}

/// Whether `label` is marked disabled in `launchctl print-disabled` output.
pub fn parse_launchctl_disabled(stdout: &str, label: &str) -> bool {
    stdout.lines().any(|line| {
        let Some((key, value)) = line.trim().split_once("=>") else {
            return false;
        };
        key.trim().trim_matches('"') == label
            && matches!(value.trim(), "disabled" | "true")
    })
}

/// Controls services through the platform init system.
pub struct InitSystemStrategy {
    toolkit: Toolkit,
    health_check: Option<HealthCheck>,
    system: InitSystem,
}

impl InitSystemStrategy {
    /// Creates a strategy bound to `system`.
    pub fn new(toolkit: Toolkit, health_check: Option<HealthCheck>, system: InitSystem) -> Self {
        Self {
            toolkit,
            health_check,
            system,
        }
    }

    /// The init system this strategy drives.
    pub fn system(&self) -> &InitSystem {
        &self.system
    }

    fn systemd_properties(
        &self,
        ctx: &Context,
        name: &str,
    ) -> Result<HashMap<String, String>, LifecycleError> {
        let output = self.toolkit.query(
            ctx,
            name,
            SYSTEMCTL_BIN,
            &[
                "show",
                name,
                "--property=LoadState,ActiveState,SubState,UnitFileState,MainPID",
                "--no-pager",
            ],
        )?;
        if !output.success() {
            return Err(LifecycleError::CommandFailed {
                service: name.to_string(),
                action: "query".to_string(),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(parse_systemctl_show(&output.stdout))
    }

    fn systemd_status(&self, ctx: &Context, name: &str) -> Result<ServiceStatusInfo, LifecycleError> {
        let props = self.systemd_properties(ctx, name)?;
        let get = |key: &str| props.get(key).map(String::as_str).unwrap_or("");

        if get("LoadState") == "not-found" {
            return Ok(ServiceStatusInfo::not_found(
                ManagementStrategy::Launchd,
                format!("systemd unit '{name}' not found"),
            ));
        }

        let pid = get("MainPID");
        Ok(ServiceStatusInfo {
            running: matches!(get("ActiveState"), "active" | "reloading"),
            enabled: matches!(get("UnitFileState"), "enabled" | "enabled-runtime" | "alias"),
            process_id: if pid == "0" { String::new() } else { pid.to_string() },
            strategy: ManagementStrategy::Launchd,
            details: format!("systemd: {} ({})", get("ActiveState"), get("SubState")),
        })
    }

    fn launchd_status(
        &self,
        ctx: &Context,
        name: &str,
        domain: &str,
    ) -> Result<ServiceStatusInfo, LifecycleError> {
        let listed = self.toolkit.query(ctx, name, LAUNCHCTL_BIN, &["list", name])?;
        if !listed.success() {
            return Ok(ServiceStatusInfo::not_found(
                ManagementStrategy::Launchd,
                format!("launchd job '{name}' not loaded"),
            ));
        }

        let pid = parse_launchctl_pid(&listed.stdout);
        let disabled_output =
            self.toolkit
                .query(ctx, name, LAUNCHCTL_BIN, &["print-disabled", domain])?;
        let disabled = disabled_output.success()
            && parse_launchctl_disabled(&disabled_output.stdout, name);

        Ok(ServiceStatusInfo {
            running: pid.is_some(),
            enabled: !disabled,
            process_id: pid.map(|pid| pid.to_string()).unwrap_or_default(),
            strategy: ManagementStrategy::Launchd,
            details: format!(
                "launchd: {}",
                if pid.is_some() { "running" } else { "loaded, not running" }
            ),
        })
    }

    fn verb(&self, ctx: &Context, name: &str, action: &str) -> Result<(), LifecycleError> {
        match &self.system {
            InitSystem::Systemd => {
                let verb = match action {
                    "enable" | "disable" | "start" | "stop" | "restart" => action,
                    _ => return Err(unsupported(action)),
                };
                self.toolkit.control(ctx, name, action, SYSTEMCTL_BIN, &[verb, name])?;
            }
            InitSystem::Launchd { domain } => {
                let target = format!("{domain}/{name}");
                let args: Vec<&str> = match action {
                    "start" => vec!["kickstart", target.as_str()],
                    "restart" => vec!["kickstart", "-k", target.as_str()],
                    "stop" => vec!["kill", "SIGTERM", target.as_str()],
                    "enable" => vec!["enable", target.as_str()],
                    "disable" => vec!["disable", target.as_str()],
                    _ => return Err(unsupported(action)),
                };
                self.toolkit.control(ctx, name, action, LAUNCHCTL_BIN, &args)?;
            }
        }
        Ok(())
    }
}

fn unsupported(action: &str) -> LifecycleError {
    LifecycleError::Unsupported {
        strategy: ManagementStrategy::Launchd.to_string(),
        operation: action.to_string(),
    }
}

impl ServiceLifecycleStrategy for InitSystemStrategy {
    fn start_service(&self, ctx: &Context, name: &str) -> Result<(), LifecycleError> {
        if self.is_running(ctx, name)? {
            debug!("Service '{name}' already running; nothing to start");
            return Ok(());
        }
        info!("Starting service '{name}' via init system");
        self.verb(ctx, name, "start")
    }

    fn stop_service(&self, ctx: &Context, name: &str) -> Result<(), LifecycleError> {
        if !self.is_running(ctx, name)? {
            debug!("Service '{name}' already stopped; nothing to stop");
            return Ok(());
        }
        info!("Stopping service '{name}' via init system");
        self.verb(ctx, name, "stop")
    }

    fn restart_service(&self, ctx: &Context, name: &str) -> Result<(), LifecycleError> {
        info!("Restarting service '{name}' via init system");
        self.verb(ctx, name, "restart")
    }

    fn is_running(&self, ctx: &Context, name: &str) -> Result<bool, LifecycleError> {
        Ok(self.status_check(ctx, name)?.running)
    }

    fn status_check(
        &self,
        ctx: &Context,
        name: &str,
    ) -> Result<ServiceStatusInfo, LifecycleError> {
        match &self.system {
            InitSystem::Systemd => self.systemd_status(ctx, name),
            InitSystem::Launchd { domain } => self.launchd_status(ctx, name, domain),
        }
    }

    fn health_check(
        &self,
        ctx: &Context,
        name: &str,
    ) -> Result<ServiceHealthInfo, LifecycleError> {
        self.toolkit.health(
            ctx,
            name,
            ManagementStrategy::Launchd,
            self.health_check.as_ref(),
            || self.is_running(ctx, name),
        )
    }

    fn strategy_name(&self) -> ManagementStrategy {
        ManagementStrategy::Launchd
    }

    fn set_startup(
        &self,
        ctx: &Context,
        name: &str,
        enabled: bool,
    ) -> Result<(), LifecycleError> {
        let status = self.status_check(ctx, name)?;
        if status.enabled == enabled {
            debug!("Service '{name}' startup already {enabled}");
            return Ok(());
        }
        info!(
            "{} service '{name}' at boot",
            if enabled { "Enabling" } else { "Disabling" }
        );
        self.verb(ctx, name, if enabled { "enable" } else { "disable" })
    }

    fn recognizes(&self, ctx: &Context, name: &str) -> Result<bool, LifecycleError> {
        match &self.system {
            InitSystem::Systemd => {
                let props = self.systemd_properties(ctx, name)?;
                Ok(props
                    .get("LoadState")
                    .is_some_and(|state| state != "not-found"))
            }
            InitSystem::Launchd { .. } => {
                let output = self.toolkit.query(ctx, name, LAUNCHCTL_BIN, &["list", name])?;
                Ok(output.success())
            }
        }
    }
}
