//! Configuration management for svcctl.
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::{
    constants::{
        DEFAULT_CONFIG_FILE, DEFAULT_HEALTH_CHECK_TIMEOUT, DEFAULT_HTTP_EXPECTED_STATUS,
        DEFAULT_WAIT_TIMEOUT, HEALTH_POLL_INTERVAL, HEALTH_PROBE_TIMEOUT,
    },
    dependencies::DependencyPolicy,
    error::LifecycleError,
    health::{HealthCheck, HealthProbe},
    packages::PackageServiceMap,
    wait::PollSettings,
};

/// Represents the structure of the manifest file.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Configuration version.
    pub version: String,
    /// Global tuning for polling and dependency handling.
    #[serde(default)]
    pub settings: Option<Settings>,
    /// Map of service names to their desired state.
    pub services: HashMap<String, ServiceConfig>,
    /// Directory containing the manifest.
    #[serde(skip)]
    pub project_dir: Option<String>,
}

impl Config {
    /// Poll timing resolved from `settings`, falling back to the built-in defaults.
    pub fn poll_settings(&self) -> Result<PollSettings, LifecycleError> {
        let Some(settings) = &self.settings else {
            return Ok(PollSettings::default());
        };

        Ok(PollSettings {
            interval: match &settings.poll_interval {
                Some(raw) => parse_duration(raw)?,
                None => HEALTH_POLL_INTERVAL,
            },
            probe_timeout: match &settings.probe_timeout {
                Some(raw) => parse_duration(raw)?,
                None => HEALTH_PROBE_TIMEOUT,
            },
        })
    }

    /// Which dependency types block the dependent service when they fail.
    pub fn dependency_policy(&self) -> DependencyPolicy {
        match self
            .settings
            .as_ref()
            .and_then(|s| s.blocking_dependencies.clone())
        {
            Some(types) => DependencyPolicy::blocking(types),
            None => DependencyPolicy::default(),
        }
    }

    /// Looks up a service, failing with a configuration error when it is not declared.
    pub fn service(&self, name: &str) -> Result<&ServiceConfig, LifecycleError> {
        self.services
            .get(name)
            .ok_or_else(|| LifecycleError::config(format!("Unknown service '{name}'")))
    }

    /// Resolves a `--service` selector. A declared service selects itself; a
    /// package name selects the declared services that package installs.
    pub fn select(
        &self,
        name: &str,
        packages: &PackageServiceMap,
    ) -> Result<Vec<String>, LifecycleError> {
        if self.services.contains_key(name) {
            return Ok(vec![name.to_string()]);
        }

        let provided: Vec<String> = packages
            .services_for_package(name)
            .into_iter()
            .filter(|service| self.services.contains_key(service))
            .collect();
        if provided.is_empty() {
            return Err(LifecycleError::config(format!("Unknown service '{name}'")));
        }
        Ok(provided)
    }

    /// Service names in a stable order.
    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Global tuning knobs.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    /// Interval between health probes (e.g. "5s").
    pub poll_interval: Option<String>,
    /// Timeout for each individual health probe (e.g. "30s").
    pub probe_timeout: Option<String>,
    /// Dependency types whose failure blocks the dependent service.
    pub blocking_dependencies: Option<Vec<DependencyType>>,
}

/// Desired run-state of a service.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    EnumString,
    AsRefStr,
    Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunState {
    /// The service should be running.
    #[default]
    Running,
    /// The service should be stopped.
    Stopped,
}

/// Mechanism used to control a service.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    AsRefStr,
    Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ManagementStrategy {
    /// Pick the first mechanism that recognizes the service.
    #[default]
    Auto,
    /// `brew services` wrapper.
    BrewServices,
    /// Caller-supplied or built-in command vectors.
    DirectCommand,
    /// Native init system (launchd on macOS, systemd elsewhere).
    Launchd,
    /// Process probing only; no boot-time enablement.
    ProcessOnly,
}

/// Kind of edge between a service and one of its dependencies.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    AsRefStr,
    Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DependencyType {
    /// The dependent cannot work without it.
    #[default]
    Required,
    /// A proxy in front of the dependent.
    Proxy,
    /// A container runtime hosting the dependent.
    Container,
    /// Nice to have; never blocks startup.
    Optional,
}

/// Command vectors used by the `direct_command` strategy. Each vector is the
/// program followed by its arguments.
#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct CustomCommands {
    /// Starts the service.
    pub start: Option<Vec<String>>,
    /// Stops the service.
    pub stop: Option<Vec<String>>,
    /// Restarts the service; stop-then-start when absent.
    pub restart: Option<Vec<String>>,
    /// Exits zero while the service is running.
    pub status: Option<Vec<String>>,
    /// Enables start at boot.
    pub enable: Option<Vec<String>>,
    /// Disables start at boot.
    pub disable: Option<Vec<String>>,
    /// Regex that status stdout must match for the service to count as running.
    pub status_pattern: Option<String>,
}

impl CustomCommands {
    /// Builds commands from borrowed start/stop/status vectors.
    pub fn from_static(start: &[&str], stop: &[&str], status: Option<&[&str]>) -> Self {
        let owned = |argv: &[&str]| argv.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            start: Some(owned(start)),
            stop: Some(owned(stop)),
            status: status.map(owned),
            ..Self::default()
        }
    }

    /// Whether both start and stop are present and non-empty.
    pub fn has_lifecycle(&self) -> bool {
        let present = |argv: &Option<Vec<String>>| argv.as_ref().is_some_and(|v| !v.is_empty());
        present(&self.start) && present(&self.stop)
    }

    /// Whether both enable and disable are present and non-empty.
    pub fn has_startup(&self) -> bool {
        let present = |argv: &Option<Vec<String>>| argv.as_ref().is_some_and(|v| !v.is_empty());
        present(&self.enable) && present(&self.disable)
    }
}

/// HTTP endpoint probe.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct HttpCheckConfig {
    /// URL to request with `GET`.
    pub url: String,
    /// Expected status code, 200 when omitted.
    pub expected_status: Option<u16>,
}

/// Health check override; exactly one probe kind must be set.
#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct HealthCheckConfig {
    /// Command that exits zero when healthy.
    pub command: Option<Vec<String>>,
    /// HTTP endpoint returning the expected status when healthy.
    pub http: Option<HttpCheckConfig>,
    /// `host:port` accepting TCP connections when healthy.
    pub tcp: Option<String>,
    /// Unix socket path accepting connections when healthy.
    pub socket: Option<PathBuf>,
    /// Timeout for a single probe (e.g. "10s").
    pub timeout: Option<String>,
    /// Interval between probes when waiting on a dependency (e.g. "2s").
    pub interval: Option<String>,
}

impl HealthCheckConfig {
    /// Validates the override and converts it into a runnable [`HealthCheck`].
    pub fn resolve(&self) -> Result<HealthCheck, LifecycleError> {
        let mut probes = Vec::new();

        if let Some(command) = &self.command {
            if command.is_empty() {
                return Err(LifecycleError::config("health_check.command cannot be empty"));
            }
            probes.push(HealthProbe::Command(command.clone()));
        }
        if let Some(http) = &self.http {
            probes.push(HealthProbe::Http {
                url: http.url.clone(),
                expected_status: http.expected_status.unwrap_or(DEFAULT_HTTP_EXPECTED_STATUS),
            });
        }
        if let Some(address) = &self.tcp {
            probes.push(HealthProbe::Tcp(address.clone()));
        }
        if let Some(path) = &self.socket {
            probes.push(HealthProbe::Socket(path.clone()));
        }

        if probes.len() != 1 {
            return Err(LifecycleError::config(format!(
                "health_check must define exactly one of command, http, tcp or socket (found {})",
                probes.len()
            )));
        }

        let timeout = match &self.timeout {
            Some(raw) => parse_duration(raw)?,
            None => DEFAULT_HEALTH_CHECK_TIMEOUT,
        };
        let interval = match &self.interval {
            Some(raw) => Some(parse_duration(raw)?),
            None => None,
        };

        Ok(HealthCheck {
            probe: probes.remove(0),
            timeout,
            interval,
        })
    }
}

/// A dependency declared explicitly in the manifest.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct DependencyConfig {
    /// Service that must be up first.
    pub service: String,
    /// Edge kind, `required` when omitted.
    #[serde(rename = "type", default)]
    pub kind: DependencyType,
    /// Health gate for the dependency.
    pub health_check: Option<HealthCheckConfig>,
}

/// Desired state for an individual service.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ServiceConfig {
    /// Desired run-state.
    #[serde(default)]
    pub state: RunState,
    /// Desired startup-enablement; `None` leaves it untouched.
    pub enabled: Option<bool>,
    /// Control mechanism.
    #[serde(default)]
    pub strategy: ManagementStrategy,
    /// Command vectors for `direct_command` (and optional start for `process_only`).
    pub commands: Option<CustomCommands>,
    /// Health check override.
    pub health_check: Option<HealthCheckConfig>,
    /// Block until the service reports healthy after starting.
    #[serde(default)]
    pub wait_for_healthy: bool,
    /// Bound on the healthy wait (e.g. "30s").
    pub wait_timeout: Option<String>,
    /// Dependencies declared in addition to the detected ones.
    pub depends_on: Option<Vec<DependencyConfig>>,
}

impl ServiceConfig {
    /// Parsed wait timeout. An unparsable value is an error, never a silent default.
    pub fn wait_timeout(&self) -> Result<Duration, LifecycleError> {
        parse_duration(self.wait_timeout.as_deref().unwrap_or(DEFAULT_WAIT_TIMEOUT))
    }

    /// Resolved health check override, if any.
    pub fn health_check(&self) -> Result<Option<HealthCheck>, LifecycleError> {
        self.health_check.as_ref().map(HealthCheckConfig::resolve).transpose()
    }
}

/// Parses a user-facing duration string in the format `<number>[ms|s|m|h]`.
pub fn parse_duration(raw: &str) -> Result<Duration, LifecycleError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(LifecycleError::config("Duration value cannot be empty"));
    }

    let invalid = || LifecycleError::config(format!("Invalid duration value: '{raw}'"));

    if let Some(stripped) = value.strip_suffix("ms") {
        let amount: u64 = stripped.trim().parse().map_err(|_| invalid())?;
        return Ok(Duration::from_millis(amount));
    }

    let (amount_str, multiplier) = if let Some(stripped) = value.strip_suffix('s') {
        (stripped.trim(), 1)
    } else if let Some(stripped) = value.strip_suffix('m') {
        (stripped.trim(), 60)
    } else if let Some(stripped) = value.strip_suffix('h') {
        (stripped.trim(), 3600)
    } else {
        (value, 1)
    };

    let amount: u64 = amount_str.parse().map_err(|_| invalid())?;

    Ok(Duration::from_secs(amount.saturating_mul(multiplier)))
}

/// Expands `$VAR` and `${VAR}` references. Unset variables are reported, not panicked on.
fn expand_env_vars(input: &str) -> Result<String, LifecycleError> {
    let re = Regex::new(r"\$\{?([A-Za-z_][A-Za-z0-9_]*)\}?")
        .map_err(|err| LifecycleError::config(err.to_string()))?;

    let missing: Vec<String> = re
        .captures_iter(input)
        .map(|caps| caps[1].to_string())
        .filter(|name| env::var(name).is_err())
        .collect();
    if let Some(name) = missing.first() {
        return Err(LifecycleError::config(format!(
            "Missing environment variable: {name}"
        )));
    }

    let result = re.replace_all(input, |caps: &regex::Captures| {
        env::var(&caps[1]).unwrap_or_default()
    });
    Ok(result.to_string())
}

/// Loads and parses the manifest, expanding environment variables.
pub fn load_config(config_path: Option<&str>) -> Result<Config, LifecycleError> {
    let config_path = config_path
        .map(Path::new)
        .unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));

    let content = fs::read_to_string(config_path).map_err(|e| {
        LifecycleError::ConfigReadError(std::io::Error::new(
            e.kind(),
            format!("{} ({})", e, config_path.display()),
        ))
    })?;

    let expanded_content = expand_env_vars(&content)?;

    let mut config: Config = serde_yaml::from_str(&expanded_content)
        .map_err(LifecycleError::ConfigParseError)?;

    let base_path = config_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    config.project_dir = Some(base_path.to_string_lossy().to_string());

    for (name, service) in &config.services {
        service.wait_timeout().map_err(|err| {
            LifecycleError::config(format!("service '{name}': {err}"))
        })?;
        service.health_check().map_err(|err| {
            LifecycleError::config(format!("service '{name}': {err}"))
        })?;
    }
    config.poll_settings()?;

    Ok(config)
}
