//! Health probes: commands, HTTP endpoints, TCP ports and Unix sockets.
use std::{
    collections::HashMap,
    net::{TcpStream, ToSocketAddrs},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use reqwest::blocking::Client;
use tracing::debug;

use crate::{
    constants::DEFAULT_HEALTH_CHECK_TIMEOUT,
    context::Context,
    error::ExecError,
    executor::{Executor, run_argv},
    packages::{PackageServiceMap, base_name},
};

/// What a health check actually probes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthProbe {
    /// Healthy when the command exits zero.
    Command(Vec<String>),
    /// Healthy when `GET url` answers with `expected_status`.
    Http {
        /// Endpoint to request.
        url: String,
        /// Status code signalling health.
        expected_status: u16,
    },
    /// Healthy when `host:port` accepts a TCP connection.
    Tcp(String),
    /// Healthy when the Unix socket accepts a connection.
    Socket(PathBuf),
}

/// A resolved, runnable health check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheck {
    /// The probe to run.
    pub probe: HealthProbe,
    /// Budget for a single probe.
    pub timeout: Duration,
    /// Poll interval when used as a dependency gate.
    pub interval: Option<Duration>,
}

impl HealthCheck {
    /// Command check with the default timeout.
    pub fn command<S: AsRef<str>>(argv: &[S]) -> Self {
        Self {
            probe: HealthProbe::Command(argv.iter().map(|s| s.as_ref().to_string()).collect()),
            timeout: DEFAULT_HEALTH_CHECK_TIMEOUT,
            interval: None,
        }
    }

    /// HTTP check with the default timeout.
    pub fn http(url: &str, expected_status: u16) -> Self {
        Self {
            probe: HealthProbe::Http {
                url: url.to_string(),
                expected_status,
            },
            timeout: DEFAULT_HEALTH_CHECK_TIMEOUT,
            interval: None,
        }
    }

    /// TCP connect check with the default timeout.
    pub fn tcp(address: &str) -> Self {
        Self {
            probe: HealthProbe::Tcp(address.to_string()),
            timeout: DEFAULT_HEALTH_CHECK_TIMEOUT,
            interval: None,
        }
    }
}

/// Outcome of a single probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    /// Whether the probe considered the target healthy.
    pub healthy: bool,
    /// Human-readable explanation.
    pub details: String,
}

impl ProbeReport {
    fn new(healthy: bool, details: impl Into<String>) -> Self {
        Self {
            healthy,
            details: details.into(),
        }
    }
}

/// Runs [`HealthCheck`]s. Command probes go through the injected executor;
/// network probes are made directly.
#[derive(Clone)]
pub struct HealthChecker {
    executor: Arc<dyn Executor>,
}

impl HealthChecker {
    /// Creates a checker issuing command probes through `executor`.
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self { executor }
    }

    /// Runs one probe. Only execution failures are errors; an unreachable
    /// endpoint is an unhealthy report.
    pub fn check(&self, ctx: &Context, check: &HealthCheck) -> Result<ProbeReport, ExecError> {
        if let Some(err) = ctx.err() {
            return Err(ExecError::ContextExpired(err));
        }

        let budget = match ctx.remaining() {
            Some(remaining) => remaining.min(check.timeout),
            None => check.timeout,
        };

        match &check.probe {
            HealthProbe::Command(argv) => {
                let output = run_argv(self.executor.as_ref(), ctx, argv, budget)?;
                let report = if output.success() {
                    ProbeReport::new(true, format!("`{}` succeeded", argv.join(" ")))
                } else {
                    ProbeReport::new(
                        false,
                        format!(
                            "`{}` exited with {}: {}",
                            argv.join(" "),
                            output.exit_code,
                            output.stderr.trim()
                        ),
                    )
                };
                Ok(report)
            }
            HealthProbe::Http {
                url,
                expected_status,
            } => Ok(probe_http(url, *expected_status, budget)),
            HealthProbe::Tcp(address) => Ok(probe_tcp(address, budget)),
            HealthProbe::Socket(path) => Ok(probe_socket(path)),
        }
    }
}

fn probe_http(url: &str, expected_status: u16, timeout: Duration) -> ProbeReport {
    let client = match Client::builder().timeout(timeout).build() {
        Ok(client) => client,
        Err(err) => return ProbeReport::new(false, format!("HTTP client error: {err}")),
    };

    match client.get(url).send() {
        Ok(response) => {
            let status = response.status().as_u16();
            ProbeReport::new(
                status == expected_status,
                format!("GET {url} returned {status} (expected {expected_status})"),
            )
        }
        Err(err) => {
            debug!("HTTP health probe against {url} failed: {err}");
            ProbeReport::new(false, format!("GET {url} failed: {err}"))
        }
    }
}

fn probe_tcp(address: &str, timeout: Duration) -> ProbeReport {
    let addrs = match address.to_socket_addrs() {
        Ok(addrs) => addrs.collect::<Vec<_>>(),
        Err(err) => {
            return ProbeReport::new(false, format!("cannot resolve {address}: {err}"));
        }
    };

    for addr in &addrs {
        if TcpStream::connect_timeout(addr, timeout).is_ok() {
            return ProbeReport::new(true, format!("TCP {address} accepted a connection"));
        }
    }
    ProbeReport::new(false, format!("TCP {address} refused or timed out"))
}

#[cfg(unix)]
fn probe_socket(path: &PathBuf) -> ProbeReport {
    match std::os::unix::net::UnixStream::connect(path) {
        Ok(_) => ProbeReport::new(true, format!("socket {} accepted a connection", path.display())),
        Err(err) => ProbeReport::new(false, format!("socket {}: {err}", path.display())),
    }
}

#[cfg(not(unix))]
fn probe_socket(path: &PathBuf) -> ProbeReport {
    ProbeReport::new(
        false,
        format!("socket probes are unsupported on this platform ({})", path.display()),
    )
}

/// Built-in health checks keyed by unversioned service or package name.
fn builtin_checks() -> Vec<(&'static str, HealthCheck)> {
    vec![
        ("redis", HealthCheck::command(&["redis-cli", "ping"])),
        ("valkey", HealthCheck::command(&["valkey-cli", "ping"])),
        ("postgresql", HealthCheck::command(&["pg_isready"])),
        ("mysql", HealthCheck::command(&["mysqladmin", "ping"])),
        ("mariadb", HealthCheck::command(&["mysqladmin", "ping"])),
        (
            "mongodb-community",
            HealthCheck::command(&["mongosh", "--quiet", "--eval", "db.adminCommand('ping')"]),
        ),
        ("memcached", HealthCheck::tcp("127.0.0.1:11211")),
        ("rabbitmq", HealthCheck::command(&["rabbitmq-diagnostics", "-q", "ping"])),
        ("docker", HealthCheck::command(&["docker", "info"])),
        ("colima", HealthCheck::command(&["colima", "status"])),
        ("podman", HealthCheck::command(&["podman", "info"])),
        ("elasticsearch", HealthCheck::http("http://127.0.0.1:9200/_cluster/health", 200)),
        ("minio", HealthCheck::http("http://127.0.0.1:9000/minio/health/live", 200)),
        ("ollama", HealthCheck::http("http://127.0.0.1:11434/", 200)),
    ]
}

/// Read-only table of default health checks.
#[derive(Debug, Clone, Default)]
pub struct DefaultHealthChecks {
    checks: HashMap<String, HealthCheck>,
}

impl DefaultHealthChecks {
    /// The table shipped with svcctl.
    pub fn builtin() -> Self {
        Self {
            checks: builtin_checks()
                .into_iter()
                .map(|(name, check)| (name.to_string(), check))
                .collect(),
        }
    }

    /// Adds or replaces an entry.
    pub fn with(mut self, name: &str, check: HealthCheck) -> Self {
        self.checks.insert(name.to_string(), check);
        self
    }

    /// Finds a default for `service`: by its own name, then unversioned, then
    /// by the package providing it.
    pub fn lookup(&self, service: &str, packages: &PackageServiceMap) -> Option<HealthCheck> {
        let mut candidates = vec![service.to_string(), base_name(service).to_string()];
        if let Some(package) = packages.package_for_service(service) {
            candidates.push(base_name(&package).to_string());
            candidates.push(package);
        }

        candidates
            .iter()
            .find_map(|name| self.checks.get(name.as_str()).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{executor::CommandOutput, test_utils::ScriptedExecutor};
    use std::net::TcpListener;

    #[test]
    fn command_probe_maps_exit_code() {
        let executor = Arc::new(ScriptedExecutor::new());
        executor.respond("redis-cli ping", CommandOutput::new(1, "", "Could not connect"));
        let checker = HealthChecker::new(executor.clone());
        let check = HealthCheck::command(&["redis-cli", "ping"]);

        let report = checker.check(&Context::background(), &check).unwrap();
        assert!(!report.healthy);
        assert!(report.details.contains("Could not connect"));

        executor.respond("redis-cli ping", CommandOutput::new(0, "PONG", ""));
        assert!(checker.check(&Context::background(), &check).unwrap().healthy);
    }

    #[test]
    fn expired_context_is_rejected() {
        let checker = HealthChecker::new(Arc::new(ScriptedExecutor::new()));
        let ctx = Context::background().with_timeout(Duration::ZERO);
        let err = checker
            .check(&ctx, &HealthCheck::tcp("127.0.0.1:1"))
            .unwrap_err();
        assert!(matches!(err, ExecError::ContextExpired(_)));
    }

    #[test]
    fn tcp_probe_detects_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let checker = HealthChecker::new(Arc::new(ScriptedExecutor::new()));

        let report = checker
            .check(&Context::background(), &HealthCheck::tcp(&address))
            .unwrap();
        assert!(report.healthy, "{}", report.details);

        drop(listener);
        let report = checker
            .check(&Context::background(), &HealthCheck::tcp(&address))
            .unwrap();
        assert!(!report.healthy);
    }

    #[test]
    fn defaults_resolve_through_package_table() {
        let defaults = DefaultHealthChecks::builtin();
        let packages = PackageServiceMap::builtin();

        assert_eq!(
            defaults.lookup("redis", &packages),
            Some(HealthCheck::command(&["redis-cli", "ping"]))
        );
        assert_eq!(
            defaults.lookup("postgresql@16", &packages),
            Some(HealthCheck::command(&["pg_isready"]))
        );
        assert_eq!(
            defaults.lookup("containerd", &packages),
            Some(HealthCheck::command(&["docker", "info"]))
        );
        assert!(defaults.lookup("unknown-daemon", &packages).is_none());
    }
}
