//! Constants and tuning values for service lifecycle management.
//!
//! This module centralizes the timing values, default file names and the
//! discovery order used by the `auto` strategy so they can be tested and
//! referenced from a single place.

use std::time::Duration;

use crate::config::ManagementStrategy;

// ============================================================================
// Configuration Files
// ============================================================================

/// Manifest file looked up when no path is given on the command line.
pub const DEFAULT_CONFIG_FILE: &str = "svcctl.yaml";

// ============================================================================
// Health Polling
// ============================================================================

/// Interval between health probes while waiting for a service to become healthy.
pub const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Timeout for each individual health probe. Every probe receives a fresh
/// context with this budget, independent of the overall wait deadline.
pub const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Wait timeout applied when `wait_for_healthy` is set without `wait_timeout`.
pub const DEFAULT_WAIT_TIMEOUT: &str = "60s";

/// Timeout for a dependency health check when the dependency does not set one.
pub const DEFAULT_DEPENDENCY_HEALTH_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout applied to a single health-check command when none is configured.
pub const DEFAULT_HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Expected HTTP status for HTTP health checks that do not specify one.
pub const DEFAULT_HTTP_EXPECTED_STATUS: u16 = 200;

// ============================================================================
// Command Execution
// ============================================================================

/// Timeout for mutating control commands (start, stop, restart, enable, disable).
pub const CONTROL_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout for read-only status queries.
pub const STATUS_COMMAND_TIMEOUT: Duration = Duration::from_secs(15);

/// Timeout for a single mechanism probe issued by the `auto` strategy.
/// Discovery must stay short so a wedged mechanism cannot stall resolution.
pub const DISCOVERY_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Strategy Resolution
// ============================================================================

/// Mechanisms probed by the `auto` strategy, highest priority first. The
/// first mechanism that recognizes the service name wins.
pub const AUTO_DISCOVERY_ORDER: [ManagementStrategy; 3] = [
    ManagementStrategy::Launchd,
    ManagementStrategy::BrewServices,
    ManagementStrategy::ProcessOnly,
];

// ============================================================================
// Tool Names
// ============================================================================

/// Homebrew executable.
pub const BREW_BIN: &str = "brew";

/// launchd control utility (macOS).
pub const LAUNCHCTL_BIN: &str = "launchctl";

/// systemd control utility (Linux).
pub const SYSTEMCTL_BIN: &str = "systemctl";

/// Process lookup by name or pattern.
pub const PGREP_BIN: &str = "pgrep";

/// Process signalling by name or pattern.
pub const PKILL_BIN: &str = "pkill";
