//! Error handling for svcctl.
use std::time::Duration;

use thiserror::Error;

/// Defines all possible errors that can occur while managing a service's lifecycle.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Error reading or accessing a configuration file.
    #[error("Failed to read config file: {0}")]
    ConfigReadError(#[from] std::io::Error),

    /// Error parsing YAML configuration.
    #[error("Invalid YAML format: {0}")]
    ConfigParseError(#[from] serde_yaml::Error),

    /// A configuration value is present but malformed (durations, health checks, tags).
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// `direct_command` was selected but neither custom nor default commands exist.
    #[error("No commands available for service '{service}' (strategy direct_command)")]
    MissingCommands {
        /// The service without commands.
        service: String,
    },

    /// The operation cannot be expressed by the selected strategy.
    #[error("Operation '{operation}' is not supported by strategy '{strategy}'")]
    Unsupported {
        /// Strategy tag that rejected the operation.
        strategy: String,
        /// Name of the rejected operation.
        operation: String,
    },

    /// The `auto` strategy found no mechanism that recognizes the service.
    #[error("No control mechanism recognizes service '{service}'")]
    NoMechanism {
        /// The unrecognized service.
        service: String,
    },

    /// Error invoking an external command through the executor.
    #[error("Failed to {action} service '{service}': {source}")]
    Execution {
        /// The service being managed.
        service: String,
        /// The lifecycle action being performed.
        action: String,
        /// The underlying executor error.
        #[source]
        source: ExecError,
    },

    /// A control command ran but reported failure.
    #[error("Failed to {action} service '{service}': exit code {exit_code}: {stderr}")]
    CommandFailed {
        /// The service being managed.
        service: String,
        /// The lifecycle action being performed.
        action: String,
        /// Exit code returned by the command.
        exit_code: i32,
        /// Trimmed standard error of the command.
        stderr: String,
    },

    /// Error when dependency graph contains a cycle.
    #[error("Detected dependency cycle at service '{service}': {cycle}")]
    DependencyCycle {
        /// The service that was revisited while still being walked.
        service: String,
        /// Human-readable cycle description (e.g. `a -> b -> a`).
        cycle: String,
    },

    /// Error when a blocking dependency could not be brought up.
    #[error("Service '{service}' cannot start because dependency '{dependency}' failed: {source}")]
    DependencyFailed {
        /// The service that cannot be started.
        service: String,
        /// The dependency that failed.
        dependency: String,
        /// Why the dependency could not be satisfied.
        #[source]
        source: Box<LifecycleError>,
    },

    /// The service did not report healthy before the wait deadline.
    #[error("Service '{service}' did not become healthy within {timeout:?}")]
    HealthTimeout {
        /// The service that was being waited on.
        service: String,
        /// The configured wait timeout.
        timeout: Duration,
    },

    /// The caller aborted the operation.
    #[error("Operation on service '{service}' was cancelled")]
    Cancelled {
        /// The service whose operation was aborted.
        service: String,
    },
}

impl LifecycleError {
    /// Builds an [`LifecycleError::InvalidConfig`] from any message.
    pub fn config(message: impl Into<String>) -> Self {
        LifecycleError::InvalidConfig(message.into())
    }

    /// Whether this error is the health-wait deadline rather than a probe failure.
    pub fn is_timeout(&self) -> bool {
        matches!(self, LifecycleError::HealthTimeout { .. })
    }
}

/// Error type for command execution through an [`crate::executor::Executor`].
#[derive(Debug, Error)]
pub enum ExecError {
    /// The incoming context was already done before anything was spawned.
    #[error("context already expired: {0}")]
    ContextExpired(#[from] ContextError),

    /// The program could not be spawned or waited on.
    #[error("Failed to run '{program}': {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The command exceeded its timeout (or the context deadline) and was killed.
    #[error("Command '{program}' timed out after {timeout:?}")]
    TimedOut {
        /// Program that timed out.
        program: String,
        /// Effective timeout that elapsed.
        timeout: Duration,
    },

    /// The context was cancelled while the command was running.
    #[error("Command '{program}' was cancelled")]
    Cancelled {
        /// Program that was interrupted.
        program: String,
    },
}

/// Reason a [`crate::context::Context`] is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    /// The context, or one of its parents, was cancelled explicitly.
    #[error("context cancelled")]
    Cancelled,

    /// The context deadline passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}
