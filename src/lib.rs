//! svcctl brings operating-system services to a declared state. It drives
//! run-state and boot-time enablement through pluggable control strategies
//! (init system, `brew services`, plain processes or explicit commands),
//! starts dependencies first, and can wait, with bounded and cancellable
//! polling, until a service reports itself healthy.

/// CLI interface.
pub mod cli;

/// Manifest parsing and desired-state types.
pub mod config;

/// Built-in constants and defaults.
pub mod constants;

/// Cancellation and deadlines.
pub mod context;

/// Dependency detection and ordering.
pub mod dependencies;

/// Error handling.
pub mod error;

/// Process execution.
pub mod executor;

/// Strategy construction.
pub mod factory;

/// Health probes.
pub mod health;

/// Desired-state application.
pub mod orchestrator;

/// Package to service lookup.
pub mod packages;

/// Lifecycle strategies.
pub mod strategy;

/// Test doubles.
pub mod test_utils;

/// Health-poll loop.
pub mod wait;
