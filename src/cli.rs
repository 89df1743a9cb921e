//! Command-line interface for svcctl.
use std::str::FromStr;

use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

use crate::constants::DEFAULT_CONFIG_FILE;

/// Wrapper around `LevelFilter` so clap can parse log levels from either
/// string names ("info", "debug", etc.) or numeric shorthands (0-5).
#[derive(Clone, Copy, Debug)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    /// String representation suitable for `RUST_LOG`.
    pub fn as_str(&self) -> &'static str {
        match self.0 {
            LevelFilter::OFF => "off",
            LevelFilter::ERROR => "error",
            LevelFilter::WARN => "warn",
            LevelFilter::INFO => "info",
            LevelFilter::DEBUG => "debug",
            LevelFilter::TRACE => "trace",
        }
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("log level cannot be empty".into());
        }

        if let Ok(number) = trimmed.parse::<u8>() {
            let level = match number {
                0 => LevelFilter::OFF,
                1 => LevelFilter::ERROR,
                2 => LevelFilter::WARN,
                3 => LevelFilter::INFO,
                4 => LevelFilter::DEBUG,
                5 => LevelFilter::TRACE,
                _ => {
                    return Err(format!(
                        "unsupported log level number '{number}' (expected 0-5)"
                    ));
                }
            };

            return Ok(LogLevelArg(level));
        }

        let lowercase = trimmed.to_ascii_lowercase();
        let level = match lowercase.as_str() {
            "off" => Some(LevelFilter::OFF),
            "error" | "err" => Some(LevelFilter::ERROR),
            "warn" | "warning" => Some(LevelFilter::WARN),
            "info" | "information" => Some(LevelFilter::INFO),
            "debug" => Some(LevelFilter::DEBUG),
            "trace" => Some(LevelFilter::TRACE),
            _ => None,
        }
        .ok_or_else(|| format!("invalid log level '{trimmed}'"))?;

        Ok(LogLevelArg(level))
    }
}

/// Command-line interface for svcctl.
#[derive(Parser)]
#[command(name = "svcctl", version, author)]
#[command(about = "Drive OS services to a declared run-state, startup and health", long_about = None)]
pub struct Cli {
    /// Override the logging verbosity for this invocation only.
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevelArg>,

    /// The command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for svcctl.
#[derive(Subcommand)]
pub enum Commands {
    /// Bring services to the state declared in the manifest.
    Apply {
        /// Path to the manifest (defaults to `svcctl.yaml`).
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: String,

        /// Optionally apply only the named service (or the services a package installs).
        #[arg(short, long)]
        service: Option<String>,

        /// Emit machine-readable JSON output instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Show the observed state of declared services.
    Status {
        /// Path to the manifest (defaults to `svcctl.yaml`).
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: String,

        /// Optionally specify a service or package name to check its status.
        #[arg(short, long)]
        service: Option<String>,

        /// Emit machine-readable JSON output instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Stop declared services, leaving their startup registration alone.
    Stop {
        /// Path to the manifest (defaults to `svcctl.yaml`).
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: String,

        /// Name of service or package to stop (optional).
        #[arg(short, long)]
        service: Option<String>,

        /// Also remove the startup registration (best effort).
        #[arg(long)]
        disable: bool,
    },

    /// Show the dependency tree of a service and check it for cycles.
    Deps {
        /// Path to the manifest (defaults to `svcctl.yaml`).
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: String,

        /// Service whose dependencies should be listed.
        service: String,
    },
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse()
}
