//! Process execution primitive consumed by every strategy.
use std::{
    io::{ErrorKind, Read},
    process::{Child, Command, Stdio},
    sync::{Arc, Mutex, mpsc},
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, warn};

use crate::{
    context::Context,
    error::{ContextError, ExecError},
};

/// Interval between `try_wait` polls of a running child.
const CHILD_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How long to keep draining pipes after the child exits. A backgrounded
/// grandchild can hold them open indefinitely.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `-1` when the process was terminated by a signal.
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Convenience constructor used heavily by tests and parsers.
    pub fn new(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// Whether the command exited with status zero.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs external commands on behalf of the lifecycle strategies.
///
/// Implementations must reject a context that is already done with
/// [`ExecError::ContextExpired`] instead of spawning anything.
pub trait Executor: Send + Sync {
    /// Runs `program` with `args`, bounded by `timeout` and by `ctx`.
    fn run(
        &self,
        ctx: &Context,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<CommandOutput, ExecError>;
}

/// Runs a full argument vector (`program` followed by its arguments).
pub fn run_argv(
    executor: &dyn Executor,
    ctx: &Context,
    argv: &[String],
    timeout: Duration,
) -> Result<CommandOutput, ExecError> {
    let Some((program, rest)) = argv.split_first() else {
        return Err(ExecError::Spawn {
            program: String::new(),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty command vector",
            ),
        });
    };
    let args: Vec<&str> = rest.iter().map(String::as_str).collect();
    executor.run(ctx, program, &args, timeout)
}

/// [`Executor`] backed by `std::process::Command`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemExecutor;

impl SystemExecutor {
    /// Creates a new system executor.
    pub fn new() -> Self {
        Self
    }
}

impl Executor for SystemExecutor {
    fn run(
        &self,
        ctx: &Context,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<CommandOutput, ExecError> {
        if let Some(err) = ctx.err() {
            return Err(ExecError::ContextExpired(err));
        }

        debug!("Executing command: {program} {}", args.join(" "));

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ExecError::Spawn {
                program: program.to_string(),
                source,
            })?;

        let stdout = capture(child.stdout.take());
        let stderr = capture(child.stderr.take());

        let started = Instant::now();
        let mut deadline = started + timeout;
        if let Some(ctx_deadline) = ctx.deadline() {
            deadline = deadline.min(ctx_deadline);
        }

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(source) => {
                    terminate(&mut child, program);
                    return Err(ExecError::Spawn {
                        program: program.to_string(),
                        source,
                    });
                }
            }

            if Instant::now() >= deadline {
                terminate(&mut child, program);
                return Err(ExecError::TimedOut {
                    program: program.to_string(),
                    timeout: started.elapsed(),
                });
            }

            if let Err(ContextError::Cancelled) = ctx.sleep(CHILD_POLL_INTERVAL) {
                terminate(&mut child, program);
                return Err(ExecError::Cancelled {
                    program: program.to_string(),
                });
            }
        };

        let drain_until = Instant::now() + OUTPUT_DRAIN_GRACE;
        Ok(CommandOutput {
            exit_code: status.code().unwrap_or(-1),
            stdout: stdout.collect(program, drain_until),
            stderr: stderr.collect(program, drain_until),
        })
    }
}

/// Output drained from one pipe by a helper thread.
struct Capture {
    buffer: Arc<Mutex<Vec<u8>>>,
    done: mpsc::Receiver<()>,
}

/// Drains a pipe on a helper thread so a chatty child cannot block on a full buffer.
fn capture<R: Read + Send + 'static>(pipe: Option<R>) -> Capture {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let (tx, done) = mpsc::channel();
    let sink = buffer.clone();
    thread::spawn(move || {
        if let Some(mut pipe) = pipe {
            let mut chunk = [0u8; 4096];
            loop {
                match pipe.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => {
                        if let Ok(mut buffer) = sink.lock() {
                            buffer.extend_from_slice(&chunk[..n]);
                        }
                    }
                    Err(err) if err.kind() == ErrorKind::Interrupted => {}
                    Err(_) => break,
                }
            }
        }
        let _ = tx.send(());
    });
    Capture { buffer, done }
}

impl Capture {
    /// Waits for EOF until `until`, then returns whatever has been read.
    fn collect(self, program: &str, until: Instant) -> String {
        let wait = until.saturating_duration_since(Instant::now());
        if let Err(mpsc::RecvTimeoutError::Timeout) = self.done.recv_timeout(wait) {
            debug!("Output of '{program}' still open after exit; returning partial output");
        }
        let bytes = self
            .buffer
            .lock()
            .map(|buffer| buffer.clone())
            .unwrap_or_default();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

fn terminate(child: &mut Child, program: &str) {
    if let Err(err) = child.kill() {
        warn!("Failed to terminate '{program}': {err}");
    }
    let _ = child.wait();
}
