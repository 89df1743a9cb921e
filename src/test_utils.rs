//! Test doubles shared by unit and integration tests.
use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use crate::{
    context::Context,
    error::ExecError,
    executor::{CommandOutput, Executor},
};

type Responder = Arc<dyn Fn(usize) -> Result<CommandOutput, String> + Send + Sync>;

struct Rule {
    prefix: String,
    responder: Responder,
    hits: usize,
}

/// A call observed by [`ScriptedExecutor`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// Program and arguments joined by single spaces.
    pub command: String,
    /// Whether the context was already done when the call arrived.
    pub expired: bool,
    /// Time left on the context when the call arrived.
    pub remaining: Option<Duration>,
}

/// [`Executor`] that answers from scripted rules and records every call.
///
/// Rules match on command-line prefix; the longest matching prefix wins.
/// Unmatched commands exit 127, the way a missing binary would.
#[derive(Default)]
pub struct ScriptedExecutor {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<RecordedCall>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedExecutor {
    /// An executor with no rules.
    pub fn new() -> Self {
        Self::default()
    }

    fn install(&self, prefix: &str, responder: Responder) {
        let mut rules = lock(&self.rules);
        rules.retain(|rule| rule.prefix != prefix);
        rules.push(Rule {
            prefix: prefix.to_string(),
            responder,
            hits: 0,
        });
    }

    /// Always answers `output` for commands starting with `prefix`.
    pub fn respond(&self, prefix: &str, output: CommandOutput) {
        self.install(prefix, Arc::new(move |_| Ok(output.clone())));
    }

    /// Answers with `outputs` in order, repeating the last one afterwards.
    pub fn respond_sequence(&self, prefix: &str, outputs: Vec<CommandOutput>) {
        self.install(
            prefix,
            Arc::new(move |hit| {
                let index = hit.min(outputs.len().saturating_sub(1));
                Ok(outputs.get(index).cloned().unwrap_or_default())
            }),
        );
    }

    /// Answers through `responder`, which receives the number of earlier hits.
    pub fn respond_with<F>(&self, prefix: &str, responder: F)
    where
        F: Fn(usize) -> CommandOutput + Send + Sync + 'static,
    {
        self.install(prefix, Arc::new(move |hit| Ok(responder(hit))));
    }

    /// Fails every matching command with a spawn error.
    pub fn fail(&self, prefix: &str, message: &str) {
        let message = message.to_string();
        self.install(prefix, Arc::new(move |_| Err(message.clone())));
    }

    /// Every recorded call, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    /// Recorded command lines, in order.
    pub fn commands(&self) -> Vec<String> {
        lock(&self.calls).iter().map(|c| c.command.clone()).collect()
    }

    /// Number of recorded calls starting with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| c.command.starts_with(prefix))
            .count()
    }

    /// Forgets recorded calls, keeping the rules.
    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }
}

impl Executor for ScriptedExecutor {
    fn run(
        &self,
        ctx: &Context,
        program: &str,
        args: &[&str],
        _timeout: Duration,
    ) -> Result<CommandOutput, ExecError> {
        let command = std::iter::once(program)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");

        lock(&self.calls).push(RecordedCall {
            command: command.clone(),
            expired: ctx.is_done(),
            remaining: ctx.remaining(),
        });

        if let Some(err) = ctx.err() {
            return Err(ExecError::ContextExpired(err));
        }

        let responder = {
            let mut rules = lock(&self.rules);
            rules
                .iter_mut()
                .filter(|rule| command.starts_with(&rule.prefix))
                .max_by_key(|rule| rule.prefix.len())
                .map(|rule| {
                    let hit = rule.hits;
                    rule.hits += 1;
                    (rule.responder.clone(), hit)
                })
        };

        match responder {
            Some((responder, hit)) => responder(hit).map_err(|message| ExecError::Spawn {
                program: program.to_string(),
                source: std::io::Error::other(message),
            }),
            None => Ok(CommandOutput::new(
                127,
                "",
                format!("{program}: command not found"),
            )),
        }
    }
}
