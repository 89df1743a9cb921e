//! Cancellation and deadline propagation for blocking service operations.
//!
//! A [`Context`] carries an optional deadline and a chain of cancellation
//! tokens. Children created with [`Context::with_timeout`] observe their
//! parents' cancellation but never extend a parent's deadline.
//!
//! Health probes deliberately do *not* derive from the umbrella wait context:
//! each attempt takes a [`ScopedContext`] from [`scoped`], a fresh base with
//! its own short timeout, so an umbrella that is close to expiry cannot starve
//! the probes issued just before it.
use std::{
    ops::Deref,
    sync::{Arc, Condvar, Mutex},
    time::{Duration, Instant},
};

use crate::error::ContextError;

/// Upper bound on how long a sleeping context goes without re-checking its parents.
const WAKE_SLICE: Duration = Duration::from_millis(25);

#[derive(Debug, Default)]
struct Token {
    cancelled: Mutex<bool>,
    signal: Condvar,
}

impl Token {
    fn cancel(&self) {
        let mut cancelled = self.cancelled.lock().unwrap_or_else(|p| p.into_inner());
        *cancelled = true;
        self.signal.notify_all();
    }

    fn is_cancelled(&self) -> bool {
        *self.cancelled.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Blocks for at most `timeout` or until cancelled.
    fn wait(&self, timeout: Duration) {
        let guard = self.cancelled.lock().unwrap_or_else(|p| p.into_inner());
        if *guard {
            return;
        }
        let _ = self
            .signal
            .wait_timeout_while(guard, timeout, |cancelled| !*cancelled);
    }
}

/// Deadline + cancellation handle threaded through every blocking call.
#[derive(Debug, Clone)]
pub struct Context {
    /// Ancestor tokens first, own token last.
    tokens: Vec<Arc<Token>>,
    deadline: Option<Instant>,
}

impl Context {
    /// A fresh root context with no deadline.
    pub fn background() -> Self {
        Self {
            tokens: vec![Arc::new(Token::default())],
            deadline: None,
        }
    }

    /// Derives a child that is cancelled with this context and expires after
    /// `timeout` (or at the parent's deadline, whichever comes first).
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let own = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(parent) if parent < own => parent,
            _ => own,
        };
        self.child(Some(deadline))
    }

    /// Derives a child that can be cancelled independently of this context.
    pub fn with_cancel(&self) -> Self {
        self.child(self.deadline)
    }

    fn child(&self, deadline: Option<Instant>) -> Self {
        let mut tokens = self.tokens.clone();
        tokens.push(Arc::new(Token::default()));
        Self { tokens, deadline }
    }

    /// Cancels this context and every context derived from it.
    pub fn cancel(&self) {
        if let Some(own) = self.tokens.last() {
            own.cancel();
        }
    }

    /// Why the context is done, or `None` while it is still live.
    pub fn err(&self) -> Option<ContextError> {
        if self.tokens.iter().any(|token| token.is_cancelled()) {
            return Some(ContextError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                Some(ContextError::DeadlineExceeded)
            }
            _ => None,
        }
    }

    /// Returns `true` once cancelled or past the deadline.
    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// The instant after which this context is done, if bounded.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` for unbounded contexts.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Sleeps until `until`, returning early with the reason if the context
    /// finishes first.
    pub fn sleep_until(&self, until: Instant) -> Result<(), ContextError> {
        loop {
            if let Some(err) = self.err() {
                return Err(err);
            }

            let now = Instant::now();
            if now >= until {
                return Ok(());
            }

            let mut wake = until.min(now + WAKE_SLICE);
            if let Some(deadline) = self.deadline {
                wake = wake.min(deadline);
            }

            match self.tokens.last() {
                Some(own) => own.wait(wake.saturating_duration_since(now)),
                None => std::thread::sleep(wake.saturating_duration_since(now)),
            }
        }
    }

    /// Sleeps for `duration` unless the context finishes first.
    pub fn sleep(&self, duration: Duration) -> Result<(), ContextError> {
        self.sleep_until(Instant::now() + duration)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

/// A context that is cancelled when dropped, releasing anything still bound to it.
#[derive(Debug)]
pub struct ScopedContext {
    ctx: Context,
}

impl ScopedContext {
    /// Wraps `ctx` so it is cancelled at the end of the current scope.
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }
}

impl Deref for ScopedContext {
    type Target = Context;

    fn deref(&self) -> &Context {
        &self.ctx
    }
}

impl Drop for ScopedContext {
    fn drop(&mut self) {
        self.ctx.cancel();
    }
}

/// Creates an independently timed context from a fresh base.
///
/// Never chained off a caller's context: the returned token is live for the
/// full `timeout` regardless of any umbrella deadline.
pub fn scoped(timeout: Duration) -> ScopedContext {
    ScopedContext::new(Context::background().with_timeout(timeout))
}
