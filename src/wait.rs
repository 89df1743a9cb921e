//! Bounded, cancellable health polling.
//!
//! The overall deadline is fixed once, when the wait starts. Every attempt
//! then runs under its own [`scoped`] context with a full `probe_timeout`,
//! never derived from the umbrella, so the last attempts before the deadline
//! get the same budget as the first one. Only the loop itself decides when
//! time is up.
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::{
    constants::{HEALTH_POLL_INTERVAL, HEALTH_PROBE_TIMEOUT},
    context::{Context, scoped},
    error::{ContextError, LifecycleError},
    strategy::ServiceHealthInfo,
};

/// Timing of the health-poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    /// Time between two probes. The first probe happens one interval in.
    pub interval: Duration,
    /// Budget for a single probe.
    pub probe_timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: HEALTH_POLL_INTERVAL,
            probe_timeout: HEALTH_PROBE_TIMEOUT,
        }
    }
}

impl PollSettings {
    /// Same settings with a different interval.
    pub fn with_interval(self, interval: Duration) -> Self {
        Self { interval, ..self }
    }
}

/// Polls `probe` until it reports healthy, `timeout` elapses, or `outer` is
/// cancelled.
///
/// Probe errors are logged and the loop keeps going; only the deadline or
/// cancellation end it unsuccessfully, as [`LifecycleError::HealthTimeout`]
/// and [`LifecycleError::Cancelled`] respectively.
pub fn wait_for_healthy<F>(
    outer: &Context,
    service: &str,
    timeout: Duration,
    settings: &PollSettings,
    mut probe: F,
) -> Result<ServiceHealthInfo, LifecycleError>
where
    F: FnMut(&Context) -> Result<ServiceHealthInfo, LifecycleError>,
{
    let started = Instant::now();
    let deadline = started + timeout;
    let interval = settings.interval.max(Duration::from_millis(1));
    let mut next_tick = started + interval;
    let mut attempts: u32 = 0;

    info!("Waiting up to {timeout:?} for service '{service}' to become healthy");

    loop {
        if let Err(reason) = outer.sleep_until(next_tick.min(deadline)) {
            return Err(match reason {
                ContextError::Cancelled => {
                    info!("Health wait for '{service}' cancelled after {attempts} attempt(s)");
                    LifecycleError::Cancelled {
                        service: service.to_string(),
                    }
                }
                ContextError::DeadlineExceeded => LifecycleError::HealthTimeout {
                    service: service.to_string(),
                    timeout: started.elapsed(),
                },
            });
        }

        let now = Instant::now();
        if now >= deadline {
            warn!(
                "Service '{service}' not healthy after {attempts} attempt(s) within {timeout:?}"
            );
            return Err(LifecycleError::HealthTimeout {
                service: service.to_string(),
                timeout,
            });
        }
        if now < next_tick {
            continue;
        }

        attempts += 1;
        let result = {
            let attempt = scoped(settings.probe_timeout);
            probe(&attempt)
        };

        match result {
            Ok(health) if health.healthy => {
                info!(
                    "Service '{service}' healthy after {attempts} attempt(s) ({:?})",
                    started.elapsed()
                );
                return Ok(health);
            }
            Ok(health) => {
                debug!(
                    "Service '{service}' not healthy yet (attempt {attempts}): {}",
                    health.details
                );
            }
            Err(err) => {
                debug!("Health probe {attempts} for '{service}' failed: {err}");
            }
        }

        // A slow probe swallows the ticks it overlapped, like a dropping ticker.
        next_tick += interval;
        let now = Instant::now();
        if next_tick < now {
            next_tick = now;
        }
    }
}
