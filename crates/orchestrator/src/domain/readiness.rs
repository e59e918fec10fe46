//! Bounded polling of platform state.
//!
//! Every wait in the orchestrator goes through [`ReadinessPoller::await_condition`]:
//! a fresh sample is taken at a fixed interval until the predicate holds or the
//! deadline passes. The poller never blocks longer than the deadline plus one
//! interval (plus the duration of the final sample).

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tokio::time::Instant;
use tracing::trace;

/// Interval between two samples unless configured otherwise.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Shortest interval a poller accepts; shorter ones are raised to it.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Outcome of a bounded wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness<S> {
    /// The predicate held for this sample.
    Ready(S),
    /// The deadline passed; `last_observed` is the final sample taken.
    TimedOut { last_observed: S, waited: Duration },
}

impl<S> Readiness<S> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPoller {
    interval: Duration,
}

impl Default for ReadinessPoller {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl ReadinessPoller {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(MIN_POLL_INTERVAL),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Samples platform state until `is_ready` holds or `deadline` elapses.
    ///
    /// The first sample is taken immediately, so a zero deadline still observes
    /// the state once. Sampling errors are returned as-is; the caller decides
    /// whether a failed read is fatal.
    pub async fn await_condition<S, E, F, Fut, P>(
        &self,
        deadline: Duration,
        mut sample: F,
        mut is_ready: P,
    ) -> Result<Readiness<S>, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<S, E>>,
        P: FnMut(&S) -> bool,
    {
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let observed = sample().await?;
            if is_ready(&observed) {
                trace!(attempt, "condition satisfied");
                return Ok(Readiness::Ready(observed));
            }

            let waited = started.elapsed();
            if waited >= deadline {
                trace!(attempt, ?waited, "condition not satisfied before deadline");
                return Ok(Readiness::TimedOut {
                    last_observed: observed,
                    waited,
                });
            }

            sleep(self.interval.min(deadline - waited)).await;
        }
    }
}
