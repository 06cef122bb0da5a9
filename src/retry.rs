//! Retrying request execution.

use crate::errors::{DriverError, ErrorKind};
use crate::session::{QueryResults, Request, Session};
use crate::tracker::LatencyTracker;
use log::{debug, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// When and how often a transient failure is retried.
///
/// The default policy resubmits immediately and never gives up. That is
/// only sound because requests are idempotent; set a budget and a backoff
/// for anything facing a real outage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts allowed per request, `None` for no limit.
    pub max_attempts: Option<u32>,
    /// Delay before the first retry; zero retries immediately.
    pub initial_backoff: Duration,
    /// Cap on the doubling delay.
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Retry forever, without delay.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Limit the number of attempts per request.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts.max(1));
        self
    }

    /// Wait `initial` before the first retry, doubling up to `max`.
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max.max(initial);
        self
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        if self.initial_backoff.is_zero() {
            return Duration::ZERO;
        }
        let factor = 1u32 << retry.saturating_sub(1).min(16);
        self.initial_backoff
            .checked_mul(factor)
            .map_or(self.max_backoff, |delay| delay.min(self.max_backoff))
    }

    fn exhausted(&self, attempts: u32) -> bool {
        matches!(self.max_attempts, Some(max) if attempts >= max)
    }
}

/// Executes requests until they reach a final outcome.
///
/// Transient errors (timeouts, connections closed mid-flight) resubmit the
/// same request. An endpoint with every node unreachable is not retried:
/// the error goes straight back to the caller, since without re-fallback
/// the session has nowhere else to go. Any other error ends the request.
///
/// Each request reports exactly one outcome to the tracker: its latency on
/// success, measured from the first attempt, or a failure.
#[derive(Debug)]
pub struct RetryExecutor {
    tracker: Arc<LatencyTracker>,
    policy: RetryPolicy,
}

impl RetryExecutor {
    /// Creates a new executor reporting to `tracker`.
    pub fn new(tracker: Arc<LatencyTracker>, policy: RetryPolicy) -> Self {
        Self { tracker, policy }
    }

    /// The tracker outcomes are reported to.
    pub fn tracker(&self) -> &Arc<LatencyTracker> {
        &self.tracker
    }

    /// Execute `request` on `session`, retrying transient failures.
    pub async fn execute<S>(
        &self,
        session: &S,
        request: &Request,
    ) -> Result<QueryResults, DriverError>
    where
        S: Session + ?Sized,
    {
        let start = Instant::now();
        let mut attempts = 0;
        loop {
            attempts += 1;
            let err = match session.execute(request).await {
                Ok(results) => {
                    self.tracker.record_success(start.elapsed());
                    if attempts > 1 {
                        debug!("'{}' succeeded after {} attempts", request.sql(), attempts);
                    }
                    return Ok(results);
                }
                Err(err) => err,
            };
            match err.kind() {
                ErrorKind::Transient if !self.policy.exhausted(attempts) => {
                    warn!(
                        "error '{}' executing '{}', retrying",
                        err,
                        request.sql()
                    );
                    let delay = self.policy.backoff(attempts);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                ErrorKind::Transient => {
                    self.tracker.record_failure();
                    return Err(DriverError::RetriesExhausted {
                        attempts,
                        last: Box::new(err),
                    });
                }
                ErrorKind::AllTargetsUnreachable | ErrorKind::Fatal => {
                    self.tracker.record_failure();
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_retries_immediately() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::ZERO);
        assert_eq!(policy.backoff(100), Duration::ZERO);
        assert!(!policy.exhausted(u32::MAX));
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let policy = RetryPolicy::unbounded()
            .with_backoff(Duration::from_millis(10), Duration::from_millis(50));
        assert_eq!(policy.backoff(1), Duration::from_millis(10));
        assert_eq!(policy.backoff(2), Duration::from_millis(20));
        assert_eq!(policy.backoff(3), Duration::from_millis(40));
        assert_eq!(policy.backoff(4), Duration::from_millis(50));
        assert_eq!(policy.backoff(40), Duration::from_millis(50));
    }

    #[test]
    fn budget_counts_attempts() {
        let policy = RetryPolicy::unbounded().with_max_attempts(3);
        assert!(!policy.exhausted(2));
        assert!(policy.exhausted(3));
    }
}
