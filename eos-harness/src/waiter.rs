//! Bounded polling.
//!
//! External state (liveness, registration, progress, counts) is only
//! observable by asking again. Every wait in the harness goes through
//! [`Waiter::wait_until`], which never blocks past its deadline.

use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use crate::error::{HarnessError, HarnessResult};

/// Default interval between predicate evaluations.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Polls predicates until they hold or a deadline passes.
#[derive(Debug, Clone, Copy)]
pub struct Waiter {
    poll_interval: Duration,
}

impl Default for Waiter {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl Waiter {
    /// Creates a waiter polling at the given interval.
    #[must_use]
    pub const fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    /// Returns the configured poll interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Polls `predicate` until it returns true or `timeout` elapses.
    ///
    /// The predicate is evaluated once more at the deadline, so a condition
    /// that becomes true during the final sleep still counts. `describe` is
    /// only called on timeout and should report the current shortfall.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` carrying the description and the time waited.
    pub async fn wait_until<P, D>(
        &self,
        mut predicate: P,
        timeout: Duration,
        describe: D,
    ) -> HarnessResult<()>
    where
        P: FnMut() -> bool,
        D: FnOnce() -> String,
    {
        let started = Instant::now();
        let deadline = started + timeout;
        // Never sleep through more than a tenth of the bound.
        let interval = self
            .poll_interval
            .min(timeout / 10)
            .max(Duration::from_millis(1));

        loop {
            if predicate() {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                let description = describe();
                trace!(waited = ?now - started, %description, "wait timed out");
                return Err(HarnessError::Timeout {
                    description,
                    waited: now - started,
                });
            }
            tokio::time::sleep(interval.min(deadline - now)).await;
        }
    }
}

/// Polls with the default interval. See [`Waiter::wait_until`].
///
/// # Errors
///
/// Returns `Timeout` carrying the description and the time waited.
pub async fn wait_until<P, D>(predicate: P, timeout: Duration, describe: D) -> HarnessResult<()>
where
    P: FnMut() -> bool,
    D: FnOnce() -> String,
{
    Waiter::default().wait_until(predicate, timeout, describe).await
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_returns_once_predicate_holds() {
        let calls = Cell::new(0u32);
        let waiter = Waiter::new(Duration::from_millis(10));

        waiter
            .wait_until(
                || {
                    calls.set(calls.get() + 1);
                    calls.get() >= 5
                },
                Duration::from_secs(1),
                || "never".to_string(),
            )
            .await
            .unwrap();

        assert_eq!(calls.get(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_with_description() {
        let waiter = Waiter::new(Duration::from_millis(10));
        let acked = 40;

        let err = waiter
            .wait_until(
                || false,
                Duration::from_secs(2),
                || format!("acknowledged {acked} of 100"),
            )
            .await
            .unwrap_err();

        match err {
            HarnessError::Timeout {
                description,
                waited,
            } => {
                assert_eq!(description, "acknowledged 40 of 100");
                assert!(waited >= Duration::from_secs(2));
                assert!(waited < Duration::from_secs(3));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_description_is_rendered_lazily() {
        let progress = Cell::new(0u32);
        let err = Waiter::new(Duration::from_millis(50))
            .wait_until(
                || {
                    progress.set(progress.get() + 1);
                    false
                },
                Duration::from_millis(500),
                || format!("progress {}", progress.get()),
            )
            .await
            .unwrap_err();

        // The description reflects the state at the deadline, not at call time.
        assert!(!err.to_string().contains("progress 0"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_is_capped_by_timeout() {
        // A 10s poll interval must not overshoot a 100ms bound.
        let started = Instant::now();
        let result = Waiter::new(Duration::from_secs(10))
            .wait_until(|| false, Duration::from_millis(100), String::new)
            .await;
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_still_checks_once() {
        let result = wait_until(|| true, Duration::ZERO, String::new).await;
        assert!(result.is_ok());
    }
}
