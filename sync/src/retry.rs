//! Bounded retry with exponential backoff for single transfers

use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use tracing::{debug, warn};

use crate::diff::PlanItem;
use crate::error::{BackendError, ErrorKind};

/// Stateless retry policy; attempt state lives on the [`PlanItem`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
        }
    }

    /// Base delay doubles after every failure, capped at `max_delay`
    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay.max(base_delay);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn backoff(&self) -> ExponentialBackoff {
        let mut backoff = ExponentialBackoff {
            initial_interval: self.base_delay,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: self.max_delay,
            max_elapsed_time: None,
            ..Default::default()
        };
        backoff.reset();
        backoff
    }

    /// Run `operation` until it succeeds, fails permanently, or runs out of attempts.
    ///
    /// Every attempt increments `item.attempts`. On terminal failure
    /// `item.last_error` is `SyncFailed` (transient failures exhausted) or
    /// `PermanentFailure`, and the same kind is returned.
    pub async fn execute<T, F, Fut, N>(
        &self,
        item: &mut PlanItem,
        mut operation: F,
        mut on_retry: N,
    ) -> Result<T, ErrorKind>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
        N: FnMut(&PlanItem, Duration, &BackendError),
    {
        let mut backoff = self.backoff();

        loop {
            item.attempts += 1;

            let err = match operation().await {
                Ok(value) => {
                    item.last_error = None;
                    item.last_message = None;
                    return Ok(value);
                }
                Err(err) => err,
            };

            item.last_message = Some(err.to_string());

            if !err.is_retryable() {
                warn!(path = %item.path, attempt = item.attempts, error = %err, "permanent failure, not retrying");
                item.last_error = Some(ErrorKind::PermanentFailure);
                return Err(ErrorKind::PermanentFailure);
            }

            if item.attempts >= self.max_attempts {
                warn!(path = %item.path, attempts = item.attempts, error = %err, "giving up after transient failures");
                item.last_error = Some(ErrorKind::SyncFailed);
                return Err(ErrorKind::SyncFailed);
            }

            item.last_error = Some(ErrorKind::Transient);
            let delay = backoff.next_backoff().unwrap_or(self.max_delay);
            debug!(path = %item.path, attempt = item.attempts, delay_ms = delay.as_millis() as u64, error = %err, "retrying");
            on_retry(item, delay, &err);
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::PlanAction;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts).with_delays(Duration::from_millis(1), Duration::from_millis(4))
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let mut item = PlanItem::new("c.txt", PlanAction::Upload, 1);

        let result = fast_policy(3)
            .execute(
                &mut item,
                || async {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(BackendError::Transient("503".into()))
                    } else {
                        Ok(())
                    }
                },
                |_, _, _| {},
            )
            .await;

        assert!(result.is_ok());
        assert_eq!(item.attempts, 3);
        assert_eq!(item.last_error, None);
    }

    #[tokio::test]
    async fn test_exhausts_attempts() {
        let mut item = PlanItem::new("d.txt", PlanAction::Upload, 1);
        let mut retries = Vec::new();

        let result: Result<(), _> = fast_policy(3)
            .execute(
                &mut item,
                || async { Err(BackendError::Transient("timeout".into())) },
                |item, delay, _| retries.push((item.attempts, delay)),
            )
            .await;

        assert_eq!(result, Err(ErrorKind::SyncFailed));
        assert_eq!(item.attempts, 3);
        assert_eq!(item.last_error, Some(ErrorKind::SyncFailed));
        assert!(item.last_message.as_deref().unwrap().contains("timeout"));
        assert_eq!(
            retries,
            vec![(1, Duration::from_millis(1)), (2, Duration::from_millis(2))]
        );
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let calls = AtomicU32::new(0);
        let mut item = PlanItem::new("secret.txt", PlanAction::Delete, 0);

        let result: Result<(), _> = fast_policy(5)
            .execute(
                &mut item,
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(BackendError::Permanent("403 forbidden".into()))
                },
                |_, _, _| panic!("must not retry"),
            )
            .await;

        assert_eq!(result, Err(ErrorKind::PermanentFailure));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(item.attempts, 1);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(10).with_delays(Duration::from_millis(100), Duration::from_millis(350));
        let mut backoff = policy.backoff();
        let delays: Vec<_> = (0..4).map(|_| backoff.next_backoff().unwrap()).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(350),
                Duration::from_millis(350),
            ]
        );
    }

    #[test]
    fn test_zero_attempts_clamped() {
        assert_eq!(RetryPolicy::new(0).max_attempts(), 1);
    }
}
