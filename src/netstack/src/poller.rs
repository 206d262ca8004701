//! Retry-until-ready polling with a fixed interval.
//!
//! The default policy never gives up, matching a lab run where an operator
//! watches the log and interrupts a hung wait. Callers opt into a bound with
//! `max_attempts` or `deadline`, which surfaces as `ProvisionError::PollTimeout`.
use crate::error::{ProvisionError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub max_attempts: Option<u32>,
    pub deadline: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::unbounded(Duration::from_secs(2))
    }
}

impl RetryPolicy {
    pub fn unbounded(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
            deadline: None,
            cancel: None,
        }
    }

    pub fn bounded(interval: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            ..Self::unbounded(interval)
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }
}

/// Call `check` until it yields a value. `Ok(None)` means not yet ready;
/// errors end the poll immediately.
pub async fn poll_until<T, F, Fut>(what: &str, policy: &RetryPolicy, mut check: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let started = Instant::now();
    let mut attempts: u32 = 0;

    loop {
        if policy.is_cancelled() {
            return Err(ProvisionError::Cancelled(what.to_string()));
        }

        attempts += 1;
        if let Some(value) = check().await? {
            tracing::info!("[ReadinessPoller] {} ready after {} attempt(s)", what, attempts);
            return Ok(value);
        }

        if policy.max_attempts.is_some_and(|max| attempts >= max)
            || policy
                .deadline
                .is_some_and(|deadline| started.elapsed() + policy.interval > deadline)
        {
            tracing::warn!(
                "[ReadinessPoller] Giving up on {} after {} attempt(s)",
                what,
                attempts
            );
            return Err(ProvisionError::PollTimeout {
                what: what.to_string(),
                attempts,
            });
        }

        tracing::debug!(
            "[ReadinessPoller] {} not ready (attempt {}), retrying in {}ms",
            what,
            attempts,
            policy.interval.as_millis()
        );

        match &policy.cancel {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => {
                        return Err(ProvisionError::Cancelled(what.to_string()));
                    }
                    _ = tokio::time::sleep(policy.interval) => {}
                }
            }
            None => tokio::time::sleep(policy.interval).await,
        }
    }
}

/// Boolean form of [`poll_until`].
pub async fn poll_until_ready<F, Fut>(what: &str, policy: &RetryPolicy, mut check: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    poll_until(what, policy, || {
        let fut = check();
        async move { Ok::<_, ProvisionError>(fut.await?.then_some(())) }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[tokio::test(start_paused = true)]
    async fn test_calls_exactly_n_times() {
        for n in 1..=5u32 {
            let calls = Cell::new(0u32);
            let policy = RetryPolicy::unbounded(Duration::from_secs(2));
            poll_until_ready("counter", &policy, || {
                calls.set(calls.get() + 1);
                let ready = calls.get() == n;
                async move { Ok(ready) }
            })
            .await
            .unwrap();
            assert_eq!(calls.get(), n);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleeps_only_between_attempts() {
        let calls = Cell::new(0u32);
        let policy = RetryPolicy::unbounded(Duration::from_secs(2));
        let start = Instant::now();
        poll_until_ready("counter", &policy, || {
            calls.set(calls.get() + 1);
            let ready = calls.get() == 3;
            async move { Ok(ready) }
        })
        .await
        .unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_policy_times_out() {
        let calls = Cell::new(0u32);
        let policy = RetryPolicy::bounded(Duration::from_millis(100), 4);
        let err = poll_until_ready("never", &policy, || {
            calls.set(calls.get() + 1);
            async { Ok(false) }
        })
        .await
        .unwrap_err();
        assert_eq!(calls.get(), 4);
        assert!(matches!(err, ProvisionError::PollTimeout { attempts: 4, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_bounds_unbounded_attempts() {
        let policy =
            RetryPolicy::unbounded(Duration::from_secs(1)).with_deadline(Duration::from_secs(5));
        let err = poll_until_ready("never", &policy, || async { Ok(false) })
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::PollTimeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_errors_propagate() {
        let calls = Cell::new(0u32);
        let policy = RetryPolicy::default();
        let err = poll_until("mac", &policy, || {
            calls.set(calls.get() + 1);
            async { Err::<Option<u8>, _>(ProvisionError::malformed("mac", "bad")) }
        })
        .await
        .unwrap_err();
        assert_eq!(calls.get(), 1);
        assert!(matches!(err, ProvisionError::MalformedOutput { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_unbounded_poll() {
        let token = CancellationToken::new();
        let policy = RetryPolicy::default().with_cancel(token.clone());
        let canceller = token.clone();
        let calls = Cell::new(0u32);
        let err = poll_until_ready("instance", &policy, || {
            calls.set(calls.get() + 1);
            if calls.get() == 3 {
                canceller.cancel();
            }
            async { Ok(false) }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ProvisionError::Cancelled(_)));
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_yields_extracted_value() {
        let calls = Cell::new(0u32);
        let value = poll_until("handle", &RetryPolicy::default(), || {
            calls.set(calls.get() + 1);
            let out = (calls.get() >= 2).then_some(42u64);
            async move { Ok(out) }
        })
        .await
        .unwrap();
        assert_eq!(value, 42);
    }
}
