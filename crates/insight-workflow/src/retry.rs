//! Exponential backoff with jitter for transient LM failures.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use insight_core::LmError;

/// Retry policy for one phase: at most `max_attempts` tries, doubling the
/// delay from `initial` up to `max`.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            initial: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    /// Backoff before the retry following `attempt` (1-based), with up to
    /// 25% random jitter added.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let base = self
            .initial
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.max);
        let jitter = rand::thread_rng().gen_range(0.0..=0.25);
        base.mul_f64(1.0 + jitter)
    }
}

/// Why a retried operation gave up.
#[derive(Debug)]
pub enum RetryError {
    /// Cancelled while waiting or between attempts.
    Cancelled,
    /// The last attempt failed; retries (if any) are exhausted.
    Exhausted { error: LmError, attempts: u32 },
}

/// Run `op` until it succeeds, retrying transient failures per `policy`.
///
/// Hard failures and exhausted budgets return immediately with the attempt
/// count; cancellation wins over any pending backoff sleep.
pub async fn with_retry<T, Fut, Op>(
    policy: RetryPolicy,
    cancel: &CancellationToken,
    mut op: Op,
) -> Result<(T, u32), RetryError>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LmError>>,
{
    let mut attempt = 1u32;
    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }
        match op().await {
            Ok(value) => return Ok((value, attempt)),
            Err(error) if error.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                tracing::debug!(attempt, ?delay, error = %error, "transient failure, backing off");
                tokio::select! {
                    () = cancel.cancelled() => return Err(RetryError::Cancelled),
                    () = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
            Err(error) => {
                return Err(RetryError::Exhausted {
                    error,
                    attempts: attempt,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial: Duration::from_millis(1),
            max: Duration::from_millis(4),
        }
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let cancel = CancellationToken::new();
        let (value, attempts) = with_retry(policy(), &cancel, move || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(LmError::transient("503").with_status(503))
                } else {
                    Ok("done")
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(value, "done");
        assert_eq!(attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_errors_fail_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let cancel = CancellationToken::new();
        let err = with_retry::<&str, _, _>(policy(), &cancel, move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(LmError::fatal("bad auth").with_status(401))
            }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, RetryError::Exhausted { attempts: 1, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn budget_exhaustion_reports_attempt_count() {
        let cancel = CancellationToken::new();
        let err = with_retry::<&str, _, _>(policy(), &cancel, || async {
            Err(LmError::transient("timeout"))
        })
        .await
        .unwrap_err();
        match err {
            RetryError::Exhausted { error, attempts } => {
                assert_eq!(attempts, 3);
                assert!(error.is_transient());
            }
            RetryError::Cancelled => panic!("unexpected cancel"),
        }
    }

    #[tokio::test]
    async fn cancellation_wins_over_backoff() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = with_retry::<&str, _, _>(policy(), &cancel, || async {
            Err(LmError::transient("should not matter"))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, RetryError::Cancelled));
    }

    #[test]
    fn delay_doubles_up_to_the_ceiling() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial: Duration::from_secs(2),
            max: Duration::from_secs(60),
        };
        // Jitter adds at most 25%.
        assert!(policy.delay_for(1) >= Duration::from_secs(2));
        assert!(policy.delay_for(1) <= Duration::from_millis(2500));
        assert!(policy.delay_for(2) >= Duration::from_secs(4));
        assert!(policy.delay_for(6) >= Duration::from_secs(60));
        assert!(policy.delay_for(6) <= Duration::from_secs(75));
    }
}
