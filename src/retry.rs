//! Exponential backoff for transient I/O failures.
//!
//! Distinct from the backoff coordinator: quota denials get a targeted
//! sleep to the window boundary, while an unreachable counter, a provider
//! 5xx, or a broker blip gets a plain exponential retry here, inside the
//! worker. The caller supplies the predicate deciding which errors count
//! as transient; everything else propagates on the first attempt.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Run `op`, retrying errors `is_transient` accepts with doubling delays
/// up to the policy's cap. Non-transient errors and the last transient
/// error after the retries are spent are returned as-is.
pub async fn retry_transient<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    what: &str,
    is_transient: P,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut delay = policy.base_delay;
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.max_retries && is_transient(&err) => {
                attempt += 1;
                warn!(
                    "{what} failed (attempt {attempt}/{}): {err}; retrying in {:?}",
                    policy.max_retries, delay
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(policy.max_delay);
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let result = retry_transient(&policy, "flaky op", |_| true, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("blip")
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_the_last_retry() {
        let policy = RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
        };
        let calls = AtomicU32::new(0);
        let err = retry_transient(&policy, "doomed op", |_| true, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>("still broken") }
        })
        .await
        .unwrap_err();
        assert_eq!(err, "still broken");
        assert_eq!(calls.load(Ordering::SeqCst), 3); // first try + 2 retries
    }

    #[tokio::test]
    async fn non_transient_errors_fail_on_the_first_attempt() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let err = retry_transient(
            &policy,
            "fatal op",
            |err: &&str| *err == "blip",
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>("bad request") }
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err, "bad request");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
