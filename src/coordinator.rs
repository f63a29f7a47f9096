//! Backoff coordinator: turns quota denials into targeted waits.
//!
//! When a provider wrapper fails because our own counter refused the
//! reservation, retrying immediately would only hammer a window that is
//! already full. The coordinator instead asks the counter how long the
//! current window has left, sleeps past that boundary, and tries again,
//! up to a cap. Every other error propagates untouched on the first
//! attempt. The sleep happens inside the caller's task, so cancelling the
//! task aborts the wait.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::client::CounterClient;
use crate::provider::{ProviderError, ProviderResult};

/// Slack added on top of the reported time-to-reset, absorbing clock skew
/// between the worker and the counter.
pub const RESET_BUFFER_SECS: u64 = 2;

/// Which counter group's clock governs the wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaGroup {
    Completion,
    Embedding,
    Transcription,
}

impl QuotaGroup {
    async fn seconds_until_reset(&self, client: &CounterClient) -> Option<u64> {
        let result = match self {
            QuotaGroup::Completion => client.status().await.map(|s| s.reset_time_seconds),
            QuotaGroup::Embedding => client
                .status_embedding()
                .await
                .map(|s| s.reset_time_seconds),
            QuotaGroup::Transcription => client
                .status_transcription()
                .await
                .map(|s| s.reset_time_seconds),
        };
        match result {
            Ok(seconds) => Some(seconds),
            Err(err) => {
                warn!("could not fetch counter status for retry wait: {err}");
                None
            }
        }
    }
}

/// Run `op` up to `max_attempts` times, sleeping to the end of the current
/// window after each quota denial. The wait is re-queried on every retry:
/// the window may already have rolled while the previous attempt ran.
pub async fn run<T, F, Fut>(
    client: &CounterClient,
    group: QuotaGroup,
    max_attempts: u32,
    mut op: F,
) -> ProviderResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProviderResult<T>>,
{
    let max_attempts = max_attempts.max(1);
    let mut last_denial = None;

    for attempt in 1..=max_attempts {
        debug!("attempt {attempt}/{max_attempts}");
        match op().await {
            Ok(value) => return Ok(value),
            Err(ProviderError::QuotaDenied {
                message,
                seconds_until_reset,
            }) => {
                if attempt == max_attempts {
                    last_denial = Some(ProviderError::QuotaDenied {
                        message,
                        seconds_until_reset,
                    });
                    break;
                }
                // Prefer a fresh status read; the denial's own hint is the
                // fallback when the status call fails.
                let wait = match group.seconds_until_reset(client).await {
                    Some(seconds) => seconds + RESET_BUFFER_SECS,
                    None => match seconds_until_reset {
                        Some(seconds) => seconds + RESET_BUFFER_SECS,
                        None => {
                            return Err(ProviderError::QuotaDenied {
                                message,
                                seconds_until_reset,
                            })
                        }
                    },
                };
                info!(
                    "quota denied ({message}); waiting {wait}s for the window to roll \
                     (attempt {attempt}/{max_attempts})"
                );
                tokio::time::sleep(Duration::from_secs(wait)).await;
            }
            Err(other) => return Err(other),
        }
    }

    Err(last_denial.unwrap_or_else(|| ProviderError::QuotaDenied {
        message: "quota denied".to_string(),
        seconds_until_reset: None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn denial() -> ProviderError {
        ProviderError::QuotaDenied {
            message: "Token limit would be exceeded. Available: 0, Requested: 10".to_string(),
            seconds_until_reset: Some(0),
        }
    }

    #[tokio::test]
    async fn success_needs_one_attempt() {
        let client = CounterClient::new("http://127.0.0.1:1", "test").unwrap();
        let calls = AtomicU32::new(0);
        let result = run(&client, QuotaGroup::Completion, 3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, ProviderError>(7) }
        })
        .await
        .unwrap();
        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_quota_errors_propagate_immediately() {
        let client = CounterClient::new("http://127.0.0.1:1", "test").unwrap();
        let calls = AtomicU32::new(0);
        let err = run(&client, QuotaGroup::Completion, 3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<(), _>(ProviderError::Api {
                    status: 500,
                    message: "boom".to_string(),
                })
            }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ProviderError::Api { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn quota_denials_retry_until_the_cap() {
        // The status endpoint is unreachable, so the coordinator falls back
        // to the denial's own reset hint (zero seconds, plus the buffer).
        let client = CounterClient::new("http://127.0.0.1:1", "test").unwrap();
        let calls = AtomicU32::new(0);
        let err = run(&client, QuotaGroup::Completion, 3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(denial()) }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ProviderError::QuotaDenied { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_after_one_denial() {
        let client = CounterClient::new("http://127.0.0.1:1", "test").unwrap();
        let calls = AtomicU32::new(0);
        let result = run(&client, QuotaGroup::Completion, 3, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(denial())
                } else {
                    Ok(99)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 99);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
