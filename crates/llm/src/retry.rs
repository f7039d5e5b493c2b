//! Bounded retry with exponential backoff for transient LLM failures.

use std::future::Future;
use std::time::Duration;

use steward_core::LlmError;
use tracing::warn;

/// Base delay before the first retry; doubles per attempt.
const BASE_DELAY_MS: u64 = 500;

/// Run `op` up to `1 + max_retries` times, backing off between attempts.
///
/// Only errors whose [`LlmError::is_retryable`] is true are retried; anything
/// else surfaces immediately. When retries are exhausted the last error is
/// returned.
pub async fn with_retries<F, Fut, T>(max_retries: u32, mut op: F) -> Result<T, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < max_retries => {
                let delay = Duration::from_millis(BASE_DELAY_MS << attempt);
                warn!(
                    attempt = attempt + 1,
                    max = max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient LLM error, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_retries(3, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(LlmError::Network("flaky".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_surface_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retries(2, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(LlmError::Api {
                    status_code: 429,
                    message: "rate limited".into(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3); // initial + 2 retries
    }

    #[tokio::test]
    async fn structural_errors_do_not_retry() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retries(5, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(LlmError::InvalidResponse("bad shape".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
