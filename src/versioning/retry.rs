//! Timeouts and retries around server calls

use crate::core::config::NetworkConfig;
use crate::core::error::{NetworkError, Result};
use std::future::Future;
use tracing::warn;

/// Run `call` with the configured timeout, retrying transient failures
///
/// Only errors for which [`crate::Error::is_retryable`] holds are retried,
/// at most `max_retries` times, with a linearly growing backoff. The closure
/// is invoked once per attempt so it must rebuild its request (commits reuse
/// their request token, which keeps retries idempotent).
pub async fn with_retry<T, F, Fut>(config: &NetworkConfig, what: &str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        let outcome = match tokio::time::timeout(config.request_timeout, call()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(NetworkError::Timeout.into()),
        };
        match outcome {
            Err(e) if e.is_retryable() && attempt < config.max_retries => {
                attempt += 1;
                warn!(call = what, attempt, max = config.max_retries, error = %e, "Retrying server call");
                tokio::time::sleep(config.retry_backoff * attempt).await;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::Error;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn config(max_retries: u32) -> NetworkConfig {
        NetworkConfig {
            request_timeout: Duration::from_millis(50),
            max_retries,
            retry_backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_retries_transient_errors() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = with_retry(&config(3), "test", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Error::from(NetworkError::Connection("reset".into())))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<()> = with_retry(&config(2), "test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::from(NetworkError::Connection("down".into())))
        })
        .await;
        assert!(result.unwrap_err().is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_conflicts_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<()> = with_retry(&config(5), "test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), Error>(Error::Conflict { base: 0, head: 1 })
        })
        .await;
        assert!(result.unwrap_err().is_conflict());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slow_calls_time_out() {
        let result: Result<()> = with_retry(&config(0), "test", || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<(), Error>(())
        })
        .await;
        assert!(matches!(result, Err(Error::Network(NetworkError::Timeout))));
    }
}
