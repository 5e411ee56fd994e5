use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::GenerationError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 500,
            max_backoff_ms: 5000,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: usize, initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_retries,
            initial_backoff_ms,
            max_backoff_ms,
        }
    }

    pub fn none() -> Self {
        Self::new(0, 0, 0)
    }

    /// Retry a generation call with exponential backoff. Errors that are not
    /// retryable are returned on the first attempt.
    pub async fn retry<F, Fut, T>(&self, operation_name: &str, mut f: F) -> Result<T, GenerationError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, GenerationError>>,
    {
        let mut attempt = 0;
        let mut backoff = Duration::from_millis(self.initial_backoff_ms);
        let max_backoff = Duration::from_millis(self.max_backoff_ms);

        loop {
            match f().await {
                Ok(result) => {
                    if attempt > 0 {
                        info!(
                            operation = operation_name,
                            attempts = attempt + 1,
                            "Operation succeeded after retries"
                        );
                    }
                    return Ok(result);
                }
                Err(e) => {
                    attempt += 1;
                    if !e.is_retryable() || attempt > self.max_retries {
                        warn!(
                            operation = operation_name,
                            attempts = attempt,
                            error = %e,
                            "Operation failed"
                        );
                        return Err(e);
                    }

                    warn!(
                        operation = operation_name,
                        attempt = attempt,
                        max_retries = self.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Operation failed, retrying"
                    );

                    sleep(backoff).await;
                    backoff = std::cmp::min(backoff * 2, max_backoff);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let policy = RetryPolicy::new(3, 100, 1000);

        let result = policy
            .retry("test", move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(GenerationError::Timeout(Duration::from_secs(1)))
                } else {
                    Ok("done")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let policy = RetryPolicy::new(2, 10, 10);

        let result: Result<(), _> = policy
            .retry("test", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(GenerationError::Timeout(Duration::from_secs(1)))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_fast() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;

        let result: Result<(), _> = RetryPolicy::default()
            .retry("test", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(GenerationError::Status {
                    backend: "tgi",
                    status: 400,
                    body: "bad request".into(),
                })
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
