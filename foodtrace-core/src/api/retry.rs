//! Retry policy for HTTP calls.
//!
//! The base client retries with a flat delay: every retry waits the same
//! `delay`. Callers wanting escalating backoff pass their own `retries` and
//! `retry_delay` per request.

use metrics::counter;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::AppError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (not including the initial attempt).
    pub max_retries: u32,
    /// Wait between two attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Whether a failure on `attempt` (zero-based) gets another try.
    pub fn should_retry(&self, error: &AppError, attempt: u32) -> bool {
        attempt < self.max_retries && error.is_retryable()
    }
}

/// Runs `f` until it succeeds, fails permanently or the budget is spent.
///
/// `f` receives the zero-based attempt number.
pub async fn retry_call<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut f: F,
) -> Result<T, AppError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let mut attempt = 0;

    loop {
        match f(attempt).await {
            Ok(result) => {
                if attempt > 0 {
                    info!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        "Request succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(error) => {
                if !error.is_retryable() {
                    warn!(
                        operation = operation_name,
                        error_type = %error.error_type,
                        code = %error.code,
                        "Request failed with non-retryable error"
                    );
                    return Err(error);
                }

                if attempt >= policy.max_retries {
                    warn!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        error_type = %error.error_type,
                        message = %error.message,
                        "Request failed after max retries"
                    );
                    return Err(error);
                }

                warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    error_type = %error.error_type,
                    message = %error.message,
                    delay_ms = policy.delay.as_millis() as u64,
                    "Request failed, retrying after delay"
                );
                counter!("api_client_retries_total", "error_type" => error.error_type.as_str())
                    .increment(1);

                sleep(policy.delay).await;
                attempt += 1;
            }
        }
    }
}
