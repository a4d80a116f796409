// src/retry/strategy.rs

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryStrategy {
    config: RetryConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    NoRetry,
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("maximum retry attempts ({attempts}) exceeded: {last}")]
    MaxAttemptsExceeded { attempts: u32, last: E },

    #[error("non-retryable error: {0}")]
    NonRetryable(E),
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::MaxAttemptsExceeded { last, .. } => last,
            RetryError::NonRetryable(err) => err,
        }
    }
}

impl RetryStrategy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    /// Execute a function, retrying every error
    pub async fn execute<F, Fut, T, E>(&self, f: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.execute_with_decision(f, |_| RetryDecision::Retry).await
    }

    /// Execute with custom retry decision logic. `f` receives the 1-based attempt number.
    pub async fn execute_with_decision<F, Fut, T, E>(
        &self,
        mut f: F,
        should_retry: impl Fn(&E) -> RetryDecision,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let max_attempts = self.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;

            match f(attempt).await {
                Ok(result) => return Ok(result),
                Err(error) => {
                    if should_retry(&error) == RetryDecision::NoRetry {
                        debug!("Error is non-retryable: {}", error);
                        return Err(RetryError::NonRetryable(error));
                    }

                    if attempt >= max_attempts {
                        warn!("Retry failed after {} attempts: {}", attempt, error);
                        return Err(RetryError::MaxAttemptsExceeded {
                            attempts: attempt,
                            last: error,
                        });
                    }

                    warn!(
                        "Attempt {}/{} failed: {}. Retrying in {:?}",
                        attempt, max_attempts, error, self.config.delay
                    );

                    sleep(self.config.delay).await;
                }
            }
        }
    }
}
