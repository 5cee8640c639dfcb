//! Bounded retry of external operations.

use charmforge_core::{Error, FailureClass, Result, RetryPolicy, ToolError, ToolResult};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// What happened on a single attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "error", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    /// Transient failure, another attempt follows.
    Retrying(ToolError),
    /// Transient failure on the last allowed attempt.
    Exhausted(ToolError),
    /// Failure the policy does not retry.
    Fatal(ToolError),
}

/// One attempt of a retried operation, reported as it happens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    pub operation: String,
    /// 1-based attempt number.
    pub attempt: u32,
    pub max_attempts: u32,
    pub outcome: AttemptOutcome,
}

type AttemptObserver = Arc<dyn Fn(&AttemptRecord) + Send + Sync>;

/// Runs operations under a [`RetryPolicy`].
#[derive(Clone, Default)]
pub struct RetryingExecutor {
    observer: Option<AttemptObserver>,
}

impl std::fmt::Debug for RetryingExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingExecutor")
            .field("observed", &self.observer.is_some())
            .finish()
    }
}

impl RetryingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report every attempt to `observer` in addition to the log.
    pub fn with_observer<F>(observer: F) -> Self
    where
        F: Fn(&AttemptRecord) + Send + Sync + 'static,
    {
        Self {
            observer: Some(Arc::new(observer)),
        }
    }

    /// Run `op` until it succeeds, fails fatally, or the policy's attempt
    /// bound is reached. Transient failures sleep `policy.delay` before the
    /// next attempt.
    pub async fn execute<T, F, Fut>(
        &self,
        operation: &str,
        policy: &RetryPolicy,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ToolResult<T>>,
    {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let error = match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(operation, attempt, "Operation succeeded after retrying");
                    }
                    self.observe(operation, attempt, max_attempts, AttemptOutcome::Succeeded);
                    return Ok(value);
                }
                Err(error) => error,
            };

            match policy.classify(&error) {
                FailureClass::Fatal => {
                    debug!(operation, attempt, error = %error, "Failure is not retryable");
                    self.observe(
                        operation,
                        attempt,
                        max_attempts,
                        AttemptOutcome::Fatal(error.clone()),
                    );
                    return Err(Error::FatalToolFailure(error));
                }
                FailureClass::Transient if attempt >= max_attempts => {
                    warn!(operation, attempts = attempt, error = %error, "Retry attempts exhausted");
                    self.observe(
                        operation,
                        attempt,
                        max_attempts,
                        AttemptOutcome::Exhausted(error.clone()),
                    );
                    return Err(Error::ExhaustedRetries {
                        operation: operation.to_string(),
                        attempts: attempt,
                        last: Box::new(Error::TransientToolFailure(error)),
                    });
                }
                FailureClass::Transient => {
                    warn!(
                        operation,
                        error = %error,
                        "Problem running {}, retrying [{}/{}]",
                        operation,
                        attempt,
                        max_attempts
                    );
                    self.observe(
                        operation,
                        attempt,
                        max_attempts,
                        AttemptOutcome::Retrying(error),
                    );
                    if !policy.delay.is_zero() {
                        sleep(policy.delay).await;
                    }
                }
            }
        }
    }

    fn observe(&self, operation: &str, attempt: u32, max_attempts: u32, outcome: AttemptOutcome) {
        if let Some(observer) = &self.observer {
            observer(&AttemptRecord {
                operation: operation.to_string(),
                attempt,
                max_attempts,
                outcome,
            });
        }
    }
}
