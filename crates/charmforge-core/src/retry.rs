//! Retry policies.

use std::time::Duration;

use crate::tool::ToolError;

/// How a failed attempt should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Worth another attempt.
    Transient,
    /// Give up immediately.
    Fatal,
}

/// Bounded retry policy for a single call site.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Sleep between attempts.
    pub delay: Duration,
    /// Decides which failures are retried.
    pub classify: fn(&ToolError) -> FailureClass,
}

impl RetryPolicy {
    pub const DOWNLOAD_ATTEMPTS: u32 = 15;
    pub const DOWNLOAD_DELAY: Duration = Duration::from_secs(60);
    pub const ATTACH_ATTEMPTS: u32 = 10;

    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            classify: generic_failure_is_transient,
        }
    }

    /// Layer downloads: network flakiness, so wait between attempts.
    pub fn download() -> Self {
        Self::new(Self::DOWNLOAD_ATTEMPTS, Self::DOWNLOAD_DELAY)
    }

    /// Resource attachment: store lock contention clears immediately.
    pub fn attach() -> Self {
        Self::new(Self::ATTACH_ATTEMPTS, Duration::ZERO)
    }

    pub fn with_classifier(mut self, classify: fn(&ToolError) -> FailureClass) -> Self {
        self.classify = classify;
        self
    }

    pub fn classify(&self, error: &ToolError) -> FailureClass {
        (self.classify)(error)
    }
}

/// Only the generic exit status 1 is transient; every other failure shape
/// (launch errors, other statuses, signals, daemon errors) is fatal.
pub fn generic_failure_is_transient(error: &ToolError) -> FailureClass {
    if error.is_generic_failure() {
        FailureClass::Transient
    } else {
        FailureClass::Fatal
    }
}
