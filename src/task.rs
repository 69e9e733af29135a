//! Fixed-interval polling of asynchronous vendor tasks.

use crate::error::{DriverError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// How often and for how long to poll a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay between status checks.
    pub interval: Duration,
    /// Wall-clock budget for the whole poll loop.
    pub timeout: Duration,
    /// Optional cap on the number of status checks.
    pub max_attempts: Option<u32>,
    /// Sleep one interval before the first status check.
    pub delay_first: bool,
}

impl PollPolicy {
    /// Creates a policy with the given interval and timeout.
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            max_attempts: None,
            delay_first: false,
        }
    }

    /// Caps the number of status checks.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Sleeps one interval before the first status check.
    pub fn with_delay_first(mut self, delay_first: bool) -> Self {
        self.delay_first = delay_first;
        self
    }

    /// Replaces the interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Replaces the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Observed state of a vendor task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskState<T> {
    /// Still queued or running.
    Pending {
        /// Vendor status string.
        status: String,
        /// Progress percentage, when reported.
        progress: Option<u32>,
    },
    /// Finished successfully.
    Succeeded(T),
    /// Reached a terminal failure or cancel status.
    Failed {
        /// Vendor status string.
        status: String,
        /// Failure reason.
        message: String,
    },
}

impl<T> TaskState<T> {
    /// Pending state without progress.
    pub fn pending(status: impl Into<String>) -> Self {
        Self::Pending {
            status: status.into(),
            progress: None,
        }
    }

    /// Failed state.
    pub fn failed(status: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            status: status.into(),
            message: message.into(),
        }
    }
}

/// Polls `fetch` until the task succeeds, fails, or the policy runs out.
///
/// Each status check only gets what is left of the timeout, so a request
/// that never answers still ends in [`DriverError::Timeout`]. Errors
/// returned by `fetch` end the loop immediately.
pub async fn poll_until_done<T, F, Fut>(
    policy: PollPolicy,
    label: &str,
    task_id: &str,
    mut fetch: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<TaskState<T>>>,
{
    let start = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        if policy.delay_first || attempt > 0 {
            tokio::time::sleep(policy.interval).await;
        }

        if start.elapsed() > policy.timeout {
            return Err(DriverError::Timeout(policy.timeout));
        }
        if policy.max_attempts.is_some_and(|max| attempt >= max) {
            return Err(DriverError::Timeout(start.elapsed()));
        }

        attempt += 1;

        let remaining = policy.timeout.saturating_sub(start.elapsed());
        let state = tokio::time::timeout(remaining, fetch())
            .await
            .map_err(|_| DriverError::Timeout(policy.timeout))??;

        match state {
            TaskState::Succeeded(value) => {
                tracing::debug!(
                    task = label,
                    task_id,
                    attempt,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "task succeeded"
                );
                return Ok(value);
            }
            TaskState::Failed { status, message } => {
                return Err(DriverError::TaskFailed {
                    task_id: task_id.to_string(),
                    status,
                    message,
                });
            }
            TaskState::Pending { status, progress } => {
                tracing::debug!(
                    task = label,
                    task_id,
                    attempt,
                    status = %status,
                    progress,
                    elapsed_secs = start.elapsed().as_secs(),
                    "polling task"
                );
            }
        }
    }
}
