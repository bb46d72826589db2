//! Waiter - Poll a status until it reaches a terminal value
//!
//! Waits are blocking from the runbook's point of view: nothing else happens
//! between polls. Every sleep goes through a [`CancellationToken`] so an
//! interrupt ends the wait at the next tick instead of at the timeout.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::RunbookError;
use crate::provider::Lifecycle;

/// How often and how long to poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl WaitPolicy {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

/// What the polled status must become
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitTarget {
    /// Shown in progress logs and errors (e.g., "eks_cluster.acme-cluster")
    pub label: String,
    pub success: String,
    pub failures: Vec<String>,
}

impl WaitTarget {
    pub fn new(label: impl Into<String>, success: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            success: success.into(),
            failures: Vec::new(),
        }
    }

    pub fn with_failures<I, S>(mut self, failures: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.failures = failures.into_iter().map(Into::into).collect();
        self
    }

    pub fn from_lifecycle(label: impl Into<String>, lifecycle: &Lifecycle) -> Self {
        Self::new(label, lifecycle.success).with_failures(lifecycle.failures.iter().copied())
    }
}

/// How a wait ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Status reached the success value
    Ready { status: String, polls: u32 },
    /// Status reached a failure value
    Failed { status: String },
    /// Neither happened within the timeout
    TimedOut {
        last_status: Option<String>,
        elapsed: Duration,
    },
    /// The cancellation token fired
    Cancelled,
}

impl WaitOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, WaitOutcome::Ready { .. })
    }

    /// Turn every outcome except `Ready` into the matching fatal error
    pub fn into_ready(self, label: &str) -> Result<String, RunbookError> {
        match self {
            WaitOutcome::Ready { status, .. } => Ok(status),
            WaitOutcome::Failed { status } => Err(RunbookError::WaitFailed {
                label: label.to_string(),
                status,
            }),
            WaitOutcome::TimedOut {
                last_status,
                elapsed,
            } => Err(RunbookError::WaitTimedOut {
                label: label.to_string(),
                last_status: last_status.unwrap_or_else(|| "unknown".to_string()),
                elapsed_secs: elapsed.as_secs(),
            }),
            WaitOutcome::Cancelled => Err(RunbookError::Cancelled),
        }
    }
}

/// Sleep for `duration` unless cancelled first.
///
/// Returns `false` when the token fired.
pub async fn pause(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Poll `status_fn` until it reports a terminal status.
///
/// `status_fn` yields `None` while the status is not known yet (for example a
/// resource that is not visible immediately after creation). Errors from it
/// end the wait and are returned unchanged.
pub async fn wait_for<F, Fut, E>(
    mut status_fn: F,
    target: &WaitTarget,
    policy: &WaitPolicy,
    cancel: &CancellationToken,
) -> Result<WaitOutcome, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<String>, E>>,
{
    let started = Instant::now();
    let mut polls = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Ok(WaitOutcome::Cancelled);
        }

        let status = status_fn().await?;
        polls += 1;

        if let Some(status) = &status {
            if *status == target.success {
                log::info!("{} is {} after {} poll(s)", target.label, status, polls);
                return Ok(WaitOutcome::Ready {
                    status: status.clone(),
                    polls,
                });
            }
            if target.failures.iter().any(|f| f == status) {
                log::error!("{} reached failure status {}", target.label, status);
                return Ok(WaitOutcome::Failed {
                    status: status.clone(),
                });
            }
        }

        let elapsed = started.elapsed();
        if elapsed >= policy.timeout {
            return Ok(WaitOutcome::TimedOut {
                last_status: status,
                elapsed,
            });
        }

        log::info!(
            "waiting for {}: status {} ({}s elapsed, timeout {}s)",
            target.label,
            status.as_deref().unwrap_or("unknown"),
            elapsed.as_secs(),
            policy.timeout.as_secs()
        );

        if !pause(policy.interval, cancel).await {
            return Ok(WaitOutcome::Cancelled);
        }
    }
}
