//! Bounded retry and polling helpers.
//!
//! Remote hosts fail transiently; flows retry those failures a bounded
//! number of times and surface everything else immediately. Waiting on CI
//! and sync convergence goes through `poll_until`, which turns "still not
//! there" into a `Timeout` error carrying the last observed status.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};
use upshift_gitops::GitopsError;

use crate::domain::{PromoteError, Result};

/// Errors that are worth retrying.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for GitopsError {
    fn is_transient(&self) -> bool {
        GitopsError::is_transient(self)
    }
}

impl Transient for PromoteError {
    fn is_transient(&self) -> bool {
        PromoteError::is_transient(self)
    }
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

/// Bounded retry for operations against remote hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Run `op`, retrying transient failures up to `max_attempts` times.
    /// Non-transient failures return immediately.
    pub async fn run<T, E, F, Fut>(&self, what: &str, mut op: F) -> std::result::Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Transient + std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    warn!(
                        event = "retry.transient",
                        what,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %err,
                    );
                    attempt += 1;
                    tokio::time::sleep(self.backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Polling
// ---------------------------------------------------------------------------

/// Interval and deadline for a polling wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        PollPolicy {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(300),
        }
    }
}

/// One observation of a polled condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Ready(T),
    /// Not there yet; the status string ends up in the timeout error.
    Pending(String),
}

/// Poll `check` until it is ready or the deadline passes. Errors from the
/// check propagate immediately; a timeout reports the last pending status.
pub async fn poll_until<T, F, Fut>(policy: &PollPolicy, what: &str, mut check: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PollOutcome<T>>>,
{
    let started = tokio::time::Instant::now();
    let mut last_status = String::from("not yet polled");
    loop {
        match check().await? {
            PollOutcome::Ready(value) => return Ok(value),
            PollOutcome::Pending(status) => {
                debug!(event = "poll.pending", what, status = %status);
                last_status = status;
            }
        }
        if started.elapsed() >= policy.timeout {
            return Err(PromoteError::Timeout {
                operation: what.to_string(),
                last_status,
            });
        }
        tokio::time::sleep(policy.interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn transport(msg: &str) -> PromoteError {
        PromoteError::Gitops(GitopsError::Transport(msg.to_string()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::default();
        let counter = calls.clone();
        let result: crate::domain::Result<&str> = policy
            .run("publish", move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(transport("connection reset"))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_transient_failure_returns_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::default();
        let counter = calls.clone();
        let result: crate::domain::Result<()> = policy
            .run("publish", move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(PromoteError::EmptySelection)
                }
            })
            .await;
        assert!(matches!(result, Err(PromoteError::EmptySelection)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_are_bounded() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::default();
        let counter = calls.clone();
        let result: crate::domain::Result<()> = policy
            .run("publish", move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(transport("still down"))
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_resolves_when_ready() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = PollPolicy::default();
        let counter = calls.clone();
        let value = poll_until(&policy, "ci", move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 3 {
                    Ok(PollOutcome::Pending("running".to_string()))
                } else {
                    Ok(PollOutcome::Ready(42))
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_timeout_carries_last_status() {
        let policy = PollPolicy {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(5),
        };
        let result: crate::domain::Result<()> = poll_until(&policy, "sync of example-app", || async {
            Ok(PollOutcome::Pending("out_of_sync at 1111111".to_string()))
        })
        .await;
        match result {
            Err(PromoteError::Timeout {
                operation,
                last_status,
            }) => {
                assert_eq!(operation, "sync of example-app");
                assert_eq!(last_status, "out_of_sync at 1111111");
            }
            other => panic!("expected Timeout, got {other:?}"),
        }
    }
}
