//! Engine-owned retry loop for a node's execution phase.
//!
//! Only `exec` is retried. The delay between attempts is fixed per node,
//! without growth or jitter, and skipped entirely when zero. Once every
//! attempt has failed the node's fallback receives the last error.
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::{FlowError, FlowResult};

/// Policy controlling retry behavior for a node's `exec` phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    max_attempts: usize,
    delay: Duration,
}

impl RetryPolicy {
    /// Up to `max_attempts` attempts (values below 1 are clamped to 1),
    /// waiting `delay` between consecutive attempts.
    pub fn new(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// A single attempt, no retry.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Maximum number of attempts (including the first).
    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Fixed delay between attempts.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Whether another attempt follows a failure of attempt `attempt` (1-based).
    pub fn should_retry(&self, attempt: usize) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

fn log_failure(policy: &RetryPolicy, node_id: &str, attempt: usize, error: &FlowError) {
    warn!(
        attempt,
        max_attempts = policy.max_attempts,
        node_id = %node_id,
        error = %error,
        delay_ms = policy.delay.as_millis() as u64,
        "Node execution failed, retrying"
    );
}

fn log_exhausted(policy: &RetryPolicy, node_id: &str, error: &FlowError) {
    if policy.max_attempts > 1 {
        error!(
            max_attempts = policy.max_attempts,
            node_id = %node_id,
            error = %error,
            "Maximum retry attempts reached, invoking fallback"
        );
    } else {
        debug!(node_id = %node_id, error = %error, "Node execution failed, invoking fallback");
    }
}

/// Blocking retry loop: the delay is a thread sleep.
pub(crate) fn retry_blocking<T, E, F>(
    policy: &RetryPolicy,
    node_id: &str,
    mut exec: E,
    fallback: F,
) -> FlowResult<T>
where
    E: FnMut() -> FlowResult<T>,
    F: FnOnce(FlowError) -> FlowResult<T>,
{
    let mut attempt = 1;
    loop {
        match exec() {
            Ok(output) => {
                if attempt > 1 {
                    debug!(attempt, node_id = %node_id, "Node succeeded after retrying");
                }
                return Ok(output);
            }
            Err(err) => {
                if !policy.should_retry(attempt) {
                    log_exhausted(policy, node_id, &err);
                    return fallback(err);
                }
                log_failure(policy, node_id, attempt, &err);
                if !policy.delay.is_zero() {
                    std::thread::sleep(policy.delay);
                }
                attempt += 1;
            }
        }
    }
}

/// Cooperative retry loop: the delay is an awaited `tokio::time::sleep`.
pub(crate) async fn retry_async<T, E, EFut, F, FFut>(
    policy: &RetryPolicy,
    node_id: &str,
    mut exec: E,
    fallback: F,
) -> FlowResult<T>
where
    E: FnMut() -> EFut,
    EFut: Future<Output = FlowResult<T>>,
    F: FnOnce(FlowError) -> FFut,
    FFut: Future<Output = FlowResult<T>>,
{
    let mut attempt = 1;
    loop {
        match exec().await {
            Ok(output) => {
                if attempt > 1 {
                    debug!(attempt, node_id = %node_id, "Node succeeded after retrying");
                }
                return Ok(output);
            }
            Err(err) => {
                if !policy.should_retry(attempt) {
                    log_exhausted(policy, node_id, &err);
                    return fallback(err).await;
                }
                log_failure(policy, node_id, attempt, &err);
                if !policy.delay.is_zero() {
                    tokio::time::sleep(policy.delay).await;
                }
                attempt += 1;
            }
        }
    }
}
