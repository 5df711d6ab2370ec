//! Per-node retry policy.
//!
//! Retries are local to one node (or one batch item): a bounded number of
//! attempts with a fixed wait between them. Nothing upstream is re-run.

use std::time::Duration;

use weft_types::config::RuntimeConfig;
use weft_types::workflow::RetryConfig;

/// Resolved retry budget for one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first execution included. Never zero.
    pub max_attempts: u32,
    pub wait: Duration,
}

impl RetryPolicy {
    /// A single attempt, no waiting.
    pub const ONCE: RetryPolicy = RetryPolicy {
        max_attempts: 1,
        wait: Duration::ZERO,
    };

    /// Resolve a node's policy: its own `retry` block wins over runtime defaults.
    pub fn resolve(node_retry: Option<&RetryConfig>, config: &RuntimeConfig) -> Self {
        let (attempts, wait_ms) = match node_retry {
            Some(retry) => (retry.max_retries, retry.wait_ms),
            None => (config.default_max_retries, config.default_retry_wait_ms),
        };
        Self {
            max_attempts: attempts.max(1),
            wait: Duration::from_millis(wait_ms),
        }
    }
}

/// Stateless retry decisions.
pub struct RetryHandler;

impl RetryHandler {
    /// Whether another attempt is allowed after `attempt` failed.
    ///
    /// `attempt` is 1-based (first execution is attempt 1).
    pub fn should_retry(policy: &RetryPolicy, attempt: u32) -> bool {
        attempt < policy.max_attempts
    }

    /// Wait before the next attempt.
    pub async fn backoff(policy: &RetryPolicy) {
        if !policy.wait.is_zero() {
            tokio::time::sleep(policy.wait).await;
        }
    }
}
