//! Bounded retry policy for gateway calls.

use crate::payment::GatewayError;
use serde::Deserialize;
use std::time::Duration;

/// Backoff strategy between retry attempts.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// No delay between retries.
    None,
    /// Fixed delay between retries.
    Fixed { delay_ms: u64 },
    /// Exponential backoff with base and max.
    Exponential { base_ms: u64, max_ms: u64 },
}

impl BackoffStrategy {
    /// Calculate delay before the retry following `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            Self::None => Duration::ZERO,
            Self::Fixed { delay_ms } => Duration::from_millis(*delay_ms),
            Self::Exponential { base_ms, max_ms } => {
                let multiplier = 2u64.saturating_pow(attempt.saturating_sub(1));
                Duration::from_millis(base_ms.saturating_mul(multiplier).min(*max_ms))
            }
        }
    }
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Exponential {
            base_ms: 200,
            max_ms: 2_000,
        }
    }
}

/// Retry policy configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryPolicy {
    /// Total number of gateway calls allowed for one payment, first call included.
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff: BackoffStrategy,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: BackoffStrategy::default(),
        }
    }

    /// A single call, never retried.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: BackoffStrategy::None,
        }
    }

    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff = strategy;
        self
    }

    /// Whether another call should follow `attempt` (1-indexed) that failed with `error`.
    pub fn should_retry(&self, error: &GatewayError, attempt: u32) -> bool {
        error.is_retryable() && attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_is_capped() {
        let backoff = BackoffStrategy::Exponential { base_ms: 100, max_ms: 350 };
        assert_eq!(backoff.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(backoff.delay_for_attempt(3), Duration::from_millis(350));
    }

    #[test]
    fn test_retry_bounded_and_only_for_retryable() {
        let policy = RetryPolicy::new(3);
        let transient = GatewayError::retryable("timeout");
        let declined = GatewayError::terminal(None, "declined");

        assert!(policy.should_retry(&transient, 1));
        assert!(policy.should_retry(&transient, 2));
        assert!(!policy.should_retry(&transient, 3));
        assert!(!policy.should_retry(&declined, 1));
        assert!(!RetryPolicy::none().should_retry(&transient, 1));
    }

    #[test]
    fn test_policy_from_json() {
        let policy: RetryPolicy = serde_json::from_str(
            r#"{"max_attempts": 4, "backoff": {"kind": "fixed", "delay_ms": 50}}"#,
        )
        .unwrap();

        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.backoff.delay_for_attempt(2), Duration::from_millis(50));
    }
}
