use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounded exponential-backoff policy.
///
/// The delay before attempt `n` (1-based) is
/// `min(initial * multiplier^(n-1), max_delay)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawRetryPolicy")]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay_ms: u64,
    max_delay_ms: u64,
    multiplier: f64,
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        initial_delay_ms: u64,
        max_delay_ms: u64,
        multiplier: f64,
    ) -> Result<Self, RetryPolicyError> {
        if max_attempts < 1 {
            return Err(RetryPolicyError::NoAttempts);
        }
        if multiplier <= 1.0 || !multiplier.is_finite() {
            return Err(RetryPolicyError::InvalidMultiplier(multiplier));
        }
        if max_delay_ms < initial_delay_ms {
            return Err(RetryPolicyError::CapBelowInitial {
                initial_delay_ms,
                max_delay_ms,
            });
        }

        Ok(Self {
            max_attempts,
            initial_delay_ms,
            max_delay_ms,
            multiplier,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Backoff delay after a failed attempt `n` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let scaled = self.initial_delay_ms as f64 * self.multiplier.powi(exponent as i32);
        let capped = scaled.min(self.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }
}

impl Default for RetryPolicy {
    /// Three attempts, 2 s initial delay, doubling, 10 s cap.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 2000,
            max_delay_ms: 10_000,
            multiplier: 2.0,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawRetryPolicy {
    max_attempts: u32,
    initial_delay_ms: u64,
    max_delay_ms: u64,
    multiplier: f64,
}

impl TryFrom<RawRetryPolicy> for RetryPolicy {
    type Error = RetryPolicyError;

    fn try_from(raw: RawRetryPolicy) -> Result<Self, Self::Error> {
        RetryPolicy::new(
            raw.max_attempts,
            raw.initial_delay_ms,
            raw.max_delay_ms,
            raw.multiplier,
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryPolicyError {
    #[error("Retry policy requires at least one attempt")]
    NoAttempts,
    #[error("Backoff multiplier must be a finite value greater than 1, got {0}")]
    InvalidMultiplier(f64),
    #[error("Max delay {max_delay_ms}ms is below initial delay {initial_delay_ms}ms")]
    CapBelowInitial {
        initial_delay_ms: u64,
        max_delay_ms: u64,
    },
}
