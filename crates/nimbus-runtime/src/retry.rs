//! Retry policy: exponential backoff with jitter.

use crate::error::ErrorClass;
use nimbus_core::OperationType;
use nimbus_core::config::ExecutionConfig;
use rand::Rng;
use std::time::Duration;

/// How often and how patiently a failing call is retried.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts per call, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Randomise each delay within `[delay / 2, delay]`.
    pub jitter: bool,
    /// Network failures repeat only for reads and idempotent calls.
    pub idempotent_network_retries_only: bool,
}

impl RetryPolicy {
    pub fn from_config(config: &ExecutionConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: true,
            idempotent_network_retries_only: config.idempotent_network_retries_only,
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
            idempotent_network_retries_only: false,
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Backoff ceiling before retry number `retry` (1-based), without jitter.
    pub fn ceiling(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay to sleep before retry number `retry`.
    pub fn delay(&self, retry: u32) -> Duration {
        let ceiling = self.ceiling(retry);
        if !self.jitter || ceiling.is_zero() {
            return ceiling;
        }
        let ms = ceiling.as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(ms / 2..=ms))
    }

    /// Whether a failure of `class` may be retried for this operation.
    ///
    /// Throttling and network failures both retry. With
    /// `idempotent_network_retries_only` set, a network failure on a
    /// non-idempotent mutation is surfaced at once instead.
    pub fn should_retry(
        &self,
        class: ErrorClass,
        op_type: OperationType,
        idempotent: bool,
    ) -> bool {
        match class {
            ErrorClass::Throttled => true,
            ErrorClass::TransientNetwork => {
                !self.idempotent_network_retries_only || op_type.is_read() || idempotent
            }
            ErrorClass::PermanentClientError | ErrorClass::PermanentServerError => false,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ExecutionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1_000),
            jitter: true,
            idempotent_network_retries_only: false,
        }
    }

    #[test]
    fn test_ceiling_doubles_then_caps() {
        let p = policy();
        assert_eq!(p.ceiling(1), Duration::from_millis(100));
        assert_eq!(p.ceiling(2), Duration::from_millis(200));
        assert_eq!(p.ceiling(4), Duration::from_millis(800));
        assert_eq!(p.ceiling(5), Duration::from_millis(1_000));
        assert_eq!(p.ceiling(64), Duration::from_millis(1_000));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let p = policy();
        for retry in 1..6 {
            let ceiling = p.ceiling(retry);
            for _ in 0..50 {
                let delay = p.delay(retry);
                assert!(delay <= ceiling);
                assert!(delay >= ceiling / 2);
            }
        }
        assert_eq!(p.without_jitter().delay(3), Duration::from_millis(400));
    }

    #[test]
    fn test_retry_eligibility() {
        use OperationType::*;
        let p = policy();
        assert!(p.should_retry(ErrorClass::Throttled, Destructive, false));
        assert!(p.should_retry(ErrorClass::TransientNetwork, Read, false));
        assert!(p.should_retry(ErrorClass::TransientNetwork, Write, false));
        assert!(p.should_retry(ErrorClass::TransientNetwork, Destructive, false));
        assert!(!p.should_retry(ErrorClass::PermanentServerError, Read, true));
        assert!(!p.should_retry(ErrorClass::PermanentClientError, Read, true));
    }

    #[test]
    fn test_idempotency_gate_is_opt_in() {
        use OperationType::*;
        let p = RetryPolicy {
            idempotent_network_retries_only: true,
            ..policy()
        };
        assert!(p.should_retry(ErrorClass::Throttled, Write, false));
        assert!(p.should_retry(ErrorClass::TransientNetwork, Read, false));
        assert!(p.should_retry(ErrorClass::TransientNetwork, Write, true));
        assert!(!p.should_retry(ErrorClass::TransientNetwork, Write, false));
        assert!(!RetryPolicy::default().idempotent_network_retries_only);
    }
}
