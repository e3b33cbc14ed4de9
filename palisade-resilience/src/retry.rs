use std::time::Duration;

use palisade_core::config::RetryConfig;
use rand::Rng;

/// How one upstream attempt failed. Every variant feeds the breaker a
/// failure tick; only connect errors, timeouts, and 502/503/504 retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// The attempt exceeded its timeout.
    Timeout,
    /// The connection could not be established or broke mid-flight.
    Connect(String),
    /// The upstream answered with a 5xx status.
    Status(u16),
}

impl CallError {
    pub fn retryable(&self) -> bool {
        match self {
            CallError::Timeout | CallError::Connect(_) => true,
            CallError::Status(status) => matches!(status, 502 | 503 | 504),
        }
    }
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallError::Timeout => write!(f, "attempt timed out"),
            CallError::Connect(msg) => write!(f, "connection error: {msg}"),
            CallError::Status(status) => write!(f, "upstream status {status}"),
        }
    }
}

/// Exponential backoff with optional full jitter.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        RetryPolicy {
            max_attempts: config.max_attempts.max(1),
            base: Duration::from_millis(config.base_ms),
            multiplier: config.multiplier,
            jitter: config.jitter,
        }
    }

    /// Delay before the attempt after `attempt` (1-based) failed.
    ///
    /// Without jitter this is `base * multiplier^(attempt-1)`; with jitter a
    /// uniform sample from that value down to half of it.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let full = self.base.as_millis() as f64 * self.multiplier.powi(exp as i32);
        let millis = if self.jitter {
            rand::thread_rng().gen_range((full / 2.0)..=full.max(1.0))
        } else {
            full
        };
        Duration::from_millis(millis as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_gateway_class_statuses_retry() {
        assert!(CallError::Timeout.retryable());
        assert!(CallError::Connect("refused".into()).retryable());
        assert!(CallError::Status(502).retryable());
        assert!(CallError::Status(503).retryable());
        assert!(CallError::Status(504).retryable());
        assert!(!CallError::Status(500).retryable());
        assert!(!CallError::Status(501).retryable());
    }

    #[test]
    fn backoff_grows_exponentially_without_jitter() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base: Duration::from_millis(100),
            multiplier: 2.0,
            jitter: false,
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
    }

    #[test]
    fn jittered_backoff_stays_in_range() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base: Duration::from_millis(100),
            multiplier: 2.0,
            jitter: true,
        };
        for _ in 0..50 {
            let d = policy.backoff(2);
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(200));
        }
    }
}
