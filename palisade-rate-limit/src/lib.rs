pub mod policy;
pub mod store;
pub mod strategy;

pub use policy::RatePolicy;
pub use store::{CounterSnapshot, InMemoryRateStore, RateDecision, RateStore, BURST_WINDOW};
pub use strategy::{RateStrategy, API_KEY_HEADER};

use std::sync::Arc;
use std::time::Duration;

use palisade_core::RequestContext;
use tracing::debug;

/// Outcome of one rate-limit check, with everything the response headers need.
#[derive(Debug, Clone)]
pub struct RateCheck {
    pub allowed: bool,
    pub strategy: &'static str,
    pub key: String,
    pub limit: u64,
    pub remaining: u64,
    /// Residual window in whole seconds, rounded up.
    pub reset_secs: u64,
}

/// Clonable handle over a rate-limit backend.
///
/// Derives the bucket key from the configured strategy and runs the single
/// atomic accounting step against the store.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateStore>,
}

impl RateLimiter {
    pub fn new(store: impl RateStore) -> Self {
        RateLimiter {
            store: Arc::new(store),
        }
    }

    pub fn from_arc(store: Arc<dyn RateStore>) -> Self {
        RateLimiter { store }
    }

    /// Run the accounting step for one request under one policy.
    pub async fn check(
        &self,
        strategy: RateStrategy,
        policy: &RatePolicy,
        ctx: &RequestContext,
    ) -> RateCheck {
        let key = strategy.resolve_key(ctx);
        let decision = self
            .store
            .check_and_increment(&key, policy.window, policy.replenish_rate, policy.burst_capacity)
            .await;

        if !decision.allowed {
            debug!(
                key = %key,
                strategy = strategy.as_str(),
                count = decision.count,
                burst = decision.burst_count,
                "rate limit hit"
            );
        }

        RateCheck {
            allowed: decision.allowed,
            strategy: strategy.as_str(),
            key,
            limit: policy.replenish_rate,
            remaining: policy.replenish_rate.saturating_sub(decision.count),
            reset_secs: ceil_secs(decision.reset_after),
        }
    }

    /// Current window counters for a key, for diagnostics.
    pub async fn counters(&self, key: &str) -> Option<CounterSnapshot> {
        self.store.counters(key).await
    }
}

/// Round a duration up to whole seconds; a non-zero residual never reports 0.
fn ceil_secs(d: Duration) -> u64 {
    let secs = d.as_secs();
    if d.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceil_secs_rounds_up() {
        assert_eq!(ceil_secs(Duration::from_millis(1)), 1);
        assert_eq!(ceil_secs(Duration::from_millis(999)), 1);
        assert_eq!(ceil_secs(Duration::from_secs(2)), 2);
        assert_eq!(ceil_secs(Duration::from_millis(2100)), 3);
        assert_eq!(ceil_secs(Duration::ZERO), 0);
    }
}
