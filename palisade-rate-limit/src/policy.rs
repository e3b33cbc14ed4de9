use std::time::Duration;

use palisade_core::config::RatePolicyConfig;

/// One rate policy: how many requests replenish per window, how large a
/// burst the 60-second burst counter tolerates, and the window length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatePolicy {
    /// Window counter cap (requests per window).
    pub replenish_rate: u64,
    /// Burst counter cap over [`crate::store::BURST_WINDOW`].
    pub burst_capacity: u64,
    pub window: Duration,
}

impl RatePolicy {
    pub const fn new(replenish_rate: u64, burst_capacity: u64, window: Duration) -> Self {
        RatePolicy {
            replenish_rate,
            burst_capacity,
            window,
        }
    }

    /// Default class: (10, 20).
    pub const fn standard() -> Self {
        Self::new(10, 20, Duration::from_secs(1))
    }

    /// Premium class: (50, 100).
    pub const fn premium() -> Self {
        Self::new(50, 100, Duration::from_secs(1))
    }

    /// AI class: (5, 10); model-backed endpoints are expensive.
    pub const fn ai() -> Self {
        Self::new(5, 10, Duration::from_secs(1))
    }

    /// Read-only class: (30, 60).
    pub const fn read_only() -> Self {
        Self::new(30, 60, Duration::from_secs(1))
    }

    pub fn from_config(config: &RatePolicyConfig) -> Self {
        Self::new(
            config.replenish_rate,
            config.burst_capacity,
            Duration::from_secs(config.window_seconds),
        )
    }
}
