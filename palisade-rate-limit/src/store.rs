use dashmap::DashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Fixed window for the burst counter (`<key>:burst` in a shared store).
pub const BURST_WINDOW: Duration = Duration::from_secs(60);

/// Result of one atomic accounting step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Window counter after the step.
    pub count: u64,
    /// Burst counter after the step.
    pub burst_count: u64,
    /// Residual window; what `Retry-After` and `X-RateLimit-Reset` report.
    pub reset_after: Duration,
}

/// Current window state for a key, for the diagnostics endpoint.
#[derive(Debug, Clone, Copy)]
pub struct CounterSnapshot {
    pub count: u64,
    pub burst_count: u64,
    pub window_remaining: Duration,
}

/// Pluggable accounting backend shared across gateway replicas.
///
/// The accounting step must execute atomically per key: load both counters,
/// deny if either is at its cap, otherwise increment both and arm their TTLs
/// (window for the counter, [`BURST_WINDOW`] for the burst counter). A shared
/// deployment backs this with a scripted store (e.g. a Redis Lua script);
/// the in-memory implementation serializes on the map entry, which gives the
/// same per-key linearizability. No other component may touch these keys.
pub trait RateStore: Send + Sync + 'static {
    fn check_and_increment<'a>(
        &'a self,
        key: &'a str,
        window: Duration,
        limit: u64,
        burst_limit: u64,
    ) -> Pin<Box<dyn Future<Output = RateDecision> + Send + 'a>>;

    fn counters<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<CounterSnapshot>> + Send + 'a>>;
}

struct Slot {
    count: u64,
    window_started: Instant,
    window: Duration,
    burst_count: u64,
    burst_started: Instant,
}

impl Slot {
    fn fresh(window: Duration) -> Self {
        let now = Instant::now();
        Slot {
            count: 0,
            window_started: now,
            window,
            burst_count: 0,
            burst_started: now,
        }
    }

    /// Roll expired windows forward. Refill is monotonic: an elapsed window
    /// resets the counter from `now`, never from a back-dated instant.
    fn roll(&mut self, now: Instant) {
        if now.duration_since(self.window_started) >= self.window {
            self.count = 0;
            self.window_started = now;
        }
        if now.duration_since(self.burst_started) >= BURST_WINDOW {
            self.burst_count = 0;
            self.burst_started = now;
        }
    }

    fn remaining_window(&self, now: Instant) -> Duration {
        self.window
            .saturating_sub(now.duration_since(self.window_started))
    }
}

/// In-memory accounting backend.
///
/// Each key's slot is only ever read or written while the `DashMap` entry
/// guard is held, so concurrent hits on one key serialize and the
/// check-then-increment step is atomic.
#[derive(Clone, Default)]
pub struct InMemoryRateStore {
    slots: Arc<DashMap<String, Slot>>,
}

impl InMemoryRateStore {
    pub fn new() -> Self {
        InMemoryRateStore {
            slots: Arc::new(DashMap::new()),
        }
    }

    /// Drop slots whose window and burst window have both lapsed.
    pub fn evict_expired(&self) {
        let now = Instant::now();
        self.slots.retain(|_, slot| {
            now.duration_since(slot.window_started) < slot.window
                || now.duration_since(slot.burst_started) < BURST_WINDOW
        });
    }
}

impl RateStore for InMemoryRateStore {
    fn check_and_increment<'a>(
        &'a self,
        key: &'a str,
        window: Duration,
        limit: u64,
        burst_limit: u64,
    ) -> Pin<Box<dyn Future<Output = RateDecision> + Send + 'a>> {
        Box::pin(async move {
            let now = Instant::now();
            let mut entry = self
                .slots
                .entry(key.to_string())
                .or_insert_with(|| Slot::fresh(window));
            let slot = entry.value_mut();
            slot.roll(now);

            if slot.count >= limit || slot.burst_count >= burst_limit {
                RateDecision {
                    allowed: false,
                    count: slot.count,
                    burst_count: slot.burst_count,
                    reset_after: slot.remaining_window(now),
                }
            } else {
                slot.count += 1;
                slot.burst_count += 1;
                RateDecision {
                    allowed: true,
                    count: slot.count,
                    burst_count: slot.burst_count,
                    reset_after: slot.remaining_window(now),
                }
            }
        })
    }

    fn counters<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<CounterSnapshot>> + Send + 'a>> {
        Box::pin(async move {
            let now = Instant::now();
            self.slots.get(key).map(|slot| CounterSnapshot {
                count: slot.count,
                burst_count: slot.burst_count,
                window_remaining: slot.remaining_window(now),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn denies_at_limit_and_reports_counters() {
        let store = InMemoryRateStore::new();
        let window = Duration::from_secs(10);
        for i in 1..=3u64 {
            let d = store.check_and_increment("k", window, 3, 100).await;
            assert!(d.allowed);
            assert_eq!(d.count, i);
        }
        let d = store.check_and_increment("k", window, 3, 100).await;
        assert!(!d.allowed);
        assert_eq!(d.count, 3);
        assert!(d.reset_after <= window);
    }

    #[tokio::test]
    async fn burst_cap_denies_independently_of_window_cap() {
        let store = InMemoryRateStore::new();
        let window = Duration::from_millis(20);
        // Window cap is generous, burst cap is 3 over the fixed burst window.
        for _ in 0..3 {
            assert!(store.check_and_increment("k", window, 100, 3).await.allowed);
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        // Window rolled, burst did not.
        let d = store.check_and_increment("k", window, 100, 3).await;
        assert!(!d.allowed);
        assert_eq!(d.burst_count, 3);
    }

    #[tokio::test]
    async fn window_rollover_resets_the_counter() {
        let store = InMemoryRateStore::new();
        let window = Duration::from_millis(20);
        assert!(store.check_and_increment("k", window, 1, 100).await.allowed);
        assert!(!store.check_and_increment("k", window, 1, 100).await.allowed);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(store.check_and_increment("k", window, 1, 100).await.allowed);
    }

    #[tokio::test]
    async fn denied_step_does_not_advance_counters() {
        let store = InMemoryRateStore::new();
        let window = Duration::from_secs(10);
        assert!(store.check_and_increment("k", window, 1, 1).await.allowed);
        for _ in 0..5 {
            let d = store.check_and_increment("k", window, 1, 1).await;
            assert!(!d.allowed);
            assert_eq!(d.count, 1);
            assert_eq!(d.burst_count, 1);
        }
    }

    #[tokio::test]
    async fn concurrent_hits_at_boundary_admit_exactly_one() {
        let store = Arc::new(InMemoryRateStore::new());
        let window = Duration::from_secs(10);
        // Fill to limit - 1.
        for _ in 0..4 {
            assert!(store.check_and_increment("k", window, 5, 100).await.allowed);
        }
        let mut handles = Vec::new();
        for _ in 0..2 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.check_and_increment("k", window, 5, 100).await.allowed
            }));
        }
        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
        let snapshot = store.counters("k").await.unwrap();
        assert_eq!(snapshot.count, 5);
    }

    #[tokio::test]
    async fn distinct_keys_never_share_a_slot() {
        let store = InMemoryRateStore::new();
        let window = Duration::from_secs(10);
        assert!(store.check_and_increment("a", window, 1, 1).await.allowed);
        assert!(store.check_and_increment("b", window, 1, 1).await.allowed);
        assert!(!store.check_and_increment("a", window, 1, 1).await.allowed);
    }
}
