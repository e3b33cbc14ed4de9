//! Observer seam between resilience components and whoever wants to watch
//! them. Breakers and bulkheads publish; the metrics module subscribes.

use crate::breaker::BreakerState;

/// A state change or rejection worth recording.
#[derive(Debug, Clone)]
pub enum ResilienceEvent {
    BreakerTransition {
        name: String,
        from: BreakerState,
        to: BreakerState,
    },
    BulkheadRejected {
        name: String,
    },
    BulkheadQueueDepth {
        name: String,
        depth: usize,
    },
    RetryScheduled {
        name: String,
        attempt: u32,
    },
}

/// Subscriber for [`ResilienceEvent`]s. Implementations must be cheap and
/// non-blocking; events are published from the request hot path.
pub trait ResilienceSink: Send + Sync + 'static {
    fn on_event(&self, event: &ResilienceEvent);
}

/// Sink that drops everything. Useful in tests and as a default.
pub struct NoopSink;

impl ResilienceSink for NoopSink {
    fn on_event(&self, _event: &ResilienceEvent) {}
}
