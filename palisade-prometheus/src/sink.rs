use palisade_resilience::{ResilienceEvent, ResilienceSink};

use crate::metrics;

/// Bridges resilience events into the metric families.
///
/// Breakers and bulkheads don't know about metrics; they publish to this
/// sink and the coupling stays one-directional.
pub struct MetricsSink;

impl ResilienceSink for MetricsSink {
    fn on_event(&self, event: &ResilienceEvent) {
        match event {
            ResilienceEvent::BreakerTransition { name, to, .. } => {
                metrics::record_breaker_transition(name, to.as_str());
            }
            ResilienceEvent::BulkheadRejected { name } => {
                metrics::record_bulkhead_rejection(name);
            }
            ResilienceEvent::BulkheadQueueDepth { name, depth } => {
                metrics::set_bulkhead_queue_depth(name, *depth);
            }
            ResilienceEvent::RetryScheduled { name, .. } => {
                metrics::record_retry(name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palisade_resilience::BreakerState;

    #[test]
    fn breaker_transitions_land_in_the_registry() {
        MetricsSink.on_event(&ResilienceEvent::BreakerTransition {
            name: "debate".into(),
            from: BreakerState::Closed,
            to: BreakerState::Open,
        });
        let text = metrics::encode_metrics();
        assert!(text.contains("gateway_breaker_transitions_total"));
        assert!(text.contains("debate"));
    }
}
