use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

/// Event classes recorded per client key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorEvent {
    ThreatDetected,
    NormalRequest,
}

/// Rolling counters for one client key.
#[derive(Debug, Clone)]
pub struct ActorRecord {
    pub threat_events: u64,
    pub normal_events: u64,
    pub first_seen: Instant,
    pub last_seen: Instant,
}

/// In-memory table of per-client activity, fed by the scanner on every
/// request and pruned by a background task.
///
/// Entries idle longer than the configured threshold are dropped by
/// [`SuspiciousActorTable::prune`]; the gateway runs that hourly with the
/// 24-hour default.
#[derive(Clone)]
pub struct SuspiciousActorTable {
    records: Arc<DashMap<String, ActorRecord>>,
    idle_threshold: Duration,
}

impl SuspiciousActorTable {
    pub fn new(idle_threshold: Duration) -> Self {
        SuspiciousActorTable {
            records: Arc::new(DashMap::new()),
            idle_threshold,
        }
    }

    /// Default table with the 24-hour idle threshold.
    pub fn with_default_threshold() -> Self {
        Self::new(Duration::from_secs(24 * 60 * 60))
    }

    /// Record one event for a client key.
    pub fn record(&self, client_key: &str, event: ActorEvent) {
        let now = Instant::now();
        let mut entry = self
            .records
            .entry(client_key.to_string())
            .or_insert_with(|| ActorRecord {
                threat_events: 0,
                normal_events: 0,
                first_seen: now,
                last_seen: now,
            });
        let record = entry.value_mut();
        record.last_seen = now;
        match event {
            ActorEvent::ThreatDetected => record.threat_events += 1,
            ActorEvent::NormalRequest => record.normal_events += 1,
        }
    }

    pub fn get(&self, client_key: &str) -> Option<ActorRecord> {
        self.records.get(client_key).map(|r| r.clone())
    }

    /// Drop records idle past the threshold; returns how many were removed.
    pub fn prune(&self) -> usize {
        let before = self.records.len();
        let threshold = self.idle_threshold;
        let now = Instant::now();
        self.records
            .retain(|_, record| now.duration_since(record.last_seen) < threshold);
        let removed = before - self.records.len();
        if removed > 0 {
            debug!(removed, "pruned idle actor records");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_events_per_client() {
        let table = SuspiciousActorTable::with_default_threshold();
        table.record("user:u1", ActorEvent::NormalRequest);
        table.record("user:u1", ActorEvent::ThreatDetected);
        table.record("user:u1", ActorEvent::ThreatDetected);

        let record = table.get("user:u1").unwrap();
        assert_eq!(record.normal_events, 1);
        assert_eq!(record.threat_events, 2);
        assert!(table.get("user:u2").is_none());
    }

    #[test]
    fn prune_drops_only_idle_records() {
        let table = SuspiciousActorTable::new(Duration::from_millis(30));
        table.record("ip:10.0.0.1", ActorEvent::NormalRequest);
        std::thread::sleep(Duration::from_millis(40));
        table.record("ip:10.0.0.2", ActorEvent::NormalRequest);

        assert_eq!(table.prune(), 1);
        assert!(table.get("ip:10.0.0.1").is_none());
        assert!(table.get("ip:10.0.0.2").is_some());
    }

    #[test]
    fn activity_refreshes_last_seen() {
        let table = SuspiciousActorTable::new(Duration::from_millis(50));
        table.record("user:u1", ActorEvent::NormalRequest);
        std::thread::sleep(Duration::from_millis(30));
        table.record("user:u1", ActorEvent::NormalRequest);
        std::thread::sleep(Duration::from_millis(30));
        // 60ms since first event but only 30ms since the last one.
        assert_eq!(table.prune(), 0);
    }
}
