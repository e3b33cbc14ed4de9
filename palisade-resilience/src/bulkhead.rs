use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use palisade_core::config::BulkheadConfig;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::events::{ResilienceEvent, ResilienceSink};

/// Returned when no permit became available within the max wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkheadFull;

/// Held for the duration of one upstream call; dropping it releases the slot.
#[derive(Debug)]
pub struct BulkheadPermit {
    _permit: OwnedSemaphorePermit,
}

/// Bounded concurrency pool isolating one upstream's failure domain.
///
/// Waiters queue FIFO on the underlying semaphore. A waiter whose max-wait
/// elapses is removed from the queue without consuming a permit, so the
/// in-flight count can never exceed the configured maximum.
pub struct Bulkhead {
    name: String,
    max_concurrent: usize,
    max_wait: Duration,
    semaphore: Arc<Semaphore>,
    waiting: AtomicUsize,
    sink: Arc<dyn ResilienceSink>,
}

impl Bulkhead {
    pub fn new(name: impl Into<String>, config: &BulkheadConfig, sink: Arc<dyn ResilienceSink>) -> Self {
        let max_concurrent = config.max_concurrent.max(1);
        Bulkhead {
            name: name.into(),
            max_concurrent,
            max_wait: Duration::from_millis(config.max_wait_ms),
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            waiting: AtomicUsize::new(0),
            sink,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Acquire a permit, waiting at most the configured max wait.
    pub async fn acquire(&self) -> Result<BulkheadPermit, BulkheadFull> {
        let depth = self.waiting.fetch_add(1, Ordering::AcqRel) + 1;
        self.sink.on_event(&ResilienceEvent::BulkheadQueueDepth {
            name: self.name.clone(),
            depth,
        });

        let acquired = tokio::time::timeout(
            self.max_wait,
            self.semaphore.clone().acquire_owned(),
        )
        .await;

        let depth = self.waiting.fetch_sub(1, Ordering::AcqRel) - 1;
        self.sink.on_event(&ResilienceEvent::BulkheadQueueDepth {
            name: self.name.clone(),
            depth,
        });

        match acquired {
            Ok(Ok(permit)) => Ok(BulkheadPermit { _permit: permit }),
            // Timed out in the queue, or the semaphore was closed.
            Ok(Err(_)) | Err(_) => {
                debug!(bulkhead = %self.name, "no permit within max wait");
                self.sink.on_event(&ResilienceEvent::BulkheadRejected {
                    name: self.name.clone(),
                });
                Err(BulkheadFull)
            }
        }
    }

    /// Calls currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.semaphore.available_permits()
    }

    /// Callers currently queued for a permit.
    pub fn queue_depth(&self) -> usize {
        self.waiting.load(Ordering::Acquire)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }
}
