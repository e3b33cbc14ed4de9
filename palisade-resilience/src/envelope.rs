use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::breaker::CircuitBreaker;
use crate::bulkhead::Bulkhead;
use crate::events::{ResilienceEvent, ResilienceSink};
use crate::retry::{CallError, RetryPolicy};

/// Terminal outcome of a resilient call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// No bulkhead permit within the max wait.
    BulkheadFull,
    /// The breaker rejected the call without dispatching.
    CircuitOpen,
    /// The last attempt (after any retries) timed out.
    Timeout,
    /// Retries exhausted; carries the last failure seen.
    Exhausted(CallError),
}

/// Per-upstream composition of bulkhead, breaker, retry, and timeout.
///
/// The order is fixed: bulkhead admission first, breaker gate second, then
/// the attempt loop. The bulkhead permit is held across all attempts, so
/// retries count against the upstream's concurrency budget. Every failed
/// attempt feeds the breaker one failure tick; a success feeds one success
/// tick and returns immediately.
pub struct ResilienceEnvelope {
    name: String,
    bulkhead: Arc<Bulkhead>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    attempt_timeout: Duration,
    sink: Arc<dyn ResilienceSink>,
}

impl ResilienceEnvelope {
    pub fn new(
        name: impl Into<String>,
        bulkhead: Arc<Bulkhead>,
        breaker: Arc<CircuitBreaker>,
        retry: RetryPolicy,
        attempt_timeout: Duration,
        sink: Arc<dyn ResilienceSink>,
    ) -> Self {
        ResilienceEnvelope {
            name: name.into(),
            bulkhead,
            breaker,
            retry,
            attempt_timeout,
            sink,
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn bulkhead(&self) -> &Arc<Bulkhead> {
        &self.bulkhead
    }

    /// Run `op` under the full envelope.
    ///
    /// `retries_allowed` is false for non-idempotent methods on routes not
    /// marked idempotent; such calls get exactly one attempt. All attempts
    /// and their backoff share `deadline`; the envelope never sleeps past
    /// it, and an attempt's timeout is clamped to the time remaining.
    pub async fn run<T, F, Fut>(
        &self,
        retries_allowed: bool,
        deadline: Instant,
        op: F,
    ) -> Result<T, EnvelopeError>
    where
        F: Fn(u32) -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let _permit = self
            .bulkhead
            .acquire()
            .await
            .map_err(|_| EnvelopeError::BulkheadFull)?;

        if !self.breaker.try_acquire() {
            return Err(EnvelopeError::CircuitOpen);
        }

        let max_attempts = if retries_allowed {
            self.retry.max_attempts
        } else {
            1
        };

        let mut attempt = 0;
        loop {
            attempt += 1;

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(EnvelopeError::Timeout);
            }
            let budget = self.attempt_timeout.min(remaining);

            let outcome = match tokio::time::timeout(budget, op(attempt)).await {
                Ok(Ok(value)) => {
                    self.breaker.record_success();
                    return Ok(value);
                }
                Ok(Err(error)) => error,
                Err(_) => CallError::Timeout,
            };
            self.breaker.record_failure();
            debug!(
                upstream = %self.name,
                attempt,
                error = %outcome,
                "upstream attempt failed"
            );

            if attempt >= max_attempts || !outcome.retryable() {
                return Err(match outcome {
                    CallError::Timeout => EnvelopeError::Timeout,
                    other => EnvelopeError::Exhausted(other),
                });
            }

            let backoff = self.retry.backoff(attempt);
            if Instant::now() + backoff >= deadline {
                // Not enough deadline left for another attempt.
                return Err(match outcome {
                    CallError::Timeout => EnvelopeError::Timeout,
                    other => EnvelopeError::Exhausted(other),
                });
            }
            self.sink.on_event(&ResilienceEvent::RetryScheduled {
                name: self.name.clone(),
                attempt,
            });
            tokio::time::sleep(backoff).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopSink;
    use palisade_core::config::{BreakerConfig, BulkheadConfig};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn envelope(max_attempts: u32, breaker_min_calls: usize) -> ResilienceEnvelope {
        let sink: Arc<dyn ResilienceSink> = Arc::new(NoopSink);
        ResilienceEnvelope::new(
            "debate",
            Arc::new(Bulkhead::new(
                "debate",
                &BulkheadConfig {
                    max_concurrent: 2,
                    max_wait_ms: 10,
                },
                sink.clone(),
            )),
            Arc::new(CircuitBreaker::new(
                "debate",
                &BreakerConfig {
                    window: 10,
                    failure_ratio: 0.5,
                    min_calls: breaker_min_calls,
                    cooldown_ms: 60_000,
                },
                sink.clone(),
            )),
            RetryPolicy {
                max_attempts,
                base: Duration::from_millis(5),
                multiplier: 2.0,
                jitter: false,
            },
            Duration::from_millis(200),
            sink,
        )
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(30)
    }

    #[tokio::test]
    async fn success_returns_on_first_attempt() {
        let env = envelope(3, 100);
        let calls = AtomicU32::new(0);
        let result = env
            .run(true, far_deadline(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, CallError>(42) }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_retryable_statuses_and_exhausts() {
        let env = envelope(3, 100);
        let calls = AtomicU32::new(0);
        let result: Result<u32, _> = env
            .run(true, far_deadline(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(CallError::Status(503)) }
            })
            .await;
        assert_eq!(result.unwrap_err(), EnvelopeError::Exhausted(CallError::Status(503)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Three failure ticks reached the breaker.
        assert_eq!(env.breaker().snapshot().window_failures, 3);
    }

    #[tokio::test]
    async fn non_retryable_status_fails_fast() {
        let env = envelope(3, 100);
        let calls = AtomicU32::new(0);
        let result: Result<u32, _> = env
            .run(true, far_deadline(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(CallError::Status(500)) }
            })
            .await;
        assert_eq!(result.unwrap_err(), EnvelopeError::Exhausted(CallError::Status(500)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_idempotent_calls_get_one_attempt() {
        let env = envelope(3, 100);
        let calls = AtomicU32::new(0);
        let result: Result<u32, _> = env
            .run(false, far_deadline(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(CallError::Status(503)) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn open_breaker_rejects_without_dispatch() {
        let env = envelope(1, 2);
        let _ = env
            .run(true, far_deadline(), |_| async {
                Err::<u32, _>(CallError::Status(503))
            })
            .await;
        let _ = env
            .run(true, far_deadline(), |_| async {
                Err::<u32, _>(CallError::Status(503))
            })
            .await;

        let calls = AtomicU32::new(0);
        let result: Result<u32, _> = env
            .run(true, far_deadline(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(1) }
            })
            .await;
        assert_eq!(result.unwrap_err(), EnvelopeError::CircuitOpen);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn slow_attempts_time_out() {
        let env = envelope(1, 100);
        let result: Result<u32, _> = env
            .run(true, far_deadline(), |_| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(1)
            })
            .await;
        assert_eq!(result.unwrap_err(), EnvelopeError::Timeout);
    }

    #[tokio::test]
    async fn shared_deadline_stops_the_retry_loop() {
        let env = envelope(10, 100);
        let calls = AtomicU32::new(0);
        let deadline = Instant::now() + Duration::from_millis(30);
        let result: Result<u32, _> = env
            .run(true, deadline, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(CallError::Status(503)) }
            })
            .await;
        assert!(result.is_err());
        // Far fewer than ten attempts fit in the deadline.
        assert!(calls.load(Ordering::SeqCst) < 10);
    }

    #[tokio::test]
    async fn full_bulkhead_rejects() {
        let env = Arc::new(envelope(1, 100));
        // Occupy both permits with slow calls.
        let mut held = Vec::new();
        for _ in 0..2 {
            let env = env.clone();
            held.push(tokio::spawn(async move {
                let _: Result<u32, _> = env
                    .run(true, far_deadline(), |_| async {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok(1)
                    })
                    .await;
            }));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        let result: Result<u32, _> = env
            .run(true, far_deadline(), |_| async { Ok(1) })
            .await;
        assert_eq!(result.unwrap_err(), EnvelopeError::BulkheadFull);
        for h in held {
            h.await.unwrap();
        }
    }
}
