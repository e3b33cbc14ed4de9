use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use palisade_core::config::BreakerConfig;
use tracing::{debug, warn};

use crate::events::{ResilienceEvent, ResilienceSink};

/// Health of one upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Normal operation; outcomes feed the rolling window.
    Closed,
    /// Rejecting fast until the cooldown elapses.
    Open,
    /// One probe call is allowed through; its outcome decides the next state.
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => BreakerState::Open,
            2 => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }
}

/// Read-only view of a breaker for the diagnostics endpoint.
#[derive(Debug, Clone)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: BreakerState,
    pub window_calls: usize,
    pub window_failures: usize,
    /// Milliseconds until the next probe is allowed; 0 unless open.
    pub retry_in_ms: u64,
}

/// Circuit breaker with a rolling outcome window.
///
/// The fast path (`try_acquire` on a closed breaker) is a single atomic
/// load. Transitions happen under the window mutex, so exactly one caller
/// observes any given state change; the published state and next-retry
/// instant are plain atomics that readers can load without the lock.
pub struct CircuitBreaker {
    name: String,
    window_size: usize,
    min_calls: usize,
    failure_ratio: f64,
    cooldown: Duration,
    state: AtomicU8,
    /// Millis since `epoch` at which an open breaker may half-open.
    retry_at_ms: AtomicU64,
    probe_in_flight: AtomicBool,
    window: Mutex<VecDeque<bool>>,
    epoch: Instant,
    sink: Arc<dyn ResilienceSink>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: &BreakerConfig, sink: Arc<dyn ResilienceSink>) -> Self {
        CircuitBreaker {
            name: name.into(),
            window_size: config.window.max(1),
            min_calls: config.min_calls.max(1),
            failure_ratio: config.failure_ratio,
            cooldown: Duration::from_millis(config.cooldown_ms),
            state: AtomicU8::new(0),
            retry_at_ms: AtomicU64::new(0),
            probe_in_flight: AtomicBool::new(false),
            window: Mutex::new(VecDeque::new()),
            epoch: Instant::now(),
            sink,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> BreakerState {
        BreakerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether a call may proceed right now.
    ///
    /// Closed: yes. Open: only once the cooldown has elapsed, which flips the
    /// breaker to half-open and grants this caller the single probe. Half-open:
    /// only if the probe slot is still free.
    pub fn try_acquire(&self) -> bool {
        match self.state() {
            BreakerState::Closed => true,
            BreakerState::Open => {
                if self.now_ms() < self.retry_at_ms.load(Ordering::Acquire) {
                    return false;
                }
                self.half_open();
                self.claim_probe()
            }
            BreakerState::HalfOpen => self.claim_probe(),
        }
    }

    /// Feed a success tick.
    pub fn record_success(&self) {
        let mut window = match self.window.lock() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        };
        match self.state() {
            BreakerState::HalfOpen => {
                window.clear();
                self.probe_in_flight.store(false, Ordering::Release);
                self.transition(BreakerState::HalfOpen, BreakerState::Closed);
                debug!(breaker = %self.name, "probe succeeded, breaker closed");
            }
            BreakerState::Closed => {
                push_outcome(&mut window, true, self.window_size);
            }
            // A success landing after the breaker reopened carries no signal.
            BreakerState::Open => {}
        }
    }

    /// Feed a failure tick.
    pub fn record_failure(&self) {
        let mut window = match self.window.lock() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        };
        match self.state() {
            BreakerState::HalfOpen => {
                self.probe_in_flight.store(false, Ordering::Release);
                self.arm_cooldown();
                self.transition(BreakerState::HalfOpen, BreakerState::Open);
                warn!(breaker = %self.name, "probe failed, breaker reopened");
            }
            BreakerState::Closed => {
                push_outcome(&mut window, false, self.window_size);
                let calls = window.len();
                let failures = window.iter().filter(|ok| !**ok).count();
                if calls >= self.min_calls
                    && failures as f64 / calls as f64 >= self.failure_ratio
                {
                    window.clear();
                    self.arm_cooldown();
                    self.transition(BreakerState::Closed, BreakerState::Open);
                    warn!(
                        breaker = %self.name,
                        failures,
                        calls,
                        "failure ratio exceeded, breaker opened"
                    );
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let window = match self.window.lock() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        };
        let state = self.state();
        let retry_in_ms = match state {
            BreakerState::Open => self
                .retry_at_ms
                .load(Ordering::Acquire)
                .saturating_sub(self.now_ms()),
            _ => 0,
        };
        BreakerSnapshot {
            name: self.name.clone(),
            state,
            window_calls: window.len(),
            window_failures: window.iter().filter(|ok| !**ok).count(),
            retry_in_ms,
        }
    }

    fn half_open(&self) {
        // Serialize the transition; only the first caller past the cooldown
        // performs it.
        let _window = match self.window.lock() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        };
        if self.state() == BreakerState::Open
            && self.now_ms() >= self.retry_at_ms.load(Ordering::Acquire)
        {
            self.probe_in_flight.store(false, Ordering::Release);
            self.transition(BreakerState::Open, BreakerState::HalfOpen);
            debug!(breaker = %self.name, "cooldown elapsed, breaker half-open");
        }
    }

    fn claim_probe(&self) -> bool {
        self.state() == BreakerState::HalfOpen
            && self
                .probe_in_flight
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }

    fn arm_cooldown(&self) {
        self.retry_at_ms
            .store(self.now_ms() + self.cooldown.as_millis() as u64, Ordering::Release);
    }

    fn transition(&self, from: BreakerState, to: BreakerState) {
        self.state.store(to as u8, Ordering::Release);
        self.sink.on_event(&ResilienceEvent::BreakerTransition {
            name: self.name.clone(),
            from,
            to,
        });
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

fn push_outcome(window: &mut VecDeque<bool>, ok: bool, cap: usize) {
    if window.len() == cap {
        window.pop_front();
    }
    window.push_back(ok);
}
