use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use palisade_core::config::{ConfigError, GatewayConfig};
use palisade_prometheus::MetricsSink;
use palisade_proxy::{RouteTable, Upstream};
use palisade_rate_limit::{InMemoryRateStore, RateLimiter, RatePolicy, RateStrategy};
use palisade_resilience::{
    Bulkhead, CircuitBreaker, ResilienceEnvelope, ResilienceSink, RetryPolicy,
};
use palisade_security::{IpReputationClient, Scanner, SuspiciousActorTable, TokenVerifier};

/// One upstream plus its resilience envelope and derived deadline budget.
pub struct UpstreamRuntime {
    pub upstream: Upstream,
    pub envelope: ResilienceEnvelope,
    /// Total per-request deadline: every attempt and backoff fits inside it.
    pub total_timeout: Duration,
}

/// Everything one request needs, assembled once at startup.
///
/// All fields are either immutable after construction or internally
/// synchronized; handlers share the state through an `Arc`.
pub struct GatewayState {
    pub verifier: TokenVerifier,
    pub scanner: Scanner,
    pub actors: SuspiciousActorTable,
    pub limiter: RateLimiter,
    pub rate_store: InMemoryRateStore,
    pub reputation: IpReputationClient,
    pub routes: RouteTable,
    pub upstreams: HashMap<String, Arc<UpstreamRuntime>>,
    /// Policy name -> (strategy, numbers), resolved from config once.
    pub policies: HashMap<String, (RateStrategy, RatePolicy)>,
    pub max_payload_bytes: usize,
    pub started_at: Instant,
}

pub type SharedState = Arc<GatewayState>;

impl GatewayState {
    pub fn from_config(config: &GatewayConfig) -> Result<Self, ConfigError> {
        let sink: Arc<dyn ResilienceSink> = Arc::new(MetricsSink);

        let mut upstreams = HashMap::new();
        for (name, upstream_config) in &config.upstreams {
            let upstream = Upstream::from_config(name, upstream_config)?;
            let retry = RetryPolicy::from_config(&upstream_config.retry);
            let attempt_timeout = Duration::from_millis(upstream_config.timeout_ms);
            let envelope = ResilienceEnvelope::new(
                name.clone(),
                Arc::new(Bulkhead::new(name.clone(), &upstream_config.bulkhead, sink.clone())),
                Arc::new(CircuitBreaker::new(
                    name.clone(),
                    &upstream_config.breaker,
                    sink.clone(),
                )),
                retry,
                attempt_timeout,
                sink.clone(),
            );
            upstreams.insert(
                name.clone(),
                Arc::new(UpstreamRuntime {
                    upstream,
                    envelope,
                    total_timeout: attempt_timeout * retry.max_attempts,
                }),
            );
        }

        let mut policies = HashMap::new();
        for (name, policy_config) in &config.rate_policies {
            let strategy = RateStrategy::parse(&policy_config.strategy).ok_or(
                ConfigError::Missing("rate_policies.*.strategy must name a known strategy"),
            )?;
            policies.insert(
                name.clone(),
                (strategy, RatePolicy::from_config(policy_config)),
            );
        }

        // Routes must only reference things that exist.
        for route in &config.routes {
            if !upstreams.contains_key(&route.upstream) {
                return Err(ConfigError::Missing("routes.*.upstream must name a configured upstream"));
            }
            if let Some(policy) = &route.rate_policy {
                if !policies.contains_key(policy) {
                    return Err(ConfigError::Missing(
                        "routes.*.rate_policy must name a configured policy",
                    ));
                }
            }
        }

        let rate_store = InMemoryRateStore::new();
        Ok(GatewayState {
            verifier: TokenVerifier::new(&config.token),
            scanner: Scanner::new(config.scan.clone()),
            actors: SuspiciousActorTable::with_default_threshold(),
            limiter: RateLimiter::new(rate_store.clone()),
            rate_store,
            reputation: IpReputationClient::new(&config.ip_reputation),
            routes: RouteTable::from_config(&config.routes),
            upstreams,
            policies,
            max_payload_bytes: config.scan.max_payload_bytes,
            started_at: Instant::now(),
        })
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
