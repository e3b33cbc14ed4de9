use palisade_core::{GatewayError, RateLimitExceeded, RequestContext};
use palisade_prometheus::metrics;
use palisade_proxy::Route;
use palisade_rate_limit::RateCheck;
use palisade_security::{check_route_access, ActorEvent, ReputationVerdict};
use tracing::{info, Instrument};

use crate::state::GatewayState;

/// The fixed admission stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Reputation,
    Scan,
    RateLimit,
    Rbac,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Reputation => "reputation",
            Stage::Scan => "scan",
            Stage::RateLimit => "rate_limit",
            Stage::Rbac => "rbac",
        }
    }
}

/// Outcome of the admission pipeline. Exactly one decision per request:
/// the first denying stage, or `Allow` when every check passed.
pub enum Admission {
    Allow {
        /// Rate counters for the response header trio, when a policy ran.
        rate: Option<RateCheck>,
    },
    Deny {
        stage: Stage,
        error: GatewayError,
    },
}

/// Run the four checks in their fixed order, short-circuiting on the first
/// deny. Every stage records its own metric outcome.
pub async fn run_admission(
    state: &GatewayState,
    ctx: &RequestContext,
    route: &Route,
) -> Admission {
    // 1. IP reputation: best effort, fail-open.
    if state.reputation.enabled() {
        let verdict = state
            .reputation
            .check(ctx.peer)
            .instrument(tracing::info_span!("reputation"))
            .await;
        match verdict {
            ReputationVerdict::Malicious => {
                metrics::record_admission(Stage::Reputation.as_str(), "deny");
                return Admission::Deny {
                    stage: Stage::Reputation,
                    error: GatewayError::Blocked("Blocked by IP reputation".to_string()),
                };
            }
            ReputationVerdict::Unknown => {
                metrics::record_reputation_failure();
                metrics::record_admission(Stage::Reputation.as_str(), "allow");
            }
            ReputationVerdict::Clean => {
                metrics::record_admission(Stage::Reputation.as_str(), "allow");
            }
        }
    }

    // 2. Security scan: path, headers, payload.
    let span = tracing::info_span!("scan");
    let result = span.in_scope(|| state.scanner.scan(&ctx.path, &ctx.headers, &ctx.body));
    let client_key = ctx.client_key();
    if result.threats.is_empty() {
        state.actors.record(&client_key, ActorEvent::NormalRequest);
    } else {
        state.actors.record(&client_key, ActorEvent::ThreatDetected);
        for threat in &result.threats {
            metrics::record_threat(threat.kind.as_str());
        }
    }
    if result.blocked {
        let reason = result
            .reason
            .unwrap_or_else(|| "Security threats detected".to_string());
        info!(
            client = %client_key,
            risk = result.total_risk,
            "request blocked by scanner"
        );
        metrics::record_admission(Stage::Scan.as_str(), "deny");
        return Admission::Deny {
            stage: Stage::Scan,
            error: GatewayError::Blocked(reason),
        };
    }
    metrics::record_admission(Stage::Scan.as_str(), "allow");

    // 3. Rate limiting: one atomic accounting step per configured policy.
    let mut rate = None;
    if let Some(policy_name) = &route.rate_policy {
        if let Some((strategy, policy)) = state.policies.get(policy_name) {
            let check = state
                .limiter
                .check(*strategy, policy, ctx)
                .instrument(tracing::info_span!("rate_limit"))
                .await;
            metrics::record_rate_limit(check.strategy, check.allowed);
            if !check.allowed {
                metrics::record_admission(Stage::RateLimit.as_str(), "deny");
                return Admission::Deny {
                    stage: Stage::RateLimit,
                    error: GatewayError::RateLimited(RateLimitExceeded {
                        strategy: check.strategy.to_string(),
                        limit: check.limit,
                        remaining: check.remaining,
                        reset_secs: check.reset_secs,
                    }),
                };
            }
            rate = Some(check);
        }
    }
    metrics::record_admission(Stage::RateLimit.as_str(), "allow");

    // 4. RBAC.
    if !check_route_access(&ctx.identity, &route.required_roles) {
        metrics::record_admission(Stage::Rbac.as_str(), "deny");
        return Admission::Deny {
            stage: Stage::Rbac,
            error: GatewayError::Forbidden(format!(
                "subject {} lacks a required role",
                ctx.identity.subject
            )),
        };
    }
    metrics::record_admission(Stage::Rbac.as_str(), "allow");

    Admission::Allow { rate }
}
