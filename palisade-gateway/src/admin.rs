//! Admin and diagnostic endpoints.
//!
//! | Path | Gating | Description |
//! |------|--------|-------------|
//! | `GET /health` (+ `/actuator/health` alias) | public | liveness + uptime |
//! | `GET /health/live` | public | always 200 |
//! | `GET /health/ready` | public | 503 once every breaker is open |
//! | `GET /metrics` | admin | Prometheus exposition |
//! | `GET /diagnostics/breakers` | admin | breaker states and window counts |
//! | `GET /diagnostics/limits?key=` | admin | live bucket counters for a key |

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use palisade_core::GatewayError;
use palisade_prometheus::metrics_handler;
use palisade_resilience::BreakerState;
use palisade_security::ADMIN_ROLE;
use serde::Deserialize;

use crate::state::SharedState;

pub fn admin_router() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health))
        .route("/actuator/health", get(health))
        .route("/health/live", get(liveness))
        .route("/health/ready", get(readiness))
        .route("/metrics", get(metrics))
        .route("/diagnostics/breakers", get(breakers))
        .route("/diagnostics/limits", get(limits))
}

/// Require a verified identity carrying the admin role.
fn ensure_admin(state: &SharedState, headers: &HeaderMap) -> Result<(), Response> {
    let identity = state.verifier.resolve(headers).map_err(|e| {
        GatewayError::Unauthorized(e.to_string()).to_response("/admin", "-")
    })?;
    if !identity.has_role(ADMIN_ROLE) {
        return Err(
            GatewayError::Forbidden("admin role required".to_string()).to_response("/admin", "-")
        );
    }
    Ok(())
}

async fn health(State(state): State<SharedState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "UP",
        "uptime_seconds": state.uptime_seconds(),
    }))
}

async fn liveness() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Ready while at least one upstream is reachable. With every breaker open
/// the gateway can't forward anything, so it reports DOWN and lets the
/// orchestrator pull it from rotation.
async fn readiness(State(state): State<SharedState>) -> impl IntoResponse {
    let snapshots: Vec<_> = state
        .upstreams
        .values()
        .map(|runtime| runtime.envelope.breaker().snapshot())
        .collect();
    let all_open = !snapshots.is_empty()
        && snapshots
            .iter()
            .all(|snapshot| snapshot.state == BreakerState::Open);

    let status = if all_open {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    let body = Json(serde_json::json!({
        "status": if all_open { "DOWN" } else { "UP" },
        "breakers_open": snapshots
            .iter()
            .filter(|s| s.state == BreakerState::Open)
            .count(),
        "upstreams": snapshots.len(),
    }));
    (status, body)
}

async fn metrics(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    if let Err(denied) = ensure_admin(&state, &headers) {
        return denied;
    }
    metrics_handler().await.into_response()
}

async fn breakers(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    if let Err(denied) = ensure_admin(&state, &headers) {
        return denied;
    }
    let body: serde_json::Map<String, serde_json::Value> = state
        .upstreams
        .values()
        .map(|runtime| {
            let snapshot = runtime.envelope.breaker().snapshot();
            (
                snapshot.name.clone(),
                serde_json::json!({
                    "state": snapshot.state.as_str(),
                    "window_calls": snapshot.window_calls,
                    "window_failures": snapshot.window_failures,
                    "retry_in_ms": snapshot.retry_in_ms,
                    "bulkhead_in_flight": runtime.envelope.bulkhead().in_flight(),
                    "bulkhead_queue_depth": runtime.envelope.bulkhead().queue_depth(),
                }),
            )
        })
        .collect();
    Json(serde_json::Value::Object(body)).into_response()
}

#[derive(Deserialize)]
struct LimitsQuery {
    key: String,
}

async fn limits(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(query): Query<LimitsQuery>,
) -> Response {
    if let Err(denied) = ensure_admin(&state, &headers) {
        return denied;
    }
    match state.limiter.counters(&query.key).await {
        Some(snapshot) => Json(serde_json::json!({
            "key": query.key,
            "count": snapshot.count,
            "burst_count": snapshot.burst_count,
            "window_remaining_ms": snapshot.window_remaining.as_millis() as u64,
        }))
        .into_response(),
        None => Json(serde_json::json!({
            "key": query.key,
            "count": 0,
            "burst_count": 0,
        }))
        .into_response(),
    }
}
