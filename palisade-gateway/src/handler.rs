use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{HeaderName, HeaderValue, CONTENT_LENGTH};
use axum::http::HeaderMap;
use axum::response::Response;
use palisade_core::{
    extract_or_generate, GatewayError, Identity, RequestContext, RequestId, REQUEST_ID_HEADER,
};
use palisade_observability::inject_trace_context;
use palisade_prometheus::metrics;
use palisade_proxy::dispatch;
use palisade_resilience::{CallError, EnvelopeError};
use palisade_security::{ActorEvent, TokenError};
use tracing::{info, warn, Instrument};

use crate::admission::{run_admission, Admission};
use crate::state::SharedState;

const SERVER_TIMING: &str = "server-timing";

/// The catch-all handler: the per-request state machine.
///
/// Stages run strictly in order (envelope, route, identity, admission,
/// resilient dispatch) and the first failure terminates the request with
/// the matching taxonomy error. Every path out of here carries the
/// correlation id and the `Server-Timing` breakdown.
pub async fn proxy_handler(
    State(state): State<SharedState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
) -> Response {
    let (parts, body) = request.into_parts();
    let request_id = extract_or_generate(&parts.headers);
    let path = parts.uri.path().to_string();
    let query = parts.uri.query().map(String::from);
    let mut timings: Vec<(&'static str, Duration)> = Vec::with_capacity(4);

    // Refuse oversized payloads before buffering them.
    let limit = state.max_payload_bytes;
    let declared_length = parts
        .headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared_length.is_some_and(|len| len > limit) {
        state
            .actors
            .record(&format!("ip:{}", peer.ip()), ActorEvent::ThreatDetected);
        return finalize(
            GatewayError::PayloadTooLarge(limit).to_response(&path, request_id.as_str()),
            &timings,
            &request_id,
        );
    }
    let body = match axum::body::to_bytes(body, limit).await {
        Ok(bytes) => bytes,
        Err(_) => {
            state
                .actors
                .record(&format!("ip:{}", peer.ip()), ActorEvent::ThreatDetected);
            return finalize(
                GatewayError::PayloadTooLarge(limit).to_response(&path, request_id.as_str()),
                &timings,
                &request_id,
            );
        }
    };

    let mut ctx = RequestContext::new(
        request_id.clone(),
        parts.method.clone(),
        &path,
        query,
        parts.headers,
        peer.ip(),
        body,
    );

    // Route resolution. Unmatched paths stop here.
    let started = Instant::now();
    let route = state
        .routes
        .resolve(&ctx.normalized_path, &ctx.method)
        .cloned();
    timings.push(("route", started.elapsed()));
    let Some(route) = route else {
        return finalize(
            GatewayError::NotFound(ctx.path.clone()).to_response(&ctx.path, request_id.as_str()),
            &timings,
            &request_id,
        );
    };

    // Identity. Missing or expired tokens collapse to anonymous on public
    // routes and to 401 everywhere else.
    let started = Instant::now();
    let resolved = {
        let span = tracing::info_span!("identity");
        let _guard = span.enter();
        state.verifier.resolve(&ctx.headers)
    };
    timings.push(("identity", started.elapsed()));
    ctx.identity = match resolved {
        Ok(identity) => {
            metrics::record_auth("ok");
            identity
        }
        Err(error @ (TokenError::Missing | TokenError::Expired)) if route.public => {
            metrics::record_auth(error.as_str());
            Identity::anonymous()
        }
        Err(error) => {
            metrics::record_auth(error.as_str());
            let gateway_error = match error {
                TokenError::Expired => GatewayError::TokenExpired,
                other => GatewayError::Unauthorized(other.to_string()),
            };
            return finalize(
                gateway_error.to_response(&ctx.path, request_id.as_str()),
                &timings,
                &request_id,
            );
        }
    };

    // Admission: reputation, scan, rate limit, RBAC.
    let started = Instant::now();
    let admission = run_admission(&state, &ctx, &route)
        .instrument(tracing::info_span!("admission"))
        .await;
    timings.push(("admission", started.elapsed()));
    let rate = match admission {
        Admission::Allow { rate } => rate,
        Admission::Deny { stage, error } => {
            info!(
                request_id = %request_id,
                stage = stage.as_str(),
                code = error.code(),
                "request denied at admission"
            );
            return finalize(
                error.to_response(&ctx.path, request_id.as_str()),
                &timings,
                &request_id,
            );
        }
    };

    // Resilient dispatch.
    let Some(runtime) = state.upstreams.get(&route.upstream).cloned() else {
        warn!(upstream = %route.upstream, "route names an unknown upstream");
        return finalize(
            GatewayError::Internal("unresolved upstream".to_string())
                .to_response(&ctx.path, request_id.as_str()),
            &timings,
            &request_id,
        );
    };
    let deadline = Instant::now() + runtime.total_timeout;
    let mut upstream_headers = HeaderMap::new();
    inject_trace_context(&mut upstream_headers);
    let retries_allowed = route.retries_allowed(&ctx.method);

    let started = Instant::now();
    let outcome = runtime
        .envelope
        .run(retries_allowed, deadline, |_attempt| {
            dispatch(&runtime.upstream, &ctx, &upstream_headers)
        })
        .instrument(tracing::info_span!("dispatch", upstream = %route.upstream))
        .await;
    timings.push(("upstream", started.elapsed()));

    match outcome {
        Ok(mut response) => {
            metrics::record_upstream_status(&route.upstream, response.status().as_u16());
            if let Some(rate) = rate {
                attach_rate_headers(response.headers_mut(), rate.limit, rate.remaining, rate.reset_secs);
            }
            finalize(response, &timings, &request_id)
        }
        Err(error) => {
            let gateway_error = map_envelope_error(error, &route.upstream);
            if let GatewayError::UpstreamError { last_status, .. } = gateway_error {
                metrics::record_upstream_status(&route.upstream, last_status);
            }
            info!(
                request_id = %request_id,
                upstream = %route.upstream,
                code = gateway_error.code(),
                "upstream call failed"
            );
            finalize(
                gateway_error.to_response(&ctx.path, request_id.as_str()),
                &timings,
                &request_id,
            )
        }
    }
}

fn map_envelope_error(error: EnvelopeError, upstream: &str) -> GatewayError {
    match error {
        EnvelopeError::BulkheadFull => GatewayError::BulkheadFull(upstream.to_string()),
        EnvelopeError::CircuitOpen => GatewayError::CircuitOpen(upstream.to_string()),
        EnvelopeError::Timeout => GatewayError::UpstreamTimeout(upstream.to_string()),
        EnvelopeError::Exhausted(CallError::Status(status)) => GatewayError::UpstreamError {
            upstream: upstream.to_string(),
            last_status: status,
        },
        EnvelopeError::Exhausted(_) => GatewayError::UpstreamError {
            upstream: upstream.to_string(),
            last_status: 502,
        },
    }
}

fn attach_rate_headers(headers: &mut HeaderMap, limit: u64, remaining: u64, reset: u64) {
    for (name, value) in [
        ("x-ratelimit-limit", limit),
        ("x-ratelimit-remaining", remaining),
        ("x-ratelimit-reset", reset),
    ] {
        if let Ok(v) = HeaderValue::from_str(&value.to_string()) {
            headers.insert(HeaderName::from_static(name), v);
        }
    }
}

/// Stamp the correlation id and the stage breakdown onto the response, and
/// flush per-stage latency metrics.
fn finalize(
    mut response: Response,
    timings: &[(&'static str, Duration)],
    request_id: &RequestId,
) -> Response {
    for (stage, duration) in timings {
        metrics::record_stage(stage, duration.as_secs_f64());
    }
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
        headers.insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    if !timings.is_empty() {
        if let Ok(value) = HeaderValue::from_str(&server_timing(timings)) {
            headers.insert(HeaderName::from_static(SERVER_TIMING), value);
        }
    }
    inject_trace_context(headers);
    response
}

fn server_timing(timings: &[(&'static str, Duration)]) -> String {
    timings
        .iter()
        .map(|(stage, duration)| format!("{stage};dur={:.1}", duration.as_secs_f64() * 1000.0))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_timing_formats_millis() {
        let header = server_timing(&[
            ("route", Duration::from_micros(200)),
            ("upstream", Duration::from_millis(42)),
        ]);
        assert_eq!(header, "route;dur=0.2, upstream;dur=42.0");
    }

    #[test]
    fn envelope_errors_map_to_the_taxonomy() {
        assert_eq!(
            map_envelope_error(EnvelopeError::BulkheadFull, "llm").code(),
            "bulkhead_full"
        );
        assert_eq!(
            map_envelope_error(EnvelopeError::CircuitOpen, "llm").code(),
            "circuit_open"
        );
        assert_eq!(
            map_envelope_error(EnvelopeError::Timeout, "llm").code(),
            "upstream_timeout"
        );
        let error = map_envelope_error(EnvelopeError::Exhausted(CallError::Status(503)), "llm");
        assert_eq!(error.code(), "upstream_error");
        assert_eq!(error.status().as_u16(), 502);
    }
}
