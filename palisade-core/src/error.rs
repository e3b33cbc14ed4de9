use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Rate-limit denial details carried on [`GatewayError::RateLimited`].
///
/// Everything needed to build the `429` response headers: the strategy that
/// produced the key, the window limit, what is left in it, and the residual
/// window in seconds (already rounded up).
#[derive(Debug, Clone)]
pub struct RateLimitExceeded {
    pub strategy: String,
    pub limit: u64,
    pub remaining: u64,
    pub reset_secs: u64,
}

/// The gateway error taxonomy.
///
/// Every terminal per-request failure maps to exactly one variant, and each
/// variant maps to one HTTP status and one machine-readable `error` code.
/// Response bodies are JSON: `{error, message, timestamp, path, request_id}`.
pub enum GatewayError {
    /// Missing or invalid bearer token.
    Unauthorized(String),
    /// Token signature was fine but `exp` is in the past.
    TokenExpired,
    /// Identity does not carry a required role.
    Forbidden(String),
    /// A rate policy denied the request.
    RateLimited(RateLimitExceeded),
    /// The security scanner blocked the request; payload is the reason string.
    Blocked(String),
    /// No bulkhead permit became available within the max wait.
    BulkheadFull(String),
    /// The upstream circuit breaker is open.
    CircuitOpen(String),
    /// The upstream did not answer within the per-call deadline.
    UpstreamTimeout(String),
    /// Retries exhausted against a failing upstream; carries the last status seen.
    UpstreamError { upstream: String, last_status: u16 },
    /// No route matched the normalized path.
    NotFound(String),
    /// Request body exceeded the configured scan limit.
    PayloadTooLarge(usize),
    /// Unexpected infrastructure fault; surfaced opaquely.
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Unauthorized(_) | GatewayError::TokenExpired => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden(_) | GatewayError::Blocked(_) => StatusCode::FORBIDDEN,
            GatewayError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::BulkheadFull(_) | GatewayError::CircuitOpen(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            GatewayError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::UpstreamError { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable error code for the JSON body.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Unauthorized(_) => "unauthorized",
            GatewayError::TokenExpired => "token_expired",
            GatewayError::Forbidden(_) => "forbidden",
            GatewayError::RateLimited(_) => "rate_limited",
            GatewayError::Blocked(_) => "blocked",
            GatewayError::BulkheadFull(_) => "bulkhead_full",
            GatewayError::CircuitOpen(_) => "circuit_open",
            GatewayError::UpstreamTimeout(_) => "upstream_timeout",
            GatewayError::UpstreamError { .. } => "upstream_error",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::PayloadTooLarge(_) => "payload_too_large",
            GatewayError::Internal(_) => "internal",
        }
    }

    /// Human-readable message for the JSON body. Internal faults stay opaque.
    pub fn message(&self) -> String {
        match self {
            GatewayError::Unauthorized(_) => "Authentication required".to_string(),
            GatewayError::TokenExpired => "Token expired".to_string(),
            GatewayError::Forbidden(_) => "Access denied".to_string(),
            GatewayError::RateLimited(info) => format!(
                "Rate limit exceeded for {} strategy; retry in {}s",
                info.strategy, info.reset_secs
            ),
            GatewayError::Blocked(reason) => reason.clone(),
            GatewayError::BulkheadFull(upstream) => {
                format!("Upstream {upstream} is at capacity")
            }
            GatewayError::CircuitOpen(upstream) => {
                format!("Upstream {upstream} is unavailable")
            }
            GatewayError::UpstreamTimeout(upstream) => {
                format!("Upstream {upstream} timed out")
            }
            GatewayError::UpstreamError { last_status, .. } => {
                format!("Upstream error (last status {last_status})")
            }
            GatewayError::NotFound(path) => format!("No route for {path}"),
            GatewayError::PayloadTooLarge(max) => {
                format!("Payload exceeds maximum of {max} bytes")
            }
            GatewayError::Internal(_) => "Internal server error".to_string(),
        }
    }

    /// Build the full error response, including the rate-limit header trio
    /// and `Retry-After` where applicable.
    pub fn to_response(&self, path: &str, request_id: &str) -> Response {
        let body = ErrorBody {
            error: self.code(),
            message: self.message(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            path: path.to_string(),
            request_id: request_id.to_string(),
        };
        let mut response = (self.status(), Json(body)).into_response();

        if let GatewayError::RateLimited(info) = self {
            let headers = response.headers_mut();
            insert_num(headers, "retry-after", info.reset_secs);
            insert_num(headers, "x-ratelimit-limit", info.limit);
            insert_num(headers, "x-ratelimit-remaining", info.remaining);
            insert_num(headers, "x-ratelimit-reset", info.reset_secs);
        }
        response
    }
}

fn insert_num(headers: &mut axum::http::HeaderMap, name: &'static str, value: u64) {
    if let Ok(v) = HeaderValue::from_str(&value.to_string()) {
        headers.insert(HeaderName::from_static(name), v);
    }
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayError::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            GatewayError::TokenExpired => write!(f, "token expired"),
            GatewayError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            GatewayError::RateLimited(info) => {
                write!(f, "rate limited ({} strategy)", info.strategy)
            }
            GatewayError::Blocked(reason) => write!(f, "blocked: {reason}"),
            GatewayError::BulkheadFull(upstream) => write!(f, "bulkhead full: {upstream}"),
            GatewayError::CircuitOpen(upstream) => write!(f, "circuit open: {upstream}"),
            GatewayError::UpstreamTimeout(upstream) => write!(f, "upstream timeout: {upstream}"),
            GatewayError::UpstreamError {
                upstream,
                last_status,
            } => write!(f, "upstream error: {upstream} (last status {last_status})"),
            GatewayError::NotFound(path) => write!(f, "not found: {path}"),
            GatewayError::PayloadTooLarge(max) => write!(f, "payload too large (max {max})"),
            GatewayError::Internal(msg) => write!(f, "internal: {msg}"),
        }
    }
}

impl std::fmt::Debug for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        <Self as std::fmt::Display>::fmt(self, f)
    }
}

impl std::error::Error for GatewayError {}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        self.to_response("", "")
    }
}

/// JSON body attached to every error response.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    pub timestamp: String,
    pub path: String,
    pub request_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn error_parts(err: GatewayError) -> (StatusCode, serde_json::Value) {
        let resp = err.to_response("/api/v1/debates", "req-1");
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        (status, json)
    }

    #[tokio::test]
    async fn unauthorized_maps_to_401() {
        let (status, body) = error_parts(GatewayError::Unauthorized("no header".into())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "unauthorized");
        assert_eq!(body["message"], "Authentication required");
        assert_eq!(body["path"], "/api/v1/debates");
        assert_eq!(body["request_id"], "req-1");
    }

    #[tokio::test]
    async fn expired_token_has_its_own_code() {
        let (status, body) = error_parts(GatewayError::TokenExpired).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "token_expired");
    }

    #[tokio::test]
    async fn rate_limited_carries_header_trio() {
        let err = GatewayError::RateLimited(RateLimitExceeded {
            strategy: "user".into(),
            limit: 10,
            remaining: 0,
            reset_secs: 1,
        });
        let resp = err.to_response("/api/v1/llm", "req-2");
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers()["retry-after"], "1");
        assert_eq!(resp.headers()["x-ratelimit-limit"], "10");
        assert_eq!(resp.headers()["x-ratelimit-remaining"], "0");
        assert_eq!(resp.headers()["x-ratelimit-reset"], "1");
    }

    #[tokio::test]
    async fn internal_message_is_opaque() {
        let (status, body) =
            error_parts(GatewayError::Internal("pool exploded: secret".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "Internal server error");
    }

    #[tokio::test]
    async fn upstream_errors_map_to_gateway_statuses() {
        let (status, body) = error_parts(GatewayError::UpstreamError {
            upstream: "debate".into(),
            last_status: 503,
        })
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], "upstream_error");

        let (status, _) = error_parts(GatewayError::UpstreamTimeout("llm".into())).await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn not_found_body_names_the_path() {
        let (status, body) = error_parts(GatewayError::NotFound("/nope".into())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
        assert!(body["message"].as_str().unwrap().contains("/nope"));
    }
}
