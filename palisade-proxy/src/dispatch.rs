use axum::body::Body;
use axum::response::Response;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::debug;

use palisade_core::{RequestContext, REQUEST_ID_HEADER};
use palisade_resilience::CallError;

use crate::upstream::Upstream;

/// Hop-by-hop headers that never cross the proxy, either direction.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Request-side headers the client sets itself; the pool fills these in.
const MANAGED: &[&str] = &["host", "content-length"];

const X_USER_ID: &str = "x-user-id";
const X_ORGANIZATION_ID: &str = "x-organization-id";
const X_FORWARDED_FOR: &str = "x-forwarded-for";

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.iter().any(|h| name.as_str() == *h)
}

/// Build the header set for the upstream request: the inbound headers minus
/// hop-by-hop and pool-managed entries, plus the injected identity,
/// correlation, and forwarding headers.
pub fn forward_headers(ctx: &RequestContext) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(ctx.headers.len() + 4);
    for (name, value) in &ctx.headers {
        if is_hop_by_hop(name) || MANAGED.iter().any(|h| name.as_str() == *h) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    if let Ok(value) = HeaderValue::from_str(ctx.request_id.as_str()) {
        headers.insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }

    if !ctx.identity.is_anonymous() {
        if let Ok(value) = HeaderValue::from_str(&ctx.identity.subject) {
            headers.insert(HeaderName::from_static(X_USER_ID), value);
        }
    }
    if let Some(tenant) = &ctx.identity.tenant {
        if let Ok(value) = HeaderValue::from_str(tenant) {
            headers.insert(HeaderName::from_static(X_ORGANIZATION_ID), value);
        }
    }

    // Append the peer to any existing X-Forwarded-For chain.
    let forwarded = match ctx.header(X_FORWARDED_FOR) {
        Some(existing) => format!("{existing}, {}", ctx.peer),
        None => ctx.peer.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&forwarded) {
        headers.insert(HeaderName::from_static(X_FORWARDED_FOR), value);
    }

    headers
}

/// Send one attempt to the upstream and stream the response back.
///
/// 5xx responses become [`CallError::Status`] so the resilience envelope can
/// classify and retry them; everything else (2xx/3xx/4xx) streams through
/// with hop-by-hop headers stripped. The request body is the buffered bytes
/// from the envelope, so replaying an attempt is a cheap clone.
pub async fn dispatch(
    upstream: &Upstream,
    ctx: &RequestContext,
    extra_headers: &HeaderMap,
) -> Result<Response, CallError> {
    let url = upstream
        .target_url(&ctx.path, ctx.query.as_deref())
        .map_err(|e| CallError::Connect(e.to_string()))?;

    let mut headers = forward_headers(ctx);
    for (name, value) in extra_headers {
        headers.insert(name.clone(), value.clone());
    }

    debug!(upstream = upstream.name(), url = %url, "dispatching");

    let outcome = upstream
        .client()
        .request(ctx.method.clone(), url)
        .headers(headers)
        .body(reqwest::Body::from(ctx.body.clone()))
        .send()
        .await;

    let response = match outcome {
        Ok(response) => response,
        Err(error) if error.is_timeout() => return Err(CallError::Timeout),
        Err(error) => return Err(CallError::Connect(error.to_string())),
    };

    let status = response.status();
    if status.is_server_error() {
        return Err(CallError::Status(status.as_u16()));
    }

    let mut builder = Response::builder().status(status);
    if let Some(headers) = builder.headers_mut() {
        for (name, value) in response.headers() {
            if !is_hop_by_hop(name) {
                headers.append(name.clone(), value.clone());
            }
        }
    }
    builder
        .body(Body::from_stream(response.bytes_stream()))
        .map_err(|e| CallError::Connect(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Method;
    use bytes::Bytes;
    use palisade_core::request_id::RequestId;

    fn ctx() -> RequestContext {
        let mut headers = HeaderMap::new();
        headers.insert("accept", HeaderValue::from_static("application/json"));
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("x-forwarded-for", HeaderValue::from_static("198.51.100.7"));
        let mut ctx = RequestContext::new(
            RequestId("req-9".into()),
            Method::POST,
            "/api/v1/debates",
            None,
            headers,
            "203.0.113.4".parse().unwrap(),
            Bytes::from_static(b"{}"),
        );
        ctx.identity.subject = "u-1".into();
        ctx.identity.tenant = Some("org-2".into());
        ctx
    }

    #[test]
    fn hop_by_hop_headers_are_stripped() {
        let headers = forward_headers(&ctx());
        assert!(headers.get("connection").is_none());
        assert!(headers.get("transfer-encoding").is_none());
        assert_eq!(headers["accept"], "application/json");
    }

    #[test]
    fn identity_and_correlation_headers_are_injected() {
        let headers = forward_headers(&ctx());
        assert_eq!(headers[REQUEST_ID_HEADER], "req-9");
        assert_eq!(headers["x-user-id"], "u-1");
        assert_eq!(headers["x-organization-id"], "org-2");
    }

    #[test]
    fn peer_is_appended_to_forwarded_chain() {
        let headers = forward_headers(&ctx());
        assert_eq!(headers["x-forwarded-for"], "198.51.100.7, 203.0.113.4");
    }

    #[test]
    fn anonymous_identity_injects_no_user_header() {
        let mut c = ctx();
        c.identity = palisade_core::Identity::anonymous();
        let headers = forward_headers(&c);
        assert!(headers.get("x-user-id").is_none());
        assert!(headers.get("x-organization-id").is_none());
    }
}
