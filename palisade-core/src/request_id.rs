use axum::http::HeaderMap;

/// Canonical correlation-id header, passed through when the client sends one.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Correlation id for one in-flight request.
///
/// Reused from the inbound `X-Request-Id` header when present, generated
/// (UUIDv4) otherwise. The same id appears in the response headers, every
/// span, every metric label-free log line, and the upstream request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Take the inbound `X-Request-Id` if usable, otherwise mint a new one.
///
/// Inbound values longer than 128 bytes or with non-visible-ASCII characters
/// are discarded rather than propagated.
pub fn extract_or_generate(headers: &HeaderMap) -> RequestId {
    let inbound = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .filter(|v| v.bytes().all(|b| (0x21..=0x7e).contains(&b)));

    match inbound {
        Some(v) => RequestId(v.to_string()),
        None => RequestId(uuid::Uuid::new_v4().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn passes_through_inbound_id() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("abc-123"));
        assert_eq!(extract_or_generate(&headers).as_str(), "abc-123");
    }

    #[test]
    fn generates_when_missing() {
        let id = extract_or_generate(&HeaderMap::new());
        assert_eq!(id.as_str().len(), 36);
    }

    #[test]
    fn rejects_oversized_or_binary_ids() {
        let mut headers = HeaderMap::new();
        headers.insert(
            REQUEST_ID_HEADER,
            HeaderValue::from_str(&"x".repeat(200)).unwrap(),
        );
        let id = extract_or_generate(&headers);
        assert_ne!(id.as_str().len(), 200);
    }
}
