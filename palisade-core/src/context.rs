use std::net::IpAddr;
use std::time::Instant;

use axum::http::{HeaderMap, Method};
use bytes::Bytes;

use crate::identity::Identity;
use crate::path::normalize_path;
use crate::request_id::RequestId;

/// One in-flight inbound request, owned exclusively by the pipeline.
///
/// Created at the listener; the body is buffered up to the scan limit so the
/// scanner can see it and retries can replay it. The dispatcher hands body
/// ownership to the upstream connection and the response body flows back to
/// the listener as a stream.
pub struct RequestContext {
    pub request_id: RequestId,
    pub method: Method,
    /// Original path with version segments included; this is what gets forwarded.
    pub path: String,
    /// Raw query string, without the leading `?`.
    pub query: Option<String>,
    /// Path with versions stripped and ids replaced, for matching and keying.
    pub normalized_path: String,
    pub headers: HeaderMap,
    pub peer: IpAddr,
    pub received_at: Instant,
    /// Resolved once by the identity stage, immutable afterwards.
    pub identity: Identity,
    pub body: Bytes,
}

impl RequestContext {
    pub fn new(
        request_id: RequestId,
        method: Method,
        path: &str,
        query: Option<String>,
        headers: HeaderMap,
        peer: IpAddr,
        body: Bytes,
    ) -> Self {
        RequestContext {
            request_id,
            method,
            path: path.to_string(),
            query,
            normalized_path: normalize_path(path),
            headers,
            peer,
            received_at: Instant::now(),
            identity: Identity::anonymous(),
            body,
        }
    }

    /// Accounting key for the caller behind this request.
    pub fn client_key(&self) -> String {
        self.identity.client_key(self.peer)
    }

    /// Value of a request header as UTF-8, if present and valid.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Path plus query, as received.
    pub fn path_and_query(&self) -> String {
        match &self.query {
            Some(q) => format!("{}?{}", self.path, q),
            None => self.path.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request_id::extract_or_generate;

    fn ctx(path: &str) -> RequestContext {
        let headers = HeaderMap::new();
        RequestContext::new(
            extract_or_generate(&headers),
            Method::GET,
            path,
            None,
            headers,
            "127.0.0.1".parse().unwrap(),
            Bytes::new(),
        )
    }

    #[test]
    fn normalizes_path_on_construction() {
        let c = ctx("/api/v1/debates/99");
        assert_eq!(c.path, "/api/v1/debates/99");
        assert_eq!(c.normalized_path, "/api/debates/{id}");
    }

    #[test]
    fn path_and_query_round_trips() {
        let mut c = ctx("/api/v1/search");
        c.query = Some("q=rust".to_string());
        assert_eq!(c.path_and_query(), "/api/v1/search?q=rust");
    }
}
