use axum::body::Bytes;
use axum::extract::Request;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::routing::{any, get, post};
use axum::{Json, Router};
use http_body_util::BodyExt;
use palisade_core::config::UpstreamConfig;
use palisade_core::request_id::RequestId;
use palisade_core::RequestContext;
use palisade_proxy::{dispatch, Upstream};
use palisade_resilience::CallError;

/// Spawn a throwaway upstream and return its base URL.
async fn spawn_upstream(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

fn upstream_for(base_url: String) -> Upstream {
    Upstream::from_config(
        "echo",
        &UpstreamConfig {
            base_url,
            pool_size: 4,
            timeout_ms: 2_000,
            connect_timeout_ms: 500,
            idle_timeout_ms: 5_000,
            bulkhead: Default::default(),
            retry: Default::default(),
            breaker: Default::default(),
        },
    )
    .unwrap()
}

fn request(method: Method, path: &str, body: &'static [u8]) -> RequestContext {
    let mut ctx = RequestContext::new(
        RequestId("it-req".into()),
        method,
        path,
        None,
        HeaderMap::new(),
        "127.0.0.1".parse().unwrap(),
        Bytes::from_static(body),
    );
    ctx.identity.subject = "u-7".into();
    ctx
}

#[tokio::test]
async fn forwards_method_path_and_body() {
    let router = Router::new().route(
        "/api/v1/echo",
        post(|headers: HeaderMap, body: Bytes| async move {
            Json(serde_json::json!({
                "body": String::from_utf8_lossy(&body),
                "request_id": headers["x-request-id"].to_str().unwrap(),
                "user": headers["x-user-id"].to_str().unwrap(),
            }))
        }),
    );
    let upstream = upstream_for(spawn_upstream(router).await);

    let ctx = request(Method::POST, "/api/v1/echo", b"hello");
    let response = dispatch(&upstream, &ctx, &HeaderMap::new()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["body"], "hello");
    assert_eq!(json["request_id"], "it-req");
    assert_eq!(json["user"], "u-7");
}

#[tokio::test]
async fn passes_4xx_through_untouched() {
    let router = Router::new().route(
        "/missing",
        get(|| async { (StatusCode::NOT_FOUND, "nope") }),
    );
    let upstream = upstream_for(spawn_upstream(router).await);

    let ctx = request(Method::GET, "/missing", b"");
    let response = dispatch(&upstream, &ctx, &HeaderMap::new()).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"nope");
}

#[tokio::test]
async fn server_errors_become_call_errors() {
    let router = Router::new().route(
        "/flaky",
        any(|| async { StatusCode::SERVICE_UNAVAILABLE }),
    );
    let upstream = upstream_for(spawn_upstream(router).await);

    let ctx = request(Method::GET, "/flaky", b"");
    let error = dispatch(&upstream, &ctx, &HeaderMap::new()).await.unwrap_err();
    assert_eq!(error, CallError::Status(503));
}

#[tokio::test]
async fn refused_connection_is_a_connect_error() {
    let upstream = upstream_for("http://127.0.0.1:1".to_string());
    let ctx = request(Method::GET, "/x", b"");
    let error = dispatch(&upstream, &ctx, &HeaderMap::new()).await.unwrap_err();
    assert!(matches!(error, CallError::Connect(_)));
}

#[tokio::test]
async fn upstream_sees_original_versioned_path() {
    let router = Router::new().route(
        "/api/v2/things",
        get(|request: Request| async move {
            Json(serde_json::json!({ "path": request.uri().path() }))
        }),
    );
    let upstream = upstream_for(spawn_upstream(router).await);

    let ctx = request(Method::GET, "/api/v2/things", b"");
    let response = dispatch(&upstream, &ctx, &HeaderMap::new()).await.unwrap();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["path"], "/api/v2/things");
}

#[tokio::test]
async fn extra_headers_reach_the_upstream() {
    let router = Router::new().route(
        "/traced",
        get(|headers: HeaderMap| async move {
            match headers.get("traceparent") {
                Some(v) => v.to_str().unwrap().to_string(),
                None => "absent".to_string(),
            }
        }),
    );
    let upstream = upstream_for(spawn_upstream(router).await);

    let mut extra = HeaderMap::new();
    extra.insert(
        "traceparent",
        HeaderValue::from_static("00-abc-def-01"),
    );
    let ctx = request(Method::GET, "/traced", b"");
    let response = dispatch(&upstream, &ctx, &extra).await.unwrap();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"00-abc-def-01");
}
