use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderName, HeaderValue};
use axum::Router;
use palisade_core::config::GatewayConfig;
use palisade_observability::TraceLayer;
use palisade_prometheus::PrometheusLayer;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::{error, info};

use crate::admin::admin_router;
use crate::handler::proxy_handler;
use crate::state::{GatewayState, SharedState};

/// Security headers stamped on every gateway-originated response.
const SECURITY_HEADERS: &[(&str, &str)] = &[
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "DENY"),
    ("strict-transport-security", "max-age=31536000; includeSubDomains"),
    ("referrer-policy", "strict-origin-when-cross-origin"),
];

/// Assemble the full router: admin surface, catch-all proxy, and the
/// observability/metrics/panic layers.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .merge(admin_router())
        .fallback(proxy_handler)
        .layer(axum::middleware::from_fn(secure_headers))
        .layer(PrometheusLayer::default())
        .layer(TraceLayer)
        .layer(CatchPanicLayer::new())
        .with_state(state)
}

async fn secure_headers(
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    for (name, value) in SECURITY_HEADERS {
        headers.insert(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        );
    }
    response
}

/// Hourly sweep of the actor table and lapsed rate-limit slots.
fn spawn_prune_task(state: SharedState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60 * 60));
        interval.tick().await;
        loop {
            interval.tick().await;
            let removed = state.actors.prune();
            state.rate_store.evict_expired();
            info!(removed, "hourly prune pass finished");
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => error!(error = %e, "failed to install SIGTERM handler"),
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received, draining");
}

/// Bind the listener and serve until shutdown.
pub async fn run(config: GatewayConfig) -> Result<(), Box<dyn std::error::Error>> {
    let address: SocketAddr = config.listener.address.parse()?;
    let tls = config.listener.tls.clone();
    let state: SharedState = Arc::new(GatewayState::from_config(&config)?);
    spawn_prune_task(state.clone());
    let router = build_router(state);

    match tls {
        Some(tls) => {
            info!(%address, "listener up (tls)");
            let rustls = axum_server::tls_rustls::RustlsConfig::from_pem_file(
                &tls.cert, &tls.key,
            )
            .await?;
            axum_server::bind_rustls(address, rustls)
                .serve(router.into_make_service_with_connect_info::<SocketAddr>())
                .await?;
        }
        None => {
            info!(%address, "listener up");
            let listener = tokio::net::TcpListener::bind(address).await?;
            axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        }
    }
    Ok(())
}
