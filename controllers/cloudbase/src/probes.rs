//! Liveness/readiness and metrics endpoints, plus the shared HTTP serving
//! helpers.
//!
//! Both probes report success once the process has started, regardless of
//! leadership: a non-leader replica must stay alive and ready so it can
//! take over the lease.

use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::ControllerError;
use crate::metrics::Metrics;

/// Router serving `/healthz` and `/readyz`.
pub fn probe_router() -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(|| async { "ok" }))
        .layer(TraceLayer::new_for_http())
}

/// Router serving `/metrics` in Prometheus text format.
pub fn metrics_router(metrics: Metrics) -> Router {
    Router::new()
        .route(
            "/metrics",
            get(move || {
                let metrics = metrics.clone();
                async move { metrics.render() }
            }),
        )
        .layer(TraceLayer::new_for_http())
}

/// Bind a listener; failure here is fatal for startup.
pub async fn bind(addr: &str) -> Result<TcpListener, ControllerError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ControllerError::Serve {
            addr: addr.to_string(),
            source,
        })
}

/// Serve a router on an already-bound listener until shutdown flips.
pub async fn serve_on(
    listener: TcpListener,
    router: Router,
    name: &'static str,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ControllerError> {
    let addr = listener
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    info!("{} listening on {}", name, addr);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
        .map_err(|source| ControllerError::Serve { addr, source })
}
