//! Minimal liveness/readiness server shared by every long-running binary
//! (§4.6 "serve a degraded readiness probe", generalized in SPEC_FULL.md
//! to API, worker, and projection worker alike).

use std::future::Future;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use axum::http::StatusCode;

/// Spawns a background task serving `/healthz` (always 200 once the
/// process is up) and `/readyz` (200 only while `is_ready` returns true).
/// Binds best-effort: a failure to bind is logged and the task exits,
/// since a broken health port should not take down the worker it reports
/// on.
pub fn spawn_health_server<F, Fut>(bind_addr: String, is_ready: F)
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    spawn_health_server_with_metrics(bind_addr, is_ready, || String::new())
}

/// As [`spawn_health_server`], plus a `/metrics` route rendering
/// `render_metrics`'s output verbatim as the response body.
pub fn spawn_health_server_with_metrics<F, Fut, M>(bind_addr: String, is_ready: F, render_metrics: M)
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send + 'static,
    M: Fn() -> String + Send + Sync + 'static,
{
    let is_ready = Arc::new(is_ready);
    let render_metrics = Arc::new(render_metrics);
    tokio::spawn(async move {
        let app = Router::new()
            .route("/healthz", get(|| async { StatusCode::OK }))
            .route(
                "/readyz",
                get(move || {
                    let is_ready = is_ready.clone();
                    async move {
                        if is_ready().await {
                            StatusCode::OK
                        } else {
                            StatusCode::SERVICE_UNAVAILABLE
                        }
                    }
                }),
            )
            .route(
                "/metrics",
                get(move || {
                    let render_metrics = render_metrics.clone();
                    async move { render_metrics() }
                }),
            );

        match tokio::net::TcpListener::bind(&bind_addr).await {
            Ok(listener) => {
                tracing::info!(%bind_addr, "health server listening");
                if let Err(err) = axum::serve(listener, app).await {
                    tracing::error!(%err, "health server exited");
                }
            }
            Err(err) => tracing::error!(%bind_addr, %err, "failed to bind health server"),
        }
    });
}
