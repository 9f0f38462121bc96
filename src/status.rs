use crate::worker::CycleReport;
use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use std::{net::SocketAddr, sync::Arc};
use tokio::{sync::RwLock, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[derive(Clone)]
pub struct StatusState {
    pub prometheus: PrometheusHandle,
    pub last_cycle: Arc<RwLock<Option<CycleReport>>>,
    /// When set, `/metrics` requires a matching `X-Metrics-Key` header.
    pub metrics_key: Option<String>,
}

pub fn router(state: StatusState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/status", get(last_cycle))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn serve(
    port: u16,
    state: StatusState,
    cancel: CancellationToken,
) -> Result<(), std::io::Error> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(target = "avito.status", %addr, "status_listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}

/// Waits for the server task after shutdown. Returns `false` if it panicked.
pub async fn join(server: JoinHandle<()>) -> bool {
    match server.await {
        Ok(()) => true,
        Err(err) => {
            error!(target = "avito.status", error = %err, "status_server_panicked");
            false
        }
    }
}

/// Liveness probe.
///
/// - Method: `GET`
/// - Path: `/health`
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
    }))
}

/// Prometheus text exposition of the worker counters.
async fn metrics_endpoint(State(state): State<StatusState>, headers: HeaderMap) -> Response {
    if let Some(secret) = state.metrics_key.as_deref() {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.prometheus.render(),
    )
        .into_response()
}

/// Outcome of the most recent finished cycle, `204` before the first one.
async fn last_cycle(State(state): State<StatusState>) -> Response {
    let last = state.last_cycle.read().await;
    match last.as_ref() {
        Some(report) => Json(report).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}
