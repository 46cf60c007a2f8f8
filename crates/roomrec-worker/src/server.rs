//! Side HTTP server hosted by the dispatcher.
//!
//! Serves the capture page and bundle the sessions load, a liveness
//! endpoint, and Prometheus metrics. Keeps running while sessions drain.

use std::net::SocketAddr;
use std::path::Path;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tokio::sync::watch;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::dispatcher::DispatcherStatus;
use crate::error::WorkerResult;

#[derive(Clone)]
pub struct ServerState {
    pub status: watch::Receiver<DispatcherStatus>,
}

/// Health response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub active_sessions: usize,
    pub draining: bool,
    pub timestamp: String,
}

/// Liveness probe.
async fn health(State(state): State<ServerState>) -> Json<HealthResponse> {
    let snapshot = *state.status.borrow();
    Json(HealthResponse {
        status: if snapshot.draining { "draining" } else { "healthy" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        active_sessions: snapshot.active_sessions,
        draining: snapshot.draining,
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Build the router. Unknown paths fall through to the static directory.
pub fn router(
    state: ServerState,
    metrics_handle: Option<PrometheusHandle>,
    static_dir: impl AsRef<Path>,
) -> Router {
    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new()
        .route("/health", get(health))
        .with_state(state)
        .merge(metrics_routes)
        .fallback_service(ServeDir::new(static_dir.as_ref()))
        .layer(TraceLayer::new_for_http())
}

/// Bind and serve until the process exits.
pub async fn serve(port: u16, app: Router) -> WorkerResult<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Side server listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn state() -> (watch::Sender<DispatcherStatus>, ServerState) {
        let (tx, rx) = watch::channel(DispatcherStatus::default());
        (tx, ServerState { status: rx })
    }

    async fn get_body(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_health_reports_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, state) = state();
        tx.send(DispatcherStatus {
            active_sessions: 2,
            draining: true,
        })
        .unwrap();

        let (status, body) = get_body(router(state, None, dir.path()), "/health").await;
        assert_eq!(status, StatusCode::OK);

        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "draining");
        assert_eq!(json["active_sessions"], 2);
        assert_eq!(json["draining"], true);
    }

    #[tokio::test]
    async fn test_serves_capture_page() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<html>capture</html>").unwrap();
        let (_tx, state) = state();

        let (status, body) = get_body(router(state, None, dir.path()), "/index.html").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("capture"));
    }

    #[tokio::test]
    async fn test_metrics_absent_without_recorder() {
        let dir = tempfile::tempdir().unwrap();
        let (_tx, state) = state();

        let (status, _) = get_body(router(state, None, dir.path()), "/metrics").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
