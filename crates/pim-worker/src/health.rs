//! Liveness/readiness HTTP endpoint
//!
//! Minimal axum listener: `GET /health` and `GET /healthz` report liveness
//! with the worker identifier, `GET /ready` reports readiness, everything
//! else is a 404. The listener shuts down with the worker's shutdown signal.

use std::net::SocketAddr;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

/// Build the health router.
pub fn router(worker_id: String) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/ready", get(ready))
        .fallback(not_found)
        .with_state(worker_id)
}

/// Bind the health listener; failures here are startup failures.
pub async fn bind(port: u16) -> anyhow::Result<TcpListener> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind health port {}: {}", port, e))?;
    info!(port, "health endpoint listening");
    Ok(listener)
}

/// Serve until the shutdown flag flips.
pub async fn serve(
    listener: TcpListener,
    worker_id: String,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    axum::serve(listener, router(worker_id))
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await?;

    info!("health endpoint closed");
    Ok(())
}

async fn health(State(worker_id): State<String>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "worker_id": worker_id,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn ready() -> Json<Value> {
    Json(json!({ "status": "ready" }))
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn get_status(path: &str) -> (StatusCode, Value) {
        let app = router("worker-test".to_string());
        let response = app
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    #[tokio::test]
    async fn test_health_routes_report_ok() {
        for path in ["/health", "/healthz"] {
            let (status, body) = get_status(path).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["status"], "ok");
            assert_eq!(body["worker_id"], "worker-test");
            assert!(body["timestamp"].is_string());
        }
    }

    #[tokio::test]
    async fn test_ready_route() {
        let (status, body) = get_status("/ready").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "ready" }));
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let (status, _) = get_status("/metrics").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
