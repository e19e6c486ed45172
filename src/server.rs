//! HTTP/WebSocket front end.
//!
//! `GET /call` upgrades to a WebSocket and runs one session on it,
//! `GET /health` reports session counters and `POST /offer` answers 501
//! until media negotiation exists.

use crate::session::SessionManager;
use crate::transport::ws;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

pub fn router(manager: Arc<SessionManager>) -> Router {
    Router::new()
        .route("/call", get(call))
        .route("/health", get(health))
        .route("/offer", post(offer))
        .with_state(manager)
}

async fn call(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(manager): State<Arc<SessionManager>>,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        let report = manager
            .run_connection(ws::connection(socket, peer.to_string()))
            .await;
        tracing::debug!(session = %report.id, state = %report.final_state, "websocket session finished");
    })
}

async fn health(State(manager): State<Arc<SessionManager>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": crate::version_string(),
        "sessions": manager.stats(),
    }))
}

async fn offer() -> impl IntoResponse {
    (
        StatusCode::NOT_IMPLEMENTED,
        Json(serde_json::json!({
            "error": "media negotiation is not supported; connect to /call",
        })),
    )
}

/// Serve until `shutdown` resolves, then ask every session to drain and wait
/// up to `drain_timeout` for them to finish.
pub async fn serve(
    listener: tokio::net::TcpListener,
    manager: Arc<SessionManager>,
    shutdown: impl Future<Output = ()> + Send + 'static,
    drain_timeout: Duration,
) -> std::io::Result<()> {
    let closer = Arc::clone(&manager);
    let app = router(Arc::clone(&manager)).into_make_service_with_connect_info::<SocketAddr>();

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            tracing::info!(
                active = closer.active_sessions(),
                "shutting down, draining sessions"
            );
            closer.close_all();
        })
        .await?;

    if !manager.wait_idle(drain_timeout).await {
        tracing::warn!(
            active = manager.active_sessions(),
            "sessions still running after shutdown grace period"
        );
    }
    tracing::info!("server stopped");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }
}
