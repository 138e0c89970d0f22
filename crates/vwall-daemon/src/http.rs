//! Read-only status API.
//!
//! `GET /status` returns the full [`WallState`] as JSON. `GET /health`
//! answers 200 while every active channel has a frame on screen (or on its
//! way) and 503 otherwise, for use by a watchdog or load balancer.
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use vwall_core::protocol::WallState;
use vwall_core::state::StatusBoard;

async fn status(State(board): State<Arc<StatusBoard>>) -> Json<WallState> {
    Json(board.get_state().await)
}

async fn health(State(board): State<Arc<StatusBoard>>) -> impl IntoResponse {
    let state = board.get_state().await;
    let blank: Vec<&str> = state
        .channels
        .iter()
        .filter(|c| c.blank)
        .map(|c| c.id.as_str())
        .collect();
    let code = if state.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        code,
        Json(json!({
            "healthy": state.is_healthy(),
            "shutting_down": state.shutting_down,
            "blank_channels": blank,
        })),
    )
}

pub fn router(board: Arc<StatusBoard>) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(board)
}

pub fn start_server(
    bind_address: String,
    port: u16,
    board: Arc<StatusBoard>,
) -> tokio::task::JoinHandle<()> {
    let app = router(board);

    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);
        let listener = match tokio::net::TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                warn!("Failed to bind status API on {}: {}", addr, e);
                return;
            }
        };
        info!("Status API listening on http://{}", addr);
        if let Err(e) = axum::serve(listener, app).await {
            warn!("Status API error: {}", e);
        }
    })
}
