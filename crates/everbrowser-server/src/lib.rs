//! everBrowser daemon - HTTP/SSE front end for the streaming session orchestrator

pub mod api;
pub mod bootstrap;
pub mod config;
pub mod state;

use api::{chat::*, health::health};
use axum::{
    Router,
    http::{Method, header},
    routing::{get, post},
};
use state::AppState;
use tower_http::cors::CorsLayer;

pub fn router(state: AppState) -> Router {
    // The userscript client calls from arbitrary page origins
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health))
        .route("/chat/stream", post(chat_stream))
        .route("/chat/stop", post(stop_chat))
        .route("/chat/clear", post(clear_chat))
        .route("/chat/history/{session_id}", get(chat_history))
        .layer(cors)
        .with_state(state)
}
