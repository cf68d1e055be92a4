use crate::api::ApiResponse;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    response::{
        Sse,
        sse::{Event, KeepAlive},
    },
};
use everbrowser_ai::Turn;
use everbrowser_core::ChannelSink;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;

/// Events buffered per response before the turn loop waits on the client
const EVENT_BUFFER: usize = 64;

fn default_session_id() -> String {
    "default".to_string()
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default = "default_session_id")]
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SessionRequest {
    #[serde(default = "default_session_id")]
    pub session_id: String,
}

// POST /chat/stream
pub async fn chat_stream(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiResponse<()>> {
    if request.message.trim().is_empty() {
        return Err(ApiResponse::bad_request("message must not be empty"));
    }

    let (sink, rx) = ChannelSink::channel(EVENT_BUFFER);
    tokio::spawn(async move {
        state
            .post_message(&request.session_id, &request.message, &sink)
            .await;
    });

    // Dropping this stream closes the channel, which the turn loop sees as a disconnect
    let events = ReceiverStream::new(rx).map(|event| Event::default().json_data(event));
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

// POST /chat/stop
pub async fn stop_chat(
    State(state): State<AppState>,
    Json(request): Json<SessionRequest>,
) -> ApiResponse<()> {
    if state.request_stop(&request.session_id) {
        ApiResponse::done("Stop requested")
    } else {
        ApiResponse::not_found(format!("Session '{}' not found", request.session_id))
    }
}

// POST /chat/clear
pub async fn clear_chat(
    State(state): State<AppState>,
    Json(request): Json<SessionRequest>,
) -> ApiResponse<()> {
    state.clear_history(&request.session_id);
    ApiResponse::done("History cleared")
}

// GET /chat/history/{session_id}
pub async fn chat_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResponse<Vec<Turn>> {
    ApiResponse::ok(state.read_history(&session_id))
}
