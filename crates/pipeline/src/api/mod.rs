//! HTTP surface: chat (blocking + NDJSON streaming), session
//! introspection, health.

pub mod chat;
pub mod sessions;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/chat", post(chat::chat))
        .route("/v1/chat/stream", post(chat::chat_stream))
        .route("/v1/sessions", get(sessions::list))
        .route(
            "/v1/sessions/:id",
            get(sessions::show).delete(sessions::remove),
        )
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}
