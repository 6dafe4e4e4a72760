//! Chat endpoints.
//!
//! - `POST /v1/chat`        — blocking: returns the full response envelope
//! - `POST /v1/chat/stream` — NDJSON: one `StreamChunk` JSON object per line

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use futures_util::StreamExt;

use charla_domain::{validate_request, Error};

use crate::state::AppState;
use crate::{orchestrator, stream};

pub async fn chat(
    State(state): State<AppState>,
    Json(raw): Json<serde_json::Value>,
) -> Response {
    let request = match validate_request(raw) {
        Ok(request) => request,
        Err(errors) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "errors": errors })),
            )
                .into_response();
        }
    };

    match orchestrator::process(&state, request).await {
        Ok(response) => Json(response).into_response(),
        Err(Error::SessionBusy { session_id }) => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({
                "error": format!("session {session_id} is busy: a turn is already in progress")
            })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

pub async fn chat_stream(
    State(state): State<AppState>,
    Json(raw): Json<serde_json::Value>,
) -> Response {
    let request = match validate_request(raw) {
        Ok(request) => request,
        Err(errors) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "errors": errors })),
            )
                .into_response();
        }
    };

    let chunks = stream::process_stream(state, request);
    let lines = chunks.map(|chunk| {
        let mut line = serde_json::to_string(&chunk).unwrap_or_default();
        line.push('\n');
        Ok::<_, std::convert::Infallible>(line)
    });

    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(lines),
    )
        .into_response()
}
