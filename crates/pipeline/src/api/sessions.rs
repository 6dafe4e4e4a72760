//! Session registry introspection and teardown.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

use crate::state::AppState;

/// `GET /v1/sessions` — metrics snapshot of every live session.
pub async fn list(State(state): State<AppState>) -> Response {
    let metrics: Vec<_> = state
        .registry
        .session_ids()
        .into_iter()
        .filter_map(|id| state.registry.get(&id).map(|fsm| fsm.lock().get_metrics()))
        .collect();
    Json(serde_json::json!({
        "count": metrics.len(),
        "sessions": metrics,
    }))
    .into_response()
}

/// `GET /v1/sessions/:id`
pub async fn show(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.registry.get(&id) {
        Some(fsm) => Json(fsm.lock().get_metrics()).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "unknown session" })),
        )
            .into_response(),
    }
}

/// `DELETE /v1/sessions/:id` — explicit teardown.
pub async fn remove(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    if state.registry.remove(&id) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "unknown session" })),
        )
            .into_response()
    }
}
