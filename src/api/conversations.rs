use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

use crate::error::GatewayError;
use crate::state::AppState;

/// Create an explicit conversation on the session backend.
#[must_use]
pub fn handler(State(state): State<Arc<AppState>>, headers: &HeaderMap) -> Response {
    if let Err(err) = state.authenticate(headers) {
        return err.into_response();
    }
    if !state.router.has_session_backend() {
        return GatewayError::InvalidRequest(
            "conversations require a session backend".to_string(),
        )
        .into_response();
    }

    match state.sessions.create() {
        Ok(session) => Json(json!({ "conversation_id": session.conversation_id })).into_response(),
        Err(err) => {
            tracing::warn!(error = %err, "conversation rejected");
            err.into_response()
        }
    }
}
