use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// Liveness banner. Served without authentication.
pub fn handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "message": state.config.server.banner }))
}
