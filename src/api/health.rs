use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// Health check handler.
/// Returns JSON with status and config summary.
pub fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let config = &state.config;
    Json(json!({
        "status": "chat-relay is running",
        "config": {
            "model": config.upstream.model,
            "role_presets_count": state.roles.len(),
            "stream_idle_timeout_secs": config.server.stream_idle_timeout_secs,
            "features": {
                "log_level": config.features.log_level,
                "history_limit": config.features.history_limit,
            }
        }
    }))
}
