use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// Health check handler.
/// Returns JSON with status and a feature summary.
pub fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let features = &state.config.features;
    Json(json!({
        "status": "ok",
        "features": {
            "enable_function_recovery": features.enable_function_recovery,
            "usage_multiplier": features.usage_multiplier,
            "log_level": features.log_level,
        }
    }))
}
