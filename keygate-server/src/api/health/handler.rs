use axum::{Json, extract::State};
use serde_json::{Value, json};

use crate::core::ServerState;

/// GET /health
pub async fn health(State(state): State<ServerState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.config.environment,
        "live_connections": state.bus.connection_count(),
    }))
}
