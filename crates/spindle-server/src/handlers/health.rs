//! Health check handlers

use crate::{error::ServerResult, server::ServerState};
use axum::{extract::State, Json};
use serde_json::{json, Value};

/// Service banner
pub async fn root(State(state): State<ServerState>) -> Json<Value> {
    Json(json!({
        "message": "Spindle OpenAI-compatible API",
        "model": state.config.model.id,
        "version": crate::VERSION,
    }))
}

/// Basic health check
pub async fn health_check(State(state): State<ServerState>) -> ServerResult<Json<Value>> {
    Ok(Json(json!({
        "status": "healthy",
        "model": state.config.model.id,
    })))
}

/// Readiness check - reports whether a new generation would be admitted
pub async fn readiness_check(State(state): State<ServerState>) -> ServerResult<Json<Value>> {
    let admission = state.pipeline.admission();
    let in_flight = admission.in_flight();
    let capacity = admission.capacity();
    let status = if in_flight < capacity { "ready" } else { "saturated" };

    Ok(Json(json!({
        "status": status,
        "model": state.config.model.id,
        "version": crate::VERSION,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "checks": {
            "admission": {
                "in_flight": in_flight,
                "capacity": capacity,
            }
        }
    })))
}
