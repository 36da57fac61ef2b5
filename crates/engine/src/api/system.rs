//! System control: pause, resume, single-step, health.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;

use super::map_error;
use crate::state::EngineState;

/// `POST /v1/system/pause` — freeze at the next step boundary.
pub async fn pause(State(state): State<EngineState>) -> Response {
    match state.control.pause().await {
        Ok(()) => Json(serde_json::json!({ "paused": true })).into_response(),
        Err(e) => map_error(e),
    }
}

/// `POST /v1/system/resume`.
pub async fn resume(State(state): State<EngineState>) -> Response {
    match state.control.resume().await {
        Ok(()) => Json(serde_json::json!({ "paused": false })).into_response(),
        Err(e) => map_error(e),
    }
}

/// `POST /v1/system/step` — advance one step point and return its
/// typed outcome, success or failure.
pub async fn step(State(state): State<EngineState>) -> Response {
    match state.control.single_step().await {
        Ok(outcome) => Json(serde_json::json!({ "outcome": outcome })).into_response(),
        Err(e) => map_error(e),
    }
}

/// `GET /v1/system/health` — public liveness probe.
pub async fn health(State(state): State<EngineState>) -> Response {
    Json(serde_json::json!({
        "status": "ok",
        "cognitive_state": state.status.cognitive_state(),
        "setup_complete": state.setup.complete(),
    }))
    .into_response()
}

/// `GET /v1/system/services/health` — per-provider circuit state plus
/// lifecycle-managed service health.
pub async fn services_health(State(state): State<EngineState>) -> Response {
    let services: Vec<serde_json::Value> = state
        .services
        .iter()
        .map(|service| {
            serde_json::json!({
                "name": service.name(),
                "health": service.health(),
                "metrics": service.metrics(),
            })
        })
        .collect();
    Json(serde_json::json!({
        "providers": state.registry.health(),
        "services": services,
    }))
    .into_response()
}
