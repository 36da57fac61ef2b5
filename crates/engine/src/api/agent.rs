//! Agent surface: interact (gate + pipeline entry), status, identity,
//! history.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ciris_domain::intake::{InboundEvent, IntakeDecision, IntakeRejection, SubjectRole};
use ciris_domain::task::TaskStatus;

use super::{api_error, map_error};
use crate::state::EngineState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/agent/interact
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Deserialize)]
pub struct InteractRequest {
    pub message: String,
    pub subject_id: String,
    #[serde(default = "d_channel")]
    pub channel_id: String,
    /// Platform-native id for idempotency; generated when absent.
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub role: Option<SubjectRole>,
}

fn d_channel() -> String {
    "api".into()
}

#[derive(Serialize)]
pub struct InteractResponse {
    pub task_id: Uuid,
}

pub async fn interact(
    State(state): State<EngineState>,
    Json(request): Json<InteractRequest>,
) -> Response {
    let event = InboundEvent {
        adapter_id: "http_api".into(),
        channel_id: request.channel_id,
        external_id: request
            .external_id
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        subject_id: request.subject_id,
        payload: request.message,
        is_direct: true,
        arrived_at: Utc::now(),
    };
    let role = request.role.unwrap_or(SubjectRole::Member);

    match state.intake.accept(event, role).await {
        Ok(IntakeDecision::Accepted { task_id }) => {
            (StatusCode::ACCEPTED, Json(InteractResponse { task_id })).into_response()
        }
        Ok(IntakeDecision::Rejected(rejection)) => {
            let status = match &rejection {
                IntakeRejection::CreditDenied { .. } => StatusCode::PAYMENT_REQUIRED,
                IntakeRejection::ConsentBlocked { .. } => StatusCode::FORBIDDEN,
                IntakeRejection::Prohibited { .. } => StatusCode::FORBIDDEN,
                IntakeRejection::Shutdown => StatusCode::SERVICE_UNAVAILABLE,
            };
            api_error(status, rejection.code(), "interaction rejected at gate")
        }
        Err(e) => map_error(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/agent/status · /v1/agent/identity · /v1/agent/history
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn status(State(state): State<EngineState>) -> Response {
    Json(serde_json::json!({
        "occurrence_id": state.status.occurrence_id(),
        "cognitive_state": state.status.cognitive_state(),
        "paused": state.status.is_paused(),
        "intake_open": state.status.intake_open(),
        "active_thoughts": state.status.active_thoughts(),
        "setup_complete": state.setup.complete(),
        "metrics": state.metrics.snapshot(),
    }))
    .into_response()
}

pub async fn identity(State(state): State<EngineState>) -> Response {
    Json(state.identity.clone()).into_response()
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "d_limit")]
    pub limit: u32,
    #[serde(default)]
    pub status: Option<String>,
}

fn d_limit() -> u32 {
    50
}

pub async fn history(
    State(state): State<EngineState>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let status = match query.status.as_deref() {
        Some(s) => match TaskStatus::parse(s) {
            Some(status) => Some(status),
            None => {
                return api_error(
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "validation",
                    format!("unknown status {s:?}"),
                )
            }
        },
        None => None,
    };

    match state
        .storage
        .list_tasks(state.status.occurrence_id(), status, query.limit.min(500))
        .await
    {
        Ok(tasks) => Json(serde_json::json!({ "tasks": tasks })).into_response(),
        Err(e) => map_error(e),
    }
}
