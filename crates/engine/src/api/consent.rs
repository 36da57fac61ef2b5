//! Consent surface: status, grant, revoke, audit trail, partnership.
//!
//! A partnership request is bilateral: it spawns a dedicated decision
//! task whose pipeline outcome (TASK_COMPLETE / REJECT / DEFER) accepts,
//! refuses, or escalates the partnership. The partnership endpoint
//! applies the upgrade once the decision task completes.

use std::collections::HashMap;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Deserialize;
use uuid::Uuid;

use ciris_domain::audit::AuditKind;
use ciris_domain::consent::{ConsentStream, DataCategory};
use ciris_domain::task::{Task, TaskOrigin, TaskStatus, Thought};

use super::{api_error, map_error};
use crate::state::EngineState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Partnership tracker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Open partnership-decision tasks by subject, plus the categories the
/// subject asked for.
#[derive(Default)]
pub struct PartnershipTracker {
    pending: Mutex<HashMap<String, (Uuid, Vec<DataCategory>)>>,
}

impl PartnershipTracker {
    pub fn open(&self, subject_id: &str, task_id: Uuid, categories: Vec<DataCategory>) {
        self.pending
            .lock()
            .insert(subject_id.to_owned(), (task_id, categories));
    }

    pub fn get(&self, subject_id: &str) -> Option<(Uuid, Vec<DataCategory>)> {
        self.pending.lock().get(subject_id).cloned()
    }

    pub fn close(&self, subject_id: &str) {
        self.pending.lock().remove(subject_id);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Deserialize)]
pub struct SubjectQuery {
    pub subject_id: String,
}

/// `GET /v1/consent/status`.
pub async fn status(
    State(state): State<EngineState>,
    Query(query): Query<SubjectQuery>,
) -> Response {
    match state.storage.get_consent(&query.subject_id).await {
        Ok(Some(record)) => Json(serde_json::json!({
            "record": record,
            "expired": record.is_expired(Utc::now()),
            "decay_complete_at": record.decay_complete_at(),
        }))
        .into_response(),
        Ok(None) => api_error(StatusCode::NOT_FOUND, "not_found", "no consent record"),
        Err(e) => map_error(e),
    }
}

#[derive(Deserialize)]
pub struct GrantRequest {
    pub subject_id: String,
    pub stream: ConsentStream,
    #[serde(default)]
    pub categories: Vec<DataCategory>,
}

/// `POST /v1/consent/grant`.
///
/// `anonymous` applies immediately; `partnered` opens a
/// partnership-decision task; `temporary` resets the 14-day record.
pub async fn grant(
    State(state): State<EngineState>,
    Json(request): Json<GrantRequest>,
) -> Response {
    let now = Utc::now();
    let current = match state.storage.ensure_consent(&request.subject_id).await {
        Ok(record) => record,
        Err(e) => return map_error(e),
    };

    match request.stream {
        ConsentStream::Temporary => {
            let record = ciris_domain::consent::ConsentRecord::temporary(&request.subject_id, now);
            if let Err(e) = state.storage.upsert_consent(&record).await {
                return map_error(e);
            }
            audit_consent(&state, &request.subject_id, "temporary_granted").await;
            Json(serde_json::json!({ "record": record })).into_response()
        }
        ConsentStream::Anonymous => {
            let record = current.into_anonymous(now);
            if let Err(e) = state.storage.upsert_consent(&record).await {
                return map_error(e);
            }
            audit_consent(&state, &request.subject_id, "anonymous_applied").await;
            Json(serde_json::json!({ "record": record })).into_response()
        }
        ConsentStream::Partnered => {
            // Bilateral: the agent decides through its own pipeline.
            let categories = if request.categories.is_empty() {
                vec![DataCategory::Essential, DataCategory::Conversational]
            } else {
                request.categories.clone()
            };
            let mut task = Task::new(
                TaskOrigin {
                    adapter_id: "consent".into(),
                    channel_id: format!("consent:{}", request.subject_id),
                },
                &request.subject_id,
                state.status.occurrence_id(),
                format!(
                    "Partnership request from subject {}: they ask for a partnered \
                     consent stream covering {:?}. Decide whether to accept \
                     (task_complete), refuse (reject), or escalate (defer).",
                    request.subject_id, categories
                ),
            );
            task.bootstrap = false;
            let thought = Thought::seed(&task);
            if let Err(e) = state.storage.insert_task(&task).await {
                return map_error(e);
            }
            if let Err(e) = state.storage.insert_thought(&thought).await {
                return map_error(e);
            }
            state
                .partnerships
                .open(&request.subject_id, task.task_id, categories);
            audit_consent(&state, &request.subject_id, "partnership_requested").await;
            (
                StatusCode::ACCEPTED,
                Json(serde_json::json!({ "decision_task_id": task.task_id })),
            )
                .into_response()
        }
    }
}

/// `POST /v1/consent/revoke` — starts the 90-day decay.
pub async fn revoke(
    State(state): State<EngineState>,
    Json(request): Json<SubjectQuery>,
) -> Response {
    let mut record = match state.storage.ensure_consent(&request.subject_id).await {
        Ok(record) => record,
        Err(e) => return map_error(e),
    };
    record.revoke(Utc::now());
    if let Err(e) = state.storage.upsert_consent(&record).await {
        return map_error(e);
    }
    audit_consent(&state, &request.subject_id, "revoked").await;
    Json(serde_json::json!({
        "record": record,
        "decay_complete_at": record.decay_complete_at(),
    }))
    .into_response()
}

/// `GET /v1/consent/audit` — consent-decision entries from the audit
/// chain mentioning the subject.
pub async fn audit_trail(
    State(state): State<EngineState>,
    Query(query): Query<SubjectQuery>,
) -> Response {
    match state.audit.entries(10_000).await {
        Ok(entries) => {
            let matching: Vec<_> = entries
                .into_iter()
                .filter(|e| {
                    e.kind == AuditKind::ConsentDecision
                        && e.payload.contains(&query.subject_id)
                })
                .collect();
            Json(serde_json::json!({ "entries": matching })).into_response()
        }
        Err(e) => map_error(e),
    }
}

/// `GET /v1/consent/partnership` — decision status; applies the
/// upgrade when the decision task completed.
pub async fn partnership(
    State(state): State<EngineState>,
    Query(query): Query<SubjectQuery>,
) -> Response {
    let Some((task_id, categories)) = state.partnerships.get(&query.subject_id) else {
        return api_error(
            StatusCode::NOT_FOUND,
            "not_found",
            "no open partnership request",
        );
    };

    let task = match state.storage.get_task(task_id).await {
        Ok(Some(task)) => task,
        Ok(None) => return api_error(StatusCode::NOT_FOUND, "not_found", "decision task missing"),
        Err(e) => return map_error(e),
    };

    let decision = match task.status {
        TaskStatus::Completed => {
            // Accepted: upgrade the stream.
            let record = match state.storage.ensure_consent(&query.subject_id).await {
                Ok(record) => record.into_partnered(categories, Utc::now()),
                Err(e) => return map_error(e),
            };
            if let Err(e) = state.storage.upsert_consent(&record).await {
                return map_error(e);
            }
            state.partnerships.close(&query.subject_id);
            audit_consent(&state, &query.subject_id, "partnership_accepted").await;
            "accepted"
        }
        TaskStatus::Rejected => {
            state.partnerships.close(&query.subject_id);
            audit_consent(&state, &query.subject_id, "partnership_refused").await;
            "refused"
        }
        TaskStatus::Deferred => "escalated",
        _ => "pending",
    };

    Json(serde_json::json!({
        "decision_task_id": task_id,
        "decision": decision,
        "task_status": task.status,
    }))
    .into_response()
}

async fn audit_consent(state: &EngineState, subject_id: &str, event: &str) {
    if let Err(e) = state
        .audit
        .append(
            AuditKind::ConsentDecision,
            &serde_json::json!({ "subject_id": subject_id, "event": event }),
        )
        .await
    {
        tracing::warn!(error = %e, "consent audit append failed");
    }
}
