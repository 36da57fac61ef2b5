//! Data-subject access requests: access, delete, export, correct.
//!
//! Requests orchestrate across the consent store, the task store, and
//! graph memory, then park their result under a request id for the
//! status endpoint.

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ciris_domain::graph::{GraphScope, MemoryQuery, NodeKind};
use ciris_domain::Result;

use super::api_error;
use crate::state::EngineState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types + store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DsarKind {
    Access,
    Delete,
    Export,
    Correct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DsarState {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct DsarRecord {
    pub request_id: Uuid,
    pub subject_id: String,
    pub kind: DsarKind,
    pub state: DsarState,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Default)]
pub struct DsarStore {
    requests: RwLock<HashMap<Uuid, DsarRecord>>,
}

impl DsarStore {
    pub fn insert(&self, record: DsarRecord) {
        self.requests.write().insert(record.request_id, record);
    }

    pub fn get(&self, request_id: &Uuid) -> Option<DsarRecord> {
        self.requests.read().get(request_id).cloned()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Deserialize)]
pub struct DsarRequest {
    pub subject_id: String,
    pub kind: DsarKind,
    /// For `correct`: the corrected statement to record.
    #[serde(default)]
    pub correction: Option<String>,
}

/// `POST /v1/dsar/request`.
pub async fn submit(
    State(state): State<EngineState>,
    Json(request): Json<DsarRequest>,
) -> Response {
    let request_id = Uuid::new_v4();
    let outcome = orchestrate(&state, &request).await;

    let record = match outcome {
        Ok(result) => DsarRecord {
            request_id,
            subject_id: request.subject_id.clone(),
            kind: request.kind,
            state: DsarState::Completed,
            created_at: Utc::now(),
            result: Some(result),
            error: None,
        },
        Err(e) => DsarRecord {
            request_id,
            subject_id: request.subject_id.clone(),
            kind: request.kind,
            state: DsarState::Failed,
            created_at: Utc::now(),
            result: None,
            error: Some(e.to_string()),
        },
    };
    state.dsar.insert(record.clone());
    (StatusCode::ACCEPTED, Json(record)).into_response()
}

/// `GET /v1/dsar/:id/status`.
pub async fn status(State(state): State<EngineState>, Path(id): Path<Uuid>) -> Response {
    match state.dsar.get(&id) {
        Some(record) => Json(record).into_response(),
        None => api_error(StatusCode::NOT_FOUND, "not_found", "unknown DSAR request"),
    }
}

/// Multi-source orchestration: consent store + task store + graph.
async fn orchestrate(state: &EngineState, request: &DsarRequest) -> Result<serde_json::Value> {
    let subject = &request.subject_id;
    match request.kind {
        DsarKind::Access | DsarKind::Export => {
            let consent = state.storage.get_consent(subject).await?;
            // Conversation and graph data are non-ESSENTIAL categories:
            // an expired temporary (or revoked) record withholds them.
            let conversational_allowed = consent
                .as_ref()
                .map(|c| c.permits(ciris_domain::consent::DataCategory::Conversational, Utc::now()))
                .unwrap_or(false);
            if !conversational_allowed {
                return Ok(serde_json::json!({
                    "consent": consent,
                    "withheld": "non-essential categories blocked by the consent stream",
                }));
            }
            let tasks = state
                .storage
                .list_tasks(state.status.occurrence_id(), None, 500)
                .await?
                .into_iter()
                .filter(|t| &t.subject_id == subject)
                .collect::<Vec<_>>();
            let nodes = state
                .storage
                .query_nodes(&MemoryQuery {
                    scope: GraphScope::Community,
                    kind: Some(NodeKind::User),
                    node_id: Some(subject.clone()),
                    limit: 50,
                })
                .await?;
            Ok(serde_json::json!({
                "consent": consent,
                "tasks": tasks,
                "graph_nodes": nodes,
            }))
        }
        DsarKind::Delete => {
            // Sever graph linkage, then revoke consent (starts decay).
            let key = ciris_domain::graph::NodeKey::new(
                GraphScope::Community,
                NodeKind::User,
                subject.clone(),
            );
            let forgot = state.storage.forget_node(&key).await?;
            let mut record = state.storage.ensure_consent(subject).await?;
            record.revoke(Utc::now());
            state.storage.upsert_consent(&record).await?;
            Ok(serde_json::json!({
                "graph_node_removed": forgot,
                "consent_revoked": true,
                "decay_complete_at": record.decay_complete_at(),
            }))
        }
        DsarKind::Correct => {
            let correction = request
                .correction
                .as_deref()
                .ok_or_else(|| ciris_domain::Error::Validation("correction text required".into()))?;
            let node = ciris_domain::graph::GraphNode::new(ciris_domain::graph::NodeKey::new(
                GraphScope::Community,
                NodeKind::Observation,
                format!("correction:{subject}"),
            ))
            .with_attribute(
                "statement",
                ciris_domain::graph::ScalarValue::String(correction.to_owned()),
            );
            let stored = state.storage.upsert_node(&node).await?;
            Ok(serde_json::json!({ "correction_node": stored.key.to_string() }))
        }
    }
}
