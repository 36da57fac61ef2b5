//! Memory surface: store, recall, and scoped query over graph memory.
//!
//! All three go through the Memory Bus so schema validation and the
//! managed-attribute refusal apply exactly as they do for the MEMORIZE
//! handler.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use ciris_buses::BusContext;
use ciris_domain::graph::{GraphNode, GraphScope, MemoryQuery, NodeKind};

use super::map_error;
use crate::state::EngineState;

fn api_bus_ctx() -> BusContext {
    // API-originated memory operations run outside any task; they get a
    // fresh correlation lineage.
    BusContext::new(Uuid::nil(), Uuid::nil(), Uuid::new_v4())
}

#[derive(Deserialize)]
pub struct StoreRequest {
    pub node: GraphNode,
}

pub async fn store(
    State(state): State<EngineState>,
    Json(request): Json<StoreRequest>,
) -> Response {
    match state.memory.memorize(&api_bus_ctx(), &request.node).await {
        Ok(stored) => Json(serde_json::json!({ "node": stored })).into_response(),
        Err(e) => map_error(e),
    }
}

#[derive(Deserialize)]
pub struct RecallRequest {
    pub query: MemoryQuery,
}

pub async fn recall(
    State(state): State<EngineState>,
    Json(request): Json<RecallRequest>,
) -> Response {
    match state.memory.recall(&api_bus_ctx(), &request.query).await {
        Ok(nodes) => Json(serde_json::json!({ "nodes": nodes })).into_response(),
        Err(e) => map_error(e),
    }
}

#[derive(Deserialize)]
pub struct QueryRequest {
    pub scope: GraphScope,
    #[serde(default)]
    pub kind: Option<NodeKind>,
    #[serde(default = "d_limit")]
    pub limit: u32,
}

fn d_limit() -> u32 {
    20
}

pub async fn query(
    State(state): State<EngineState>,
    Json(request): Json<QueryRequest>,
) -> Response {
    let query = MemoryQuery {
        scope: request.scope,
        kind: request.kind,
        node_id: None,
        limit: request.limit.min(200),
    };
    match state.memory.recall(&api_bus_ctx(), &query).await {
        Ok(nodes) => Json(serde_json::json!({ "nodes": nodes })).into_response(),
        Err(e) => map_error(e),
    }
}
