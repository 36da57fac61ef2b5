//! Telemetry endpoints: the unified view, Prometheus and Graphite text
//! exports, and the public transparency feed.

use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;

use ciris_domain::task::TaskStatus;
use ciris_registry::CircuitState;

use crate::state::EngineState;
use crate::telemetry::{gauge, render_graphite, render_prometheus, MetricLine};

fn metric_lines(state: &EngineState) -> Vec<MetricLine> {
    let snapshot = state.metrics.snapshot();
    let mut lines = vec![
        gauge("seconds_per_thought", snapshot.seconds_per_thought),
        gauge("thoughts_total", snapshot.thoughts_total as f64),
        gauge("tasks_completed_total", snapshot.tasks_completed as f64),
        gauge("gate_rejections_total", snapshot.gate_rejections as f64),
        gauge("active_thoughts", state.status.active_thoughts() as f64),
        gauge(
            "intake_open",
            if state.status.intake_open() { 1.0 } else { 0.0 },
        ),
    ];
    for provider in state.registry.health() {
        let value = match provider.circuit.state {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        };
        lines.push(gauge(
            format!("circuit_state_{}_{}", provider.capability, provider.name),
            value,
        ));
    }
    lines
}

/// `GET /v1/telemetry/unified` — metrics, services, and runtime state
/// in one JSON document.
pub async fn unified(State(state): State<EngineState>) -> Response {
    Json(serde_json::json!({
        "occurrence_id": state.status.occurrence_id(),
        "cognitive_state": state.status.cognitive_state(),
        "paused": state.status.is_paused(),
        "metrics": state.metrics.snapshot(),
        "services": state.registry.health(),
    }))
    .into_response()
}

/// `GET /v1/telemetry/metrics` — Prometheus text exposition.
pub async fn metrics_prometheus(State(state): State<EngineState>) -> Response {
    let body = render_prometheus(
        &state.config.telemetry.metric_prefix,
        &metric_lines(&state),
    );
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response()
}

/// `GET /v1/telemetry/metrics/graphite` — Graphite plaintext protocol.
pub async fn metrics_graphite(State(state): State<EngineState>) -> Response {
    let body = render_graphite(
        &state.config.telemetry.metric_prefix,
        &metric_lines(&state),
        chrono::Utc::now().timestamp(),
    );
    ([(header::CONTENT_TYPE, "text/plain")], body).into_response()
}

/// `GET /v1/transparency/feed` — public statistics, no auth, no
/// subject-linked data.
pub async fn transparency_feed(State(state): State<EngineState>) -> Response {
    let occurrence = state.status.occurrence_id();
    let mut by_status = serde_json::Map::new();
    for status in [
        TaskStatus::Pending,
        TaskStatus::Active,
        TaskStatus::Deferred,
        TaskStatus::Completed,
        TaskStatus::Rejected,
        TaskStatus::Failed,
    ] {
        let count = state
            .storage
            .list_tasks(occurrence, Some(status), 1000)
            .await
            .map(|tasks| tasks.len())
            .unwrap_or(0);
        by_status.insert(status.as_str().to_owned(), count.into());
    }

    let snapshot = state.metrics.snapshot();
    Json(serde_json::json!({
        "tasks_by_status": by_status,
        "thoughts_processed": snapshot.thoughts_total,
        "gate_rejections": snapshot.gate_rejections,
        "seconds_per_thought": snapshot.seconds_per_thought,
    }))
    .into_response()
}
