//! The HTTP API surface.
//!
//! Routes are split into **public** (health, transparency, emergency
//! shutdown, auth) and **protected** (everything else, gated behind the
//! bearer-token middleware).

pub mod agent;
pub mod auth;
pub mod consent;
pub mod dsar;
pub mod emergency;
pub mod memory;
pub mod system;
pub mod telemetry;

use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};

use ciris_domain::Error;

use crate::state::EngineState;

/// Build the full API router.
pub fn router(state: EngineState) -> Router<EngineState> {
    let public = Router::new()
        .route("/v1/auth/login", post(auth::login))
        .route("/v1/auth/refresh", post(auth::refresh))
        .route("/v1/auth/oauth/callback", get(auth::oauth_callback))
        .route("/v1/system/health", get(system::health))
        .route("/v1/transparency/feed", get(telemetry::transparency_feed))
        .route("/v1/emergency/shutdown", post(emergency::shutdown));

    let protected = Router::new()
        // Agent
        .route("/v1/agent/interact", post(agent::interact))
        .route("/v1/agent/status", get(agent::status))
        .route("/v1/agent/identity", get(agent::identity))
        .route("/v1/agent/history", get(agent::history))
        // Memory
        .route("/v1/memory/store", post(memory::store))
        .route("/v1/memory/recall", post(memory::recall))
        .route("/v1/memory/query", post(memory::query))
        // System control
        .route("/v1/system/pause", post(system::pause))
        .route("/v1/system/resume", post(system::resume))
        .route("/v1/system/step", post(system::step))
        .route("/v1/system/services/health", get(system::services_health))
        // Telemetry
        .route("/v1/telemetry/unified", get(telemetry::unified))
        .route("/v1/telemetry/metrics", get(telemetry::metrics_prometheus))
        .route(
            "/v1/telemetry/metrics/graphite",
            get(telemetry::metrics_graphite),
        )
        // Consent
        .route("/v1/consent/status", get(consent::status))
        .route("/v1/consent/grant", post(consent::grant))
        .route("/v1/consent/revoke", post(consent::revoke))
        .route("/v1/consent/audit", get(consent::audit_trail))
        .route("/v1/consent/partnership", get(consent::partnership))
        // DSAR
        .route("/v1/dsar/request", post(dsar::submit))
        .route("/v1/dsar/:id/status", get(dsar::status))
        // Apply bearer-token auth to all protected routes.
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_token,
        ));

    public
        .merge(protected)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Standardized JSON error response: `{ "error": ..., "code": ... }`.
pub(crate) fn api_error(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "error": message.into(), "code": code })),
    )
        .into_response()
}

/// Map a domain error onto an HTTP response.
pub(crate) fn map_error(error: Error) -> Response {
    let status = match &error {
        Error::Prohibited(_) => StatusCode::FORBIDDEN,
        Error::CreditDenied(_) => StatusCode::PAYMENT_REQUIRED,
        Error::ConsentBlocked(_) => StatusCode::FORBIDDEN,
        Error::Auth(_) | Error::Signature(_) => StatusCode::UNAUTHORIZED,
        Error::Validation(_) | Error::ManagedAttribute(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        Error::CircuitOpen(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    api_error(status, error.code(), error.to_string())
}
