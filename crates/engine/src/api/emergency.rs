//! Emergency shutdown: a detached Ed25519 signature over a canonical
//! request, bypassing normal bearer auth.
//!
//! The verifying key is distributed out of band and trusted
//! process-wide; without it the endpoint refuses everything. Nonces are
//! single-use and requests expire after five minutes.

use std::collections::HashSet;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::{Signature, Verifier};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::{api_error, map_error};
use crate::state::EngineState;

/// Acceptable clock skew / request age.
const MAX_AGE_SECS: i64 = 300;

/// Replay protection for shutdown nonces.
#[derive(Default)]
pub struct NonceLedger {
    seen: Mutex<HashSet<String>>,
}

impl NonceLedger {
    /// True if the nonce is fresh (and records it).
    pub fn claim(&self, nonce: &str) -> bool {
        self.seen.lock().insert(nonce.to_owned())
    }
}

/// The canonical signing payload. Field order is the wire contract;
/// the signature covers exactly this JSON serialization.
#[derive(Debug, Serialize, Deserialize)]
pub struct ShutdownPayload {
    pub occurrence_id: String,
    pub nonce: String,
    pub issued_at: DateTime<Utc>,
    pub reason: String,
}

#[derive(Deserialize)]
pub struct ShutdownRequest {
    #[serde(flatten)]
    pub payload: ShutdownPayload,
    /// Hex detached ed25519 signature over the canonical payload JSON.
    pub signature: String,
}

/// `POST /v1/emergency/shutdown`.
pub async fn shutdown(
    State(state): State<EngineState>,
    Json(request): Json<ShutdownRequest>,
) -> Response {
    let Some(verifying_key) = &state.shutdown_verify_key else {
        return api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "signature",
            "no shutdown verifying key configured",
        );
    };

    // Canonical serialization of the payload alone.
    let canonical = match serde_json::to_string(&request.payload) {
        Ok(canonical) => canonical,
        Err(e) => return api_error(StatusCode::UNPROCESSABLE_ENTITY, "validation", e.to_string()),
    };

    let signature_bytes = match hex::decode(&request.signature) {
        Ok(bytes) => bytes,
        Err(_) => {
            return api_error(StatusCode::UNAUTHORIZED, "signature", "malformed signature")
        }
    };
    let signature = match Signature::from_slice(&signature_bytes) {
        Ok(signature) => signature,
        Err(_) => {
            return api_error(StatusCode::UNAUTHORIZED, "signature", "malformed signature")
        }
    };
    if verifying_key
        .verify(canonical.as_bytes(), &signature)
        .is_err()
    {
        tracing::warn!("emergency shutdown request with invalid signature");
        return api_error(StatusCode::UNAUTHORIZED, "signature", "signature invalid");
    }

    // Signed, but still scoped: right occurrence, fresh, unused nonce.
    if request.payload.occurrence_id != state.status.occurrence_id() {
        return api_error(
            StatusCode::FORBIDDEN,
            "validation",
            "occurrence mismatch",
        );
    }
    let age = Utc::now() - request.payload.issued_at;
    if age > Duration::seconds(MAX_AGE_SECS) || age < Duration::seconds(-MAX_AGE_SECS) {
        return api_error(StatusCode::FORBIDDEN, "validation", "request expired");
    }
    if !state.nonces.claim(&request.payload.nonce) {
        return api_error(StatusCode::FORBIDDEN, "validation", "nonce replayed");
    }

    tracing::warn!(reason = %request.payload.reason, "EMERGENCY SHUTDOWN accepted");
    match state.control.shutdown(&request.payload.reason).await {
        Ok(()) => Json(serde_json::json!({ "shutdown": true })).into_response(),
        Err(e) => map_error(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
