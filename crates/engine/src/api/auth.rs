//! Authentication: first-run admin credential, session tokens, and the
//! bearer-token middleware.
//!
//! The static API token (env) and issued session tokens are both
//! accepted on protected routes. Comparison is over SHA-256 digests in
//! constant time. First run: the first login creates the admin
//! credential; until the credential and an LLM provider exist, general
//! intake stays closed.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use ciris_domain::cognitive::CognitiveState;
use ciris_domain::{Error, Result};

use super::api_error;
use crate::state::EngineState;

/// Capability name OAuth providers register under.
pub const OAUTH_CAPABILITY: &str = "oauth";

/// Implemented by external OAuth integrations. The core only owns the
/// session issued after a successful exchange.
#[async_trait]
pub trait OauthExchanger: Send + Sync {
    /// Exchange an authorization code for the authenticated subject id.
    async fn exchange(&self, code: &str, csrf_state: &str) -> Result<String>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Setup state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// First-run setup: admin credential + LLM configuration. Both must
/// exist before general intake opens.
pub struct SetupState {
    credential_path: PathBuf,
    admin_hash: RwLock<Option<Vec<u8>>>,
    llm_ready: AtomicBool,
}

impl SetupState {
    /// Load the admin credential from the data directory if present.
    pub fn load(data_dir: &std::path::Path, llm_ready: bool) -> Result<Self> {
        let credential_path = data_dir.join("admin.credential");
        let admin_hash = match std::fs::read_to_string(&credential_path) {
            Ok(hex_digest) => Some(
                hex::decode(hex_digest.trim())
                    .map_err(|e| Error::Config(format!("corrupt admin credential: {e}")))?,
            ),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            credential_path,
            admin_hash: RwLock::new(admin_hash),
            llm_ready: AtomicBool::new(llm_ready),
        })
    }

    pub fn admin_ready(&self) -> bool {
        self.admin_hash.read().is_some()
    }

    pub fn set_llm_ready(&self, ready: bool) {
        self.llm_ready.store(ready, Ordering::SeqCst);
    }

    pub fn complete(&self) -> bool {
        self.admin_ready() && self.llm_ready.load(Ordering::SeqCst)
    }

    /// First-run: persist the admin credential digest.
    pub fn create_admin(&self, password: &str) -> Result<()> {
        let digest = Sha256::digest(password.as_bytes()).to_vec();
        std::fs::write(&self.credential_path, hex::encode(&digest))?;
        *self.admin_hash.write() = Some(digest);
        tracing::info!("admin credential created (first-run setup)");
        Ok(())
    }

    pub fn verify_admin(&self, password: &str) -> bool {
        let guard = self.admin_hash.read();
        match guard.as_ref() {
            Some(expected) => {
                let provided = Sha256::digest(password.as_bytes());
                bool::from(provided.ct_eq(expected.as_slice()))
            }
            None => false,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session tokens
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const SESSION_TTL: Duration = Duration::from_secs(3600);

pub struct SessionTokens {
    /// SHA-256(token) → expiry.
    tokens: RwLock<HashMap<Vec<u8>, Instant>>,
}

impl Default for SessionTokens {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionTokens {
    pub fn new() -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
        }
    }

    pub fn issue(&self) -> String {
        let raw: [u8; 32] = rand::random();
        let token = hex::encode(raw);
        self.tokens.write().insert(
            Sha256::digest(token.as_bytes()).to_vec(),
            Instant::now() + SESSION_TTL,
        );
        token
    }

    pub fn validate(&self, token: &str) -> bool {
        let digest = Sha256::digest(token.as_bytes()).to_vec();
        self.tokens
            .read()
            .get(&digest)
            .map(|expiry| Instant::now() < *expiry)
            .unwrap_or(false)
    }

    /// Extend a live token's expiry. False for unknown/expired tokens.
    pub fn refresh(&self, token: &str) -> bool {
        let digest = Sha256::digest(token.as_bytes()).to_vec();
        let mut tokens = self.tokens.write();
        match tokens.get_mut(&digest) {
            Some(expiry) if Instant::now() < *expiry => {
                *expiry = Instant::now() + SESSION_TTL;
                true
            }
            _ => false,
        }
    }

    pub fn evict_expired(&self) {
        self.tokens
            .write()
            .retain(|_, expiry| Instant::now() < *expiry);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Middleware
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Bearer-token middleware for protected routes. Accepts the static API
/// token or a live session token; dev mode (neither configured, no
/// sessions) allows through with a startup warning already logged.
pub async fn require_token(
    State(state): State<EngineState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let provided = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    // Static token (hashed, constant-time).
    if let Some(expected) = &state.api_token_hash {
        let provided_hash = Sha256::digest(provided.as_bytes());
        if bool::from(provided_hash.ct_eq(expected.as_slice())) {
            return next.run(req).await;
        }
    }

    // Session token.
    if !provided.is_empty() && state.sessions.validate(provided) {
        return next.run(req).await;
    }

    // Dev mode: no static token configured and no admin credential yet.
    if state.api_token_hash.is_none() && !state.setup.admin_ready() {
        return next.run(req).await;
    }

    api_error(
        StatusCode::UNAUTHORIZED,
        "auth",
        "invalid or missing bearer token",
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub first_run: bool,
}

/// `POST /v1/auth/login`. On first run this creates the admin
/// credential; afterwards it verifies it.
pub async fn login(
    State(state): State<EngineState>,
    Json(request): Json<LoginRequest>,
) -> Response {
    if request.username != "admin" {
        return api_error(StatusCode::UNAUTHORIZED, "auth", "unknown user");
    }
    if request.password.len() < 8 {
        return api_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "validation",
            "password must be at least 8 characters",
        );
    }

    let first_run = !state.setup.admin_ready();
    if first_run {
        if let Err(e) = state.setup.create_admin(&request.password) {
            return super::map_error(e);
        }
    } else if !state.setup.verify_admin(&request.password) {
        return api_error(StatusCode::UNAUTHORIZED, "auth", "invalid credentials");
    }

    // Setup may have just completed: leave WAKEUP.
    if state.setup.complete() && state.status.cognitive_state() == CognitiveState::Wakeup {
        if let Err(e) = state.status.transition(CognitiveState::Work) {
            tracing::warn!(error = %e, "post-setup transition failed");
        }
    }

    let token = state.sessions.issue();
    Json(LoginResponse { token, first_run }).into_response()
}

#[derive(Deserialize)]
pub struct OauthCallbackQuery {
    pub code: String,
    pub state: String,
}

/// `GET /v1/auth/oauth/callback` — completes an OAuth flow through the
/// registered exchanger and issues a session token.
pub async fn oauth_callback(
    State(state): State<EngineState>,
    Query(query): Query<OauthCallbackQuery>,
) -> Response {
    let Some(exchanger) = state
        .registry
        .select::<dyn OauthExchanger>(OAUTH_CAPABILITY)
    else {
        return api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "auth",
            "no oauth provider registered",
        );
    };

    match exchanger.instance.exchange(&query.code, &query.state).await {
        Ok(subject_id) => {
            state.registry.report(OAUTH_CAPABILITY, &exchanger.name, true);
            let token = state.sessions.issue();
            Json(serde_json::json!({ "token": token, "subject_id": subject_id }))
                .into_response()
        }
        Err(e) => {
            state.registry.report(OAUTH_CAPABILITY, &exchanger.name, false);
            super::map_error(e)
        }
    }
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    pub token: String,
}

/// `POST /v1/auth/refresh`.
pub async fn refresh(
    State(state): State<EngineState>,
    Json(request): Json<RefreshRequest>,
) -> Response {
    if state.sessions.refresh(&request.token) {
        Json(serde_json::json!({ "refreshed": true })).into_response()
    } else {
        api_error(StatusCode::UNAUTHORIZED, "auth", "unknown or expired token")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
