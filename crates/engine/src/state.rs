//! Shared application state passed to all API handlers.

use std::sync::Arc;

use ed25519_dalek::VerifyingKey;
use tokio_util::sync::CancellationToken;

use ciris_buses::{
    CommunicationBus, LlmBus, MemoryBus, RuntimeControlBus, ToolBus, WiseBus,
};
use ciris_domain::config::Config;
use ciris_domain::pipeline::AgentIdentity;
use ciris_persistence::{AuditLog, Storage};
use ciris_registry::{Lifecycle, ServiceRegistry};

use crate::api::auth::{SessionTokens, SetupState};
use crate::api::consent::PartnershipTracker;
use crate::api::dsar::DsarStore;
use crate::api::emergency::NonceLedger;
use crate::gating::{DedupeStore, IntakeGate};
use crate::processor::RuntimeStatus;
use crate::telemetry::ThoughtMetrics;

/// Shared application state.
///
/// Fields are grouped by concern:
/// - **Infrastructure** — config, storage, audit, registry
/// - **Buses** — the six typed buses
/// - **Runtime** — processor status, intake gate, metrics
/// - **API** — sessions, setup, trackers, security material
#[derive(Clone)]
pub struct EngineState {
    // ── Infrastructure ────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub storage: Arc<Storage>,
    pub audit: Arc<AuditLog>,
    pub registry: Arc<ServiceRegistry>,

    // ── Buses ─────────────────────────────────────────────────────────
    pub comm: Arc<CommunicationBus>,
    pub memory: Arc<MemoryBus>,
    pub llm: Arc<LlmBus>,
    pub tools: Arc<ToolBus>,
    pub control: Arc<RuntimeControlBus>,
    pub wise: Arc<WiseBus>,

    // ── Runtime ───────────────────────────────────────────────────────
    pub status: Arc<RuntimeStatus>,
    /// Lifecycle-managed services, for the health surface.
    pub services: Arc<Vec<Arc<dyn Lifecycle>>>,
    pub intake: Arc<IntakeGate>,
    pub metrics: Arc<ThoughtMetrics>,
    pub dedupe: Arc<DedupeStore>,
    pub identity: AgentIdentity,
    pub cancel: CancellationToken,

    // ── API ───────────────────────────────────────────────────────────
    pub sessions: Arc<SessionTokens>,
    pub setup: Arc<SetupState>,
    pub partnerships: Arc<PartnershipTracker>,
    pub dsar: Arc<DsarStore>,
    pub nonces: Arc<NonceLedger>,
    /// SHA-256 of the static API bearer token; `None` = dev mode.
    pub api_token_hash: Option<Vec<u8>>,
    /// Verifying key for emergency shutdown requests; `None` disables
    /// the endpoint.
    pub shutdown_verify_key: Option<VerifyingKey>,
}
