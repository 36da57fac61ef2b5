//! The bootstrap orchestrator.
//!
//! Startup decomposes into typed stages wired in declared dependency
//! order: configuration adapter (CLI) → infrastructure (storage, audit
//! chain, keys) → observability (metrics, correlation sink) → service
//! substrate (registry, buses, providers) → governance (gate, consent,
//! setup) → pipeline → processor. Each stage returns the handles the
//! next one needs; nothing is reachable ambiently.

use std::sync::Arc;
use std::time::Duration;

use ed25519_dalek::{SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use ciris_buses::{
    capability, BusCore, CommunicationBus, LlmBus, MemoryBus, RuntimeControlBus, ToolBus, WiseBus,
};
use ciris_domain::audit::AuditKind;
use ciris_domain::config::Config;
use ciris_domain::pipeline::AgentIdentity;
use ciris_domain::{Error, Result};
use ciris_persistence::{AuditLog, Storage};
use ciris_registry::breaker::BreakerConfig;
use ciris_registry::ServiceRegistry;
use ciris_pipeline::{
    ContextBuilder, DmaSuite, Handlers, Pipeline, RuleConscience, StepGate,
};

use crate::api::auth::{SessionTokens, SetupState};
use crate::api::consent::PartnershipTracker;
use crate::api::dsar::DsarStore;
use crate::api::emergency::NonceLedger;
use crate::gating::{DedupeStore, IntakeGate};
use crate::processor::{Processor, ProcessorControl, RuntimeStatus};
use crate::providers::{LocalGraphMemory, StorageSink};
use crate::state::EngineState;
use crate::telemetry::ThoughtMetrics;

/// Everything the server needs after bootstrap.
pub struct Engine {
    pub state: EngineState,
    pub processor: Arc<Processor>,
}

/// Wire the engine.
///
/// `register_providers` is the adapter seam: concrete adapters (chat,
/// CLI transport, LLM, wisdom authorities) register their provider
/// instances there. The core itself registers only the storage-backed
/// memory provider and the processor's runtime-control provider.
pub async fn build_engine(
    config: Arc<Config>,
    cancel: CancellationToken,
    register_providers: impl FnOnce(&ServiceRegistry) -> Result<()>,
) -> Result<Engine> {
    // ── Infrastructure ──────────────────────────────────────────────
    std::fs::create_dir_all(&config.storage.data_dir)?;
    let storage = Arc::new(Storage::connect(&config.storage.effective_url()).await?);
    tracing::info!(backend = ?config.storage.backend, "storage ready");

    let signing = load_or_generate_signing_key(&config.storage.data_dir)?;
    let audit = Arc::new(
        AuditLog::open(storage.clone(), config.runtime.occurrence_id.clone(), signing).await?,
    );
    // A corrupted chain is a fatal startup condition.
    let verified = audit.verify_chain().await?;
    tracing::info!(entries = verified, "audit chain verified");
    audit
        .append(
            AuditKind::System,
            &serde_json::json!({"event": "startup", "occurrence_id": config.runtime.occurrence_id}),
        )
        .await?;

    // ── Observability ───────────────────────────────────────────────
    let metrics = Arc::new(ThoughtMetrics::new(config.telemetry.thought_window));
    let sink = Arc::new(StorageSink::new(storage.clone()));

    // ── Service substrate ───────────────────────────────────────────
    let registry = Arc::new(ServiceRegistry::new(BreakerConfig {
        failure_threshold: config.registry.failure_threshold,
        cooldown: Duration::from_secs(config.registry.cooldown_secs),
        max_cooldown: Duration::from_secs(config.registry.max_cooldown_secs),
    }));
    registry.register(
        capability::MEMORY,
        "local_graph",
        0,
        1.0,
        Arc::new(LocalGraphMemory::new(storage.clone())) as Arc<dyn ciris_buses::memory::MemoryService>,
    )?;
    register_providers(&registry)?;

    let core = Arc::new(BusCore::new(
        registry.clone(),
        sink,
        Duration::from_secs(config.runtime.round_deadline_secs),
    ));
    let comm = Arc::new(CommunicationBus::new(core.clone()));
    let memory = Arc::new(MemoryBus::new(core.clone()));
    let llm = Arc::new(LlmBus::new(core.clone()));
    let tools = Arc::new(ToolBus::new(core.clone()));
    let control = Arc::new(RuntimeControlBus::new(core.clone()));
    let wise = Arc::new(WiseBus::new(core));

    // ── Governance ──────────────────────────────────────────────────
    let gate = Arc::new(StepGate::new());
    let status = Arc::new(RuntimeStatus::new(
        config.runtime.occurrence_id.clone(),
        config.runtime.round_deadline_secs,
        gate.clone(),
    ));
    let dedupe = Arc::new(DedupeStore::new(Duration::from_secs(86_400)));
    let intake = Arc::new(IntakeGate::new(
        storage.clone(),
        audit.clone(),
        status.clone(),
        metrics.clone(),
        dedupe.clone(),
        config.credit.clone(),
    )?);
    let llm_ready = registry.has_capability(capability::LLM);
    let setup = Arc::new(SetupState::load(&config.storage.data_dir, llm_ready)?);
    if !llm_ready {
        tracing::warn!("no LLM provider registered — first-run setup incomplete");
    }

    // ── Pipeline ────────────────────────────────────────────────────
    let identity = AgentIdentity {
        agent_id: format!("ciris/{}", config.runtime.occurrence_id),
        display_name: "CIRIS".into(),
        purpose: "an ethically-gated autonomous agent".into(),
    };
    let context = ContextBuilder::new(
        memory.clone(),
        comm.clone(),
        identity.clone(),
        status.clone(),
    );
    let pipeline = Arc::new(Pipeline::new(
        storage.clone(),
        audit.clone(),
        context,
        DmaSuite::new(llm.clone()),
        Arc::new(RuleConscience),
        Handlers::new(comm.clone(), memory.clone(), tools.clone(), wise.clone()),
        wise.clone(),
        gate.clone(),
        cancel.clone(),
    ));

    // ── Processor ───────────────────────────────────────────────────
    let processor = Arc::new(Processor::new(
        storage.clone(),
        audit.clone(),
        pipeline,
        status.clone(),
        metrics.clone(),
        config.runtime.clone(),
        cancel.clone(),
    ));
    registry.register(
        capability::RUNTIME_CONTROL,
        "processor",
        0,
        1.0,
        Arc::new(ProcessorControl::new(
            gate,
            status.clone(),
            audit.clone(),
            cancel.clone(),
        )) as Arc<dyn ciris_buses::runtime_control::RuntimeControlService>,
    )?;

    // Setup already complete (returning occurrence): confirm identity
    // and enter WORK immediately.
    if setup.complete() {
        processor.confirm_identity()?;
    }

    // ── Security material ───────────────────────────────────────────
    let api_token_hash = read_api_token(&config);
    let shutdown_verify_key = read_shutdown_key(&config)?;

    let services: Arc<Vec<Arc<dyn ciris_registry::Lifecycle>>> =
        Arc::new(vec![processor.clone() as Arc<dyn ciris_registry::Lifecycle>]);

    let state = EngineState {
        config,
        storage,
        audit,
        registry,
        comm,
        memory,
        llm,
        tools,
        control,
        wise,
        status,
        services,
        intake,
        metrics,
        dedupe,
        identity,
        cancel,
        sessions: Arc::new(SessionTokens::new()),
        setup,
        partnerships: Arc::new(PartnershipTracker::default()),
        dsar: Arc::new(DsarStore::default()),
        nonces: Arc::new(NonceLedger::default()),
        api_token_hash,
        shutdown_verify_key,
    };

    Ok(Engine { state, processor })
}

fn load_or_generate_signing_key(data_dir: &std::path::Path) -> Result<SigningKey> {
    let path = data_dir.join("audit_signing.key");
    match std::fs::read_to_string(&path) {
        Ok(hex_key) => {
            let bytes = hex::decode(hex_key.trim())
                .map_err(|e| Error::Config(format!("corrupt audit signing key: {e}")))?;
            let bytes: [u8; 32] = bytes
                .try_into()
                .map_err(|_| Error::Config("audit signing key must be 32 bytes".into()))?;
            Ok(SigningKey::from_bytes(&bytes))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let signing = SigningKey::generate(&mut rand::rngs::OsRng);
            std::fs::write(&path, hex::encode(signing.to_bytes()))?;
            tracing::info!(path = %path.display(), "generated audit signing key");
            Ok(signing)
        }
        Err(e) => Err(e.into()),
    }
}

/// Read the static API token once and keep only its digest.
fn read_api_token(config: &Config) -> Option<Vec<u8>> {
    match std::env::var(&config.server.api_token_env) {
        Ok(token) if !token.is_empty() => {
            tracing::info!(env = %config.server.api_token_env, "API bearer-token auth enabled");
            Some(Sha256::digest(token.as_bytes()).to_vec())
        }
        _ => {
            tracing::warn!(
                env = %config.server.api_token_env,
                "static API token not set — session tokens only"
            );
            None
        }
    }
}

fn read_shutdown_key(config: &Config) -> Result<Option<VerifyingKey>> {
    match std::env::var(&config.server.shutdown_key_env) {
        Ok(hex_key) if !hex_key.is_empty() => {
            let bytes = hex::decode(hex_key.trim())
                .map_err(|e| Error::Config(format!("shutdown verify key: {e}")))?;
            let bytes: [u8; 32] = bytes
                .try_into()
                .map_err(|_| Error::Config("shutdown verify key must be 32 bytes".into()))?;
            let key = VerifyingKey::from_bytes(&bytes)
                .map_err(|e| Error::Config(format!("shutdown verify key: {e}")))?;
            tracing::info!("emergency shutdown verifying key loaded");
            Ok(Some(key))
        }
        _ => {
            tracing::warn!(
                env = %config.server.shutdown_key_env,
                "no shutdown verifying key — emergency endpoint disabled"
            );
            Ok(None)
        }
    }
}
