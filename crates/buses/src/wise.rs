//! Wise Bus — guidance requests and deferrals, and the enforcement
//! point for the Prohibited Capabilities set.
//!
//! A request whose declared capability matches the prohibited set is
//! rejected with a hard `Prohibited` error before any provider lookup.
//! No registration can override this: the check runs first,
//! unconditionally.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ciris_domain::correlation::CorrelationKind;
use ciris_domain::{Error, Result};

use crate::{capability, BusContext, BusCore};

/// Domains no wisdom provider may serve: medical diagnosis/treatment,
/// financial trading/advice, legal advice, emergency-services
/// coordination. Matched per capability-name segment.
pub const PROHIBITED_DOMAINS: [&str; 7] = [
    "medical",
    "diagnosis",
    "treatment",
    "financial",
    "trading",
    "legal",
    "emergency",
];

/// True when any `_`/`-`/`.`-separated segment of the capability name
/// matches a prohibited domain. `medical_advice`, `crypto.trading`, and
/// `legal-review` all match.
pub fn is_prohibited_capability(declared: &str) -> bool {
    declared
        .to_ascii_lowercase()
        .split(['_', '-', '.'])
        .any(|segment| PROHIBITED_DOMAINS.contains(&segment))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire types + provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuidanceRequest {
    /// Declared capability the request exercises (checked against the
    /// prohibited set).
    pub declared_capability: String,
    pub question: String,
    #[serde(default)]
    pub context: Vec<String>,
    /// Stamped by the bus: the calling thought's span id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuidanceResponse {
    pub guidance: String,
    pub confidence: f64,
}

/// A task handed to human authority via DEFER.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeferralNotice {
    pub task_id: Uuid,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defer_until: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait WiseAuthority: Send + Sync {
    async fn guidance(&self, request: &GuidanceRequest) -> Result<GuidanceResponse>;

    async fn submit_deferral(&self, notice: &DeferralNotice) -> Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// WiseBus
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct WiseBus {
    core: Arc<BusCore>,
}

impl WiseBus {
    pub fn new(core: Arc<BusCore>) -> Self {
        Self { core }
    }

    /// Request guidance. The prohibited-capability check runs before any
    /// provider lookup and cannot be bypassed by registration.
    pub async fn request_guidance(
        &self,
        ctx: &BusContext,
        mut request: GuidanceRequest,
    ) -> Result<GuidanceResponse> {
        if is_prohibited_capability(&request.declared_capability) {
            tracing::warn!(
                capability = %request.declared_capability,
                "prohibited capability rejected at wise bus"
            );
            return Err(Error::Prohibited(request.declared_capability));
        }
        request.correlation_id = Some(ctx.span_id);

        let selected = self
            .core
            .registry()
            .select::<dyn WiseAuthority>(capability::WISE)
            .ok_or_else(|| Error::CircuitOpen(capability::WISE.into()))?;

        self.core
            .timed(
                capability::WISE,
                &selected.name,
                CorrelationKind::BusCall,
                ctx,
                selected.instance.guidance(&request),
            )
            .await
    }

    /// Hand a deferred task to the wise authority.
    pub async fn submit_deferral(&self, ctx: &BusContext, notice: DeferralNotice) -> Result<()> {
        let selected = self
            .core
            .registry()
            .select::<dyn WiseAuthority>(capability::WISE)
            .ok_or_else(|| Error::CircuitOpen(capability::WISE.into()))?;

        self.core
            .timed(
                capability::WISE,
                &selected.name,
                CorrelationKind::BusCall,
                ctx,
                selected.instance.submit_deferral(&notice),
            )
            .await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
