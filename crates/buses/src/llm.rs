//! LLM Bus — request/response to language models with failover.
//!
//! The strongest eligible provider is tried first; on failure or timeout
//! the breaker is informed and the next eligible provider is tried, so a
//! primary with an open circuit fails over to the secondary
//! automatically. Token and cost usage land in the call's correlation.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ciris_domain::correlation::{Correlation, CorrelationKind, CorrelationOutcome};
use ciris_domain::{Error, Result};

use crate::{capability, BusContext, BusCore};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire types + provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: LlmRole,
    pub content: String,
}

impl LlmMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: LlmRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: LlmRole::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmRequest {
    pub messages: Vec<LlmMessage>,
    #[serde(default = "d_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: f32,
    /// Stamped by the bus: the calling thought's span id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
}

fn d_max_tokens() -> u32 {
    1024
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LlmUsage {
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost_usd: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub usage: LlmUsage,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LlmBus
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct LlmBus {
    core: Arc<BusCore>,
}

impl LlmBus {
    pub fn new(core: Arc<BusCore>) -> Self {
        Self { core }
    }

    /// Call the model, failing over across eligible providers.
    ///
    /// Returns `CircuitOpen` when no provider is eligible at all, or the
    /// last provider error when every candidate failed.
    pub async fn call(&self, ctx: &BusContext, mut request: LlmRequest) -> Result<LlmResponse> {
        if request.messages.is_empty() {
            return Err(Error::Validation("llm request has no messages".into()));
        }
        request.correlation_id = Some(ctx.span_id);

        let candidates = self
            .core
            .registry()
            .eligible_providers::<dyn LlmProvider>(capability::LLM);
        if candidates.is_empty() {
            return Err(Error::CircuitOpen(capability::LLM.into()));
        }

        let mut last_error = None;
        for candidate in candidates {
            let mut correlation = Correlation::begin(
                CorrelationKind::BusCall,
                capability::LLM,
                ctx.task_id,
                ctx.thought_id,
                Some(ctx.span_id),
            );

            let result = tokio::time::timeout(
                self.core.deadline(),
                candidate.instance.complete(&request),
            )
            .await;

            match result {
                Ok(Ok(response)) => {
                    correlation.record_usage(
                        response.usage.tokens_in,
                        response.usage.tokens_out,
                        response.usage.cost_usd,
                    );
                    correlation.finish(CorrelationOutcome::Success);
                    self.core
                        .registry()
                        .report(capability::LLM, &candidate.name, true);
                    self.core.record_correlation(correlation).await;
                    return Ok(response);
                }
                Ok(Err(e)) => {
                    correlation.finish(CorrelationOutcome::Failure(e.to_string()));
                    self.core
                        .registry()
                        .report(capability::LLM, &candidate.name, false);
                    self.core.record_correlation(correlation).await;
                    tracing::warn!(
                        provider = %candidate.name,
                        error = %e,
                        "llm provider failed; trying next"
                    );
                    last_error = Some(e);
                }
                Err(_) => {
                    correlation.finish(CorrelationOutcome::Timeout);
                    self.core
                        .registry()
                        .report(capability::LLM, &candidate.name, false);
                    self.core.record_correlation(correlation).await;
                    tracing::warn!(
                        provider = %candidate.name,
                        "llm provider timed out; trying next"
                    );
                    last_error = Some(Error::Timeout(format!(
                        "{}/{}",
                        capability::LLM,
                        candidate.name
                    )));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::CircuitOpen(capability::LLM.into())))
    }

    /// Whether any LLM provider is currently eligible.
    pub fn available(&self) -> bool {
        self.core.registry().eligible_count(capability::LLM) > 0
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{core_with_sink, ctx};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FixedProvider {
        reply: String,
        fail: bool,
        calls: AtomicU32,
    }

    impl FixedProvider {
        fn new(reply: &str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.into(),
                fail,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for FixedProvider {
        async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(request.correlation_id.is_some());
            if self.fail {
                return Err(Error::handler("provider_down", "simulated outage"));
            }
            Ok(LlmResponse {
                content: self.reply.clone(),
                usage: LlmUsage {
                    tokens_in: 100,
                    tokens_out: 25,
                    cost_usd: 0.001,
                },
            })
        }
    }

    fn request() -> LlmRequest {
        LlmRequest {
            messages: vec![LlmMessage::user("hello")],
            max_tokens: 128,
            temperature: 0.0,
            correlation_id: None,
        }
    }

    #[tokio::test]
    async fn primary_used_when_healthy() {
        let (core, sink) = core_with_sink();
        let core = Arc::new(core);
        let primary = FixedProvider::new("from primary", false);
        let secondary = FixedProvider::new("from secondary", false);
        core.registry()
            .register::<dyn LlmProvider>(capability::LLM, "primary", 0, 1.0, primary.clone())
            .unwrap();
        core.registry()
            .register::<dyn LlmProvider>(capability::LLM, "secondary", 10, 1.0, secondary.clone())
            .unwrap();

        let bus = LlmBus::new(core);
        let response = bus.call(&ctx(), request()).await.unwrap();
        assert_eq!(response.content, "from primary");
        assert_eq!(secondary.calls.load(Ordering::SeqCst), 0);

        // Usage landed in the correlation.
        let recorded = sink.recorded.lock();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].tokens_in, 100);
        assert_eq!(recorded[0].tokens_out, 25);
    }

    #[tokio::test]
    async fn failing_primary_fails_over_to_secondary() {
        let (core, _sink) = core_with_sink();
        let core = Arc::new(core);
        let primary = FixedProvider::new("x", true);
        let secondary = FixedProvider::new("from secondary", false);
        core.registry()
            .register::<dyn LlmProvider>(capability::LLM, "primary", 0, 1.0, primary.clone())
            .unwrap();
        core.registry()
            .register::<dyn LlmProvider>(capability::LLM, "secondary", 10, 1.0, secondary)
            .unwrap();

        let bus = LlmBus::new(core);
        let response = bus.call(&ctx(), request()).await.unwrap();
        assert_eq!(response.content, "from secondary");
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn open_primary_circuit_skips_straight_to_secondary() {
        let (core, _sink) = core_with_sink();
        let core = Arc::new(core);
        let primary = FixedProvider::new("x", true);
        let secondary = FixedProvider::new("ok", false);
        core.registry()
            .register::<dyn LlmProvider>(capability::LLM, "primary", 0, 1.0, primary.clone())
            .unwrap();
        core.registry()
            .register::<dyn LlmProvider>(capability::LLM, "secondary", 10, 1.0, secondary)
            .unwrap();

        let bus = LlmBus::new(core.clone());
        // Five failing calls open the primary's circuit.
        for _ in 0..5 {
            bus.call(&ctx(), request()).await.unwrap();
        }
        let calls_before = primary.calls.load(Ordering::SeqCst);
        bus.call(&ctx(), request()).await.unwrap();
        assert_eq!(primary.calls.load(Ordering::SeqCst), calls_before);
    }

    #[tokio::test]
    async fn all_providers_open_is_circuit_open() {
        let (core, _sink) = core_with_sink();
        let core = Arc::new(core);
        core.registry()
            .register::<dyn LlmProvider>(
                capability::LLM,
                "only",
                0,
                1.0,
                FixedProvider::new("x", true),
            )
            .unwrap();
        for _ in 0..5 {
            core.registry().report(capability::LLM, "only", false);
        }

        let bus = LlmBus::new(core);
        assert!(!bus.available());
        let err = bus.call(&ctx(), request()).await.unwrap_err();
        assert!(matches!(err, Error::CircuitOpen(_)));
    }

    #[tokio::test]
    async fn empty_request_is_validation_error() {
        let (core, _sink) = core_with_sink();
        let bus = LlmBus::new(Arc::new(core));
        let err = bus
            .call(
                &ctx(),
                LlmRequest {
                    messages: vec![],
                    max_tokens: 10,
                    temperature: 0.0,
                    correlation_id: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
