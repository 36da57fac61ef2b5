//! The six typed message buses.
//!
//! Each bus is a thin orchestration layer over the service registry that
//! adds request validation, correlation stamping, a per-call deadline,
//! and breaker reporting. Buses are safe for concurrent use; every
//! outbound call carries the current thought's span as its correlation
//! parent.

pub mod comm;
pub mod llm;
pub mod memory;
pub mod runtime_control;
pub mod tool;
pub mod wise;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use ciris_domain::correlation::{Correlation, CorrelationKind, CorrelationOutcome};
use ciris_domain::{Error, Result};
use ciris_registry::ServiceRegistry;

pub use comm::CommunicationBus;
pub use llm::LlmBus;
pub use memory::MemoryBus;
pub use runtime_control::RuntimeControlBus;
pub use tool::ToolBus;
pub use wise::WiseBus;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Capability names
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub mod capability {
    pub const COMMUNICATION: &str = "communication";
    pub const MEMORY: &str = "memory";
    pub const LLM: &str = "llm";
    pub const TOOL: &str = "tool";
    pub const RUNTIME_CONTROL: &str = "runtime_control";
    pub const WISE: &str = "wise";
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Correlation plumbing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where finished correlations go (persistence-backed in production,
/// in-memory in tests).
#[async_trait]
pub trait CorrelationSink: Send + Sync {
    async fn record(&self, correlation: Correlation);
}

/// Sink that drops everything; for wiring stages that predate storage.
pub struct NullSink;

#[async_trait]
impl CorrelationSink for NullSink {
    async fn record(&self, _correlation: Correlation) {}
}

/// Identifies the thought a bus call acts for. The thought's span id is
/// the parent of every correlation the call produces.
#[derive(Debug, Clone, Copy)]
pub struct BusContext {
    pub task_id: Uuid,
    pub thought_id: Uuid,
    pub span_id: Uuid,
}

impl BusContext {
    pub fn new(task_id: Uuid, thought_id: Uuid, span_id: Uuid) -> Self {
        Self {
            task_id,
            thought_id,
            span_id,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// BusCore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Shared substrate of all six buses.
pub struct BusCore {
    registry: Arc<ServiceRegistry>,
    sink: Arc<dyn CorrelationSink>,
    /// Per-call deadline, derived from the round deadline.
    deadline: Duration,
}

impl BusCore {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        sink: Arc<dyn CorrelationSink>,
        deadline: Duration,
    ) -> Self {
        Self {
            registry,
            sink,
            deadline,
        }
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Run one provider call under the deadline, with breaker reporting
    /// and a correlation row. The returned error is typed: `Timeout` on
    /// deadline, the provider's own error otherwise.
    pub(crate) async fn timed<R, Fut>(
        &self,
        capability: &str,
        provider: &str,
        kind: CorrelationKind,
        ctx: &BusContext,
        fut: Fut,
    ) -> Result<R>
    where
        Fut: Future<Output = Result<R>>,
    {
        let mut correlation = Correlation::begin(
            kind,
            capability,
            ctx.task_id,
            ctx.thought_id,
            Some(ctx.span_id),
        );
        tracing::debug!(
            capability,
            provider,
            correlation_id = %correlation.span_id,
            "bus call"
        );

        let result = tokio::time::timeout(self.deadline, fut).await;
        let result = match result {
            Err(_) => {
                correlation.finish(CorrelationOutcome::Timeout);
                self.registry.report(capability, provider, false);
                Err(Error::Timeout(format!("{capability}/{provider}")))
            }
            Ok(Ok(value)) => {
                correlation.finish(CorrelationOutcome::Success);
                self.registry.report(capability, provider, true);
                Ok(value)
            }
            Ok(Err(e)) => {
                correlation.finish(CorrelationOutcome::Failure(e.to_string()));
                self.registry.report(capability, provider, false);
                Err(e)
            }
        };
        self.sink.record(correlation).await;
        result
    }

    pub(crate) async fn record_correlation(&self, correlation: Correlation) {
        self.sink.record(correlation).await;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Test support
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
