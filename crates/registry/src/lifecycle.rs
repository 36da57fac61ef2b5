//! The service lifecycle interface.
//!
//! Long-running services implement [`Lifecycle`] directly; shared
//! behavior is composed, never inherited, so a service can not appear
//! unhealthy because some chained call was skipped. Dependencies arrive
//! by constructor at wiring time — there are no post-construction
//! setters to forget.

use async_trait::async_trait;
use serde::Serialize;

use ciris_domain::Result;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ServiceHealth {
    Healthy,
    Degraded { detail: String },
    Unhealthy { detail: String },
}

impl ServiceHealth {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

/// One exported service metric.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceMetric {
    pub name: String,
    pub value: f64,
}

impl ServiceMetric {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// The lifecycle contract for long-running services.
#[async_trait]
pub trait Lifecycle: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    fn health(&self) -> ServiceHealth;

    fn metrics(&self) -> Vec<ServiceMetric> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_predicates() {
        assert!(ServiceHealth::Healthy.is_healthy());
        assert!(!ServiceHealth::Degraded {
            detail: "slow".into()
        }
        .is_healthy());
        assert!(!ServiceHealth::Unhealthy {
            detail: "down".into()
        }
        .is_healthy());
    }

    #[test]
    fn health_serde_shape() {
        let json = serde_json::to_string(&ServiceHealth::Degraded {
            detail: "queue backlog".into(),
        })
        .unwrap();
        assert!(json.contains("\"status\":\"degraded\""));
        assert!(json.contains("queue backlog"));
    }
}
