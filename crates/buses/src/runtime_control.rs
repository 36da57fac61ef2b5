//! Runtime Control Bus — pause, resume, single-step, shutdown.
//!
//! The processor registers itself as the runtime-control provider; this
//! bus is how the HTTP surface and adapters reach it. Single-step
//! returns the underlying step's typed outcome, success or failure.

use std::sync::Arc;

use async_trait::async_trait;

use ciris_domain::pipeline::StepOutcome;
use ciris_domain::{Error, Result};

use crate::{capability, BusCore};

#[async_trait]
pub trait RuntimeControlService: Send + Sync {
    async fn pause(&self) -> Result<()>;

    async fn resume(&self) -> Result<()>;

    /// Advance one paused thought by exactly one step point.
    async fn single_step(&self) -> Result<StepOutcome>;

    async fn shutdown(&self, reason: &str) -> Result<()>;
}

pub struct RuntimeControlBus {
    core: Arc<BusCore>,
}

impl RuntimeControlBus {
    pub fn new(core: Arc<BusCore>) -> Self {
        Self { core }
    }

    fn provider(&self) -> Result<Arc<dyn RuntimeControlService>> {
        self.core
            .registry()
            .select::<dyn RuntimeControlService>(capability::RUNTIME_CONTROL)
            .map(|s| s.instance)
            .ok_or_else(|| Error::CircuitOpen(capability::RUNTIME_CONTROL.into()))
    }

    pub async fn pause(&self) -> Result<()> {
        self.provider()?.pause().await
    }

    pub async fn resume(&self) -> Result<()> {
        self.provider()?.resume().await
    }

    pub async fn single_step(&self) -> Result<StepOutcome> {
        self.provider()?.single_step().await
    }

    pub async fn shutdown(&self, reason: &str) -> Result<()> {
        tracing::info!(reason, "shutdown requested via runtime control bus");
        self.provider()?.shutdown(reason).await
    }
}
