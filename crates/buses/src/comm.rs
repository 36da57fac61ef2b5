//! Communication Bus — outbound messages to adapters.
//!
//! Ordering guarantee: per-channel FIFO. Each channel has its own async
//! lock acquired in call order, so two sends to the same channel can
//! never reorder while sends to different channels proceed concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ciris_domain::correlation::CorrelationKind;
use ciris_domain::{Error, Result};

use crate::{capability, BusContext, BusCore};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire types + provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// Stamped by the bus: the calling thought's span id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
}

impl OutboundMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            reply_to: None,
            correlation_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub external_id: String,
    pub author_id: String,
    pub content: String,
    pub sent_at: DateTime<Utc>,
}

/// Implemented by adapters (Discord, CLI, HTTP...). The core only sees
/// this trait.
#[async_trait]
pub trait CommunicationAdapter: Send + Sync {
    async fn send(&self, channel_id: &str, message: &OutboundMessage) -> Result<()>;

    async fn fetch_history(&self, channel_id: &str, limit: u32) -> Result<Vec<HistoryEntry>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CommunicationBus
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct CommunicationBus {
    core: Arc<BusCore>,
    /// Per-channel FIFO locks; tokio's mutex hands the lock out in
    /// acquisition order.
    channel_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl CommunicationBus {
    pub fn new(core: Arc<BusCore>) -> Self {
        Self {
            core,
            channel_locks: Mutex::new(HashMap::new()),
        }
    }

    fn channel_lock(&self, channel_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.channel_locks.lock();
        locks
            .entry(channel_id.to_owned())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Send one message to a channel, preserving per-channel order.
    pub async fn send_message(
        &self,
        ctx: &BusContext,
        channel_id: &str,
        mut message: OutboundMessage,
    ) -> Result<()> {
        if message.content.is_empty() {
            return Err(Error::Validation("outbound message content is empty".into()));
        }
        message.correlation_id = Some(ctx.span_id);

        let lock = self.channel_lock(channel_id);
        let _ordered = lock.lock().await;

        let selected = self
            .core
            .registry()
            .select::<dyn CommunicationAdapter>(capability::COMMUNICATION)
            .ok_or_else(|| Error::CircuitOpen(capability::COMMUNICATION.into()))?;

        self.core
            .timed(
                capability::COMMUNICATION,
                &selected.name,
                CorrelationKind::BusCall,
                ctx,
                selected.instance.send(channel_id, &message),
            )
            .await
    }

    /// Pull recent channel history (used by OBSERVE).
    pub async fn fetch_history(
        &self,
        ctx: &BusContext,
        channel_id: &str,
        limit: u32,
    ) -> Result<Vec<HistoryEntry>> {
        let selected = self
            .core
            .registry()
            .select::<dyn CommunicationAdapter>(capability::COMMUNICATION)
            .ok_or_else(|| Error::CircuitOpen(capability::COMMUNICATION.into()))?;

        self.core
            .timed(
                capability::COMMUNICATION,
                &selected.name,
                CorrelationKind::BusCall,
                ctx,
                selected.instance.fetch_history(channel_id, limit),
            )
            .await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
