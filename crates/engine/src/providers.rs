//! Storage-backed providers wired into the registry at bootstrap: the
//! local graph memory service and the correlation sink.

use std::sync::Arc;

use async_trait::async_trait;

use ciris_buses::memory::MemoryService;
use ciris_buses::CorrelationSink;
use ciris_domain::correlation::Correlation;
use ciris_domain::graph::{GraphNode, MemoryQuery, NodeKey};
use ciris_domain::Result;
use ciris_persistence::Storage;

/// Graph memory backed by the relational store. Registered under the
/// `memory` capability as the default provider.
pub struct LocalGraphMemory {
    storage: Arc<Storage>,
}

impl LocalGraphMemory {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl MemoryService for LocalGraphMemory {
    async fn store(&self, node: &GraphNode) -> Result<GraphNode> {
        self.storage.upsert_node(node).await
    }

    async fn recall(&self, query: &MemoryQuery) -> Result<Vec<GraphNode>> {
        self.storage.query_nodes(query).await
    }

    async fn forget(&self, key: &NodeKey) -> Result<bool> {
        self.storage.forget_node(key).await
    }
}

/// Correlation sink that persists every finished bus/handler span.
pub struct StorageSink {
    storage: Arc<Storage>,
}

impl StorageSink {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl CorrelationSink for StorageSink {
    async fn record(&self, correlation: Correlation) {
        if let Err(e) = self.storage.record_correlation(&correlation).await {
            tracing::warn!(error = %e, "failed to persist correlation");
        }
    }
}
