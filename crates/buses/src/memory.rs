//! Memory Bus — graph read/write with schema enforcement.
//!
//! Writes are serialized per node key so two conflicting updates to the
//! same node can never interleave; reads go straight through. Handler
//! writes may never touch system-managed attributes.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use ciris_domain::correlation::CorrelationKind;
use ciris_domain::graph::{GraphNode, MemoryQuery, NodeKey};
use ciris_domain::{Error, Result};

use crate::{capability, BusContext, BusCore};

/// Backing store for graph memory (persistence-backed in production).
#[async_trait]
pub trait MemoryService: Send + Sync {
    async fn store(&self, node: &GraphNode) -> Result<GraphNode>;

    async fn recall(&self, query: &MemoryQuery) -> Result<Vec<GraphNode>>;

    /// Delete or anonymize; returns true if the node existed.
    async fn forget(&self, key: &NodeKey) -> Result<bool>;
}

pub struct MemoryBus {
    core: Arc<BusCore>,
    node_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl MemoryBus {
    pub fn new(core: Arc<BusCore>) -> Self {
        Self {
            core,
            node_locks: Mutex::new(HashMap::new()),
        }
    }

    fn node_lock(&self, key: &NodeKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.node_locks.lock();
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn provider(&self) -> Result<ciris_registry::SelectedProvider<dyn MemoryService>> {
        self.core
            .registry()
            .select::<dyn MemoryService>(capability::MEMORY)
            .ok_or_else(|| Error::CircuitOpen(capability::MEMORY.into()))
    }

    /// MEMORIZE: handler-originated write. Schema-validated; refuses
    /// system-managed attributes; serialized per node key.
    pub async fn memorize(&self, ctx: &BusContext, node: &GraphNode) -> Result<GraphNode> {
        node.validate(true)?;
        self.write(ctx, node).await
    }

    /// System-originated write (bookkeeping paths); managed attributes
    /// allowed, schema still enforced.
    pub async fn store_system(&self, ctx: &BusContext, node: &GraphNode) -> Result<GraphNode> {
        node.validate(false)?;
        self.write(ctx, node).await
    }

    async fn write(&self, ctx: &BusContext, node: &GraphNode) -> Result<GraphNode> {
        let lock = self.node_lock(&node.key);
        let _serialized = lock.lock().await;

        let selected = self.provider()?;
        self.core
            .timed(
                capability::MEMORY,
                &selected.name,
                CorrelationKind::BusCall,
                ctx,
                selected.instance.store(node),
            )
            .await
    }

    /// RECALL.
    pub async fn recall(&self, ctx: &BusContext, query: &MemoryQuery) -> Result<Vec<GraphNode>> {
        let selected = self.provider()?;
        self.core
            .timed(
                capability::MEMORY,
                &selected.name,
                CorrelationKind::BusCall,
                ctx,
                selected.instance.recall(query),
            )
            .await
    }

    /// FORGET.
    pub async fn forget(&self, ctx: &BusContext, key: &NodeKey) -> Result<bool> {
        let lock = self.node_lock(key);
        let _serialized = lock.lock().await;

        let selected = self.provider()?;
        self.core
            .timed(
                capability::MEMORY,
                &selected.name,
                CorrelationKind::BusCall,
                ctx,
                selected.instance.forget(key),
            )
            .await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{core_with_sink, ctx};
    use ciris_domain::graph::{GraphScope, NodeKind, ScalarValue};

    /// In-memory MemoryService used across bus and pipeline tests.
    #[derive(Default)]
    pub struct MapMemory {
        nodes: Mutex<HashMap<String, GraphNode>>,
    }

    #[async_trait]
    impl MemoryService for MapMemory {
        async fn store(&self, node: &GraphNode) -> Result<GraphNode> {
            let mut nodes = self.nodes.lock();
            let stored = match nodes.get(&node.key.to_string()) {
                Some(existing) if existing.attributes == node.attributes => existing.clone(),
                Some(existing) => GraphNode {
                    version: existing.version + 1,
                    ..node.clone()
                },
                None => GraphNode {
                    version: 1,
                    ..node.clone()
                },
            };
            nodes.insert(node.key.to_string(), stored.clone());
            Ok(stored)
        }

        async fn recall(&self, query: &MemoryQuery) -> Result<Vec<GraphNode>> {
            let nodes = self.nodes.lock();
            Ok(nodes
                .values()
                .filter(|n| n.key.scope == query.scope)
                .filter(|n| query.kind.map(|k| n.key.kind == k).unwrap_or(true))
                .filter(|n| {
                    query
                        .node_id
                        .as_ref()
                        .map(|id| &n.key.id == id)
                        .unwrap_or(true)
                })
                .take(query.limit as usize)
                .cloned()
                .collect())
        }

        async fn forget(&self, key: &NodeKey) -> Result<bool> {
            Ok(self.nodes.lock().remove(&key.to_string()).is_some())
        }
    }

    fn bus() -> MemoryBus {
        let (core, _sink) = core_with_sink();
        let core = Arc::new(core);
        core.registry()
            .register::<dyn MemoryService>(
                capability::MEMORY,
                "local_graph",
                0,
                1.0,
                Arc::new(MapMemory::default()) as Arc<dyn MemoryService>,
            )
            .unwrap();
        MemoryBus::new(core)
    }

    fn node(id: &str) -> GraphNode {
        GraphNode::new(NodeKey::new(GraphScope::Local, NodeKind::Concept, id))
            .with_attribute("summary", ScalarValue::String("x".into()))
    }

    #[tokio::test]
    async fn memorize_then_recall_roundtrip() {
        let bus = bus();
        let call_ctx = ctx();
        let stored = bus.memorize(&call_ctx, &node("n1")).await.unwrap();
        assert_eq!(stored.version, 1);

        let hits = bus
            .recall(
                &call_ctx,
                &MemoryQuery::exact(&NodeKey::new(GraphScope::Local, NodeKind::Concept, "n1")),
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(
            hits[0].attributes.get("summary"),
            Some(&ScalarValue::String("x".into()))
        );
    }

    #[tokio::test]
    async fn memorize_refuses_managed_attribute() {
        let bus = bus();
        let bad = node("n1").with_attribute("user_id", ScalarValue::String("u1".into()));
        let err = bus.memorize(&ctx(), &bad).await.unwrap_err();
        assert!(matches!(err, Error::ManagedAttribute(_)));
    }

    #[tokio::test]
    async fn system_store_allows_managed_attribute() {
        let bus = bus();
        let node = node("n1").with_attribute("user_id", ScalarValue::String("u1".into()));
        bus.store_system(&ctx(), &node).await.unwrap();
    }

    #[tokio::test]
    async fn forget_then_recall_is_empty() {
        let bus = bus();
        let call_ctx = ctx();
        bus.memorize(&call_ctx, &node("n1")).await.unwrap();

        let key = NodeKey::new(GraphScope::Local, NodeKind::Concept, "n1");
        assert!(bus.forget(&call_ctx, &key).await.unwrap());
        assert!(!bus.forget(&call_ctx, &key).await.unwrap());

        let hits = bus
            .recall(&call_ctx, &MemoryQuery::exact(&key))
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn no_provider_is_circuit_open() {
        let (core, _sink) = core_with_sink();
        let bus = MemoryBus::new(Arc::new(core));
        let err = bus.memorize(&ctx(), &node("n1")).await.unwrap_err();
        assert!(matches!(err, Error::CircuitOpen(_)));
    }
}
