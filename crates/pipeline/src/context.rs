//! GATHER_CONTEXT: assembling the context bundle for one thought.
//!
//! The bundle combines a system snapshot (supplied by the processor),
//! the agent identity, pertinent graph memories, recent conversation on
//! the originating channel, and the active constraints. Memory and
//! history lookups are best-effort: a failed recall degrades the bundle,
//! it does not fail the step.

use std::sync::Arc;

use ciris_buses::{BusContext, CommunicationBus, MemoryBus};
use ciris_domain::graph::{GraphScope, MemoryQuery, NodeKind};
use ciris_domain::pipeline::{AgentIdentity, ContextBundle, SystemSnapshot};
use ciris_domain::task::{Task, Thought, MAX_ROUNDS};
use ciris_domain::Result;

/// Supplies the live system snapshot; implemented by the processor.
pub trait SnapshotSource: Send + Sync {
    fn snapshot(&self) -> SystemSnapshot;
}

pub struct ContextBuilder {
    memory: Arc<MemoryBus>,
    comm: Arc<CommunicationBus>,
    identity: AgentIdentity,
    snapshot: Arc<dyn SnapshotSource>,
}

impl ContextBuilder {
    pub fn new(
        memory: Arc<MemoryBus>,
        comm: Arc<CommunicationBus>,
        identity: AgentIdentity,
        snapshot: Arc<dyn SnapshotSource>,
    ) -> Self {
        Self {
            memory,
            comm,
            identity,
            snapshot,
        }
    }

    pub async fn build(
        &self,
        ctx: &BusContext,
        task: &Task,
        thought: &Thought,
    ) -> Result<ContextBundle> {
        let snapshot = self.snapshot.snapshot();

        // Pertinent memories: recent observations in the local scope.
        let memories = match self
            .memory
            .recall(
                ctx,
                &MemoryQuery {
                    scope: GraphScope::Local,
                    kind: Some(NodeKind::Observation),
                    node_id: None,
                    limit: 5,
                },
            )
            .await
        {
            Ok(nodes) => nodes,
            Err(e) => {
                tracing::debug!(error = %e, "memory recall degraded; empty memories");
                Vec::new()
            }
        };

        // Recent conversation on the originating channel.
        let conversation = match self
            .comm
            .fetch_history(ctx, &task.origin.channel_id, 10)
            .await
        {
            Ok(entries) => entries
                .into_iter()
                .map(|e| format!("{}: {}", e.author_id, e.content))
                .collect(),
            Err(e) => {
                tracing::debug!(error = %e, "history fetch degraded; empty conversation");
                Vec::new()
            }
        };

        let mut constraints = vec![format!(
            "rounds_remaining: {}",
            MAX_ROUNDS.saturating_sub(task.round_count)
        )];
        if snapshot.paused {
            constraints.push("processor_paused".to_owned());
        }
        if let Some(marker) = thought.content.follow_up_marker {
            constraints.push(format!("unresolved_work: {marker:?}"));
        }

        Ok(ContextBundle {
            snapshot,
            identity: self.identity.clone(),
            memories,
            conversation,
            constraints,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ciris_domain::cognitive::CognitiveState;
    use ciris_domain::task::TaskOrigin;
    use ciris_registry::ServiceRegistry;
    use std::time::Duration;

    struct FixedSnapshot;

    impl SnapshotSource for FixedSnapshot {
        fn snapshot(&self) -> SystemSnapshot {
            SystemSnapshot {
                occurrence_id: "occ-1".into(),
                cognitive_state: CognitiveState::Work,
                paused: false,
                active_tasks: 1,
                round_deadline_secs: 60,
            }
        }
    }

    fn builder() -> ContextBuilder {
        // Empty registry: recall and history both degrade to empty.
        let registry = Arc::new(ServiceRegistry::new(Default::default()));
        let core = Arc::new(ciris_buses::BusCore::new(
            registry,
            Arc::new(ciris_buses::NullSink),
            Duration::from_secs(1),
        ));
        ContextBuilder::new(
            Arc::new(MemoryBus::new(core.clone())),
            Arc::new(CommunicationBus::new(core)),
            AgentIdentity {
                agent_id: "ciris".into(),
                display_name: "CIRIS".into(),
                purpose: "assist".into(),
            },
            Arc::new(FixedSnapshot),
        )
    }

    #[tokio::test]
    async fn degraded_lookups_still_build_a_bundle() {
        let task = Task::new(
            TaskOrigin {
                adapter_id: "cli".into(),
                channel_id: "c1".into(),
            },
            "u1",
            "occ-1",
            "hello",
        );
        let thought = Thought::seed(&task);
        let ctx = BusContext::new(task.task_id, thought.thought_id, uuid::Uuid::new_v4());

        let bundle = builder().build(&ctx, &task, &thought).await.unwrap();
        assert!(bundle.memories.is_empty());
        assert!(bundle.conversation.is_empty());
        assert_eq!(bundle.identity.agent_id, "ciris");
        assert!(bundle.constraints[0].starts_with("rounds_remaining: 7"));
    }

    #[tokio::test]
    async fn marker_becomes_a_constraint() {
        let task = Task::new(
            TaskOrigin {
                adapter_id: "cli".into(),
                channel_id: "c1".into(),
            },
            "u1",
            "occ-1",
            "hello",
        );
        let mut thought = Thought::seed(&task);
        thought.content.follow_up_marker =
            Some(ciris_domain::task::FollowUpMarker::PendingToolResult);
        let ctx = BusContext::new(task.task_id, thought.thought_id, uuid::Uuid::new_v4());

        let bundle = builder().build(&ctx, &task, &thought).await.unwrap();
        assert!(bundle
            .constraints
            .iter()
            .any(|c| c.starts_with("unresolved_work")));
    }
}
