//! The pipeline runner: one thought, eleven steps, one action.
//!
//! Step order is fixed. The gate checkpoint runs before every step, so
//! pause, single-step, and shutdown all take effect at step boundaries
//! only. Recoverable failures accumulate in the round state and resolve
//! in FINALIZE_ACTION; the only error this function propagates is a
//! storage/audit `Fatal`.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use ciris_buses::BusContext;
use ciris_domain::action::{ActionDecision, ActionParams, ActionType, HandlerOutcome};
use ciris_domain::audit::AuditKind;
use ciris_domain::correlation::{Correlation, CorrelationKind, CorrelationOutcome};
use ciris_domain::dma::{ActionSelectionResult, ConscienceResult, DmaAggregate};
use ciris_domain::pipeline::{StepOutcome, StepPoint};
use ciris_domain::task::{
    Task, TaskStatus, Thought, ThoughtContent, ThoughtState, MAX_ROUNDS,
};
use ciris_domain::{Error, Result};
use ciris_persistence::{AuditLog, Storage};

use crate::conscience::Conscience;
use crate::context::ContextBuilder;
use crate::dma::DmaSuite;
use crate::finalize::{finalize, FinalizeInput, REASON_CONSCIENCE_BLOCKED};
use crate::gate::StepGate;
use crate::handlers::Handlers;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Round results
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug)]
pub struct RoundOutcome {
    pub decision: ActionDecision,
    pub handler: HandlerOutcome,
    pub terminal: bool,
    pub follow_up: Option<Uuid>,
    pub overridden: Option<String>,
}

#[derive(Debug)]
pub enum RoundResult {
    Completed(RoundOutcome),
    /// Shutdown interrupted the round at a step boundary; the thought
    /// stays in flight for drain handling.
    Interrupted,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pipeline
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Pipeline {
    storage: Arc<Storage>,
    audit: Arc<AuditLog>,
    context: ContextBuilder,
    dmas: DmaSuite,
    conscience: Arc<dyn Conscience>,
    handlers: Handlers,
    wise: Arc<ciris_buses::WiseBus>,
    gate: Arc<StepGate>,
    cancel: CancellationToken,
}

/// Accumulated state of one round, resolved by FINALIZE_ACTION.
struct RoundState {
    aggregate: Option<DmaAggregate>,
    selection: Option<ActionSelectionResult>,
    conscience: Option<ConscienceResult>,
    recursive_conscience: Option<ConscienceResult>,
    failure: Option<Error>,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        storage: Arc<Storage>,
        audit: Arc<AuditLog>,
        context: ContextBuilder,
        dmas: DmaSuite,
        conscience: Arc<dyn Conscience>,
        handlers: Handlers,
        wise: Arc<ciris_buses::WiseBus>,
        gate: Arc<StepGate>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            storage,
            audit,
            context,
            dmas,
            conscience,
            handlers,
            wise,
            gate,
            cancel,
        }
    }

    pub fn gate(&self) -> &Arc<StepGate> {
        &self.gate
    }

    /// Gate checkpoint + shutdown check. True means stop now.
    async fn boundary(&self) -> bool {
        self.gate.checkpoint().await;
        self.cancel.is_cancelled()
    }

    fn publish(&self, outcome: StepOutcome) {
        self.gate.publish(outcome);
    }

    fn step_failed(&self, state: &mut RoundState, at: StepPoint, error: Error) {
        tracing::warn!(step = %at, error = %error, "pipeline step failed");
        self.publish(StepOutcome::Failed {
            at,
            error: error.to_string(),
        });
        state.failure = Some(error);
    }

    /// Drive one thought through the eleven steps.
    pub async fn run_round(&self, task: &mut Task, thought: &mut Thought) -> Result<RoundResult> {
        let span = tracing::info_span!(
            "round",
            task_id = %task.task_id,
            thought_id = %thought.thought_id,
            round = task.round_count + 1,
        );
        self.run_round_inner(task, thought).instrument(span).await
    }

    async fn run_round_inner(
        &self,
        task: &mut Task,
        thought: &mut Thought,
    ) -> Result<RoundResult> {
        let mut state = RoundState {
            aggregate: None,
            selection: None,
            conscience: None,
            recursive_conscience: None,
            failure: None,
        };
        // Previous round's action, before this round mutates it.
        let previous_action = task.last_action;

        // ── 1. START_ROUND ───────────────────────────────────────────
        if self.boundary().await {
            return Ok(RoundResult::Interrupted);
        }
        task.round_count += 1;
        if task.round_count > MAX_ROUNDS {
            state.failure = Some(Error::BudgetExhausted);
        }
        task.status = TaskStatus::Active;
        thought.round = task.round_count;
        thought.state = ThoughtState::InFlight;
        self.storage.update_task(task).await?;
        self.storage.update_thought(thought).await?;
        self.publish(StepOutcome::StartRound {
            round: task.round_count,
        });

        let bus_ctx = BusContext::new(task.task_id, thought.thought_id, Uuid::new_v4());

        // ── 2. GATHER_CONTEXT ────────────────────────────────────────
        if self.boundary().await {
            return Ok(RoundResult::Interrupted);
        }
        let mut bundle = self.context.build(&bus_ctx, task, thought).await?;
        self.publish(StepOutcome::ContextGathered {
            bundle: bundle.clone(),
        });

        // ── 3. PERFORM_DMAS ──────────────────────────────────────────
        if self.boundary().await {
            return Ok(RoundResult::Interrupted);
        }
        if state.failure.is_none() {
            match self.dmas.evaluate_all(&bus_ctx, &bundle, thought).await {
                Ok(aggregate) => {
                    self.publish(StepOutcome::DmasCompleted {
                        aggregate: aggregate.clone(),
                    });
                    state.aggregate = Some(aggregate);
                }
                Err(e) => self.step_failed(&mut state, StepPoint::PerformDmas, e),
            }
        }

        // Specialized domains consult the wise authority under the
        // declared capability. The prohibited set fires inside the bus,
        // before any provider is considered.
        if state.failure.is_none() {
            let domain = state
                .aggregate
                .as_ref()
                .map(|a| a.domain.domain.clone())
                .unwrap_or_default();
            if !domain.is_empty() && domain != "general" {
                let request = ciris_buses::wise::GuidanceRequest {
                    declared_capability: domain,
                    question: thought.content.input.clone(),
                    context: vec![],
                    correlation_id: None,
                };
                match self.wise.request_guidance(&bus_ctx, request).await {
                    Ok(response) => bundle
                        .constraints
                        .push(format!("guidance: {}", response.guidance)),
                    Err(e @ Error::Prohibited(_)) => {
                        self.step_failed(&mut state, StepPoint::PerformDmas, e)
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "wise guidance unavailable");
                    }
                }
            }
        }

        // ── 4. PERFORM_ASPDMA ────────────────────────────────────────
        if self.boundary().await {
            return Ok(RoundResult::Interrupted);
        }
        if state.failure.is_none() {
            let aggregate = state.aggregate.as_ref().unwrap();
            match self
                .dmas
                .select_action(&bus_ctx, &bundle, thought, aggregate, false)
                .await
            {
                Ok(selection) => {
                    self.publish(StepOutcome::ActionSelected {
                        selection: selection.clone(),
                    });
                    state.selection = Some(selection);
                }
                Err(e) => self.step_failed(&mut state, StepPoint::PerformAspdma, e),
            }
        }

        // ── 5. CONSCIENCE ────────────────────────────────────────────
        if self.boundary().await {
            return Ok(RoundResult::Interrupted);
        }
        if state.failure.is_none() {
            let selection = state.selection.as_ref().unwrap();
            let action = selection.decision.action_type();
            if action.conscience_exempt() {
                self.publish(StepOutcome::ConscienceChecked {
                    result: ConscienceResult::pass(),
                    exempt: true,
                });
            } else {
                let aggregate = state.aggregate.as_ref().unwrap();
                match self
                    .conscience
                    .validate(&selection.decision, &bundle, aggregate)
                    .await
                {
                    Ok(result) => {
                        self.publish(StepOutcome::ConscienceChecked {
                            result: result.clone(),
                            exempt: false,
                        });
                        state.conscience = Some(result);
                    }
                    Err(e) => self.step_failed(&mut state, StepPoint::Conscience, e),
                }
            }
        }

        let needs_recursion = state
            .conscience
            .as_ref()
            .map(|c| !c.passed)
            .unwrap_or(false);

        // ── 6. RECURSIVE_ASPDMA (at most once) ───────────────────────
        if needs_recursion {
            if self.boundary().await {
                return Ok(RoundResult::Interrupted);
            }
            if state.failure.is_none() {
                let reason = state.conscience.as_ref().unwrap().reason.clone();
                thought.content.conscience_feedback = Some(reason);
                let aggregate = state.aggregate.as_ref().unwrap();
                match self
                    .dmas
                    .select_action(&bus_ctx, &bundle, thought, aggregate, true)
                    .await
                {
                    Ok(selection) => {
                        self.publish(StepOutcome::ActionSelected {
                            selection: selection.clone(),
                        });
                        state.selection = Some(selection);
                    }
                    Err(e) => self.step_failed(&mut state, StepPoint::RecursiveAspdma, e),
                }
            }

            // ── 7. RECURSIVE_CONSCIENCE ──────────────────────────────
            if self.boundary().await {
                return Ok(RoundResult::Interrupted);
            }
            if state.failure.is_none() {
                let selection = state.selection.as_ref().unwrap();
                let action = selection.decision.action_type();
                if action.conscience_exempt() {
                    self.publish(StepOutcome::ConscienceChecked {
                        result: ConscienceResult::pass(),
                        exempt: true,
                    });
                    state.recursive_conscience = Some(ConscienceResult::pass());
                } else {
                    let aggregate = state.aggregate.as_ref().unwrap();
                    match self
                        .conscience
                        .validate(&selection.decision, &bundle, aggregate)
                        .await
                    {
                        Ok(result) => {
                            self.publish(StepOutcome::ConscienceChecked {
                                result: result.clone(),
                                exempt: false,
                            });
                            state.recursive_conscience = Some(result);
                        }
                        Err(e) => {
                            self.step_failed(&mut state, StepPoint::RecursiveConscience, e)
                        }
                    }
                }
            }
        }

        // ── 8. FINALIZE_ACTION ───────────────────────────────────────
        if self.boundary().await {
            return Ok(RoundResult::Interrupted);
        }
        let conscience_blocked_twice = needs_recursion
            && state
                .recursive_conscience
                .as_ref()
                .map(|c| !c.passed)
                .unwrap_or(false);

        let proposed = if conscience_blocked_twice {
            let first = state.conscience.as_ref().unwrap();
            let second = state.recursive_conscience.as_ref().unwrap();
            Some(ActionDecision::new(
                ActionParams::defer(REASON_CONSCIENCE_BLOCKED),
                format!("{}; {}", first.reason, second.reason),
            ))
        } else {
            state.selection.as_ref().map(|s| s.decision.clone())
        };

        let finalized = finalize(FinalizeInput {
            proposed,
            failure: state.failure.as_ref(),
            round: task.round_count,
            last_action: previous_action,
            follow_up_marker: thought.content.follow_up_marker,
            paused: self.gate.is_paused(),
        });
        self.publish(StepOutcome::ActionFinalized {
            decision: finalized.decision.clone(),
            overridden: finalized.overridden.clone(),
        });
        let decision = finalized.decision;
        let action = decision.action_type();

        // ── 9. PERFORM_ACTION ────────────────────────────────────────
        if self.boundary().await {
            return Ok(RoundResult::Interrupted);
        }
        let mut handler_correlation = Correlation::begin(
            CorrelationKind::Handler,
            action.as_str(),
            task.task_id,
            thought.thought_id,
            Some(bus_ctx.span_id),
        );
        let outcome = self.handlers.dispatch(&bus_ctx, task, &decision).await;
        handler_correlation.finish(if outcome.is_failed() {
            CorrelationOutcome::Failure(
                outcome
                    .message
                    .clone()
                    .unwrap_or_else(|| "handler failed".into()),
            )
        } else {
            CorrelationOutcome::Success
        });
        self.publish(StepOutcome::ActionPerformed {
            outcome: outcome.clone(),
        });

        // ── 10. ACTION_COMPLETE ──────────────────────────────────────
        if self.boundary().await {
            return Ok(RoundResult::Interrupted);
        }
        self.storage.record_correlation(&handler_correlation).await?;
        task.last_action = Some(action);
        thought.state = if outcome.is_failed() {
            ThoughtState::Failed
        } else {
            ThoughtState::Completed
        };
        self.storage.update_thought(thought).await?;
        self.audit
            .append(
                AuditKind::Action,
                &serde_json::json!({
                    "task_id": task.task_id,
                    "thought_id": thought.thought_id,
                    "round": task.round_count,
                    "action": action.as_str(),
                    "overridden": finalized.overridden,
                    "outcome": if outcome.is_failed() { "failed" } else { "completed" },
                }),
            )
            .await?;
        self.publish(StepOutcome::ActionRecorded);

        // ── 11. ROUND_COMPLETE ───────────────────────────────────────
        if self.boundary().await {
            return Ok(RoundResult::Interrupted);
        }
        let terminal = action.is_terminal() || outcome.is_failed();
        let mut follow_up_id = None;

        if terminal {
            task.status = match action {
                _ if outcome.is_failed() => TaskStatus::Failed,
                ActionType::TaskComplete => TaskStatus::Completed,
                ActionType::Reject => TaskStatus::Rejected,
                ActionType::Defer => TaskStatus::Deferred,
                _ => TaskStatus::Failed,
            };
            task.outcome_reason = match &decision.params {
                ActionParams::Defer(p) => Some(p.reason.clone()),
                ActionParams::Reject(p) => Some(p.reason.clone()),
                _ if outcome.is_failed() => outcome.error_code.clone(),
                _ => None,
            };
        } else if let Some(request) = &outcome.follow_up {
            let mut notes = thought.content.round_notes.clone();
            notes.push(request.note.clone());
            let next = Thought::follow_up(
                task,
                ThoughtContent {
                    input: task.initial_input.clone(),
                    round_notes: notes,
                    follow_up_marker: request.marker,
                    conscience_feedback: None,
                },
            );
            self.storage.insert_thought(&next).await?;
            follow_up_id = Some(next.thought_id);
        }
        self.storage.update_task(task).await?;
        self.publish(StepOutcome::RoundCompleted { terminal });

        Ok(RoundResult::Completed(RoundOutcome {
            decision,
            handler: outcome,
            terminal,
            follow_up: follow_up_id,
            overridden: finalized.overridden,
        }))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conscience::RuleConscience;
    use crate::context::{ContextBuilder, SnapshotSource};
    use crate::testutil::{test_buses, TestAdapters};
    use ciris_domain::cognitive::CognitiveState;
    use ciris_domain::pipeline::{AgentIdentity, SystemSnapshot};
    use ciris_domain::task::TaskOrigin;
    use ed25519_dalek::SigningKey;

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

    struct Fixture {
        adapters: TestAdapters,
        pipeline: Pipeline,
        storage: Arc<Storage>,
        audit: Arc<AuditLog>,
        _dir: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());
        let storage = Arc::new(Storage::connect(&url).await.unwrap());
        let audit = Arc::new(
            AuditLog::open(
                storage.clone(),
                "occ-1",
                SigningKey::from_bytes(&[9u8; 32]),
            )
            .await
            .unwrap(),
        );

        let adapters = test_buses();
        let identity = AgentIdentity {
            agent_id: "ciris".into(),
            display_name: "CIRIS".into(),
            purpose: "assist ethically".into(),
        };
        let context = ContextBuilder::new(
            adapters.memory_bus.clone(),
            adapters.comm_bus.clone(),
            identity,
            Arc::new(FixedSnapshot),
        );
        let pipeline = Pipeline::new(
            storage.clone(),
            audit.clone(),
            context,
            DmaSuite::new(adapters.llm_bus.clone()),
            Arc::new(RuleConscience),
            Handlers::new(
                adapters.comm_bus.clone(),
                adapters.memory_bus.clone(),
                adapters.tool_bus.clone(),
                adapters.wise_bus.clone(),
            ),
            adapters.wise_bus.clone(),
            Arc::new(StepGate::new()),
            CancellationToken::new(),
        );
        Fixture {
            adapters,
            pipeline,
            storage,
            audit,
            _dir: dir,
        }
    }

    async fn seeded_task(storage: &Storage) -> (Task, Thought) {
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
        storage.insert_task(&task).await.unwrap();
        storage.insert_thought(&thought).await.unwrap();
        (task, thought)
    }

    fn speak_json() -> &'static str {
        r#"{"action": "speak", "channel_id": "c1", "content": "hello there!", "rationale": "greet"}"#
    }

    fn ponder_json() -> &'static str {
        r#"{"action": "ponder", "questions": ["anything left?"], "rationale": "reflect"}"#
    }

    async fn run_to_terminal(fx: &Fixture, task: &mut Task, thought: Thought) -> (u32, Task) {
        let mut current = thought;
        let mut rounds = 0;
        loop {
            rounds += 1;
            let result = fx.pipeline.run_round(task, &mut current).await.unwrap();
            let outcome = match result {
                RoundResult::Completed(outcome) => outcome,
                RoundResult::Interrupted => panic!("unexpected interruption"),
            };
            if outcome.terminal {
                return (rounds, task.clone());
            }
            let next_id = outcome.follow_up.expect("non-terminal round without follow-up");
            current = fx.storage.get_thought(next_id).await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn speak_then_task_complete() {
        let fx = fixture().await;
        fx.adapters.llm.push_decision(speak_json());
        // Round two would ponder, but the post-SPEAK bias completes.
        fx.adapters.llm.push_decision(ponder_json());

        let (mut task, thought) = seeded_task(&fx.storage).await;
        let (rounds, final_task) = run_to_terminal(&fx, &mut task, thought).await;

        assert_eq!(rounds, 2);
        assert_eq!(final_task.status, TaskStatus::Completed);
        assert_eq!(final_task.last_action, Some(ActionType::TaskComplete));
        assert_eq!(fx.adapters.comm.sent.lock().len(), 1);

        // Two action audit entries and a verifying chain.
        let entries = fx.audit.entries(10).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.kind == AuditKind::Action));
        assert_eq!(fx.audit.verify_chain().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn conscience_blocked_twice_defers_without_speaking() {
        let fx = fixture().await;
        fx.adapters.llm.set_blocking_ethics();
        fx.adapters.llm.push_decision(speak_json());
        fx.adapters.llm.push_decision(speak_json());

        let (mut task, mut thought) = seeded_task(&fx.storage).await;
        let result = fx.pipeline.run_round(&mut task, &mut thought).await.unwrap();
        let outcome = match result {
            RoundResult::Completed(outcome) => outcome,
            RoundResult::Interrupted => panic!("unexpected interruption"),
        };

        assert!(outcome.terminal);
        assert_eq!(outcome.decision.action_type(), ActionType::Defer);
        assert_eq!(task.status, TaskStatus::Deferred);
        assert_eq!(
            task.outcome_reason.as_deref(),
            Some(REASON_CONSCIENCE_BLOCKED)
        );
        // No outbound message was ever sent.
        assert!(fx.adapters.comm.sent.lock().is_empty());
        // Both selections were consumed (initial + recursive).
        assert!(fx.adapters.llm.decisions.lock().is_empty());
    }

    #[tokio::test]
    async fn repeated_ponder_hits_round_budget() {
        let fx = fixture().await;
        for _ in 0..8 {
            fx.adapters.llm.push_decision(ponder_json());
        }

        let (mut task, thought) = seeded_task(&fx.storage).await;
        let (rounds, final_task) = run_to_terminal(&fx, &mut task, thought).await;

        assert_eq!(rounds, 7);
        assert_eq!(final_task.status, TaskStatus::Deferred);
        assert_eq!(
            final_task.outcome_reason.as_deref(),
            Some(crate::finalize::REASON_ROUND_BUDGET)
        );
        assert_eq!(final_task.round_count, MAX_ROUNDS);
    }

    #[tokio::test]
    async fn llm_outage_defers_with_no_providers() {
        let fx = fixture().await;
        // Open the scripted provider's circuit.
        for _ in 0..5 {
            fx.adapters
                .registry
                .report(ciris_buses::capability::LLM, "scripted", false);
        }

        let (mut task, mut thought) = seeded_task(&fx.storage).await;
        let result = fx.pipeline.run_round(&mut task, &mut thought).await.unwrap();
        let outcome = match result {
            RoundResult::Completed(outcome) => outcome,
            RoundResult::Interrupted => panic!("unexpected interruption"),
        };

        assert_eq!(outcome.decision.action_type(), ActionType::Defer);
        assert_eq!(
            task.outcome_reason.as_deref(),
            Some(crate::finalize::REASON_NO_PROVIDERS)
        );
        assert_eq!(task.status, TaskStatus::Deferred);
    }

    #[tokio::test]
    async fn shutdown_interrupts_at_step_boundary() {
        let fx = fixture().await;
        fx.pipeline.cancel.cancel();

        let (mut task, mut thought) = seeded_task(&fx.storage).await;
        let result = fx.pipeline.run_round(&mut task, &mut thought).await.unwrap();
        assert!(matches!(result, RoundResult::Interrupted));
        // Nothing was persisted for the round.
        let stored = fx.storage.get_task(task.task_id).await.unwrap().unwrap();
        assert_eq!(stored.round_count, 0);
    }

    #[tokio::test]
    async fn prohibited_domain_rejects_before_any_wise_provider() {
        let fx = fixture().await;
        fx.adapters.llm.set_domain("medical_advice");
        fx.adapters.llm.push_decision(speak_json());

        let (mut task, mut thought) = seeded_task(&fx.storage).await;
        let result = fx.pipeline.run_round(&mut task, &mut thought).await.unwrap();
        let outcome = match result {
            RoundResult::Completed(outcome) => outcome,
            RoundResult::Interrupted => panic!("unexpected interruption"),
        };

        assert_eq!(outcome.decision.action_type(), ActionType::Reject);
        assert_eq!(task.status, TaskStatus::Rejected);
        assert_eq!(
            task.outcome_reason.as_deref(),
            Some(crate::finalize::REASON_PROHIBITED)
        );
        // The registered wise authority was never consulted.
        assert_eq!(
            fx.adapters
                .wise
                .guidance_calls
                .load(std::sync::atomic::Ordering::SeqCst),
            0
        );
        assert!(fx.adapters.comm.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn reject_decision_terminalizes_as_rejected() {
        let fx = fixture().await;
        fx.adapters.llm.push_decision(
            r#"{"action": "reject", "reason": "out of scope", "rationale": "cannot help"}"#,
        );

        let (mut task, thought) = seeded_task(&fx.storage).await;
        let (rounds, final_task) = run_to_terminal(&fx, &mut task, thought).await;
        assert_eq!(rounds, 1);
        assert_eq!(final_task.status, TaskStatus::Rejected);
        assert_eq!(final_task.outcome_reason.as_deref(), Some("out of scope"));
    }
}
