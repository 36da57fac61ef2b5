//! The ten action handlers and their dispatcher.
//!
//! Each handler is a closed, typed function from action params to a
//! [`HandlerOutcome`]. Errors never escape: the dispatcher reifies them
//! as `failed` outcomes with a taxonomy code, and the pipeline does not
//! retry within the round. A handler may request at most one follow-up
//! thought.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use ciris_buses::comm::OutboundMessage;
use ciris_buses::wise::DeferralNotice;
use ciris_buses::{BusContext, CommunicationBus, MemoryBus, ToolBus, WiseBus};
use ciris_domain::action::{ActionDecision, ActionParams, HandlerOutcome};
use ciris_domain::task::{FollowUpMarker, Task};
use ciris_domain::Error;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Observe ledger
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const OBSERVE_LEDGER_CAP: usize = 10_000;

/// Idempotency ledger for OBSERVE: duplicate `(channel, external_id)`
/// events are no-ops that repeat the original outcome code.
#[derive(Default)]
pub struct ObserveLedger {
    seen: Mutex<HashMap<(String, String), String>>,
}

impl ObserveLedger {
    /// Record an observation outcome, or return the previously recorded
    /// code for a duplicate.
    pub fn record(&self, channel_id: &str, external_id: &str, code: &str) -> Option<String> {
        let mut seen = self.seen.lock();
        let key = (channel_id.to_owned(), external_id.to_owned());
        if let Some(existing) = seen.get(&key) {
            return Some(existing.clone());
        }
        if seen.len() >= OBSERVE_LEDGER_CAP {
            seen.clear();
        }
        seen.insert(key, code.to_owned());
        None
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatcher
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Handlers {
    comm: Arc<CommunicationBus>,
    memory: Arc<MemoryBus>,
    tools: Arc<ToolBus>,
    wise: Arc<WiseBus>,
    observe_ledger: ObserveLedger,
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_owned()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{cut}…")
    }
}

fn failed_from(error: Error) -> HandlerOutcome {
    HandlerOutcome::failed(error.code(), error.to_string())
}

impl Handlers {
    pub fn new(
        comm: Arc<CommunicationBus>,
        memory: Arc<MemoryBus>,
        tools: Arc<ToolBus>,
        wise: Arc<WiseBus>,
    ) -> Self {
        Self {
            comm,
            memory,
            tools,
            wise,
            observe_ledger: ObserveLedger::default(),
        }
    }

    /// Route a finalized decision to its handler. Never errors; failures
    /// come back as `failed` outcomes.
    pub async fn dispatch(
        &self,
        ctx: &BusContext,
        task: &Task,
        decision: &ActionDecision,
    ) -> HandlerOutcome {
        match &decision.params {
            ActionParams::Speak(params) => self.speak(ctx, params).await,
            ActionParams::Tool(params) => self.tool(ctx, params).await,
            ActionParams::Observe(params) => self.observe(ctx, params).await,
            ActionParams::Memorize(params) => self.memorize(ctx, params).await,
            ActionParams::Recall(params) => self.recall(ctx, params).await,
            ActionParams::Forget(params) => self.forget(ctx, params).await,
            ActionParams::Reject(params) => {
                HandlerOutcome::completed_with(format!("rejected: {}", params.reason))
            }
            ActionParams::Ponder(params) => self.ponder(params),
            ActionParams::Defer(params) => self.defer(ctx, task, params).await,
            ActionParams::TaskComplete => HandlerOutcome::completed_with("task complete"),
        }
    }

    // ── External ─────────────────────────────────────────────────────

    async fn speak(
        &self,
        ctx: &BusContext,
        params: &ciris_domain::action::SpeakParams,
    ) -> HandlerOutcome {
        let message = OutboundMessage::text(params.content.clone());
        match self
            .comm
            .send_message(ctx, &params.channel_id, message)
            .await
        {
            Ok(()) => {
                // A continuation round always follows a SPEAK; without a
                // marker, FINALIZE_ACTION biases it to TASK_COMPLETE.
                let marker = params.multi_part.then_some(FollowUpMarker::MultiPartResponse);
                HandlerOutcome::completed_with(format!(
                    "spoke to {}: {}",
                    params.channel_id,
                    truncate(&params.content, 120)
                ))
                .with_follow_up("reply delivered", marker)
            }
            Err(e) => failed_from(e),
        }
    }

    async fn tool(
        &self,
        ctx: &BusContext,
        params: &ciris_domain::action::ToolParams,
    ) -> HandlerOutcome {
        match self
            .tools
            .execute_tool(ctx, &params.name, &params.arguments)
            .await
        {
            Ok(result) => {
                let summary = format!(
                    "tool {} {}: {}",
                    result.tool,
                    if result.success { "succeeded" } else { "failed" },
                    truncate(
                        &result
                            .error
                            .clone()
                            .unwrap_or_else(|| result.output.to_string()),
                        200
                    )
                );
                HandlerOutcome::completed_with(summary.clone())
                    .with_follow_up(summary, Some(FollowUpMarker::PendingToolResult))
            }
            Err(e) => failed_from(e),
        }
    }

    async fn observe(
        &self,
        ctx: &BusContext,
        params: &ciris_domain::action::ObserveParams,
    ) -> HandlerOutcome {
        // Idempotence: a duplicate repeats the original outcome code
        // with no side effect.
        if let Some(code) =
            self.observe_ledger
                .record(&params.channel_id, &params.external_id, "observed")
        {
            return HandlerOutcome::completed_with(code);
        }

        match self.comm.fetch_history(ctx, &params.channel_id, 10).await {
            Ok(entries) => {
                let outcome = HandlerOutcome::completed_with("observed");
                if params.attach_follow_up {
                    let note = format!(
                        "observed {} on {}: {}",
                        entries.len(),
                        params.channel_id,
                        truncate(
                            &entries
                                .iter()
                                .map(|e| e.content.as_str())
                                .collect::<Vec<_>>()
                                .join(" | "),
                            200
                        )
                    );
                    outcome.with_follow_up(note, None)
                } else {
                    outcome
                }
            }
            Err(e) => failed_from(e),
        }
    }

    // ── Memory ───────────────────────────────────────────────────────

    async fn memorize(
        &self,
        ctx: &BusContext,
        params: &ciris_domain::action::MemorizeParams,
    ) -> HandlerOutcome {
        match self.memory.memorize(ctx, &params.node).await {
            Ok(stored) => HandlerOutcome::completed_with(format!(
                "memorized {} (v{})",
                stored.key, stored.version
            )),
            Err(e) => failed_from(e),
        }
    }

    async fn recall(
        &self,
        ctx: &BusContext,
        params: &ciris_domain::action::RecallParams,
    ) -> HandlerOutcome {
        match self.memory.recall(ctx, &params.query).await {
            Ok(nodes) => {
                let keys: Vec<String> = nodes.iter().map(|n| n.key.to_string()).collect();
                let note = format!("recalled {}: [{}]", keys.len(), keys.join(", "));
                HandlerOutcome::completed_with(note.clone()).with_follow_up(note, None)
            }
            Err(e) => failed_from(e),
        }
    }

    async fn forget(
        &self,
        ctx: &BusContext,
        params: &ciris_domain::action::ForgetParams,
    ) -> HandlerOutcome {
        match self.memory.forget(ctx, &params.key).await {
            Ok(true) => HandlerOutcome::completed_with(format!(
                "forgot {} ({})",
                params.key, params.reason
            )),
            Ok(false) => HandlerOutcome::completed_with(format!("{} not present", params.key)),
            Err(e) => failed_from(e),
        }
    }

    // ── Deferral ─────────────────────────────────────────────────────

    fn ponder(&self, params: &ciris_domain::action::PonderParams) -> HandlerOutcome {
        let note = format!("pondered: {}", params.questions.join("; "));
        HandlerOutcome::completed_with(note.clone()).with_follow_up(note, None)
    }

    async fn defer(
        &self,
        ctx: &BusContext,
        task: &Task,
        params: &ciris_domain::action::DeferParams,
    ) -> HandlerOutcome {
        // Best effort: a missing wise authority must not block the
        // deferral itself.
        let notice = DeferralNotice {
            task_id: task.task_id,
            reason: params.reason.clone(),
            defer_until: params.defer_until,
        };
        if let Err(e) = self.wise.submit_deferral(ctx, notice).await {
            tracing::debug!(error = %e, "deferral notice not delivered");
        }
        HandlerOutcome::completed_with(format!("deferred: {}", params.reason))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
