//! FINALIZE_ACTION: the deterministic override ladder.
//!
//! A pure function from the round's accumulated state to the final
//! action. Order: reified failures, the post-SPEAK completion bias, the
//! paused-state downgrade, and last the round-budget rewrite — so a
//! non-terminal action can never survive the final round.

use ciris_domain::action::{ActionDecision, ActionParams, ActionType, RejectParams};
use ciris_domain::task::{FollowUpMarker, MAX_ROUNDS};
use ciris_domain::Error;

pub const REASON_ROUND_BUDGET: &str = "round_budget_exhausted";
pub const REASON_NO_PROVIDERS: &str = "no_providers";
pub const REASON_CONSCIENCE_BLOCKED: &str = "conscience_blocked(x2)";
pub const REASON_POST_SPEAK: &str = "post_speak_completion";
pub const REASON_PAUSED: &str = "paused";
pub const REASON_PROHIBITED: &str = "prohibited_capability";

/// Everything FINALIZE_ACTION looks at.
pub struct FinalizeInput<'a> {
    /// The proposed decision, if selection got that far.
    pub proposed: Option<ActionDecision>,
    /// A recoverable error reified earlier in the round.
    pub failure: Option<&'a Error>,
    /// Round number currently executing (1-based).
    pub round: u32,
    /// Action chosen by the previous completed round.
    pub last_action: Option<ActionType>,
    /// Unresolved-work marker carried into this thought.
    pub follow_up_marker: Option<FollowUpMarker>,
    pub paused: bool,
}

/// The finalized decision plus the override reason, when one applied.
pub struct Finalized {
    pub decision: ActionDecision,
    pub overridden: Option<String>,
}

pub fn finalize(input: FinalizeInput<'_>) -> Finalized {
    let mut overridden = None;

    // 1. Reified failures terminate deterministically: a prohibited
    //    capability is REJECTed, everything else DEFERs with a typed
    //    reason.
    let mut decision = match (&input.failure, input.proposed) {
        (Some(Error::Prohibited(capability)), _) => {
            overridden = Some(REASON_PROHIBITED.to_owned());
            ActionDecision::new(
                ActionParams::Reject(RejectParams {
                    reason: REASON_PROHIBITED.to_owned(),
                }),
                format!("capability {capability} is prohibited"),
            )
        }
        (Some(error), _) => {
            let reason = match error {
                Error::CircuitOpen(_) => REASON_NO_PROVIDERS.to_owned(),
                Error::Timeout(_) => "timeout".to_owned(),
                Error::BudgetExhausted => REASON_ROUND_BUDGET.to_owned(),
                other => other.code().to_owned(),
            };
            overridden = Some(reason.clone());
            ActionDecision::new(ActionParams::defer(reason), "recoverable failure")
        }
        (None, Some(proposed)) => proposed,
        // Nothing proposed and no failure recorded: defer.
        (None, None) => {
            overridden = Some("no_action_selected".to_owned());
            ActionDecision::new(ActionParams::defer("no_action_selected"), "empty selection")
        }
    };

    // 2. Post-SPEAK bias: with no unresolved work marker, the round
    //    after a SPEAK completes the task.
    if input.last_action == Some(ActionType::Speak)
        && input.follow_up_marker.is_none()
        && decision.action_type() != ActionType::TaskComplete
        && input.failure.is_none()
    {
        overridden = Some(REASON_POST_SPEAK.to_owned());
        decision = ActionDecision::new(
            ActionParams::TaskComplete,
            "reply delivered; no unresolved work item",
        );
    }

    // 3. Paused state forbids externally visible actions.
    if input.paused
        && matches!(
            decision.action_type(),
            ActionType::Speak | ActionType::Tool
        )
    {
        overridden = Some(REASON_PAUSED.to_owned());
        decision = ActionDecision::new(ActionParams::defer(REASON_PAUSED), "processor paused");
    }

    // 4. Round budget: only terminal actions on the final round.
    if input.round >= MAX_ROUNDS && !decision.action_type().is_terminal() {
        overridden = Some(REASON_ROUND_BUDGET.to_owned());
        decision = ActionDecision::new(
            ActionParams::defer(REASON_ROUND_BUDGET),
            "seventh round must terminalize",
        );
    }

    Finalized {
        decision,
        overridden,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
