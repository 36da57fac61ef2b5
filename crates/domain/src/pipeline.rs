//! Pipeline step points and the typed per-step outcomes.
//!
//! The eleven step points are the only places the pipeline can suspend,
//! pause, or be single-stepped. [`StepOutcome`] is what a single-step
//! returns to the runtime-control surface: the underlying step's result,
//! success or failure, never swallowed.

use serde::{Deserialize, Serialize};

use crate::action::{ActionDecision, HandlerOutcome};
use crate::cognitive::CognitiveState;
use crate::dma::{ActionSelectionResult, ConscienceResult, DmaAggregate};
use crate::graph::GraphNode;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Step points
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPoint {
    StartRound,
    GatherContext,
    PerformDmas,
    PerformAspdma,
    Conscience,
    RecursiveAspdma,
    RecursiveConscience,
    FinalizeAction,
    PerformAction,
    ActionComplete,
    RoundComplete,
}

impl StepPoint {
    /// The fixed step order. RECURSIVE_* run at most once each and only
    /// on conscience failure; every other step runs exactly once.
    pub const ALL: [StepPoint; 11] = [
        StepPoint::StartRound,
        StepPoint::GatherContext,
        StepPoint::PerformDmas,
        StepPoint::PerformAspdma,
        StepPoint::Conscience,
        StepPoint::RecursiveAspdma,
        StepPoint::RecursiveConscience,
        StepPoint::FinalizeAction,
        StepPoint::PerformAction,
        StepPoint::ActionComplete,
        StepPoint::RoundComplete,
    ];

    pub fn index(self) -> usize {
        Self::ALL.iter().position(|s| *s == self).unwrap()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::StartRound => "start_round",
            Self::GatherContext => "gather_context",
            Self::PerformDmas => "perform_dmas",
            Self::PerformAspdma => "perform_aspdma",
            Self::Conscience => "conscience",
            Self::RecursiveAspdma => "recursive_aspdma",
            Self::RecursiveConscience => "recursive_conscience",
            Self::FinalizeAction => "finalize_action",
            Self::PerformAction => "perform_action",
            Self::ActionComplete => "action_complete",
            Self::RoundComplete => "round_complete",
        }
    }
}

impl std::fmt::Display for StepPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context bundle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Point-in-time view of the runtime assembled at GATHER_CONTEXT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    pub occurrence_id: String,
    pub cognitive_state: CognitiveState,
    pub paused: bool,
    pub active_tasks: u32,
    pub round_deadline_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub agent_id: String,
    pub display_name: String,
    pub purpose: String,
}

/// Everything the DMAs see for one thought.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextBundle {
    pub snapshot: SystemSnapshot,
    pub identity: AgentIdentity,
    /// Pertinent graph memories recalled for this thought.
    pub memories: Vec<GraphNode>,
    /// Recent conversation lines for the originating channel.
    pub conversation: Vec<String>,
    /// Active constraints (round budget remaining, pause state, etc.).
    pub constraints: Vec<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-step outcomes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The typed result of executing one step point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum StepOutcome {
    StartRound {
        round: u32,
    },
    ContextGathered {
        bundle: ContextBundle,
    },
    DmasCompleted {
        aggregate: DmaAggregate,
    },
    ActionSelected {
        selection: ActionSelectionResult,
    },
    ConscienceChecked {
        result: ConscienceResult,
        exempt: bool,
    },
    ActionFinalized {
        decision: ActionDecision,
        /// Override reason when FINALIZE_ACTION rewrote the action.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        overridden: Option<String>,
    },
    ActionPerformed {
        outcome: HandlerOutcome,
    },
    ActionRecorded,
    RoundCompleted {
        terminal: bool,
    },
    /// The step itself failed; the error is carried, not swallowed.
    Failed {
        at: StepPoint,
        error: String,
    },
}

impl StepOutcome {
    /// The step point this outcome belongs to.
    pub fn step(&self) -> StepPoint {
        match self {
            Self::StartRound { .. } => StepPoint::StartRound,
            Self::ContextGathered { .. } => StepPoint::GatherContext,
            Self::DmasCompleted { .. } => StepPoint::PerformDmas,
            Self::ActionSelected { selection } if selection.recursive => {
                StepPoint::RecursiveAspdma
            }
            Self::ActionSelected { .. } => StepPoint::PerformAspdma,
            Self::ConscienceChecked { .. } => StepPoint::Conscience,
            Self::ActionFinalized { .. } => StepPoint::FinalizeAction,
            Self::ActionPerformed { .. } => StepPoint::PerformAction,
            Self::ActionRecorded => StepPoint::ActionComplete,
            Self::RoundCompleted { .. } => StepPoint::RoundComplete,
            Self::Failed { at, .. } => *at,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_order_is_fixed_and_complete() {
        assert_eq!(StepPoint::ALL.len(), 11);
        assert_eq!(StepPoint::StartRound.index(), 0);
        assert_eq!(StepPoint::RoundComplete.index(), 10);
        assert!(StepPoint::Conscience.index() < StepPoint::RecursiveAspdma.index());
        assert!(StepPoint::RecursiveConscience.index() < StepPoint::FinalizeAction.index());
    }

    #[test]
    fn outcome_maps_to_step() {
        assert_eq!(
            StepOutcome::StartRound { round: 1 }.step(),
            StepPoint::StartRound
        );
        assert_eq!(StepOutcome::ActionRecorded.step(), StepPoint::ActionComplete);
        assert_eq!(
            StepOutcome::Failed {
                at: StepPoint::PerformDmas,
                error: "timeout".into()
            }
            .step(),
            StepPoint::PerformDmas
        );
    }

    #[test]
    fn failure_predicate() {
        assert!(StepOutcome::Failed {
            at: StepPoint::Conscience,
            error: "x".into()
        }
        .is_failure());
        assert!(!StepOutcome::ActionRecorded.is_failure());
    }

    #[test]
    fn step_serde_tag() {
        let json = serde_json::to_string(&StepOutcome::RoundCompleted { terminal: true }).unwrap();
        assert!(json.contains("\"step\":\"round_completed\""));
    }
}
