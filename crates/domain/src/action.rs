//! The ten action types, their typed parameter records, and handler
//! outcomes.
//!
//! The pipeline emits exactly one [`ActionDecision`] per thought per
//! round; the dispatcher routes it to the matching handler, which returns
//! a [`HandlerOutcome`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::graph::{GraphNode, MemoryQuery, NodeKey};
use crate::task::FollowUpMarker;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Action type
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Speak,
    Tool,
    Observe,
    Memorize,
    Recall,
    Forget,
    Reject,
    Ponder,
    Defer,
    TaskComplete,
}

impl ActionType {
    /// Terminal actions end the task at ROUND_COMPLETE.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::TaskComplete | Self::Reject | Self::Defer)
    }

    /// Actions that skip the CONSCIENCE step entirely.
    pub fn conscience_exempt(self) -> bool {
        matches!(
            self,
            Self::Recall | Self::TaskComplete | Self::Observe | Self::Defer | Self::Reject
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Speak => "speak",
            Self::Tool => "tool",
            Self::Observe => "observe",
            Self::Memorize => "memorize",
            Self::Recall => "recall",
            Self::Forget => "forget",
            Self::Reject => "reject",
            Self::Ponder => "ponder",
            Self::Defer => "defer",
            Self::TaskComplete => "task_complete",
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Typed parameter records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakParams {
    pub channel_id: String,
    pub content: String,
    /// Set when the reply is one part of a longer response; carried into
    /// the next thought as an unresolved-work marker.
    #[serde(default)]
    pub multi_part: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParams {
    pub name: String,
    /// Tool arguments are tool-shaped by definition; the schema is owned
    /// by the tool descriptor, validated on the Tool Bus.
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObserveParams {
    pub channel_id: String,
    pub external_id: String,
    /// OBSERVE produces a follow-up thought only on explicit request.
    #[serde(default)]
    pub attach_follow_up: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorizeParams {
    pub node: GraphNode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecallParams {
    pub query: MemoryQuery,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForgetParams {
    pub key: NodeKey,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectParams {
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PonderParams {
    /// Open questions the follow-up thought should reflect on.
    pub questions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeferParams {
    pub reason: String,
    /// When set, a human authority or later schedule picks the task up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defer_until: Option<chrono::DateTime<chrono::Utc>>,
}

/// One typed parameter record per action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionParams {
    Speak(SpeakParams),
    Tool(ToolParams),
    Observe(ObserveParams),
    Memorize(MemorizeParams),
    Recall(RecallParams),
    Forget(ForgetParams),
    Reject(RejectParams),
    Ponder(PonderParams),
    Defer(DeferParams),
    TaskComplete,
}

impl ActionParams {
    pub fn action_type(&self) -> ActionType {
        match self {
            Self::Speak(_) => ActionType::Speak,
            Self::Tool(_) => ActionType::Tool,
            Self::Observe(_) => ActionType::Observe,
            Self::Memorize(_) => ActionType::Memorize,
            Self::Recall(_) => ActionType::Recall,
            Self::Forget(_) => ActionType::Forget,
            Self::Reject(_) => ActionType::Reject,
            Self::Ponder(_) => ActionType::Ponder,
            Self::Defer(_) => ActionType::Defer,
            Self::TaskComplete => ActionType::TaskComplete,
        }
    }

    /// Canonical DEFER with a reason, used by override paths.
    pub fn defer(reason: impl Into<String>) -> Self {
        Self::Defer(DeferParams {
            reason: reason.into(),
            defer_until: None,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Decision + handler outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The pipeline's output for one thought.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDecision {
    #[serde(flatten)]
    pub params: ActionParams,
    pub rationale: String,
}

impl ActionDecision {
    pub fn new(params: ActionParams, rationale: impl Into<String>) -> Self {
        Self {
            params,
            rationale: rationale.into(),
        }
    }

    pub fn action_type(&self) -> ActionType {
        self.params.action_type()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerStatus {
    Completed,
    Failed,
}

/// A handler's request for one follow-up thought.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowUpRequest {
    /// Note appended to the follow-up thought's round history.
    pub note: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker: Option<FollowUpMarker>,
}

/// What a handler reports back to the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerOutcome {
    pub status: HandlerStatus,
    /// Taxonomy code when `status == Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// At most one follow-up thought per step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_up: Option<FollowUpRequest>,
}

impl HandlerOutcome {
    pub fn completed() -> Self {
        Self {
            status: HandlerStatus::Completed,
            error_code: None,
            message: None,
            follow_up: None,
        }
    }

    pub fn completed_with(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::completed()
        }
    }

    pub fn with_follow_up(mut self, note: impl Into<String>, marker: Option<FollowUpMarker>) -> Self {
        self.follow_up = Some(FollowUpRequest {
            note: note.into(),
            marker,
        });
        self
    }

    pub fn failed(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: HandlerStatus::Failed,
            error_code: Some(code.into()),
            message: Some(message.into()),
            follow_up: None,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == HandlerStatus::Failed
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_actions() {
        assert!(ActionType::TaskComplete.is_terminal());
        assert!(ActionType::Reject.is_terminal());
        assert!(ActionType::Defer.is_terminal());
        assert!(!ActionType::Speak.is_terminal());
        assert!(!ActionType::Ponder.is_terminal());
    }

    #[test]
    fn conscience_exempt_set_is_exactly_five() {
        let exempt: Vec<ActionType> = [
            ActionType::Speak,
            ActionType::Tool,
            ActionType::Observe,
            ActionType::Memorize,
            ActionType::Recall,
            ActionType::Forget,
            ActionType::Reject,
            ActionType::Ponder,
            ActionType::Defer,
            ActionType::TaskComplete,
        ]
        .into_iter()
        .filter(|a| a.conscience_exempt())
        .collect();

        assert_eq!(
            exempt,
            vec![
                ActionType::Observe,
                ActionType::Recall,
                ActionType::Reject,
                ActionType::Defer,
                ActionType::TaskComplete,
            ]
        );
    }

    #[test]
    fn params_carry_action_type() {
        let p = ActionParams::Speak(SpeakParams {
            channel_id: "c1".into(),
            content: "hi".into(),
            multi_part: false,
        });
        assert_eq!(p.action_type(), ActionType::Speak);
        assert_eq!(ActionParams::TaskComplete.action_type(), ActionType::TaskComplete);
    }

    #[test]
    fn action_params_serde_tag() {
        let p = ActionParams::defer("round_budget_exhausted");
        let json = serde_json::to_string(&p).unwrap();
        assert!(json.contains("\"action\":\"defer\""));
        assert!(json.contains("round_budget_exhausted"));

        let back: ActionParams = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn handler_outcome_builders() {
        let ok = HandlerOutcome::completed_with("sent")
            .with_follow_up("continue", Some(FollowUpMarker::MultiPartResponse));
        assert_eq!(ok.status, HandlerStatus::Completed);
        assert!(ok.follow_up.is_some());

        let failed = HandlerOutcome::failed("managed_attribute", "user_id is managed");
        assert!(failed.is_failed());
        assert_eq!(failed.error_code.as_deref(), Some("managed_attribute"));
    }
}
