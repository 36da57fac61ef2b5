//! Tasks and thoughts — the persistent unit of work and its per-round
//! working item.
//!
//! A task is created by intake and advanced by the pipeline, one thought
//! per round, up to [`MAX_ROUNDS`] rounds. Terminal statuses are immutable;
//! a second terminal transition is an invariant violation surfaced as
//! `Error::Fatal` by the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::action::ActionType;

/// Hard per-task round budget. On the final round only terminal actions
/// are admissible; FINALIZE_ACTION rewrites anything else to DEFER.
pub const MAX_ROUNDS: u32 = 7;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Active,
    Deferred,
    Completed,
    Rejected,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Deferred | Self::Completed | Self::Rejected | Self::Failed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Deferred => "deferred",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "active" => Some(Self::Active),
            "deferred" => Some(Self::Deferred),
            "completed" => Some(Self::Completed),
            "rejected" => Some(Self::Rejected),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where a task came from: adapter + channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOrigin {
    pub adapter_id: String,
    pub channel_id: String,
}

/// The originating unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: Uuid,
    pub origin: TaskOrigin,
    pub subject_id: String,
    /// Which occurrence of the agent identity owns this task. Only the
    /// owning occurrence may process or acknowledge it.
    pub occurrence_id: String,
    /// Raw inbound payload, already scrubbed of privileged framing.
    pub initial_input: String,
    pub status: TaskStatus,
    /// Completed pipeline rounds, 0..=[`MAX_ROUNDS`].
    pub round_count: u32,
    /// Action chosen by the most recent completed round, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_action: Option<ActionType>,
    /// Reason recorded at terminalization (defer/reject cause, etc.).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome_reason: Option<String>,
    /// Bootstrap tasks are admissible during WAKEUP; everything else
    /// waits for WORK.
    #[serde(default)]
    pub bootstrap: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        origin: TaskOrigin,
        subject_id: impl Into<String>,
        occurrence_id: impl Into<String>,
        initial_input: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            task_id: Uuid::new_v4(),
            origin,
            subject_id: subject_id.into(),
            occurrence_id: occurrence_id.into(),
            initial_input: initial_input.into(),
            status: TaskStatus::Pending,
            round_count: 0,
            last_action: None,
            outcome_reason: None,
            bootstrap: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// True when the next round would be the last admissible one.
    pub fn on_final_round(&self) -> bool {
        self.round_count >= MAX_ROUNDS
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Thought
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThoughtGeneration {
    /// First thought created at task intake.
    Seed,
    /// Created by a handler that declared continuation.
    FollowUp,
    /// Created for recursive action re-selection inside one round.
    Recursive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThoughtState {
    New,
    InFlight,
    Completed,
    Failed,
}

impl ThoughtState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::InFlight => "in_flight",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(Self::New),
            "in_flight" => Some(Self::InFlight),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A marker carried into the next thought when work is known to be
/// unresolved (pending tool result, multi-part response, explicit
/// follow-up directive). Its absence after SPEAK biases the next round
/// to TASK_COMPLETE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowUpMarker {
    PendingToolResult,
    MultiPartResponse,
    FollowUpDirective,
}

/// Structured working content of one thought: the task input plus prior
/// results the pipeline accumulated for it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThoughtContent {
    pub input: String,
    /// One note per prior round (action taken + outcome summary).
    #[serde(default)]
    pub round_notes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_up_marker: Option<FollowUpMarker>,
    /// Conscience failure reason appended before recursive re-selection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conscience_feedback: Option<String>,
}

/// One round's working item for a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thought {
    pub thought_id: Uuid,
    pub task_id: Uuid,
    pub generation: ThoughtGeneration,
    /// Round number this thought runs in (1-based, assigned at pickup).
    pub round: u32,
    pub content: ThoughtContent,
    pub state: ThoughtState,
    pub created_at: DateTime<Utc>,
}

impl Thought {
    pub fn seed(task: &Task) -> Self {
        Self {
            thought_id: Uuid::new_v4(),
            task_id: task.task_id,
            generation: ThoughtGeneration::Seed,
            round: 0,
            content: ThoughtContent {
                input: task.initial_input.clone(),
                ..ThoughtContent::default()
            },
            state: ThoughtState::New,
            created_at: Utc::now(),
        }
    }

    pub fn follow_up(task: &Task, content: ThoughtContent) -> Self {
        Self {
            thought_id: Uuid::new_v4(),
            task_id: task.task_id,
            generation: ThoughtGeneration::FollowUp,
            round: 0,
            content,
            state: ThoughtState::New,
            created_at: Utc::now(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> Task {
        Task::new(
            TaskOrigin {
                adapter_id: "cli".into(),
                channel_id: "c1".into(),
            },
            "u1",
            "occ-1",
            "hello",
        )
    }

    #[test]
    fn status_terminality() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Active.is_terminal());
        assert!(TaskStatus::Deferred.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Rejected.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
    }

    #[test]
    fn status_parse_roundtrip() {
        for s in [
            TaskStatus::Pending,
            TaskStatus::Active,
            TaskStatus::Deferred,
            TaskStatus::Completed,
            TaskStatus::Rejected,
            TaskStatus::Failed,
        ] {
            assert_eq!(TaskStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(TaskStatus::parse("bogus"), None);
    }

    #[test]
    fn new_task_defaults() {
        let t = task();
        assert_eq!(t.status, TaskStatus::Pending);
        assert_eq!(t.round_count, 0);
        assert!(t.last_action.is_none());
        assert!(!t.bootstrap);
        assert!(!t.on_final_round());
    }

    #[test]
    fn final_round_at_budget() {
        let mut t = task();
        t.round_count = MAX_ROUNDS;
        assert!(t.on_final_round());
    }

    #[test]
    fn seed_thought_copies_input() {
        let t = task();
        let th = Thought::seed(&t);
        assert_eq!(th.task_id, t.task_id);
        assert_eq!(th.generation, ThoughtGeneration::Seed);
        assert_eq!(th.content.input, "hello");
        assert_eq!(th.state, ThoughtState::New);
        assert!(th.content.follow_up_marker.is_none());
    }

    #[test]
    fn thought_state_parse_roundtrip() {
        for s in [
            ThoughtState::New,
            ThoughtState::InFlight,
            ThoughtState::Completed,
            ThoughtState::Failed,
        ] {
            assert_eq!(ThoughtState::parse(s.as_str()), Some(s));
        }
    }
}
