//! Correlations — one trace record per handler invocation and per bus
//! call, carrying span lineage, timing, outcome, and LLM usage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationKind {
    Handler,
    BusCall,
    ToolExecution,
    DmaEvaluation,
}

impl CorrelationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Handler => "handler",
            Self::BusCall => "bus_call",
            Self::ToolExecution => "tool_execution",
            Self::DmaEvaluation => "dma_evaluation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "handler" => Some(Self::Handler),
            "bus_call" => Some(Self::BusCall),
            "tool_execution" => Some(Self::ToolExecution),
            "dma_evaluation" => Some(Self::DmaEvaluation),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationOutcome {
    Success,
    Failure(String),
    Timeout,
}

impl CorrelationOutcome {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Success => "success",
            Self::Failure(_) => "failure",
            Self::Timeout => "timeout",
        }
    }
}

/// One span of work, linked to its parent by `parent_span_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correlation {
    pub correlation_id: Uuid,
    pub kind: CorrelationKind,
    /// Short label: bus capability, handler action, tool name, DMA name.
    pub target: String,
    pub task_id: Uuid,
    pub thought_id: Uuid,
    pub span_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<Uuid>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<CorrelationOutcome>,
    #[serde(default)]
    pub tokens_in: u64,
    #[serde(default)]
    pub tokens_out: u64,
    #[serde(default)]
    pub cost_usd: f64,
}

impl Correlation {
    pub fn begin(
        kind: CorrelationKind,
        target: impl Into<String>,
        task_id: Uuid,
        thought_id: Uuid,
        parent_span_id: Option<Uuid>,
    ) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            kind,
            target: target.into(),
            task_id,
            thought_id,
            span_id: Uuid::new_v4(),
            parent_span_id,
            started_at: Utc::now(),
            finished_at: None,
            outcome: None,
            tokens_in: 0,
            tokens_out: 0,
            cost_usd: 0.0,
        }
    }

    pub fn finish(&mut self, outcome: CorrelationOutcome) {
        self.finished_at = Some(Utc::now());
        self.outcome = Some(outcome);
    }

    pub fn record_usage(&mut self, tokens_in: u64, tokens_out: u64, cost_usd: f64) {
        self.tokens_in += tokens_in;
        self.tokens_out += tokens_out;
        self.cost_usd += cost_usd;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_and_finish() {
        let task = Uuid::new_v4();
        let thought = Uuid::new_v4();
        let mut c = Correlation::begin(CorrelationKind::BusCall, "llm", task, thought, None);
        assert!(c.finished_at.is_none());
        assert!(c.outcome.is_none());

        c.record_usage(100, 20, 0.003);
        c.finish(CorrelationOutcome::Success);
        assert!(c.finished_at.is_some());
        assert_eq!(c.outcome, Some(CorrelationOutcome::Success));
        assert_eq!(c.tokens_in, 100);
        assert_eq!(c.tokens_out, 20);
    }

    #[test]
    fn child_links_to_parent_span() {
        let task = Uuid::new_v4();
        let thought = Uuid::new_v4();
        let parent = Correlation::begin(CorrelationKind::Handler, "speak", task, thought, None);
        let child = Correlation::begin(
            CorrelationKind::BusCall,
            "communication",
            task,
            thought,
            Some(parent.span_id),
        );
        assert_eq!(child.parent_span_id, Some(parent.span_id));
    }

    #[test]
    fn kind_parse_roundtrip() {
        for k in [
            CorrelationKind::Handler,
            CorrelationKind::BusCall,
            CorrelationKind::ToolExecution,
            CorrelationKind::DmaEvaluation,
        ] {
            assert_eq!(CorrelationKind::parse(k.as_str()), Some(k));
        }
    }
}
