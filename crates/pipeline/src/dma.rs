//! The four DMAs: Ethical, Common Sense, Domain-Specific (concurrent
//! evaluators) and Action Selection.
//!
//! Each evaluator is one LLM call returning a structured JSON record.
//! The three evaluators fan out concurrently and join; aggregation is a
//! pure function of their outputs, so scheduling order can never change
//! the result. Action selection consumes the aggregate and proposes
//! exactly one typed action.

use std::sync::Arc;

use ciris_buses::llm::{LlmMessage, LlmRequest};
use ciris_buses::{BusContext, LlmBus};
use ciris_domain::dma::{
    ActionSelectionResult, CommonSenseDmaResult, DmaAggregate, DomainDmaResult, EthicalDmaResult,
};
use ciris_domain::pipeline::ContextBundle;
use ciris_domain::task::Thought;
use ciris_domain::{Error, Result};

const ETHICAL_PROMPT: &str = "You are the ethical evaluator of an agent runtime. \
    Review the pending work item against the agent's principles \
    (beneficence, non-maleficence, autonomy, justice, transparency). \
    Respond with JSON only: {\"alignment\": 0.0-1.0, \"rationale\": str, \
    \"findings\": [{\"principle\": str, \"observation\": str, \
    \"severity\": \"info\"|\"caution\"|\"blocking\"}]}";

const COMMON_SENSE_PROMPT: &str = "You are the common-sense evaluator of an agent runtime. \
    Judge whether the pending work item makes practical sense. \
    Respond with JSON only: {\"plausibility\": 0.0-1.0, \"rationale\": str, \
    \"findings\": [{\"principle\": str, \"observation\": str, \
    \"severity\": \"info\"|\"caution\"|\"blocking\"}]}";

const DOMAIN_PROMPT: &str = "You are the domain evaluator of an agent runtime. \
    Judge whether the pending work item is inside the agent's served domain. \
    Respond with JSON only: {\"domain\": str, \"score\": 0.0-1.0, \"rationale\": str, \
    \"findings\": [{\"principle\": str, \"observation\": str, \
    \"severity\": \"info\"|\"caution\"|\"blocking\"}]}";

const SELECTION_PROMPT: &str = "You are the action selector of an agent runtime. \
    Choose exactly one action for the pending work item. Actions: speak \
    {channel_id, content}, tool {name, arguments}, observe {channel_id, \
    external_id}, memorize {node}, recall {query}, forget {key, reason}, \
    reject {reason}, ponder {questions}, defer {reason}, task_complete. \
    Respond with JSON only: {\"action\": str, ...params, \"rationale\": str}";

pub struct DmaSuite {
    llm: Arc<LlmBus>,
}

impl DmaSuite {
    pub fn new(llm: Arc<LlmBus>) -> Self {
        Self { llm }
    }

    /// Run the three evaluators concurrently and join. No
    /// short-circuit: all three complete before aggregation.
    pub async fn evaluate_all(
        &self,
        ctx: &BusContext,
        bundle: &ContextBundle,
        thought: &Thought,
    ) -> Result<DmaAggregate> {
        let situation = render_situation(bundle, thought);
        let (ethical, common_sense, domain) = tokio::join!(
            self.evaluate::<EthicalDmaResult>(ctx, ETHICAL_PROMPT, &situation),
            self.evaluate::<CommonSenseDmaResult>(ctx, COMMON_SENSE_PROMPT, &situation),
            self.evaluate::<DomainDmaResult>(ctx, DOMAIN_PROMPT, &situation),
        );
        Ok(DmaAggregate {
            ethical: ethical?,
            common_sense: common_sense?,
            domain: domain?,
        })
    }

    /// Action Selection DMA. `recursive` re-runs after a conscience
    /// failure with the feedback already appended to the thought.
    pub async fn select_action(
        &self,
        ctx: &BusContext,
        bundle: &ContextBundle,
        thought: &Thought,
        aggregate: &DmaAggregate,
        recursive: bool,
    ) -> Result<ActionSelectionResult> {
        let mut situation = render_situation(bundle, thought);
        situation.push_str("\n\nevaluator findings:\n");
        situation.push_str(&serde_json::to_string(aggregate)?);
        if let Some(feedback) = &thought.content.conscience_feedback {
            situation.push_str("\n\nconscience feedback (address this):\n");
            situation.push_str(feedback);
        }

        let decision = self
            .evaluate::<ciris_domain::action::ActionDecision>(ctx, SELECTION_PROMPT, &situation)
            .await?;
        Ok(ActionSelectionResult {
            decision,
            recursive,
        })
    }

    async fn evaluate<T: serde::de::DeserializeOwned>(
        &self,
        ctx: &BusContext,
        system: &str,
        situation: &str,
    ) -> Result<T> {
        let response = self
            .llm
            .call(
                ctx,
                LlmRequest {
                    messages: vec![LlmMessage::system(system), LlmMessage::user(situation)],
                    max_tokens: 1024,
                    temperature: 0.0,
                    correlation_id: None,
                },
            )
            .await?;
        parse_json_block(&response.content)
    }
}

fn render_situation(bundle: &ContextBundle, thought: &Thought) -> String {
    let mut out = format!(
        "agent: {} ({})\npurpose: {}\nstate: {} (paused: {})\n\ninput:\n{}\n",
        bundle.identity.display_name,
        bundle.identity.agent_id,
        bundle.identity.purpose,
        bundle.snapshot.cognitive_state,
        bundle.snapshot.paused,
        thought.content.input,
    );
    if !thought.content.round_notes.is_empty() {
        out.push_str("\nprior rounds:\n");
        for note in &thought.content.round_notes {
            out.push_str("- ");
            out.push_str(note);
            out.push('\n');
        }
    }
    if !bundle.conversation.is_empty() {
        out.push_str("\nrecent conversation:\n");
        for line in &bundle.conversation {
            out.push_str(line);
            out.push('\n');
        }
    }
    if !bundle.constraints.is_empty() {
        out.push_str("\nconstraints:\n");
        for constraint in &bundle.constraints {
            out.push_str("- ");
            out.push_str(constraint);
            out.push('\n');
        }
    }
    out
}

/// Extract and parse the first JSON object in a model response. Models
/// occasionally wrap JSON in prose or fences.
fn parse_json_block<T: serde::de::DeserializeOwned>(content: &str) -> Result<T> {
    let start = content
        .find('{')
        .ok_or_else(|| Error::Validation("no JSON object in model response".into()))?;
    let end = content
        .rfind('}')
        .ok_or_else(|| Error::Validation("unterminated JSON in model response".into()))?;
    serde_json::from_str(&content[start..=end])
        .map_err(|e| Error::Validation(format!("malformed model response: {e}")))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use ciris_domain::action::ActionType;
    use ciris_domain::dma::FindingSeverity;

    #[test]
    fn parse_plain_json() {
        let result: EthicalDmaResult = parse_json_block(
            r#"{"alignment": 0.9, "rationale": "fine", "findings": []}"#,
        )
        .unwrap();
        assert_eq!(result.alignment, 0.9);
    }

    #[test]
    fn parse_fenced_json() {
        let result: EthicalDmaResult = parse_json_block(
            "Here is my evaluation:\n```json\n{\"alignment\": 0.4, \"rationale\": \"risky\", \
             \"findings\": [{\"principle\": \"non-maleficence\", \"observation\": \"harm\", \
             \"severity\": \"blocking\"}]}\n```",
        )
        .unwrap();
        assert_eq!(result.findings.len(), 1);
        assert_eq!(result.findings[0].severity, FindingSeverity::Blocking);
    }

    #[test]
    fn parse_decision_json() {
        let decision: ciris_domain::action::ActionDecision = parse_json_block(
            r#"{"action": "speak", "channel_id": "c1", "content": "hello there", "rationale": "greeting"}"#,
        )
        .unwrap();
        assert_eq!(decision.action_type(), ActionType::Speak);
        assert_eq!(decision.rationale, "greeting");
    }

    #[test]
    fn parse_rejects_prose() {
        let err = parse_json_block::<EthicalDmaResult>("I cannot evaluate this.").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn situation_includes_notes_and_constraints() {
        use ciris_domain::cognitive::CognitiveState;
        use ciris_domain::pipeline::{AgentIdentity, SystemSnapshot};
        use ciris_domain::task::{Task, TaskOrigin};

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
        thought.content.round_notes.push("spoke once".into());

        let bundle = ContextBundle {
            snapshot: SystemSnapshot {
                occurrence_id: "occ-1".into(),
                cognitive_state: CognitiveState::Work,
                paused: false,
                active_tasks: 1,
                round_deadline_secs: 60,
            },
            identity: AgentIdentity {
                agent_id: "ciris".into(),
                display_name: "CIRIS".into(),
                purpose: "assist".into(),
            },
            memories: vec![],
            conversation: vec!["u1: hello".into()],
            constraints: vec!["rounds_remaining: 6".into()],
        };

        let situation = render_situation(&bundle, &thought);
        assert!(situation.contains("spoke once"));
        assert!(situation.contains("u1: hello"));
        assert!(situation.contains("rounds_remaining: 6"));
    }
}
