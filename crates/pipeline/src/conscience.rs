//! The conscience: ethical post-check over a selected action.
//!
//! Five actions are exempt (RECALL, TASK_COMPLETE, OBSERVE, DEFER,
//! REJECT); the others must pass. The default implementation is
//! rule-based over the DMA aggregate: a blocking finding fails the
//! check, with severity scaled by how low the evaluators scored.

use async_trait::async_trait;

use ciris_domain::action::ActionDecision;
use ciris_domain::dma::{ConscienceResult, ConscienceSeverity, DmaAggregate, FindingSeverity};
use ciris_domain::pipeline::ContextBundle;
use ciris_domain::Result;

#[async_trait]
pub trait Conscience: Send + Sync {
    async fn validate(
        &self,
        decision: &ActionDecision,
        bundle: &ContextBundle,
        aggregate: &DmaAggregate,
    ) -> Result<ConscienceResult>;
}

/// Rule-based conscience over the DMA aggregate.
pub struct RuleConscience;

#[async_trait]
impl Conscience for RuleConscience {
    async fn validate(
        &self,
        decision: &ActionDecision,
        _bundle: &ContextBundle,
        aggregate: &DmaAggregate,
    ) -> Result<ConscienceResult> {
        let blocking: Vec<String> = aggregate
            .ethical
            .findings
            .iter()
            .chain(&aggregate.common_sense.findings)
            .chain(&aggregate.domain.findings)
            .filter(|f| f.severity == FindingSeverity::Blocking)
            .map(|f| format!("{}: {}", f.principle, f.observation))
            .collect();

        if !blocking.is_empty() {
            let severity = if aggregate.floor_score() < 0.2 {
                ConscienceSeverity::Critical
            } else {
                ConscienceSeverity::Serious
            };
            tracing::debug!(
                action = %decision.action_type(),
                findings = blocking.len(),
                "conscience failed"
            );
            return Ok(ConscienceResult::fail(blocking.join("; "), severity));
        }

        Ok(ConscienceResult::pass())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ciris_domain::action::{ActionParams, SpeakParams};
    use ciris_domain::cognitive::CognitiveState;
    use ciris_domain::dma::{
        CommonSenseDmaResult, DmaFinding, DomainDmaResult, EthicalDmaResult,
    };
    use ciris_domain::pipeline::{AgentIdentity, SystemSnapshot};

    fn bundle() -> ContextBundle {
        ContextBundle {
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
                purpose: "assist ethically".into(),
            },
            memories: vec![],
            conversation: vec![],
            constraints: vec![],
        }
    }

    fn decision() -> ActionDecision {
        ActionDecision::new(
            ActionParams::Speak(SpeakParams {
                channel_id: "c1".into(),
                content: "hello".into(),
                multi_part: false,
            }),
            "greeting",
        )
    }

    fn aggregate(with_blocking: bool, alignment: f64) -> DmaAggregate {
        DmaAggregate {
            ethical: EthicalDmaResult {
                alignment,
                rationale: "checked".into(),
                findings: if with_blocking {
                    vec![DmaFinding {
                        principle: "non-maleficence".into(),
                        observation: "response could cause harm".into(),
                        severity: FindingSeverity::Blocking,
                    }]
                } else {
                    vec![]
                },
            },
            common_sense: CommonSenseDmaResult {
                plausibility: 0.8,
                rationale: "plausible".into(),
                findings: vec![],
            },
            domain: DomainDmaResult {
                domain: "general".into(),
                score: 0.8,
                rationale: "in scope".into(),
                findings: vec![],
            },
        }
    }

    #[tokio::test]
    async fn clean_aggregate_passes() {
        let result = RuleConscience
            .validate(&decision(), &bundle(), &aggregate(false, 0.9))
            .await
            .unwrap();
        assert!(result.passed);
    }

    #[tokio::test]
    async fn blocking_finding_fails_with_reason() {
        let result = RuleConscience
            .validate(&decision(), &bundle(), &aggregate(true, 0.6))
            .await
            .unwrap();
        assert!(!result.passed);
        assert!(result.reason.contains("non-maleficence"));
        assert_eq!(result.severity, ConscienceSeverity::Serious);
    }

    #[tokio::test]
    async fn very_low_floor_escalates_to_critical() {
        let result = RuleConscience
            .validate(&decision(), &bundle(), &aggregate(true, 0.1))
            .await
            .unwrap();
        assert_eq!(result.severity, ConscienceSeverity::Critical);
    }
}
