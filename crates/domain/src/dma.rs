//! Decision-Making Analysis result records and the conscience verdict.
//!
//! Three evaluative DMAs (Ethical, Common Sense, Domain-Specific) run
//! concurrently; the Action-Selection DMA consumes their aggregate and
//! proposes one action. Aggregation is a pure function of the three
//! results so DMA scheduling order can never change the outcome.

use serde::{Deserialize, Serialize};

use crate::action::ActionDecision;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Evaluative DMA results
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One structured finding inside a DMA result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DmaFinding {
    pub principle: String,
    pub observation: String,
    /// Findings at or above this weight block the proposed course.
    pub severity: FindingSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingSeverity {
    Info,
    Caution,
    Blocking,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EthicalDmaResult {
    /// 0.0 = gross violation, 1.0 = fully aligned.
    pub alignment: f64,
    pub rationale: String,
    #[serde(default)]
    pub findings: Vec<DmaFinding>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommonSenseDmaResult {
    pub plausibility: f64,
    pub rationale: String,
    #[serde(default)]
    pub findings: Vec<DmaFinding>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainDmaResult {
    pub domain: String,
    pub score: f64,
    pub rationale: String,
    #[serde(default)]
    pub findings: Vec<DmaFinding>,
}

/// The joined output of the three concurrent DMAs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DmaAggregate {
    pub ethical: EthicalDmaResult,
    pub common_sense: CommonSenseDmaResult,
    pub domain: DomainDmaResult,
}

impl DmaAggregate {
    /// Pure aggregation: true when any evaluator produced a blocking
    /// finding. Independent of evaluation order by construction.
    pub fn has_blocking_finding(&self) -> bool {
        self.ethical
            .findings
            .iter()
            .chain(&self.common_sense.findings)
            .chain(&self.domain.findings)
            .any(|f| f.severity == FindingSeverity::Blocking)
    }

    /// Minimum score across the three evaluators.
    pub fn floor_score(&self) -> f64 {
        self.ethical
            .alignment
            .min(self.common_sense.plausibility)
            .min(self.domain.score)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Action selection + conscience
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Output of the Action-Selection DMA: the proposed action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSelectionResult {
    pub decision: ActionDecision,
    /// True when this selection was the recursive retry.
    #[serde(default)]
    pub recursive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConscienceSeverity {
    Advisory,
    Serious,
    Critical,
}

/// The ethical post-check over a selected action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConscienceResult {
    pub passed: bool,
    pub reason: String,
    pub severity: ConscienceSeverity,
}

impl ConscienceResult {
    pub fn pass() -> Self {
        Self {
            passed: true,
            reason: String::new(),
            severity: ConscienceSeverity::Advisory,
        }
    }

    pub fn fail(reason: impl Into<String>, severity: ConscienceSeverity) -> Self {
        Self {
            passed: false,
            reason: reason.into(),
            severity,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregate(block: bool) -> DmaAggregate {
        DmaAggregate {
            ethical: EthicalDmaResult {
                alignment: 0.9,
                rationale: "no principle conflict".into(),
                findings: if block {
                    vec![DmaFinding {
                        principle: "non-maleficence".into(),
                        observation: "harm potential".into(),
                        severity: FindingSeverity::Blocking,
                    }]
                } else {
                    vec![]
                },
            },
            common_sense: CommonSenseDmaResult {
                plausibility: 0.7,
                rationale: "plausible".into(),
                findings: vec![],
            },
            domain: DomainDmaResult {
                domain: "general".into(),
                score: 0.8,
                rationale: "in domain".into(),
                findings: vec![],
            },
        }
    }

    #[test]
    fn blocking_finding_detected_regardless_of_source() {
        assert!(!aggregate(false).has_blocking_finding());
        assert!(aggregate(true).has_blocking_finding());

        let mut agg = aggregate(false);
        agg.domain.findings.push(DmaFinding {
            principle: "scope".into(),
            observation: "out of domain".into(),
            severity: FindingSeverity::Blocking,
        });
        assert!(agg.has_blocking_finding());
    }

    #[test]
    fn floor_score_is_minimum() {
        let agg = aggregate(false);
        assert!((agg.floor_score() - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn conscience_constructors() {
        assert!(ConscienceResult::pass().passed);
        let fail = ConscienceResult::fail("tone", ConscienceSeverity::Serious);
        assert!(!fail.passed);
        assert_eq!(fail.severity, ConscienceSeverity::Serious);
    }

    #[test]
    fn severity_ordering() {
        assert!(FindingSeverity::Blocking > FindingSeverity::Caution);
        assert!(FindingSeverity::Caution > FindingSeverity::Info);
    }
}
