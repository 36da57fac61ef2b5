//! The adapter intake contract: inbound events and gate decisions.
//!
//! Adapters deliver [`InboundEvent`]s to the core's `accept` callable and
//! receive either `Accepted(task_id)` or a typed rejection. The core never
//! sees adapter internals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One inbound platform event, normalized by its adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub adapter_id: String,
    pub channel_id: String,
    /// Platform-native message id; the OBSERVE dedupe key is
    /// `(channel_id, external_id)`.
    pub external_id: String,
    pub subject_id: String,
    pub payload: String,
    /// Direct message vs. ambient channel traffic.
    #[serde(default)]
    pub is_direct: bool,
    pub arrived_at: DateTime<Utc>,
}

/// Why the gate refused an inbound event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum IntakeRejection {
    CreditDenied { subject_id: String },
    ConsentBlocked { detail: String },
    Prohibited { capability: String },
    /// Intake is closed (SHUTDOWN, first-run setup incomplete, or
    /// backpressure pause).
    Shutdown,
}

impl IntakeRejection {
    pub fn code(&self) -> &'static str {
        match self {
            Self::CreditDenied { .. } => "credit_denied",
            Self::ConsentBlocked { .. } => "consent_blocked",
            Self::Prohibited { .. } => "prohibited",
            Self::Shutdown => "shutdown",
        }
    }
}

/// The gate's answer to `accept`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IntakeDecision {
    Accepted { task_id: Uuid },
    Rejected(IntakeRejection),
}

impl IntakeDecision {
    pub fn task_id(&self) -> Option<Uuid> {
        match self {
            Self::Accepted { task_id } => Some(*task_id),
            Self::Rejected(_) => None,
        }
    }
}

/// Role claims an adapter may attach to a subject. Roles in the credit
/// bypass set skip the per-interaction debit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectRole {
    Member,
    Admin,
    Authority,
    SystemAdmin,
    ServiceAccount,
}

impl SubjectRole {
    pub fn bypasses_credit(self) -> bool {
        matches!(
            self,
            Self::Admin | Self::Authority | Self::SystemAdmin | Self::ServiceAccount
        )
    }
}
