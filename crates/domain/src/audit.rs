//! Audit entries and the hash-chain rule.
//!
//! Each entry binds to its predecessor: `entry_hash = sha256(prev_hash ‖
//! payload)`, then the occurrence's signing key signs the entry hash.
//! Sequence numbers are monotonic per occurrence and the chain verifies
//! top-to-bottom; no entry is ever mutated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Hash of the genesis predecessor (an all-zero digest, hex).
pub const GENESIS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// A pipeline action was dispatched.
    Action,
    /// The gate refused an inbound event.
    GateRejection,
    /// A consent stream transition or partnership decision.
    ConsentDecision,
    /// Runtime control: pause, resume, step, shutdown.
    Control,
    /// Startup, migration, and other system events.
    System,
}

impl AuditKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Action => "action",
            Self::GateRejection => "gate_rejection",
            Self::ConsentDecision => "consent_decision",
            Self::Control => "control",
            Self::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "action" => Some(Self::Action),
            "gate_rejection" => Some(Self::GateRejection),
            "consent_decision" => Some(Self::ConsentDecision),
            "control" => Some(Self::Control),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// One append-only audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Monotonic per occurrence, starting at 1.
    pub seq: i64,
    pub occurrence_id: String,
    pub kind: AuditKind,
    /// Canonical JSON payload.
    pub payload: String,
    /// Hex sha256 of the predecessor entry (or [`GENESIS_HASH`]).
    pub prev_hash: String,
    /// Hex `sha256(prev_hash ‖ payload)`.
    pub entry_hash: String,
    /// Hex detached ed25519 signature over `entry_hash`.
    pub signature: String,
    pub created_at: DateTime<Utc>,
}

/// The chain rule, shared by append and verify paths.
pub fn chain_hash(prev_hash: &str, payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_hash_is_deterministic() {
        let a = chain_hash(GENESIS_HASH, "{\"k\":1}");
        let b = chain_hash(GENESIS_HASH, "{\"k\":1}");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn chain_hash_binds_both_inputs() {
        let base = chain_hash(GENESIS_HASH, "payload");
        assert_ne!(base, chain_hash(GENESIS_HASH, "payload2"));
        assert_ne!(base, chain_hash(&chain_hash(GENESIS_HASH, "x"), "payload"));
    }

    #[test]
    fn kind_parse_roundtrip() {
        for k in [
            AuditKind::Action,
            AuditKind::GateRejection,
            AuditKind::ConsentDecision,
            AuditKind::Control,
            AuditKind::System,
        ] {
            assert_eq!(AuditKind::parse(k.as_str()), Some(k));
        }
    }
}
