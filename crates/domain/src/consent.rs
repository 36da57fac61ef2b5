//! Consent records: streams, data categories, expiry, and decay.
//!
//! A subject's consent record is created on first contact (default
//! `temporary`, 14-day TTL) and only transitions on explicit request.
//! Revocation starts a 90-day decay after which only anonymous
//! statistical patterns remain.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// TTL of a `temporary` consent record.
pub const TEMPORARY_TTL_DAYS: i64 = 14;
/// Length of the post-revocation decay schedule.
pub const DECAY_DAYS: i64 = 90;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streams + categories
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentStream {
    /// Default on first contact; expires after 14 days.
    Temporary,
    /// Bilateral agreement, decided by the agent's own pipeline.
    Partnered,
    /// Subject→data linkage severed; statistical aggregation only.
    Anonymous,
}

impl ConsentStream {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Temporary => "temporary",
            Self::Partnered => "partnered",
            Self::Anonymous => "anonymous",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "temporary" => Some(Self::Temporary),
            "partnered" => Some(Self::Partnered),
            "anonymous" => Some(Self::Anonymous),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataCategory {
    /// Required to answer the interaction at hand.
    Essential,
    /// Conversation history beyond the current task.
    Conversational,
    /// Stored preferences and profile facts.
    Preference,
    /// Aggregated, de-identified research use.
    Research,
}

impl DataCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Essential => "essential",
            Self::Conversational => "conversational",
            Self::Preference => "preference",
            Self::Research => "research",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "essential" => Some(Self::Essential),
            "conversational" => Some(Self::Conversational),
            "preference" => Some(Self::Preference),
            "research" => Some(Self::Research),
            _ => None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsentRecord {
    pub subject_id: String,
    pub stream: ConsentStream,
    pub categories: Vec<DataCategory>,
    pub granted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
}

impl ConsentRecord {
    /// Default record for a subject never seen before.
    pub fn temporary(subject_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            subject_id: subject_id.into(),
            stream: ConsentStream::Temporary,
            categories: vec![DataCategory::Essential],
            granted_at: now,
            expires_at: Some(now + Duration::days(TEMPORARY_TTL_DAYS)),
            revoked_at: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|e| now >= e).unwrap_or(false)
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    /// When the post-revocation decay completes, if revoked.
    pub fn decay_complete_at(&self) -> Option<DateTime<Utc>> {
        self.revoked_at.map(|r| r + Duration::days(DECAY_DAYS))
    }

    /// Whether a read of `category` data about this subject is allowed
    /// right now. Expired or revoked records only permit ESSENTIAL for
    /// the purpose of telling the subject what happened.
    pub fn permits(&self, category: DataCategory, now: DateTime<Utc>) -> bool {
        if self.is_revoked() {
            return false;
        }
        match self.stream {
            ConsentStream::Temporary => {
                category == DataCategory::Essential && !self.is_expired(now)
            }
            ConsentStream::Partnered => {
                !self.is_expired(now) && self.categories.contains(&category)
            }
            // Anonymous: no subject-linked reads at all; statistical
            // aggregation happens below the category system.
            ConsentStream::Anonymous => false,
        }
    }

    /// Transition to partnered after a bilateral acceptance.
    pub fn into_partnered(mut self, categories: Vec<DataCategory>, now: DateTime<Utc>) -> Self {
        self.stream = ConsentStream::Partnered;
        self.categories = categories;
        self.granted_at = now;
        self.expires_at = None;
        self
    }

    /// Sever linkage immediately.
    pub fn into_anonymous(mut self, now: DateTime<Utc>) -> Self {
        self.stream = ConsentStream::Anonymous;
        self.categories = vec![];
        self.granted_at = now;
        self.expires_at = None;
        self
    }

    pub fn revoke(&mut self, now: DateTime<Utc>) {
        self.revoked_at = Some(now);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temporary_gets_fourteen_day_ttl() {
        let now = Utc::now();
        let rec = ConsentRecord::temporary("u1", now);
        assert_eq!(rec.stream, ConsentStream::Temporary);
        assert_eq!(rec.expires_at, Some(now + Duration::days(14)));
        assert!(!rec.is_expired(now));
        assert!(rec.is_expired(now + Duration::days(14)));
    }

    #[test]
    fn temporary_permits_essential_only() {
        let now = Utc::now();
        let rec = ConsentRecord::temporary("u1", now);
        assert!(rec.permits(DataCategory::Essential, now));
        assert!(!rec.permits(DataCategory::Conversational, now));
        assert!(!rec.permits(DataCategory::Preference, now));
    }

    #[test]
    fn expired_temporary_blocks_everything_non_essential_and_essential() {
        let now = Utc::now();
        let rec = ConsentRecord::temporary("u1", now);
        let later = now + Duration::days(15);
        assert!(!rec.permits(DataCategory::Essential, later));
        assert!(!rec.permits(DataCategory::Conversational, later));
    }

    #[test]
    fn partnered_permits_granted_categories() {
        let now = Utc::now();
        let rec = ConsentRecord::temporary("u1", now).into_partnered(
            vec![DataCategory::Essential, DataCategory::Conversational],
            now,
        );
        assert!(rec.permits(DataCategory::Conversational, now));
        assert!(!rec.permits(DataCategory::Research, now));
        assert!(rec.expires_at.is_none());
    }

    #[test]
    fn anonymous_permits_nothing() {
        let now = Utc::now();
        let rec = ConsentRecord::temporary("u1", now).into_anonymous(now);
        assert!(!rec.permits(DataCategory::Essential, now));
    }

    #[test]
    fn revocation_starts_ninety_day_decay() {
        let now = Utc::now();
        let mut rec = ConsentRecord::temporary("u1", now).into_partnered(
            vec![DataCategory::Essential],
            now,
        );
        rec.revoke(now);
        assert!(rec.is_revoked());
        assert_eq!(rec.decay_complete_at(), Some(now + Duration::days(90)));
        assert!(!rec.permits(DataCategory::Essential, now));
    }
}
