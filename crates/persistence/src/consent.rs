//! Consent records and credit accounts.
//!
//! The subject owns the consent lifecycle; the system enforces it. The
//! credit debit is a single conditional UPDATE so concurrent interactions
//! can never spend the same credit twice.

use sqlx::Row;

use ciris_domain::consent::{ConsentRecord, ConsentStream, DataCategory};
use ciris_domain::{Error, Result};

use crate::store::{fmt_ts, parse_ts};
use crate::Storage;

const CONSENT_COLUMNS: [&str; 6] = [
    "subject_id",
    "stream",
    "categories",
    "granted_at",
    "expires_at",
    "revoked_at",
];

fn consent_from_row(row: &sqlx::any::AnyRow) -> Result<ConsentRecord> {
    let stream: String = row.try_get("stream").map_err(Error::sql)?;
    let categories: String = row.try_get("categories").map_err(Error::sql)?;
    let expires: Option<String> = row.try_get("expires_at").map_err(Error::sql)?;
    let revoked: Option<String> = row.try_get("revoked_at").map_err(Error::sql)?;
    Ok(ConsentRecord {
        subject_id: row.try_get("subject_id").map_err(Error::sql)?,
        stream: ConsentStream::parse(&stream)
            .ok_or_else(|| Error::sql(format!("unknown stream {stream:?}")))?,
        categories: serde_json::from_str::<Vec<String>>(&categories)?
            .iter()
            .map(|s| {
                DataCategory::parse(s)
                    .ok_or_else(|| Error::sql(format!("unknown category {s:?}")))
            })
            .collect::<Result<Vec<_>>>()?,
        granted_at: parse_ts(&row.try_get::<String, _>("granted_at").map_err(Error::sql)?)?,
        expires_at: expires.as_deref().map(parse_ts).transpose()?,
        revoked_at: revoked.as_deref().map(parse_ts).transpose()?,
    })
}

impl Storage {
    pub async fn get_consent(&self, subject_id: &str) -> Result<Option<ConsentRecord>> {
        let d = self.dialect();
        let sql = format!(
            "SELECT * FROM consent_records WHERE {}",
            d.where_eq(&["subject_id"], 1)
        );
        let row = sqlx::query(&sql)
            .bind(subject_id)
            .fetch_optional(self.pool())
            .await
            .map_err(Error::sql)?;
        row.as_ref().map(consent_from_row).transpose()
    }

    pub async fn upsert_consent(&self, record: &ConsentRecord) -> Result<()> {
        let sql = self.dialect().upsert(
            "consent_records",
            &CONSENT_COLUMNS,
            &["subject_id"],
            &["stream", "categories", "granted_at", "expires_at", "revoked_at"],
        );
        let categories: Vec<&str> = record.categories.iter().map(|c| c.as_str()).collect();
        sqlx::query(&sql)
            .bind(&record.subject_id)
            .bind(record.stream.as_str())
            .bind(serde_json::to_string(&categories)?)
            .bind(fmt_ts(record.granted_at))
            .bind(record.expires_at.map(fmt_ts))
            .bind(record.revoked_at.map(fmt_ts))
            .execute(self.pool())
            .await
            .map_err(Error::sql)?;
        Ok(())
    }

    /// Fetch the subject's record, creating the default `temporary`
    /// record on first contact.
    pub async fn ensure_consent(&self, subject_id: &str) -> Result<ConsentRecord> {
        if let Some(record) = self.get_consent(subject_id).await? {
            return Ok(record);
        }
        let record = ConsentRecord::temporary(subject_id, chrono::Utc::now());
        self.upsert_consent(&record).await?;
        tracing::debug!(subject_id, "created temporary consent record");
        Ok(record)
    }

    /// Delete revoked records whose 90-day decay has completed and
    /// return their subject ids so the caller can anonymize graph data.
    pub async fn sweep_decayed_consent(&self) -> Result<Vec<String>> {
        let d = self.dialect();
        let now = chrono::Utc::now();
        let sql = "SELECT * FROM consent_records WHERE revoked_at IS NOT NULL";
        let rows = sqlx::query(sql)
            .fetch_all(self.pool())
            .await
            .map_err(Error::sql)?;

        let mut decayed = Vec::new();
        for row in &rows {
            let record = consent_from_row(row)?;
            if record
                .decay_complete_at()
                .map(|t| now >= t)
                .unwrap_or(false)
            {
                decayed.push(record.subject_id);
            }
        }
        for subject in &decayed {
            let sql = format!(
                "DELETE FROM consent_records WHERE {}",
                d.where_eq(&["subject_id"], 1)
            );
            sqlx::query(&sql)
                .bind(subject)
                .execute(self.pool())
                .await
                .map_err(Error::sql)?;
        }
        Ok(decayed)
    }

    // ── Credit accounts ──────────────────────────────────────────────

    /// Create the account with an initial grant if it does not exist,
    /// and return the current balance.
    pub async fn ensure_credit_account(&self, subject_id: &str, initial: i64) -> Result<i64> {
        if let Some(balance) = self.credit_balance(subject_id).await? {
            return Ok(balance);
        }
        let sql = self.dialect().upsert(
            "credit_accounts",
            &["subject_id", "balance", "updated_at"],
            &["subject_id"],
            &["updated_at"],
        );
        sqlx::query(&sql)
            .bind(subject_id)
            .bind(initial)
            .bind(fmt_ts(chrono::Utc::now()))
            .execute(self.pool())
            .await
            .map_err(Error::sql)?;
        Ok(initial)
    }

    pub async fn credit_balance(&self, subject_id: &str) -> Result<Option<i64>> {
        let d = self.dialect();
        let sql = format!(
            "SELECT balance FROM credit_accounts WHERE {}",
            d.where_eq(&["subject_id"], 1)
        );
        let row = sqlx::query(&sql)
            .bind(subject_id)
            .fetch_optional(self.pool())
            .await
            .map_err(Error::sql)?;
        row.map(|r| r.try_get::<i64, _>("balance").map_err(Error::sql))
            .transpose()
    }

    /// Debit one credit. The conditional UPDATE makes the debit atomic;
    /// zero rows affected means insufficient credit.
    pub async fn debit_credit(&self, subject_id: &str) -> Result<()> {
        let d = self.dialect();
        let sql = format!(
            "UPDATE credit_accounts SET balance = balance - 1, updated_at = {} \
             WHERE subject_id = {} AND balance > 0",
            d.ph(1),
            d.ph(2),
        );
        let result = sqlx::query(&sql)
            .bind(fmt_ts(chrono::Utc::now()))
            .bind(subject_id)
            .execute(self.pool())
            .await
            .map_err(Error::sql)?;
        if result.rows_affected() == 0 {
            return Err(Error::CreditDenied(subject_id.to_owned()));
        }
        Ok(())
    }

    pub async fn grant_credit(&self, subject_id: &str, amount: i64) -> Result<i64> {
        self.ensure_credit_account(subject_id, 0).await?;
        let d = self.dialect();
        let sql = format!(
            "UPDATE credit_accounts SET balance = balance + {}, updated_at = {} \
             WHERE subject_id = {}",
            d.ph(1),
            d.ph(2),
            d.ph(3),
        );
        sqlx::query(&sql)
            .bind(amount)
            .bind(fmt_ts(chrono::Utc::now()))
            .bind(subject_id)
            .execute(self.pool())
            .await
            .map_err(Error::sql)?;
        Ok(self.credit_balance(subject_id).await?.unwrap_or(0))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::sqlite_storage;
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn ensure_creates_temporary_record() {
        let (_dir, storage) = sqlite_storage().await;
        let record = storage.ensure_consent("u1").await.unwrap();
        assert_eq!(record.stream, ConsentStream::Temporary);
        assert_eq!(record.categories, vec![DataCategory::Essential]);
        assert!(record.expires_at.is_some());

        // Second call returns the same record, not a fresh one.
        let again = storage.ensure_consent("u1").await.unwrap();
        assert_eq!(again.granted_at, record.granted_at);
    }

    #[tokio::test]
    async fn consent_transition_roundtrip() {
        let (_dir, storage) = sqlite_storage().await;
        let record = storage.ensure_consent("u1").await.unwrap();
        let partnered = record.into_partnered(
            vec![DataCategory::Essential, DataCategory::Conversational],
            Utc::now(),
        );
        storage.upsert_consent(&partnered).await.unwrap();

        let got = storage.get_consent("u1").await.unwrap().unwrap();
        assert_eq!(got.stream, ConsentStream::Partnered);
        assert_eq!(got.categories.len(), 2);
        assert!(got.expires_at.is_none());
    }

    #[tokio::test]
    async fn sweep_removes_only_fully_decayed() {
        let (_dir, storage) = sqlite_storage().await;

        let mut old = ConsentRecord::temporary("gone", Utc::now() - Duration::days(200));
        old.revoke(Utc::now() - Duration::days(91));
        storage.upsert_consent(&old).await.unwrap();

        let mut recent = ConsentRecord::temporary("staying", Utc::now());
        recent.revoke(Utc::now());
        storage.upsert_consent(&recent).await.unwrap();

        let decayed = storage.sweep_decayed_consent().await.unwrap();
        assert_eq!(decayed, vec!["gone".to_string()]);
        assert!(storage.get_consent("gone").await.unwrap().is_none());
        assert!(storage.get_consent("staying").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn credit_lifecycle() {
        let (_dir, storage) = sqlite_storage().await;
        let balance = storage.ensure_credit_account("u1", 2).await.unwrap();
        assert_eq!(balance, 2);

        storage.debit_credit("u1").await.unwrap();
        storage.debit_credit("u1").await.unwrap();
        assert_eq!(storage.credit_balance("u1").await.unwrap(), Some(0));

        let err = storage.debit_credit("u1").await.unwrap_err();
        assert!(matches!(err, Error::CreditDenied(_)));

        storage.grant_credit("u1", 5).await.unwrap();
        assert_eq!(storage.credit_balance("u1").await.unwrap(), Some(5));
        storage.debit_credit("u1").await.unwrap();
    }

    #[tokio::test]
    async fn ensure_account_does_not_regrant() {
        let (_dir, storage) = sqlite_storage().await;
        storage.ensure_credit_account("u1", 5).await.unwrap();
        storage.debit_credit("u1").await.unwrap();
        // A later ensure with the same initial grant must not top up.
        let balance = storage.ensure_credit_account("u1", 5).await.unwrap();
        assert_eq!(balance, 4);
    }

    #[tokio::test]
    async fn debit_unknown_subject_is_denied() {
        let (_dir, storage) = sqlite_storage().await;
        let err = storage.debit_credit("ghost").await.unwrap_err();
        assert!(matches!(err, Error::CreditDenied(_)));
    }
}
