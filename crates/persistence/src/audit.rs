//! The hash-chained, ed25519-signed audit log.
//!
//! Writers serialize on the chain tail: one mutex guards `(seq,
//! prev_hash)` per occurrence so the chain is a total order. Entries are
//! append-only; verification re-hashes and re-verifies every signature
//! top-to-bottom and reports a broken chain as `Fatal`.

use std::sync::Arc;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sqlx::Row;
use tokio::sync::Mutex;

use ciris_domain::audit::{chain_hash, AuditEntry, AuditKind, GENESIS_HASH};
use ciris_domain::{Error, Result};

use crate::store::{fmt_ts, parse_ts};
use crate::Storage;

struct Tail {
    seq: i64,
    prev_hash: String,
}

pub struct AuditLog {
    storage: Arc<Storage>,
    occurrence_id: String,
    signing: SigningKey,
    tail: Mutex<Tail>,
}

const AUDIT_COLUMNS: [&str; 8] = [
    "occurrence_id",
    "seq",
    "kind",
    "payload",
    "prev_hash",
    "entry_hash",
    "signature",
    "created_at",
];

fn entry_from_row(row: &sqlx::any::AnyRow) -> Result<AuditEntry> {
    let kind: String = row.try_get("kind").map_err(Error::sql)?;
    Ok(AuditEntry {
        seq: row.try_get("seq").map_err(Error::sql)?,
        occurrence_id: row.try_get("occurrence_id").map_err(Error::sql)?,
        kind: AuditKind::parse(&kind)
            .ok_or_else(|| Error::sql(format!("unknown audit kind {kind:?}")))?,
        payload: row.try_get("payload").map_err(Error::sql)?,
        prev_hash: row.try_get("prev_hash").map_err(Error::sql)?,
        entry_hash: row.try_get("entry_hash").map_err(Error::sql)?,
        signature: row.try_get("signature").map_err(Error::sql)?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at").map_err(Error::sql)?)?,
    })
}

impl AuditLog {
    /// Open the log for an occurrence, loading the current chain tail.
    pub async fn open(
        storage: Arc<Storage>,
        occurrence_id: impl Into<String>,
        signing: SigningKey,
    ) -> Result<Self> {
        let occurrence_id = occurrence_id.into();
        let d = storage.dialect();
        let sql = format!(
            "SELECT seq, entry_hash FROM audit_entries WHERE {} \
             ORDER BY seq DESC LIMIT 1",
            d.where_eq(&["occurrence_id"], 1)
        );
        let row = sqlx::query(&sql)
            .bind(&occurrence_id)
            .fetch_optional(storage.pool())
            .await
            .map_err(Error::sql)?;

        let tail = match row {
            Some(row) => Tail {
                seq: row.try_get("seq").map_err(Error::sql)?,
                prev_hash: row.try_get("entry_hash").map_err(Error::sql)?,
            },
            None => Tail {
                seq: 0,
                prev_hash: GENESIS_HASH.to_owned(),
            },
        };

        Ok(Self {
            storage,
            occurrence_id,
            signing,
            tail: Mutex::new(tail),
        })
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }

    pub fn occurrence_id(&self) -> &str {
        &self.occurrence_id
    }

    /// Append one entry. Serialized on the chain tail.
    pub async fn append(&self, kind: AuditKind, payload: &serde_json::Value) -> Result<AuditEntry> {
        let payload = serde_json::to_string(payload)?;
        let mut tail = self.tail.lock().await;

        let entry_hash = chain_hash(&tail.prev_hash, &payload);
        let signature = self.signing.sign(entry_hash.as_bytes());
        let entry = AuditEntry {
            seq: tail.seq + 1,
            occurrence_id: self.occurrence_id.clone(),
            kind,
            payload,
            prev_hash: tail.prev_hash.clone(),
            entry_hash: entry_hash.clone(),
            signature: hex::encode(signature.to_bytes()),
            created_at: chrono::Utc::now(),
        };

        let sql = self.storage.dialect().insert("audit_entries", &AUDIT_COLUMNS);
        sqlx::query(&sql)
            .bind(&entry.occurrence_id)
            .bind(entry.seq)
            .bind(entry.kind.as_str())
            .bind(&entry.payload)
            .bind(&entry.prev_hash)
            .bind(&entry.entry_hash)
            .bind(&entry.signature)
            .bind(fmt_ts(entry.created_at))
            .execute(self.storage.pool())
            .await
            .map_err(Error::sql)?;

        tail.seq = entry.seq;
        tail.prev_hash = entry_hash;
        Ok(entry)
    }

    /// All entries for this occurrence in chain order.
    pub async fn entries(&self, limit: u32) -> Result<Vec<AuditEntry>> {
        let d = self.storage.dialect();
        let sql = format!(
            "SELECT * FROM audit_entries WHERE {} ORDER BY seq ASC LIMIT {}",
            d.where_eq(&["occurrence_id"], 1),
            d.ph(2)
        );
        let rows = sqlx::query(&sql)
            .bind(&self.occurrence_id)
            .bind(limit as i64)
            .fetch_all(self.storage.pool())
            .await
            .map_err(Error::sql)?;
        rows.iter().map(entry_from_row).collect()
    }

    /// Verify the whole chain: sequence continuity, hash links, and
    /// signatures. Returns the number of verified entries.
    pub async fn verify_chain(&self) -> Result<u64> {
        let entries = self.entries(u32::MAX).await?;
        let verifying = self.verifying_key();

        let mut prev_hash = GENESIS_HASH.to_owned();
        let mut expected_seq = 1;
        for entry in &entries {
            if entry.seq != expected_seq {
                return Err(Error::Fatal(format!(
                    "audit chain gap at seq {expected_seq} (found {})",
                    entry.seq
                )));
            }
            if entry.prev_hash != prev_hash {
                return Err(Error::Fatal(format!(
                    "audit chain broken at seq {}: prev_hash mismatch",
                    entry.seq
                )));
            }
            let recomputed = chain_hash(&entry.prev_hash, &entry.payload);
            if recomputed != entry.entry_hash {
                return Err(Error::Fatal(format!(
                    "audit chain broken at seq {}: entry_hash mismatch",
                    entry.seq
                )));
            }
            let sig_bytes = hex::decode(&entry.signature)
                .map_err(|e| Error::Signature(format!("seq {}: {e}", entry.seq)))?;
            let signature = Signature::from_slice(&sig_bytes)
                .map_err(|e| Error::Signature(format!("seq {}: {e}", entry.seq)))?;
            verifying
                .verify(entry.entry_hash.as_bytes(), &signature)
                .map_err(|e| {
                    Error::Fatal(format!("audit signature invalid at seq {}: {e}", entry.seq))
                })?;

            prev_hash = entry.entry_hash.clone();
            expected_seq += 1;
        }
        Ok(entries.len() as u64)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::sqlite_storage;
    use serde_json::json;

    fn signing_key() -> SigningKey {
        SigningKey::from_bytes(&[7u8; 32])
    }

    async fn open_log(storage: Arc<Storage>) -> AuditLog {
        AuditLog::open(storage, "occ-1", signing_key()).await.unwrap()
    }

    #[tokio::test]
    async fn append_builds_a_verifying_chain() {
        let (_dir, storage) = sqlite_storage().await;
        let log = open_log(Arc::new(storage)).await;

        let first = log
            .append(AuditKind::Action, &json!({"action": "speak"}))
            .await
            .unwrap();
        assert_eq!(first.seq, 1);
        assert_eq!(first.prev_hash, GENESIS_HASH);

        let second = log
            .append(AuditKind::Action, &json!({"action": "task_complete"}))
            .await
            .unwrap();
        assert_eq!(second.seq, 2);
        assert_eq!(second.prev_hash, first.entry_hash);

        assert_eq!(log.verify_chain().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn tail_survives_reopen() {
        let (_dir, storage) = sqlite_storage().await;
        let storage = Arc::new(storage);

        {
            let log = open_log(storage.clone()).await;
            log.append(AuditKind::System, &json!({"event": "startup"}))
                .await
                .unwrap();
        }

        let log = open_log(storage).await;
        let entry = log
            .append(AuditKind::System, &json!({"event": "second"}))
            .await
            .unwrap();
        assert_eq!(entry.seq, 2);
        assert_eq!(log.verify_chain().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn tampered_payload_breaks_verification() {
        let (_dir, storage) = sqlite_storage().await;
        let storage = Arc::new(storage);
        let log = open_log(storage.clone()).await;
        log.append(AuditKind::Action, &json!({"action": "speak"}))
            .await
            .unwrap();

        // Mutate the stored payload behind the log's back.
        let d = storage.dialect();
        let sql = format!(
            "UPDATE audit_entries SET payload = {} WHERE {}",
            d.ph(1),
            d.where_eq(&["occurrence_id", "seq"], 2)
        );
        sqlx::query(&sql)
            .bind("{\"action\":\"forget\"}")
            .bind("occ-1")
            .bind(1i64)
            .execute(storage.pool())
            .await
            .unwrap();

        let err = log.verify_chain().await.unwrap_err();
        assert!(matches!(err, Error::Fatal(_)));
    }

    #[tokio::test]
    async fn occurrences_have_independent_chains() {
        let (_dir, storage) = sqlite_storage().await;
        let storage = Arc::new(storage);
        let a = AuditLog::open(storage.clone(), "occ-a", signing_key())
            .await
            .unwrap();
        let b = AuditLog::open(storage.clone(), "occ-b", signing_key())
            .await
            .unwrap();

        a.append(AuditKind::System, &json!({"n": 1})).await.unwrap();
        b.append(AuditKind::System, &json!({"n": 1})).await.unwrap();
        a.append(AuditKind::System, &json!({"n": 2})).await.unwrap();

        assert_eq!(a.verify_chain().await.unwrap(), 2);
        assert_eq!(b.verify_chain().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn entries_in_chain_order() {
        let (_dir, storage) = sqlite_storage().await;
        let log = open_log(Arc::new(storage)).await;
        for n in 1..=3 {
            log.append(AuditKind::Control, &json!({"n": n})).await.unwrap();
        }
        let entries = log.entries(10).await.unwrap();
        let seqs: Vec<i64> = entries.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }
}
