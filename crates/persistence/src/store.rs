//! Task, thought, and correlation stores.
//!
//! The processor worker holding a task is its single writer; readers get
//! consistent snapshots. Terminal task statuses are immutable — any
//! further mutation is an invariant violation surfaced as `Fatal`.

use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use ciris_domain::action::ActionType;
use ciris_domain::correlation::{Correlation, CorrelationKind, CorrelationOutcome};
use ciris_domain::task::{
    Task, TaskOrigin, TaskStatus, Thought, ThoughtContent, ThoughtGeneration, ThoughtState,
};
use ciris_domain::{Error, Result};

use crate::Storage;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Row helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

pub(crate) fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::sql(format!("bad timestamp {s:?}: {e}")))
}

pub(crate) fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| Error::sql(format!("bad uuid {s:?}: {e}")))
}

fn task_from_row(row: &sqlx::any::AnyRow) -> Result<Task> {
    let status: String = row.try_get("status").map_err(Error::sql)?;
    let last_action: Option<String> = row.try_get("last_action").map_err(Error::sql)?;
    Ok(Task {
        task_id: parse_uuid(&row.try_get::<String, _>("task_id").map_err(Error::sql)?)?,
        origin: TaskOrigin {
            adapter_id: row.try_get("adapter_id").map_err(Error::sql)?,
            channel_id: row.try_get("channel_id").map_err(Error::sql)?,
        },
        subject_id: row.try_get("subject_id").map_err(Error::sql)?,
        occurrence_id: row.try_get("occurrence_id").map_err(Error::sql)?,
        initial_input: row.try_get("initial_input").map_err(Error::sql)?,
        status: TaskStatus::parse(&status)
            .ok_or_else(|| Error::sql(format!("unknown task status {status:?}")))?,
        round_count: row.try_get::<i64, _>("round_count").map_err(Error::sql)? as u32,
        last_action: match last_action {
            Some(s) => Some(
                serde_json::from_value::<ActionType>(serde_json::Value::String(s.clone()))
                    .map_err(|_| Error::sql(format!("unknown action {s:?}")))?,
            ),
            None => None,
        },
        outcome_reason: row.try_get("outcome_reason").map_err(Error::sql)?,
        bootstrap: row.try_get::<i64, _>("bootstrap").map_err(Error::sql)? != 0,
        created_at: parse_ts(&row.try_get::<String, _>("created_at").map_err(Error::sql)?)?,
        updated_at: parse_ts(&row.try_get::<String, _>("updated_at").map_err(Error::sql)?)?,
    })
}

fn thought_from_row(row: &sqlx::any::AnyRow) -> Result<Thought> {
    let generation: String = row.try_get("generation").map_err(Error::sql)?;
    let state: String = row.try_get("state").map_err(Error::sql)?;
    let content: String = row.try_get("content").map_err(Error::sql)?;
    Ok(Thought {
        thought_id: parse_uuid(&row.try_get::<String, _>("thought_id").map_err(Error::sql)?)?,
        task_id: parse_uuid(&row.try_get::<String, _>("task_id").map_err(Error::sql)?)?,
        generation: serde_json::from_value::<ThoughtGeneration>(serde_json::Value::String(
            generation.clone(),
        ))
        .map_err(|_| Error::sql(format!("unknown generation {generation:?}")))?,
        round: row.try_get::<i64, _>("round").map_err(Error::sql)? as u32,
        content: serde_json::from_str::<ThoughtContent>(&content)?,
        state: ThoughtState::parse(&state)
            .ok_or_else(|| Error::sql(format!("unknown thought state {state:?}")))?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at").map_err(Error::sql)?)?,
    })
}

const TASK_COLUMNS: [&str; 13] = [
    "task_id",
    "adapter_id",
    "channel_id",
    "subject_id",
    "occurrence_id",
    "initial_input",
    "status",
    "round_count",
    "last_action",
    "outcome_reason",
    "bootstrap",
    "created_at",
    "updated_at",
];

const THOUGHT_COLUMNS: [&str; 7] = [
    "thought_id",
    "task_id",
    "generation",
    "round",
    "content",
    "state",
    "created_at",
];

fn action_str(action: Option<ActionType>) -> Option<String> {
    action.map(|a| a.as_str().to_owned())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tasks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl Storage {
    pub async fn insert_task(&self, task: &Task) -> Result<()> {
        let sql = self.dialect().insert("tasks", &TASK_COLUMNS);
        sqlx::query(&sql)
            .bind(task.task_id.to_string())
            .bind(&task.origin.adapter_id)
            .bind(&task.origin.channel_id)
            .bind(&task.subject_id)
            .bind(&task.occurrence_id)
            .bind(&task.initial_input)
            .bind(task.status.as_str())
            .bind(task.round_count as i64)
            .bind(action_str(task.last_action))
            .bind(&task.outcome_reason)
            .bind(task.bootstrap as i64)
            .bind(fmt_ts(task.created_at))
            .bind(fmt_ts(task.updated_at))
            .execute(self.pool())
            .await
            .map_err(Error::sql)?;
        Ok(())
    }

    pub async fn get_task(&self, task_id: Uuid) -> Result<Option<Task>> {
        let d = self.dialect();
        let sql = format!("SELECT * FROM tasks WHERE {}", d.where_eq(&["task_id"], 1));
        let row = sqlx::query(&sql)
            .bind(task_id.to_string())
            .fetch_optional(self.pool())
            .await
            .map_err(Error::sql)?;
        row.as_ref().map(task_from_row).transpose()
    }

    /// Persist a task mutation.
    ///
    /// The stored status must be non-terminal: a second terminal
    /// transition (or any write after one) violates the task lifecycle
    /// and is reported as `Fatal`.
    pub async fn update_task(&self, task: &Task) -> Result<()> {
        let current = self
            .get_task(task.task_id)
            .await?
            .ok_or_else(|| Error::Fatal(format!("task {} vanished", task.task_id)))?;
        if current.status.is_terminal() {
            return Err(Error::Fatal(format!(
                "task {} is terminal ({}); refusing mutation to {}",
                task.task_id,
                current.status.as_str(),
                task.status.as_str()
            )));
        }

        let d = self.dialect();
        let sql = format!(
            "UPDATE tasks SET status = {}, round_count = {}, last_action = {}, \
             outcome_reason = {}, updated_at = {} WHERE task_id = {}",
            d.ph(1),
            d.ph(2),
            d.ph(3),
            d.ph(4),
            d.ph(5),
            d.ph(6),
        );
        sqlx::query(&sql)
            .bind(task.status.as_str())
            .bind(task.round_count as i64)
            .bind(action_str(task.last_action))
            .bind(&task.outcome_reason)
            .bind(fmt_ts(Utc::now()))
            .bind(task.task_id.to_string())
            .execute(self.pool())
            .await
            .map_err(Error::sql)?;
        Ok(())
    }

    /// Tasks for one occurrence, optionally filtered by status, newest
    /// first.
    pub async fn list_tasks(
        &self,
        occurrence_id: &str,
        status: Option<TaskStatus>,
        limit: u32,
    ) -> Result<Vec<Task>> {
        let d = self.dialect();
        let sql = match status {
            Some(_) => format!(
                "SELECT * FROM tasks WHERE {} ORDER BY created_at DESC LIMIT {}",
                d.where_eq(&["occurrence_id", "status"], 1),
                d.ph(3)
            ),
            None => format!(
                "SELECT * FROM tasks WHERE {} ORDER BY created_at DESC LIMIT {}",
                d.where_eq(&["occurrence_id"], 1),
                d.ph(2)
            ),
        };
        let mut query = sqlx::query(&sql).bind(occurrence_id);
        if let Some(status) = status {
            query = query.bind(status.as_str());
        }
        let rows = query
            .bind(limit as i64)
            .fetch_all(self.pool())
            .await
            .map_err(Error::sql)?;
        rows.iter().map(task_from_row).collect()
    }

    // ── Thoughts ─────────────────────────────────────────────────────

    pub async fn insert_thought(&self, thought: &Thought) -> Result<()> {
        let sql = self.dialect().insert("thoughts", &THOUGHT_COLUMNS);
        sqlx::query(&sql)
            .bind(thought.thought_id.to_string())
            .bind(thought.task_id.to_string())
            .bind(match thought.generation {
                ThoughtGeneration::Seed => "seed",
                ThoughtGeneration::FollowUp => "follow_up",
                ThoughtGeneration::Recursive => "recursive",
            })
            .bind(thought.round as i64)
            .bind(serde_json::to_string(&thought.content)?)
            .bind(thought.state.as_str())
            .bind(fmt_ts(thought.created_at))
            .execute(self.pool())
            .await
            .map_err(Error::sql)?;
        Ok(())
    }

    pub async fn update_thought(&self, thought: &Thought) -> Result<()> {
        let d = self.dialect();
        let sql = format!(
            "UPDATE thoughts SET round = {}, content = {}, state = {} WHERE thought_id = {}",
            d.ph(1),
            d.ph(2),
            d.ph(3),
            d.ph(4),
        );
        sqlx::query(&sql)
            .bind(thought.round as i64)
            .bind(serde_json::to_string(&thought.content)?)
            .bind(thought.state.as_str())
            .bind(thought.thought_id.to_string())
            .execute(self.pool())
            .await
            .map_err(Error::sql)?;
        Ok(())
    }

    pub async fn get_thought(&self, thought_id: Uuid) -> Result<Option<Thought>> {
        let d = self.dialect();
        let sql = format!(
            "SELECT * FROM thoughts WHERE {}",
            d.where_eq(&["thought_id"], 1)
        );
        let row = sqlx::query(&sql)
            .bind(thought_id.to_string())
            .fetch_optional(self.pool())
            .await
            .map_err(Error::sql)?;
        row.as_ref().map(thought_from_row).transpose()
    }

    /// `new` thoughts whose task belongs to this occurrence and is still
    /// live, oldest first. This is the round loop's poll.
    pub async fn ready_thoughts(&self, occurrence_id: &str, limit: u32) -> Result<Vec<Thought>> {
        let d = self.dialect();
        let sql = format!(
            "SELECT th.* FROM thoughts th \
             JOIN tasks t ON t.task_id = th.task_id \
             WHERE th.state = {} AND t.occurrence_id = {} \
               AND t.status IN ('pending', 'active') \
             ORDER BY th.created_at ASC LIMIT {}",
            d.ph(1),
            d.ph(2),
            d.ph(3),
        );
        let rows = sqlx::query(&sql)
            .bind(ThoughtState::New.as_str())
            .bind(occurrence_id)
            .bind(limit as i64)
            .fetch_all(self.pool())
            .await
            .map_err(Error::sql)?;
        rows.iter().map(thought_from_row).collect()
    }

    // ── Correlations ─────────────────────────────────────────────────

    /// Record a finished correlation (insert-or-replace by id).
    pub async fn record_correlation(&self, c: &Correlation) -> Result<()> {
        let columns = [
            "correlation_id",
            "kind",
            "target",
            "task_id",
            "thought_id",
            "span_id",
            "parent_span_id",
            "started_at",
            "finished_at",
            "outcome",
            "outcome_detail",
            "tokens_in",
            "tokens_out",
            "cost_usd",
        ];
        let sql = self.dialect().upsert(
            "correlations",
            &columns,
            &["correlation_id"],
            &["finished_at", "outcome", "outcome_detail", "tokens_in", "tokens_out", "cost_usd"],
        );
        let (outcome, detail) = match &c.outcome {
            None => (None, None),
            Some(CorrelationOutcome::Success) => (Some("success"), None),
            Some(CorrelationOutcome::Timeout) => (Some("timeout"), None),
            Some(CorrelationOutcome::Failure(msg)) => (Some("failure"), Some(msg.clone())),
        };
        sqlx::query(&sql)
            .bind(c.correlation_id.to_string())
            .bind(c.kind.as_str())
            .bind(&c.target)
            .bind(c.task_id.to_string())
            .bind(c.thought_id.to_string())
            .bind(c.span_id.to_string())
            .bind(c.parent_span_id.map(|s| s.to_string()))
            .bind(fmt_ts(c.started_at))
            .bind(c.finished_at.map(fmt_ts))
            .bind(outcome)
            .bind(detail)
            .bind(c.tokens_in as i64)
            .bind(c.tokens_out as i64)
            .bind(c.cost_usd)
            .execute(self.pool())
            .await
            .map_err(Error::sql)?;
        Ok(())
    }

    pub async fn correlations_for_task(&self, task_id: Uuid) -> Result<Vec<Correlation>> {
        let d = self.dialect();
        let sql = format!(
            "SELECT * FROM correlations WHERE {} ORDER BY started_at ASC",
            d.where_eq(&["task_id"], 1)
        );
        let rows = sqlx::query(&sql)
            .bind(task_id.to_string())
            .fetch_all(self.pool())
            .await
            .map_err(Error::sql)?;

        rows.iter()
            .map(|row| {
                let kind: String = row.try_get("kind").map_err(Error::sql)?;
                let outcome: Option<String> = row.try_get("outcome").map_err(Error::sql)?;
                let detail: Option<String> =
                    row.try_get("outcome_detail").map_err(Error::sql)?;
                let finished: Option<String> =
                    row.try_get("finished_at").map_err(Error::sql)?;
                let parent: Option<String> =
                    row.try_get("parent_span_id").map_err(Error::sql)?;
                Ok(Correlation {
                    correlation_id: parse_uuid(
                        &row.try_get::<String, _>("correlation_id").map_err(Error::sql)?,
                    )?,
                    kind: CorrelationKind::parse(&kind)
                        .ok_or_else(|| Error::sql(format!("unknown kind {kind:?}")))?,
                    target: row.try_get("target").map_err(Error::sql)?,
                    task_id: parse_uuid(
                        &row.try_get::<String, _>("task_id").map_err(Error::sql)?,
                    )?,
                    thought_id: parse_uuid(
                        &row.try_get::<String, _>("thought_id").map_err(Error::sql)?,
                    )?,
                    span_id: parse_uuid(
                        &row.try_get::<String, _>("span_id").map_err(Error::sql)?,
                    )?,
                    parent_span_id: parent.as_deref().map(parse_uuid).transpose()?,
                    started_at: parse_ts(
                        &row.try_get::<String, _>("started_at").map_err(Error::sql)?,
                    )?,
                    finished_at: finished.as_deref().map(parse_ts).transpose()?,
                    outcome: match outcome.as_deref() {
                        None => None,
                        Some("success") => Some(CorrelationOutcome::Success),
                        Some("timeout") => Some(CorrelationOutcome::Timeout),
                        Some("failure") => {
                            Some(CorrelationOutcome::Failure(detail.unwrap_or_default()))
                        }
                        Some(other) => {
                            return Err(Error::sql(format!("unknown outcome {other:?}")))
                        }
                    },
                    tokens_in: row.try_get::<i64, _>("tokens_in").map_err(Error::sql)? as u64,
                    tokens_out: row.try_get::<i64, _>("tokens_out").map_err(Error::sql)? as u64,
                    cost_usd: row.try_get("cost_usd").map_err(Error::sql)?,
                })
            })
            .collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::sqlite_storage;

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

    #[tokio::test]
    async fn task_insert_get_roundtrip() {
        let (_dir, storage) = sqlite_storage().await;
        let t = task();
        storage.insert_task(&t).await.unwrap();

        let got = storage.get_task(t.task_id).await.unwrap().unwrap();
        assert_eq!(got.task_id, t.task_id);
        assert_eq!(got.status, TaskStatus::Pending);
        assert_eq!(got.initial_input, "hello");
        assert_eq!(got.occurrence_id, "occ-1");
        assert!(!got.bootstrap);
    }

    #[tokio::test]
    async fn task_update_and_last_action() {
        let (_dir, storage) = sqlite_storage().await;
        let mut t = task();
        storage.insert_task(&t).await.unwrap();

        t.status = TaskStatus::Active;
        t.round_count = 1;
        t.last_action = Some(ActionType::Speak);
        storage.update_task(&t).await.unwrap();

        let got = storage.get_task(t.task_id).await.unwrap().unwrap();
        assert_eq!(got.status, TaskStatus::Active);
        assert_eq!(got.round_count, 1);
        assert_eq!(got.last_action, Some(ActionType::Speak));
    }

    #[tokio::test]
    async fn terminal_task_is_immutable() {
        let (_dir, storage) = sqlite_storage().await;
        let mut t = task();
        storage.insert_task(&t).await.unwrap();

        t.status = TaskStatus::Completed;
        storage.update_task(&t).await.unwrap();

        t.status = TaskStatus::Failed;
        let err = storage.update_task(&t).await.unwrap_err();
        assert!(matches!(err, Error::Fatal(_)));

        let got = storage.get_task(t.task_id).await.unwrap().unwrap();
        assert_eq!(got.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn ready_thoughts_filters_by_occurrence() {
        let (_dir, storage) = sqlite_storage().await;

        let mine = task();
        storage.insert_task(&mine).await.unwrap();
        storage.insert_thought(&Thought::seed(&mine)).await.unwrap();

        let mut theirs = task();
        theirs.occurrence_id = "occ-2".into();
        storage.insert_task(&theirs).await.unwrap();
        storage.insert_thought(&Thought::seed(&theirs)).await.unwrap();

        let ready = storage.ready_thoughts("occ-1", 10).await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].task_id, mine.task_id);
    }

    #[tokio::test]
    async fn ready_thoughts_skips_terminal_tasks() {
        let (_dir, storage) = sqlite_storage().await;
        let mut t = task();
        storage.insert_task(&t).await.unwrap();
        storage.insert_thought(&Thought::seed(&t)).await.unwrap();

        t.status = TaskStatus::Completed;
        storage.update_task(&t).await.unwrap();

        assert!(storage.ready_thoughts("occ-1", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn thought_state_update() {
        let (_dir, storage) = sqlite_storage().await;
        let t = task();
        storage.insert_task(&t).await.unwrap();
        let mut th = Thought::seed(&t);
        storage.insert_thought(&th).await.unwrap();

        th.state = ThoughtState::Completed;
        th.round = 1;
        storage.update_thought(&th).await.unwrap();

        let got = storage.get_thought(th.thought_id).await.unwrap().unwrap();
        assert_eq!(got.state, ThoughtState::Completed);
        assert_eq!(got.round, 1);
        assert!(storage.ready_thoughts("occ-1", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn correlation_roundtrip() {
        let (_dir, storage) = sqlite_storage().await;
        let t = task();
        storage.insert_task(&t).await.unwrap();

        let mut c = Correlation::begin(
            CorrelationKind::BusCall,
            "llm",
            t.task_id,
            Uuid::new_v4(),
            None,
        );
        c.record_usage(120, 40, 0.004);
        c.finish(CorrelationOutcome::Success);
        storage.record_correlation(&c).await.unwrap();

        let list = storage.correlations_for_task(t.task_id).await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].target, "llm");
        assert_eq!(list[0].tokens_in, 120);
        assert_eq!(list[0].outcome, Some(CorrelationOutcome::Success));
    }

    #[tokio::test]
    async fn correlation_record_is_upsert() {
        let (_dir, storage) = sqlite_storage().await;
        let t = task();
        storage.insert_task(&t).await.unwrap();

        let mut c = Correlation::begin(
            CorrelationKind::Handler,
            "speak",
            t.task_id,
            Uuid::new_v4(),
            None,
        );
        storage.record_correlation(&c).await.unwrap();
        c.finish(CorrelationOutcome::Failure("timeout downstream".into()));
        storage.record_correlation(&c).await.unwrap();

        let list = storage.correlations_for_task(t.task_id).await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(
            list[0].outcome,
            Some(CorrelationOutcome::Failure("timeout downstream".into()))
        );
    }
}
