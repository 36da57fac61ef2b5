//! DDL shared by both backends.
//!
//! Types are chosen from the intersection both engines accept: TEXT,
//! BIGINT, DOUBLE PRECISION. Timestamps are RFC 3339 text, booleans are
//! 0/1 BIGINT, structured payloads are JSON text.

/// Idempotent schema statements, executed in order at startup.
pub fn ddl() -> &'static [&'static str] {
    &[
        "CREATE TABLE IF NOT EXISTS tasks (
            task_id TEXT PRIMARY KEY,
            adapter_id TEXT NOT NULL,
            channel_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            occurrence_id TEXT NOT NULL,
            initial_input TEXT NOT NULL,
            status TEXT NOT NULL,
            round_count BIGINT NOT NULL,
            last_action TEXT,
            outcome_reason TEXT,
            bootstrap BIGINT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_tasks_occurrence_status
            ON tasks (occurrence_id, status)",
        "CREATE TABLE IF NOT EXISTS thoughts (
            thought_id TEXT PRIMARY KEY,
            task_id TEXT NOT NULL,
            generation TEXT NOT NULL,
            round BIGINT NOT NULL,
            content TEXT NOT NULL,
            state TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_thoughts_task
            ON thoughts (task_id, state)",
        "CREATE TABLE IF NOT EXISTS correlations (
            correlation_id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            target TEXT NOT NULL,
            task_id TEXT NOT NULL,
            thought_id TEXT NOT NULL,
            span_id TEXT NOT NULL,
            parent_span_id TEXT,
            started_at TEXT NOT NULL,
            finished_at TEXT,
            outcome TEXT,
            outcome_detail TEXT,
            tokens_in BIGINT NOT NULL,
            tokens_out BIGINT NOT NULL,
            cost_usd DOUBLE PRECISION NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_correlations_task
            ON correlations (task_id)",
        "CREATE TABLE IF NOT EXISTS graph_nodes (
            scope TEXT NOT NULL,
            kind TEXT NOT NULL,
            node_id TEXT NOT NULL,
            version BIGINT NOT NULL,
            attributes TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (scope, kind, node_id)
        )",
        "CREATE TABLE IF NOT EXISTS graph_edges (
            from_scope TEXT NOT NULL,
            from_kind TEXT NOT NULL,
            from_id TEXT NOT NULL,
            to_scope TEXT NOT NULL,
            to_kind TEXT NOT NULL,
            to_id TEXT NOT NULL,
            relationship TEXT NOT NULL,
            weight DOUBLE PRECISION,
            PRIMARY KEY (from_scope, from_kind, from_id,
                         to_scope, to_kind, to_id, relationship)
        )",
        "CREATE TABLE IF NOT EXISTS consent_records (
            subject_id TEXT PRIMARY KEY,
            stream TEXT NOT NULL,
            categories TEXT NOT NULL,
            granted_at TEXT NOT NULL,
            expires_at TEXT,
            revoked_at TEXT
        )",
        "CREATE TABLE IF NOT EXISTS credit_accounts (
            subject_id TEXT PRIMARY KEY,
            balance BIGINT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS audit_entries (
            occurrence_id TEXT NOT NULL,
            seq BIGINT NOT NULL,
            kind TEXT NOT NULL,
            payload TEXT NOT NULL,
            prev_hash TEXT NOT NULL,
            entry_hash TEXT NOT NULL,
            signature TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (occurrence_id, seq)
        )",
    ]
}
