//! Relational persistence for tasks, thoughts, correlations, graph
//! memory, consent, credits, and the signed audit log.
//!
//! Both a single-file SQLite database and a networked PostgreSQL
//! database are supported through one `sqlx` Any pool. Every statement
//! is rendered through [`dialect::SqlDialect`] so no vendor-specific SQL
//! leaks into business logic. Values cross the driver boundary as text
//! and integers only (timestamps RFC 3339, ids/uuids as text, booleans
//! as 0/1).

pub mod audit;
pub mod consent;
pub mod dialect;
pub mod graph;
pub mod schema;
pub mod store;

use sqlx::AnyPool;

use ciris_domain::{Error, Result};

pub use audit::AuditLog;
pub use dialect::SqlDialect;

/// Shared database handle: pool + dialect.
pub struct Storage {
    pool: AnyPool,
    dialect: SqlDialect,
}

impl Storage {
    /// Connect and run the idempotent schema migration.
    pub async fn connect(url: &str) -> Result<Self> {
        // Register the Any drivers exactly once per process.
        static DRIVERS: std::sync::Once = std::sync::Once::new();
        DRIVERS.call_once(sqlx::any::install_default_drivers);
        let dialect = SqlDialect::from_url(url)?;
        let pool = sqlx::any::AnyPoolOptions::new()
            .max_connections(8)
            .connect(url)
            .await
            .map_err(Error::sql)?;
        let storage = Self { pool, dialect };
        storage.migrate().await?;
        Ok(storage)
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    pub(crate) fn pool(&self) -> &AnyPool {
        &self.pool
    }

    async fn migrate(&self) -> Result<()> {
        for stmt in schema::ddl() {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(Error::sql)?;
        }
        tracing::debug!(dialect = ?self.dialect, "schema migration complete");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    /// A file-backed SQLite store in a temp dir. In-memory SQLite is not
    /// usable behind a pool (each connection would get its own database).
    pub async fn sqlite_storage() -> (tempfile::TempDir, Storage) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());
        let storage = Storage::connect(&url).await.unwrap();
        (dir, storage)
    }
}
