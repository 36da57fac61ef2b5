//! SQL dialect abstraction.
//!
//! The two supported backends differ in placeholder syntax; upserts use
//! the `ON CONFLICT ... DO UPDATE` form both engines share. Every
//! statement the stores execute is rendered here or in [`crate::schema`]
//! — business logic never composes raw SQL.

use ciris_domain::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    Sqlite,
    Postgres,
}

impl SqlDialect {
    pub fn from_url(url: &str) -> Result<Self> {
        if url.starts_with("sqlite:") {
            Ok(Self::Sqlite)
        } else if url.starts_with("postgres:") || url.starts_with("postgresql:") {
            Ok(Self::Postgres)
        } else {
            Err(Error::Config(format!("unsupported storage url: {url}")))
        }
    }

    /// The `n`-th bind placeholder (1-based).
    pub fn ph(self, n: usize) -> String {
        match self {
            Self::Sqlite => "?".to_owned(),
            Self::Postgres => format!("${n}"),
        }
    }

    /// `?, ?, ?` / `$1, $2, $3` for `count` parameters starting at 1.
    pub fn placeholders(self, count: usize) -> String {
        (1..=count)
            .map(|n| self.ph(n))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Plain insert with one placeholder per column.
    pub fn insert(self, table: &str, columns: &[&str]) -> String {
        format!(
            "INSERT INTO {table} ({}) VALUES ({})",
            columns.join(", "),
            self.placeholders(columns.len())
        )
    }

    /// Upsert: insert, or on conflict over `conflict_columns` update
    /// `update_columns` from the excluded row.
    pub fn upsert(
        self,
        table: &str,
        columns: &[&str],
        conflict_columns: &[&str],
        update_columns: &[&str],
    ) -> String {
        let updates = update_columns
            .iter()
            .map(|c| format!("{c} = excluded.{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "{} ON CONFLICT ({}) DO UPDATE SET {}",
            self.insert(table, columns),
            conflict_columns.join(", "),
            updates
        )
    }

    /// `WHERE c1 = $1 AND c2 = $2 ...` with placeholders starting at
    /// `first` (1-based).
    pub fn where_eq(self, columns: &[&str], first: usize) -> String {
        columns
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{c} = {}", self.ph(first + i)))
            .collect::<Vec<_>>()
            .join(" AND ")
    }
}
