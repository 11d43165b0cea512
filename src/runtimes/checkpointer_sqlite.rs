//! SQLite-backed durable checkpointer.
//!
//! Stores one row per (thread, step) plus a `threads` table tracking the
//! latest step, so `load_latest` is a single indexed lookup. The schema is
//! created on connect; the database lives wherever
//! [`RuntimeConfig::resolve_db_path`](super::RuntimeConfig::resolve_db_path)
//! points (by default `~/.steward/<workflow>.db`, overridable through the
//! `STEWARD_WORKFLOW_DB` environment variable).
//!
//! Single-process use is the supported case. Concurrent writers from other
//! processes are not coordinated beyond SQLite's own locking.

use std::path::Path;

use async_trait::async_trait;
use miette::Diagnostic;
use sqlx::{sqlite::SqliteConnectOptions, Row, SqlitePool};
use thiserror::Error;
use tracing::instrument;

use super::checkpointer::{Checkpoint, Checkpointer, CheckpointerError, Result};
use super::persistence::PersistedCheckpoint;

#[derive(Debug, Error, Diagnostic)]
pub enum SqliteCheckpointerError {
    #[error("sqlx error: {0}")]
    #[diagnostic(
        code(steward::sqlite::sqlx),
        help("Ensure the SQLite database path is valid and writable.")
    )]
    Sqlx(#[from] sqlx::Error),

    #[error("JSON serialization error: {0}")]
    #[diagnostic(code(steward::sqlite::serde))]
    Serde(#[from] serde_json::Error),
}

impl From<SqliteCheckpointerError> for CheckpointerError {
    fn from(e: SqliteCheckpointerError) -> Self {
        CheckpointerError::Backend {
            message: e.to_string(),
        }
    }
}

/// Durable checkpoint store over a local SQLite file.
pub struct SqliteCheckpointer {
    pool: SqlitePool,
}

impl SqliteCheckpointer {
    /// Opens (creating if necessary) the database at `path` and ensures the
    /// schema exists.
    #[instrument(skip(path), err)]
    pub async fn connect(path: &Path) -> std::result::Result<Self, SqliteCheckpointerError> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS threads (
                thread_id   TEXT PRIMARY KEY,
                latest_step INTEGER NOT NULL
            );
            "#,
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                thread_id       TEXT    NOT NULL,
                step            INTEGER NOT NULL,
                checkpoint_json TEXT    NOT NULL,
                created_at      TEXT    NOT NULL,
                PRIMARY KEY (thread_id, step)
            );
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    async fn save_inner(
        &self,
        checkpoint: Checkpoint,
    ) -> std::result::Result<(), SqliteCheckpointerError> {
        let persisted = PersistedCheckpoint::from(&checkpoint);
        let json = serde_json::to_string(&persisted)?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO checkpoints (thread_id, step, checkpoint_json, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (thread_id, step)
            DO UPDATE SET checkpoint_json = excluded.checkpoint_json,
                          created_at = excluded.created_at
            "#,
        )
        .bind(&checkpoint.thread_id)
        .bind(checkpoint.step as i64)
        .bind(&json)
        .bind(checkpoint.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO threads (thread_id, latest_step)
            VALUES (?1, ?2)
            ON CONFLICT (thread_id)
            DO UPDATE SET latest_step = MAX(latest_step, excluded.latest_step)
            "#,
        )
        .bind(&checkpoint.thread_id)
        .bind(checkpoint.step as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn load_latest_inner(
        &self,
        thread_id: &str,
    ) -> std::result::Result<Option<Checkpoint>, SqliteCheckpointerError> {
        let row = sqlx::query(
            r#"
            SELECT c.checkpoint_json
            FROM threads t
            JOIN checkpoints c ON c.thread_id = t.thread_id AND c.step = t.latest_step
            WHERE t.thread_id = ?1
            "#,
        )
        .bind(thread_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            None => Ok(None),
            Some(row) => {
                let json: String = row.get(0);
                let persisted: PersistedCheckpoint = serde_json::from_str(&json)?;
                Ok(Some(persisted.into()))
            }
        }
    }

    /// Full step history for a thread, oldest first. Used by audit tooling.
    pub async fn step_history(
        &self,
        thread_id: &str,
    ) -> std::result::Result<Vec<Checkpoint>, SqliteCheckpointerError> {
        let rows = sqlx::query(
            "SELECT checkpoint_json FROM checkpoints WHERE thread_id = ?1 ORDER BY step ASC",
        )
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let json: String = row.get(0);
            let persisted: PersistedCheckpoint = serde_json::from_str(&json)?;
            out.push(persisted.into());
        }
        Ok(out)
    }
}

#[async_trait]
impl Checkpointer for SqliteCheckpointer {
    async fn save(&self, checkpoint: Checkpoint) -> Result<()> {
        self.save_inner(checkpoint).await.map_err(Into::into)
    }

    async fn load_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        self.load_latest_inner(thread_id).await.map_err(Into::into)
    }

    async fn list_threads(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT thread_id FROM threads ORDER BY thread_id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CheckpointerError::Backend {
                message: e.to_string(),
            })?;
        Ok(rows.iter().map(|r| r.get::<String, _>(0)).collect())
    }
}
