use crate::core::backend_error::BackendError;
use crate::core::pipeline::{HistoryEntry, OutcomeLog, OutcomeStatus, RecordOutcome};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;

fn db_error(err: sqlx::Error) -> BackendError {
    BackendError::Api(format!("history store: {}", err))
}

/// Per-record outcomes of every run, kept in a local SQLite file.
pub struct SqliteOutcomeLog {
    pool: Pool<Sqlite>,
}

impl SqliteOutcomeLog {
    pub async fn new(database_path: &str) -> anyhow::Result<Self> {
        let path_str = database_path.trim_start_matches("sqlite://");
        if !database_path.contains(":memory:") {
            if let Some(parent) = Path::new(path_str).parent() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn_str = if database_path.starts_with("sqlite:") {
            database_path.to_string()
        } else {
            format!("sqlite://{}?mode=rwc", database_path)
        };

        let pool = SqlitePoolOptions::new().connect(&conn_str).await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS record_outcomes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL,
                source_position INTEGER NOT NULL,
                recipient TEXT NOT NULL,
                status TEXT NOT NULL,
                artifact_url TEXT,
                error TEXT,
                recorded_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_record_outcomes_run ON record_outcomes (run_id)",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl OutcomeLog for SqliteOutcomeLog {
    async fn record(&self, run_id: &str, outcome: &RecordOutcome) -> Result<(), BackendError> {
        sqlx::query(
            r#"
            INSERT INTO record_outcomes
                (run_id, source_position, recipient, status, artifact_url, error, recorded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run_id)
        .bind(outcome.source_position as i64)
        .bind(&outcome.recipient)
        .bind(outcome.status.as_str())
        .bind(&outcome.artifact_url)
        .bind(&outcome.error)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<HistoryEntry>, BackendError> {
        let rows = sqlx::query(
            r#"
            SELECT run_id, source_position, recipient, status, artifact_url, error, recorded_at
            FROM record_outcomes
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let recorded_at: String = row.get("recorded_at");
            let recorded_at = DateTime::parse_from_rfc3339(&recorded_at)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| BackendError::Api(format!("bad timestamp '{}': {}", recorded_at, e)))?;
            let status: String = row.get("status");

            entries.push(HistoryEntry {
                run_id: row.get("run_id"),
                outcome: RecordOutcome {
                    source_position: row.get::<i64, _>("source_position") as usize,
                    recipient: row.get("recipient"),
                    status: OutcomeStatus::parse(&status),
                    artifact_url: row.get("artifact_url"),
                    error: row.get("error"),
                },
                recorded_at,
            });
        }
        Ok(entries)
    }
}
