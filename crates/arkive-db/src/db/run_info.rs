//! Run bookkeeping: one row per scheduler invocation.

use anyhow::{Context, Result};
use arkive_core::models::{RunInfo, RunStatus};
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

const RUN_COLUMNS: &str = r#"
    run_id, status, start_timestamp, end_timestamp, heartbeat,
    duration_seconds, uploaded_size, error_message
"#;

#[derive(Clone)]
pub struct RunInfoRepository {
    pool: PgPool,
}

impl RunInfoRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[tracing::instrument(skip(self, run), fields(db.table = "run_info", run_id = %run.run_id))]
    pub async fn create(&self, run: &RunInfo) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO run_info (run_id, status, start_timestamp, heartbeat, uploaded_size)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (run_id) DO NOTHING
            "#,
        )
        .bind(run.run_id)
        .bind(run.status.to_string())
        .bind(run.start_timestamp)
        .bind(run.heartbeat)
        .bind(run.uploaded_size)
        .execute(&self.pool)
        .await
        .context("Failed to create run")?;

        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "run_info"))]
    pub async fn get(&self, run_id: Uuid) -> Result<Option<RunInfo>> {
        let sql = format!("SELECT {} FROM run_info WHERE run_id = $1", RUN_COLUMNS);
        let run = sqlx::query_as::<Postgres, RunInfo>(&sql)
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch run")?;
        Ok(run)
    }

    #[tracing::instrument(skip(self), fields(db.table = "run_info"))]
    pub async fn record_progress(&self, run_id: Uuid, uploaded_bytes: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE run_info
            SET heartbeat = NOW(),
                uploaded_size = uploaded_size + $2
            WHERE run_id = $1
            "#,
        )
        .bind(run_id)
        .bind(uploaded_bytes)
        .execute(&self.pool)
        .await
        .context("Failed to record run progress")?;

        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "run_info"))]
    pub async fn close(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error_message: Option<String>,
    ) -> Result<Option<RunInfo>> {
        let sql = format!(
            r#"
            UPDATE run_info
            SET status = $2,
                end_timestamp = NOW(),
                heartbeat = NOW(),
                duration_seconds = EXTRACT(EPOCH FROM (NOW() - start_timestamp))::BIGINT,
                error_message = $3
            WHERE run_id = $1
            RETURNING {}
            "#,
            RUN_COLUMNS
        );

        let run = sqlx::query_as::<Postgres, RunInfo>(&sql)
            .bind(run_id)
            .bind(status.to_string())
            .bind(error_message)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to close run")?;

        Ok(run)
    }

    #[tracing::instrument(skip(self), fields(db.table = "run_info"))]
    pub async fn list_open(&self) -> Result<Vec<RunInfo>> {
        let sql = format!(
            "SELECT {} FROM run_info WHERE status = $1 ORDER BY start_timestamp ASC",
            RUN_COLUMNS
        );
        let runs = sqlx::query_as::<Postgres, RunInfo>(&sql)
            .bind(RunStatus::Running.to_string())
            .fetch_all(&self.pool)
            .await
            .context("Failed to list open runs")?;
        Ok(runs)
    }
}
