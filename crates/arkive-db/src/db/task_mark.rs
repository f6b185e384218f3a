//! Task mark repository: the per-stage completion ledger.

use anyhow::{Context, Result};
use arkive_core::models::{Stage, TaskMark};
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

#[derive(Clone)]
pub struct TaskMarkRepository {
    pool: PgPool,
}

impl TaskMarkRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[tracing::instrument(skip(self), fields(db.table = "task_marks"))]
    pub async fn is_completed(&self, work_item_id: Uuid, stage: Stage) -> Result<bool> {
        let completed: Option<bool> = sqlx::query_scalar(
            "SELECT completed FROM task_marks WHERE work_item_id = $1 AND task_name = $2",
        )
        .bind(work_item_id)
        .bind(stage.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to read task mark")?;

        Ok(completed.unwrap_or(false))
    }

    #[tracing::instrument(skip(self), fields(db.table = "task_marks"))]
    pub async fn mark_completed(&self, work_item_id: Uuid, stage: Stage) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO task_marks (work_item_id, task_name, completed, updated_at)
            VALUES ($1, $2, TRUE, NOW())
            ON CONFLICT (work_item_id, task_name)
            DO UPDATE SET completed = TRUE, updated_at = NOW()
            "#,
        )
        .bind(work_item_id)
        .bind(stage.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to upsert task mark")?;

        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "task_marks"))]
    pub async fn clear(&self, work_item_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM task_marks WHERE work_item_id = $1")
            .bind(work_item_id)
            .execute(&self.pool)
            .await
            .context("Failed to clear task marks")?;

        Ok(result.rows_affected())
    }

    #[tracing::instrument(skip(self), fields(db.table = "task_marks"))]
    pub async fn list(&self, work_item_id: Uuid) -> Result<Vec<TaskMark>> {
        let marks = sqlx::query_as::<Postgres, TaskMark>(
            r#"
            SELECT work_item_id, task_name, completed, updated_at
            FROM task_marks
            WHERE work_item_id = $1
            ORDER BY updated_at ASC
            "#,
        )
        .bind(work_item_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list task marks")?;

        Ok(marks)
    }
}
