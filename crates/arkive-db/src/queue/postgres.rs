use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{QueueMessage, WorkQueue};

/// Queue backed by the `work_queue` table; claims use `FOR UPDATE SKIP LOCKED`.
#[derive(Clone)]
pub struct PgWorkQueue {
    pool: PgPool,
    name: String,
}

impl PgWorkQueue {
    pub fn new(pool: PgPool, name: impl Into<String>) -> Self {
        Self {
            pool,
            name: name.into(),
        }
    }
}

#[async_trait::async_trait]
impl WorkQueue for PgWorkQueue {
    fn name(&self) -> &str {
        &self.name
    }

    #[tracing::instrument(skip(self), fields(db.table = "work_queue", queue = %self.name))]
    async fn send(&self, work_item_id: Uuid) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO work_queue (queue_name, work_item_id)
            VALUES ($1, $2)
            ON CONFLICT (queue_name, work_item_id) DO NOTHING
            "#,
        )
        .bind(&self.name)
        .bind(work_item_id)
        .execute(&self.pool)
        .await
        .context("Failed to enqueue work item")?;

        if result.rows_affected() == 0 {
            tracing::debug!(work_item.id = %work_item_id, "Work item already queued");
        }
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "work_queue", queue = %self.name))]
    async fn receive(&self, visibility_timeout: Duration) -> Result<Option<QueueMessage>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;

        let row = sqlx::query(
            r#"
            UPDATE work_queue
            SET claimed_at = NOW(),
                visible_at = NOW() + make_interval(secs => $2),
                attempts = attempts + 1
            WHERE id = (
                SELECT id
                FROM work_queue
                WHERE queue_name = $1
                    AND visible_at <= NOW()
                ORDER BY visible_at ASC, id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, work_item_id, attempts, enqueued_at
            "#,
        )
        .bind(&self.name)
        .bind(visibility_timeout.as_secs_f64())
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to claim queue message")?;

        tx.commit().await.context("Failed to commit transaction")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let message = QueueMessage {
            id: row.try_get("id")?,
            work_item_id: row.try_get("work_item_id")?,
            attempts: row.try_get("attempts")?,
            enqueued_at: row.try_get::<DateTime<Utc>, _>("enqueued_at")?,
        };
        tracing::debug!(
            message.id = message.id,
            work_item.id = %message.work_item_id,
            attempts = message.attempts,
            "Claimed queue message"
        );
        Ok(Some(message))
    }

    #[tracing::instrument(skip(self, message), fields(db.table = "work_queue", message.id = message.id))]
    async fn ack(&self, message: &QueueMessage) -> Result<()> {
        sqlx::query("DELETE FROM work_queue WHERE id = $1")
            .bind(message.id)
            .execute(&self.pool)
            .await
            .context("Failed to acknowledge queue message")?;
        Ok(())
    }

    #[tracing::instrument(skip(self, message), fields(db.table = "work_queue", message.id = message.id))]
    async fn nack(&self, message: &QueueMessage, delay: Duration) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE work_queue
            SET claimed_at = NULL,
                visible_at = NOW() + make_interval(secs => $2)
            WHERE id = $1
            "#,
        )
        .bind(message.id)
        .bind(delay.as_secs_f64())
        .execute(&self.pool)
        .await
        .context("Failed to return queue message")?;
        Ok(())
    }

    async fn depth(&self) -> Result<i64> {
        let depth: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM work_queue WHERE queue_name = $1")
                .bind(&self.name)
                .fetch_one(&self.pool)
                .await
                .context("Failed to count queue messages")?;
        Ok(depth)
    }

    #[tracing::instrument(skip(self), fields(db.table = "work_queue", queue = %self.name))]
    async fn release_expired(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE work_queue
            SET claimed_at = NULL
            WHERE queue_name = $1
                AND claimed_at IS NOT NULL
                AND visible_at <= NOW()
            "#,
        )
        .bind(&self.name)
        .execute(&self.pool)
        .await
        .context("Failed to release expired claims")?;
        Ok(result.rows_affected())
    }
}
