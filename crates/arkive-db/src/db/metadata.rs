//! Per-item metadata computed by the path/metadata processors.

use anyhow::{Context, Result};
use arkive_core::models::WorkItemMetadata;
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

#[derive(Clone)]
pub struct MetadataRepository {
    pool: PgPool,
}

impl MetadataRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[tracing::instrument(skip(self, metadata), fields(db.table = "work_item_metadata", work_item.id = %metadata.work_item_id))]
    pub async fn upsert(&self, metadata: &WorkItemMetadata) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO work_item_metadata (
                work_item_id, destination_path, object_metadata,
                collection_path, collection_metadata, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (work_item_id) DO UPDATE
            SET destination_path = EXCLUDED.destination_path,
                object_metadata = EXCLUDED.object_metadata,
                collection_path = EXCLUDED.collection_path,
                collection_metadata = EXCLUDED.collection_metadata
            "#,
        )
        .bind(metadata.work_item_id)
        .bind(&metadata.destination_path)
        .bind(&metadata.object_metadata)
        .bind(&metadata.collection_path)
        .bind(&metadata.collection_metadata)
        .bind(metadata.created_at)
        .execute(&self.pool)
        .await
        .context("Failed to save work item metadata")?;

        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "work_item_metadata"))]
    pub async fn get(&self, work_item_id: Uuid) -> Result<Option<WorkItemMetadata>> {
        let metadata = sqlx::query_as::<Postgres, WorkItemMetadata>(
            r#"
            SELECT work_item_id, destination_path, object_metadata,
                   collection_path, collection_metadata, created_at
            FROM work_item_metadata
            WHERE work_item_id = $1
            "#,
        )
        .bind(work_item_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch work item metadata")?;

        Ok(metadata)
    }

    #[tracing::instrument(skip(self), fields(db.table = "work_item_metadata"))]
    pub async fn delete(&self, work_item_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM work_item_metadata WHERE work_item_id = $1")
            .bind(work_item_id)
            .execute(&self.pool)
            .await
            .context("Failed to delete work item metadata")?;

        Ok(result.rows_affected())
    }
}
