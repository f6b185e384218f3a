//! Work item repository: CRUD and dedup lookups for the work_items table.

use anyhow::{Context, Result};
use arkive_core::constants::STATUS_COMPLETED;
use arkive_core::models::{ItemKind, NewWorkItem, StatusFilter, WorkItem};
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

const WORK_ITEM_COLUMNS: &str = r#"
    id,
    run_id,
    doc,
    item_kind,
    original_file_path,
    original_file_name,
    source_file_path,
    source_file_name,
    full_destination_path,
    filesize,
    checksum,
    status,
    error,
    retry_count,
    start_timestamp,
    end_timestamp,
    tar_start_timestamp,
    tar_end_timestamp,
    upload_start_timestamp,
    upload_end_timestamp,
    tar_index_start,
    tar_index_end,
    tar_contents_count,
    created_at,
    updated_at
"#;

#[derive(Clone)]
pub struct WorkItemRepository {
    pool: PgPool,
}

impl WorkItemRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[tracing::instrument(skip(self, item), fields(db.table = "work_items", path = %item.original_file_path))]
    pub async fn create(&self, item: NewWorkItem) -> Result<WorkItem> {
        let sql = format!(
            r#"
            INSERT INTO work_items (
                run_id, doc, item_kind, original_file_path, original_file_name,
                source_file_path, source_file_name, filesize, status, error,
                retry_count, start_timestamp, end_timestamp,
                tar_index_start, tar_index_end, tar_contents_count
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 0, NOW(),
                    CASE WHEN $9 = '' THEN NULL ELSE NOW() END, $11, $12, $13)
            RETURNING {}
            "#,
            WORK_ITEM_COLUMNS
        );

        let created = sqlx::query_as::<Postgres, WorkItem>(&sql)
            .bind(item.run_id)
            .bind(&item.doc)
            .bind(item.item_kind.to_string())
            .bind(&item.original_file_path)
            .bind(&item.original_file_name)
            .bind(&item.source_file_path)
            .bind(&item.source_file_name)
            .bind(item.filesize)
            .bind(&item.status)
            .bind(&item.error)
            .bind(item.tar_index_start)
            .bind(item.tar_index_end)
            .bind(item.tar_contents_count)
            .fetch_one(&self.pool)
            .await
            .context("Failed to insert work item")?;

        tracing::debug!(work_item.id = %created.id, "Work item inserted");
        Ok(created)
    }

    #[tracing::instrument(skip(self), fields(db.table = "work_items"))]
    pub async fn get(&self, id: Uuid) -> Result<Option<WorkItem>> {
        let sql = format!("SELECT {} FROM work_items WHERE id = $1", WORK_ITEM_COLUMNS);
        let item = sqlx::query_as::<Postgres, WorkItem>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch work item")?;
        Ok(item)
    }

    #[tracing::instrument(skip(self, item), fields(db.table = "work_items", work_item.id = %item.id))]
    pub async fn update(&self, item: &WorkItem) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE work_items
            SET run_id = $2,
                source_file_path = $3,
                source_file_name = $4,
                full_destination_path = $5,
                filesize = $6,
                checksum = $7,
                status = $8,
                error = $9,
                retry_count = $10,
                start_timestamp = $11,
                end_timestamp = $12,
                tar_start_timestamp = $13,
                tar_end_timestamp = $14,
                upload_start_timestamp = $15,
                upload_end_timestamp = $16,
                tar_index_start = $17,
                tar_index_end = $18,
                tar_contents_count = $19,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(item.id)
        .bind(item.run_id)
        .bind(&item.source_file_path)
        .bind(&item.source_file_name)
        .bind(&item.full_destination_path)
        .bind(item.filesize)
        .bind(&item.checksum)
        .bind(&item.status)
        .bind(&item.error)
        .bind(item.retry_count)
        .bind(item.start_timestamp)
        .bind(item.end_timestamp)
        .bind(item.tar_start_timestamp)
        .bind(item.tar_end_timestamp)
        .bind(item.upload_start_timestamp)
        .bind(item.upload_end_timestamp)
        .bind(item.tar_index_start)
        .bind(item.tar_index_end)
        .bind(item.tar_contents_count)
        .execute(&self.pool)
        .await
        .context("Failed to update work item")?;

        Ok(())
    }

    /// Find the newest record for a path, ordered by start time.
    #[tracing::instrument(skip(self), fields(db.table = "work_items"))]
    pub async fn find_latest_by_path(
        &self,
        original_file_path: &str,
        item_kind: ItemKind,
        source_file_name: Option<&str>,
        filter: StatusFilter,
    ) -> Result<Option<WorkItem>> {
        let status_clause = match filter {
            StatusFilter::Completed => "status = $3",
            StatusFilter::NotCompleted => "status <> $3",
        };
        let sql = format!(
            r#"
            SELECT {}
            FROM work_items
            WHERE original_file_path = $1
                AND ($2::TEXT IS NULL OR source_file_name = $2)
                AND {}
                AND item_kind = $4
            ORDER BY start_timestamp DESC NULLS LAST, created_at DESC
            LIMIT 1
            "#,
            WORK_ITEM_COLUMNS, status_clause
        );

        let item = sqlx::query_as::<Postgres, WorkItem>(&sql)
            .bind(original_file_path)
            .bind(source_file_name)
            .bind(STATUS_COMPLETED)
            .bind(item_kind.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to look up work item by path")?;

        Ok(item)
    }

    #[tracing::instrument(skip(self), fields(db.table = "work_items"))]
    pub async fn list_by_run(&self, run_id: Uuid) -> Result<Vec<WorkItem>> {
        let sql = format!(
            "SELECT {} FROM work_items WHERE run_id = $1 ORDER BY created_at ASC",
            WORK_ITEM_COLUMNS
        );
        let items = sqlx::query_as::<Postgres, WorkItem>(&sql)
            .bind(run_id)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list work items for run")?;
        Ok(items)
    }
}
