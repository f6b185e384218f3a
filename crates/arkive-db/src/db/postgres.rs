//! PostgreSQL-backed record store composed from the per-table repositories.

use anyhow::Result;
use arkive_core::models::{
    ItemKind, NewWorkItem, PermissionRule, RunInfo, RunStatus, Stage, StatusFilter, TaskMark,
    WorkItem, WorkItemMetadata,
};
use sqlx::PgPool;
use uuid::Uuid;

use super::metadata::MetadataRepository;
use super::permission::PermissionRuleRepository;
use super::run_info::RunInfoRepository;
use super::store::WorkItemStore;
use super::task_mark::TaskMarkRepository;
use super::work_item::WorkItemRepository;

#[derive(Clone)]
pub struct PgWorkItemStore {
    work_items: WorkItemRepository,
    task_marks: TaskMarkRepository,
    metadata: MetadataRepository,
    runs: RunInfoRepository,
    permissions: PermissionRuleRepository,
}

impl PgWorkItemStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            work_items: WorkItemRepository::new(pool.clone()),
            task_marks: TaskMarkRepository::new(pool.clone()),
            metadata: MetadataRepository::new(pool.clone()),
            runs: RunInfoRepository::new(pool.clone()),
            permissions: PermissionRuleRepository::new(pool),
        }
    }
}

#[async_trait::async_trait]
impl WorkItemStore for PgWorkItemStore {
    async fn create_work_item(&self, item: NewWorkItem) -> Result<WorkItem> {
        self.work_items.create(item).await
    }

    async fn get_work_item(&self, id: Uuid) -> Result<Option<WorkItem>> {
        self.work_items.get(id).await
    }

    async fn update_work_item(&self, item: &WorkItem) -> Result<()> {
        self.work_items.update(item).await
    }

    async fn find_latest_by_path(
        &self,
        original_file_path: &str,
        item_kind: ItemKind,
        source_file_name: Option<&str>,
        filter: StatusFilter,
    ) -> Result<Option<WorkItem>> {
        self.work_items
            .find_latest_by_path(original_file_path, item_kind, source_file_name, filter)
            .await
    }

    async fn list_run_items(&self, run_id: Uuid) -> Result<Vec<WorkItem>> {
        self.work_items.list_by_run(run_id).await
    }

    async fn is_task_completed(&self, work_item_id: Uuid, stage: Stage) -> Result<bool> {
        self.task_marks.is_completed(work_item_id, stage).await
    }

    async fn mark_task_completed(&self, work_item_id: Uuid, stage: Stage) -> Result<()> {
        self.task_marks.mark_completed(work_item_id, stage).await
    }

    async fn clear_task_marks(&self, work_item_id: Uuid) -> Result<u64> {
        self.task_marks.clear(work_item_id).await
    }

    async fn list_task_marks(&self, work_item_id: Uuid) -> Result<Vec<TaskMark>> {
        self.task_marks.list(work_item_id).await
    }

    async fn save_metadata(&self, metadata: &WorkItemMetadata) -> Result<()> {
        self.metadata.upsert(metadata).await
    }

    async fn get_metadata(&self, work_item_id: Uuid) -> Result<Option<WorkItemMetadata>> {
        self.metadata.get(work_item_id).await
    }

    async fn delete_metadata(&self, work_item_id: Uuid) -> Result<u64> {
        self.metadata.delete(work_item_id).await
    }

    async fn create_run(&self, run: &RunInfo) -> Result<()> {
        self.runs.create(run).await
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<RunInfo>> {
        self.runs.get(run_id).await
    }

    async fn record_run_progress(&self, run_id: Uuid, uploaded_bytes: i64) -> Result<()> {
        self.runs.record_progress(run_id, uploaded_bytes).await
    }

    async fn close_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error_message: Option<String>,
    ) -> Result<Option<RunInfo>> {
        self.runs.close(run_id, status, error_message).await
    }

    async fn list_open_runs(&self) -> Result<Vec<RunInfo>> {
        self.runs.list_open().await
    }

    async fn create_permission_rule(&self, rule: &PermissionRule) -> Result<()> {
        self.permissions.create(rule).await
    }

    async fn list_pending_permission_rules(&self) -> Result<Vec<PermissionRule>> {
        self.permissions.list_pending().await
    }

    async fn update_permission_rule(&self, rule: &PermissionRule) -> Result<()> {
        self.permissions.update(rule).await
    }
}
