//! Record store abstraction used by the scanner, the preparer and the pipeline executor.

use anyhow::Result;
use arkive_core::models::{
    ItemKind, NewWorkItem, PermissionRule, RunInfo, RunStatus, Stage, StatusFilter, TaskMark,
    WorkItem, WorkItemMetadata,
};
use uuid::Uuid;

/// Durable records of the archival pipeline.
///
/// Every cross-stage fact lives here so that a crashed worker can resume an item by
/// re-reading its `WorkItem` and `TaskMark`s.
#[async_trait::async_trait]
pub trait WorkItemStore: Send + Sync {
    async fn create_work_item(&self, item: NewWorkItem) -> Result<WorkItem>;

    async fn get_work_item(&self, id: Uuid) -> Result<Option<WorkItem>>;

    /// Persist every mutable field of `item`.
    async fn update_work_item(&self, item: &WorkItem) -> Result<()>;

    /// Most recent record (by start time) of one kind for an original path, optionally
    /// narrowed to a source file name (tar member, tar part or manifest), filtered by
    /// completion status.
    async fn find_latest_by_path(
        &self,
        original_file_path: &str,
        item_kind: ItemKind,
        source_file_name: Option<&str>,
        filter: StatusFilter,
    ) -> Result<Option<WorkItem>>;

    async fn list_run_items(&self, run_id: Uuid) -> Result<Vec<WorkItem>>;

    async fn is_task_completed(&self, work_item_id: Uuid, stage: Stage) -> Result<bool>;

    async fn mark_task_completed(&self, work_item_id: Uuid, stage: Stage) -> Result<()>;

    async fn clear_task_marks(&self, work_item_id: Uuid) -> Result<u64>;

    async fn list_task_marks(&self, work_item_id: Uuid) -> Result<Vec<TaskMark>>;

    async fn save_metadata(&self, metadata: &WorkItemMetadata) -> Result<()>;

    async fn get_metadata(&self, work_item_id: Uuid) -> Result<Option<WorkItemMetadata>>;

    async fn delete_metadata(&self, work_item_id: Uuid) -> Result<u64>;

    async fn create_run(&self, run: &RunInfo) -> Result<()>;

    async fn get_run(&self, run_id: Uuid) -> Result<Option<RunInfo>>;

    /// Advance the run heartbeat and add `uploaded_bytes` to its uploaded size.
    async fn record_run_progress(&self, run_id: Uuid, uploaded_bytes: i64) -> Result<()>;

    async fn close_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error_message: Option<String>,
    ) -> Result<Option<RunInfo>>;

    async fn list_open_runs(&self) -> Result<Vec<RunInfo>>;

    async fn create_permission_rule(&self, rule: &PermissionRule) -> Result<()>;

    /// Rules whose `created` flag is still `N`.
    async fn list_pending_permission_rules(&self) -> Result<Vec<PermissionRule>>;

    async fn update_permission_rule(&self, rule: &PermissionRule) -> Result<()>;
}
