//! In-memory record store for tests and `--store memory` dry runs.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use arkive_core::constants::STATUS_PENDING;
use arkive_core::models::{
    ItemKind, NewWorkItem, PermissionRule, RunInfo, RunStatus, Stage, StatusFilter, TaskMark,
    WorkItem, WorkItemMetadata,
};
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::store::WorkItemStore;

#[derive(Default)]
struct State {
    items: HashMap<Uuid, WorkItem>,
    marks: HashMap<(Uuid, Stage), TaskMark>,
    metadata: HashMap<Uuid, WorkItemMetadata>,
    runs: HashMap<Uuid, RunInfo>,
    rules: Vec<PermissionRule>,
}

#[derive(Clone, Default)]
pub struct MemoryWorkItemStore {
    state: Arc<Mutex<State>>,
}

impl MemoryWorkItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored item, oldest first.
    pub async fn all_items(&self) -> Vec<WorkItem> {
        let state = self.state.lock().await;
        let mut items: Vec<WorkItem> = state.items.values().cloned().collect();
        items.sort_by_key(|i| i.created_at);
        items
    }

    pub async fn all_permission_rules(&self) -> Vec<PermissionRule> {
        self.state.lock().await.rules.clone()
    }
}

#[async_trait::async_trait]
impl WorkItemStore for MemoryWorkItemStore {
    async fn create_work_item(&self, item: NewWorkItem) -> Result<WorkItem> {
        let now = Utc::now();
        let created = WorkItem {
            id: Uuid::new_v4(),
            run_id: item.run_id,
            doc: item.doc,
            item_kind: item.item_kind,
            original_file_path: item.original_file_path,
            original_file_name: item.original_file_name,
            source_file_path: item.source_file_path,
            source_file_name: item.source_file_name,
            full_destination_path: None,
            filesize: item.filesize,
            checksum: None,
            end_timestamp: if item.status == STATUS_PENDING {
                None
            } else {
                Some(now)
            },
            status: item.status,
            error: item.error,
            retry_count: 0,
            start_timestamp: Some(now),
            tar_start_timestamp: None,
            tar_end_timestamp: None,
            upload_start_timestamp: None,
            upload_end_timestamp: None,
            tar_index_start: item.tar_index_start,
            tar_index_end: item.tar_index_end,
            tar_contents_count: item.tar_contents_count,
            created_at: now,
            updated_at: now,
        };
        self.state
            .lock()
            .await
            .items
            .insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_work_item(&self, id: Uuid) -> Result<Option<WorkItem>> {
        Ok(self.state.lock().await.items.get(&id).cloned())
    }

    async fn update_work_item(&self, item: &WorkItem) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.items.get_mut(&item.id) {
            *existing = item.clone();
            existing.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn find_latest_by_path(
        &self,
        original_file_path: &str,
        item_kind: ItemKind,
        source_file_name: Option<&str>,
        filter: StatusFilter,
    ) -> Result<Option<WorkItem>> {
        let state = self.state.lock().await;
        let found = state
            .items
            .values()
            .filter(|i| i.original_file_path == original_file_path && i.item_kind == item_kind)
            .filter(|i| source_file_name.map_or(true, |name| i.source_file_name == name))
            .filter(|i| filter.matches(&i.status))
            .max_by_key(|i| (i.start_timestamp, i.created_at))
            .cloned();
        Ok(found)
    }

    async fn list_run_items(&self, run_id: Uuid) -> Result<Vec<WorkItem>> {
        let state = self.state.lock().await;
        let mut items: Vec<WorkItem> = state
            .items
            .values()
            .filter(|i| i.run_id == run_id)
            .cloned()
            .collect();
        items.sort_by_key(|i| i.created_at);
        Ok(items)
    }

    async fn is_task_completed(&self, work_item_id: Uuid, stage: Stage) -> Result<bool> {
        let state = self.state.lock().await;
        Ok(state
            .marks
            .get(&(work_item_id, stage))
            .map(|m| m.completed)
            .unwrap_or(false))
    }

    async fn mark_task_completed(&self, work_item_id: Uuid, stage: Stage) -> Result<()> {
        self.state.lock().await.marks.insert(
            (work_item_id, stage),
            TaskMark {
                work_item_id,
                task_name: stage,
                completed: true,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn clear_task_marks(&self, work_item_id: Uuid) -> Result<u64> {
        let mut state = self.state.lock().await;
        let before = state.marks.len();
        state.marks.retain(|(id, _), _| *id != work_item_id);
        Ok((before - state.marks.len()) as u64)
    }

    async fn list_task_marks(&self, work_item_id: Uuid) -> Result<Vec<TaskMark>> {
        let state = self.state.lock().await;
        let mut marks: Vec<TaskMark> = state
            .marks
            .values()
            .filter(|m| m.work_item_id == work_item_id)
            .cloned()
            .collect();
        marks.sort_by_key(|m| m.updated_at);
        Ok(marks)
    }

    async fn save_metadata(&self, metadata: &WorkItemMetadata) -> Result<()> {
        self.state
            .lock()
            .await
            .metadata
            .insert(metadata.work_item_id, metadata.clone());
        Ok(())
    }

    async fn get_metadata(&self, work_item_id: Uuid) -> Result<Option<WorkItemMetadata>> {
        Ok(self.state.lock().await.metadata.get(&work_item_id).cloned())
    }

    async fn delete_metadata(&self, work_item_id: Uuid) -> Result<u64> {
        let removed = self.state.lock().await.metadata.remove(&work_item_id);
        Ok(u64::from(removed.is_some()))
    }

    async fn create_run(&self, run: &RunInfo) -> Result<()> {
        self.state
            .lock()
            .await
            .runs
            .entry(run.run_id)
            .or_insert_with(|| run.clone());
        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<RunInfo>> {
        Ok(self.state.lock().await.runs.get(&run_id).cloned())
    }

    async fn record_run_progress(&self, run_id: Uuid, uploaded_bytes: i64) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(run) = state.runs.get_mut(&run_id) {
            run.heartbeat = Utc::now();
            run.uploaded_size += uploaded_bytes;
        }
        Ok(())
    }

    async fn close_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error_message: Option<String>,
    ) -> Result<Option<RunInfo>> {
        let mut state = self.state.lock().await;
        Ok(state.runs.get_mut(&run_id).map(|run| {
            run.close(status, error_message);
            run.clone()
        }))
    }

    async fn list_open_runs(&self) -> Result<Vec<RunInfo>> {
        let state = self.state.lock().await;
        let mut runs: Vec<RunInfo> = state.runs.values().filter(|r| r.is_open()).cloned().collect();
        runs.sort_by_key(|r| r.start_timestamp);
        Ok(runs)
    }

    async fn create_permission_rule(&self, rule: &PermissionRule) -> Result<()> {
        self.state.lock().await.rules.push(rule.clone());
        Ok(())
    }

    async fn list_pending_permission_rules(&self) -> Result<Vec<PermissionRule>> {
        let state = self.state.lock().await;
        Ok(state.rules.iter().filter(|r| !r.created).cloned().collect())
    }

    async fn update_permission_rule(&self, rule: &PermissionRule) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.rules.iter_mut().find(|r| r.id == rule.id) {
            existing.created = rule.created;
            existing.error = rule.error.clone();
            existing.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arkive_core::constants::STATUS_COMPLETED;
    use arkive_core::models::ItemKind;

    fn new_item(run_id: Uuid, path: &str) -> NewWorkItem {
        NewWorkItem::for_path(run_id, "mirror", ItemKind::File, path)
    }

    #[tokio::test]
    async fn find_latest_respects_status_filter() {
        let store = MemoryWorkItemStore::new();
        let run = Uuid::new_v4();

        let mut done = store.create_work_item(new_item(run, "/d/a.dat")).await.unwrap();
        done.status = STATUS_COMPLETED.to_string();
        store.update_work_item(&done).await.unwrap();

        let found = store
            .find_latest_by_path("/d/a.dat", ItemKind::File, None, StatusFilter::Completed)
            .await
            .unwrap();
        assert_eq!(found.map(|i| i.id), Some(done.id));

        let open = store
            .find_latest_by_path("/d/a.dat", ItemKind::File, None, StatusFilter::NotCompleted)
            .await
            .unwrap();
        assert!(open.is_none());
    }

    #[tokio::test]
    async fn find_latest_narrows_by_source_name() {
        let store = MemoryWorkItemStore::new();
        let run = Uuid::new_v4();
        let part1 = new_item(run, "/d/dir").with_source("/w/d_dir_part_1.tar", "d_dir_part_1.tar");
        let part2 = new_item(run, "/d/dir").with_source("/w/d_dir_part_2.tar", "d_dir_part_2.tar");
        store.create_work_item(part1).await.unwrap();
        let second = store.create_work_item(part2).await.unwrap();

        let found = store
            .find_latest_by_path(
                "/d/dir",
                ItemKind::File,
                Some("d_dir_part_2.tar"),
                StatusFilter::NotCompleted,
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, second.id);
    }

    #[tokio::test]
    async fn pre_completed_items_get_end_timestamp() {
        let store = MemoryWorkItemStore::new();
        let item = new_item(Uuid::new_v4(), "/d/x").completed_with_error("missing extension");
        let created = store.create_work_item(item).await.unwrap();
        assert!(created.end_timestamp.is_some());
        assert_eq!(created.error.as_deref(), Some("missing extension"));
    }

    #[tokio::test]
    async fn task_marks_set_and_clear() {
        let store = MemoryWorkItemStore::new();
        let id = Uuid::new_v4();
        assert!(!store.is_task_completed(id, Stage::Upload).await.unwrap());

        store.mark_task_completed(id, Stage::Upload).await.unwrap();
        store.mark_task_completed(id, Stage::Upload).await.unwrap();
        store.mark_task_completed(id, Stage::Verify).await.unwrap();
        assert!(store.is_task_completed(id, Stage::Upload).await.unwrap());
        assert_eq!(store.list_task_marks(id).await.unwrap().len(), 2);

        assert_eq!(store.clear_task_marks(id).await.unwrap(), 2);
        assert!(!store.is_task_completed(id, Stage::Upload).await.unwrap());
    }

    #[tokio::test]
    async fn run_progress_accumulates() {
        let store = MemoryWorkItemStore::new();
        let run = RunInfo::start(Uuid::new_v4());
        store.create_run(&run).await.unwrap();
        store.record_run_progress(run.run_id, 100).await.unwrap();
        store.record_run_progress(run.run_id, 50).await.unwrap();

        let closed = store
            .close_run(run.run_id, RunStatus::Completed, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(closed.uploaded_size, 150);
        assert!(store.list_open_runs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn pending_rules_exclude_created() {
        let store = MemoryWorkItemStore::new();
        let mut rule = PermissionRule::new("/p", "u1", "read", false);
        store.create_permission_rule(&rule).await.unwrap();
        assert_eq!(store.list_pending_permission_rules().await.unwrap().len(), 1);

        rule.created = true;
        store.update_permission_rule(&rule).await.unwrap();
        assert!(store.list_pending_permission_rules().await.unwrap().is_empty());
    }
}
