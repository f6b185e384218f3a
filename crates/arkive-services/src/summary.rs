//! Run-result artifacts (`run-<id>.json`).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use arkive_core::models::RunSummary;
use arkive_db::WorkItemStore;
use uuid::Uuid;

pub struct SummaryWriter {
    store: Arc<dyn WorkItemStore>,
    summary_dir: PathBuf,
}

impl SummaryWriter {
    pub fn new(store: Arc<dyn WorkItemStore>, summary_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            summary_dir: summary_dir.into(),
        }
    }

    pub fn artifact_path(&self, run_id: Uuid) -> PathBuf {
        self.summary_dir.join(RunSummary::artifact_name(run_id))
    }

    pub async fn exists(&self, run_id: Uuid) -> Result<bool> {
        let path = self.artifact_path(run_id);
        tokio::fs::try_exists(&path)
            .await
            .with_context(|| format!("Failed to check {}", path.display()))
    }

    /// Summary of a run as currently recorded.
    pub async fn build(&self, run_id: Uuid) -> Result<RunSummary> {
        let run = self
            .store
            .get_run(run_id)
            .await?
            .with_context(|| format!("Run {} not found", run_id))?;
        let items = self.store.list_run_items(run_id).await?;
        Ok(RunSummary::build(&run, &items))
    }

    /// Write the artifact atomically (temporary file, then rename).
    #[tracing::instrument(skip(self, summary), fields(run_id = %summary.run_id))]
    pub async fn write(&self, summary: &RunSummary) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.summary_dir)
            .await
            .with_context(|| format!("Failed to create {}", self.summary_dir.display()))?;

        let path = self.artifact_path(summary.run_id);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(summary).context("Failed to serialize run summary")?;
        tokio::fs::write(&tmp, body)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to move summary into {}", path.display()))?;

        tracing::info!(
            path = %path.display(),
            items = summary.total_items,
            failed = summary.failed_items,
            "Run summary written"
        );
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arkive_core::constants::STATUS_COMPLETED;
    use arkive_core::models::{ItemKind, NewWorkItem, RunInfo, RunStatus};
    use arkive_db::MemoryWorkItemStore;

    #[tokio::test]
    async fn writes_and_reads_back_artifact() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryWorkItemStore::new());
        let run = RunInfo::start(Uuid::new_v4());
        store.create_run(&run).await.unwrap();
        let mut item = store
            .create_work_item(NewWorkItem::for_path(
                run.run_id,
                "mirror",
                ItemKind::File,
                "/data/src/a.dat",
            ))
            .await
            .unwrap();
        item.status = STATUS_COMPLETED.to_string();
        store.update_work_item(&item).await.unwrap();
        store
            .close_run(run.run_id, RunStatus::Completed, None)
            .await
            .unwrap();

        let writer = SummaryWriter::new(store, tmp.path().join("summaries"));
        assert!(!writer.exists(run.run_id).await.unwrap());

        let summary = writer.build(run.run_id).await.unwrap();
        let path = writer.write(&summary).await.unwrap();
        assert!(writer.exists(run.run_id).await.unwrap());
        assert!(path.ends_with(RunSummary::artifact_name(run.run_id)));

        let parsed: RunSummary =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(parsed.completed_items, 1);
        assert_eq!(parsed.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn unknown_run_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = SummaryWriter::new(Arc::new(MemoryWorkItemStore::new()), tmp.path());
        assert!(writer.build(Uuid::new_v4()).await.is_err());
    }
}
