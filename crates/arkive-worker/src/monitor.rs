//! Completed-run detector.
//!
//! A run is finished once its queue is empty and no summary artifact exists for it yet.
//! The detector then closes the run, writes `run-<id>.json` and sends the summary.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use arkive_core::models::{RunStatus, RunSummary};
use arkive_db::{WorkItemStore, WorkQueue};
use arkive_services::{Notifier, SummaryWriter};
use chrono::Utc;
use uuid::Uuid;

pub struct RunMonitor {
    store: Arc<dyn WorkItemStore>,
    queue: Arc<dyn WorkQueue>,
    summaries: SummaryWriter,
    notifier: Arc<dyn Notifier>,
    interval: Duration,
}

impl RunMonitor {
    pub fn new(
        store: Arc<dyn WorkItemStore>,
        queue: Arc<dyn WorkQueue>,
        summaries: SummaryWriter,
        notifier: Arc<dyn Notifier>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            queue,
            summaries,
            notifier,
            interval,
        }
    }

    /// Close and summarise `run_id` if it has finished. Returns the summary when this
    /// call produced it.
    #[tracing::instrument(skip(self))]
    pub async fn check(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        if self.summaries.exists(run_id).await? {
            tracing::debug!("Run summary already produced");
            return Ok(None);
        }
        let depth = self.queue.depth().await?;
        if depth > 0 {
            tracing::debug!(depth, "Run still has queued work");
            return Ok(None);
        }

        let items = self.store.list_run_items(run_id).await?;
        let failed = items.iter().filter(|i| i.is_failed()).count();
        let (status, message) = if failed > 0 {
            (RunStatus::Failed, Some(format!("{} work items failed", failed)))
        } else {
            (RunStatus::Completed, None)
        };
        self.store.close_run(run_id, status, message).await?;

        let summary = self.summaries.build(run_id).await?;
        self.summaries.write(&summary).await?;
        if let Err(e) = self.notifier.send_run_summary(&summary).await {
            tracing::warn!(error = %e, "Failed to send run summary");
        }

        tracing::info!(
            status = %summary.status,
            items = summary.total_items,
            failed = summary.failed_items,
            uploaded_bytes = summary.uploaded_size,
            "Run finished"
        );
        Ok(Some(summary))
    }

    /// Check every run that is still open.
    ///
    /// A run whose heartbeat is younger than one check interval is left alone: its scan
    /// may still be enumerating candidates before anything is enqueued.
    pub async fn check_open_runs(&self) -> Result<Vec<RunSummary>> {
        let grace = chrono::Duration::from_std(self.interval).unwrap_or_else(|_| chrono::Duration::zero());
        let mut finished = Vec::new();
        for run in self.store.list_open_runs().await? {
            if Utc::now() - run.heartbeat < grace {
                tracing::debug!(run_id = %run.run_id, "Run started recently, not checked yet");
                continue;
            }
            if let Some(summary) = self.check(run.run_id).await? {
                finished.push(summary);
            }
        }
        Ok(finished)
    }

    /// Poll until `run_id` has finished and return its summary.
    pub async fn watch(&self, run_id: Uuid) -> Result<RunSummary> {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            match self.check(run_id).await {
                Ok(Some(summary)) => return Ok(summary),
                Ok(None) if self.summaries.exists(run_id).await? => {
                    return self.summaries.build(run_id).await;
                }
                Ok(None) => {}
                Err(e) => tracing::error!(error = %e, "Run check failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arkive_core::constants::{STATUS_COMPLETED, STATUS_FAILED};
    use arkive_core::models::{ItemKind, NewWorkItem, RunInfo};
    use arkive_db::{MemoryWorkItemStore, MemoryWorkQueue};
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        subjects: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send_mail(&self, subject: &str, _body: &str) -> anyhow::Result<()> {
            self.subjects.lock().await.push(subject.to_string());
            Ok(())
        }
    }

    struct Setup {
        _tmp: tempfile::TempDir,
        store: Arc<MemoryWorkItemStore>,
        queue: Arc<MemoryWorkQueue>,
        notifier: Arc<RecordingNotifier>,
        monitor: RunMonitor,
        run: RunInfo,
    }

    async fn setup(statuses: &[&str]) -> Setup {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryWorkItemStore::new());
        let queue = Arc::new(MemoryWorkQueue::new("monitor"));
        let notifier = Arc::new(RecordingNotifier::default());
        let run = RunInfo::start(Uuid::new_v4());
        store.create_run(&run).await.unwrap();

        for (n, status) in statuses.iter().enumerate() {
            let mut item = store
                .create_work_item(NewWorkItem::for_path(
                    run.run_id,
                    "mirror",
                    ItemKind::File,
                    &format!("/data/src/{}.dat", n),
                ))
                .await
                .unwrap();
            item.status = status.to_string();
            store.update_work_item(&item).await.unwrap();
        }

        let monitor = RunMonitor::new(
            store.clone(),
            queue.clone(),
            SummaryWriter::new(store.clone(), tmp.path()),
            notifier.clone(),
            Duration::from_millis(10),
        );
        Setup {
            _tmp: tmp,
            store,
            queue,
            notifier,
            monitor,
            run,
        }
    }

    #[tokio::test]
    async fn drained_run_is_closed_once() {
        let s = setup(&[STATUS_COMPLETED, STATUS_COMPLETED]).await;

        let summary = s.monitor.check(s.run.run_id).await.unwrap().unwrap();
        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.completed_items, 2);
        assert_eq!(s.notifier.subjects.lock().await.len(), 1);

        let run = s.store.get_run(s.run.run_id).await.unwrap().unwrap();
        assert!(!run.is_open());

        assert!(s.monitor.check(s.run.run_id).await.unwrap().is_none());
        assert_eq!(s.notifier.subjects.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn queued_work_keeps_run_open() {
        let s = setup(&[""]).await;
        s.queue.send(Uuid::new_v4()).await.unwrap();

        assert!(s.monitor.check(s.run.run_id).await.unwrap().is_none());
        assert!(s.monitor.check_open_runs().await.unwrap().is_empty());
        assert!(s.notifier.subjects.lock().await.is_empty());
    }

    #[tokio::test]
    async fn failed_items_fail_the_run() {
        let s = setup(&[STATUS_COMPLETED, STATUS_FAILED]).await;

        let summary = tokio::time::timeout(Duration::from_secs(5), s.monitor.watch(s.run.run_id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(summary.status, RunStatus::Failed);
        assert_eq!(summary.failed_items, 1);
    }
}
