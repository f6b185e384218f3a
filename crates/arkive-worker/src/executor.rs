//! Pipeline executor
//!
//! Drives one work item through its stage list. Every guarded stage is skipped when its
//! task mark is already completed, and marked completed right after it succeeds, so a
//! redelivered item resumes at the first unfinished stage. Failures are classified at
//! this boundary: recoverable ones bump `retry_count` and ask the pool to redeliver,
//! everything else (or an exhausted retry budget) marks the item `FAILED`.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use arkive_core::constants::{STATUS_COMPLETED, STATUS_FAILED};
use arkive_core::models::{Stage, WorkItem};
use arkive_core::{Config, ErrorClassExt, LogLevel, PipelineError, TransferMode};
use arkive_db::{WorkItemStore, WorkQueue};
use arkive_processing::ArchivePreparer;
use arkive_services::{MetadataAttacher, PermissionReconciler, ProcessorRegistry, Verifier};
use arkive_storage::{
    create_upload_engine, ArchiveService, ObjectSource, RegistrationRequest, RemoteResult,
    UploadEngine,
};
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::context::{ItemHandler, ItemOutcome};
use crate::pool::retry_backoff_seconds;
use crate::stages::plan_stages;

pub struct PipelineExecutor {
    config: Arc<Config>,
    store: Arc<dyn WorkItemStore>,
    preparer: ArchivePreparer,
    attacher: MetadataAttacher,
    uploader: UploadEngine,
    verifier: Verifier,
    reconciler: PermissionReconciler,
}

impl PipelineExecutor {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn WorkItemStore>,
        queue: Arc<dyn WorkQueue>,
        service: Arc<dyn ArchiveService>,
        registry: ProcessorRegistry,
    ) -> RemoteResult<Self> {
        let uploader = create_upload_engine(&config, service.clone())?;
        Ok(Self {
            preparer: ArchivePreparer::new(config.clone(), store.clone(), queue),
            attacher: MetadataAttacher::new(registry, store.clone(), service.clone()),
            verifier: Verifier::new(service.clone(), config.upload.transfer_mode),
            reconciler: PermissionReconciler::new(store.clone(), service),
            uploader,
            store,
            config,
        })
    }

    /// Run the item's pipeline once and persist the outcome.
    #[tracing::instrument(skip(self), fields(work_item.id = %work_item_id))]
    pub async fn process(&self, work_item_id: Uuid) -> Result<ItemOutcome> {
        let Some(mut item) = self.store.get_work_item(work_item_id).await? else {
            tracing::warn!("Work item not found, dropping message");
            return Ok(ItemOutcome::Missing);
        };
        if item.is_completed() {
            tracing::debug!("Work item already completed");
            return Ok(ItemOutcome::Completed);
        }
        if item.is_failed() {
            tracing::debug!("Work item already failed");
            return Ok(ItemOutcome::Failed);
        }

        item.error = None;
        item.start_timestamp = Some(Utc::now());
        item.end_timestamp = None;
        self.store.update_work_item(&item).await?;

        let stages = plan_stages(item.item_kind, &self.config);
        let started = Instant::now();
        for stage in &stages {
            if let Err(err) = self.run_stage(*stage, &mut item).await {
                return self.record_failure(item, *stage, err).await;
            }
        }

        self.record_success(item, &stages, started).await
    }

    /// Guarded execution of one stage.
    #[tracing::instrument(skip(self, item), fields(work_item.id = %item.id, stage = %stage))]
    async fn run_stage(&self, stage: Stage, item: &mut WorkItem) -> Result<(), PipelineError> {
        if stage.is_guarded() && self.store.is_task_completed(item.id, stage).await.workflow()? {
            tracing::debug!("Stage already completed, skipping");
            return Ok(());
        }

        let started = Instant::now();
        self.execute(stage, item).await?;
        self.store.update_work_item(item).await.workflow()?;
        if stage.is_guarded() {
            self.store.mark_task_completed(item.id, stage).await.workflow()?;
        }
        tracing::debug!(duration_ms = started.elapsed().as_millis() as u64, "Stage completed");
        Ok(())
    }

    async fn execute(&self, stage: Stage, item: &mut WorkItem) -> Result<(), PipelineError> {
        match stage {
            Stage::Tar => self.preparer.tar(item).await,
            Stage::Contents => self.preparer.write_contents(item).await.map(|_| ()),
            Stage::Compress => self.preparer.compress(item).await,
            Stage::Untar => self.preparer.untar(item).await,
            Stage::MultiTar => {
                let report = self.preparer.split_directory(item).await?;
                tracing::info!(
                    parts = report.expected_parts,
                    files = report.file_count,
                    "Directory split reconciled"
                );
                Ok(())
            }
            Stage::Metadata => self.attacher.attach(item).await.map(|_| ()),
            Stage::Checksum => self.preparer.checksum(item).await,
            Stage::Upload => self.upload(item).await,
            Stage::Verify => self.verifier.verify(item).await.map(|_| ()),
            Stage::PermissionBookmark => {
                let destination = item
                    .full_destination_path
                    .clone()
                    .ok_or_else(|| PipelineError::mapping("work item has no destination path"))?;
                let report = self.reconciler.reconcile(&destination).await?;
                if report.failed > 0 {
                    tracing::warn!(failed = report.failed, "Some permission rules could not be applied");
                }
                Ok(())
            }
            Stage::Cleanup => self.preparer.cleanup(item).await.map(|_| ()),
        }
    }

    async fn upload(&self, item: &mut WorkItem) -> Result<(), PipelineError> {
        let metadata = self
            .store
            .get_metadata(item.id)
            .await
            .workflow()?
            .ok_or_else(|| PipelineError::mapping("no archive metadata recorded for work item"))?;

        let local_path = Path::new(&item.source_file_path);
        let size = match item.filesize {
            Some(size) if size >= 0 => size as u64,
            _ => tokio::fs::metadata(local_path)
                .await
                .with_context(|| format!("Failed to stat {}", local_path.display()))?
                .len(),
        };
        let source = match self.config.upload.transfer_mode {
            TransferMode::Push => ObjectSource::Upload { multipart: false },
            TransferMode::Pull => ObjectSource::Link {
                path: item.source_file_path.clone(),
            },
        };
        let request = RegistrationRequest {
            path: metadata.destination_path.clone(),
            size,
            checksum: item.checksum.clone(),
            metadata: metadata.object_metadata.clone(),
            source,
        };

        item.upload_start_timestamp = Some(Utc::now());
        let outcome = self.uploader.upload(local_path, request).await?;
        item.upload_end_timestamp = Some(Utc::now());
        item.filesize = Some(outcome.bytes as i64);

        tracing::info!(
            object_id = %outcome.object_id,
            mode = ?outcome.mode,
            parts = outcome.parts,
            size_bytes = outcome.bytes,
            "Upload finished"
        );
        Ok(())
    }

    async fn record_success(
        &self,
        mut item: WorkItem,
        stages: &[Stage],
        started: Instant,
    ) -> Result<ItemOutcome> {
        item.status = STATUS_COMPLETED.to_string();
        item.end_timestamp = Some(Utc::now());
        self.store.update_work_item(&item).await?;
        self.store
            .clear_task_marks(item.id)
            .await
            .context("Failed to clear task marks")?;

        let uploaded = if stages.contains(&Stage::Upload) {
            item.filesize.unwrap_or(0)
        } else {
            0
        };
        self.store.record_run_progress(item.run_id, uploaded).await?;

        tracing::info!(
            run_id = %item.run_id,
            duration_ms = started.elapsed().as_millis() as u64,
            size_bytes = uploaded,
            "Work item completed"
        );
        Ok(ItemOutcome::Completed)
    }

    async fn record_failure(
        &self,
        mut item: WorkItem,
        stage: Stage,
        err: PipelineError,
    ) -> Result<ItemOutcome> {
        item.error = Some(format!("{}: {}", stage, err.persisted_message()));
        item.end_timestamp = Some(Utc::now());

        if err.requires_restart() {
            let cleared = self.store.clear_task_marks(item.id).await?;
            tracing::info!(cleared, "Task marks cleared, pipeline restarts from the first stage");
        }

        let outcome = if err.is_recoverable() {
            item.retry_count += 1;
            if item.retry_count >= self.config.max_retries {
                item.status = STATUS_FAILED.to_string();
                ItemOutcome::Failed
            } else {
                ItemOutcome::Retry {
                    delay: Duration::from_secs(retry_backoff_seconds(item.retry_count)),
                }
            }
        } else {
            item.status = STATUS_FAILED.to_string();
            ItemOutcome::Failed
        };
        self.store.update_work_item(&item).await?;

        match (err.log_level(), outcome) {
            (_, ItemOutcome::Failed) if err.is_recoverable() => tracing::error!(
                stage = %stage,
                retry_count = item.retry_count,
                error = %err,
                "Retries exhausted, work item failed"
            ),
            (LogLevel::Error, _) => tracing::error!(stage = %stage, error = %err, "Work item failed"),
            (LogLevel::Warn, _) => tracing::warn!(
                stage = %stage,
                retry_count = item.retry_count,
                error = %err,
                "Stage failed, will retry"
            ),
            (LogLevel::Debug, _) => tracing::debug!(stage = %stage, error = %err, "Stage failed"),
        }
        Ok(outcome)
    }
}

#[async_trait]
impl ItemHandler for PipelineExecutor {
    async fn handle(&self, work_item_id: Uuid) -> Result<ItemOutcome> {
        self.process(work_item_id).await
    }
}
