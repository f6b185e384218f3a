//! Wiring shared by the `arkive` subcommands: backend selection, pipeline assembly
//! and run id resolution.

pub mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use arkive_core::Config;
use arkive_db::{
    setup_database, MemoryWorkItemStore, MemoryWorkQueue, PgWorkItemStore, PgWorkQueue,
    WorkItemStore, WorkQueue,
};
use arkive_services::{CandidateScanner, Notifier, ProcessorRegistry, SummaryWriter};
use arkive_storage::create_archive_service;
use arkive_worker::{PipelineExecutor, RunMonitor};
use uuid::Uuid;

pub use telemetry::{init_telemetry, json_logs_from_env};

/// Where work items, runs and the queue are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum StoreKind {
    /// PostgreSQL at `DATABASE_URL`, migrated on connect.
    Postgres,
    /// Process-local; nothing survives the process. Useful for one-shot dry runs.
    Memory,
}

#[derive(Clone)]
pub struct Backends {
    pub store: Arc<dyn WorkItemStore>,
    pub queue: Arc<dyn WorkQueue>,
}

impl Backends {
    pub async fn connect(config: &Config, kind: StoreKind) -> Result<Self> {
        match kind {
            StoreKind::Memory => {
                tracing::warn!("Using in-memory store, state is lost when the process exits");
                Ok(Self::memory(&config.queue_name))
            }
            StoreKind::Postgres => {
                let url = config
                    .database_url
                    .as_deref()
                    .context("DATABASE_URL not configured")?;
                let pool = setup_database(url, config.db_max_connections).await?;
                Ok(Self {
                    store: Arc::new(PgWorkItemStore::new(pool.clone())),
                    queue: Arc::new(PgWorkQueue::new(pool, config.queue_name.clone())),
                })
            }
        }
    }

    pub fn memory(queue_name: &str) -> Self {
        Self {
            store: Arc::new(MemoryWorkItemStore::new()),
            queue: Arc::new(MemoryWorkQueue::new(queue_name)),
        }
    }

    pub fn scanner(&self, config: Arc<Config>, notifier: Arc<dyn Notifier>) -> CandidateScanner {
        CandidateScanner::new(config, self.store.clone(), self.queue.clone(), notifier)
    }

    pub fn executor(&self, config: Arc<Config>) -> Result<PipelineExecutor> {
        let service = create_archive_service(&config)?;
        let registry = ProcessorRegistry::with_defaults(&config);
        Ok(PipelineExecutor::new(
            config,
            self.store.clone(),
            self.queue.clone(),
            service,
            registry,
        )?)
    }

    pub fn summaries(&self, config: &Config) -> SummaryWriter {
        SummaryWriter::new(self.store.clone(), config.summary_dir.clone())
    }

    pub fn monitor(&self, config: &Config, notifier: Arc<dyn Notifier>) -> RunMonitor {
        RunMonitor::new(
            self.store.clone(),
            self.queue.clone(),
            self.summaries(config),
            notifier,
            Duration::from_secs(config.run_check_interval_secs.max(1)),
        )
    }
}

/// Run id from the command line, else from configuration, else a fresh one.
pub fn resolve_run_id(flag: Option<Uuid>, configured: Option<Uuid>) -> Uuid {
    flag.or(configured).unwrap_or_else(Uuid::new_v4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arkive_core::models::RunInfo;
    use std::collections::HashMap;

    #[test]
    fn flag_run_id_wins_over_configuration() {
        let flag = Uuid::new_v4();
        let configured = Uuid::new_v4();
        assert_eq!(resolve_run_id(Some(flag), Some(configured)), flag);
        assert_eq!(resolve_run_id(None, Some(configured)), configured);
        assert_ne!(resolve_run_id(None, None), configured);
    }

    #[tokio::test]
    async fn memory_backends_share_one_store() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("ARKIVE_SOURCE_ROOT", "/data/src"),
            ("ARKIVE_WORK_ROOT", "/data/work"),
        ]);
        let config = Config::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        let backends = Backends::connect(&config, StoreKind::Memory).await.unwrap();

        let run = RunInfo::start(Uuid::new_v4());
        backends.store.create_run(&run).await.unwrap();
        let cloned = backends.clone();
        assert!(cloned.store.get_run(run.run_id).await.unwrap().is_some());
        assert_eq!(cloned.queue.name(), config.queue_name);
    }

    #[test]
    fn executor_requires_remote_url() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("ARKIVE_SOURCE_ROOT", "/data/src"),
            ("ARKIVE_WORK_ROOT", "/data/work"),
        ]);
        let config = Config::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        let backends = Backends::memory("test");
        assert!(backends.executor(Arc::new(config)).is_err());
    }
}
