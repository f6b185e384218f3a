//! Worker pool: polling, bounded concurrency, redelivery and stale claim recovery.
//!
//! Shutdown: [`WorkerPool::shutdown`] signals the pool to stop claiming; the pool loop
//! then waits for in-flight items before it exits, so [`WorkerPool::join`] returns only
//! once every claimed message has been acknowledged or returned.

use std::sync::Arc;
use std::time::Duration;

use arkive_core::Config;
use arkive_db::{QueueMessage, WorkQueue};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::context::ItemHandler;

/// Maximum delay in seconds before a failed item is redelivered. Caps exponential
/// backoff so that high retry counts do not produce excessively long delays.
pub const MAX_RETRY_BACKOFF_SECS: u64 = 300;

/// Backoff in seconds for a given retry count (exponential with cap).
#[inline]
pub fn retry_backoff_seconds(retry_count: i32) -> u64 {
    2_u64
        .checked_pow(retry_count.max(0) as u32)
        .unwrap_or(u64::MAX)
        .min(MAX_RETRY_BACKOFF_SECS)
}

#[derive(Clone, Debug)]
pub struct WorkerPoolConfig {
    pub max_workers: usize,
    pub poll_interval_ms: u64,
    pub visibility_timeout_secs: u64,
    /// Interval in seconds between runs of the stale claim reaper. `0` disables it.
    pub reap_interval_secs: u64,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            poll_interval_ms: 1000,
            visibility_timeout_secs: 3600,
            reap_interval_secs: 60,
        }
    }
}

impl WorkerPoolConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_workers: config.workers,
            poll_interval_ms: config.poll_interval_ms,
            visibility_timeout_secs: config.visibility_timeout_secs,
            ..Self::default()
        }
    }
}

pub struct WorkerPool {
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl WorkerPool {
    /// Spawn the pool loop. It runs until [`WorkerPool::shutdown`] is called.
    pub fn start(
        queue: Arc<dyn WorkQueue>,
        handler: Arc<dyn ItemHandler>,
        config: WorkerPoolConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let handle = tokio::spawn(async move {
            Self::worker_pool(queue, handler, config, shutdown_rx).await;
        });
        Self {
            shutdown_tx,
            handle,
        }
    }

    /// Signals the pool to stop claiming new items. Returns immediately.
    pub async fn shutdown(&self) {
        tracing::info!("Initiating worker pool shutdown");
        let _ = self.shutdown_tx.send(()).await;
    }

    /// Wait for the pool loop, and the items it was processing, to finish.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "Worker pool task panicked");
        }
    }

    async fn worker_pool(
        queue: Arc<dyn WorkQueue>,
        handler: Arc<dyn ItemHandler>,
        config: WorkerPoolConfig,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        tracing::info!(
            queue = queue.name(),
            max_workers = config.max_workers,
            poll_interval_ms = config.poll_interval_ms,
            "Worker pool started"
        );

        let semaphore = Arc::new(Semaphore::new(config.max_workers));
        let poll_interval = Duration::from_millis(config.poll_interval_ms);
        let visibility = Duration::from_secs(config.visibility_timeout_secs);

        let (reaper_shutdown_tx, mut reaper_shutdown_rx) = mpsc::channel::<()>(1);
        if config.reap_interval_secs > 0 {
            let reaper_queue = queue.clone();
            let reap_interval = Duration::from_secs(config.reap_interval_secs);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(reap_interval);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            match reaper_queue.release_expired().await {
                                Ok(0) => {}
                                Ok(released) => tracing::warn!(released, "Released expired queue claims"),
                                Err(e) => tracing::error!(error = %e, "Stale claim reaper failed"),
                            }
                        }
                        _ = reaper_shutdown_rx.recv() => break,
                    }
                }
            });
        }

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Worker pool shutting down");
                    let _ = reaper_shutdown_tx.send(()).await;
                    break;
                }
                _ = sleep(poll_interval) => {
                    while Self::claim_and_dispatch_one(&queue, &handler, &semaphore, visibility).await {}
                }
            }
        }

        // Wait for in-flight items by taking every permit back.
        let workers = u32::try_from(config.max_workers).unwrap_or(u32::MAX);
        if semaphore.acquire_many(workers).await.is_err() {
            tracing::warn!("Worker semaphore closed before in-flight items finished");
        }
        tracing::info!("Worker pool stopped");
    }

    /// Claim one message and spawn its processing. Returns whether a message was claimed.
    async fn claim_and_dispatch_one(
        queue: &Arc<dyn WorkQueue>,
        handler: &Arc<dyn ItemHandler>,
        semaphore: &Arc<Semaphore>,
        visibility: Duration,
    ) -> bool {
        let permit = match semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::debug!("No workers available, skipping claim");
                return false;
            }
        };

        match queue.receive(visibility).await {
            Ok(Some(message)) => {
                let queue = queue.clone();
                let handler = handler.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    Self::process_message(queue, handler, message).await;
                });
                true
            }
            Ok(None) => {
                drop(permit);
                tracing::trace!("No messages available in queue");
                false
            }
            Err(e) => {
                drop(permit);
                tracing::error!(error = %e, "Failed to claim message from queue");
                false
            }
        }
    }

    #[tracing::instrument(skip(queue, handler, message), fields(work_item.id = %message.work_item_id, attempts = message.attempts))]
    async fn process_message(
        queue: Arc<dyn WorkQueue>,
        handler: Arc<dyn ItemHandler>,
        message: QueueMessage,
    ) {
        let settled = match handler.handle(message.work_item_id).await {
            Ok(outcome) if outcome.should_ack() => queue.ack(&message).await,
            Ok(outcome) => {
                let delay = match outcome {
                    crate::context::ItemOutcome::Retry { delay } => delay,
                    _ => Duration::ZERO,
                };
                tracing::info!(delay_secs = delay.as_secs(), "Scheduling redelivery");
                queue.nack(&message, delay).await
            }
            Err(e) => {
                let delay = Duration::from_secs(retry_backoff_seconds(message.attempts));
                tracing::error!(error = %e, delay_secs = delay.as_secs(), "Item handler failed");
                queue.nack(&message, delay).await
            }
        };

        if let Err(e) = settled {
            tracing::error!(error = %e, "Failed to settle queue message, it will reappear after its visibility timeout");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ItemOutcome;
    use arkive_db::MemoryWorkQueue;
    use std::collections::HashMap;
    use tokio::sync::Mutex;
    use uuid::Uuid;

    #[test]
    fn retry_backoff_exponential_then_capped() {
        assert_eq!(retry_backoff_seconds(0), 1);
        assert_eq!(retry_backoff_seconds(1), 2);
        assert_eq!(retry_backoff_seconds(2), 4);
        assert_eq!(retry_backoff_seconds(8), 256);
        assert_eq!(retry_backoff_seconds(9), MAX_RETRY_BACKOFF_SECS);
        assert_eq!(retry_backoff_seconds(64), MAX_RETRY_BACKOFF_SECS);
    }

    /// Retries every item once, then completes it.
    #[derive(Default)]
    struct FlakyHandler {
        calls: Mutex<HashMap<Uuid, u32>>,
    }

    #[async_trait::async_trait]
    impl ItemHandler for FlakyHandler {
        async fn handle(&self, work_item_id: Uuid) -> anyhow::Result<ItemOutcome> {
            let mut calls = self.calls.lock().await;
            let count = calls.entry(work_item_id).or_insert(0);
            *count += 1;
            if *count == 1 {
                Ok(ItemOutcome::Retry {
                    delay: Duration::ZERO,
                })
            } else {
                Ok(ItemOutcome::Completed)
            }
        }
    }

    #[tokio::test]
    async fn drains_queue_with_redelivery() {
        let queue = Arc::new(MemoryWorkQueue::new("pool"));
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            queue.send(*id).await.unwrap();
        }
        let handler = Arc::new(FlakyHandler::default());

        let pool = WorkerPool::start(
            queue.clone(),
            handler.clone(),
            WorkerPoolConfig {
                max_workers: 2,
                poll_interval_ms: 10,
                visibility_timeout_secs: 60,
                reap_interval_secs: 0,
            },
        );

        tokio::time::timeout(Duration::from_secs(10), async {
            while queue.depth().await.unwrap() > 0 {
                sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("queue drained");

        pool.shutdown().await;
        pool.join().await;

        let calls = handler.calls.lock().await;
        assert_eq!(calls.len(), 3);
        assert!(ids.iter().all(|id| calls.get(id) == Some(&2)));
    }
}
