//! Item handler trait
//!
//! The worker pool claims queue messages and hands their work item ids to an
//! [`ItemHandler`]; the handler's [`ItemOutcome`] decides whether the message is
//! acknowledged or returned to the queue.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

/// What the pool should do with the message after the handler ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Completed,
    /// Terminal failure, or retries exhausted. The message is removed.
    Failed,
    /// Recoverable failure. The message becomes visible again after `delay`.
    Retry { delay: Duration },
    /// The work item no longer exists.
    Missing,
}

impl ItemOutcome {
    pub fn should_ack(&self) -> bool {
        !matches!(self, ItemOutcome::Retry { .. })
    }
}

#[async_trait]
pub trait ItemHandler: Send + Sync {
    /// Drive one work item. `Err` is reserved for failures of the handler's own
    /// bookkeeping (store unreachable); stage failures are reported as an outcome.
    async fn handle(&self, work_item_id: Uuid) -> Result<ItemOutcome>;
}
