//! Durable work queue carrying work item ids.
//!
//! Delivery is at-least-once: a received message stays hidden for a visibility timeout
//! and reappears if it is neither acknowledged nor negatively acknowledged in time.

pub mod memory;
pub mod postgres;

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use memory::MemoryWorkQueue;
pub use postgres::PgWorkQueue;

/// A claimed queue message.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueMessage {
    pub id: i64,
    pub work_item_id: Uuid,
    /// Number of times this message has been received, including the current delivery.
    pub attempts: i32,
    pub enqueued_at: DateTime<Utc>,
}

#[async_trait::async_trait]
pub trait WorkQueue: Send + Sync {
    fn name(&self) -> &str;

    /// Enqueue a work item. Sending an id that is already queued is a no-op.
    async fn send(&self, work_item_id: Uuid) -> Result<()>;

    /// Claim the next visible message, hiding it for `visibility_timeout`.
    async fn receive(&self, visibility_timeout: Duration) -> Result<Option<QueueMessage>>;

    /// Remove a processed message.
    async fn ack(&self, message: &QueueMessage) -> Result<()>;

    /// Return a message to the queue, visible again after `delay`.
    async fn nack(&self, message: &QueueMessage, delay: Duration) -> Result<()>;

    /// Messages in the queue, claimed or not.
    async fn depth(&self) -> Result<i64>;

    /// Release claims whose visibility timeout has passed. Returns how many were released.
    async fn release_expired(&self) -> Result<u64>;
}
