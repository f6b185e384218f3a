use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{QueueMessage, WorkQueue};

#[derive(Debug, Clone)]
struct Entry {
    id: i64,
    work_item_id: Uuid,
    attempts: i32,
    visible_at: DateTime<Utc>,
    claimed: bool,
    enqueued_at: DateTime<Utc>,
}

#[derive(Default)]
struct State {
    next_id: i64,
    entries: Vec<Entry>,
    sent: Vec<Uuid>,
}

/// In-process queue with the same visibility semantics as [`super::PgWorkQueue`].
#[derive(Clone)]
pub struct MemoryWorkQueue {
    name: String,
    state: Arc<Mutex<State>>,
}

impl MemoryWorkQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Every id accepted by `send`, in order, including duplicates that were ignored.
    pub async fn sent(&self) -> Vec<Uuid> {
        self.state.lock().await.sent.clone()
    }

    pub async fn queued_ids(&self) -> Vec<Uuid> {
        self.state
            .lock()
            .await
            .entries
            .iter()
            .map(|e| e.work_item_id)
            .collect()
    }
}

fn after(delay: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64)
}

#[async_trait::async_trait]
impl WorkQueue for MemoryWorkQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, work_item_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().await;
        state.sent.push(work_item_id);
        if state.entries.iter().any(|e| e.work_item_id == work_item_id) {
            return Ok(());
        }
        state.next_id += 1;
        let now = Utc::now();
        let entry = Entry {
            id: state.next_id,
            work_item_id,
            attempts: 0,
            visible_at: now,
            claimed: false,
            enqueued_at: now,
        };
        state.entries.push(entry);
        Ok(())
    }

    async fn receive(&self, visibility_timeout: Duration) -> Result<Option<QueueMessage>> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let next = state
            .entries
            .iter_mut()
            .filter(|e| e.visible_at <= now)
            .min_by_key(|e| (e.visible_at, e.id));

        Ok(next.map(|entry| {
            entry.attempts += 1;
            entry.claimed = true;
            entry.visible_at = after(visibility_timeout);
            QueueMessage {
                id: entry.id,
                work_item_id: entry.work_item_id,
                attempts: entry.attempts,
                enqueued_at: entry.enqueued_at,
            }
        }))
    }

    async fn ack(&self, message: &QueueMessage) -> Result<()> {
        self.state
            .lock()
            .await
            .entries
            .retain(|e| e.id != message.id);
        Ok(())
    }

    async fn nack(&self, message: &QueueMessage, delay: Duration) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.entries.iter_mut().find(|e| e.id == message.id) {
            entry.claimed = false;
            entry.visible_at = after(delay);
        }
        Ok(())
    }

    async fn depth(&self) -> Result<i64> {
        Ok(self.state.lock().await.entries.len() as i64)
    }

    async fn release_expired(&self) -> Result<u64> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let mut released = 0;
        for entry in state
            .entries
            .iter_mut()
            .filter(|e| e.claimed && e.visible_at <= now)
        {
            entry.claimed = false;
            released += 1;
        }
        Ok(released)
    }
}
