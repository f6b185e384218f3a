//! Arkive persistence layer
//!
//! Durable records (work items, task marks, runs, permission rules, metadata) and the
//! durable work queue, each behind an `async_trait` with PostgreSQL and in-memory
//! implementations.

pub mod db;
pub mod queue;

pub use db::{
    setup_database, MemoryWorkItemStore, PgWorkItemStore, WorkItemStore,
};
pub use queue::{MemoryWorkQueue, PgWorkQueue, QueueMessage, WorkQueue};
