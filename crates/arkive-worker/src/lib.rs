//! Arkive worker
//!
//! Claims work item ids from the durable queue and drives each item through its stage
//! pipeline. The completed-run detector closes and summarises a run once its queue
//! drains.

pub mod context;
pub mod executor;
pub mod monitor;
pub mod pool;
pub mod stages;

pub use context::{ItemHandler, ItemOutcome};
pub use executor::PipelineExecutor;
pub use monitor::RunMonitor;
pub use pool::{retry_backoff_seconds, WorkerPool, WorkerPoolConfig, MAX_RETRY_BACKOFF_SECS};
pub use stages::plan_stages;
