//! Record store for the archival pipeline
//!
//! Per-table repositories (`work_items`, `task_marks`, `work_item_metadata`, `run_info`,
//! `permission_rules`) are composed into [`PgWorkItemStore`], which implements the
//! [`WorkItemStore`] trait alongside the in-memory [`MemoryWorkItemStore`].

pub mod memory;
pub mod metadata;
pub mod permission;
pub mod postgres;
pub mod run_info;
pub mod setup;
pub mod store;
pub mod task_mark;
pub mod work_item;

pub use memory::MemoryWorkItemStore;
pub use metadata::MetadataRepository;
pub use permission::PermissionRuleRepository;
pub use postgres::PgWorkItemStore;
pub use run_info::RunInfoRepository;
pub use setup::{connect, run_migrations, setup_database};
pub use store::WorkItemStore;
pub use task_mark::TaskMarkRepository;
pub use work_item::WorkItemRepository;
