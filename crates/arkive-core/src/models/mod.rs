//! Data models for the archival pipeline

mod metadata;
mod permission;
mod run_info;
mod summary;
mod task_mark;
mod work_item;

pub use metadata::*;
pub use permission::*;
pub use run_info::*;
pub use summary::*;
pub use task_mark::*;
pub use work_item::*;
