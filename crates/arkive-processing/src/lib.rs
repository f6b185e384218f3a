//! Arkive processing library
//!
//! Prepares work items for upload: archive utilities (tar, untar, gzip, glob listing,
//! bounded cleanup), the archive preparer, multi-tar split reconciliation, contents
//! manifests and checksums.

pub mod contents;
pub mod error;
pub mod fs;
pub mod multitar;
pub mod preparer;

pub use contents::{enumerate_contents, ContentsReport, ExclusionReason};
pub use error::{ArchiveError, ArchiveResult};
pub use fs::{GlobFilter, RemovalReport, TarStats};
pub use multitar::{plan_parts, PartOutcome, PartPlan, SplitReport};
pub use preparer::ArchivePreparer;
