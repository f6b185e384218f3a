//! Arkive remote storage library
//!
//! Client for the remote archive service and the engine that transfers local files to it.
//!
//! # Transfers
//!
//! - **Push, single stream**: one PUT to a presigned URL, with `Content-MD5` when the
//!   checksum is known.
//! - **Push, multi-part**: parts of at least 5 MiB (at most 10,000 of them) uploaded
//!   concurrently; every part's entity tag is checked against its MD5.
//! - **Pull**: the object is registered with a link or S3 source and the service fetches it.

pub mod error;
pub mod factory;
pub mod http;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod service;
pub mod types;
pub mod upload;

pub use error::{RemoteError, RemoteResult};
pub use factory::{create_archive_service, create_upload_engine};
pub use http::HttpArchiveService;
#[cfg(any(test, feature = "test-util"))]
pub use memory::MemoryArchiveService;
pub use service::ArchiveService;
pub use types::{
    CompletedPart, ObjectMetadata, ObjectSource, PartUrl, PermissionEntry, Registration,
    RegistrationRequest,
};
pub use upload::{
    compute_part_size, plan_upload, split_parts, PartRange, UploadEngine, UploadMode,
    UploadOptions, UploadOutcome, UploadPlan,
};
