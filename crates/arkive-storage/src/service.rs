//! Remote archive service abstraction
//!
//! The pipeline only consumes the service: it registers objects, transfers their bytes,
//! reads back their metadata and manages access. Registration semantics live remotely.

use async_trait::async_trait;

use crate::error::RemoteResult;
use crate::types::{CompletedPart, ObjectMetadata, PartUrl, Registration, RegistrationRequest};

#[async_trait]
pub trait ArchiveService: Send + Sync {
    /// Create a collection. An existing collection yields `RemoteError::Conflict`.
    async fn create_collection(&self, path: &str, metadata: &serde_json::Value)
        -> RemoteResult<()>;

    /// Register an object. An existing destination yields `RemoteError::Conflict`.
    async fn register_object(&self, request: &RegistrationRequest) -> RemoteResult<Registration>;

    /// Time-limited write URL for a single-stream upload.
    async fn request_upload_url(&self, object_id: &str) -> RemoteResult<String>;

    /// One write URL per part, numbered from 1.
    async fn request_part_urls(&self, object_id: &str, part_count: u32)
        -> RemoteResult<Vec<PartUrl>>;

    /// Finish an upload. `parts` is empty for single-stream uploads.
    async fn complete_upload(&self, object_id: &str, parts: &[CompletedPart]) -> RemoteResult<()>;

    async fn get_object_metadata(&self, path: &str) -> RemoteResult<ObjectMetadata>;

    async fn soft_delete_object(&self, path: &str) -> RemoteResult<()>;

    /// Current permission of `user_id` on `path`, if any.
    async fn get_permission(&self, path: &str, user_id: &str) -> RemoteResult<Option<String>>;

    async fn update_acl(&self, path: &str, user_id: &str, permission: &str) -> RemoteResult<()>;

    /// Create a named bookmark. An existing bookmark yields `RemoteError::Conflict`.
    async fn create_bookmark(&self, path: &str, name: &str, user_id: &str) -> RemoteResult<()>;
}
