//! Wire types exchanged with the remote archive service.

use serde::{Deserialize, Serialize};

/// Where the remote service obtains the object's bytes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObjectSource {
    /// Bytes are pushed by this process to presigned URLs.
    Upload { multipart: bool },
    /// The remote service pulls from a filesystem location it can reach.
    Link { path: String },
    /// The remote service copies from an S3 object.
    S3 { bucket: String, key: String },
}

impl ObjectSource {
    pub fn is_push(&self) -> bool {
        matches!(self, ObjectSource::Upload { .. })
    }
}

/// Object registration payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegistrationRequest {
    pub path: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    pub metadata: serde_json::Value,
    pub source: ObjectSource,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Registration {
    pub object_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadUrl {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PartUrl {
    pub part_number: u32,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

/// Self-metadata of a remote object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObjectMetadata {
    pub path: String,
    pub size: u64,
    pub checksum: Option<String>,
    /// Transfer state, `archived` once the object is durable.
    pub state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PermissionEntry {
    pub permission: Option<String>,
}
