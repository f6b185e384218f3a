//! In-memory archive service used by pipeline tests.
//!
//! Upload URLs point at `base_url`, so tests can serve the byte transfer with a mock
//! HTTP server while registration, completion and metadata stay in process.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use arkive_core::constants::REMOTE_STATE_ARCHIVED;
use arkive_core::hash::md5_bytes;
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{RemoteError, RemoteResult};
use crate::service::ArchiveService;
use crate::types::{
    CompletedPart, ObjectMetadata, ObjectSource, PartUrl, Registration, RegistrationRequest,
};

#[derive(Default)]
struct State {
    next_id: u64,
    registrations: HashMap<String, RegistrationRequest>,
    objects: HashMap<String, ObjectMetadata>,
    completed: HashMap<String, Vec<CompletedPart>>,
    soft_deleted: Vec<String>,
    collections: HashMap<String, serde_json::Value>,
    permissions: HashMap<(String, String), String>,
    bookmarks: HashSet<(String, String)>,
    pull_state: Option<String>,
    failing_paths: HashSet<String>,
}

#[derive(Clone)]
pub struct MemoryArchiveService {
    base_url: String,
    state: Arc<Mutex<State>>,
}

impl MemoryArchiveService {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Seed an archived object, as if uploaded by an earlier run.
    pub async fn insert_archived(&self, path: &str, size: u64, checksum: Option<&str>) {
        self.state.lock().await.objects.insert(
            path.to_string(),
            ObjectMetadata {
                path: path.to_string(),
                size,
                checksum: checksum.map(str::to_string),
                state: REMOTE_STATE_ARCHIVED.to_string(),
            },
        );
    }

    pub async fn object(&self, path: &str) -> Option<ObjectMetadata> {
        self.state.lock().await.objects.get(path).cloned()
    }

    pub async fn set_object_state(&self, path: &str, state: &str) {
        if let Some(object) = self.state.lock().await.objects.get_mut(path) {
            object.state = state.to_string();
        }
    }

    pub async fn set_object_size(&self, path: &str, size: u64) {
        if let Some(object) = self.state.lock().await.objects.get_mut(path) {
            object.size = size;
        }
    }

    /// State given to objects registered with a pull source. Defaults to `archived`.
    pub async fn set_pull_state(&self, state: &str) {
        self.state.lock().await.pull_state = Some(state.to_string());
    }

    /// Make every call touching `path` fail with a server error.
    pub async fn fail_path(&self, path: &str) {
        self.state.lock().await.failing_paths.insert(path.to_string());
    }

    pub async fn completed_parts(&self, object_id: &str) -> Option<Vec<CompletedPart>> {
        self.state.lock().await.completed.get(object_id).cloned()
    }

    pub async fn registration_count(&self) -> usize {
        self.state.lock().await.registrations.len()
    }

    pub async fn soft_deleted(&self) -> Vec<String> {
        self.state.lock().await.soft_deleted.clone()
    }

    pub async fn collections(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.state.lock().await.collections.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub async fn permission(&self, path: &str, user_id: &str) -> Option<String> {
        self.state
            .lock()
            .await
            .permissions
            .get(&(path.to_string(), user_id.to_string()))
            .cloned()
    }

    pub async fn bookmarks(&self) -> Vec<(String, String)> {
        let mut bookmarks: Vec<(String, String)> =
            self.state.lock().await.bookmarks.iter().cloned().collect();
        bookmarks.sort();
        bookmarks
    }

    fn check(state: &State, path: &str) -> RemoteResult<()> {
        if state.failing_paths.contains(path) {
            return Err(RemoteError::Http {
                status: 500,
                message: format!("injected failure for {}", path),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ArchiveService for MemoryArchiveService {
    async fn create_collection(&self, path: &str, metadata: &serde_json::Value) -> RemoteResult<()> {
        let mut state = self.state.lock().await;
        Self::check(&state, path)?;
        if state.collections.contains_key(path) {
            return Err(RemoteError::Conflict(path.to_string()));
        }
        state.collections.insert(path.to_string(), metadata.clone());
        Ok(())
    }

    async fn register_object(&self, request: &RegistrationRequest) -> RemoteResult<Registration> {
        let mut state = self.state.lock().await;
        Self::check(&state, &request.path)?;
        if state.objects.contains_key(&request.path) {
            return Err(RemoteError::Conflict(request.path.clone()));
        }

        state.next_id += 1;
        let object_id = format!("obj-{}", state.next_id);
        state
            .registrations
            .insert(object_id.clone(), request.clone());

        if !request.source.is_push() {
            let pull_state = state
                .pull_state
                .clone()
                .unwrap_or_else(|| REMOTE_STATE_ARCHIVED.to_string());
            state.objects.insert(
                request.path.clone(),
                ObjectMetadata {
                    path: request.path.clone(),
                    size: request.size,
                    checksum: request.checksum.clone(),
                    state: pull_state,
                },
            );
        }

        Ok(Registration { object_id })
    }

    async fn request_upload_url(&self, object_id: &str) -> RemoteResult<String> {
        let state = self.state.lock().await;
        if !state.registrations.contains_key(object_id) {
            return Err(RemoteError::NotFound(object_id.to_string()));
        }
        Ok(format!("{}/upload/{}", self.base_url, object_id))
    }

    async fn request_part_urls(&self, object_id: &str, part_count: u32) -> RemoteResult<Vec<PartUrl>> {
        let state = self.state.lock().await;
        if !state.registrations.contains_key(object_id) {
            return Err(RemoteError::NotFound(object_id.to_string()));
        }
        Ok((1..=part_count)
            .map(|part_number| PartUrl {
                part_number,
                url: format!("{}/upload/{}/{}", self.base_url, object_id, part_number),
            })
            .collect())
    }

    async fn complete_upload(&self, object_id: &str, parts: &[CompletedPart]) -> RemoteResult<()> {
        let mut state = self.state.lock().await;
        let request = state
            .registrations
            .get(object_id)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(object_id.to_string()))?;

        let checksum = if parts.is_empty() {
            request.checksum.clone()
        } else {
            let joined: String = parts.iter().map(|p| p.etag.as_str()).collect();
            Some(format!("{}-{}", md5_bytes(joined.as_bytes()), parts.len()))
        };

        state.objects.insert(
            request.path.clone(),
            ObjectMetadata {
                path: request.path.clone(),
                size: request.size,
                checksum,
                state: REMOTE_STATE_ARCHIVED.to_string(),
            },
        );
        state.soft_deleted.retain(|p| p != &request.path);
        state.completed.insert(object_id.to_string(), parts.to_vec());
        Ok(())
    }

    async fn get_object_metadata(&self, path: &str) -> RemoteResult<ObjectMetadata> {
        let state = self.state.lock().await;
        Self::check(&state, path)?;
        state
            .objects
            .get(path)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(path.to_string()))
    }

    async fn soft_delete_object(&self, path: &str) -> RemoteResult<()> {
        let mut state = self.state.lock().await;
        if state.objects.remove(path).is_none() {
            return Err(RemoteError::NotFound(path.to_string()));
        }
        state.soft_deleted.push(path.to_string());
        Ok(())
    }

    async fn get_permission(&self, path: &str, user_id: &str) -> RemoteResult<Option<String>> {
        let state = self.state.lock().await;
        Self::check(&state, path)?;
        Ok(state
            .permissions
            .get(&(path.to_string(), user_id.to_string()))
            .cloned())
    }

    async fn update_acl(&self, path: &str, user_id: &str, permission: &str) -> RemoteResult<()> {
        let mut state = self.state.lock().await;
        Self::check(&state, path)?;
        state
            .permissions
            .insert((path.to_string(), user_id.to_string()), permission.to_string());
        Ok(())
    }

    async fn create_bookmark(&self, path: &str, name: &str, _user_id: &str) -> RemoteResult<()> {
        let mut state = self.state.lock().await;
        Self::check(&state, path)?;
        if !state.bookmarks.insert((path.to_string(), name.to_string())) {
            return Err(RemoteError::Conflict(name.to_string()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for MemoryArchiveService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryArchiveService")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplicate_collection_conflicts() {
        let service = MemoryArchiveService::new("http://localhost");
        let meta = serde_json::json!({"doc": "mirror"});
        service.create_collection("/a", &meta).await.unwrap();
        let err = service.create_collection("/a", &meta).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn multipart_completion_stores_composite_checksum() {
        let service = MemoryArchiveService::new("http://localhost");
        let request = RegistrationRequest {
            path: "/a/big".to_string(),
            size: 20,
            checksum: Some("ab".repeat(16)),
            metadata: serde_json::json!({}),
            source: ObjectSource::Upload { multipart: true },
        };
        let reg = service.register_object(&request).await.unwrap();
        let parts = vec![
            CompletedPart {
                part_number: 1,
                etag: "x".to_string(),
            },
            CompletedPart {
                part_number: 2,
                etag: "y".to_string(),
            },
        ];
        service.complete_upload(&reg.object_id, &parts).await.unwrap();

        let object = service.object("/a/big").await.unwrap();
        assert!(object.checksum.unwrap().ends_with("-2"));
        assert_eq!(object.state, REMOTE_STATE_ARCHIVED);
    }
}
