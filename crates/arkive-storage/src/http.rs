//! HTTP client for the remote archive service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::error::{RemoteError, RemoteResult};
use crate::service::ArchiveService;
use crate::types::{
    CompletedPart, ObjectMetadata, PartUrl, PermissionEntry, Registration, RegistrationRequest,
    UploadUrl,
};

const REQUEST_TIMEOUT_SECS: u64 = 120;

#[derive(Clone, Debug)]
pub struct HttpArchiveService {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpArchiveService {
    pub fn new(base_url: &str, token: Option<String>) -> RemoteResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn apply_auth(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.header("Authorization", format!("Bearer {}", token)),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, subject: &str) -> RemoteResult<Response> {
        let response = self.apply_auth(request).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        match status {
            StatusCode::CONFLICT => Err(RemoteError::Conflict(subject.to_string())),
            StatusCode::NOT_FOUND => Err(RemoteError::NotFound(subject.to_string())),
            _ => Err(RemoteError::Http {
                status: status.as_u16(),
                message: error_text,
            }),
        }
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        subject: &str,
    ) -> RemoteResult<T> {
        let response = self.send(request, subject).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl ArchiveService for HttpArchiveService {
    #[tracing::instrument(skip(self, metadata))]
    async fn create_collection(
        &self,
        path: &str,
        metadata: &serde_json::Value,
    ) -> RemoteResult<()> {
        let request = self
            .client
            .post(self.build_url("/api/v1/collections"))
            .json(&json!({ "path": path, "metadata": metadata }));
        self.send(request, path).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self, request), fields(path = %request.path, size = request.size))]
    async fn register_object(&self, request: &RegistrationRequest) -> RemoteResult<Registration> {
        let http = self
            .client
            .post(self.build_url("/api/v1/objects"))
            .json(request);
        self.send_json(http, &request.path).await
    }

    #[tracing::instrument(skip(self))]
    async fn request_upload_url(&self, object_id: &str) -> RemoteResult<String> {
        let request = self
            .client
            .post(self.build_url(&format!("/api/v1/objects/{}/upload-url", object_id)));
        let body: UploadUrl = self.send_json(request, object_id).await?;
        Ok(body.url)
    }

    #[tracing::instrument(skip(self))]
    async fn request_part_urls(
        &self,
        object_id: &str,
        part_count: u32,
    ) -> RemoteResult<Vec<PartUrl>> {
        let request = self
            .client
            .post(self.build_url(&format!("/api/v1/objects/{}/part-urls", object_id)))
            .json(&json!({ "part_count": part_count }));
        let parts: Vec<PartUrl> = self.send_json(request, object_id).await?;
        if parts.len() != part_count as usize {
            return Err(RemoteError::InvalidResponse(format!(
                "requested {} part URLs, received {}",
                part_count,
                parts.len()
            )));
        }
        Ok(parts)
    }

    #[tracing::instrument(skip(self, parts), fields(parts = parts.len()))]
    async fn complete_upload(&self, object_id: &str, parts: &[CompletedPart]) -> RemoteResult<()> {
        let request = self
            .client
            .post(self.build_url(&format!("/api/v1/objects/{}/complete", object_id)))
            .json(&json!({ "parts": parts }));
        self.send(request, object_id).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn get_object_metadata(&self, path: &str) -> RemoteResult<ObjectMetadata> {
        let request = self
            .client
            .get(self.build_url("/api/v1/objects"))
            .query(&[("path", path)]);
        self.send_json(request, path).await
    }

    #[tracing::instrument(skip(self))]
    async fn soft_delete_object(&self, path: &str) -> RemoteResult<()> {
        let request = self
            .client
            .post(self.build_url("/api/v1/objects/soft-delete"))
            .json(&json!({ "path": path }));
        self.send(request, path).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn get_permission(&self, path: &str, user_id: &str) -> RemoteResult<Option<String>> {
        let request = self
            .client
            .get(self.build_url("/api/v1/acl"))
            .query(&[("path", path), ("user_id", user_id)]);
        match self.send_json::<PermissionEntry>(request, path).await {
            Ok(entry) => Ok(entry.permission),
            Err(RemoteError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn update_acl(&self, path: &str, user_id: &str, permission: &str) -> RemoteResult<()> {
        let request = self
            .client
            .put(self.build_url("/api/v1/acl"))
            .json(&json!({ "path": path, "user_id": user_id, "permission": permission }));
        self.send(request, path).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn create_bookmark(&self, path: &str, name: &str, user_id: &str) -> RemoteResult<()> {
        let request = self
            .client
            .post(self.build_url("/api/v1/bookmarks"))
            .json(&json!({ "path": path, "name": name, "user_id": user_id }));
        self.send(request, path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ObjectSource;
    use mockito::Matcher;

    fn registration(path: &str) -> RegistrationRequest {
        RegistrationRequest {
            path: path.to_string(),
            size: 10,
            checksum: None,
            metadata: json!({}),
            source: ObjectSource::Upload { multipart: false },
        }
    }

    #[tokio::test]
    async fn register_sends_bearer_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/objects")
            .match_header("authorization", "Bearer secret")
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(r#"{"object_id":"obj-1"}"#)
            .create_async()
            .await;

        let service = HttpArchiveService::new(&server.url(), Some("secret".to_string())).unwrap();
        let registration = service
            .register_object(&registration("/archive/a.dat"))
            .await
            .unwrap();

        assert_eq!(registration.object_id, "obj-1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn conflict_and_not_found_are_distinguished() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v1/objects")
            .with_status(409)
            .create_async()
            .await;
        server
            .mock("GET", "/api/v1/objects")
            .match_query(Matcher::UrlEncoded("path".into(), "/archive/missing".into()))
            .with_status(404)
            .create_async()
            .await;

        let service = HttpArchiveService::new(&server.url(), None).unwrap();
        let err = service
            .register_object(&registration("/archive/a.dat"))
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        let err = service
            .get_object_metadata("/archive/missing")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn server_errors_carry_status_and_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v1/objects/soft-delete")
            .with_status(503)
            .with_body("maintenance")
            .create_async()
            .await;

        let service = HttpArchiveService::new(&server.url(), None).unwrap();
        match service.soft_delete_object("/archive/a").await {
            Err(RemoteError::Http { status, message }) => {
                assert_eq!(status, 503);
                assert_eq!(message, "maintenance");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn part_url_count_is_checked() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v1/objects/obj-1/part-urls")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"[{"part_number":1,"url":"http://x/1"}]"#)
            .create_async()
            .await;

        let service = HttpArchiveService::new(&server.url(), None).unwrap();
        let err = service.request_part_urls("obj-1", 2).await.unwrap_err();
        assert!(matches!(err, RemoteError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn missing_permission_is_none() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/acl")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"permission":null}"#)
            .create_async()
            .await;

        let service = HttpArchiveService::new(&server.url(), None).unwrap();
        let permission = service.get_permission("/p", "u1").await.unwrap();
        assert_eq!(permission, None);
    }
}
