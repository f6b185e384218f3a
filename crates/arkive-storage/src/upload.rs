//! Upload engine
//!
//! Files below the multipart threshold are streamed to a single presigned URL. Larger
//! files are split into parts that are uploaded concurrently through a bounded pool.
//! Each part is hashed while it streams and is accepted only if the entity tag returned
//! by the object store matches that digest. A part that exhausts its attempts aborts the
//! whole upload and the completion endpoint is never called.

use std::io::SeekFrom;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arkive_core::constants::{
    MAX_PART_COUNT, MAX_PART_SIZE, MIN_PART_SIZE, PART_RETRY_BACKOFF_MS, PART_SIZE_ALIGNMENT,
    PART_UPLOAD_ATTEMPTS,
};
use arkive_core::hash::{hex_to_base64, normalize_etag, Md5Hasher};
use arkive_core::UploadConfig;
use futures::stream::{self, StreamExt};
use reqwest::header::{CONTENT_LENGTH, ETAG};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use crate::error::{RemoteError, RemoteResult};
use crate::service::ArchiveService;
use crate::types::{CompletedPart, ObjectSource, PartUrl, Registration, RegistrationRequest};
use arkive_core::constants::REMOTE_STATE_ARCHIVED;

const PART_REQUEST_TIMEOUT_SECS: u64 = 3600;

#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Files of at least this size use the multi-part path.
    pub multipart_threshold: u64,
    pub part_size: u64,
    /// Concurrent part uploads per file.
    pub threads: usize,
    pub replace_modified: bool,
    pub part_attempts: u32,
    pub part_retry_backoff: Duration,
    pub min_part_size: u64,
    pub max_part_size: u64,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            multipart_threshold: 100 * 1024 * 1024,
            part_size: 64 * 1024 * 1024,
            threads: 4,
            replace_modified: false,
            part_attempts: PART_UPLOAD_ATTEMPTS,
            part_retry_backoff: Duration::from_millis(PART_RETRY_BACKOFF_MS),
            min_part_size: MIN_PART_SIZE,
            max_part_size: MAX_PART_SIZE,
        }
    }
}

impl UploadOptions {
    pub fn from_config(config: &UploadConfig, replace_modified: bool) -> Self {
        Self {
            multipart_threshold: config.multipart_threshold_bytes,
            part_size: config.part_size_bytes,
            threads: config.threads,
            replace_modified,
            ..Self::default()
        }
    }
}

/// Byte range of one part, numbered from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartRange {
    pub part_number: u32,
    pub offset: u64,
    pub length: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadPlan {
    Single,
    Multipart { part_size: u64, parts: Vec<PartRange> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMode {
    Single,
    Multipart,
    /// The remote service pulls the bytes itself.
    Pull,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadOutcome {
    pub object_id: String,
    pub mode: UploadMode,
    pub parts: u32,
    pub bytes: u64,
}

fn round_to_alignment(size: u64) -> u64 {
    (((size + PART_SIZE_ALIGNMENT / 2) / PART_SIZE_ALIGNMENT) * PART_SIZE_ALIGNMENT)
        .max(PART_SIZE_ALIGNMENT)
}

/// Part size for a file: the requested size clamped to the protocol bounds, rounded to
/// the nearest KiB, and grown when needed to keep the part count within the maximum.
pub fn compute_part_size(file_size: u64, requested: u64, min: u64, max: u64) -> u64 {
    let mut part_size = round_to_alignment(requested.clamp(min, max)).clamp(min, max);

    if file_size.div_ceil(part_size) > MAX_PART_COUNT {
        let needed = file_size.div_ceil(MAX_PART_COUNT);
        part_size = needed.div_ceil(PART_SIZE_ALIGNMENT) * PART_SIZE_ALIGNMENT;
    }

    part_size
}

/// Consecutive `[offset, offset + length)` ranges covering `size` bytes.
pub fn split_parts(size: u64, part_size: u64) -> Vec<PartRange> {
    let mut parts = Vec::new();
    let mut offset = 0u64;
    let mut part_number = 1u32;

    while offset < size {
        let length = std::cmp::min(part_size, size - offset);
        parts.push(PartRange {
            part_number,
            offset,
            length,
        });
        offset += length;
        part_number += 1;
    }

    parts
}

pub fn plan_upload(size: u64, options: &UploadOptions) -> RemoteResult<UploadPlan> {
    if size < options.multipart_threshold || size == 0 {
        return Ok(UploadPlan::Single);
    }

    let part_size = compute_part_size(
        size,
        options.part_size,
        options.min_part_size,
        options.max_part_size,
    );
    if part_size > options.max_part_size {
        return Err(RemoteError::InvalidRequest(format!(
            "file of {} bytes needs parts larger than {} bytes",
            size, options.max_part_size
        )));
    }

    Ok(UploadPlan::Multipart {
        part_size,
        parts: split_parts(size, part_size),
    })
}

pub struct UploadEngine {
    service: Arc<dyn ArchiveService>,
    client: reqwest::Client,
    options: UploadOptions,
}

impl UploadEngine {
    pub fn new(service: Arc<dyn ArchiveService>, options: UploadOptions) -> RemoteResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(PART_REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            service,
            client,
            options,
        })
    }

    pub fn options(&self) -> &UploadOptions {
        &self.options
    }

    /// Register `request.path` and transfer the content of `local_path`.
    ///
    /// For pull sources only the registration is made; the remote service fetches the
    /// bytes asynchronously.
    #[tracing::instrument(skip(self, request), fields(path = %request.path, size = request.size))]
    pub async fn upload(
        &self,
        local_path: &Path,
        mut request: RegistrationRequest,
    ) -> RemoteResult<UploadOutcome> {
        if !request.source.is_push() {
            return self.register_pull(request).await;
        }

        let size = tokio::fs::metadata(local_path).await?.len();
        request.size = size;
        let plan = plan_upload(size, &self.options)?;
        request.source = ObjectSource::Upload {
            multipart: matches!(plan, UploadPlan::Multipart { .. }),
        };

        let registration = self.register(&request).await?;

        match plan {
            UploadPlan::Single => {
                self.upload_single(&registration.object_id, local_path, size, request.checksum.as_deref())
                    .await?;
                tracing::info!(
                    object_id = %registration.object_id,
                    size_bytes = size,
                    "Single-stream upload completed"
                );
                Ok(UploadOutcome {
                    object_id: registration.object_id,
                    mode: UploadMode::Single,
                    parts: 1,
                    bytes: size,
                })
            }
            UploadPlan::Multipart { part_size, parts } => {
                let count = parts.len() as u32;
                self.upload_multipart(&registration.object_id, local_path, parts)
                    .await?;
                tracing::info!(
                    object_id = %registration.object_id,
                    size_bytes = size,
                    part_size,
                    parts = count,
                    "Multi-part upload completed"
                );
                Ok(UploadOutcome {
                    object_id: registration.object_id,
                    mode: UploadMode::Multipart,
                    parts: count,
                    bytes: size,
                })
            }
        }
    }

    async fn register(&self, request: &RegistrationRequest) -> RemoteResult<Registration> {
        match self.service.register_object(request).await {
            Ok(registration) => Ok(registration),
            Err(RemoteError::Conflict(path)) if self.options.replace_modified => {
                tracing::warn!(path = %path, "Destination exists, soft-deleting before re-registration");
                self.service.soft_delete_object(&request.path).await?;
                Err(RemoteError::ReplacedExisting(path))
            }
            Err(e) => Err(e),
        }
    }

    async fn register_pull(&self, request: RegistrationRequest) -> RemoteResult<UploadOutcome> {
        // A transfer registered by an earlier attempt may still be in flight.
        match self.service.get_object_metadata(&request.path).await {
            Ok(existing) if existing.state != REMOTE_STATE_ARCHIVED => {
                tracing::info!(
                    path = %request.path,
                    state = %existing.state,
                    "Pull transfer already registered"
                );
                return Ok(UploadOutcome {
                    object_id: existing.path,
                    mode: UploadMode::Pull,
                    parts: 0,
                    bytes: request.size,
                });
            }
            Ok(_) | Err(RemoteError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let registration = self.register(&request).await?;
        tracing::info!(object_id = %registration.object_id, "Pull transfer registered");
        Ok(UploadOutcome {
            object_id: registration.object_id,
            mode: UploadMode::Pull,
            parts: 0,
            bytes: request.size,
        })
    }

    async fn upload_single(
        &self,
        object_id: &str,
        local_path: &Path,
        size: u64,
        checksum: Option<&str>,
    ) -> RemoteResult<()> {
        let url = self.service.request_upload_url(object_id).await?;
        let content_md5 = checksum
            .map(hex_to_base64)
            .transpose()
            .map_err(|e| RemoteError::InvalidRequest(format!("invalid checksum: {}", e)))?;

        self.put_range(&url, local_path, 0, size, content_md5).await?;
        self.service.complete_upload(object_id, &[]).await
    }

    async fn upload_multipart(
        &self,
        object_id: &str,
        local_path: &Path,
        parts: Vec<PartRange>,
    ) -> RemoteResult<()> {
        let mut urls: Vec<PartUrl> = self
            .service
            .request_part_urls(object_id, parts.len() as u32)
            .await?;
        urls.sort_by_key(|u| u.part_number);

        let mut work = Vec::with_capacity(parts.len());
        for (part, url) in parts.into_iter().zip(urls) {
            if part.part_number != url.part_number {
                return Err(RemoteError::InvalidResponse(format!(
                    "part URL numbering mismatch: expected {}, got {}",
                    part.part_number, url.part_number
                )));
            }
            work.push((part, url.url));
        }

        let cancelled = Arc::new(AtomicBool::new(false));
        let threads = self.options.threads.max(1);

        let results: Vec<RemoteResult<CompletedPart>> = stream::iter(work)
            .map(|(part, url)| {
                let cancelled = Arc::clone(&cancelled);
                async move { self.upload_part(part, &url, local_path, &cancelled).await }
            })
            .buffer_unordered(threads)
            .collect()
            .await;

        let mut completed = Vec::with_capacity(results.len());
        for result in results {
            completed.push(result?);
        }
        completed.sort_by_key(|p| p.part_number);

        self.service.complete_upload(object_id, &completed).await
    }

    async fn upload_part(
        &self,
        part: PartRange,
        url: &str,
        local_path: &Path,
        cancelled: &AtomicBool,
    ) -> RemoteResult<CompletedPart> {
        let attempts = self.options.part_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            if cancelled.load(Ordering::Relaxed) {
                return Err(RemoteError::PartFailed {
                    part_number: part.part_number,
                    attempts: attempt - 1,
                    message: "upload aborted after another part failed".to_string(),
                });
            }

            match self.put_part(&part, url, local_path).await {
                Ok(done) => return Ok(done),
                Err(e) => {
                    tracing::warn!(
                        part_number = part.part_number,
                        attempt,
                        error = %e,
                        "Part upload attempt failed"
                    );
                    last_error = e.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(self.options.part_retry_backoff).await;
                    }
                }
            }
        }

        cancelled.store(true, Ordering::Relaxed);
        Err(RemoteError::PartFailed {
            part_number: part.part_number,
            attempts,
            message: last_error,
        })
    }

    async fn put_part(
        &self,
        part: &PartRange,
        url: &str,
        local_path: &Path,
    ) -> RemoteResult<CompletedPart> {
        let (digest, etag) = self
            .put_range(url, local_path, part.offset, part.length, None)
            .await?;

        match etag {
            Some(etag) if etag == digest => Ok(CompletedPart {
                part_number: part.part_number,
                etag,
            }),
            other => Err(RemoteError::EtagMismatch {
                part_number: part.part_number,
                expected: digest,
                actual: other.unwrap_or_else(|| "<missing>".to_string()),
            }),
        }
    }

    /// Stream a byte range of a file with PUT, hashing it on the way.
    /// Returns the local digest and the normalised entity tag of the response.
    async fn put_range(
        &self,
        url: &str,
        local_path: &Path,
        offset: u64,
        length: u64,
        content_md5: Option<String>,
    ) -> RemoteResult<(String, Option<String>)> {
        let mut file = tokio::fs::File::open(local_path).await?;
        file.seek(SeekFrom::Start(offset)).await?;

        let hasher = Arc::new(Mutex::new(Md5Hasher::new()));
        let stream_hasher = Arc::clone(&hasher);
        let body = ReaderStream::new(file.take(length)).map(move |chunk| {
            if let Ok(bytes) = &chunk {
                if let Ok(mut hasher) = stream_hasher.lock() {
                    hasher.update(bytes);
                }
            }
            chunk
        });

        let mut request = self
            .client
            .put(url)
            .header(CONTENT_LENGTH, length)
            .body(reqwest::Body::wrap_stream(body));
        if let Some(md5) = content_md5 {
            request = request.header("Content-MD5", md5);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(RemoteError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(normalize_etag);
        let digest = hasher
            .lock()
            .map(|h| h.clone().finish_hex())
            .map_err(|_| RemoteError::InvalidResponse("digest state unavailable".to_string()))?;

        Ok((digest, etag))
    }
}
