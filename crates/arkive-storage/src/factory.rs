use std::sync::Arc;

use arkive_core::Config;

use crate::error::{RemoteError, RemoteResult};
use crate::http::HttpArchiveService;
use crate::service::ArchiveService;
use crate::upload::{UploadEngine, UploadOptions};

/// Create the remote archive service client from configuration.
pub fn create_archive_service(config: &Config) -> RemoteResult<Arc<dyn ArchiveService>> {
    if !config.has_remote() {
        return Err(RemoteError::InvalidRequest(
            "ARKIVE_REMOTE_URL not configured".to_string(),
        ));
    }

    let service = HttpArchiveService::new(&config.remote_url, config.remote_token.clone())?;
    tracing::info!(base_url = %service.base_url(), "Remote archive service client created");
    Ok(Arc::new(service))
}

/// Create an upload engine bound to `service` with the configured part sizing.
pub fn create_upload_engine(
    config: &Config,
    service: Arc<dyn ArchiveService>,
) -> RemoteResult<UploadEngine> {
    let options = UploadOptions::from_config(&config.upload, config.scan.replace_modified_files);
    UploadEngine::new(service, options)
}
