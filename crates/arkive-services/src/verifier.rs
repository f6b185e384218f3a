//! Post-upload verification against the remote object's self-metadata.

use std::sync::Arc;

use arkive_core::constants::REMOTE_STATE_ARCHIVED;
use arkive_core::hash::{is_composite_digest, normalize_etag};
use arkive_core::models::WorkItem;
use arkive_core::{PipelineError, TransferMode};
use arkive_storage::{ArchiveService, ObjectMetadata};

pub struct Verifier {
    service: Arc<dyn ArchiveService>,
    transfer_mode: TransferMode,
}

impl Verifier {
    pub fn new(service: Arc<dyn ArchiveService>, transfer_mode: TransferMode) -> Self {
        Self {
            service,
            transfer_mode,
        }
    }

    /// Compare size, digest and transfer state of the uploaded object.
    ///
    /// A pulled object that is not archived yet fails with a restarting verification
    /// error, so the whole pipeline runs again on redelivery.
    #[tracing::instrument(skip(self, item), fields(work_item.id = %item.id))]
    pub async fn verify(&self, item: &WorkItem) -> Result<ObjectMetadata, PipelineError> {
        let destination = item.full_destination_path.as_deref().ok_or_else(|| {
            PipelineError::mapping(format!("work item {} has no destination", item.id))
        })?;
        let remote = self.service.get_object_metadata(destination).await?;

        let mut mismatches = Vec::new();
        if let Some(local) = item.filesize {
            if local as u64 != remote.size {
                mismatches.push(format!("size local {} remote {}", local, remote.size));
            }
        }
        if let (Some(local), Some(remote_digest)) = (&item.checksum, &remote.checksum) {
            if is_composite_digest(remote_digest) {
                tracing::debug!(remote = %remote_digest, "Composite remote digest, checksum not compared");
            } else if normalize_etag(local) != normalize_etag(remote_digest) {
                mismatches.push(format!("checksum local {} remote {}", local, remote_digest));
            }
        }
        let not_archived = remote.state != REMOTE_STATE_ARCHIVED;
        if not_archived {
            mismatches.push(format!("state {}", remote.state));
        }

        if mismatches.is_empty() {
            tracing::info!(destination, size_bytes = remote.size, "Upload verified");
            return Ok(remote);
        }

        let message = format!("{}: {}", destination, mismatches.join(", "));
        if not_archived && self.transfer_mode == TransferMode::Pull {
            Err(PipelineError::verification_restart(message))
        } else {
            Err(PipelineError::verification(message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arkive_core::models::{ItemKind, NewWorkItem};
    use arkive_core::ErrorKind;
    use arkive_db::{MemoryWorkItemStore, WorkItemStore};
    use arkive_storage::MemoryArchiveService;
    use uuid::Uuid;

    async fn uploaded(size: i64, checksum: &str) -> WorkItem {
        let store = MemoryWorkItemStore::new();
        let mut item = store
            .create_work_item(NewWorkItem::for_path(
                Uuid::new_v4(),
                "mirror",
                ItemKind::File,
                "/data/src/big.bin",
            ))
            .await
            .unwrap();
        item.filesize = Some(size);
        item.checksum = Some(checksum.to_string());
        item.full_destination_path = Some("/archive/big.bin".to_string());
        item
    }

    #[tokio::test]
    async fn matching_object_verifies() {
        let service = Arc::new(MemoryArchiveService::new("http://localhost"));
        service
            .insert_archived("/archive/big.bin", 12_582_912, Some("\"ABCDEF\""))
            .await;
        let verifier = Verifier::new(service, TransferMode::Push);

        let remote = verifier.verify(&uploaded(12_582_912, "abcdef").await).await.unwrap();
        assert_eq!(remote.size, 12_582_912);
    }

    #[tokio::test]
    async fn composite_digest_is_not_compared() {
        let service = Arc::new(MemoryArchiveService::new("http://localhost"));
        service
            .insert_archived("/archive/big.bin", 100, Some("0123abcd-3"))
            .await;
        let verifier = Verifier::new(service, TransferMode::Push);
        assert!(verifier.verify(&uploaded(100, "ffff").await).await.is_ok());
    }

    #[tokio::test]
    async fn size_mismatch_is_terminal() {
        let service = Arc::new(MemoryArchiveService::new("http://localhost"));
        service.insert_archived("/archive/big.bin", 99, None).await;
        let verifier = Verifier::new(service, TransferMode::Push);

        let err = verifier.verify(&uploaded(100, "ffff").await).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Verification);
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("size local 100 remote 99"));
    }

    #[tokio::test]
    async fn unarchived_pull_restarts_pipeline() {
        let service = Arc::new(MemoryArchiveService::new("http://localhost"));
        service.insert_archived("/archive/big.bin", 100, None).await;
        service.set_object_state("/archive/big.bin", "transferring").await;

        let pull = Verifier::new(service.clone(), TransferMode::Pull);
        let err = pull.verify(&uploaded(100, "ffff").await).await.unwrap_err();
        assert!(err.requires_restart());
        assert!(err.is_recoverable());

        let push = Verifier::new(service, TransferMode::Push);
        let err = push.verify(&uploaded(100, "ffff").await).await.unwrap_err();
        assert!(!err.requires_restart());
    }
}
