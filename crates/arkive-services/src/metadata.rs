//! Metadata stage: resolve the destination and registration payload of a work item.

use std::sync::Arc;

use arkive_core::models::{WorkItem, WorkItemMetadata};
use arkive_core::{ErrorClassExt, PipelineError};
use arkive_db::WorkItemStore;
use arkive_storage::ArchiveService;
use chrono::Utc;

use crate::processor::ProcessorRegistry;

pub struct MetadataAttacher {
    registry: ProcessorRegistry,
    store: Arc<dyn WorkItemStore>,
    service: Arc<dyn ArchiveService>,
}

impl MetadataAttacher {
    pub fn new(
        registry: ProcessorRegistry,
        store: Arc<dyn WorkItemStore>,
        service: Arc<dyn ArchiveService>,
    ) -> Self {
        Self {
            registry,
            store,
            service,
        }
    }

    /// Resolve the item's destination, create its collection if the processor asks for
    /// one, and persist the metadata record. Runs on every attempt.
    #[tracing::instrument(skip(self, item), fields(work_item.id = %item.id, doc = %item.doc))]
    pub async fn attach(&self, item: &mut WorkItem) -> Result<WorkItemMetadata, PipelineError> {
        let processor = self.registry.get(&item.doc)?;
        let destination = processor.archive_path(item)?;
        let metadata = processor.metadata(item, &destination)?;

        if let Some(collection) = &metadata.collection {
            match self
                .service
                .create_collection(&collection.path, &collection.metadata)
                .await
            {
                Ok(()) => tracing::info!(collection = %collection.path, "Collection created"),
                Err(e) if e.is_conflict() => {
                    tracing::debug!(collection = %collection.path, "Collection already exists")
                }
                Err(e) => return Err(e.into()),
            }
        }

        let record = WorkItemMetadata {
            work_item_id: item.id,
            destination_path: destination.clone(),
            object_metadata: metadata.object,
            collection_path: metadata.collection.as_ref().map(|c| c.path.clone()),
            collection_metadata: metadata.collection.map(|c| c.metadata),
            created_at: Utc::now(),
        };
        self.store.save_metadata(&record).await.workflow()?;

        item.full_destination_path = Some(destination);
        tracing::debug!(destination = %record.destination_path, "Metadata attached");
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arkive_core::models::{ItemKind, NewWorkItem};
    use arkive_core::ErrorKind;
    use arkive_db::MemoryWorkItemStore;
    use arkive_storage::MemoryArchiveService;
    use uuid::Uuid;

    use crate::processor::MirrorProcessor;

    fn attacher(store: Arc<MemoryWorkItemStore>, service: Arc<MemoryArchiveService>) -> MetadataAttacher {
        let mut registry = ProcessorRegistry::new();
        registry.register(Arc::new(MirrorProcessor::new("/data/src", "/archive")));
        MetadataAttacher::new(registry, store, service)
    }

    #[tokio::test]
    async fn attaches_destination_and_tolerates_existing_collection() {
        let store = Arc::new(MemoryWorkItemStore::new());
        let service = Arc::new(MemoryArchiveService::new("http://localhost"));
        let attacher = attacher(store.clone(), service.clone());

        let mut first = store
            .create_work_item(NewWorkItem::for_path(
                Uuid::new_v4(),
                "mirror",
                ItemKind::File,
                "/data/src/p/a.dat",
            ))
            .await
            .unwrap();
        let mut second = store
            .create_work_item(NewWorkItem::for_path(
                first.run_id,
                "mirror",
                ItemKind::File,
                "/data/src/p/b.dat",
            ))
            .await
            .unwrap();

        attacher.attach(&mut first).await.unwrap();
        attacher.attach(&mut second).await.unwrap();

        assert_eq!(first.full_destination_path.as_deref(), Some("/archive/p/a.dat"));
        assert_eq!(service.collections().await, vec!["/archive/p".to_string()]);
        let saved = store.get_metadata(second.id).await.unwrap().unwrap();
        assert_eq!(saved.destination_path, "/archive/p/b.dat");
        assert_eq!(saved.collection_path.as_deref(), Some("/archive/p"));
    }

    #[tokio::test]
    async fn unknown_doc_is_terminal() {
        let store = Arc::new(MemoryWorkItemStore::new());
        let service = Arc::new(MemoryArchiveService::new("http://localhost"));
        let attacher = attacher(store.clone(), service);

        let mut item = store
            .create_work_item(NewWorkItem::for_path(
                Uuid::new_v4(),
                "telescope",
                ItemKind::File,
                "/data/src/p/a.dat",
            ))
            .await
            .unwrap();
        let err = attacher.attach(&mut item).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Mapping);
        assert!(store.get_metadata(item.id).await.unwrap().is_none());
    }
}
