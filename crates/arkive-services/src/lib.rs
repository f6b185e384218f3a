//! Arkive services
//!
//! Pipeline collaborators above the storage and processing layers:
//!
//! - [`scanner`]: candidate enumeration, gates and dedup against earlier runs
//! - [`processor`]: destination path and registration metadata per source collection
//! - [`metadata`]: the metadata stage (destination, collection, persisted record)
//! - [`verifier`]: post-upload comparison with the remote object
//! - [`permissions`]: permission and bookmark reconciliation
//! - [`notifier`]: mail and log notifications
//! - [`summary`]: run-result artifacts

pub mod metadata;
pub mod notifier;
pub mod permissions;
pub mod processor;
pub mod scanner;
pub mod summary;
pub mod verifier;

pub use metadata::MetadataAttacher;
pub use notifier::{create_notifier, EmailNotifier, LogNotifier, Notifier};
pub use permissions::{PermissionReconciler, ReconcileReport};
pub use processor::{
    ArchiveMetadata, CollectionSpec, MirrorProcessor, PathMetadataProcessor, ProcessorRegistry,
};
pub use scanner::{CandidateScanner, ScanReport};
pub use summary::SummaryWriter;
pub use verifier::Verifier;
