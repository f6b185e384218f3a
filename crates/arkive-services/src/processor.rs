//! Path and metadata processors
//!
//! A processor maps a work item onto its remote destination path and the registration
//! metadata sent with it. Source collections with their own layout conventions register
//! a processor under their `doc` name; everything else uses the mirror processor.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arkive_core::constants::DEFAULT_DOC;
use arkive_core::models::{ItemKind, WorkItem};
use arkive_core::{Config, PipelineError};
use serde_json::json;

/// Collection to create before an object is registered under it.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSpec {
    pub path: String,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveMetadata {
    pub object: serde_json::Value,
    pub collection: Option<CollectionSpec>,
}

pub trait PathMetadataProcessor: Send + Sync {
    fn doc(&self) -> &str;

    /// Remote destination of the item's working copy. Failures are mapping errors.
    fn archive_path(&self, item: &WorkItem) -> Result<String, PipelineError>;

    fn metadata(&self, item: &WorkItem, destination: &str) -> Result<ArchiveMetadata, PipelineError>;
}

/// Mirrors the source tree under the destination root.
///
/// Working copies land next to where their original sits: `a/b/run1` tarred becomes
/// `<dest>/a/b/run1.tar`, its tar parts and manifests sit beside it, and a member
/// extracted from `a/b/run1.tar` becomes `<dest>/a/b/run1/<member>`.
pub struct MirrorProcessor {
    source_root: PathBuf,
    destination_root: String,
}

impl MirrorProcessor {
    pub fn new(source_root: impl Into<PathBuf>, destination_root: &str) -> Self {
        Self {
            source_root: source_root.into(),
            destination_root: destination_root.trim_end_matches('/').to_string(),
        }
    }

    fn relative_components(&self, path: &Path) -> Result<Vec<String>, PipelineError> {
        let relative = path.strip_prefix(&self.source_root).map_err(|_| {
            PipelineError::mapping(format!(
                "{} is not below source root {}",
                path.display(),
                self.source_root.display()
            ))
        })?;
        relative
            .components()
            .map(|c| match c {
                std::path::Component::Normal(part) => Ok(part.to_string_lossy().into_owned()),
                _ => Err(PipelineError::mapping(format!(
                    "{} contains a non-normal path component",
                    path.display()
                ))),
            })
            .collect()
    }

    fn join(&self, segments: &[String]) -> String {
        let mut out = self.destination_root.clone();
        for segment in segments.iter().filter(|s| !s.is_empty()) {
            out.push('/');
            out.push_str(segment.trim_matches('/'));
        }
        if out.is_empty() {
            out.push('/');
        }
        out
    }
}

fn tar_stem(name: &str) -> &str {
    name.strip_suffix(".tar.gz")
        .or_else(|| name.strip_suffix(".tgz"))
        .or_else(|| name.strip_suffix(".tar"))
        .unwrap_or(name)
}

impl PathMetadataProcessor for MirrorProcessor {
    fn doc(&self) -> &str {
        DEFAULT_DOC
    }

    fn archive_path(&self, item: &WorkItem) -> Result<String, PipelineError> {
        if item.source_file_name.is_empty() {
            return Err(PipelineError::mapping(format!(
                "work item {} has no source file name",
                item.id
            )));
        }
        let original = Path::new(&item.original_file_path);
        let parent = original.parent().ok_or_else(|| {
            PipelineError::mapping(format!("{} has no parent directory", original.display()))
        })?;
        let mut segments = self.relative_components(parent)?;

        if item.item_kind == ItemKind::Member {
            segments.push(tar_stem(&item.original_file_name).to_string());
            for part in item.source_file_name.split('/') {
                if part == ".." || part == "." {
                    return Err(PipelineError::mapping(format!(
                        "member {} escapes its tar",
                        item.source_file_name
                    )));
                }
                segments.push(part.to_string());
            }
        } else {
            segments.push(item.source_file_name.clone());
        }
        Ok(self.join(&segments))
    }

    fn metadata(&self, item: &WorkItem, destination: &str) -> Result<ArchiveMetadata, PipelineError> {
        let collection_path = destination
            .rsplit_once('/')
            .map(|(parent, _)| parent)
            .filter(|parent| !parent.is_empty() && *parent != self.destination_root)
            .map(str::to_string);

        let object = json!({
            "doc": item.doc,
            "kind": item.item_kind.to_string(),
            "original_path": item.original_file_path,
            "source_name": item.source_file_name,
            "size": item.filesize,
            "checksum": item.checksum,
            "tar_range": item.tar_range().map(|(start, end)| json!([start, end])),
            "tar_parts": item.tar_contents_count,
            "run_id": item.run_id,
        });

        let collection = collection_path.map(|path| CollectionSpec {
            metadata: json!({
                "doc": item.doc,
                "source_directory": Path::new(&item.original_file_path)
                    .parent()
                    .map(|p| p.to_string_lossy().into_owned()),
            }),
            path,
        });

        Ok(ArchiveMetadata { object, collection })
    }
}

/// Processors by `doc` name.
#[derive(Default, Clone)]
pub struct ProcessorRegistry {
    processors: HashMap<String, Arc<dyn PathMetadataProcessor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the mirror processor for the configured roots.
    pub fn with_defaults(config: &Config) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(MirrorProcessor::new(
            config.source_root.clone(),
            &config.destination_root,
        )));
        registry
    }

    pub fn register(&mut self, processor: Arc<dyn PathMetadataProcessor>) {
        self.processors
            .insert(processor.doc().to_string(), processor);
    }

    pub fn get(&self, doc: &str) -> Result<Arc<dyn PathMetadataProcessor>, PipelineError> {
        self.processors
            .get(doc)
            .cloned()
            .ok_or_else(|| PipelineError::mapping(format!("no path processor registered for {}", doc)))
    }
}
