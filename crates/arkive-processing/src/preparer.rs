//! Archive preparer
//!
//! Turns a work item's original path into the working copy that is uploaded: a tar
//! (optionally gzip-compressed) of a directory, a gzip of a single file, or a member
//! extracted from a previously archived tar. Working copies live under the work root in
//! a subtree that mirrors the source tree.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arkive_core::hash::md5_file;
use arkive_core::models::{ItemKind, NewWorkItem, StatusFilter, WorkItem};
use arkive_core::{Config, ErrorClassExt, PipelineError};
use arkive_db::{WorkItemStore, WorkQueue};
use chrono::Utc;

use crate::contents::enumerate_contents;
use crate::error::{ArchiveError, ArchiveResult};
use crate::fs::{
    ensure_readable, extract_member, gzip_file, is_within, mirror_path,
    safe_remove_file_and_empty_parents, tar_directory, RemovalReport,
};

pub(crate) async fn blocking<T, F>(task: F) -> Result<T, PipelineError>
where
    T: Send + 'static,
    F: FnOnce() -> ArchiveResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| PipelineError::workflow(anyhow::anyhow!("blocking task failed: {}", e)))?
        .map_err(PipelineError::from)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn file_size(path: &Path) -> ArchiveResult<i64> {
    std::fs::metadata(path)
        .map(|m| m.len() as i64)
        .map_err(|e| ArchiveError::io(path, e))
}

pub struct ArchivePreparer {
    pub(crate) config: Arc<Config>,
    pub(crate) store: Arc<dyn WorkItemStore>,
    pub(crate) queue: Arc<dyn WorkQueue>,
}

impl ArchivePreparer {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn WorkItemStore>,
        queue: Arc<dyn WorkQueue>,
    ) -> Self {
        Self {
            config,
            store,
            queue,
        }
    }

    pub(crate) fn work_dir_for(&self, source: &Path) -> ArchiveResult<PathBuf> {
        mirror_path(&self.config.source_root, &self.config.work_root, source)
    }

    /// Tar the item's directory into the work tree, gzip-compressed when enabled.
    #[tracing::instrument(skip(self, item), fields(work_item.id = %item.id))]
    pub async fn tar(&self, item: &mut WorkItem) -> Result<(), PipelineError> {
        let source = PathBuf::from(&item.original_file_path);
        let parent = source.parent().unwrap_or(&source).to_path_buf();
        let dest_dir = self.work_dir_for(&parent)?;
        let extension = if self.config.archive.compress {
            "tar.gz"
        } else {
            "tar"
        };
        let dest = dest_dir.join(format!("{}.{}", file_name(&source), extension));
        let exclude = self.config.archive.exclude_folders_from_tar.clone();
        let gzip = self.config.archive.compress;

        item.tar_start_timestamp = Some(Utc::now());
        let tar_dest = dest.clone();
        let stats = blocking(move || {
            ensure_readable(&source)?;
            std::fs::create_dir_all(&dest_dir).map_err(|e| ArchiveError::io(&dest_dir, e))?;
            tar_directory(&source, &tar_dest, &exclude, gzip)
        })
        .await?;
        item.tar_end_timestamp = Some(Utc::now());

        item.filesize = Some(file_size(&dest)?);
        item.source_file_name = file_name(&dest);
        item.source_file_path = dest.to_string_lossy().into_owned();

        tracing::info!(
            files = stats.files,
            size_bytes = item.filesize.unwrap_or(0),
            path = %item.source_file_path,
            "Directory archived"
        );
        Ok(())
    }

    /// Gzip a single file into the work tree.
    #[tracing::instrument(skip(self, item), fields(work_item.id = %item.id))]
    pub async fn compress(&self, item: &mut WorkItem) -> Result<(), PipelineError> {
        let source = PathBuf::from(&item.original_file_path);
        let dest = self.work_dir_for(&source)?;
        let dest = dest.with_file_name(format!("{}.gz", file_name(&source)));

        item.tar_start_timestamp = Some(Utc::now());
        let gz_dest = dest.clone();
        let size = blocking(move || {
            ensure_readable(&source)?;
            if let Some(dir) = gz_dest.parent() {
                std::fs::create_dir_all(dir).map_err(|e| ArchiveError::io(dir, e))?;
            }
            gzip_file(&source, &gz_dest)
        })
        .await?;
        item.tar_end_timestamp = Some(Utc::now());

        item.filesize = Some(size as i64);
        item.source_file_name = file_name(&dest);
        item.source_file_path = dest.to_string_lossy().into_owned();
        tracing::info!(size_bytes = size, "File compressed");
        Ok(())
    }

    /// Extract the item's member from its tar into the work tree, then remove the
    /// extracted copies of members that this run already completed.
    #[tracing::instrument(skip(self, item), fields(work_item.id = %item.id, member = %item.source_file_name))]
    pub async fn untar(&self, item: &mut WorkItem) -> Result<(), PipelineError> {
        let tar_path = PathBuf::from(&item.original_file_path);
        let dest_dir = self.member_dir(&tar_path)?;
        let member = item.source_file_name.clone();

        item.tar_start_timestamp = Some(Utc::now());
        let extract_dir = dest_dir.clone();
        let (path, extracted) = blocking(move || {
            ensure_readable(&tar_path)?;
            extract_member(&tar_path, &member, &extract_dir)
        })
        .await?;
        item.tar_end_timestamp = Some(Utc::now());

        item.filesize = Some(file_size(&path)?);
        item.source_file_path = path.to_string_lossy().into_owned();
        if extracted {
            tracing::info!(path = %item.source_file_path, "Member extracted");
        } else {
            tracing::debug!(path = %item.source_file_path, "Member already present");
        }

        let removed = self.remove_completed_members(item).await?;
        if removed > 0 {
            tracing::info!(removed, "Removed extracted members already archived in this run");
        }
        Ok(())
    }

    /// Directory the members of `tar_path` are extracted into.
    pub(crate) fn member_dir(&self, tar_path: &Path) -> ArchiveResult<PathBuf> {
        let name = file_name(tar_path);
        let stem = name
            .strip_suffix(".tar.gz")
            .or_else(|| name.strip_suffix(".tgz"))
            .or_else(|| name.strip_suffix(".tar"))
            .unwrap_or(&name)
            .to_string();
        let parent = tar_path.parent().unwrap_or(tar_path);
        Ok(self.work_dir_for(parent)?.join(stem))
    }

    async fn remove_completed_members(&self, item: &WorkItem) -> Result<usize, PipelineError> {
        let siblings = self
            .store
            .list_run_items(item.run_id)
            .await
            .workflow()?;
        let work_root = self.config.work_root.clone();
        let paths: Vec<PathBuf> = siblings
            .into_iter()
            .filter(|s| {
                s.id != item.id
                    && s.item_kind == ItemKind::Member
                    && s.original_file_path == item.original_file_path
                    && s.is_completed()
            })
            .map(|s| PathBuf::from(s.source_file_path))
            .filter(|p| is_within(&work_root, p))
            .collect();
        if paths.is_empty() {
            return Ok(0);
        }

        blocking(move || {
            let mut removed = 0;
            for path in paths {
                let report = safe_remove_file_and_empty_parents(&work_root, &path, false)?;
                if report.removed_file {
                    removed += 1;
                }
            }
            Ok(removed)
        })
        .await
    }

    /// Write the included/excluded listings of a directory archived whole and enqueue
    /// them as manifest items.
    #[tracing::instrument(skip(self, item), fields(work_item.id = %item.id))]
    pub async fn write_contents(&self, item: &WorkItem) -> Result<Vec<WorkItem>, PipelineError> {
        let source = PathBuf::from(&item.original_file_path);
        let parent = source.parent().unwrap_or(&source).to_path_buf();
        let dest_dir = self.work_dir_for(&parent)?;
        let name = file_name(&source);
        let included = dest_dir.join(format!("{}_contents.txt", name));
        let excluded = dest_dir.join(format!("{}_excluded.txt", name));
        let exclude = self.config.archive.exclude_folders_from_tar.clone();

        let (inc, exc) = (included.clone(), excluded.clone());
        let report = blocking(move || {
            let report = enumerate_contents(&source, &exclude)?;
            std::fs::create_dir_all(&dest_dir).map_err(|e| ArchiveError::io(&dest_dir, e))?;
            report.write_manifests(&inc, &exc)?;
            Ok(report)
        })
        .await?;

        tracing::info!(
            included = report.included.len(),
            excluded = report.excluded.len(),
            "Contents manifests written"
        );

        let mut manifests = Vec::new();
        for path in [included, excluded] {
            if let Some(manifest) = self.ensure_manifest_item(item, &path).await? {
                manifests.push(manifest);
            }
        }
        Ok(manifests)
    }

    /// Track `manifest_path` as a manifest work item of `parent` and enqueue it, unless
    /// an identical manifest was already archived.
    pub(crate) async fn ensure_manifest_item(
        &self,
        parent: &WorkItem,
        manifest_path: &Path,
    ) -> Result<Option<WorkItem>, PipelineError> {
        let name = file_name(manifest_path);
        let path_str = manifest_path.to_string_lossy().into_owned();

        let completed = self
            .store
            .find_latest_by_path(
                &parent.original_file_path,
                ItemKind::Manifest,
                Some(&name),
                StatusFilter::Completed,
            )
            .await
            .workflow()?;
        if completed.is_some() {
            tracing::debug!(manifest = %name, "Manifest already archived");
            return Ok(None);
        }

        let open = self
            .store
            .find_latest_by_path(
                &parent.original_file_path,
                ItemKind::Manifest,
                Some(&name),
                StatusFilter::NotCompleted,
            )
            .await
            .workflow()?;
        let size = file_size(manifest_path)?;

        let manifest = match open {
            Some(mut existing) => {
                existing.resume_for_run(parent.run_id);
                existing.source_file_path = path_str;
                existing.filesize = Some(size);
                self.store.update_work_item(&existing).await.workflow()?;
                existing
            }
            _ => {
                let mut new = NewWorkItem::for_path(
                    parent.run_id,
                    &parent.doc,
                    ItemKind::Manifest,
                    &parent.original_file_path,
                )
                .with_source(&path_str, &name);
                new.filesize = Some(size);
                self.store.create_work_item(new).await.workflow()?
            }
        };

        self.queue.send(manifest.id).await.workflow()?;
        tracing::info!(work_item.id = %manifest.id, manifest = %name, "Manifest enqueued");
        Ok(Some(manifest))
    }

    /// MD5 of the prepared working copy.
    #[tracing::instrument(skip(self, item), fields(work_item.id = %item.id))]
    pub async fn checksum(&self, item: &mut WorkItem) -> Result<(), PipelineError> {
        let path = PathBuf::from(&item.source_file_path);
        let digest = tokio::task::spawn_blocking(move || md5_file(&path))
            .await
            .map_err(|e| PipelineError::workflow(anyhow::anyhow!("checksum task failed: {}", e)))?
            .workflow()?;
        tracing::debug!(checksum = %digest, "Checksum computed");
        item.checksum = Some(digest);
        Ok(())
    }

    /// Delete the working copy and any ancestors left empty, within the work root.
    /// Items uploaded straight from the source tree have nothing to clean up.
    #[tracing::instrument(skip(self, item), fields(work_item.id = %item.id))]
    pub async fn cleanup(&self, item: &WorkItem) -> Result<RemovalReport, PipelineError> {
        let path = PathBuf::from(&item.source_file_path);
        let work_root = self.config.work_root.clone();
        if !is_within(&work_root, &path) {
            tracing::debug!(path = %path.display(), "Working copy outside work root, nothing to clean");
            return Ok(RemovalReport::default());
        }

        let dry_run = self.config.cleanup_dry_run;
        let report =
            blocking(move || safe_remove_file_and_empty_parents(&work_root, &path, dry_run)).await?;
        tracing::info!(
            removed_file = report.removed_file,
            removed_dirs = report.removed_dirs.len(),
            dry_run,
            "Working copy cleaned up"
        );
        Ok(report)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use arkive_core::constants::STATUS_COMPLETED;
    use arkive_db::{MemoryWorkItemStore, MemoryWorkQueue};
    use std::collections::HashMap;
    use uuid::Uuid;

    pub(crate) struct Fixture {
        pub tmp: tempfile::TempDir,
        pub config: Config,
        pub store: Arc<MemoryWorkItemStore>,
        pub queue: Arc<MemoryWorkQueue>,
    }

    impl Fixture {
        pub fn new() -> Self {
            let tmp = tempfile::tempdir().unwrap();
            let source = tmp.path().join("source");
            let work = tmp.path().join("work");
            std::fs::create_dir_all(&source).unwrap();
            std::fs::create_dir_all(&work).unwrap();
            let vars: HashMap<&str, String> = HashMap::from([
                ("ARKIVE_SOURCE_ROOT", source.to_string_lossy().into_owned()),
                ("ARKIVE_WORK_ROOT", work.to_string_lossy().into_owned()),
            ]);
            let config = Config::from_lookup(|k| vars.get(k).cloned()).unwrap();
            Self {
                tmp,
                config,
                store: Arc::new(MemoryWorkItemStore::new()),
                queue: Arc::new(MemoryWorkQueue::new("test")),
            }
        }

        pub fn source(&self) -> PathBuf {
            self.config.source_root.clone()
        }

        pub fn preparer(&self) -> ArchivePreparer {
            ArchivePreparer::new(
                Arc::new(self.config.clone()),
                self.store.clone(),
                self.queue.clone(),
            )
        }

        pub async fn item(&self, kind: ItemKind, path: &Path) -> WorkItem {
            self.store
                .create_work_item(NewWorkItem::for_path(
                    Uuid::new_v4(),
                    "mirror",
                    kind,
                    &path.to_string_lossy(),
                ))
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn tar_writes_into_mirrored_work_tree() {
        let mut fx = Fixture::new();
        fx.config.archive.compress = true;
        let dir = fx.source().join("proj/run1");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("a.dat"), "aaaa").unwrap();

        let mut item = fx.item(ItemKind::Directory, &dir).await;
        fx.preparer().tar(&mut item).await.unwrap();

        let expected = fx.config.work_root.join("proj/run1.tar.gz");
        assert_eq!(item.source_file_path, expected.to_string_lossy());
        assert_eq!(item.source_file_name, "run1.tar.gz");
        assert!(expected.exists());
        assert!(item.filesize.unwrap() > 0);
        assert!(item.tar_end_timestamp >= item.tar_start_timestamp);
    }

    #[tokio::test]
    async fn tar_outside_source_root_is_terminal() {
        let fx = Fixture::new();
        let elsewhere = fx.tmp.path().join("elsewhere");
        std::fs::create_dir_all(&elsewhere).unwrap();
        let mut item = fx.item(ItemKind::Directory, &elsewhere).await;

        let err = fx.preparer().tar(&mut item).await.unwrap_err();
        assert!(!err.is_recoverable());
    }

    #[tokio::test]
    async fn untar_extracts_member_and_removes_completed_siblings() {
        let fx = Fixture::new();
        let staging = fx.tmp.path().join("staging");
        std::fs::create_dir_all(&staging).unwrap();
        std::fs::write(staging.join("m1.dat"), "one").unwrap();
        std::fs::write(staging.join("m2.dat"), "two").unwrap();
        let tar_path = fx.source().join("old.tar");
        crate::fs::tar_files(
            &staging,
            &[staging.join("m1.dat"), staging.join("m2.dat")],
            &tar_path,
        )
        .unwrap();

        let preparer = fx.preparer();
        let run = Uuid::new_v4();
        let tar_str = tar_path.to_string_lossy().into_owned();

        let mut first = fx
            .store
            .create_work_item(
                NewWorkItem::for_path(run, "mirror", ItemKind::Member, &tar_str)
                    .with_source(&tar_str, "m1.dat"),
            )
            .await
            .unwrap();
        preparer.untar(&mut first).await.unwrap();
        let m1 = PathBuf::from(&first.source_file_path);
        assert_eq!(std::fs::read_to_string(&m1).unwrap(), "one");
        first.status = STATUS_COMPLETED.to_string();
        fx.store.update_work_item(&first).await.unwrap();

        let mut second = fx
            .store
            .create_work_item(
                NewWorkItem::for_path(run, "mirror", ItemKind::Member, &tar_str)
                    .with_source(&tar_str, "m2.dat"),
            )
            .await
            .unwrap();
        preparer.untar(&mut second).await.unwrap();

        assert!(!m1.exists());
        assert!(PathBuf::from(&second.source_file_path).exists());
        assert!(second.source_file_path.ends_with("old/m2.dat"));
    }

    #[tokio::test]
    async fn contents_manifests_are_enqueued_once() {
        let fx = Fixture::new();
        let dir = fx.source().join("d");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("f.txt"), "f").unwrap();
        let item = fx.item(ItemKind::Directory, &dir).await;
        let preparer = fx.preparer();

        let manifests = preparer.write_contents(&item).await.unwrap();
        assert_eq!(manifests.len(), 2);
        assert!(manifests.iter().all(|m| m.item_kind == ItemKind::Manifest));

        let again = preparer.write_contents(&item).await.unwrap();
        assert_eq!(
            again.iter().map(|m| m.id).collect::<Vec<_>>(),
            manifests.iter().map(|m| m.id).collect::<Vec<_>>()
        );
        assert_eq!(fx.queue.queued_ids().await.len(), 2);
    }

    #[tokio::test]
    async fn checksum_and_cleanup_of_work_copy() {
        let fx = Fixture::new();
        let work_file = fx.config.work_root.join("a/b/x.tar");
        std::fs::create_dir_all(work_file.parent().unwrap()).unwrap();
        std::fs::write(&work_file, "abc").unwrap();
        let mut item = fx.item(ItemKind::Directory, &fx.source().join("a/b/x")).await;
        item.source_file_path = work_file.to_string_lossy().into_owned();

        let preparer = fx.preparer();
        preparer.checksum(&mut item).await.unwrap();
        assert_eq!(
            item.checksum.as_deref(),
            Some("900150983cd24fb0d6963f7d28e17f72")
        );

        let report = preparer.cleanup(&item).await.unwrap();
        assert!(report.removed_file);
        assert!(!fx.config.work_root.join("a").exists());
        assert!(fx.config.work_root.exists());
    }

    #[tokio::test]
    async fn cleanup_never_touches_source_files() {
        let fx = Fixture::new();
        let source_file = fx.source().join("keep.dat");
        std::fs::write(&source_file, "k").unwrap();
        let item = fx.item(ItemKind::File, &source_file).await;

        let report = fx.preparer().cleanup(&item).await.unwrap();
        assert!(!report.removed_file);
        assert!(source_file.exists());
    }
}
