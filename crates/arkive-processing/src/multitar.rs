//! Multi-tar split
//!
//! A very large flat directory is partitioned into bounded tar parts of
//! `files_per_tar` files each. Files are ordered by modification time (then name) so
//! that the `[start, end)` index range of every part is stable across runs, which lets
//! each part be reconciled against the records of earlier runs:
//!
//! | previous record                         | action                          |
//! |-----------------------------------------|---------------------------------|
//! | completed, same range                   | skip, keep the member list      |
//! | completed, different range              | insert an error item            |
//! | open, same range                        | reuse the record                |
//! | open, different range                   | insert an error item            |
//! | none                                    | tar the part, create an item    |
//!
//! With `verify_prev_upload = none` only open records of the current run are
//! considered.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use arkive_core::models::{ItemKind, NewWorkItem, StatusFilter, WorkItem};
use arkive_core::{ErrorClassExt, PipelineError, VerifyPrevUpload};
use chrono::Utc;

use crate::error::{ArchiveError, ArchiveResult};
use crate::fs::{ensure_readable, list_tar_members, tar_files};
use crate::preparer::{blocking, ArchivePreparer};

/// One planned tar part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartPlan {
    /// 1-based.
    pub part_number: usize,
    pub name: String,
    pub start: usize,
    pub end: usize,
    pub files: Vec<PathBuf>,
}

impl PartPlan {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    fn range(&self) -> (i32, i32) {
        (self.start as i32, self.end as i32)
    }

    fn member_names(&self) -> Vec<String> {
        self.files
            .iter()
            .map(|f| {
                f.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartOutcome {
    Skipped,
    Reused,
    Created,
    Mismatch,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SplitReport {
    pub expected_parts: usize,
    pub file_count: usize,
    /// Files covered by parts that were tarred now or already archived.
    pub tarred_files: usize,
    pub outcomes: Vec<(usize, PartOutcome)>,
    pub manifest: Option<WorkItem>,
}

impl SplitReport {
    pub fn accounted_parts(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| *o != PartOutcome::Mismatch)
            .count()
    }

    pub fn is_complete(&self) -> bool {
        self.accounted_parts() == self.expected_parts && self.tarred_files == self.file_count
    }
}

/// `<parent>_<dir>`, shared by the part tars and the contents manifest.
fn split_prefix(dir: &Path) -> String {
    let dir_name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "root".to_string());
    let parent_name = dir
        .parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "root".to_string());
    format!("{}_{}", parent_name, dir_name)
}

/// `<parent>_<dir>_part_<n>.tar`
pub fn part_name(dir: &Path, part_number: usize) -> String {
    format!("{}_part_{}.tar", split_prefix(dir), part_number)
}

/// Regular files directly inside `dir`, oldest first, ties broken by name.
pub fn sorted_files(dir: &Path) -> ArchiveResult<Vec<PathBuf>> {
    let mut files: Vec<(SystemTime, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| ArchiveError::io(dir, e))? {
        let entry = entry.map_err(|e| ArchiveError::io(dir, e))?;
        let metadata = entry.metadata().map_err(|e| ArchiveError::io(entry.path(), e))?;
        if metadata.is_file() {
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            files.push((modified, entry.path()));
        }
    }
    files.sort();
    Ok(files.into_iter().map(|(_, path)| path).collect())
}

pub fn plan_parts(dir: &Path, files: &[PathBuf], files_per_tar: usize) -> Vec<PartPlan> {
    let per_tar = files_per_tar.max(1);
    files
        .chunks(per_tar)
        .enumerate()
        .map(|(index, chunk)| {
            let start = index * per_tar;
            PartPlan {
                part_number: index + 1,
                name: part_name(dir, index + 1),
                start,
                end: start + chunk.len(),
                files: chunk.to_vec(),
            }
        })
        .collect()
}

/// Contents manifest with one section per part.
pub fn write_part_manifest(path: &Path, plans: &[PartPlan]) -> ArchiveResult<()> {
    let mut out = BufWriter::new(fs::File::create(path).map_err(|e| ArchiveError::io(path, e))?);
    for plan in plans {
        writeln!(out, "## {} [{}, {})", plan.name, plan.start, plan.end)
            .map_err(|e| ArchiveError::io(path, e))?;
        for name in plan.member_names() {
            writeln!(out, "{}", name).map_err(|e| ArchiveError::io(path, e))?;
        }
    }
    out.flush().map_err(|e| ArchiveError::io(path, e))
}

fn range_text(range: Option<(i32, i32)>) -> String {
    match range {
        Some((start, end)) => format!("[{}, {})", start, end),
        None => "no range".to_string(),
    }
}

impl ArchivePreparer {
    /// Split the item's directory into tar parts, reconcile them with earlier runs and
    /// enqueue the parts (and, once every part is accounted for, the contents manifest).
    ///
    /// A shortfall in tarred files or accounted parts is a verification failure of the
    /// directory item itself.
    #[tracing::instrument(skip(self, item), fields(work_item.id = %item.id))]
    pub async fn split_directory(&self, item: &mut WorkItem) -> Result<SplitReport, PipelineError> {
        let files_per_tar = self.config.archive.files_per_tar.ok_or_else(|| {
            PipelineError::mapping("directory split requested without files_per_tar")
        })?;
        let dir = PathBuf::from(&item.original_file_path);
        let work_dir = self.work_dir_for(&dir)?;

        let listing_dir = dir.clone();
        let files = blocking(move || {
            ensure_readable(&listing_dir)?;
            sorted_files(&listing_dir)
        })
        .await?;
        let plans = plan_parts(&dir, &files, files_per_tar);

        let mut report = SplitReport {
            expected_parts: plans.len(),
            file_count: files.len(),
            ..SplitReport::default()
        };

        item.tar_start_timestamp = Some(Utc::now());
        for plan in &plans {
            let outcome = self.reconcile_part(item, plan, &work_dir, plans.len()).await?;
            if outcome != PartOutcome::Mismatch {
                report.tarred_files += plan.len();
            }
            report.outcomes.push((plan.part_number, outcome));
        }
        item.tar_end_timestamp = Some(Utc::now());
        item.tar_contents_count = Some(plans.len() as i32);

        let manifest_path = work_dir.join(format!("{}_contents.txt", split_prefix(&dir)));
        let manifest_plans = plans.clone();
        let manifest_target = manifest_path.clone();
        let manifest_dir = work_dir.clone();
        blocking(move || {
            fs::create_dir_all(&manifest_dir).map_err(|e| ArchiveError::io(&manifest_dir, e))?;
            write_part_manifest(&manifest_target, &manifest_plans)
        })
        .await?;

        if report.accounted_parts() == report.expected_parts {
            report.manifest = self.ensure_manifest_item(item, &manifest_path).await?;
        }

        tracing::info!(
            parts = report.expected_parts,
            accounted = report.accounted_parts(),
            files = report.file_count,
            tarred = report.tarred_files,
            "Directory split reconciled"
        );

        if !report.is_complete() {
            return Err(PipelineError::verification(format!(
                "split of {} incomplete: {} of {} files tarred, {} of {} parts accounted for",
                item.original_file_path,
                report.tarred_files,
                report.file_count,
                report.accounted_parts(),
                report.expected_parts
            )));
        }
        Ok(report)
    }

    async fn reconcile_part(
        &self,
        parent: &WorkItem,
        plan: &PartPlan,
        work_dir: &Path,
        part_count: usize,
    ) -> Result<PartOutcome, PipelineError> {
        let dir = &parent.original_file_path;
        let range = plan.range();

        if self.config.archive.verify_prev_upload == VerifyPrevUpload::Full {
            let completed = self
                .store
                .find_latest_by_path(dir, ItemKind::TarPart, Some(&plan.name), StatusFilter::Completed)
                .await
                .workflow()?;
            if let Some(done) = completed {
                if done.tar_range() == Some(range) {
                    tracing::debug!(part = %plan.name, "Part already archived");
                    return Ok(PartOutcome::Skipped);
                }
                self.record_mismatch(parent, plan, part_count, done.tar_range())
                    .await?;
                return Ok(PartOutcome::Mismatch);
            }
        }

        let open = self
            .store
            .find_latest_by_path(dir, ItemKind::TarPart, Some(&plan.name), StatusFilter::NotCompleted)
            .await
            .workflow()?
            .filter(|existing| {
                self.config.archive.verify_prev_upload == VerifyPrevUpload::Full
                    || existing.run_id == parent.run_id
            });

        if let Some(mut existing) = open {
            if existing.tar_range() != Some(range) {
                self.record_mismatch(parent, plan, part_count, existing.tar_range())
                    .await?;
                return Ok(PartOutcome::Mismatch);
            }

            let tar_path = self.ensure_part_tar(plan, work_dir).await?;
            if existing.run_id != parent.run_id || existing.is_failed() {
                existing.resume_for_run(parent.run_id);
            }
            existing.source_file_path = tar_path.to_string_lossy().into_owned();
            existing.filesize = Some(part_size(&tar_path)?);
            existing.tar_contents_count = Some(part_count as i32);
            self.store.update_work_item(&existing).await.workflow()?;
            self.queue.send(existing.id).await.workflow()?;
            tracing::info!(work_item.id = %existing.id, part = %plan.name, "Part record reused");
            return Ok(PartOutcome::Reused);
        }

        let tar_path = self.ensure_part_tar(plan, work_dir).await?;
        let mut new = NewWorkItem::for_path(parent.run_id, &parent.doc, ItemKind::TarPart, dir)
            .with_source(&tar_path.to_string_lossy(), &plan.name)
            .with_tar_range(range.0, range.1, part_count as i32);
        new.filesize = Some(part_size(&tar_path)?);
        let created = self.store.create_work_item(new).await.workflow()?;
        self.queue.send(created.id).await.workflow()?;
        tracing::info!(work_item.id = %created.id, part = %plan.name, "Part created");
        Ok(PartOutcome::Created)
    }

    async fn record_mismatch(
        &self,
        parent: &WorkItem,
        plan: &PartPlan,
        part_count: usize,
        previous: Option<(i32, i32)>,
    ) -> Result<(), PipelineError> {
        let (start, end) = plan.range();
        let message = format!(
            "tar part {} range mismatch: previous {}, expected [{}, {})",
            plan.name,
            range_text(previous),
            start,
            end
        );
        tracing::error!(part = %plan.name, "{}", message);
        let error_item = NewWorkItem::for_path(
            parent.run_id,
            &parent.doc,
            ItemKind::TarPart,
            &parent.original_file_path,
        )
        .with_source("", &plan.name)
        .with_tar_range(start, end, part_count as i32)
        .failed_with_error(message);
        self.store.create_work_item(error_item).await.workflow()?;
        Ok(())
    }

    /// Tar the part unless a complete tar for it is already in the work tree.
    async fn ensure_part_tar(&self, plan: &PartPlan, work_dir: &Path) -> Result<PathBuf, PipelineError> {
        let tar_path = work_dir.join(&plan.name);
        let dir = plan
            .files
            .first()
            .and_then(|f| f.parent())
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let files = plan.files.clone();
        let target = tar_path.clone();
        let work_dir = work_dir.to_path_buf();

        blocking(move || {
            if target.exists() {
                if let Ok(members) = list_tar_members(&target) {
                    if members.len() == files.len() {
                        tracing::debug!(path = %target.display(), "Part tar already present");
                        return Ok(());
                    }
                }
            }
            fs::create_dir_all(&work_dir).map_err(|e| ArchiveError::io(&work_dir, e))?;
            tar_files(&dir, &files, &target).map(|_| ())
        })
        .await?;
        Ok(tar_path)
    }
}

fn part_size(path: &Path) -> Result<i64, PipelineError> {
    fs::metadata(path)
        .map(|m| m.len() as i64)
        .map_err(|e| ArchiveError::io(path, e).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preparer::tests::Fixture;
    use arkive_core::constants::STATUS_COMPLETED;
    use arkive_db::WorkItemStore;
    use std::collections::HashSet;
    use uuid::Uuid;

    fn make_dir(fx: &Fixture, count: usize) -> PathBuf {
        let dir = fx.source().join("lab/scans");
        fs::create_dir_all(&dir).unwrap();
        for i in 0..count {
            fs::write(dir.join(format!("f{:02}.dat", i)), format!("{}", i)).unwrap();
        }
        dir
    }

    #[test]
    fn part_names_follow_parent_and_dir() {
        assert_eq!(part_name(Path::new("/data/lab/scans"), 3), "lab_scans_part_3.tar");
    }

    #[test]
    fn plan_partitions_without_overlap() {
        let files: Vec<PathBuf> = (0..25).map(|i| PathBuf::from(format!("/d/x/{}", i))).collect();
        let plans = plan_parts(Path::new("/d/x"), &files, 10);
        let ranges: Vec<(usize, usize)> = plans.iter().map(|p| (p.start, p.end)).collect();
        assert_eq!(ranges, vec![(0, 10), (10, 20), (20, 25)]);
        assert_eq!(plans.iter().map(|p| p.files.len()).sum::<usize>(), 25);
    }

    #[tokio::test]
    async fn split_creates_parts_and_manifest() {
        let mut fx = Fixture::new();
        fx.config.archive.files_per_tar = Some(10);
        let dir = make_dir(&fx, 25);
        let mut parent = fx.item(ItemKind::Directory, &dir).await;

        let report = fx.preparer().split_directory(&mut parent).await.unwrap();

        assert_eq!(report.expected_parts, 3);
        assert_eq!(report.tarred_files, 25);
        assert!(report
            .outcomes
            .iter()
            .all(|(_, o)| *o == PartOutcome::Created));
        assert_eq!(parent.tar_contents_count, Some(3));

        let items = fx.store.all_items().await;
        let parts: Vec<&WorkItem> = items
            .iter()
            .filter(|i| i.item_kind == ItemKind::TarPart)
            .collect();
        let mut ranges: Vec<(i32, i32)> = parts.iter().filter_map(|p| p.tar_range()).collect();
        ranges.sort();
        assert_eq!(ranges, vec![(0, 10), (10, 20), (20, 25)]);

        let manifest = report.manifest.unwrap();
        let text = fs::read_to_string(&manifest.source_file_path).unwrap();
        let names: Vec<&str> = text.lines().filter(|l| !l.starts_with("## ")).collect();
        assert_eq!(names.len(), 25);
        assert_eq!(names.iter().collect::<HashSet<_>>().len(), 25);
        assert_eq!(text.lines().filter(|l| l.starts_with("## ")).count(), 3);

        // three parts plus the manifest
        assert_eq!(fx.queue.queued_ids().await.len(), 4);
    }

    #[tokio::test]
    async fn completed_parts_are_skipped_on_rerun() {
        let mut fx = Fixture::new();
        fx.config.archive.files_per_tar = Some(10);
        let dir = make_dir(&fx, 25);
        let mut parent = fx.item(ItemKind::Directory, &dir).await;
        fx.preparer().split_directory(&mut parent).await.unwrap();

        for mut item in fx.store.all_items().await {
            item.status = STATUS_COMPLETED.to_string();
            fx.store.update_work_item(&item).await.unwrap();
        }

        let mut next = parent.clone();
        next.resume_for_run(Uuid::new_v4());
        let report = fx.preparer().split_directory(&mut next).await.unwrap();
        assert!(report
            .outcomes
            .iter()
            .all(|(_, o)| *o == PartOutcome::Skipped));
        assert!(report.is_complete());
        assert!(report.manifest.is_none());
    }

    #[tokio::test]
    async fn mismatched_completed_range_records_error_and_fails_parent() {
        let mut fx = Fixture::new();
        fx.config.archive.files_per_tar = Some(10);
        let dir = make_dir(&fx, 25);
        let parent = fx.item(ItemKind::Directory, &dir).await;

        let stale = NewWorkItem::for_path(
            Uuid::new_v4(),
            "mirror",
            ItemKind::TarPart,
            &parent.original_file_path,
        )
        .with_source("/gone", "lab_scans_part_2.tar")
        .with_tar_range(10, 18, 3);
        let mut stale = fx.store.create_work_item(stale).await.unwrap();
        stale.status = STATUS_COMPLETED.to_string();
        fx.store.update_work_item(&stale).await.unwrap();

        let mut current = parent.clone();
        let err = fx
            .preparer()
            .split_directory(&mut current)
            .await
            .unwrap_err();
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("2 of 3 parts"));

        let errors: Vec<WorkItem> = fx
            .store
            .all_items()
            .await
            .into_iter()
            .filter(|i| i.is_failed())
            .collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].error.as_deref().unwrap().contains("range mismatch"));
        assert_eq!(fx.queue.queued_ids().await.len(), 2);
    }

    #[tokio::test]
    async fn open_parts_of_the_same_run_are_reused() {
        let mut fx = Fixture::new();
        fx.config.archive.files_per_tar = Some(10);
        let dir = make_dir(&fx, 12);
        let mut parent = fx.item(ItemKind::Directory, &dir).await;
        let preparer = fx.preparer();

        preparer.split_directory(&mut parent).await.unwrap();
        let before = fx.store.all_items().await.len();
        let report = preparer.split_directory(&mut parent).await.unwrap();

        assert!(report
            .outcomes
            .iter()
            .all(|(_, o)| *o == PartOutcome::Reused));
        assert_eq!(fx.store.all_items().await.len(), before);
    }
}
