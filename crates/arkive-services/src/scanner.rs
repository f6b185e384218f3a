//! Candidate scanner
//!
//! Walks the source root, selects candidates (files, directories or tar members),
//! applies the glob filter, the freshness guard and the required-file gates, and turns
//! every surviving candidate into exactly one queued work item: a new one, or an
//! existing record resumed under the current run.
//!
//! The scan is a single sequential pass. Filesystem enumeration runs on the blocking
//! pool; record lookups and queueing happen afterwards, one candidate at a time.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::{Context, Result};
use arkive_core::models::{ItemKind, NewWorkItem, RunInfo, StatusFilter, WorkItem};
use arkive_core::{Config, ScanMode};
use arkive_db::{WorkItemStore, WorkQueue};
use arkive_processing::fs::{list_tar_members, relative_str};
use arkive_processing::{ArchiveError, ArchiveResult, GlobFilter};
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::notifier::Notifier;

/// Outcome of the directory gate for one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gate {
    Passed,
    MissingFile(PathBuf),
    MissingExtension { dir: PathBuf, extension: String },
}

#[derive(Debug, Clone)]
pub struct Candidate {
    pub path: PathBuf,
    pub kind: ItemKind,
    /// Member name when the candidate is an entry of a tar.
    pub member: Option<String>,
    pub size: Option<u64>,
    /// Newest modification time of the candidate (of its whole tree for directories).
    pub modified: Option<DateTime<Utc>>,
    pub gate: Gate,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub candidates: usize,
    pub created: usize,
    pub resumed: usize,
    pub replaced: usize,
    pub skipped_completed: usize,
    pub skipped_fresh: usize,
    pub skipped_gate: usize,
    /// Candidates recorded as completed-with-error because of a failed gate.
    pub flagged: usize,
}

impl ScanReport {
    pub fn enqueued(&self) -> usize {
        self.created + self.resumed + self.replaced
    }
}

enum Disposition {
    Created,
    Resumed,
    Replaced,
    Skipped,
}

pub struct CandidateScanner {
    config: Arc<Config>,
    store: Arc<dyn WorkItemStore>,
    queue: Arc<dyn WorkQueue>,
    notifier: Arc<dyn Notifier>,
}

impl CandidateScanner {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn WorkItemStore>,
        queue: Arc<dyn WorkQueue>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            store,
            queue,
            notifier,
        }
    }

    /// One scanning pass for `run_id`. The run record is created if it does not exist.
    #[tracing::instrument(skip(self), fields(source_root = %self.config.source_root.display()))]
    pub async fn scan(&self, run_id: Uuid) -> Result<ScanReport> {
        if self.store.get_run(run_id).await?.is_none() {
            self.store.create_run(&RunInfo::start(run_id)).await?;
            tracing::info!(%run_id, "Run started");
        }

        let config = self.config.clone();
        let candidates = tokio::task::spawn_blocking(move || enumerate(&config))
            .await
            .context("Candidate enumeration task failed")??;

        let mut report = ScanReport {
            candidates: candidates.len(),
            ..ScanReport::default()
        };
        let fresh_cutoff = self
            .config
            .scan
            .skip_modified_within_days
            .map(|days| Utc::now() - Duration::days(i64::from(days)));

        // Gate directories already reported during this pass.
        let mut notified_dirs: HashSet<PathBuf> = HashSet::new();

        for candidate in &candidates {
            if let (Some(cutoff), Some(modified)) = (fresh_cutoff, candidate.modified) {
                if modified > cutoff {
                    tracing::debug!(path = %candidate.path.display(), "Modified too recently, skipped");
                    report.skipped_fresh += 1;
                    continue;
                }
            }

            match &candidate.gate {
                Gate::Passed => match self.enqueue(run_id, candidate).await? {
                    Disposition::Created => report.created += 1,
                    Disposition::Resumed => report.resumed += 1,
                    Disposition::Replaced => report.replaced += 1,
                    Disposition::Skipped => report.skipped_completed += 1,
                },
                Gate::MissingFile(required) => {
                    tracing::info!(
                        path = %candidate.path.display(),
                        required = %required.display(),
                        "Required file missing, skipped"
                    );
                    report.skipped_gate += 1;
                }
                Gate::MissingExtension { dir, extension } => {
                    let message = format!(
                        "no .{} file found in {}, {} not archived",
                        extension,
                        dir.display(),
                        candidate.path.display()
                    );
                    if self.flag(run_id, candidate, &message).await? {
                        report.flagged += 1;
                        if notified_dirs.insert(dir.clone()) {
                            self.notify_gate_failure(dir, extension).await;
                        }
                    } else {
                        report.skipped_gate += 1;
                    }
                }
            }
        }

        tracing::info!(
            %run_id,
            candidates = report.candidates,
            created = report.created,
            resumed = report.resumed,
            replaced = report.replaced,
            skipped = report.skipped_completed,
            flagged = report.flagged,
            "Scan finished"
        );
        Ok(report)
    }

    async fn enqueue(&self, run_id: Uuid, candidate: &Candidate) -> Result<Disposition> {
        let path = candidate.path.to_string_lossy();
        let member = candidate.member.as_deref();

        // Completed records carrying an error are gate markers, not archived copies.
        let completed = self
            .store
            .find_latest_by_path(&path, candidate.kind, member, StatusFilter::Completed)
            .await?
            .filter(|done| done.error.is_none());

        if let Some(done) = completed {
            let archived_at = done.upload_start_timestamp.or(done.start_timestamp);
            let modified_since = matches!(
                (candidate.modified, archived_at),
                (Some(modified), Some(at)) if modified > at
            );
            if self.config.scan.replace_modified_files && modified_since {
                let id = done.id;
                self.resume(run_id, done, true).await?;
                tracing::info!(work_item.id = %id, path = %path, "Modified since upload, replacing");
                return Ok(Disposition::Replaced);
            }
            tracing::debug!(work_item.id = %done.id, path = %path, "Already archived");
            return Ok(Disposition::Skipped);
        }

        let open = self
            .store
            .find_latest_by_path(&path, candidate.kind, member, StatusFilter::NotCompleted)
            .await?;
        if let Some(existing) = open {
            let id = existing.id;
            self.resume(run_id, existing, false).await?;
            tracing::info!(work_item.id = %id, path = %path, "Incomplete record resumed");
            return Ok(Disposition::Resumed);
        }

        let created = self.store.create_work_item(self.new_item(run_id, candidate)).await?;
        self.queue.send(created.id).await?;
        tracing::info!(work_item.id = %created.id, path = %path, kind = %candidate.kind, "Work item created");
        Ok(Disposition::Created)
    }

    fn new_item(&self, run_id: Uuid, candidate: &Candidate) -> NewWorkItem {
        let path = candidate.path.to_string_lossy();
        let mut item = NewWorkItem::for_path(run_id, &self.config.scan.doc, candidate.kind, &path);
        if let Some(member) = &candidate.member {
            item = item.with_source(&path, member);
        }
        item.filesize = candidate.size.map(|s| s as i64);
        item
    }

    async fn resume(&self, run_id: Uuid, mut item: WorkItem, replace: bool) -> Result<()> {
        item.resume_for_run(run_id);
        self.store.delete_metadata(item.id).await?;
        if replace {
            self.store.clear_task_marks(item.id).await?;
            item.upload_start_timestamp = None;
            item.upload_end_timestamp = None;
        }
        self.store.update_work_item(&item).await?;
        self.queue.send(item.id).await?;
        Ok(())
    }

    /// Record a gate failure as a completed item with an error. Returns `false` when
    /// the same failure was already recorded.
    async fn flag(&self, run_id: Uuid, candidate: &Candidate, message: &str) -> Result<bool> {
        let path = candidate.path.to_string_lossy();
        let previous = self
            .store
            .find_latest_by_path(
                &path,
                candidate.kind,
                candidate.member.as_deref(),
                StatusFilter::Completed,
            )
            .await?;
        if previous.and_then(|p| p.error).as_deref() == Some(message) {
            tracing::debug!(path = %path, "Gate failure already reported");
            return Ok(false);
        }

        let marker = self
            .new_item(run_id, candidate)
            .completed_with_error(message);
        let created = self.store.create_work_item(marker).await?;
        tracing::warn!(work_item.id = %created.id, path = %path, "{}", message);
        Ok(true)
    }

    async fn notify_gate_failure(&self, dir: &Path, extension: &str) {
        let subject = format!("Archive gate failed for {}", dir.display());
        let body = format!(
            "no .{} file found in {}, its candidates were not archived",
            extension,
            dir.display()
        );
        if let Err(e) = self.notifier.send_mail(&subject, &body).await {
            tracing::warn!(error = %e, "Gate notification failed");
        }
    }
}

/// Enumerate every candidate below the source root, with gates evaluated.
pub fn enumerate(config: &Config) -> ArchiveResult<Vec<Candidate>> {
    let root = config.source_root.as_path();
    let filter = GlobFilter::new(&config.scan.include, &config.scan.exclude)?;
    let mut candidates = Vec::new();
    let mut gates: HashMap<PathBuf, Gate> = HashMap::new();

    for dir in selected_dirs(root, config.scan.depth)? {
        match config.scan.mode {
            ScanMode::Directories => {
                if !filter.matches(&relative_or_dot(root, &dir)?) {
                    continue;
                }
                candidates.push(Candidate {
                    modified: newest_modification(&dir)?,
                    gate: evaluate_gate(config, &dir)?,
                    path: dir,
                    kind: ItemKind::Directory,
                    member: None,
                    size: None,
                });
            }
            ScanMode::Files => {
                for file in files_below(&dir)? {
                    if !filter.matches(&relative_or_dot(root, &file)?) {
                        continue;
                    }
                    let metadata = fs::metadata(&file).map_err(|e| ArchiveError::io(&file, e))?;
                    candidates.push(Candidate {
                        gate: cached_gate(config, &mut gates, parent_of(&file))?,
                        path: file,
                        kind: ItemKind::File,
                        member: None,
                        size: Some(metadata.len()),
                        modified: metadata.modified().ok().map(DateTime::<Utc>::from),
                    });
                }
            }
            ScanMode::TarMembers => {
                for tar in files_below(&dir)?.into_iter().filter(|f| is_tar(f)) {
                    if !filter.matches(&relative_or_dot(root, &tar)?) {
                        continue;
                    }
                    let modified = fs::metadata(&tar)
                        .map_err(|e| ArchiveError::io(&tar, e))?
                        .modified()
                        .ok()
                        .map(DateTime::<Utc>::from);
                    let gate = cached_gate(config, &mut gates, parent_of(&tar))?;
                    for member in list_tar_members(&tar)? {
                        candidates.push(Candidate {
                            path: tar.clone(),
                            kind: ItemKind::Member,
                            member: Some(member),
                            size: None,
                            modified,
                            gate: gate.clone(),
                        });
                    }
                }
            }
        }
    }

    Ok(candidates)
}

/// Directories selected by depth: `-1` leaves, `0` the root, `N` exactly N below root.
pub fn selected_dirs(root: &Path, depth: i32) -> ArchiveResult<Vec<PathBuf>> {
    if depth == 0 {
        return Ok(vec![root.to_path_buf()]);
    }

    let mut walker = WalkDir::new(root).sort_by_file_name();
    if depth > 0 {
        walker = walker.min_depth(depth as usize).max_depth(depth as usize);
    }

    let mut dirs = Vec::new();
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_dir() {
            continue;
        }
        if depth < 0 && has_subdirectory(entry.path())? {
            continue;
        }
        dirs.push(entry.into_path());
    }
    Ok(dirs)
}

fn has_subdirectory(dir: &Path) -> ArchiveResult<bool> {
    for entry in fs::read_dir(dir).map_err(|e| ArchiveError::io(dir, e))? {
        let entry = entry.map_err(|e| ArchiveError::io(dir, e))?;
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn files_below(dir: &Path) -> ArchiveResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn newest_modification(dir: &Path) -> ArchiveResult<Option<DateTime<Utc>>> {
    let mut newest: Option<SystemTime> = None;
    for entry in WalkDir::new(dir) {
        let entry = entry?;
        if let Some(modified) = entry.metadata().ok().and_then(|m| m.modified().ok()) {
            newest = Some(newest.map_or(modified, |n| n.max(modified)));
        }
    }
    Ok(newest.map(DateTime::<Utc>::from))
}

fn evaluate_gate(config: &Config, candidate_dir: &Path) -> ArchiveResult<Gate> {
    let scan = &config.scan;
    if scan.required_file.is_none() && scan.required_extension.is_none() {
        return Ok(Gate::Passed);
    }
    let dir = gate_dir(&config.source_root, candidate_dir, scan.required_at_depth);

    if let Some(name) = &scan.required_file {
        let required = dir.join(name);
        if !required.exists() {
            return Ok(Gate::MissingFile(required));
        }
    }

    if let Some(extension) = &scan.required_extension {
        let mut found = false;
        for entry in fs::read_dir(&dir).map_err(|e| ArchiveError::io(&dir, e))? {
            let entry = entry.map_err(|e| ArchiveError::io(&dir, e))?;
            let path = entry.path();
            if path.is_file()
                && path
                    .extension()
                    .map(|e| e.to_string_lossy().eq_ignore_ascii_case(extension))
                    .unwrap_or(false)
            {
                found = true;
                break;
            }
        }
        if !found {
            return Ok(Gate::MissingExtension {
                dir,
                extension: extension.clone(),
            });
        }
    }

    Ok(Gate::Passed)
}

/// Gate of `candidate_dir`, evaluated once per directory and pass.
fn cached_gate(
    config: &Config,
    gates: &mut HashMap<PathBuf, Gate>,
    candidate_dir: &Path,
) -> ArchiveResult<Gate> {
    if let Some(gate) = gates.get(candidate_dir) {
        return Ok(gate.clone());
    }
    let gate = evaluate_gate(config, candidate_dir)?;
    gates.insert(candidate_dir.to_path_buf(), gate.clone());
    Ok(gate)
}

/// Directory a gate is checked in: the candidate's own, or its ancestor `depth`
/// components below the root.
fn gate_dir(root: &Path, candidate_dir: &Path, depth: Option<usize>) -> PathBuf {
    match (depth, candidate_dir.strip_prefix(root)) {
        (Some(depth), Ok(relative)) => {
            let mut dir = root.to_path_buf();
            for component in relative.components().take(depth) {
                dir.push(component);
            }
            dir
        }
        _ => candidate_dir.to_path_buf(),
    }
}

fn parent_of(path: &Path) -> &Path {
    path.parent().unwrap_or(path)
}

fn is_tar(path: &Path) -> bool {
    let name = path.to_string_lossy();
    name.ends_with(".tar") || name.ends_with(".tar.gz") || name.ends_with(".tgz")
}

fn relative_or_dot(root: &Path, path: &Path) -> ArchiveResult<String> {
    let relative = relative_str(root, path)?;
    Ok(if relative.is_empty() {
        ".".to_string()
    } else {
        relative
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use arkive_core::constants::{STATUS_COMPLETED, STATUS_FAILED};
    use arkive_db::{MemoryWorkItemStore, MemoryWorkQueue};
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait::async_trait]
    impl Notifier for RecordingNotifier {
        async fn send_mail(&self, subject: &str, body: &str) -> anyhow::Result<()> {
            self.sent
                .lock()
                .await
                .push((subject.to_string(), body.to_string()));
            Ok(())
        }
    }

    struct Fixture {
        _tmp: tempfile::TempDir,
        source: PathBuf,
        vars: HashMap<&'static str, String>,
        store: Arc<MemoryWorkItemStore>,
        queue: Arc<MemoryWorkQueue>,
        notifier: Arc<RecordingNotifier>,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = tempfile::tempdir().unwrap();
            let source = tmp.path().join("source");
            let work = tmp.path().join("work");
            fs::create_dir_all(&source).unwrap();
            fs::create_dir_all(&work).unwrap();
            let vars = HashMap::from([
                ("ARKIVE_SOURCE_ROOT", source.to_string_lossy().into_owned()),
                ("ARKIVE_WORK_ROOT", work.to_string_lossy().into_owned()),
            ]);
            Self {
                _tmp: tmp,
                source,
                vars,
                store: Arc::new(MemoryWorkItemStore::new()),
                queue: Arc::new(MemoryWorkQueue::new("scan")),
                notifier: Arc::new(RecordingNotifier::default()),
            }
        }

        fn set(&mut self, key: &'static str, value: &str) {
            self.vars.insert(key, value.to_string());
        }

        fn write(&self, relative: &str, contents: &str) -> PathBuf {
            let path = self.source.join(relative);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, contents).unwrap();
            path
        }

        fn scanner(&self) -> CandidateScanner {
            let config = Config::from_lookup(|k| self.vars.get(k).cloned()).unwrap();
            CandidateScanner::new(
                Arc::new(config),
                self.store.clone(),
                self.queue.clone(),
                self.notifier.clone(),
            )
        }

        async fn complete_all(&self, uploaded_at: DateTime<Utc>) {
            for mut item in self.store.all_items().await {
                item.status = STATUS_COMPLETED.to_string();
                item.upload_start_timestamp = Some(uploaded_at);
                self.store.update_work_item(&item).await.unwrap();
            }
        }
    }

    #[test]
    fn depth_selects_leaves_root_or_exact_level() {
        let fx = Fixture::new();
        fx.write("p1/r1/a.dat", "a");
        fx.write("p1/r2/b.dat", "b");
        fx.write("p2/c.dat", "c");

        let names = |dirs: Vec<PathBuf>| -> Vec<String> {
            dirs.iter()
                .map(|d| relative_or_dot(&fx.source, d).unwrap())
                .collect()
        };
        assert_eq!(
            names(selected_dirs(&fx.source, -1).unwrap()),
            vec!["p1/r1", "p1/r2", "p2"]
        );
        assert_eq!(names(selected_dirs(&fx.source, 0).unwrap()), vec!["."]);
        assert_eq!(names(selected_dirs(&fx.source, 1).unwrap()), vec!["p1", "p2"]);
    }

    #[tokio::test]
    async fn files_are_filtered_by_globs() {
        let mut fx = Fixture::new();
        fx.write("p/a.dat", "a");
        fx.write("p/b.log", "b");
        fx.write("p/skip/c.dat", "c");
        fx.set("ARKIVE_SCAN_DEPTH", "0");
        fx.set("ARKIVE_INCLUDE", "**/*.dat");
        fx.set("ARKIVE_EXCLUDE", "**/skip/**");

        let report = fx.scanner().scan(Uuid::new_v4()).await.unwrap();
        assert_eq!(report.created, 1);
        let items = fx.store.all_items().await;
        assert_eq!(items.len(), 1);
        assert!(items[0].original_file_path.ends_with("p/a.dat"));
        assert_eq!(items[0].filesize, Some(1));
        assert_eq!(fx.queue.queued_ids().await, vec![items[0].id]);
    }

    #[tokio::test]
    async fn rescan_of_unchanged_tree_enqueues_nothing() {
        let mut fx = Fixture::new();
        fx.write("p/a.dat", "a");
        fx.write("p/b.dat", "b");
        fx.set("ARKIVE_REPLACE_MODIFIED_FILES", "true");

        let first = fx.scanner().scan(Uuid::new_v4()).await.unwrap();
        assert_eq!(first.created, 2);
        fx.complete_all(Utc::now() + Duration::seconds(5)).await;
        let sent_before = fx.queue.sent().await.len();

        let second = fx.scanner().scan(Uuid::new_v4()).await.unwrap();
        assert_eq!(second.enqueued(), 0);
        assert_eq!(second.skipped_completed, 2);
        assert_eq!(fx.queue.sent().await.len(), sent_before);
        assert_eq!(fx.store.all_items().await.len(), 2);
    }

    #[tokio::test]
    async fn modified_file_replaces_existing_record() {
        let mut fx = Fixture::new();
        fx.write("p/a.dat", "a");
        fx.set("ARKIVE_REPLACE_MODIFIED_FILES", "true");

        fx.scanner().scan(Uuid::new_v4()).await.unwrap();
        fx.complete_all(Utc::now() - Duration::days(1)).await;
        let original = fx.store.all_items().await.remove(0);

        let run = Uuid::new_v4();
        let report = fx.scanner().scan(run).await.unwrap();
        assert_eq!(report.replaced, 1);
        assert_eq!(report.created, 0);

        let items = fx.store.all_items().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, original.id);
        assert_eq!(items[0].run_id, run);
        assert_eq!(items[0].status, "");
        assert!(items[0].upload_start_timestamp.is_none());
    }

    #[tokio::test]
    async fn incomplete_record_is_resumed_with_same_id() {
        let fx = Fixture::new();
        fx.write("p/a.dat", "a");
        fx.scanner().scan(Uuid::new_v4()).await.unwrap();

        let mut failed = fx.store.all_items().await.remove(0);
        failed.status = STATUS_FAILED.to_string();
        failed.retry_count = 2;
        failed.error = Some("[workflow] timeout".to_string());
        fx.store.update_work_item(&failed).await.unwrap();

        let run = Uuid::new_v4();
        let report = fx.scanner().scan(run).await.unwrap();
        assert_eq!(report.resumed, 1);

        let resumed = fx.store.get_work_item(failed.id).await.unwrap().unwrap();
        assert_eq!(resumed.run_id, run);
        assert_eq!(resumed.retry_count, 0);
        assert!(resumed.error.is_none());
        assert_eq!(fx.store.all_items().await.len(), 1);
    }

    #[tokio::test]
    async fn missing_extension_is_flagged_once_and_notified() {
        let mut fx = Fixture::new();
        fx.write("p/r1/a.dat", "a");
        fx.write("p/r2/b.dat", "b");
        fx.write("p/r2/params.json", "{}");
        fx.set("ARKIVE_SCAN_MODE", "directories");
        fx.set("ARKIVE_REQUIRED_EXTENSION", "json");

        let report = fx.scanner().scan(Uuid::new_v4()).await.unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(report.flagged, 1);

        let items = fx.store.all_items().await;
        let marker = items
            .iter()
            .find(|i| i.original_file_path.ends_with("r1"))
            .unwrap();
        assert_eq!(marker.status, STATUS_COMPLETED);
        assert!(marker.error.as_deref().unwrap().contains("no .json file"));
        assert!(!fx.queue.queued_ids().await.contains(&marker.id));
        assert_eq!(fx.notifier.sent.lock().await.len(), 1);

        let again = fx.scanner().scan(Uuid::new_v4()).await.unwrap();
        assert_eq!(again.flagged, 0);
        assert_eq!(fx.notifier.sent.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn failing_directory_is_notified_once_for_all_its_files() {
        let mut fx = Fixture::new();
        fx.write("p/r1/a.dat", "a");
        fx.write("p/r1/b.dat", "b");
        fx.write("p/r1/c.dat", "c");
        fx.write("p/r2/d.dat", "d");
        fx.set("ARKIVE_REQUIRED_EXTENSION", "json");

        let report = fx.scanner().scan(Uuid::new_v4()).await.unwrap();
        assert_eq!(report.flagged, 4);

        let sent = fx.notifier.sent.lock().await;
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().any(|(subject, _)| subject.ends_with("r1")));
        assert!(sent.iter().any(|(subject, _)| subject.ends_with("r2")));
        assert!(sent[0].1.contains("no .json file"));
    }

    #[tokio::test]
    async fn missing_required_file_is_a_silent_skip() {
        let mut fx = Fixture::new();
        fx.write("p/r1/a.dat", "a");
        fx.write("p/r2/b.dat", "b");
        fx.write("p/r2/DONE", "");
        fx.set("ARKIVE_SCAN_MODE", "directories");
        fx.set("ARKIVE_REQUIRED_FILE", "DONE");

        let report = fx.scanner().scan(Uuid::new_v4()).await.unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(report.skipped_gate, 1);
        assert!(fx.notifier.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn gate_at_fixed_depth_checks_the_ancestor() {
        let mut fx = Fixture::new();
        fx.write("proj/DONE", "");
        fx.write("proj/r1/a.dat", "a");
        fx.set("ARKIVE_SCAN_MODE", "directories");
        fx.set("ARKIVE_REQUIRED_FILE", "DONE");
        fx.set("ARKIVE_REQUIRED_AT_DEPTH", "1");

        let report = fx.scanner().scan(Uuid::new_v4()).await.unwrap();
        assert_eq!(report.created, 1);
    }

    #[tokio::test]
    async fn recently_modified_candidates_wait() {
        let mut fx = Fixture::new();
        fx.write("p/new.dat", "n");
        let old = fx.write("p/old.dat", "o");
        let ten_days_ago = SystemTime::now() - std::time::Duration::from_secs(10 * 24 * 3600);
        fs::File::options()
            .write(true)
            .open(&old)
            .unwrap()
            .set_modified(ten_days_ago)
            .unwrap();
        fx.set("ARKIVE_SKIP_MODIFIED_WITHIN_DAYS", "2");

        let report = fx.scanner().scan(Uuid::new_v4()).await.unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(report.skipped_fresh, 1);
        assert!(fx.store.all_items().await[0]
            .original_file_path
            .ends_with("old.dat"));
    }

    #[tokio::test]
    async fn tar_members_become_member_items() {
        let mut fx = Fixture::new();
        let staging = fx._tmp.path().join("staging/run1");
        fs::create_dir_all(&staging).unwrap();
        fs::write(staging.join("a.txt"), "a").unwrap();
        fs::write(staging.join("b.txt"), "b").unwrap();
        fs::create_dir_all(fx.source.join("p")).unwrap();
        let tar = fx.source.join("p/run1.tar");
        arkive_processing::fs::tar_directory(&staging, &tar, &[], false).unwrap();
        fx.set("ARKIVE_SCAN_MODE", "tar_members");

        let report = fx.scanner().scan(Uuid::new_v4()).await.unwrap();
        assert_eq!(report.created, 2);

        let items = fx.store.all_items().await;
        let mut members: Vec<&str> = items.iter().map(|i| i.source_file_name.as_str()).collect();
        members.sort();
        assert_eq!(members, vec!["run1/a.txt", "run1/b.txt"]);
        assert!(items.iter().all(|i| i.item_kind == ItemKind::Member));
        assert!(items.iter().all(|i| i.original_file_name == "run1.tar"));

        let again = fx.scanner().scan(Uuid::new_v4()).await.unwrap();
        assert_eq!(again.resumed, 2);
        assert_eq!(fx.store.all_items().await.len(), 2);
    }
}
