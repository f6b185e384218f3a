use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

use crate::constants::{STATUS_COMPLETED, STATUS_FAILED, STATUS_PENDING};

/// What a work item stands for on the local side.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// A single source file uploaded as-is (optionally compressed).
    File,
    /// A directory archived into one tar, or split into tar parts.
    Directory,
    /// One bounded tar part of a split directory.
    TarPart,
    /// A generated contents listing (tar member manifest).
    Manifest,
    /// A member extracted from a previously archived tar.
    Member,
}

impl Display for ItemKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ItemKind::File => write!(f, "file"),
            ItemKind::Directory => write!(f, "directory"),
            ItemKind::TarPart => write!(f, "tar_part"),
            ItemKind::Manifest => write!(f, "manifest"),
            ItemKind::Member => write!(f, "member"),
        }
    }
}

impl FromStr for ItemKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(ItemKind::File),
            "directory" => Ok(ItemKind::Directory),
            "tar_part" => Ok(ItemKind::TarPart),
            "manifest" => Ok(ItemKind::Manifest),
            "member" => Ok(ItemKind::Member),
            _ => Err(anyhow::anyhow!("Invalid item kind: {}", s)),
        }
    }
}

/// Durable record of one unit of archival work.
///
/// `original_*` describe the candidate found by the scanner; `source_*` describe the
/// working copy actually uploaded (equal to the original when nothing is packed).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkItem {
    pub id: Uuid,
    pub run_id: Uuid,
    pub doc: String,
    pub item_kind: ItemKind,
    pub original_file_path: String,
    pub original_file_name: String,
    pub source_file_path: String,
    pub source_file_name: String,
    pub full_destination_path: Option<String>,
    pub filesize: Option<i64>,
    pub checksum: Option<String>,
    pub status: String,
    pub error: Option<String>,
    pub retry_count: i32,
    pub start_timestamp: Option<DateTime<Utc>>,
    pub end_timestamp: Option<DateTime<Utc>>,
    pub tar_start_timestamp: Option<DateTime<Utc>>,
    pub tar_end_timestamp: Option<DateTime<Utc>>,
    pub upload_start_timestamp: Option<DateTime<Utc>>,
    pub upload_end_timestamp: Option<DateTime<Utc>>,
    pub tar_index_start: Option<i32>,
    pub tar_index_end: Option<i32>,
    pub tar_contents_count: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for WorkItem {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(WorkItem {
            id: row.try_get("id")?,
            run_id: row.try_get("run_id")?,
            doc: row.try_get("doc")?,
            item_kind: row.try_get::<String, _>("item_kind")?.parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse item_kind: {}", e).into())
            })?,
            original_file_path: row.try_get("original_file_path")?,
            original_file_name: row.try_get("original_file_name")?,
            source_file_path: row.try_get("source_file_path")?,
            source_file_name: row.try_get("source_file_name")?,
            full_destination_path: row.try_get("full_destination_path")?,
            filesize: row.try_get("filesize")?,
            checksum: row.try_get("checksum")?,
            status: row.try_get("status")?,
            error: row.try_get("error")?,
            retry_count: row.try_get("retry_count")?,
            start_timestamp: row.try_get("start_timestamp")?,
            end_timestamp: row.try_get("end_timestamp")?,
            tar_start_timestamp: row.try_get("tar_start_timestamp")?,
            tar_end_timestamp: row.try_get("tar_end_timestamp")?,
            upload_start_timestamp: row.try_get("upload_start_timestamp")?,
            upload_end_timestamp: row.try_get("upload_end_timestamp")?,
            tar_index_start: row.try_get("tar_index_start")?,
            tar_index_end: row.try_get("tar_index_end")?,
            tar_contents_count: row.try_get("tar_contents_count")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl WorkItem {
    pub fn is_completed(&self) -> bool {
        self.status == STATUS_COMPLETED
    }

    pub fn is_failed(&self) -> bool {
        self.status == STATUS_FAILED
    }

    /// `[start, end)` file-index range of a tar part, if this item is one.
    pub fn tar_range(&self) -> Option<(i32, i32)> {
        match (self.tar_index_start, self.tar_index_end) {
            (Some(start), Some(end)) => Some((start, end)),
            _ => None,
        }
    }

    /// Reset the item for a new run: it keeps its id and task marks but loses its
    /// error, retry history and run association.
    pub fn resume_for_run(&mut self, run_id: Uuid) {
        self.run_id = run_id;
        self.error = None;
        self.retry_count = 0;
        self.status = STATUS_PENDING.to_string();
        self.start_timestamp = Some(Utc::now());
        self.end_timestamp = None;
    }

    /// Wall-clock seconds between start and end, when both are known.
    pub fn duration_seconds(&self) -> Option<f64> {
        match (self.start_timestamp, self.end_timestamp) {
            (Some(start), Some(end)) => {
                Some(end.signed_duration_since(start).num_milliseconds() as f64 / 1000.0)
            }
            _ => None,
        }
    }

    /// Upload throughput in MiB/s, computed from the upload timestamps.
    pub fn transfer_rate_mib_s(&self) -> Option<f64> {
        let size = self.filesize?;
        let start = self.upload_start_timestamp?;
        let end = self.upload_end_timestamp?;
        let millis = end.signed_duration_since(start).num_milliseconds();
        if millis <= 0 {
            return None;
        }
        Some((size as f64 / (1024.0 * 1024.0)) / (millis as f64 / 1000.0))
    }
}

/// Insert payload for a new work item; the store assigns id and bookkeeping timestamps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewWorkItem {
    pub run_id: Uuid,
    pub doc: String,
    pub item_kind: ItemKind,
    pub original_file_path: String,
    pub original_file_name: String,
    pub source_file_path: String,
    pub source_file_name: String,
    pub filesize: Option<i64>,
    pub status: String,
    pub error: Option<String>,
    pub tar_index_start: Option<i32>,
    pub tar_index_end: Option<i32>,
    pub tar_contents_count: Option<i32>,
}

impl NewWorkItem {
    /// New pending item whose working copy is the original itself.
    pub fn for_path(run_id: Uuid, doc: &str, item_kind: ItemKind, path: &str) -> Self {
        let name = std::path::Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            run_id,
            doc: doc.to_string(),
            item_kind,
            original_file_path: path.to_string(),
            original_file_name: name.clone(),
            source_file_path: path.to_string(),
            source_file_name: name,
            filesize: None,
            status: STATUS_PENDING.to_string(),
            error: None,
            tar_index_start: None,
            tar_index_end: None,
            tar_contents_count: None,
        }
    }

    pub fn with_source(mut self, source_file_path: &str, source_file_name: &str) -> Self {
        self.source_file_path = source_file_path.to_string();
        self.source_file_name = source_file_name.to_string();
        self
    }

    pub fn with_tar_range(mut self, start: i32, end: i32, parts: i32) -> Self {
        self.tar_index_start = Some(start);
        self.tar_index_end = Some(end);
        self.tar_contents_count = Some(parts);
        self
    }

    /// Pre-completed item carrying an error, used to make skipped work visible.
    pub fn completed_with_error(mut self, error: impl Into<String>) -> Self {
        self.status = STATUS_COMPLETED.to_string();
        self.error = Some(error.into());
        self
    }

    pub fn failed_with_error(mut self, error: impl Into<String>) -> Self {
        self.status = STATUS_FAILED.to_string();
        self.error = Some(error.into());
        self
    }
}

/// Status filter for the dedup lookups of the record store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    Completed,
    NotCompleted,
}

impl StatusFilter {
    pub fn matches(&self, status: &str) -> bool {
        match self {
            StatusFilter::Completed => status == STATUS_COMPLETED,
            StatusFilter::NotCompleted => status != STATUS_COMPLETED,
        }
    }
}

#[cfg(test)]
pub(crate) fn sample_item() -> WorkItem {
    let now = Utc::now();
    WorkItem {
        id: Uuid::new_v4(),
        run_id: Uuid::new_v4(),
        doc: "mirror".to_string(),
        item_kind: ItemKind::File,
        original_file_path: "/data/a/b.dat".to_string(),
        original_file_name: "b.dat".to_string(),
        source_file_path: "/data/a/b.dat".to_string(),
        source_file_name: "b.dat".to_string(),
        full_destination_path: None,
        filesize: None,
        checksum: None,
        status: STATUS_PENDING.to_string(),
        error: None,
        retry_count: 0,
        start_timestamp: Some(now),
        end_timestamp: None,
        tar_start_timestamp: None,
        tar_end_timestamp: None,
        upload_start_timestamp: None,
        upload_end_timestamp: None,
        tar_index_start: None,
        tar_index_end: None,
        tar_contents_count: None,
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_kind_round_trips_through_text() {
        for kind in [
            ItemKind::File,
            ItemKind::Directory,
            ItemKind::TarPart,
            ItemKind::Manifest,
            ItemKind::Member,
        ] {
            assert_eq!(kind.to_string().parse::<ItemKind>().unwrap(), kind);
        }
        assert!("folder".parse::<ItemKind>().is_err());
    }

    #[test]
    fn resume_clears_error_and_retry_history() {
        let mut item = sample_item();
        item.status = STATUS_COMPLETED.to_string();
        item.error = Some("boom".to_string());
        item.retry_count = 4;
        let id = item.id;
        let next_run = Uuid::new_v4();

        item.resume_for_run(next_run);

        assert_eq!(item.id, id);
        assert_eq!(item.run_id, next_run);
        assert_eq!(item.retry_count, 0);
        assert!(item.error.is_none());
        assert_eq!(item.status, STATUS_PENDING);
    }

    #[test]
    fn tar_range_requires_both_bounds() {
        let mut item = sample_item();
        assert_eq!(item.tar_range(), None);
        item.tar_index_start = Some(10);
        assert_eq!(item.tar_range(), None);
        item.tar_index_end = Some(20);
        assert_eq!(item.tar_range(), Some((10, 20)));
    }

    #[test]
    fn transfer_rate_from_upload_window() {
        let mut item = sample_item();
        let start = Utc::now();
        item.filesize = Some(10 * 1024 * 1024);
        item.upload_start_timestamp = Some(start);
        item.upload_end_timestamp = Some(start + chrono::Duration::seconds(5));
        let rate = item.transfer_rate_mib_s().unwrap();
        assert!((rate - 2.0).abs() < 1e-9);

        item.upload_end_timestamp = Some(start);
        assert_eq!(item.transfer_rate_mib_s(), None);
    }

    #[test]
    fn new_item_for_path_uses_basename() {
        let run = Uuid::new_v4();
        let item = NewWorkItem::for_path(run, "mirror", ItemKind::File, "/data/x/y.h5");
        assert_eq!(item.original_file_name, "y.h5");
        assert_eq!(item.source_file_path, "/data/x/y.h5");
        assert_eq!(item.status, STATUS_PENDING);
    }

    #[test]
    fn status_filter() {
        assert!(StatusFilter::Completed.matches(STATUS_COMPLETED));
        assert!(!StatusFilter::Completed.matches(""));
        assert!(StatusFilter::NotCompleted.matches("UPLOADED"));
        assert!(!StatusFilter::NotCompleted.matches(STATUS_COMPLETED));
    }
}
