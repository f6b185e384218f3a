use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{RunInfo, RunStatus, WorkItem};
use crate::constants::{STATUS_COMPLETED, STATUS_FAILED};

/// Final state of one work item as reported in a run summary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemSummary {
    pub id: Uuid,
    pub original_file_path: String,
    pub destination: Option<String>,
    pub status: String,
    pub filesize: Option<i64>,
    pub start_timestamp: Option<DateTime<Utc>>,
    pub end_timestamp: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub transfer_rate_mib_s: Option<f64>,
    pub retry_count: i32,
    pub error: Option<String>,
}

impl From<&WorkItem> for ItemSummary {
    fn from(item: &WorkItem) -> Self {
        Self {
            id: item.id,
            original_file_path: item.original_file_path.clone(),
            destination: item.full_destination_path.clone(),
            status: item.status.clone(),
            filesize: item.filesize,
            start_timestamp: item.start_timestamp,
            end_timestamp: item.end_timestamp,
            duration_seconds: item.duration_seconds(),
            transfer_rate_mib_s: item.transfer_rate_mib_s(),
            retry_count: item.retry_count,
            error: item.error.clone(),
        }
    }
}

/// Run-result artifact written once a run's queue has drained.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub start_timestamp: DateTime<Utc>,
    pub end_timestamp: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub uploaded_size: i64,
    pub total_items: usize,
    pub completed_items: usize,
    pub failed_items: usize,
    pub items_with_errors: usize,
    pub items: Vec<ItemSummary>,
}

impl RunSummary {
    pub fn build(run: &RunInfo, items: &[WorkItem]) -> Self {
        let items: Vec<ItemSummary> = items.iter().map(ItemSummary::from).collect();
        Self {
            run_id: run.run_id,
            status: run.status,
            start_timestamp: run.start_timestamp,
            end_timestamp: run.end_timestamp,
            duration_seconds: run.duration_seconds,
            uploaded_size: run.uploaded_size,
            total_items: items.len(),
            completed_items: items.iter().filter(|i| i.status == STATUS_COMPLETED).count(),
            failed_items: items.iter().filter(|i| i.status == STATUS_FAILED).count(),
            items_with_errors: items.iter().filter(|i| i.error.is_some()).count(),
            items,
        }
    }

    pub fn artifact_name(run_id: Uuid) -> String {
        format!("run-{}.json", run_id)
    }

    /// Plain-text rendering used as an email body.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("Run {} ({})\n", self.run_id, self.status));
        out.push_str(&format!("Started:  {}\n", self.start_timestamp.to_rfc3339()));
        if let Some(end) = self.end_timestamp {
            out.push_str(&format!("Finished: {}\n", end.to_rfc3339()));
        }
        if let Some(duration) = self.duration_seconds {
            out.push_str(&format!("Duration: {}s\n", duration));
        }
        out.push_str(&format!(
            "Items: {} total, {} completed, {} failed, {} with errors\n",
            self.total_items, self.completed_items, self.failed_items, self.items_with_errors
        ));
        out.push_str(&format!("Uploaded: {} bytes\n\n", self.uploaded_size));

        for item in &self.items {
            let status = if item.status.is_empty() {
                "PENDING"
            } else {
                item.status.as_str()
            };
            out.push_str(&format!("{} {}", status, item.original_file_path));
            if let Some(rate) = item.transfer_rate_mib_s {
                out.push_str(&format!(" {:.2} MiB/s", rate));
            }
            if item.retry_count > 0 {
                out.push_str(&format!(" retries={}", item.retry_count));
            }
            if let Some(error) = &item.error {
                out.push_str(&format!(" error={}", error));
            }
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::work_item::sample_item;

    #[test]
    fn counts_and_text() {
        let mut run = RunInfo::start(Uuid::new_v4());
        run.uploaded_size = 42;
        run.close(RunStatus::Completed, None);

        let mut done = sample_item();
        done.status = STATUS_COMPLETED.to_string();
        let mut failed = sample_item();
        failed.status = STATUS_FAILED.to_string();
        failed.error = Some("[mapping] no destination".to_string());
        failed.retry_count = 2;

        let summary = RunSummary::build(&run, &[done, failed]);
        assert_eq!(summary.total_items, 2);
        assert_eq!(summary.completed_items, 1);
        assert_eq!(summary.failed_items, 1);
        assert_eq!(summary.items_with_errors, 1);

        let text = summary.render_text();
        assert!(text.contains("1 completed"));
        assert!(text.contains("retries=2"));
        assert!(text.contains("error=[mapping] no destination"));
    }

    #[test]
    fn artifact_name_format() {
        let id = Uuid::nil();
        assert_eq!(
            RunSummary::artifact_name(id),
            "run-00000000-0000-0000-0000-000000000000.json"
        );
    }
}
