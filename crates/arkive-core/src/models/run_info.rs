use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl Display for RunStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for RunStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid run status: {}", s)),
        }
    }
}

/// One scheduler invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunInfo {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub start_timestamp: DateTime<Utc>,
    pub end_timestamp: Option<DateTime<Utc>>,
    pub heartbeat: DateTime<Utc>,
    pub duration_seconds: Option<i64>,
    pub uploaded_size: i64,
    pub error_message: Option<String>,
}

impl RunInfo {
    pub fn start(run_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            status: RunStatus::Running,
            start_timestamp: now,
            end_timestamp: None,
            heartbeat: now,
            duration_seconds: None,
            uploaded_size: 0,
            error_message: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == RunStatus::Running
    }

    /// Close the run and compute its duration.
    pub fn close(&mut self, status: RunStatus, error_message: Option<String>) {
        let now = Utc::now();
        self.status = status;
        self.end_timestamp = Some(now);
        self.heartbeat = now;
        self.duration_seconds = Some(now.signed_duration_since(self.start_timestamp).num_seconds());
        self.error_message = error_message;
    }
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for RunInfo {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(RunInfo {
            run_id: row.try_get("run_id")?,
            status: row.try_get::<String, _>("status")?.parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse run status: {}", e).into())
            })?,
            start_timestamp: row.try_get("start_timestamp")?,
            end_timestamp: row.try_get("end_timestamp")?,
            heartbeat: row.try_get("heartbeat")?,
            duration_seconds: row.try_get("duration_seconds")?,
            uploaded_size: row.try_get("uploaded_size")?,
            error_message: row.try_get("error_message")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_sets_end_and_duration() {
        let mut run = RunInfo::start(Uuid::new_v4());
        run.start_timestamp = Utc::now() - chrono::Duration::seconds(90);
        assert!(run.is_open());

        run.close(RunStatus::Completed, None);

        assert!(!run.is_open());
        assert!(run.end_timestamp.is_some());
        let duration = run.duration_seconds.unwrap();
        assert!((89..=91).contains(&duration));
    }

    #[test]
    fn status_parse() {
        assert_eq!("failed".parse::<RunStatus>().unwrap(), RunStatus::Failed);
        assert!("done".parse::<RunStatus>().is_err());
    }
}
