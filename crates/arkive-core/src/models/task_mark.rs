use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

/// One step of the per-item pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Tar,
    Contents,
    Compress,
    Untar,
    MultiTar,
    Metadata,
    Checksum,
    Upload,
    Verify,
    PermissionBookmark,
    Cleanup,
}

impl Stage {
    /// Guarded stages are skipped when their task mark is already completed.
    /// Unguarded stages re-check external state on every attempt.
    pub fn is_guarded(&self) -> bool {
        !matches!(self, Stage::Metadata | Stage::MultiTar)
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Stage::Tar => write!(f, "tar"),
            Stage::Contents => write!(f, "contents"),
            Stage::Compress => write!(f, "compress"),
            Stage::Untar => write!(f, "untar"),
            Stage::MultiTar => write!(f, "multi_tar"),
            Stage::Metadata => write!(f, "metadata"),
            Stage::Checksum => write!(f, "checksum"),
            Stage::Upload => write!(f, "upload"),
            Stage::Verify => write!(f, "verify"),
            Stage::PermissionBookmark => write!(f, "permission_bookmark"),
            Stage::Cleanup => write!(f, "cleanup"),
        }
    }
}

impl FromStr for Stage {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tar" => Ok(Stage::Tar),
            "contents" => Ok(Stage::Contents),
            "compress" => Ok(Stage::Compress),
            "untar" => Ok(Stage::Untar),
            "multi_tar" => Ok(Stage::MultiTar),
            "metadata" => Ok(Stage::Metadata),
            "checksum" => Ok(Stage::Checksum),
            "upload" => Ok(Stage::Upload),
            "verify" => Ok(Stage::Verify),
            "permission_bookmark" => Ok(Stage::PermissionBookmark),
            "cleanup" => Ok(Stage::Cleanup),
            _ => Err(anyhow::anyhow!("Invalid stage: {}", s)),
        }
    }
}

/// Completion ledger entry keyed by `(work_item_id, task_name)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskMark {
    pub work_item_id: Uuid,
    pub task_name: Stage,
    pub completed: bool,
    pub updated_at: DateTime<Utc>,
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for TaskMark {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(TaskMark {
            work_item_id: row.try_get("work_item_id")?,
            task_name: row.try_get::<String, _>("task_name")?.parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse task_name: {}", e).into())
            })?,
            completed: row.try_get("completed")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names_round_trip() {
        for stage in [
            Stage::Tar,
            Stage::Contents,
            Stage::Compress,
            Stage::Untar,
            Stage::MultiTar,
            Stage::Metadata,
            Stage::Checksum,
            Stage::Upload,
            Stage::Verify,
            Stage::PermissionBookmark,
            Stage::Cleanup,
        ] {
            assert_eq!(stage.to_string().parse::<Stage>().unwrap(), stage);
        }
    }

    #[test]
    fn metadata_and_multi_tar_are_unguarded() {
        assert!(!Stage::Metadata.is_guarded());
        assert!(!Stage::MultiTar.is_guarded());
        assert!(Stage::Upload.is_guarded());
        assert!(Stage::Cleanup.is_guarded());
    }
}
