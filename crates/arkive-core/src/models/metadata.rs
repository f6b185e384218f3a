use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata computed for a work item by its path/metadata processor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkItemMetadata {
    pub work_item_id: Uuid,
    pub destination_path: String,
    /// Registration payload sent with the object.
    pub object_metadata: serde_json::Value,
    /// Collection to create before registering the object, if any.
    pub collection_path: Option<String>,
    pub collection_metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for WorkItemMetadata {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(WorkItemMetadata {
            work_item_id: row.try_get("work_item_id")?,
            destination_path: row.try_get("destination_path")?,
            object_metadata: row.try_get("object_metadata")?,
            collection_path: row.try_get("collection_path")?,
            collection_metadata: row.try_get("collection_metadata")?,
            created_at: row.try_get("created_at")?,
        })
    }
}
