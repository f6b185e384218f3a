use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Desired access for a user on a remote path, optionally with a bookmark.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PermissionRule {
    pub id: Uuid,
    pub path: String,
    pub user_id: String,
    pub permission: String,
    pub create_bookmark: bool,
    /// Persisted as `'Y'`/`'N'`.
    pub created: bool,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl PermissionRule {
    pub fn new(path: &str, user_id: &str, permission: &str, create_bookmark: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            path: path.to_string(),
            user_id: user_id.to_string(),
            permission: permission.to_string(),
            create_bookmark,
            created: false,
            error: None,
            updated_at: Utc::now(),
        }
    }

    /// Whether `destination` lies at or below this rule's path, compared per path component.
    pub fn applies_to(&self, destination: &str) -> bool {
        let rule: Vec<&str> = self.path.split('/').filter(|s| !s.is_empty()).collect();
        let dest: Vec<&str> = destination.split('/').filter(|s| !s.is_empty()).collect();
        rule.len() <= dest.len() && rule.iter().zip(dest.iter()).all(|(a, b)| a == b)
    }

    /// Name used for the bookmark created at the rule's path.
    pub fn bookmark_name(&self) -> String {
        self.path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or("root")
            .to_string()
    }
}

pub fn created_flag(created: bool) -> &'static str {
    if created {
        "Y"
    } else {
        "N"
    }
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for PermissionRule {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        let created: String = row.try_get("created")?;
        Ok(PermissionRule {
            id: row.try_get("id")?,
            path: row.try_get("path")?,
            user_id: row.try_get("user_id")?,
            permission: row.try_get("permission")?,
            create_bookmark: row.try_get("create_bookmark")?,
            created: created.eq_ignore_ascii_case("Y"),
            error: row.try_get("error")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_match_is_component_wise() {
        let rule = PermissionRule::new("/projects/alpha", "u1", "read", false);
        assert!(rule.applies_to("/projects/alpha/run1/file.h5"));
        assert!(rule.applies_to("/projects/alpha"));
        assert!(!rule.applies_to("/projects/alphabet/file.h5"));
        assert!(!rule.applies_to("/projects"));
    }

    #[test]
    fn bookmark_name_is_last_component() {
        let rule = PermissionRule::new("/projects/alpha/", "u1", "read", true);
        assert_eq!(rule.bookmark_name(), "alpha");
        let root = PermissionRule::new("/", "u1", "read", true);
        assert_eq!(root.bookmark_name(), "root");
    }

    #[test]
    fn created_flag_text() {
        assert_eq!(created_flag(true), "Y");
        assert_eq!(created_flag(false), "N");
    }
}
