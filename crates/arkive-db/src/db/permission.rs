//! Permission rule repository.

use anyhow::{Context, Result};
use arkive_core::models::{created_flag, PermissionRule};
use sqlx::{PgPool, Postgres};

#[derive(Clone)]
pub struct PermissionRuleRepository {
    pool: PgPool,
}

impl PermissionRuleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[tracing::instrument(skip(self, rule), fields(db.table = "permission_rules", path = %rule.path))]
    pub async fn create(&self, rule: &PermissionRule) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO permission_rules (
                id, path, user_id, permission, create_bookmark, created, error, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(rule.id)
        .bind(&rule.path)
        .bind(&rule.user_id)
        .bind(&rule.permission)
        .bind(rule.create_bookmark)
        .bind(created_flag(rule.created))
        .bind(&rule.error)
        .bind(rule.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert permission rule")?;

        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "permission_rules"))]
    pub async fn list_pending(&self) -> Result<Vec<PermissionRule>> {
        let rules = sqlx::query_as::<Postgres, PermissionRule>(
            r#"
            SELECT id, path, user_id, permission, create_bookmark, created, error, updated_at
            FROM permission_rules
            WHERE created = 'N'
            ORDER BY path ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list pending permission rules")?;

        Ok(rules)
    }

    #[tracing::instrument(skip(self, rule), fields(db.table = "permission_rules", rule.id = %rule.id))]
    pub async fn update(&self, rule: &PermissionRule) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE permission_rules
            SET created = $2, error = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(rule.id)
        .bind(created_flag(rule.created))
        .bind(&rule.error)
        .execute(&self.pool)
        .await
        .context("Failed to update permission rule")?;

        Ok(())
    }
}
