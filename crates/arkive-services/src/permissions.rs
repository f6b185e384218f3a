//! Permission and bookmark reconciliation for freshly archived destinations.

use std::sync::Arc;

use arkive_core::models::PermissionRule;
use arkive_core::{ErrorClassExt, PipelineError};
use arkive_db::WorkItemStore;
use arkive_storage::{ArchiveService, RemoteResult};
use chrono::Utc;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub matched: usize,
    pub acl_updates: usize,
    pub bookmarks: usize,
    pub failed: usize,
}

pub struct PermissionReconciler {
    store: Arc<dyn WorkItemStore>,
    service: Arc<dyn ArchiveService>,
}

enum Applied {
    Unchanged,
    Updated,
}

impl PermissionReconciler {
    pub fn new(store: Arc<dyn WorkItemStore>, service: Arc<dyn ArchiveService>) -> Self {
        Self { store, service }
    }

    /// Apply every pending rule covering `destination`. A rule that fails keeps its
    /// error and stays pending; only store failures fail the stage.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile(&self, destination: &str) -> Result<ReconcileReport, PipelineError> {
        let rules = self
            .store
            .list_pending_permission_rules()
            .await
            .workflow()?;
        let mut report = ReconcileReport::default();

        for mut rule in rules.into_iter().filter(|r| r.applies_to(destination)) {
            report.matched += 1;
            match self.apply(&rule, &mut report).await {
                Ok(applied) => {
                    rule.created = true;
                    rule.error = None;
                    if matches!(applied, Applied::Updated) {
                        report.acl_updates += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        rule.path = %rule.path,
                        rule.user = %rule.user_id,
                        error = %e,
                        "Permission rule could not be applied"
                    );
                    rule.error = Some(e.to_string());
                    report.failed += 1;
                }
            }
            rule.updated_at = Utc::now();
            self.store.update_permission_rule(&rule).await.workflow()?;
        }

        Ok(report)
    }

    async fn apply(&self, rule: &PermissionRule, report: &mut ReconcileReport) -> RemoteResult<Applied> {
        let current = self
            .service
            .get_permission(&rule.path, &rule.user_id)
            .await?;

        let applied = if current.as_deref() == Some(rule.permission.as_str()) {
            tracing::debug!(rule.path = %rule.path, "Permission already in place");
            Applied::Unchanged
        } else {
            self.service
                .update_acl(&rule.path, &rule.user_id, &rule.permission)
                .await?;
            tracing::info!(
                rule.path = %rule.path,
                rule.user = %rule.user_id,
                permission = %rule.permission,
                "Permission updated"
            );
            Applied::Updated
        };

        if rule.create_bookmark {
            let name = rule.bookmark_name();
            match self
                .service
                .create_bookmark(&rule.path, &name, &rule.user_id)
                .await
            {
                Ok(()) => report.bookmarks += 1,
                Err(e) if e.is_conflict() => {
                    tracing::info!(bookmark = %name, "Bookmark already exists")
                }
                Err(e) => return Err(e),
            }
        }

        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arkive_db::MemoryWorkItemStore;
    use arkive_storage::MemoryArchiveService;

    #[tokio::test]
    async fn applies_matching_rules_once() {
        let store = Arc::new(MemoryWorkItemStore::new());
        let service = Arc::new(MemoryArchiveService::new("http://localhost"));
        store
            .create_permission_rule(&PermissionRule::new("/archive/proj", "alice", "read", true))
            .await
            .unwrap();
        store
            .create_permission_rule(&PermissionRule::new("/archive/other", "bob", "write", false))
            .await
            .unwrap();
        service.update_acl("/archive/proj", "alice", "none").await.unwrap();
        service.create_bookmark("/archive/proj", "proj", "alice").await.unwrap();

        let reconciler = PermissionReconciler::new(store.clone(), service.clone());
        let report = reconciler.reconcile("/archive/proj/run1.tar").await.unwrap();

        assert_eq!(report.matched, 1);
        assert_eq!(report.acl_updates, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(
            service.permission("/archive/proj", "alice").await.as_deref(),
            Some("read")
        );

        let rules = store.all_permission_rules().await;
        let alice = rules.iter().find(|r| r.user_id == "alice").unwrap();
        assert!(alice.created);
        let bob = rules.iter().find(|r| r.user_id == "bob").unwrap();
        assert!(!bob.created);

        let again = reconciler.reconcile("/archive/proj/run2.tar").await.unwrap();
        assert_eq!(again.matched, 0);
    }

    #[tokio::test]
    async fn failed_rule_keeps_error_without_failing_stage() {
        let store = Arc::new(MemoryWorkItemStore::new());
        let service = Arc::new(MemoryArchiveService::new("http://localhost"));
        store
            .create_permission_rule(&PermissionRule::new("/archive/proj", "alice", "read", false))
            .await
            .unwrap();
        service.fail_path("/archive/proj").await;

        let reconciler = PermissionReconciler::new(store.clone(), service);
        let report = reconciler.reconcile("/archive/proj/a.dat").await.unwrap();
        assert_eq!(report.failed, 1);

        let rule = &store.all_permission_rules().await[0];
        assert!(!rule.created);
        assert!(rule.error.as_deref().unwrap_or_default().contains("500"));
    }
}
