//! Out-of-band notifications: directory gate failures and run summaries.

use std::sync::Arc;

use anyhow::Context;
use arkive_core::models::RunSummary;
use arkive_core::MailConfig;
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_mail(&self, subject: &str, body: &str) -> anyhow::Result<()>;

    async fn send_run_summary(&self, summary: &RunSummary) -> anyhow::Result<()> {
        let subject = format!(
            "Archive run {} {}: {} of {} items completed",
            summary.run_id, summary.status, summary.completed_items, summary.total_items
        );
        self.send_mail(&subject, &summary.render_text()).await
    }
}

/// Writes notifications to the log. Used when mail is not configured.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_mail(&self, subject: &str, body: &str) -> anyhow::Result<()> {
        tracing::warn!(subject, body, "Notification");
        Ok(())
    }
}

/// Sends notifications over SMTP.
#[derive(Clone)]
pub struct EmailNotifier {
    mailer: Arc<AsyncSmtpTransport<Tokio1Executor>>,
    from: String,
    to: Vec<String>,
}

impl EmailNotifier {
    /// Returns `None` if alerts are disabled, SMTP is not configured or nobody is
    /// listed as a recipient.
    pub fn from_config(config: &MailConfig) -> Option<Self> {
        if !config.email_alerts_enabled {
            tracing::debug!("Email alerts disabled (EMAIL_ALERTS_ENABLED=false)");
            return None;
        }
        let host = config.smtp_host.as_deref()?;
        let from = config.smtp_from.clone()?;
        if config.notify_to.is_empty() {
            tracing::warn!("Email alerts enabled but ARKIVE_NOTIFY_TO is empty");
            return None;
        }
        let port = config.smtp_port;
        let credentials = match (&config.smtp_user, &config.smtp_password) {
            (Some(u), Some(p)) => Some(Credentials::new(u.clone(), p.clone())),
            _ => None,
        };

        let mailer = if config.smtp_tls {
            let b = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .ok()?
                .port(port);
            let b = match credentials {
                Some(c) => b.credentials(c),
                None => b,
            };
            tracing::info!(host = %host, port, "Email notifier initialized (SMTP with STARTTLS)");
            b.build()
        } else {
            let b = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host).port(port);
            let b = match credentials {
                Some(c) => b.credentials(c),
                None => b,
            };
            tracing::info!(host = %host, port, "Email notifier initialized (SMTP)");
            b.build()
        };

        Some(Self {
            mailer: Arc::new(mailer),
            from,
            to: config.notify_to.clone(),
        })
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn send_mail(&self, subject: &str, body: &str) -> anyhow::Result<()> {
        let to_addrs: Vec<Mailbox> = self.to.iter().filter_map(|s| s.parse().ok()).collect();
        if to_addrs.is_empty() {
            anyhow::bail!("No valid recipient addresses");
        }
        let from_addr: Mailbox = self.from.parse().context("Invalid SMTP_FROM")?;

        let mut builder = Message::builder().from(from_addr).subject(subject);
        for mb in to_addrs {
            builder = builder.to(mb);
        }
        let email = builder
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .context("Failed to build notification email")?;

        self.mailer
            .send(email)
            .await
            .context("Failed to send notification email")?;
        tracing::info!(count = self.to.len(), subject, "Notification email sent");
        Ok(())
    }
}

/// Email notifier when mail is configured, log notifier otherwise.
pub fn create_notifier(config: &MailConfig) -> Arc<dyn Notifier> {
    match EmailNotifier::from_config(config) {
        Some(email) => Arc::new(email),
        None => Arc::new(LogNotifier),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mail_config() -> MailConfig {
        MailConfig {
            email_alerts_enabled: true,
            smtp_host: Some("localhost".to_string()),
            smtp_port: 2525,
            smtp_user: None,
            smtp_password: None,
            smtp_from: Some("arkive@example.org".to_string()),
            smtp_tls: false,
            notify_to: vec!["ops@example.org".to_string()],
        }
    }

    #[test]
    fn disabled_alerts_yield_no_email_notifier() {
        let mut config = mail_config();
        config.email_alerts_enabled = false;
        assert!(EmailNotifier::from_config(&config).is_none());
    }

    #[test]
    fn missing_recipients_yield_no_email_notifier() {
        let mut config = mail_config();
        config.notify_to.clear();
        assert!(EmailNotifier::from_config(&config).is_none());
    }

    #[tokio::test]
    async fn email_notifier_built_from_plain_smtp_config() {
        assert!(EmailNotifier::from_config(&mail_config()).is_some());
    }

    #[tokio::test]
    async fn log_notifier_accepts_summaries() {
        let run = arkive_core::models::RunInfo::start(uuid::Uuid::new_v4());
        let summary = RunSummary::build(&run, &[]);
        LogNotifier.send_run_summary(&summary).await.unwrap();
    }
}
