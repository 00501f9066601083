//! Operator alert channels: where delivery failures get reported.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use mailcast_core::config::MailcastConfig;
use mailcast_core::error::{MailcastError, Result};
use mailcast_core::traits::{OperatorAlert, Transport};

/// Log-only channel. Always succeeds.
#[derive(Debug, Default)]
pub struct TracingAlert;

#[async_trait]
impl OperatorAlert for TracingAlert {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, subject: &str, detail: &str) -> Result<()> {
        tracing::error!("🚨 {subject}: {detail}");
        Ok(())
    }
}

/// Mails every configured admin through the regular transport.
pub struct AdminMailAlert {
    transport: Arc<dyn Transport>,
    from_address: String,
    admins: Vec<String>,
    subject_prefix: String,
}

impl AdminMailAlert {
    pub fn new(
        transport: Arc<dyn Transport>,
        from_address: impl Into<String>,
        admins: Vec<String>,
        subject_prefix: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            from_address: from_address.into(),
            admins,
            subject_prefix: subject_prefix.into(),
        }
    }
}

#[async_trait]
impl OperatorAlert for AdminMailAlert {
    fn name(&self) -> &str {
        "admin-mail"
    }

    async fn notify(&self, subject: &str, detail: &str) -> Result<()> {
        if self.admins.is_empty() {
            return Ok(());
        }
        let subject = format!("{}{subject}", self.subject_prefix);
        let report = self
            .transport
            .send(&subject, detail, &self.from_address, &self.admins)
            .await
            .map_err(|e| MailcastError::Alert(format!("admin mail: {e}")))?;
        if report.accepted == 0 {
            return Err(MailcastError::Alert("admin mail: relay accepted no admins".into()));
        }
        Ok(())
    }
}

/// POSTs a JSON payload to an HTTP endpoint.
pub struct WebhookAlert {
    url: String,
    client: reqwest::Client,
}

impl WebhookAlert {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl OperatorAlert for WebhookAlert {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn notify(&self, subject: &str, detail: &str) -> Result<()> {
        let resp = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({
                "source": "mailcast",
                "subject": subject,
                "detail": detail,
                "timestamp": Utc::now().to_rfc3339(),
            }))
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| MailcastError::Alert(format!("webhook send failed: {e}")))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            Err(MailcastError::Alert(format!("webhook error {status}: {body}")))
        }
    }
}

/// Tries every channel; reports the first failure after all have run.
pub struct FanoutAlert {
    channels: Vec<Arc<dyn OperatorAlert>>,
}

impl FanoutAlert {
    pub fn new(channels: Vec<Arc<dyn OperatorAlert>>) -> Self {
        Self { channels }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[async_trait]
impl OperatorAlert for FanoutAlert {
    fn name(&self) -> &str {
        "fanout"
    }

    async fn notify(&self, subject: &str, detail: &str) -> Result<()> {
        let results = futures::future::join_all(
            self.channels.iter().map(|channel| channel.notify(subject, detail)),
        )
        .await;
        let mut first_error = None;
        for (channel, result) in self.channels.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!("Alert channel {} failed: {e}", channel.name());
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Build the alert chain described by `[alert]`. The log channel is always present.
pub fn alerts_from_config(
    config: &MailcastConfig,
    transport: Arc<dyn Transport>,
) -> Arc<dyn OperatorAlert> {
    let channels = alert_channels(config, transport);
    tracing::debug!("Operator alerts: {} channel(s)", channels.len());
    Arc::new(FanoutAlert::new(channels))
}

fn alert_channels(
    config: &MailcastConfig,
    transport: Arc<dyn Transport>,
) -> Vec<Arc<dyn OperatorAlert>> {
    let mut channels: Vec<Arc<dyn OperatorAlert>> = Vec::new();
    channels.push(Arc::new(TracingAlert));
    if !config.alert.log_only {
        if !config.alert.admin_emails.is_empty() {
            channels.push(Arc::new(AdminMailAlert::new(
                transport,
                config.smtp.from_address.clone(),
                config.alert.admin_emails.clone(),
                config.alert.subject_prefix.clone(),
            )));
        }
        if let Some(url) = config.alert.webhook_url.as_deref().filter(|u| !u.is_empty()) {
            channels.push(Arc::new(WebhookAlert::new(url)));
        }
    }
    channels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingAlert, Script, ScriptedTransport};

    #[tokio::test]
    async fn test_admin_mail_uses_prefix_and_all_admins() {
        let transport = Arc::new(ScriptedTransport::new());
        let alert = AdminMailAlert::new(
            transport.clone(),
            "news@example.com",
            vec!["ops@example.com".into(), "cto@example.com".into()],
            "[mailcast] ",
        );
        alert.notify("Delivery failed", "550 mailbox unavailable").await.unwrap();

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "[mailcast] Delivery failed");
        assert_eq!(sent[0].to.len(), 2);
        assert_eq!(sent[0].body, "550 mailbox unavailable");
    }

    #[tokio::test]
    async fn test_admin_mail_surfaces_transport_failure() {
        let transport = Arc::new(
            ScriptedTransport::new().script("ops@example.com", Script::Fail("421", "busy")),
        );
        let alert = AdminMailAlert::new(
            transport,
            "news@example.com",
            vec!["ops@example.com".into()],
            "",
        );
        let err = alert.notify("x", "y").await.unwrap_err();
        assert!(matches!(err, MailcastError::Alert(_)));
    }

    #[tokio::test]
    async fn test_fanout_tries_every_channel() {
        let broken = Arc::new(RecordingAlert::failing());
        let healthy = Arc::new(RecordingAlert::new());
        let channels: Vec<Arc<dyn OperatorAlert>> = vec![broken.clone(), healthy.clone()];
        let fanout = FanoutAlert::new(channels);

        assert!(fanout.notify("s", "d").await.is_err());
        assert_eq!(broken.notes().len(), 1);
        assert_eq!(healthy.notes().len(), 1);
    }

    #[test]
    fn test_alerts_from_config_respects_log_only() {
        let transport: Arc<dyn Transport> = Arc::new(ScriptedTransport::new());
        let mut config = MailcastConfig::default();
        config.alert.admin_emails = vec!["ops@example.com".into()];
        config.alert.webhook_url = Some("http://127.0.0.1:9/hook".into());
        let names = |config: &MailcastConfig| {
            alert_channels(config, transport.clone())
                .iter()
                .map(|c| c.name().to_string())
                .collect::<Vec<_>>()
        };
        assert_eq!(names(&config), vec!["log", "admin-mail", "webhook"]);

        config.alert.log_only = true;
        assert_eq!(names(&config), vec!["log"]);
        assert_eq!(alerts_from_config(&config, transport.clone()).name(), "fanout");
    }
}
