//! SMTP relay transport (async lettre).

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message as LettreMessage, Tokio1Executor};
use std::time::Duration;

use mailcast_core::config::SmtpConfig;
use mailcast_core::error::{MailcastError, Result, TransportError};
use mailcast_core::traits::{SendReport, Transport};

/// Sends through one configured relay. Connections are pooled by lettre.
pub struct SmtpTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    host: String,
}

impl SmtpTransport {
    pub fn from_config(config: &SmtpConfig) -> Result<Self> {
        let builder = if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| MailcastError::Config(format!("SMTP relay: {e}")))?
        } else {
            // Plain connection, for local relays only
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        };
        let mut builder = builder
            .port(config.port)
            .timeout(Some(Duration::from_secs(config.timeout_secs)));
        if !config.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ));
        }
        tracing::debug!("SMTP relay {}:{} (starttls={})", config.host, config.port, config.starttls);
        Ok(Self {
            mailer: builder.build(),
            host: config.host.clone(),
        })
    }

    fn build(
        subject: &str,
        body: &str,
        from: &str,
        to: &[String],
    ) -> std::result::Result<LettreMessage, TransportError> {
        let from: Mailbox = from
            .parse()
            .map_err(|e| TransportError::new(format!("Invalid from: {e}")))?;
        let mut builder = LettreMessage::builder()
            .from(from)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN);
        for address in to {
            let mailbox: Mailbox = address
                .parse()
                .map_err(|e| TransportError::new(format!("Invalid to '{address}': {e}")))?;
            builder = builder.to(mailbox);
        }
        builder
            .body(body.to_string())
            .map_err(|e| TransportError::new(format!("Build email: {e}")))
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    fn name(&self) -> &str {
        &self.host
    }

    async fn send(
        &self,
        subject: &str,
        body: &str,
        from: &str,
        to: &[String],
    ) -> std::result::Result<SendReport, TransportError> {
        if to.is_empty() {
            return Ok(SendReport::accepted(0));
        }
        let email = Self::build(subject, body, from, to)?;
        match self.mailer.send(email).await {
            Ok(response) => {
                let accepted = if response.is_positive() { to.len() } else { 0 };
                tracing::debug!("📤 Relay answered {} for {} recipient(s)", response.code(), to.len());
                Ok(SendReport {
                    accepted,
                    response_code: Some(response.code().to_string()),
                })
            }
            Err(e) => Err(TransportError {
                code: e.status().map(|code| code.to_string()),
                message: format!("SMTP send: {e}"),
            }),
        }
    }
}
