//! Mail transports: SMTP (settings-driven) and the Resend HTTP API.

use anyhow::anyhow;
use async_trait::async_trait;
use courier_core::model::SmtpSettings;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::channels::{ChannelError, MailTransport, OutgoingEmail};

fn mailbox(address: &str, name: Option<&str>) -> Result<Mailbox, ChannelError> {
    let spec = match name {
        Some(name) if !name.trim().is_empty() => format!("{} <{}>", name, address),
        _ => address.to_string(),
    };
    spec.parse()
        .map_err(|e| ChannelError::Transport(format!("invalid address {}: {}", address, e)))
}

/// Sends through the SMTP server named in the notification settings.
#[derive(Default)]
pub struct SmtpTransport;

impl SmtpTransport {
    pub fn new() -> Self {
        Self
    }

    fn mailer(smtp: &SmtpSettings) -> Result<AsyncSmtpTransport<Tokio1Executor>, ChannelError> {
        let host = smtp
            .host
            .as_deref()
            .ok_or(ChannelError::ConfigurationMissing(courier_core::model::Channel::Email))?;

        let mut builder = if smtp.tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .map_err(|e| ChannelError::Transport(format!("SMTP relay {}: {}", host, e)))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
        };
        builder = builder.port(smtp.port);

        if smtp.auth {
            if let (Some(user), Some(password)) = (&smtp.username, &smtp.password) {
                builder = builder.credentials(Credentials::new(user.clone(), password.clone()));
            }
        }

        Ok(builder.build())
    }
}

#[async_trait]
impl MailTransport for SmtpTransport {
    async fn deliver(&self, smtp: &SmtpSettings, email: &OutgoingEmail) -> Result<(), ChannelError> {
        let message = Message::builder()
            .from(mailbox(&email.from, email.from_name.as_deref())?)
            .to(mailbox(&email.to, None)?)
            .subject(email.subject.clone())
            .multipart(MultiPart::alternative_plain_html(
                email.text.clone(),
                email.html.clone(),
            ))
            .map_err(|e| ChannelError::Transport(format!("failed to build email: {}", e)))?;

        Self::mailer(smtp)?
            .send(message)
            .await
            .map_err(|e| ChannelError::Transport(format!("SMTP send failed: {}", e)))?;
        Ok(())
    }
}

const RESEND_API_URL: &str = "https://api.resend.com/emails";

#[derive(Debug, Serialize)]
struct ResendEmailRequest<'a> {
    from: String,
    to: Vec<&'a str>,
    subject: &'a str,
    html: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct ResendEmailResponse {
    id: String,
}

/// Sends through the Resend HTTP API. Used when `RESEND_API_KEY` is set.
pub struct ResendTransport {
    client: reqwest::Client,
    api_key: String,
    from_override: Option<String>,
}

impl ResendTransport {
    pub fn new(api_key: String, from_override: Option<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;
        tracing::info!("Resend email client initialized");
        Ok(Self {
            client,
            api_key,
            from_override,
        })
    }
}

#[async_trait]
impl MailTransport for ResendTransport {
    async fn deliver(&self, _smtp: &SmtpSettings, email: &OutgoingEmail) -> Result<(), ChannelError> {
        let from_address = self.from_override.as_deref().unwrap_or(&email.from);
        let from = match email.from_name.as_deref() {
            Some(name) if !name.trim().is_empty() => format!("{} <{}>", name, from_address),
            _ => from_address.to_string(),
        };
        let request = ResendEmailRequest {
            from,
            to: vec![email.to.as_str()],
            subject: &email.subject,
            html: &email.html,
            text: &email.text,
        };

        let response = self
            .client
            .post(RESEND_API_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ChannelError::Transport(format!("Resend request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ChannelError::Transport(format!(
                "Resend API returned {}: {}",
                status, error_text
            )));
        }

        let sent: ResendEmailResponse = response
            .json()
            .await
            .map_err(|e| ChannelError::Transport(format!("Unreadable Resend response: {}", e)))?;
        tracing::debug!(email_id = %sent.id, "Email accepted by Resend");
        Ok(())
    }
}
