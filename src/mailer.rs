//! Outbound email alerts over SMTP.

use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::{MailConfig, SmtpConfig};

/// Sends one alert email. Failures are the caller's to log; they are never
/// retried.
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, subject: &str, body: &str) -> Result<()>;
}

/// SMTP relay client with from/to addresses fixed at construction.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl SmtpMailer {
    pub fn new(smtp: &SmtpConfig, mail: &MailConfig) -> Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(smtp.hostname.as_str())
            .port(smtp.port)
            .credentials(Credentials::new(
                smtp.username.clone(),
                smtp.password.clone(),
            ))
            .build();
        Ok(Self {
            transport,
            from: mail.from.parse().context("invalid mail.from address")?,
            to: mail.to.parse().context("invalid mail.to address")?,
        })
    }
}

#[async_trait]
impl MailSender for SmtpMailer {
    async fn send(&self, subject: &str, body: &str) -> Result<()> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(subject)
            .body(body.to_string())?;
        self.transport.send(message).await?;
        Ok(())
    }
}
