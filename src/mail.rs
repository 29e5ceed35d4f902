//! Digest delivery over SMTP.

use crate::config::{ConfigError, MailConfig};
use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum MailError {
    #[error("invalid address {0}: {1}")]
    Address(String, lettre::address::AddressError),
    #[error("failed to build email message: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("failed to send email via SMTP: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// A rendered digest ready to send
#[derive(Debug, Clone)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Something that can deliver one email
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError>;
}

/// Mailer using an authenticated STARTTLS relay
pub struct SmtpMailer {
    config: MailConfig,
}

impl SmtpMailer {
    pub fn new(config: MailConfig) -> Self {
        Self { config }
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, MailError> {
    address
        .parse()
        .map_err(|e| MailError::Address(address.to_string(), e))
}

/// Build the multipart message for a digest
pub fn build_message(from: &str, mail: &OutgoingMail) -> Result<Message, MailError> {
    let message = Message::builder()
        .from(parse_mailbox(from)?)
        .to(parse_mailbox(&mail.to)?)
        .subject(mail.subject.as_str())
        .multipart(
            MultiPart::alternative()
                .singlepart(
                    SinglePart::builder()
                        .header(ContentType::TEXT_PLAIN)
                        .body(mail.text.clone()),
                )
                .singlepart(
                    SinglePart::builder()
                        .header(ContentType::TEXT_HTML)
                        .body(mail.html.clone()),
                ),
        )?;
    Ok(message)
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        let (user, pass) = self.config.credentials()?;
        let message = build_message(user, mail)?;

        let mailer: AsyncSmtpTransport<Tokio1Executor> =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.smtp_host)?
                .port(self.config.smtp_port)
                .credentials(Credentials::new(user.to_string(), pass.to_string()))
                .build();

        mailer.send(message).await?;

        info!(to = %mail.to, subject = %mail.subject, "email sent");
        Ok(())
    }
}
