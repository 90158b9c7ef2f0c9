use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use lettre::message::{Mailbox, Message, SinglePart, header::ContentType};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use tracing::info;

use crate::core::config::SmtpConfig;

/// The email-send primitive. Called once per rendered job, strictly from
/// the serial delivery phase; implementations need no internal locking.
/// Delivery is at-least-once from the orchestrator's point of view.
#[async_trait]
pub trait DeliveryClient: Send + Sync {
    async fn send(&self, recipient: &str, subject: &str, html: &str) -> Result<()>;
}

pub struct SmtpDelivery {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

/// Parse comma-separated email addresses.
fn parse_recipients(addresses: &str) -> Result<Vec<Mailbox>> {
    addresses
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<Mailbox>()
                .map_err(|e| anyhow!("Invalid email address '{}': {}", s, e))
        })
        .collect()
}

impl SmtpDelivery {
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        if config.host.trim().is_empty() {
            return Err(anyhow!("SMTP host is not configured"));
        }
        let password = std::env::var(&config.password_env).with_context(|| {
            format!(
                "SMTP password not found in environment variable {}",
                config.password_env
            )
        })?;

        let from_addr = if config.from.trim().is_empty() {
            &config.username
        } else {
            &config.from
        };
        let from: Mailbox = from_addr
            .parse()
            .map_err(|e| anyhow!("Invalid sender address '{}': {}", from_addr, e))?;

        let creds = Credentials::new(config.username.clone(), password);
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
            .port(config.port)
            .credentials(creds)
            .build();

        Ok(Self { mailer, from })
    }
}

/// Stand-in used when the SMTP client cannot be constructed. Every send
/// fails with the construction error, so jobs surface as send failures in
/// the run summary instead of the whole run aborting.
pub struct UnavailableDelivery {
    reason: String,
}

impl UnavailableDelivery {
    pub fn new(reason: String) -> Self {
        Self { reason }
    }
}

#[async_trait]
impl DeliveryClient for UnavailableDelivery {
    async fn send(&self, recipient: &str, _subject: &str, _html: &str) -> Result<()> {
        Err(anyhow!(
            "Delivery client unavailable ({}); could not send to {}",
            self.reason,
            recipient
        ))
    }
}

#[async_trait]
impl DeliveryClient for SmtpDelivery {
    async fn send(&self, recipient: &str, subject: &str, html: &str) -> Result<()> {
        let to_addresses = parse_recipients(recipient)?;
        if to_addresses.is_empty() {
            return Err(anyhow!("At least one recipient is required"));
        }

        let mut builder = Message::builder().from(self.from.clone()).subject(subject);
        for to in to_addresses {
            builder = builder.to(to);
        }
        let message = builder.singlepart(
            SinglePart::builder()
                .header(ContentType::TEXT_HTML)
                .body(html.to_string()),
        )?;

        self.mailer
            .send(message)
            .await
            .map_err(|e| anyhow!("Failed to send email to {}: {}", recipient, e))?;
        info!("Email sent to {}", recipient);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comma_lists_parse_into_mailboxes() {
        let parsed = parse_recipients("a@example.com, b@example.com,,").unwrap();
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn bad_addresses_are_rejected() {
        assert!(parse_recipients("not an address").is_err());
    }
}
