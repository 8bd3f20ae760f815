//! SMTP dispatcher — sends rendered content over the mail transport.

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use courier_common::config::AppConfig;

use crate::error::DeliveryError;

/// Dispatch seam for the consumer pipeline.
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn send(&self, recipient: &str, subject: &str, body: &str)
    -> Result<(), DeliveryError>;
}

/// Dispatcher backed by an async SMTP relay.
pub struct SmtpDispatcher {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpDispatcher {
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let credentials =
            Credentials::new(config.smtp_username.clone(), config.smtp_password.clone());
        let builder = if config.smtp_use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
        };
        let transport = builder.port(config.smtp_port).credentials(credentials).build();

        let from = config
            .smtp_username
            .parse::<Mailbox>()
            .map_err(|e| anyhow::anyhow!("SMTP_USERNAME is not a valid sender address: {e}"))?;

        Ok(Self { transport, from })
    }
}

#[async_trait]
impl Dispatch for SmtpDispatcher {
    /// Mail transport failures are transient dependency failures; the retry
    /// decision lives with the caller.
    async fn send(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), DeliveryError> {
        let to = recipient
            .parse::<Mailbox>()
            .map_err(|e| DeliveryError::Transient(format!("invalid recipient address: {e}")))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| DeliveryError::Transient(format!("message build failed: {e}")))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| DeliveryError::Transient(format!("smtp send failed: {e}")))?;

        Ok(())
    }
}
