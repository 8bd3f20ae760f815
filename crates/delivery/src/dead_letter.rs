//! Dead-letter router — republishes failed jobs toward the retry topology.
//!
//! A retry copy carries the original body plus updated attempt/error
//! headers, routed by the original queue name so broker-side TTL and
//! dead-letter chaining redeliver it after a delay. Publish failures are
//! logged, never escalated: at worst the retry copy is dropped and the job
//! settles as dead-lettered through the original message's own reject.

use lapin::options::BasicPublishOptions;
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel};

use courier_common::amqp::{HEADER_LAST_ERROR, HEADER_RETRY_ATTEMPT};
use courier_common::config::AppConfig;

pub struct DeadLetterRouter {
    channel: Channel,
    retry_exchange: String,
    routing_key: String,
}

impl DeadLetterRouter {
    pub fn new(channel: Channel, config: &AppConfig) -> Self {
        Self {
            channel,
            retry_exchange: config.retry_exchange.clone(),
            routing_key: config.email_queue.clone(),
        }
    }

    /// Republish a copy of the failed job with the incremented attempt
    /// number and the last error. Best-effort: failures are logged and
    /// swallowed.
    pub async fn schedule_retry(
        &self,
        body: &[u8],
        headers: Option<&FieldTable>,
        next_attempt: u32,
        error: &str,
    ) {
        if let Err(e) = self.publish(body, headers, next_attempt, error).await {
            tracing::warn!(
                error = %e,
                next_attempt,
                "Failed to republish retry copy, job will rely on dead-letter routing"
            );
        } else {
            tracing::info!(next_attempt, "Retry copy republished");
        }
    }

    async fn publish(
        &self,
        body: &[u8],
        headers: Option<&FieldTable>,
        next_attempt: u32,
        error: &str,
    ) -> anyhow::Result<()> {
        let mut table = headers.cloned().unwrap_or_default();
        table.insert(
            HEADER_RETRY_ATTEMPT.into(),
            AMQPValue::LongInt(next_attempt as i32),
        );
        table.insert(HEADER_LAST_ERROR.into(), AMQPValue::LongString(error.into()));

        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(2)
            .with_headers(table);

        self.channel
            .basic_publish(
                &self.retry_exchange,
                &self.routing_key,
                BasicPublishOptions::default(),
                body,
                properties,
            )
            .await?
            .await?;

        Ok(())
    }
}
