//! Queue consumer — binds the durable job queue and orchestrates the
//! delivery pipeline per message:
//!
//! 1. Decode and validate the job payload
//! 2. Drop messages whose request-id header disagrees with the body
//! 3. Idempotency claim (duplicates ack and stop, no side effects)
//! 4. Render then dispatch, each through the shared circuit breaker
//! 5. Persist terminal status, then ack/reject — never the other way
//!    around, so a crash between the two costs at most one redelivery
//! 6. On retryable failure, release the idempotency claim and republish a
//!    retry copy with an incremented attempt header; on exhaustion, keep
//!    the claim and let the reject dead-letter the message

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::task::JoinSet;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicRejectOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, ExchangeKind};
use redis::aio::ConnectionManager;

use courier_common::amqp::{
    self, HEADER_CORRELATION_ID, HEADER_REQUEST_ID, HEADER_RETRY_ATTEMPT,
};
use courier_common::config::AppConfig;
use courier_common::types::{DeliveryState, NotificationJob, RenderedContent};

use crate::breaker::CircuitBreaker;
use crate::dead_letter::DeadLetterRouter;
use crate::dispatch::Dispatch;
use crate::error::DeliveryError;
use crate::idempotency::IdempotencyGuard;
use crate::render::Render;
use crate::retry::{BackoffPolicy, RetryCoordinator};
use crate::status::StatusStore;

/// What to do about a failed attempt.
#[derive(Debug, PartialEq, Eq)]
enum FailureAction {
    /// Reschedule through the retry exchange with the incremented attempt.
    Retry { next_attempt: u32 },
    /// Attempts exhausted — the message's own reject dead-letters it.
    DeadLetter,
}

fn failure_action(policy: &BackoffPolicy, attempt: u32) -> FailureAction {
    if policy.is_retryable(attempt) {
        FailureAction::Retry {
            next_attempt: attempt + 1,
        }
    } else {
        FailureAction::DeadLetter
    }
}

/// Subject falls back to the job's free-form `extra.subject`, then empty —
/// a missing subject is not a delivery failure.
fn resolve_subject(rendered: &RenderedContent, job: &NotificationJob) -> String {
    rendered
        .subject
        .clone()
        .or_else(|| {
            job.metadata
                .extra
                .as_ref()
                .and_then(|extra| extra.get("subject"))
                .and_then(|value| value.as_str())
                .map(String::from)
        })
        .unwrap_or_default()
}

/// Render then dispatch, each call individually passed through the shared
/// breaker.
async fn execute_attempt<R: Render, D: Dispatch>(
    breaker: &CircuitBreaker,
    renderer: &R,
    dispatcher: &D,
    job: &NotificationJob,
    correlation_id: Option<&str>,
) -> Result<(), DeliveryError> {
    let rendered = breaker
        .call(|| renderer.render(job, correlation_id))
        .await?;

    let subject = resolve_subject(&rendered, job);
    breaker
        .call(|| dispatcher.send(&job.metadata.recipient_email, &subject, &rendered.body))
        .await
}

/// The consumer process: queue binding, manual-ack consumption, and the
/// per-message pipeline above.
pub struct QueueConsumer<R: Render, D: Dispatch> {
    channel: Channel,
    config: AppConfig,
    status: StatusStore,
    idempotency: IdempotencyGuard,
    retry: RetryCoordinator,
    breaker: CircuitBreaker,
    dead_letter: DeadLetterRouter,
    renderer: R,
    dispatcher: D,
}

impl<R, D> QueueConsumer<R, D>
where
    R: Render + 'static,
    D: Dispatch + 'static,
{
    pub fn new(
        channel: Channel,
        redis: ConnectionManager,
        config: AppConfig,
        renderer: R,
        dispatcher: D,
    ) -> Self {
        let status = StatusStore::new(redis.clone(), config.status_ttl_secs);
        let idempotency = IdempotencyGuard::new(redis.clone(), config.status_ttl_secs);
        let retry = RetryCoordinator::new(
            redis,
            config.status_ttl_secs,
            BackoffPolicy {
                base_delay_ms: config.retry_base_delay_ms,
                max_delay_ms: config.retry_max_delay_ms,
                max_attempts: config.retry_max_attempts,
            },
        );
        let breaker = CircuitBreaker::new(
            config.breaker_fail_max,
            Duration::from_secs(config.breaker_reset_timeout_secs),
        );
        let dead_letter = DeadLetterRouter::new(channel.clone(), &config);

        Self {
            channel,
            config,
            status,
            idempotency,
            retry,
            breaker,
            dead_letter,
            renderer,
            dispatcher,
        }
    }

    /// Declare the topology, bind the queue, and consume until the stream
    /// ends or `shutdown` resolves. Handlers run as independent tasks,
    /// bounded by the channel's prefetch; once intake stops, every in-flight
    /// handler is drained to its ack/reject before this returns, so the
    /// caller can safely close the connection afterwards.
    pub async fn run<S>(self: Arc<Self>, shutdown: S) -> anyhow::Result<()>
    where
        S: Future<Output = ()> + Send,
    {
        amqp::declare_core_exchanges(&self.channel, &self.config).await?;

        let mut arguments = FieldTable::default();
        arguments.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString(self.config.dead_letter_exchange.as_str().into()),
        );
        arguments.insert(
            "x-dead-letter-routing-key".into(),
            AMQPValue::LongString("email.dead".into()),
        );
        self.channel
            .queue_declare(
                &self.config.email_queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                arguments,
            )
            .await?;
        self.channel
            .queue_bind(
                &self.config.email_queue,
                &self.config.notifications_exchange,
                "email",
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        let mut consumer = self
            .channel
            .basic_consume(
                &self.config.email_queue,
                "courier-delivery",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        tracing::info!(
            queue = %self.config.email_queue,
            prefetch = self.config.prefetch_count,
            "Consumer started"
        );

        let mut handlers = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                delivery = consumer.next() => {
                    let Some(delivery) = delivery else { break };
                    let delivery = match delivery {
                        Ok(delivery) => delivery,
                        Err(e) => {
                            tracing::error!(error = %e, "Consume error");
                            continue;
                        }
                    };

                    let handler = Arc::clone(&self);
                    handlers.spawn(async move {
                        if let Err(e) = handler.handle_delivery(delivery).await {
                            tracing::error!(error = %e, "Delivery handler failed");
                        }
                    });
                }
                Some(finished) = handlers.join_next(), if !handlers.is_empty() => {
                    if let Err(e) = finished {
                        tracing::error!(error = %e, "Delivery handler panicked");
                    }
                }
                _ = &mut shutdown => {
                    tracing::info!("Shutdown signal received, stopping intake");
                    break;
                }
            }
        }

        // Intake has stopped; in-flight handlers settle their status write
        // and ack/reject before the caller may close the connection.
        tracing::info!(in_flight = handlers.len(), "Draining in-flight deliveries");
        while let Some(finished) = handlers.join_next().await {
            if let Err(e) = finished {
                tracing::error!(error = %e, "Delivery handler panicked");
            }
        }

        Ok(())
    }

    async fn handle_delivery(&self, delivery: Delivery) -> anyhow::Result<()> {
        let headers = delivery.properties.headers().as_ref();
        let attempt = amqp::header_u32(headers, HEADER_RETRY_ATTEMPT)
            .unwrap_or(1)
            .max(1);

        let job: NotificationJob = match serde_json::from_slice(&delivery.data) {
            Ok(job) => job,
            Err(e) => {
                // Not attributable to a request id — no status is written.
                tracing::warn!(error = %e, "Malformed job payload, dropping");
                delivery
                    .reject(BasicRejectOptions { requeue: false })
                    .await?;
                return Ok(());
            }
        };

        if let Some(expected) = amqp::header_str(headers, HEADER_REQUEST_ID) {
            if expected != job.request_id {
                tracing::warn!(
                    request_id = %job.request_id,
                    header_request_id = %expected,
                    "Request id header disagrees with body, dropping"
                );
                delivery.ack(BasicAckOptions::default()).await?;
                return Ok(());
            }
        }

        let correlation_id = amqp::header_str(headers, HEADER_CORRELATION_ID)
            .or_else(|| job.metadata.correlation_id.clone());

        tracing::info!(
            request_id = %job.request_id,
            user_id = %job.user_id,
            attempt,
            "Job received"
        );

        if self.idempotency.claim(&job.request_id).await? {
            tracing::info!(request_id = %job.request_id, "Duplicate delivery, skipping");
            delivery.ack(BasicAckOptions::default()).await?;
            return Ok(());
        }

        let span = self.retry.begin(&job.request_id).await?;
        let outcome = execute_attempt(
            &self.breaker,
            &self.renderer,
            &self.dispatcher,
            &job,
            correlation_id.as_deref(),
        )
        .await;
        if let Err(e) = self.retry.end(span).await {
            tracing::warn!(request_id = %job.request_id, error = %e, "Retry counter cleanup failed");
        }

        match outcome {
            Ok(()) => {
                self.status.set_delivered(&job.request_id).await?;
                tracing::info!(request_id = %job.request_id, "Delivered");
                delivery.ack(BasicAckOptions::default()).await?;
                self.publish_status_event(
                    &job.request_id,
                    DeliveryState::Delivered,
                    correlation_id.as_deref(),
                )
                .await;
            }
            Err(err) => {
                let error_text = err.to_string();
                tracing::warn!(
                    request_id = %job.request_id,
                    attempt,
                    error = %error_text,
                    "Attempt failed"
                );

                match failure_action(&self.retry.policy, attempt) {
                    FailureAction::Retry { next_attempt } => {
                        tokio::time::sleep(self.retry.policy.delay(attempt)).await;
                        self.status.set_failed(&job.request_id, &error_text).await?;
                        // Reopen the admission gate: the retry copy carries
                        // the same request id and must not read as a
                        // duplicate at the next delivery round.
                        self.idempotency.release(&job.request_id).await?;
                        self.dead_letter
                            .schedule_retry(&delivery.data, headers, next_attempt, &error_text)
                            .await;
                    }
                    FailureAction::DeadLetter => {
                        self.status.set_failed(&job.request_id, &error_text).await?;
                        tracing::error!(
                            request_id = %job.request_id,
                            attempts = attempt,
                            "Retries exhausted, message will dead-letter"
                        );
                    }
                }
                delivery
                    .reject(BasicRejectOptions { requeue: false })
                    .await?;
            }
        }

        Ok(())
    }

    /// Best-effort "delivered" broadcast. Failures are logged and never
    /// affect the job outcome.
    async fn publish_status_event(
        &self,
        request_id: &str,
        state: DeliveryState,
        correlation_id: Option<&str>,
    ) {
        let Some(exchange) = self.config.status_exchange.clone() else {
            return;
        };
        if let Err(e) = self
            .try_publish_status(&exchange, request_id, state, correlation_id)
            .await
        {
            tracing::warn!(request_id, error = %e, "Status event publish failed");
        }
    }

    async fn try_publish_status(
        &self,
        exchange: &str,
        request_id: &str,
        state: DeliveryState,
        correlation_id: Option<&str>,
    ) -> anyhow::Result<()> {
        self.channel
            .exchange_declare(
                exchange,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        let payload = serde_json::to_vec(&serde_json::json!({
            "request_id": request_id,
            "status": state.as_str(),
        }))?;

        let mut headers = FieldTable::default();
        headers.insert(
            HEADER_CORRELATION_ID.into(),
            AMQPValue::LongString(correlation_id.unwrap_or(request_id).into()),
        );

        self.channel
            .basic_publish(
                exchange,
                "email.status",
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default()
                    .with_content_type("application/json".into())
                    .with_headers(headers),
            )
            .await?
            .await?;

        Ok(())
    }
}
