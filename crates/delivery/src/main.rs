use std::sync::Arc;

use courier_common::amqp;
use courier_common::config::AppConfig;
use courier_common::redis_pool::create_redis_pool;

use courier_delivery::consumer::QueueConsumer;
use courier_delivery::dispatch::SmtpDispatcher;
use courier_delivery::render::TemplateClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courier_delivery=info,courier_common=info".into()),
        )
        .json()
        .init();

    tracing::info!("Courier delivery worker starting...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Connect to Redis and the AMQP broker
    let redis = create_redis_pool(&config.redis_url).await?;
    let connection = amqp::connect(&config.amqp_url).await?;
    let channel = amqp::create_channel(&connection, config.prefetch_count).await?;

    // External collaborators
    let renderer = TemplateClient::new(&config)?;
    let dispatcher = SmtpDispatcher::new(&config)?;

    let consumer = Arc::new(QueueConsumer::new(
        channel, redis, config, renderer, dispatcher,
    ));

    // Ctrl+C stops intake; run() drains in-flight handlers to their
    // ack/reject before returning, and only then is the connection closed.
    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
    };
    if let Err(e) = consumer.run(shutdown).await {
        tracing::error!(error = %e, "Consumer exited with error");
        return Err(e);
    }

    connection.close(200, "shutdown").await.ok();
    tracing::info!("Courier delivery worker stopped.");
    Ok(())
}
