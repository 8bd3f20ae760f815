use redis::Client;
use redis::aio::ConnectionManager;

/// Create a shared Redis connection manager.
///
/// The manager is cheap to clone; each component holds its own clone and all
/// clones multiplex over one reconnecting connection.
pub async fn create_redis_pool(redis_url: &str) -> anyhow::Result<ConnectionManager> {
    let client = Client::open(redis_url)?;
    let manager = ConnectionManager::new(client).await?;

    tracing::info!("Connected to Redis");
    Ok(manager)
}
