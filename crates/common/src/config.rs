use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// AMQP connection string
    pub amqp_url: String,

    /// Redis connection string
    pub redis_url: String,

    /// Exchange carrying inbound notification jobs
    pub notifications_exchange: String,

    /// Durable queue for email jobs, bound with routing key "email"
    pub email_queue: String,

    /// Exchange used to republish failed jobs for delayed redelivery
    pub retry_exchange: String,

    /// Dead-letter exchange configured on the primary queue
    pub dead_letter_exchange: String,

    /// Optional exchange for best-effort terminal-state broadcast
    pub status_exchange: Option<String>,

    /// Maximum number of unacknowledged deliveries per consumer process
    pub prefetch_count: u16,

    /// Template service base URL
    pub template_service_url: String,

    /// Bearer token for the template service
    pub template_service_token: String,

    /// Timeout applied to each render call, in seconds
    pub render_timeout_secs: u64,

    /// SMTP relay settings
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub smtp_use_tls: bool,

    /// TTL for status records, idempotency tokens, and retry counters
    pub status_ttl_secs: u64,

    /// Consecutive failures before the circuit breaker opens
    pub breaker_fail_max: u32,

    /// Seconds the breaker stays open before admitting a trial call
    pub breaker_reset_timeout_secs: u64,

    /// Retry backoff tuning
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub retry_max_attempts: u32,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            amqp_url: std::env::var("AMQP_URL")
                .map_err(|_| anyhow::anyhow!("AMQP_URL environment variable is required"))?,
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            notifications_exchange: std::env::var("NOTIFICATIONS_EXCHANGE")
                .unwrap_or_else(|_| "notifications.direct".to_string()),
            email_queue: std::env::var("EMAIL_QUEUE")
                .unwrap_or_else(|_| "email.queue".to_string()),
            retry_exchange: std::env::var("RETRY_EXCHANGE")
                .unwrap_or_else(|_| "notifications.retry".to_string()),
            dead_letter_exchange: std::env::var("DEAD_LETTER_EXCHANGE")
                .unwrap_or_else(|_| "notifications.dlx".to_string()),
            status_exchange: std::env::var("STATUS_EXCHANGE").ok(),
            prefetch_count: std::env::var("PREFETCH_COUNT")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PREFETCH_COUNT must be a valid u16"))?,
            template_service_url: std::env::var("TEMPLATE_SERVICE_URL").map_err(|_| {
                anyhow::anyhow!("TEMPLATE_SERVICE_URL environment variable is required")
            })?,
            template_service_token: std::env::var("TEMPLATE_SERVICE_TOKEN").map_err(|_| {
                anyhow::anyhow!("TEMPLATE_SERVICE_TOKEN environment variable is required")
            })?,
            render_timeout_secs: std::env::var("RENDER_TIMEOUT_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("RENDER_TIMEOUT_SECS must be a valid u64"))?,
            smtp_host: std::env::var("SMTP_HOST")
                .map_err(|_| anyhow::anyhow!("SMTP_HOST environment variable is required"))?,
            smtp_port: std::env::var("SMTP_PORT")
                .unwrap_or_else(|_| "587".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("SMTP_PORT must be a valid u16"))?,
            smtp_username: std::env::var("SMTP_USERNAME")
                .map_err(|_| anyhow::anyhow!("SMTP_USERNAME environment variable is required"))?,
            smtp_password: std::env::var("SMTP_PASSWORD")
                .map_err(|_| anyhow::anyhow!("SMTP_PASSWORD environment variable is required"))?,
            smtp_use_tls: std::env::var("SMTP_USE_TLS")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("SMTP_USE_TLS must be true or false"))?,
            status_ttl_secs: std::env::var("STATUS_TTL_SECS")
                .unwrap_or_else(|_| "600".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("STATUS_TTL_SECS must be a valid u64"))?,
            breaker_fail_max: std::env::var("BREAKER_FAIL_MAX")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("BREAKER_FAIL_MAX must be a valid u32"))?,
            breaker_reset_timeout_secs: std::env::var("BREAKER_RESET_TIMEOUT_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("BREAKER_RESET_TIMEOUT_SECS must be a valid u64"))?,
            retry_base_delay_ms: std::env::var("RETRY_BASE_DELAY_MS")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("RETRY_BASE_DELAY_MS must be a valid u64"))?,
            retry_max_delay_ms: std::env::var("RETRY_MAX_DELAY_MS")
                .unwrap_or_else(|_| "60000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("RETRY_MAX_DELAY_MS must be a valid u64"))?,
            retry_max_attempts: std::env::var("RETRY_MAX_ATTEMPTS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("RETRY_MAX_ATTEMPTS must be a valid u32"))?,
        })
    }
}
