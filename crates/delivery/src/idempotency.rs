//! Idempotency guard — atomic claim-once admission per request id.
//!
//! The queue delivers at least once, and multiple consumer processes (or
//! prefetch slots within one process) may race on redeliveries of the same
//! request id. The claim must therefore be one atomic remote operation, not
//! a read-then-write.
//!
//! Uses Redis `SET NX EX` for atomic check-and-set with automatic TTL expiry.

use redis::AsyncCommands;
use redis::aio::ConnectionManager;

/// Redis-backed claim-once gate.
pub struct IdempotencyGuard {
    redis: ConnectionManager,
    ttl_secs: u64,
}

impl IdempotencyGuard {
    pub fn new(redis: ConnectionManager, ttl_secs: u64) -> Self {
        Self { redis, ttl_secs }
    }

    /// Claim a request id.
    ///
    /// Returns `false` when this call newly acquired the claim (caller
    /// proceeds with side effects).
    /// Returns `true` when some earlier processing already holds the claim
    /// within the TTL window (caller must exit without side effects).
    ///
    /// Uses `SET key "1" NX EX ttl`:
    /// - NX = only set if the key doesn't exist
    /// - EX = expiry in seconds, so the guard never grows unbounded
    pub async fn claim(&self, request_id: &str) -> anyhow::Result<bool> {
        let key = format!("idempotency:{request_id}");
        let mut conn = self.redis.clone();

        // Returns Some("OK") if the key was set (claim acquired)
        // Returns None if the key already exists (duplicate)
        let result: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(self.ttl_secs)
            .query_async(&mut conn)
            .await?;

        let duplicate = result.is_none();

        if duplicate {
            tracing::debug!(request_id, "Request id already claimed");
        }

        Ok(duplicate)
    }

    /// Release a claim after a failed attempt that will be rescheduled.
    ///
    /// The retry copy carries the same request id, so without the release it
    /// would read as a duplicate at the next delivery and be dropped before
    /// the attempt runs. Claims for settled jobs (delivered or exhausted)
    /// stay in place until the TTL expires.
    pub async fn release(&self, request_id: &str) -> anyhow::Result<()> {
        let key = format!("idempotency:{request_id}");
        let mut conn = self.redis.clone();
        let _: () = conn.del(&key).await?;
        Ok(())
    }
}
