//! Retry coordination — attempt counting and exponential backoff.
//!
//! The coordinator does not retry anything itself. It scopes one delivery
//! round's attempt span (a Redis counter with TTL), and the backoff policy
//! decides whether a failure is retryable and how long to wait before the
//! failure is signalled upward. The actual redelivery delay comes from the
//! broker's retry topology; the attempt progression across redeliveries is
//! carried in the `x-retry-attempt` message header, not in this counter.

use std::time::Duration;

use rand::Rng;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

/// Backoff and retry-limit tuning. Pure decisions, no I/O.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl BackoffPolicy {
    /// Whether a failure on the given attempt should be rescheduled.
    pub fn is_retryable(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Backoff for attempt `n`: `min(base * 2^(n-1), max)` plus uniform
    /// jitter in `[0, base)` so many jobs failing together don't retry in
    /// lockstep.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let grown = self.base_delay_ms.saturating_mul(1u64 << exponent);
        let capped = grown.min(self.max_delay_ms);
        let jitter = if self.base_delay_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..self.base_delay_ms)
        };
        Duration::from_millis(capped.saturating_add(jitter))
    }
}

/// One delivery round's attempt span for a request id.
#[derive(Debug)]
pub struct RetrySpan {
    pub attempt: u64,
    key: String,
}

/// Redis-backed attempt counter plus the backoff policy.
pub struct RetryCoordinator {
    redis: ConnectionManager,
    ttl_secs: u64,
    pub policy: BackoffPolicy,
}

impl RetryCoordinator {
    pub fn new(redis: ConnectionManager, ttl_secs: u64, policy: BackoffPolicy) -> Self {
        Self {
            redis,
            ttl_secs,
            policy,
        }
    }

    /// Open an attempt span: atomically increment the per-request counter
    /// and refresh its TTL.
    pub async fn begin(&self, request_id: &str) -> anyhow::Result<RetrySpan> {
        let key = format!("retry_attempt:{request_id}");
        let mut conn = self.redis.clone();
        let attempt: u64 = conn.incr(&key, 1).await?;
        let _: () = conn.expire(&key, self.ttl_secs as i64).await?;
        Ok(RetrySpan { attempt, key })
    }

    /// Close an attempt span.
    ///
    /// A span that was the first attempt of its round clears the counter
    /// regardless of outcome, so every delivery round starts counting from
    /// one. The `x-retry-attempt` header is what carries real attempt
    /// progression across redeliveries.
    pub async fn end(&self, span: RetrySpan) -> anyhow::Result<()> {
        if span.attempt == 1 {
            let mut conn = self.redis.clone();
            let _: () = conn.del(&span.key).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            max_attempts: 5,
        }
    }

    #[test]
    fn test_delay_within_jittered_bounds() {
        let policy = policy();
        for attempt in 1..=8u32 {
            let floor = (1_000u64 << (attempt - 1)).min(60_000);
            for _ in 0..50 {
                let delay = policy.delay(attempt).as_millis() as u64;
                assert!(delay >= floor, "attempt {attempt}: {delay} < {floor}");
                assert!(
                    delay < floor + 1_000,
                    "attempt {attempt}: {delay} >= {}",
                    floor + 1_000
                );
            }
        }
    }

    #[test]
    fn test_delay_caps_at_max_plus_jitter() {
        let policy = policy();
        // 1000 * 2^9 = 512_000 > cap
        let delay = policy.delay(10).as_millis() as u64;
        assert!((60_000..61_000).contains(&delay));
    }

    #[test]
    fn test_zero_base_delay_does_not_panic() {
        let policy = BackoffPolicy {
            base_delay_ms: 0,
            max_delay_ms: 60_000,
            max_attempts: 5,
        };
        assert_eq!(policy.delay(3), Duration::from_millis(0));
    }

    #[test]
    fn test_retryable_below_max_attempts_only() {
        let policy = policy();
        assert!(policy.is_retryable(1));
        assert!(policy.is_retryable(4));
        assert!(!policy.is_retryable(5));
        assert!(!policy.is_retryable(6));
    }
}
