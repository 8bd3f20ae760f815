//! Delivery status store — last known outcome per request id.
//!
//! One Redis hash per request id, overwritten on every write (no history).
//! Records expire after the configured retention window; absence of a record
//! means "unknown or expired", not "never delivered".

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use courier_common::types::{DeliveryRecord, DeliveryState};

/// Redis-backed status store with overwrite semantics.
pub struct StatusStore {
    redis: ConnectionManager,
    ttl_secs: u64,
}

impl StatusStore {
    pub fn new(redis: ConnectionManager, ttl_secs: u64) -> Self {
        Self { redis, ttl_secs }
    }

    fn key(request_id: &str) -> String {
        format!("notification_status:{request_id}")
    }

    /// Write the latest state for a request id, replacing any prior record
    /// entirely and refreshing its TTL.
    pub async fn set_status(
        &self,
        request_id: &str,
        state: DeliveryState,
        error: Option<&str>,
    ) -> anyhow::Result<()> {
        let key = Self::key(request_id);
        let mut conn = self.redis.clone();

        // DEL before HSET so a delivered record doesn't keep the error field
        // of an earlier failed one.
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.del(&key).ignore();
        pipe.hset(&key, "status", state.as_str()).ignore();
        pipe.hset(&key, "updated_at", Utc::now().to_rfc3339()).ignore();
        if let Some(error) = error {
            pipe.hset(&key, "error", error).ignore();
        }
        pipe.expire(&key, self.ttl_secs as i64).ignore();
        let _: () = pipe.query_async(&mut conn).await?;

        Ok(())
    }

    pub async fn set_delivered(&self, request_id: &str) -> anyhow::Result<()> {
        self.set_status(request_id, DeliveryState::Delivered, None)
            .await
    }

    pub async fn set_failed(&self, request_id: &str, error: &str) -> anyhow::Result<()> {
        self.set_status(request_id, DeliveryState::Failed, Some(error))
            .await
    }

    /// Fetch the latest record for a request id, or `None` when absent or
    /// expired.
    pub async fn get_status(&self, request_id: &str) -> anyhow::Result<Option<DeliveryRecord>> {
        let mut conn = self.redis.clone();
        let fields: HashMap<String, String> = conn.hgetall(Self::key(request_id)).await?;
        Ok(record_from_fields(&fields))
    }
}

/// Decode a status hash into a record. Returns `None` for an empty hash or
/// an unrecognized state value.
fn record_from_fields(fields: &HashMap<String, String>) -> Option<DeliveryRecord> {
    let state = DeliveryState::parse(fields.get("status")?)?;
    let updated_at = fields
        .get("updated_at")
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    Some(DeliveryRecord {
        state,
        error: fields.get("error").cloned(),
        updated_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_record_from_fields_failed_with_error() {
        let record = record_from_fields(&fields(&[
            ("status", "failed"),
            ("error", "smtp send failed"),
            ("updated_at", "2026-01-02T03:04:05+00:00"),
        ]))
        .unwrap();
        assert_eq!(record.state, DeliveryState::Failed);
        assert_eq!(record.error.as_deref(), Some("smtp send failed"));
        assert_eq!(record.updated_at.to_rfc3339(), "2026-01-02T03:04:05+00:00");
    }

    #[test]
    fn test_record_from_fields_delivered_has_no_error() {
        let record =
            record_from_fields(&fields(&[("status", "delivered")])).unwrap();
        assert_eq!(record.state, DeliveryState::Delivered);
        assert!(record.error.is_none());
    }

    #[test]
    fn test_record_from_fields_empty_or_garbage_is_none() {
        assert!(record_from_fields(&HashMap::new()).is_none());
        assert!(record_from_fields(&fields(&[("status", "unknown")])).is_none());
    }
}
