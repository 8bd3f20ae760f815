use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Notification channels carried by the job payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Email,
    Push,
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationType::Email => write!(f, "email"),
            NotificationType::Push => write!(f, "push"),
        }
    }
}

/// Last known delivery outcome for a request id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    Pending,
    Delivered,
    Failed,
}

impl DeliveryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryState::Pending => "pending",
            DeliveryState::Delivered => "delivered",
            DeliveryState::Failed => "failed",
        }
    }

    /// Parse the string form written to Redis. Returns `None` for anything
    /// that isn't one of the three known states.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DeliveryState::Pending),
            "delivered" => Some(DeliveryState::Delivered),
            "failed" => Some(DeliveryState::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Template variables for the render call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateVariables {
    pub name: String,
    pub link: String,
    /// Free-form extras forwarded to the template service as-is.
    #[serde(default)]
    pub meta: Option<serde_json::Value>,
}

/// Recipient-side metadata carried by the job payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientMetadata {
    pub recipient_email: String,
    #[serde(default = "default_locale")]
    pub locale: String,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub extra: Option<serde_json::Value>,
}

/// A notification job decoded from a queue message.
///
/// `request_id` is the sole key for idempotency, retry counting, and status;
/// it is stable across redeliveries of the same logical job, including retry
/// copies republished by the dead-letter router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationJob {
    pub notification_type: NotificationType,
    pub user_id: Uuid,
    pub template_code: String,
    pub variables: TemplateVariables,
    pub request_id: String,
    /// Advisory only — the delivery pipeline passes it through unused.
    #[serde(default = "default_priority")]
    pub priority: i32,
    pub metadata: RecipientMetadata,
}

/// Rendered message content returned by the template service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderedContent {
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub body: String,
}

/// Delivery status record as stored per request id. Overwritten in place;
/// only the latest state is kept, and the record expires after the
/// configured TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub state: DeliveryState,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

fn default_locale() -> String {
    "en".to_string()
}

fn default_priority() -> i32 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_decodes_with_defaults() {
        let raw = serde_json::json!({
            "notification_type": "email",
            "user_id": "6f8e0c2f-55c8-4c9e-9f3a-1f2d3c4b5a69",
            "template_code": "welcome",
            "variables": { "name": "Ada", "link": "https://example.com/verify" },
            "request_id": "req-1",
            "metadata": { "recipient_email": "ada@example.com" }
        });
        let job: NotificationJob = serde_json::from_value(raw).unwrap();
        assert_eq!(job.priority, 5);
        assert_eq!(job.metadata.locale, "en");
        assert!(job.metadata.correlation_id.is_none());
        assert_eq!(job.notification_type, NotificationType::Email);
    }

    #[test]
    fn test_job_rejects_missing_request_id() {
        let raw = serde_json::json!({
            "notification_type": "email",
            "user_id": "6f8e0c2f-55c8-4c9e-9f3a-1f2d3c4b5a69",
            "template_code": "welcome",
            "variables": { "name": "Ada", "link": "https://example.com/verify" },
            "metadata": { "recipient_email": "ada@example.com" }
        });
        assert!(serde_json::from_value::<NotificationJob>(raw).is_err());
    }

    #[test]
    fn test_delivery_state_round_trips_through_strings() {
        for state in [
            DeliveryState::Pending,
            DeliveryState::Delivered,
            DeliveryState::Failed,
        ] {
            assert_eq!(DeliveryState::parse(state.as_str()), Some(state));
        }
        assert_eq!(DeliveryState::parse("bogus"), None);
    }
}
