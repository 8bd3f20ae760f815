//! AMQP connection and topology helpers shared by the delivery pipeline.
//!
//! The broker topology is: one direct exchange for inbound jobs, bound to a
//! durable queue per notification type; a retry exchange that redelivers
//! failed jobs after a broker-side delay; and a dead-letter exchange
//! configured on the primary queue for permanently rejected messages.

use lapin::options::{BasicQosOptions, ExchangeDeclareOptions};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{Channel, Connection, ConnectionProperties, ExchangeKind};

use crate::config::AppConfig;

/// Header carrying the correlation id across services.
pub const HEADER_CORRELATION_ID: &str = "x-correlation-id";
/// Header carrying the original request id, for tamper/mismatch detection.
pub const HEADER_REQUEST_ID: &str = "x-request-id";
/// Header carrying the attempt number of the delivery it rides on.
pub const HEADER_RETRY_ATTEMPT: &str = "x-retry-attempt";
/// Header carrying the last recorded error, set on retry republish.
pub const HEADER_LAST_ERROR: &str = "x-error";

/// Connect to the AMQP broker.
pub async fn connect(amqp_url: &str) -> anyhow::Result<Connection> {
    let connection = Connection::connect(amqp_url, ConnectionProperties::default()).await?;

    tracing::info!("Connected to AMQP broker");
    Ok(connection)
}

/// Create a channel with the given prefetch bound.
///
/// Prefetch caps the number of unacknowledged deliveries the broker pushes
/// to this channel, which is what bounds per-process handler concurrency.
pub async fn create_channel(connection: &Connection, prefetch: u16) -> anyhow::Result<Channel> {
    let channel = connection.create_channel().await?;
    channel
        .basic_qos(prefetch, BasicQosOptions::default())
        .await?;
    Ok(channel)
}

/// Declare the durable direct exchanges the pipeline depends on.
pub async fn declare_core_exchanges(channel: &Channel, config: &AppConfig) -> anyhow::Result<()> {
    for name in [
        &config.notifications_exchange,
        &config.retry_exchange,
        &config.dead_letter_exchange,
    ] {
        channel
            .exchange_declare(
                name,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
    }
    Ok(())
}

/// Read a string-valued header, tolerating both AMQP string encodings.
pub fn header_str(headers: Option<&FieldTable>, key: &str) -> Option<String> {
    match header_value(headers, key)? {
        AMQPValue::LongString(s) => Some(String::from_utf8_lossy(s.as_bytes()).into_owned()),
        AMQPValue::ShortString(s) => Some(s.as_str().to_string()),
        _ => None,
    }
}

/// Read an integer-valued header regardless of which AMQP int type the
/// publisher chose.
pub fn header_u32(headers: Option<&FieldTable>, key: &str) -> Option<u32> {
    match header_value(headers, key)? {
        AMQPValue::ShortShortInt(v) => u32::try_from(*v).ok(),
        AMQPValue::ShortShortUInt(v) => Some(u32::from(*v)),
        AMQPValue::ShortInt(v) => u32::try_from(*v).ok(),
        AMQPValue::ShortUInt(v) => Some(u32::from(*v)),
        AMQPValue::LongInt(v) => u32::try_from(*v).ok(),
        AMQPValue::LongUInt(v) => Some(*v),
        AMQPValue::LongLongInt(v) => u32::try_from(*v).ok(),
        _ => None,
    }
}

fn header_value<'a>(headers: Option<&'a FieldTable>, key: &str) -> Option<&'a AMQPValue> {
    headers?
        .inner()
        .iter()
        .find(|(k, _)| k.as_str() == key)
        .map(|(_, v)| v)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(entries: Vec<(&str, AMQPValue)>) -> FieldTable {
        let mut table = FieldTable::default();
        for (key, value) in entries {
            table.insert(key.into(), value);
        }
        table
    }

    #[test]
    fn test_header_str_reads_long_and_short_strings() {
        let headers = table(vec![
            ("long", AMQPValue::LongString("abc".into())),
            ("short", AMQPValue::ShortString("def".into())),
        ]);
        assert_eq!(header_str(Some(&headers), "long"), Some("abc".to_string()));
        assert_eq!(header_str(Some(&headers), "short"), Some("def".to_string()));
        assert_eq!(header_str(Some(&headers), "missing"), None);
        assert_eq!(header_str(None, "long"), None);
    }

    #[test]
    fn test_header_u32_accepts_any_int_encoding() {
        let headers = table(vec![
            ("int", AMQPValue::LongInt(3)),
            ("llong", AMQPValue::LongLongInt(7)),
            ("negative", AMQPValue::LongInt(-1)),
            ("string", AMQPValue::LongString("3".into())),
        ]);
        assert_eq!(header_u32(Some(&headers), "int"), Some(3));
        assert_eq!(header_u32(Some(&headers), "llong"), Some(7));
        assert_eq!(header_u32(Some(&headers), "negative"), None);
        assert_eq!(header_u32(Some(&headers), "string"), None);
    }
}
