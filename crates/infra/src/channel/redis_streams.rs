//! Redis Streams-backed event channel (durable, at-least-once delivery).
//!
//! Uses a consumer group over a single stream:
//! - **Durable delivery**: messages persist until XACK'd
//! - **At-least-once**: unacknowledged messages are reclaimed after an idle
//!   timeout (a nack simply leaves the entry pending)
//! - **Attempt tracking**: the group's per-entry delivery count is the
//!   `attempt` the runner bounds retries on
//! - **Dead-letter queue**: exhausted messages are copied to a DLQ stream

use std::sync::Arc;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tracing::{instrument, warn};

use shipbill_events::{AckHandle, ChannelError, Delivery, EventChannel};

/// Default pending idle time before a message is reclaimed for redelivery.
const DEFAULT_CLAIM_IDLE_MS: u64 = 10_000;

/// Default blocking read timeout.
const DEFAULT_BLOCK_MS: u64 = 1_000;

#[derive(Debug, Clone)]
pub struct RedisStreamsConfig {
    /// Stream key carrying the order-event feed.
    pub stream_key: String,
    /// Dead-letter stream key.
    pub dlq_key: String,
    /// Consumer group name.
    pub group: String,
    /// Consumer name within the group.
    pub consumer: String,
    /// Blocking read timeout in milliseconds.
    pub block_ms: u64,
    /// Minimum idle time before a pending entry is reclaimed.
    pub claim_idle_ms: u64,
}

impl RedisStreamsConfig {
    pub fn new(
        stream_key: impl Into<String>,
        group: impl Into<String>,
        consumer: impl Into<String>,
    ) -> Self {
        let stream_key = stream_key.into();
        Self {
            dlq_key: format!("{stream_key}:dlq"),
            stream_key,
            group: group.into(),
            consumer: consumer.into(),
            block_ms: DEFAULT_BLOCK_MS,
            claim_idle_ms: DEFAULT_CLAIM_IDLE_MS,
        }
    }
}

#[derive(Clone)]
pub struct RedisStreamsEventChannel {
    client: Arc<redis::Client>,
    config: RedisStreamsConfig,
}

impl RedisStreamsEventChannel {
    /// Open a client and ensure the consumer group exists (idempotent).
    pub async fn connect(
        redis_url: impl AsRef<str>,
        config: RedisStreamsConfig,
    ) -> Result<Self, ChannelError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| ChannelError::Connection(e.to_string()))?;

        let channel = Self {
            client: Arc::new(client),
            config,
        };
        channel.ensure_consumer_group().await?;
        Ok(channel)
    }

    async fn connection(&self) -> Result<MultiplexedConnection, ChannelError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| ChannelError::Connection(e.to_string()))
    }

    /// XGROUP CREATE with MKSTREAM; an existing group is not an error.
    async fn ensure_consumer_group(&self) -> Result<(), ChannelError> {
        let mut conn = self.connection().await?;
        let created: Result<String, redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_key)
            .arg(&self.config.group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match created {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(ChannelError::Command(format!("XGROUP CREATE: {e}"))),
        }
    }

    /// Publish a payload onto the stream (producer side; used by tooling
    /// and tests, the order service owns the real feed).
    #[instrument(skip(self, payload), fields(stream_key = %self.config.stream_key))]
    pub async fn publish(&self, payload: &[u8]) -> Result<String, ChannelError> {
        let mut conn = self.connection().await?;
        let id: String = redis::cmd("XADD")
            .arg(&self.config.stream_key)
            .arg("*")
            .arg("payload")
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| ChannelError::Command(format!("XADD: {e}")))?;
        Ok(id)
    }

    /// Read one new entry for this consumer (blocking up to `block_ms`).
    async fn read_new(
        &self,
        conn: &mut MultiplexedConnection,
    ) -> Result<Option<(String, Vec<u8>)>, ChannelError> {
        let reply: redis::Value = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.group)
            .arg(&self.config.consumer)
            .arg("COUNT")
            .arg(1)
            .arg("BLOCK")
            .arg(self.config.block_ms)
            .arg("STREAMS")
            .arg(&self.config.stream_key)
            .arg(">")
            .query_async(conn)
            .await
            .map_err(|e| ChannelError::Command(format!("XREADGROUP: {e}")))?;

        Ok(parse_first_entry(reply))
    }

    /// Reclaim one pending entry idle longer than `claim_idle_ms`.
    async fn claim_pending(
        &self,
        conn: &mut MultiplexedConnection,
    ) -> Result<Option<(String, Vec<u8>)>, ChannelError> {
        let reply: redis::Value = redis::cmd("XAUTOCLAIM")
            .arg(&self.config.stream_key)
            .arg(&self.config.group)
            .arg(&self.config.consumer)
            .arg(self.config.claim_idle_ms)
            .arg("0-0")
            .arg("COUNT")
            .arg(1)
            .query_async(conn)
            .await
            .map_err(|e| ChannelError::Command(format!("XAUTOCLAIM: {e}")))?;

        // XAUTOCLAIM replies [next-cursor, [[id, fields], ...], ...].
        let redis::Value::Bulk(parts) = reply else {
            return Ok(None);
        };
        let Some(entries) = parts.get(1).cloned() else {
            return Ok(None);
        };
        Ok(parse_entries(entries).into_iter().next())
    }

    /// Delivery count for a pending entry, from XPENDING.
    async fn delivery_count(
        &self,
        conn: &mut MultiplexedConnection,
        entry_id: &str,
    ) -> Result<u32, ChannelError> {
        let reply: redis::Value = redis::cmd("XPENDING")
            .arg(&self.config.stream_key)
            .arg(&self.config.group)
            .arg(entry_id)
            .arg(entry_id)
            .arg(1)
            .query_async(conn)
            .await
            .map_err(|e| ChannelError::Command(format!("XPENDING: {e}")))?;

        // Reply: [[id, consumer, idle-ms, delivery-count]].
        if let redis::Value::Bulk(rows) = reply {
            if let Some(redis::Value::Bulk(fields)) = rows.first() {
                if let Some(redis::Value::Int(count)) = fields.get(3) {
                    return Ok((*count).max(1) as u32);
                }
            }
        }
        Ok(1)
    }
}

/// Parse `[[stream, [[id, fields], ...]]]` from XREADGROUP.
fn parse_first_entry(reply: redis::Value) -> Option<(String, Vec<u8>)> {
    let redis::Value::Bulk(streams) = reply else {
        return None;
    };
    let redis::Value::Bulk(stream) = streams.into_iter().next()? else {
        return None;
    };
    let entries = stream.into_iter().nth(1)?;
    parse_entries(entries).into_iter().next()
}

/// Parse `[[id, [field, value, ...]], ...]` entry lists.
fn parse_entries(entries: redis::Value) -> Vec<(String, Vec<u8>)> {
    let redis::Value::Bulk(entries) = entries else {
        return Vec::new();
    };

    let mut parsed = Vec::new();
    for entry in entries {
        let redis::Value::Bulk(parts) = entry else {
            continue;
        };
        let Some(redis::Value::Data(id)) = parts.first() else {
            continue;
        };
        let id = String::from_utf8_lossy(id).to_string();

        let Some(redis::Value::Bulk(fields)) = parts.get(1) else {
            continue;
        };
        for pair in fields.chunks(2) {
            if let [redis::Value::Data(key), redis::Value::Data(value)] = pair {
                if key.as_slice() == b"payload" {
                    parsed.push((id.clone(), value.clone()));
                    break;
                }
            }
        }
    }
    parsed
}

struct RedisAck {
    client: Arc<redis::Client>,
    stream_key: String,
    group: String,
    entry_id: String,
}

#[async_trait]
impl AckHandle for RedisAck {
    async fn ack(self: Box<Self>) -> Result<(), ChannelError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| ChannelError::Connection(e.to_string()))?;
        let _: u64 = redis::cmd("XACK")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg(&self.entry_id)
            .query_async(&mut conn)
            .await
            .map_err(|e| ChannelError::Command(format!("XACK: {e}")))?;
        Ok(())
    }

    async fn nack(self: Box<Self>) -> Result<(), ChannelError> {
        // Leave the entry pending; it is reclaimed by XAUTOCLAIM once idle
        // longer than the configured claim timeout.
        Ok(())
    }
}

#[async_trait]
impl EventChannel for RedisStreamsEventChannel {
    async fn receive(&self) -> Result<Option<Delivery>, ChannelError> {
        let mut conn = self.connection().await?;

        loop {
            // Reclaim timed-out pending entries first, then block for new.
            let entry = match self.claim_pending(&mut conn).await? {
                Some(entry) => Some(entry),
                None => self.read_new(&mut conn).await?,
            };

            let Some((entry_id, payload)) = entry else {
                // Blocking timeout with nothing pending; poll again.
                continue;
            };

            let attempt = self.delivery_count(&mut conn, &entry_id).await?;
            return Ok(Some(Delivery {
                message_id: entry_id.clone(),
                payload,
                attempt,
                ack: Box::new(RedisAck {
                    client: self.client.clone(),
                    stream_key: self.config.stream_key.clone(),
                    group: self.config.group.clone(),
                    entry_id,
                }),
            }));
        }
    }

    #[instrument(skip(self, payload), fields(dlq_key = %self.config.dlq_key))]
    async fn dead_letter(
        &self,
        message_id: &str,
        payload: &[u8],
        reason: &str,
    ) -> Result<(), ChannelError> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("XADD")
            .arg(&self.config.dlq_key)
            .arg("*")
            .arg("original_message_id")
            .arg(message_id)
            .arg("reason")
            .arg(reason)
            .arg("failed_at")
            .arg(chrono::Utc::now().to_rfc3339())
            .arg("payload")
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| ChannelError::Command(format!("DLQ XADD: {e}")))?;

        warn!(message_id, reason, "message copied to dead-letter stream");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, payload: &[u8]) -> redis::Value {
        redis::Value::Bulk(vec![
            redis::Value::Data(id.as_bytes().to_vec()),
            redis::Value::Bulk(vec![
                redis::Value::Data(b"payload".to_vec()),
                redis::Value::Data(payload.to_vec()),
            ]),
        ])
    }

    #[test]
    fn parses_xreadgroup_reply() {
        let reply = redis::Value::Bulk(vec![redis::Value::Bulk(vec![
            redis::Value::Data(b"orders:events".to_vec()),
            redis::Value::Bulk(vec![entry("1-0", b"{\"orderId\":\"O1\"}")]),
        ])]);

        let parsed = parse_first_entry(reply).unwrap();
        assert_eq!(parsed.0, "1-0");
        assert_eq!(parsed.1, b"{\"orderId\":\"O1\"}");
    }

    #[test]
    fn parses_empty_and_nil_replies() {
        assert!(parse_first_entry(redis::Value::Nil).is_none());
        assert!(parse_first_entry(redis::Value::Bulk(vec![])).is_none());
    }

    #[test]
    fn skips_entries_without_payload_field() {
        let no_payload = redis::Value::Bulk(vec![redis::Value::Bulk(vec![
            redis::Value::Data(b"stream".to_vec()),
            redis::Value::Bulk(vec![redis::Value::Bulk(vec![
                redis::Value::Data(b"2-0".to_vec()),
                redis::Value::Bulk(vec![
                    redis::Value::Data(b"other".to_vec()),
                    redis::Value::Data(b"x".to_vec()),
                ]),
            ])]),
        ])]);
        assert!(parse_first_entry(no_payload).is_none());
    }
}
