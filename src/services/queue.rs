use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use std::time::Duration;
use uuid::Uuid;

use crate::models::job::WorkItem;

/// Opaque handle identifying one delivered message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptHandle(pub String);

impl std::fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message handed to a consumer. Stays hidden from other consumers until its
/// visibility timeout expires, unless deleted first.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub receipt: ReceiptHandle,
    pub body: String,
    /// How many times this message has been delivered, including this one.
    pub receive_count: u32,
}

impl Delivery {
    pub fn decode(&self) -> Result<WorkItem, QueueError> {
        serde_json::from_str(&self.body).map_err(QueueError::Serialize)
    }
}

/// At-least-once work queue with per-message visibility timeouts.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn send(&self, item: &WorkItem) -> Result<(), QueueError>;

    /// Receive up to `max` messages, hiding each for `visibility`.
    async fn receive(&self, max: usize, visibility: Duration)
        -> Result<Vec<Delivery>, QueueError>;

    async fn delete(&self, receipt: &ReceiptHandle) -> Result<(), QueueError>;

    /// Reset the remaining invisibility of a delivered message to `timeout` from now.
    async fn change_visibility(
        &self,
        receipt: &ReceiptHandle,
        timeout: Duration,
    ) -> Result<(), QueueError>;

    async fn health_check(&self) -> Result<(), QueueError>;
}

// Returns expired in-flight messages to the ready list, then claims up to
// ARGV[3] messages and hides them until ARGV[1] + ARGV[2].
// Result is a flat list of (id, body, receive_count) triples.
const RECEIVE_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local expired = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', now)
for _, id in ipairs(expired) do
    redis.call('ZREM', KEYS[2], id)
    redis.call('RPUSH', KEYS[1], id)
end
local out = {}
for _ = 1, tonumber(ARGV[3]) do
    local id = redis.call('RPOP', KEYS[1])
    if not id then break end
    local body = redis.call('HGET', KEYS[3], id)
    if body then
        redis.call('ZADD', KEYS[2], now + tonumber(ARGV[2]), id)
        local count = redis.call('HINCRBY', KEYS[4], id, 1)
        table.insert(out, id)
        table.insert(out, body)
        table.insert(out, tostring(count))
    end
end
return out
"#;

/// Redis-backed work queue.
///
/// Keys under `<name>:`: `ready` (list of message ids), `inflight` (sorted set
/// scored by the millisecond timestamp at which the message becomes visible
/// again), `bodies` and `receives` (hashes keyed by message id).
pub struct RedisWorkQueue {
    client: redis::Client,
    ready_key: String,
    inflight_key: String,
    bodies_key: String,
    receives_key: String,
    receive_script: redis::Script,
}

impl RedisWorkQueue {
    pub fn new(redis_url: &str, name: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self {
            client,
            ready_key: format!("{name}:ready"),
            inflight_key: format!("{name}:inflight"),
            bodies_key: format!("{name}:bodies"),
            receives_key: format!("{name}:receives"),
            receive_script: redis::Script::new(RECEIVE_SCRIPT),
        })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)
    }

    /// Number of messages waiting to be received (excludes in-flight ones).
    pub async fn queue_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        let depth: u64 = conn.llen(&self.ready_key).await.map_err(QueueError::Redis)?;
        Ok(depth)
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

fn parse_deliveries(flat: Vec<String>) -> Result<Vec<Delivery>, QueueError> {
    flat.chunks(3)
        .map(|chunk| match chunk {
            [id, body, count] => Ok(Delivery {
                receipt: ReceiptHandle(id.clone()),
                body: body.clone(),
                receive_count: count
                    .parse()
                    .map_err(|_| QueueError::Protocol(format!("bad receive count {count:?}")))?,
            }),
            _ => Err(QueueError::Protocol(format!(
                "receive returned {} values, expected triples",
                flat.len()
            ))),
        })
        .collect()
}

#[async_trait]
impl WorkQueue for RedisWorkQueue {
    async fn send(&self, item: &WorkItem) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(item).map_err(QueueError::Serialize)?;
        let id = Uuid::new_v4().to_string();
        let _: () = redis::pipe()
            .atomic()
            .hset(&self.bodies_key, &id, &payload)
            .ignore()
            .lpush(&self.ready_key, &id)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        tracing::debug!(job_id = %item.job_id, message_id = %id, "Work item enqueued");
        Ok(())
    }

    async fn receive(
        &self,
        max: usize,
        visibility: Duration,
    ) -> Result<Vec<Delivery>, QueueError> {
        if max == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.connection().await?;
        let flat: Vec<String> = self
            .receive_script
            .key(&self.ready_key)
            .key(&self.inflight_key)
            .key(&self.bodies_key)
            .key(&self.receives_key)
            .arg(now_millis())
            .arg(millis(visibility))
            .arg(max)
            .invoke_async(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        parse_deliveries(flat)
    }

    async fn delete(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let _: () = redis::pipe()
            .atomic()
            .zrem(&self.inflight_key, &receipt.0)
            .ignore()
            .lrem(&self.ready_key, 0, &receipt.0)
            .ignore()
            .hdel(&self.bodies_key, &receipt.0)
            .ignore()
            .hdel(&self.receives_key, &receipt.0)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn change_visibility(
        &self,
        receipt: &ReceiptHandle,
        timeout: Duration,
    ) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        // XX: only touch messages that are still in flight
        let _: i64 = redis::cmd("ZADD")
            .arg(&self.inflight_key)
            .arg("XX")
            .arg(now_millis().saturating_add(millis(timeout)))
            .arg(&receipt.0)
            .query_async(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Unexpected queue reply: {0}")]
    Protocol(String),

    #[error("Queue unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_deliveries() {
        let flat = vec![
            "a".to_string(),
            r#"{"job_id":"7f1b8f52-2d1c-4c55-9a3f-0e0e3c1d2b4a","comment":"hi"}"#.to_string(),
            "2".to_string(),
        ];
        let deliveries = parse_deliveries(flat).unwrap();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].receipt, ReceiptHandle("a".to_string()));
        assert_eq!(deliveries[0].receive_count, 2);
        assert_eq!(deliveries[0].decode().unwrap().comment, "hi");
    }

    #[test]
    fn test_parse_deliveries_rejects_partial_triples() {
        let flat = vec!["a".to_string(), "{}".to_string()];
        assert!(matches!(
            parse_deliveries(flat),
            Err(QueueError::Protocol(_))
        ));
    }

    #[test]
    fn test_decode_rejects_malformed_body() {
        let delivery = Delivery {
            receipt: ReceiptHandle("a".to_string()),
            body: "not json".to_string(),
            receive_count: 1,
        };
        assert!(matches!(delivery.decode(), Err(QueueError::Serialize(_))));
    }
}
