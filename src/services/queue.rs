use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const QUEUE_KEY: &str = "huella_import:passes";
const IN_FLIGHT_KEY: &str = "huella_import:in_flight";

/// Why a validation pass was queued.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PassKind {
    Initial,
    Revalidation,
}

/// Pass payload serialized into Redis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueuedPass {
    pub job_id: Uuid,
    pub kind: PassKind,
    #[serde(default)]
    pub attempt: u32,
}

impl QueuedPass {
    pub fn new(job_id: Uuid, kind: PassKind) -> Self {
        Self {
            job_id,
            kind,
            attempt: 0,
        }
    }

    pub fn retried(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}

/// Redis-backed queue of validation passes.
pub struct PassQueue {
    client: redis::Client,
}

impl PassQueue {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self { client })
    }

    pub async fn enqueue(&self, pass: &QueuedPass) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(pass)?;
        conn.lpush::<_, _, ()>(QUEUE_KEY, &payload).await?;
        Ok(())
    }

    /// Pop the oldest pass, parking it in the in-flight list until
    /// [`complete`](Self::complete) is called.
    pub async fn dequeue(&self) -> Result<Option<QueuedPass>, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload: Option<String> = conn.rpoplpush(QUEUE_KEY, IN_FLIGHT_KEY).await?;

        match payload {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    pub async fn complete(&self, pass: &QueuedPass) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(pass)?;
        conn.lrem::<_, _, ()>(IN_FLIGHT_KEY, 1, &payload).await?;
        Ok(())
    }

    pub async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    pub async fn depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        Ok(conn.llen(QUEUE_KEY).await?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
