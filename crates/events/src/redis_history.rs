//! Redis-backed progress history.
//!
//! Each job's events live in a list at `job_updates:{job_id}`, newest at the
//! head. Every append pushes, trims to `max_events` and refreshes the
//! key's expiry in one atomic pipeline.

use std::fmt;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::bus::ProgressEvent;
use crate::history::{HistoryConfig, HistoryError, HistoryStore};

#[derive(Clone)]
pub struct RedisHistory {
    conn: ConnectionManager,
    config: HistoryConfig,
}

impl fmt::Debug for RedisHistory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisHistory")
            .field("connection", &"ConnectionManager")
            .field("config", &self.config)
            .finish()
    }
}

impl RedisHistory {
    /// Connect to Redis at `redis_url`.
    pub async fn connect(redis_url: &str, config: HistoryConfig) -> Result<Self, HistoryError> {
        tracing::info!(redis_url, "Connecting to Redis progress history");

        let client = redis::Client::open(redis_url).map_err(unavailable)?;
        let conn = ConnectionManager::new(client).await.map_err(unavailable)?;

        tracing::info!("Connected to Redis progress history");
        Ok(Self { conn, config })
    }

    pub fn key(job_id: &str) -> String {
        format!("job_updates:{job_id}")
    }
}

fn unavailable(e: redis::RedisError) -> HistoryError {
    HistoryError::Unavailable(e.to_string())
}

/// Push, trim and refresh the expiry as one MULTI/EXEC block.
fn append_pipeline(key: &str, json: String, config: &HistoryConfig) -> redis::Pipeline {
    let max = config.max_events.max(1) as isize;
    let ttl_secs = config.ttl.as_secs().max(1) as i64;

    let mut pipe = redis::pipe();
    pipe.atomic()
        .lpush(key, json)
        .ignore()
        .ltrim(key, 0, max - 1)
        .ignore()
        .expire(key, ttl_secs)
        .ignore();
    pipe
}

/// Turn an LRANGE reply (newest first) into events, oldest first.
/// Entries that do not decode are skipped.
fn decode_newest_first(job_id: &str, raw: &[String]) -> Vec<ProgressEvent> {
    raw.iter()
        .rev()
        .filter_map(|entry| match serde_json::from_str::<ProgressEvent>(entry) {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::warn!(job_id, error = %e, "Skipping undecodable history entry");
                None
            }
        })
        .collect()
}

#[async_trait]
impl HistoryStore for RedisHistory {
    async fn append(&self, event: &ProgressEvent) -> Result<(), HistoryError> {
        let json = serde_json::to_string(event)?;
        let mut conn = self.conn.clone();
        append_pipeline(&Self::key(&event.job_id), json, &self.config)
            .query_async::<()>(&mut conn)
            .await
            .map_err(unavailable)
    }

    async fn recent(&self, job_id: &str, limit: usize) -> Result<Vec<ProgressEvent>, HistoryError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn
            .lrange(Self::key(job_id), 0, limit as isize - 1)
            .await
            .map_err(unavailable)?;

        Ok(decode_newest_first(job_id, &raw))
    }
}
