//! Bounded, time-expiring progress history.
//!
//! The history is a best-effort layer: the bus logs and ignores store
//! failures. When no store is configured inject [`NoopHistory`] instead of
//! making the store optional at every call site.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::bus::ProgressEvent;

/// Default number of events retained per job.
pub const DEFAULT_MAX_EVENTS: usize = 50;

/// Default lifetime of a job's history after its last event.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryConfig {
    /// Events kept per job; older ones are discarded.
    pub max_events: usize,
    /// Expiry measured from the most recent append.
    pub ttl: Duration,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_events: DEFAULT_MAX_EVENTS,
            ttl: DEFAULT_TTL,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("History store unavailable: {0}")]
    Unavailable(String),

    #[error("History entry could not be encoded: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Durable per-job event history.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Record one event, trimming to the configured length and refreshing
    /// the TTL.
    async fn append(&self, event: &ProgressEvent) -> Result<(), HistoryError>;

    /// Up to `limit` most recent events for `job_id`, oldest first.
    async fn recent(&self, job_id: &str, limit: usize) -> Result<Vec<ProgressEvent>, HistoryError>;
}

// ---------------------------------------------------------------------------
// NoopHistory
// ---------------------------------------------------------------------------

/// Store used when no history backend is available.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHistory;

#[async_trait]
impl HistoryStore for NoopHistory {
    async fn append(&self, _event: &ProgressEvent) -> Result<(), HistoryError> {
        Ok(())
    }

    async fn recent(&self, _job_id: &str, _limit: usize) -> Result<Vec<ProgressEvent>, HistoryError> {
        Ok(Vec::new())
    }
}

// ---------------------------------------------------------------------------
// MemoryHistory
// ---------------------------------------------------------------------------

struct JobHistory {
    events: VecDeque<ProgressEvent>,
    expires_at: Instant,
}

/// In-process history with the same trimming and expiry rules as the Redis
/// store. Expired jobs are evicted lazily on access.
pub struct MemoryHistory {
    config: HistoryConfig,
    jobs: Mutex<HashMap<String, JobHistory>>,
}

impl MemoryHistory {
    pub fn new(config: HistoryConfig) -> Self {
        Self {
            config,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, JobHistory>>, HistoryError> {
        self.jobs
            .lock()
            .map_err(|_| HistoryError::Unavailable("history lock poisoned".into()))
    }
}

impl Default for MemoryHistory {
    fn default() -> Self {
        Self::new(HistoryConfig::default())
    }
}

#[async_trait]
impl HistoryStore for MemoryHistory {
    async fn append(&self, event: &ProgressEvent) -> Result<(), HistoryError> {
        let now = Instant::now();
        let mut jobs = self.lock()?;
        jobs.retain(|_, history| history.expires_at > now);

        let history = jobs
            .entry(event.job_id.clone())
            .or_insert_with(|| JobHistory {
                events: VecDeque::new(),
                expires_at: now,
            });
        history.events.push_back(event.clone());
        while history.events.len() > self.config.max_events {
            history.events.pop_front();
        }
        history.expires_at = now + self.config.ttl;
        Ok(())
    }

    async fn recent(&self, job_id: &str, limit: usize) -> Result<Vec<ProgressEvent>, HistoryError> {
        let now = Instant::now();
        let mut jobs = self.lock()?;

        let expired = jobs.get(job_id).is_some_and(|h| h.expires_at <= now);
        if expired {
            jobs.remove(job_id);
            return Ok(Vec::new());
        }

        Ok(jobs
            .get(job_id)
            .map(|h| {
                let skip = h.events.len().saturating_sub(limit);
                h.events.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use renamer_core::job_events::ProgressEventType;
    use serde_json::json;

    use super::*;

    fn event(job_id: &str, index: usize) -> ProgressEvent {
        ProgressEvent::new(job_id, ProgressEventType::ItemProcessing, json!({"index": index}))
    }

    fn indices(events: &[ProgressEvent]) -> Vec<u64> {
        events
            .iter()
            .map(|e| e.payload["index"].as_u64().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn recent_returns_oldest_first() {
        let store = MemoryHistory::default();
        for i in 0..5 {
            store.append(&event("j", i)).await.unwrap();
        }
        let events = store.recent("j", 50).await.unwrap();
        assert_eq!(indices(&events), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn limit_keeps_the_newest_events() {
        let store = MemoryHistory::default();
        for i in 0..5 {
            store.append(&event("j", i)).await.unwrap();
        }
        let events = store.recent("j", 2).await.unwrap();
        assert_eq!(indices(&events), vec![3, 4]);
    }

    #[tokio::test]
    async fn history_is_bounded_per_job() {
        let store = MemoryHistory::new(HistoryConfig {
            max_events: 3,
            ..Default::default()
        });
        for i in 0..10 {
            store.append(&event("j", i)).await.unwrap();
        }
        store.append(&event("other", 0)).await.unwrap();

        assert_eq!(indices(&store.recent("j", 50).await.unwrap()), vec![7, 8, 9]);
        assert_eq!(store.recent("other", 50).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn history_expires_after_ttl() {
        let store = MemoryHistory::new(HistoryConfig {
            ttl: Duration::from_millis(40),
            ..Default::default()
        });
        store.append(&event("j", 0)).await.unwrap();
        assert_eq!(store.recent("j", 50).await.unwrap().len(), 1);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(store.recent("j", 50).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_job_has_empty_history() {
        let store = MemoryHistory::default();
        assert!(store.recent("missing", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn noop_store_remembers_nothing() {
        let store = NoopHistory;
        store.append(&event("j", 0)).await.unwrap();
        assert!(store.recent("j", 10).await.unwrap().is_empty());
    }
}
