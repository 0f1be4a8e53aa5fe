//! Per-job progress bus.
//!
//! [`ProgressBus`] fans every published [`ProgressEvent`] out to the live
//! listeners of that job and records it in a [`HistoryStore`] so pollers
//! and late subscribers can catch up. It is designed to be shared via
//! `Arc<ProgressBus>` between the job runner and the progress API.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use renamer_core::job_events::ProgressEventType;
use renamer_core::types::Timestamp;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};

use crate::history::{HistoryStore, NoopHistory};

// ---------------------------------------------------------------------------
// ProgressEvent
// ---------------------------------------------------------------------------

/// A lifecycle or progress notification about one job.
///
/// Serialized flat: payload fields sit next to `type`, `job_id` and
/// `timestamp`, e.g. `{"type":"item_error","job_id":"jr_1","index":3,...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: String,

    #[serde(rename = "type")]
    pub event_type: ProgressEventType,

    #[serde(flatten)]
    pub payload: serde_json::Map<String, serde_json::Value>,

    pub timestamp: Timestamp,
}

impl ProgressEvent {
    /// Stamp a new event with the current time.
    ///
    /// Object payloads are used as-is, `null` becomes an empty payload and
    /// any other value is stored under `"value"`.
    pub fn new(
        job_id: impl Into<String>,
        event_type: ProgressEventType,
        payload: serde_json::Value,
    ) -> Self {
        let payload = match payload {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Null => serde_json::Map::new(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("value".into(), other);
                map
            }
        };
        Self {
            job_id: job_id.into(),
            event_type,
            payload,
            timestamp: chrono::Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

/// Identifies one live listener; used to unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    pub job_id: String,
    id: u64,
}

/// A live listener for one job.
///
/// [`recv`](Subscription::recv) first drains the history snapshot taken at
/// subscribe time, then yields live events. An event published while the
/// snapshot was being read may appear in both.
#[derive(Debug)]
pub struct Subscription {
    handle: SubscriptionHandle,
    backlog: VecDeque<ProgressEvent>,
    receiver: mpsc::Receiver<ProgressEvent>,
}

impl Subscription {
    pub fn handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }

    /// History events not yet returned by `recv`.
    pub fn backlog(&self) -> &VecDeque<ProgressEvent> {
        &self.backlog
    }

    /// Next event, or `None` once the listener has been removed from the bus
    /// and its buffer is drained.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }
        self.receiver.recv().await
    }

    /// Non-blocking variant of [`recv`](Subscription::recv).
    pub fn try_recv(&mut self) -> Option<ProgressEvent> {
        self.backlog
            .pop_front()
            .or_else(|| self.receiver.try_recv().ok())
    }
}

// ---------------------------------------------------------------------------
// ProgressBus
// ---------------------------------------------------------------------------

/// Per-listener buffer. A listener that falls this far behind is dropped.
pub const DEFAULT_LISTENER_CAPACITY: usize = 256;

/// Default number of events returned to a history poll, and the default
/// replay length for new subscribers.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

type ListenerMap = HashMap<String, HashMap<u64, mpsc::Sender<ProgressEvent>>>;

pub struct ProgressBus {
    listeners: RwLock<ListenerMap>,
    history: Arc<dyn HistoryStore>,
    next_id: AtomicU64,
    listener_capacity: usize,
    replay_limit: usize,
}

impl ProgressBus {
    pub fn new(history: Arc<dyn HistoryStore>) -> Self {
        Self::with_listener_capacity(history, DEFAULT_LISTENER_CAPACITY)
    }

    pub fn with_listener_capacity(history: Arc<dyn HistoryStore>, listener_capacity: usize) -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
            history,
            next_id: AtomicU64::new(1),
            listener_capacity: listener_capacity.max(1),
            replay_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    /// How many history events a new subscriber is handed. Set this to the
    /// store's `max_events` to replay everything it keeps.
    pub fn with_replay_limit(mut self, replay_limit: usize) -> Self {
        self.replay_limit = replay_limit;
        self
    }

    pub fn replay_limit(&self) -> usize {
        self.replay_limit
    }

    /// Bus without a history store: live delivery only.
    pub fn live_only() -> Self {
        Self::new(Arc::new(NoopHistory))
    }

    /// Record an event and forward it to the job's live listeners.
    ///
    /// Never fails: history errors are logged, and listeners that are full
    /// or disconnected are dropped instead of blocking the publisher.
    pub async fn publish(
        &self,
        job_id: &str,
        event_type: ProgressEventType,
        payload: serde_json::Value,
    ) -> ProgressEvent {
        let event = ProgressEvent::new(job_id, event_type, payload);

        if let Err(e) = self.history.append(&event).await {
            tracing::warn!(
                job_id,
                event_type = %event_type,
                error = %e,
                "Failed to store progress event in history",
            );
        }

        let mut listeners = self.listeners.write().await;
        if let Some(job_listeners) = listeners.get_mut(job_id) {
            job_listeners.retain(|id, sender| match sender.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(job_id, listener_id = id, "Dropping slow progress listener");
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::debug!(job_id, listener_id = id, "Progress listener disconnected");
                    false
                }
            });
            if job_listeners.is_empty() {
                listeners.remove(job_id);
            }
        }

        event
    }

    /// Register a live listener, then snapshot the job's history into it.
    pub async fn subscribe(&self, job_id: &str) -> Subscription {
        let (tx, receiver) = mpsc::channel(self.listener_capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.listeners
            .write()
            .await
            .entry(job_id.to_string())
            .or_default()
            .insert(id, tx);

        let backlog = self.history(job_id, self.replay_limit).await.into();

        tracing::debug!(job_id, listener_id = id, "Progress listener subscribed");
        Subscription {
            handle: SubscriptionHandle {
                job_id: job_id.to_string(),
                id,
            },
            backlog,
            receiver,
        }
    }

    /// Remove a listener. Unknown or already removed handles are ignored.
    pub async fn unsubscribe(&self, handle: &SubscriptionHandle) {
        let mut listeners = self.listeners.write().await;
        if let Some(job_listeners) = listeners.get_mut(&handle.job_id) {
            job_listeners.remove(&handle.id);
            if job_listeners.is_empty() {
                listeners.remove(&handle.job_id);
            }
        }
    }

    /// Up to `limit` most recent events for a job, oldest first.
    ///
    /// An unavailable history store yields an empty list.
    pub async fn history(&self, job_id: &str, limit: usize) -> Vec<ProgressEvent> {
        match self.history.recent(job_id, limit).await {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!(job_id, error = %e, "Failed to read progress history");
                Vec::new()
            }
        }
    }

    /// Number of live listeners currently registered for a job.
    pub async fn listener_count(&self, job_id: &str) -> usize {
        self.listeners
            .read()
            .await
            .get(job_id)
            .map_or(0, HashMap::len)
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::live_only()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
