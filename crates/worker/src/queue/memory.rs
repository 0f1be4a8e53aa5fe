//! In-process work queue.
//!
//! Unacked messages stay in flight until [`MemoryQueue::redeliver_unacked`]
//! puts them back, which stands in for a lapsed visibility timeout.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{QueueError, QueueMessage, WorkQueue};

#[derive(Debug, Clone)]
struct Entry {
    message_id: String,
    body: String,
    receive_count: u32,
}

#[derive(Debug, Default)]
struct State {
    ready: VecDeque<Entry>,
    in_flight: HashMap<String, Entry>,
    acked: Vec<String>,
    dead: Vec<(String, String)>,
}

#[derive(Debug, Default)]
pub struct MemoryQueue {
    state: Mutex<State>,
    arrivals: Notify,
    next_id: AtomicU64,
    failing_receives: AtomicUsize,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, String> {
        self.state
            .lock()
            .map_err(|_| "memory queue lock poisoned".to_string())
    }

    /// Enqueue a message body.
    pub fn push(&self, body: impl Into<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut state) = self.state.lock() {
            state.ready.push_back(Entry {
                message_id: format!("msg-{id}"),
                body: body.into(),
                receive_count: 0,
            });
        }
        self.arrivals.notify_one();
    }

    /// Make the next `n` receives fail.
    pub fn fail_next_receives(&self, n: usize) {
        self.failing_receives.store(n, Ordering::SeqCst);
    }

    /// Return every in-flight message to the front of the queue.
    pub fn redeliver_unacked(&self) -> usize {
        let Ok(mut state) = self.state.lock() else {
            return 0;
        };
        let returned: Vec<Entry> = state.in_flight.drain().map(|(_, e)| e).collect();
        let count = returned.len();
        for entry in returned {
            state.ready.push_front(entry);
        }
        if count > 0 {
            self.arrivals.notify_one();
        }
        count
    }

    pub fn ready_len(&self) -> usize {
        self.state.lock().map(|s| s.ready.len()).unwrap_or(0)
    }

    pub fn in_flight_len(&self) -> usize {
        self.state.lock().map(|s| s.in_flight.len()).unwrap_or(0)
    }

    /// Bodies of acked messages, in ack order.
    pub fn acked(&self) -> Vec<String> {
        self.state.lock().map(|s| s.acked.clone()).unwrap_or_default()
    }

    /// `(body, reason)` of dead-lettered messages.
    pub fn dead_letters(&self) -> Vec<(String, String)> {
        self.state.lock().map(|s| s.dead.clone()).unwrap_or_default()
    }

    fn take_ready(&self) -> Result<Option<QueueMessage>, QueueError> {
        let mut state = self.state().map_err(QueueError::Receive)?;
        let Some(mut entry) = state.ready.pop_front() else {
            return Ok(None);
        };
        entry.receive_count += 1;
        let receipt = format!("{}-r{}", entry.message_id, entry.receive_count);
        let message = QueueMessage {
            message_id: Some(entry.message_id.clone()),
            receipt: receipt.clone(),
            body: entry.body.clone(),
            receive_count: entry.receive_count,
        };
        state.in_flight.insert(receipt, entry);
        Ok(Some(message))
    }

    fn settle(&self, message: &QueueMessage) -> Result<Entry, String> {
        self.state()?
            .in_flight
            .remove(&message.receipt)
            .ok_or_else(|| format!("unknown receipt {}", message.receipt))
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn receive(&self, wait: Duration) -> Result<Option<QueueMessage>, QueueError> {
        let failing = self.failing_receives.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_receives.store(failing - 1, Ordering::SeqCst);
            return Err(QueueError::Receive("injected receive failure".into()));
        }

        if let Some(message) = self.take_ready()? {
            return Ok(Some(message));
        }
        // Long poll: wake on the next push, or give up after `wait`.
        let _ = tokio::time::timeout(wait, self.arrivals.notified()).await;
        self.take_ready()
    }

    async fn ack(&self, message: &QueueMessage) -> Result<(), QueueError> {
        let entry = self.settle(message).map_err(QueueError::Ack)?;
        self.state().map_err(QueueError::Ack)?.acked.push(entry.body);
        Ok(())
    }

    async fn dead_letter(&self, message: &QueueMessage, reason: &str) -> Result<(), QueueError> {
        let entry = self.settle(message).map_err(QueueError::DeadLetter)?;
        self.state()
            .map_err(QueueError::DeadLetter)?
            .dead
            .push((entry.body, reason.to_string()));
        Ok(())
    }
}
