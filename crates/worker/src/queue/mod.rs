//! The work queue port.
//!
//! [`SqsQueue`] talks to Amazon SQS; [`MemoryQueue`] is an in-process queue
//! with explicit redelivery for tests and local runs.

pub mod memory;
pub mod sqs;

use std::time::Duration;

use async_trait::async_trait;

pub use memory::MemoryQueue;
pub use sqs::{SqsConfig, SqsQueue};

/// One received, not yet acknowledged message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub message_id: Option<String>,
    /// Handle used to ack or dead-letter this delivery.
    pub receipt: String,
    pub body: String,
    /// How many times the message has been delivered, this one included.
    pub receive_count: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue receive failed: {0}")]
    Receive(String),

    #[error("Queue acknowledge failed: {0}")]
    Ack(String),

    #[error("Dead-letter failed: {0}")]
    DeadLetter(String),
}

/// At-least-once work queue.
///
/// A received message stays invisible to other consumers until it is acked
/// or its visibility timeout lapses, after which it is delivered again.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Wait up to `wait` for at most one message.
    async fn receive(&self, wait: Duration) -> Result<Option<QueueMessage>, QueueError>;

    /// Delete a processed message.
    async fn ack(&self, message: &QueueMessage) -> Result<(), QueueError>;

    /// Move a message that must not be retried out of the queue.
    async fn dead_letter(&self, message: &QueueMessage, reason: &str) -> Result<(), QueueError>;
}
