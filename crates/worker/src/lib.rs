//! Queue-driven rename worker.
//!
//! [`QueueConsumer`](consumer::QueueConsumer) pulls job messages from a
//! [`WorkQueue`](queue::WorkQueue), runs each through the
//! [`JobRunner`](renamer_pipeline::JobRunner) and acknowledges, releases or
//! dead-letters the message depending on the outcome.

pub mod config;
pub mod consumer;
pub mod queue;
