//! Queue consumer: turns work queue messages into job runs.
//!
//! Delivery is at least once. A message is acked only after its job sealed
//! a manifest; a failed job leaves the message unacked so the queue hands it
//! out again once its visibility timeout lapses.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use renamer_core::job::JobMessage;
use renamer_core::types::JobId;
use renamer_pipeline::JobRunner;
use tokio_util::sync::CancellationToken;

use crate::queue::{QueueError, QueueMessage, WorkQueue};

pub const DEFAULT_POLL_WAIT: Duration = Duration::from_secs(10);
pub const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// What to do with a body that does not decode into a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MalformedPolicy {
    /// Move it to the dead-letter queue (or drop it when none is configured).
    #[default]
    DeadLetter,
    /// Leave it unacked so it is redelivered.
    Redeliver,
}

impl FromStr for MalformedPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dead_letter" | "dead-letter" => Ok(Self::DeadLetter),
            "redeliver" => Ok(Self::Redeliver),
            other => Err(format!("expected dead_letter or redeliver, got {other:?}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Long-poll wait per receive.
    pub poll_wait: Duration,
    /// Pause after a queue infrastructure error.
    pub error_backoff: Duration,
    pub malformed_policy: MalformedPolicy,
    /// Dead-letter messages delivered more often than this.
    pub max_receive_count: Option<u32>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            poll_wait: DEFAULT_POLL_WAIT,
            error_backoff: DEFAULT_ERROR_BACKOFF,
            malformed_policy: MalformedPolicy::default(),
            max_receive_count: None,
        }
    }
}

/// Result of one consumer iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing arrived within the poll wait.
    Idle,
    /// The job ran and its message was deleted.
    Acked { job_id: JobId },
    /// Left unacked for redelivery.
    Released { reason: String },
    /// Moved out of the queue for good.
    DeadLettered { reason: String },
}

pub struct QueueConsumer {
    queue: Arc<dyn WorkQueue>,
    runner: Arc<JobRunner>,
    config: ConsumerConfig,
}

impl QueueConsumer {
    pub fn new(queue: Arc<dyn WorkQueue>, runner: Arc<JobRunner>, config: ConsumerConfig) -> Self {
        Self {
            queue,
            runner,
            config,
        }
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Receive at most one message and handle it.
    pub async fn poll_once(&self) -> Result<PollOutcome, QueueError> {
        match self.queue.receive(self.config.poll_wait).await? {
            Some(message) => self.handle(message).await,
            None => Ok(PollOutcome::Idle),
        }
    }

    /// Consume until `cancel` fires.
    ///
    /// Cancellation interrupts a pending receive or backoff but never a
    /// running job: the in-flight job finishes before the loop exits.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            poll_wait_secs = self.config.poll_wait.as_secs(),
            policy = ?self.config.malformed_policy,
            "Queue consumer started",
        );

        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = self.queue.receive(self.config.poll_wait) => received,
            };

            let result = match received {
                Ok(Some(message)) => self.handle(message).await,
                Ok(None) => Ok(PollOutcome::Idle),
                Err(e) => Err(e),
            };

            match result {
                Ok(PollOutcome::Idle) => {}
                Ok(outcome) => tracing::debug!(?outcome, "Message handled"),
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        backoff_secs = self.config.error_backoff.as_secs(),
                        "Queue error, backing off",
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.config.error_backoff) => {}
                    }
                }
            }
        }

        tracing::info!("Queue consumer stopped");
    }

    async fn handle(&self, message: QueueMessage) -> Result<PollOutcome, QueueError> {
        if let Some(max) = self.config.max_receive_count {
            if message.receive_count > max {
                let reason = format!(
                    "received {} times, limit is {max}",
                    message.receive_count
                );
                tracing::warn!(
                    message_id = ?message.message_id,
                    receive_count = message.receive_count,
                    "Receive limit exceeded, dead-lettering",
                );
                self.queue.dead_letter(&message, &reason).await?;
                return Ok(PollOutcome::DeadLettered { reason });
            }
        }

        let job = match JobMessage::parse(&message.body) {
            Ok(job) => {
                if job.has_count_mismatch() {
                    tracing::warn!(
                        job_id = %job.job_id,
                        total_files = ?job.total_files,
                        keys = job.file_keys.len(),
                        "total_files disagrees with the key list, using the key count",
                    );
                }
                job.into_descriptor()
            }
            Err(e) => Err(e),
        };

        let job = match job {
            Ok(job) => job,
            Err(e) => return self.reject(&message, e.to_string()).await,
        };

        match self.runner.run(&job).await {
            Ok(summary) => {
                self.queue.ack(&message).await?;
                tracing::info!(
                    job_id = %summary.job_id,
                    completed = summary.completed,
                    errors = summary.errors,
                    "Job acked",
                );
                Ok(PollOutcome::Acked {
                    job_id: summary.job_id,
                })
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %job.job_id,
                    error = %e,
                    "Job failed, leaving message for redelivery",
                );
                Ok(PollOutcome::Released {
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn reject(&self, message: &QueueMessage, reason: String) -> Result<PollOutcome, QueueError> {
        tracing::warn!(
            message_id = ?message.message_id,
            error = %reason,
            policy = ?self.config.malformed_policy,
            "Malformed job message",
        );
        match self.config.malformed_policy {
            MalformedPolicy::DeadLetter => {
                self.queue.dead_letter(message, &reason).await?;
                Ok(PollOutcome::DeadLettered { reason })
            }
            MalformedPolicy::Redeliver => Ok(PollOutcome::Released { reason }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_policy_parses_both_spellings() {
        assert_eq!("dead_letter".parse(), Ok(MalformedPolicy::DeadLetter));
        assert_eq!("Dead-Letter".parse(), Ok(MalformedPolicy::DeadLetter));
        assert_eq!(" redeliver ".parse(), Ok(MalformedPolicy::Redeliver));
        assert!("drop".parse::<MalformedPolicy>().is_err());
    }

    #[test]
    fn defaults() {
        let config = ConsumerConfig::default();
        assert_eq!(config.poll_wait, Duration::from_secs(10));
        assert_eq!(config.error_backoff, Duration::from_secs(5));
        assert_eq!(config.malformed_policy, MalformedPolicy::DeadLetter);
        assert_eq!(config.max_receive_count, None);
    }
}
