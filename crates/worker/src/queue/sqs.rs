//! Amazon SQS work queue.

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_sqs::config::Region;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::types::{MessageAttributeValue, MessageSystemAttributeName};
use aws_sdk_sqs::Client;

use super::{QueueError, QueueMessage, WorkQueue};

/// Message attribute carrying the reason on dead-lettered messages.
pub const DEAD_LETTER_REASON_ATTRIBUTE: &str = "dead_letter_reason";

#[derive(Debug, Clone)]
pub struct SqsConfig {
    pub region: String,
    pub queue_url: String,
    /// Without one, dead-lettering just deletes the message.
    pub dead_letter_url: Option<String>,
    /// Custom endpoint (LocalStack, ElasticMQ).
    pub endpoint: Option<String>,
}

#[derive(Clone)]
pub struct SqsQueue {
    client: Client,
    queue_url: String,
    dead_letter_url: Option<String>,
}

impl std::fmt::Debug for SqsQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqsQueue")
            .field("queue_url", &self.queue_url)
            .field("dead_letter_url", &self.dead_letter_url)
            .finish_non_exhaustive()
    }
}

impl SqsQueue {
    /// Build a client from the default AWS credential chain.
    pub async fn connect(config: SqsConfig) -> Self {
        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder = aws_sdk_sqs::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        tracing::info!(
            queue_url = %config.queue_url,
            dead_letter_url = ?config.dead_letter_url,
            region = %config.region,
            "SQS queue initialized",
        );

        Self {
            client: Client::from_conf(builder.build()),
            queue_url: config.queue_url,
            dead_letter_url: config.dead_letter_url,
        }
    }

    async fn delete(&self, message: &QueueMessage) -> Result<(), String> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(&message.receipt)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| DisplayErrorContext(e).to_string())
    }
}

#[async_trait]
impl WorkQueue for SqsQueue {
    async fn receive(&self, wait: Duration) -> Result<Option<QueueMessage>, QueueError> {
        let wait_secs = i32::try_from(wait.as_secs()).unwrap_or(i32::MAX);
        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(1)
            .wait_time_seconds(wait_secs)
            .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount)
            .send()
            .await
            .map_err(|e| QueueError::Receive(DisplayErrorContext(e).to_string()))?;

        let Some(message) = output.messages().first() else {
            return Ok(None);
        };
        let Some(receipt) = message.receipt_handle() else {
            return Err(QueueError::Receive("message without receipt handle".into()));
        };

        let receive_count = message
            .attributes()
            .and_then(|attrs| attrs.get(&MessageSystemAttributeName::ApproximateReceiveCount))
            .and_then(|count| count.parse().ok())
            .unwrap_or(1);

        Ok(Some(QueueMessage {
            message_id: message.message_id().map(str::to_string),
            receipt: receipt.to_string(),
            body: message.body().unwrap_or_default().to_string(),
            receive_count,
        }))
    }

    async fn ack(&self, message: &QueueMessage) -> Result<(), QueueError> {
        self.delete(message).await.map_err(QueueError::Ack)
    }

    async fn dead_letter(&self, message: &QueueMessage, reason: &str) -> Result<(), QueueError> {
        if let Some(dead_letter_url) = &self.dead_letter_url {
            let attribute = MessageAttributeValue::builder()
                .data_type("String")
                .string_value(reason)
                .build()
                .map_err(|e| QueueError::DeadLetter(e.to_string()))?;

            self.client
                .send_message()
                .queue_url(dead_letter_url)
                .message_body(&message.body)
                .message_attributes(DEAD_LETTER_REASON_ATTRIBUTE, attribute)
                .send()
                .await
                .map_err(|e| QueueError::DeadLetter(DisplayErrorContext(e).to_string()))?;
        } else {
            tracing::warn!(
                message_id = ?message.message_id,
                reason,
                "No dead-letter queue configured, dropping message",
            );
        }

        self.delete(message).await.map_err(QueueError::DeadLetter)
    }
}
