//! Shared fixtures for the worker integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use renamer_events::ProgressBus;
use renamer_pipeline::{JobRunner, NameSuggester, RunnerConfig, SuggestError};
use renamer_storage::MemoryStore;
use renamer_worker::consumer::{ConsumerConfig, QueueConsumer};
use renamer_worker::queue::MemoryQueue;

/// Names every image after its own bytes.
pub struct EchoSuggester;

#[async_trait]
impl NameSuggester for EchoSuggester {
    async fn suggest_name(&self, image: &[u8], _user_prompt: &str) -> Result<String, SuggestError> {
        Ok(String::from_utf8_lossy(image).to_string())
    }
}

pub struct Harness {
    pub queue: Arc<MemoryQueue>,
    pub images: Arc<MemoryStore>,
    pub manifests: Arc<MemoryStore>,
    pub bus: Arc<ProgressBus>,
    pub consumer: Arc<QueueConsumer>,
}

pub fn harness(config: ConsumerConfig) -> Harness {
    let queue = Arc::new(MemoryQueue::new());
    let images = Arc::new(MemoryStore::new("in"));
    let manifests = Arc::new(MemoryStore::new("out"));
    let bus = Arc::new(ProgressBus::live_only());
    let runner = Arc::new(JobRunner::new(
        images.clone(),
        manifests.clone(),
        Arc::new(EchoSuggester),
        bus.clone(),
        RunnerConfig::default(),
    ));
    let consumer = Arc::new(QueueConsumer::new(queue.clone(), runner, config));
    Harness {
        queue,
        images,
        manifests,
        bus,
        consumer,
    }
}

/// A queue body for `job_id` over `keys`.
pub fn job_body(job_id: &str, keys: &[&str]) -> String {
    serde_json::json!({
        "job_id": job_id,
        "file_keys": keys,
        "user_prompt": "",
        "total_files": keys.len(),
    })
    .to_string()
}

pub fn manifest_key(job_id: &str) -> String {
    format!("demo/jobs/{job_id}/manifest.jsonl")
}
