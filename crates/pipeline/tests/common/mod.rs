//! Shared test doubles for the pipeline integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use renamer_core::job::{JobDescriptor, JobMessage, NameResult};
use renamer_core::naming::sanitize;
use renamer_events::{ProgressBus, ProgressEvent, Subscription};
use renamer_pipeline::{JobRunner, NameSuggester, RunnerConfig, SuggestError};
use renamer_storage::MemoryStore;

/// Always suggests the same slug.
pub struct FixedSuggester(pub &'static str);

#[async_trait]
impl NameSuggester for FixedSuggester {
    async fn suggest_name(&self, _image: &[u8], _user_prompt: &str) -> Result<String, SuggestError> {
        Ok(self.0.to_string())
    }
}

/// Treats the image bytes as text and acts on them:
/// `fail` -> backend unavailable, `hang` -> never returns,
/// `panic` -> panics, anything else -> its sanitized form.
pub struct EchoSuggester;

#[async_trait]
impl NameSuggester for EchoSuggester {
    async fn suggest_name(&self, image: &[u8], _user_prompt: &str) -> Result<String, SuggestError> {
        let text = String::from_utf8_lossy(image).to_string();
        match text.as_str() {
            "fail" => Err(SuggestError::BackendUnavailable("out of capacity".into())),
            "hang" => std::future::pending().await,
            "panic" => panic!("suggester blew up"),
            other => Ok(sanitize(other)),
        }
    }
}

/// Tracks how many calls are in flight at once.
#[derive(Default)]
pub struct CountingSuggester {
    current: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
    pub delay: Duration,
}

impl CountingSuggester {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NameSuggester for CountingSuggester {
    async fn suggest_name(&self, _image: &[u8], _user_prompt: &str) -> Result<String, SuggestError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok("photo".into())
    }
}

/// Image store seeded with `(key, content)` pairs.
pub fn images(entries: &[(&str, &str)]) -> Arc<MemoryStore> {
    let store = MemoryStore::new("in");
    for (key, content) in entries {
        store.insert(*key, content.as_bytes().to_vec());
    }
    Arc::new(store)
}

pub fn job(job_id: &str, keys: &[&str]) -> JobDescriptor {
    JobMessage {
        job_id: job_id.into(),
        file_keys: keys.iter().map(|k| k.to_string()).collect(),
        user_prompt: String::new(),
        total_files: Some(keys.len()),
        submitted_at: None,
    }
    .into_descriptor()
    .expect("valid test job")
}

pub fn runner(
    images: Arc<MemoryStore>,
    manifests: Arc<MemoryStore>,
    suggester: Arc<dyn NameSuggester>,
    config: RunnerConfig,
) -> (JobRunner, Arc<ProgressBus>) {
    let bus = Arc::new(ProgressBus::live_only());
    (
        JobRunner::new(images, manifests, suggester, bus.clone(), config),
        bus,
    )
}

/// Parse a sealed manifest, sorted by index.
pub fn manifest_lines(store: &MemoryStore, key: &str) -> Vec<NameResult> {
    let body = store.object(key).expect("manifest was sealed");
    let text = String::from_utf8(body).expect("manifest is UTF-8");
    assert!(text.is_empty() || text.ends_with('\n'), "every line is newline-terminated");
    let mut lines: Vec<NameResult> = text
        .lines()
        .map(|l| serde_json::from_str(l).expect("manifest line is a NameResult"))
        .collect();
    lines.sort_by_key(|r| r.index);
    lines
}

/// Every event currently buffered in a subscription.
pub fn drain(sub: &mut Subscription) -> Vec<ProgressEvent> {
    std::iter::from_fn(|| sub.try_recv()).collect()
}
