//! Runs one rename job end to end.
//!
//! Every [`WorkItem`] gets its own task gated by a [`Semaphore`]; a task
//! fetches the image, asks the [`NameSuggester`] for a slug and returns it.
//! The runner's fan-in loop is the only place that touches the job's
//! [`DedupRegistry`] and [`ManifestWriter`], so name reservation and manifest
//! appends are serialized without a lock.
//!
//! Item failures are data: they become error [`NameResult`]s and never fail
//! the job. The only job-level failure is a manifest that cannot be written.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use renamer_core::job::{ConcurrencyLimit, JobDescriptor, NameResult, WorkItem};
use renamer_core::job_events::ProgressEventType;
use renamer_core::naming::{renamed_filename, DedupRegistry};
use renamer_events::ProgressBus;
use renamer_storage::{
    manifest_key, ManifestWriter, ObjectStore, SealedManifest, StorageError, DEFAULT_PART_SIZE,
};
use serde_json::json;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::suggester::{NameSuggester, SuggestError};

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_SUGGEST_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_MANIFEST_PREFIX: &str = "demo/";

// ---------------------------------------------------------------------------
// Configuration & results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub concurrency: ConcurrencyLimit,
    pub fetch_timeout: Duration,
    pub suggest_timeout: Duration,
    pub manifest_part_size: usize,
    /// Prepended to `jobs/{job_id}/manifest.jsonl`.
    pub manifest_prefix: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            concurrency: ConcurrencyLimit::default(),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            suggest_timeout: DEFAULT_SUGGEST_TIMEOUT,
            manifest_part_size: DEFAULT_PART_SIZE,
            manifest_prefix: DEFAULT_MANIFEST_PREFIX.to_string(),
        }
    }
}

/// Lifecycle of one job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Started,
    Processing,
    Completed,
    Failed,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Started => "started",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        })
    }
}

/// Why one item produced no name.
#[derive(Debug, thiserror::Error)]
pub enum ItemError {
    #[error("Failed to fetch {key}: {source}")]
    Fetch { key: String, source: StorageError },

    #[error("Fetching {key} timed out after {}s", .timeout.as_secs())]
    FetchTimeout { key: String, timeout: Duration },

    #[error(transparent)]
    Suggest(#[from] SuggestError),

    #[error("Name suggestion timed out after {}s", .0.as_secs())]
    SuggestTimeout(Duration),

    #[error("Item task did not complete: {0}")]
    Aborted(String),
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Failed to upload results: {0}")]
    Manifest(#[from] StorageError),
}

/// Outcome of a job that reached `Completed`.
#[derive(Debug, Clone)]
pub struct JobSummary {
    pub job_id: String,
    pub state: JobState,
    pub total_files: usize,
    pub completed: usize,
    pub errors: usize,
    pub manifest: SealedManifest,
    /// One result per item, sorted by index.
    pub results: Vec<NameResult>,
}

impl JobSummary {
    pub fn manifest_url(&self) -> &str {
        &self.manifest.uri
    }
}

fn progress(completed: usize, total: usize) -> serde_json::Value {
    json!({ "completed": completed, "total": total })
}

// ---------------------------------------------------------------------------
// Item tasks
// ---------------------------------------------------------------------------

struct ItemOutcome {
    item: WorkItem,
    elapsed_ms: u64,
    slug: Result<String, ItemError>,
}

/// Everything an item task needs; cheap to clone into each task.
#[derive(Clone)]
struct ItemContext {
    job_id: Arc<str>,
    user_prompt: Arc<str>,
    total: usize,
    images: Arc<dyn ObjectStore>,
    suggester: Arc<dyn NameSuggester>,
    bus: Arc<ProgressBus>,
    finished: Arc<AtomicUsize>,
    fetch_timeout: Duration,
    suggest_timeout: Duration,
}

impl ItemContext {
    async fn process(self, item: WorkItem) -> ItemOutcome {
        self.bus
            .publish(
                &self.job_id,
                ProgressEventType::ItemProcessing,
                json!({
                    "index": item.index,
                    "filename": item.original_name,
                    "progress": progress(self.finished.load(Ordering::SeqCst), self.total),
                }),
            )
            .await;

        let started = Instant::now();
        let slug = self.suggest(&item).await;
        ItemOutcome {
            elapsed_ms: started.elapsed().as_millis() as u64,
            item,
            slug,
        }
    }

    async fn suggest(&self, item: &WorkItem) -> Result<String, ItemError> {
        tracing::debug!(job_id = %self.job_id, index = item.index, key = %item.input_ref, "Fetching image");

        let bytes = tokio::time::timeout(self.fetch_timeout, self.images.get(&item.input_ref))
            .await
            .map_err(|_| ItemError::FetchTimeout {
                key: item.input_ref.clone(),
                timeout: self.fetch_timeout,
            })?
            .map_err(|source| ItemError::Fetch {
                key: item.input_ref.clone(),
                source,
            })?;

        let slug = tokio::time::timeout(
            self.suggest_timeout,
            self.suggester.suggest_name(&bytes, &self.user_prompt),
        )
        .await
        .map_err(|_| ItemError::SuggestTimeout(self.suggest_timeout))??;

        Ok(slug)
    }
}

// ---------------------------------------------------------------------------
// Fan-in
// ---------------------------------------------------------------------------

/// Job-scoped state owned by the fan-in loop.
struct FanIn {
    job_id: Arc<str>,
    total: usize,
    bus: Arc<ProgressBus>,
    finished: Arc<AtomicUsize>,
    registry: DedupRegistry,
    manifest: ManifestWriter,
    seen: Vec<bool>,
    results: Vec<NameResult>,
    completed: usize,
    errors: usize,
}

impl FanIn {
    /// Turn one finished item into a result, persist it and announce it.
    async fn record(&mut self, outcome: ItemOutcome) -> Result<(), StorageError> {
        let ItemOutcome {
            item,
            elapsed_ms,
            slug,
        } = outcome;
        self.seen[item.index] = true;

        let result = match slug {
            Ok(slug) => {
                let reserved = self.registry.reserve(&slug);
                let filename = renamed_filename(&reserved, &item.original_name);
                tracing::info!(
                    job_id = %self.job_id,
                    index = item.index,
                    original = %item.original_name,
                    suggested = %filename,
                    elapsed_ms,
                    "Item renamed",
                );
                NameResult::completed(&item, filename, elapsed_ms)
            }
            Err(e) => {
                tracing::warn!(job_id = %self.job_id, index = item.index, error = %e, "Item failed");
                NameResult::failed(&item, e.to_string(), elapsed_ms)
            }
        };

        self.manifest.append(std::slice::from_ref(&result)).await?;
        let done = self.finished.fetch_add(1, Ordering::SeqCst) + 1;

        if result.is_completed() {
            self.completed += 1;
            self.bus
                .publish(
                    &self.job_id,
                    ProgressEventType::ItemComplete,
                    json!({ "result": result, "progress": progress(done, self.total) }),
                )
                .await;
        } else {
            self.errors += 1;
            self.bus
                .publish(
                    &self.job_id,
                    ProgressEventType::ItemError,
                    json!({
                        "index": result.index,
                        "filename": result.original_name,
                        "error": result.error_detail,
                        "progress": progress(done, self.total),
                    }),
                )
                .await;
        }

        self.results.push(result);
        Ok(())
    }

    fn unseen(&self) -> Vec<usize> {
        self.seen
            .iter()
            .enumerate()
            .filter(|(_, seen)| !**seen)
            .map(|(index, _)| index)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// JobRunner
// ---------------------------------------------------------------------------

pub struct JobRunner {
    images: Arc<dyn ObjectStore>,
    manifests: Arc<dyn ObjectStore>,
    suggester: Arc<dyn NameSuggester>,
    bus: Arc<ProgressBus>,
    config: RunnerConfig,
}

impl JobRunner {
    pub fn new(
        images: Arc<dyn ObjectStore>,
        manifests: Arc<dyn ObjectStore>,
        suggester: Arc<dyn NameSuggester>,
        bus: Arc<ProgressBus>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            images,
            manifests,
            suggester,
            bus,
            config,
        }
    }

    pub fn bus(&self) -> &Arc<ProgressBus> {
        &self.bus
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run `job` to completion.
    ///
    /// Safe to call again for the same job: the manifest is regenerated from
    /// scratch and replaces any earlier one.
    pub async fn run(&self, job: &JobDescriptor) -> Result<JobSummary, JobError> {
        let job_id: Arc<str> = Arc::from(job.job_id.as_str());
        let total = job.total_items();
        let permits = self.config.concurrency.permits_for(total);

        tracing::info!(
            job_id = %job_id,
            total_files = total,
            concurrency = permits,
            state = %JobState::Started,
            "Job started",
        );
        self.bus
            .publish(
                &job_id,
                ProgressEventType::JobStarted,
                json!({ "total_files": total, "completed": 0, "status": "processing" }),
            )
            .await;

        let finished = Arc::new(AtomicUsize::new(0));
        let ctx = ItemContext {
            job_id: job_id.clone(),
            user_prompt: Arc::from(job.user_prompt.as_str()),
            total,
            images: self.images.clone(),
            suggester: self.suggester.clone(),
            bus: self.bus.clone(),
            finished: finished.clone(),
            fetch_timeout: self.config.fetch_timeout,
            suggest_timeout: self.config.suggest_timeout,
        };

        let items = job.work_items();
        let semaphore = Arc::new(Semaphore::new(permits));
        let mut tasks = JoinSet::new();
        for item in items.iter().cloned() {
            let ctx = ctx.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                // Held for the whole item; released when the task ends.
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        return ItemOutcome {
                            item,
                            elapsed_ms: 0,
                            slug: Err(ItemError::Aborted(e.to_string())),
                        }
                    }
                };
                ctx.process(item).await
            });
        }
        tracing::debug!(job_id = %job_id, state = %JobState::Processing, "Item tasks spawned");

        let key = manifest_key(&self.config.manifest_prefix, &job_id);
        let mut fan_in = FanIn {
            job_id: job_id.clone(),
            total,
            bus: self.bus.clone(),
            finished,
            registry: DedupRegistry::new(),
            manifest: ManifestWriter::new(self.manifests.clone(), key, self.config.manifest_part_size),
            seen: vec![false; total],
            results: Vec::with_capacity(total),
            completed: 0,
            errors: 0,
        };

        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    // Recorded below once every other item has reported.
                    tracing::error!(job_id = %job_id, error = %e, "Item task panicked");
                    continue;
                }
            };
            if let Err(e) = fan_in.record(outcome).await {
                tasks.shutdown().await;
                fan_in.manifest.abort().await;
                return Err(self.fail(&job_id, e).await);
            }
        }

        for index in fan_in.unseen() {
            let outcome = ItemOutcome {
                item: items[index].clone(),
                elapsed_ms: 0,
                slug: Err(ItemError::Aborted("item task panicked".into())),
            };
            if let Err(e) = fan_in.record(outcome).await {
                fan_in.manifest.abort().await;
                return Err(self.fail(&job_id, e).await);
            }
        }

        let FanIn {
            manifest,
            mut results,
            completed,
            errors,
            ..
        } = fan_in;

        let sealed = match manifest.seal().await {
            Ok(sealed) => sealed,
            Err(e) => return Err(self.fail(&job_id, e).await),
        };

        results.sort_by_key(|r| r.index);
        self.bus
            .publish(
                &job_id,
                ProgressEventType::JobComplete,
                json!({
                    "total_files": total,
                    "completed": completed,
                    "errors": errors,
                    "manifest_url": sealed.uri,
                    "results": results,
                }),
            )
            .await;
        tracing::info!(
            job_id = %job_id,
            completed,
            errors,
            manifest = %sealed.uri,
            state = %JobState::Completed,
            "Job completed",
        );

        Ok(JobSummary {
            job_id: job_id.to_string(),
            state: JobState::Completed,
            total_files: total,
            completed,
            errors,
            manifest: sealed,
            results,
        })
    }

    async fn fail(&self, job_id: &str, error: StorageError) -> JobError {
        let error = JobError::Manifest(error);
        tracing::error!(job_id, error = %error, state = %JobState::Failed, "Job failed");
        self.bus
            .publish(
                job_id,
                ProgressEventType::JobError,
                json!({ "error": error.to_string() }),
            )
            .await;
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_errors_render_readable_details() {
        let err = ItemError::FetchTimeout {
            key: "demo/j/a.jpg".into(),
            timeout: Duration::from_secs(120),
        };
        assert_eq!(err.to_string(), "Fetching demo/j/a.jpg timed out after 120s");

        let err = ItemError::from(SuggestError::BackendUnavailable("503".into()));
        assert_eq!(err.to_string(), "Inference backend unavailable: 503");

        assert_eq!(
            ItemError::SuggestTimeout(Duration::from_secs(60)).to_string(),
            "Name suggestion timed out after 60s"
        );
    }

    #[test]
    fn default_config_matches_documented_values() {
        let config = RunnerConfig::default();
        assert_eq!(config.concurrency, ConcurrencyLimit::Adaptive { max: 5 });
        assert_eq!(config.fetch_timeout, Duration::from_secs(120));
        assert_eq!(config.suggest_timeout, Duration::from_secs(60));
        assert_eq!(config.manifest_part_size, 5 * 1024 * 1024);
        assert_eq!(config.manifest_prefix, "demo/");
    }

    #[test]
    fn state_display_is_lowercase() {
        assert_eq!(JobState::Processing.to_string(), "processing");
        assert_eq!(JobState::Failed.to_string(), "failed");
    }
}
