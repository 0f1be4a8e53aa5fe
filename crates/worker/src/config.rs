use std::str::FromStr;
use std::time::Duration;

use renamer_api::config::ApiConfig;
use renamer_core::job::{ConcurrencyLimit, DEFAULT_MAX_CONCURRENCY};
use renamer_events::HistoryConfig;
use renamer_pipeline::http_suggester::DEFAULT_MAX_NEW_TOKENS;
use renamer_pipeline::preprocess::DEFAULT_MAX_PIXELS;
use renamer_pipeline::{HttpSuggesterConfig, RunnerConfig};
use renamer_storage::DEFAULT_PART_SIZE;

use crate::consumer::{ConsumerConfig, MalformedPolicy};

/// S3 refuses multipart parts below this size (the final part excepted).
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// SQS caps long polling at 20 seconds.
pub const MAX_POLL_WAIT_SECS: u64 = 20;

pub const DEFAULT_SUGGESTER_URL: &str = "http://127.0.0.1:8001/v1/suggest";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("Invalid {key}={value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Worker configuration loaded from environment variables.
///
/// | Env Var                 | Default                            |
/// |-------------------------|------------------------------------|
/// | `AWS_REGION`            | `us-east-1`                        |
/// | `S3_IN_BUCKET`          | required                           |
/// | `S3_OUT_BUCKET`         | required                           |
/// | `SQS_QUEUE_URL`         | required                           |
/// | `S3_ENDPOINT`           | unset                              |
/// | `SQS_ENDPOINT`          | unset                              |
/// | `DEAD_LETTER_QUEUE_URL` | unset (dead-lettering deletes)     |
/// | `REDIS_URL`             | unset (no progress history)        |
/// | `SUGGESTER_URL`         | `http://127.0.0.1:8001/v1/suggest` |
/// | `MODEL_ID`              | unset                              |
/// | `MAX_PIXELS`            | `786432`                           |
/// | `MAX_NEW_TOKENS`        | `15`                               |
/// | `MAX_CONCURRENCY`       | `5`                                |
/// | `FIXED_CONCURRENCY`     | unset (adaptive)                   |
/// | `SUGGEST_TIMEOUT_SECS`  | `60`                               |
/// | `FETCH_TIMEOUT_SECS`    | `120`                              |
/// | `POLL_WAIT_SECS`        | `10`                               |
/// | `ERROR_BACKOFF_SECS`    | `5`                                |
/// | `MANIFEST_PART_SIZE`    | `5242880`                          |
/// | `MANIFEST_PREFIX`       | `demo/`                            |
/// | `HISTORY_MAX_EVENTS`    | `50`                               |
/// | `HISTORY_TTL_SECS`      | `3600`                             |
/// | `MALFORMED_POLICY`      | `dead_letter`                      |
/// | `MAX_RECEIVE_COUNT`     | unset                              |
/// | `HOST`                  | `0.0.0.0`                          |
/// | `PORT`                  | `3000`                             |
/// | `CORS_ORIGINS`          | `http://localhost:3000`            |
/// | `PROGRESS_API_ENABLED`  | `true`                             |
/// | `SHUTDOWN_TIMEOUT_SECS` | `30`                               |
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub aws_region: String,
    pub input_bucket: String,
    pub output_bucket: String,
    pub queue_url: String,
    pub s3_endpoint: Option<String>,
    pub sqs_endpoint: Option<String>,
    pub dead_letter_queue_url: Option<String>,
    pub redis_url: Option<String>,
    pub suggester_url: String,
    pub model_id: Option<String>,
    pub max_pixels: u32,
    pub max_new_tokens: u32,
    pub concurrency: ConcurrencyLimit,
    pub suggest_timeout: Duration,
    pub fetch_timeout: Duration,
    pub poll_wait: Duration,
    pub error_backoff: Duration,
    pub manifest_part_size: usize,
    pub manifest_prefix: String,
    pub history: HistoryConfig,
    pub malformed_policy: MalformedPolicy,
    pub max_receive_count: Option<u32>,
    pub progress_api_enabled: bool,
    pub api: ApiConfig,
    pub shutdown_timeout: Duration,
}

/// Typed reads over a variable lookup.
struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    /// Set and non-blank.
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.get(key).ok_or(ConfigError::Missing(key))
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn parsed<T>(&self, key: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(key)
            .map(|value| {
                value.parse().map_err(|e: T::Err| ConfigError::Invalid {
                    key,
                    reason: e.to_string(),
                    value,
                })
            })
            .transpose()
    }

    fn positive(&self, key: &'static str) -> Result<Option<u64>, ConfigError> {
        match self.parsed::<u64>(key)? {
            Some(0) => Err(invalid(key, "0", "must be at least 1")),
            other => Ok(other),
        }
    }

    fn secs(&self, key: &'static str, default: u64) -> Result<Duration, ConfigError> {
        Ok(Duration::from_secs(self.positive(key)?.unwrap_or(default)))
    }

    fn flag(&self, key: &'static str, default: bool) -> Result<bool, ConfigError> {
        let Some(value) = self.get(key) else {
            return Ok(default);
        };
        match value.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(invalid(key, &value, "expected true or false")),
        }
    }
}

fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

impl WorkerConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env { lookup };

        let concurrency = match env.positive("FIXED_CONCURRENCY")? {
            Some(n) => ConcurrencyLimit::Fixed(n as usize),
            None => ConcurrencyLimit::Adaptive {
                max: env
                    .positive("MAX_CONCURRENCY")?
                    .map_or(DEFAULT_MAX_CONCURRENCY, |n| n as usize),
            },
        };

        let poll_wait_secs = env.parsed::<u64>("POLL_WAIT_SECS")?.unwrap_or(10);
        if poll_wait_secs > MAX_POLL_WAIT_SECS {
            return Err(invalid(
                "POLL_WAIT_SECS",
                &poll_wait_secs.to_string(),
                "must be at most 20",
            ));
        }

        let manifest_part_size = env
            .parsed::<usize>("MANIFEST_PART_SIZE")?
            .unwrap_or(DEFAULT_PART_SIZE);
        if manifest_part_size < MIN_PART_SIZE {
            return Err(invalid(
                "MANIFEST_PART_SIZE",
                &manifest_part_size.to_string(),
                "must be at least 5242880 bytes",
            ));
        }

        let history = HistoryConfig {
            max_events: env
                .positive("HISTORY_MAX_EVENTS")?
                .map_or(HistoryConfig::default().max_events, |n| n as usize),
            ttl: env.secs("HISTORY_TTL_SECS", HistoryConfig::default().ttl.as_secs())?,
        };

        let api_defaults = ApiConfig::default();
        let cors_origins = match env.get("CORS_ORIGINS") {
            Some(raw) => raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            None => api_defaults.cors_origins.clone(),
        };
        let api = ApiConfig {
            host: env.or("HOST", &api_defaults.host),
            port: env.parsed("PORT")?.unwrap_or(api_defaults.port),
            cors_origins,
            ..api_defaults
        };

        Ok(Self {
            aws_region: env.or("AWS_REGION", "us-east-1"),
            input_bucket: env.required("S3_IN_BUCKET")?,
            output_bucket: env.required("S3_OUT_BUCKET")?,
            queue_url: env.required("SQS_QUEUE_URL")?,
            s3_endpoint: env.get("S3_ENDPOINT"),
            sqs_endpoint: env.get("SQS_ENDPOINT"),
            dead_letter_queue_url: env.get("DEAD_LETTER_QUEUE_URL"),
            redis_url: env.get("REDIS_URL"),
            suggester_url: env.or("SUGGESTER_URL", DEFAULT_SUGGESTER_URL),
            model_id: env.get("MODEL_ID"),
            max_pixels: env.parsed("MAX_PIXELS")?.unwrap_or(DEFAULT_MAX_PIXELS),
            max_new_tokens: env
                .parsed("MAX_NEW_TOKENS")?
                .unwrap_or(DEFAULT_MAX_NEW_TOKENS),
            concurrency,
            suggest_timeout: env.secs("SUGGEST_TIMEOUT_SECS", 60)?,
            fetch_timeout: env.secs("FETCH_TIMEOUT_SECS", 120)?,
            poll_wait: Duration::from_secs(poll_wait_secs),
            error_backoff: env.secs("ERROR_BACKOFF_SECS", 5)?,
            manifest_part_size,
            manifest_prefix: env.or("MANIFEST_PREFIX", "demo/"),
            history,
            malformed_policy: env.parsed("MALFORMED_POLICY")?.unwrap_or_default(),
            max_receive_count: env
                .positive("MAX_RECEIVE_COUNT")?
                .map(|n| n.min(u64::from(u32::MAX)) as u32),
            progress_api_enabled: env.flag("PROGRESS_API_ENABLED", true)?,
            api,
            shutdown_timeout: env.secs("SHUTDOWN_TIMEOUT_SECS", 30)?,
        })
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            concurrency: self.concurrency,
            fetch_timeout: self.fetch_timeout,
            suggest_timeout: self.suggest_timeout,
            manifest_part_size: self.manifest_part_size,
            manifest_prefix: self.manifest_prefix.clone(),
        }
    }

    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig {
            poll_wait: self.poll_wait,
            error_backoff: self.error_backoff,
            malformed_policy: self.malformed_policy,
            max_receive_count: self.max_receive_count,
        }
    }

    pub fn suggester_config(&self) -> HttpSuggesterConfig {
        HttpSuggesterConfig {
            url: self.suggester_url.clone(),
            model_id: self.model_id.clone(),
            max_pixels: self.max_pixels,
            max_new_tokens: self.max_new_tokens,
        }
    }
}
