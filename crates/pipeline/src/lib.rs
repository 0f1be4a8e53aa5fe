//! Job execution for the image rename pipeline.
//!
//! - [`NameSuggester`]: the inference port, with [`HttpSuggester`] as the
//!   production adapter.
//! - [`preprocess`]: format probing and downscaling before inference.
//! - [`JobRunner`]: runs one job end to end under a concurrency bound.

pub mod http_suggester;
pub mod preprocess;
pub mod runner;
pub mod suggester;

pub use http_suggester::{HttpSuggester, HttpSuggesterConfig};
pub use runner::{ItemError, JobError, JobRunner, JobState, JobSummary, RunnerConfig};
pub use suggester::{NameSuggester, SuggestError};
