//! Progress event type names for rename jobs.
//!
//! Used as the `type` field of every progress message published to live
//! subscribers and stored in the per-job history.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressEventType {
    JobStarted,
    ItemProcessing,
    ItemComplete,
    ItemError,
    JobComplete,
    JobError,
}

impl ProgressEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::JobStarted => "job_started",
            Self::ItemProcessing => "item_processing",
            Self::ItemComplete => "item_complete",
            Self::ItemError => "item_error",
            Self::JobComplete => "job_complete",
            Self::JobError => "job_error",
        }
    }

    /// `true` for the two events that end a job's stream.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::JobComplete | Self::JobError)
    }
}

impl std::fmt::Display for ProgressEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_name_matches_display() {
        for ty in [
            ProgressEventType::JobStarted,
            ProgressEventType::ItemProcessing,
            ProgressEventType::ItemComplete,
            ProgressEventType::ItemError,
            ProgressEventType::JobComplete,
            ProgressEventType::JobError,
        ] {
            let json = serde_json::to_value(ty).unwrap();
            assert_eq!(json, ty.to_string());
        }
    }

    #[test]
    fn only_job_complete_and_error_are_terminal() {
        assert!(ProgressEventType::JobComplete.is_terminal());
        assert!(ProgressEventType::JobError.is_terminal());
        assert!(!ProgressEventType::ItemError.is_terminal());
    }
}
