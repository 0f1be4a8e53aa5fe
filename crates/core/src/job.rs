//! Rename job data model.
//!
//! A [`JobMessage`] arrives on the work queue, is validated into an immutable
//! [`JobDescriptor`], expands into one [`WorkItem`] per input and produces one
//! [`NameResult`] per item.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{JobId, Timestamp};

// ---------------------------------------------------------------------------
// Queue message
// ---------------------------------------------------------------------------

/// Work queue message body as produced by the submission endpoint.
///
/// `keys` and `prompt` are accepted as aliases because the upload endpoint
/// has historically enqueued them under those names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMessage {
    pub job_id: JobId,
    #[serde(alias = "keys")]
    pub file_keys: Vec<String>,
    #[serde(default, alias = "prompt")]
    pub user_prompt: String,
    /// Advisory only; anything that is not a non-negative count reads as absent.
    #[serde(default, deserialize_with = "lenient_count")]
    pub total_files: Option<usize>,
    #[serde(default)]
    pub submitted_at: Option<Timestamp>,
}

fn lenient_count<'de, D>(deserializer: D) -> Result<Option<usize>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    let count = match &value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    Ok(count.and_then(|c| usize::try_from(c).ok()))
}

impl JobMessage {
    /// Decode a raw queue body.
    pub fn parse(body: &str) -> Result<Self, CoreError> {
        Ok(serde_json::from_str(body)?)
    }

    /// Validate the message and freeze it into a descriptor.
    ///
    /// An advertised `total_files` that disagrees with the key list is not an
    /// error: the key list is authoritative.
    pub fn into_descriptor(self) -> Result<JobDescriptor, CoreError> {
        if self.job_id.trim().is_empty() {
            return Err(CoreError::Validation("job_id must not be empty".into()));
        }
        if let Some(key) = self.file_keys.iter().find(|k| k.trim().is_empty()) {
            return Err(CoreError::Validation(format!(
                "file key {key:?} must not be blank"
            )));
        }

        Ok(JobDescriptor {
            job_id: self.job_id,
            item_refs: self.file_keys,
            user_prompt: self.user_prompt,
            submitted_at: self.submitted_at.unwrap_or_else(chrono::Utc::now),
        })
    }

    /// `true` when `total_files` is present and differs from the key count.
    pub fn has_count_mismatch(&self) -> bool {
        self.total_files
            .is_some_and(|total| total != self.file_keys.len())
    }
}

// ---------------------------------------------------------------------------
// Descriptor & items
// ---------------------------------------------------------------------------

/// One submitted batch-rename request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDescriptor {
    pub job_id: JobId,
    pub item_refs: Vec<String>,
    pub user_prompt: String,
    pub submitted_at: Timestamp,
}

impl JobDescriptor {
    pub fn total_items(&self) -> usize {
        self.item_refs.len()
    }

    /// Expand the descriptor into ordered work items.
    pub fn work_items(&self) -> Vec<WorkItem> {
        self.item_refs
            .iter()
            .enumerate()
            .map(|(index, input_ref)| WorkItem {
                index,
                input_ref: input_ref.clone(),
                original_name: original_name_of(input_ref).to_string(),
            })
            .collect()
    }
}

/// One image within a job run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub index: usize,
    pub input_ref: String,
    pub original_name: String,
}

/// Last `/`-separated segment of an object key.
pub fn original_name_of(input_ref: &str) -> &str {
    input_ref.rsplit('/').next().unwrap_or(input_ref)
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Completed,
    Error,
}

/// Outcome for one item, written as one manifest line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameResult {
    pub index: usize,
    #[serde(rename = "original")]
    pub original_name: String,
    #[serde(rename = "suggested")]
    pub suggested_name: Option<String>,
    pub status: ItemStatus,
    #[serde(rename = "error", default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    pub processing_time_ms: u64,
    pub timestamp: Timestamp,
}

impl NameResult {
    pub fn completed(item: &WorkItem, suggested_name: String, processing_time_ms: u64) -> Self {
        Self {
            index: item.index,
            original_name: item.original_name.clone(),
            suggested_name: Some(suggested_name),
            status: ItemStatus::Completed,
            error_detail: None,
            processing_time_ms,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn failed(item: &WorkItem, error: impl Into<String>, processing_time_ms: u64) -> Self {
        Self {
            index: item.index,
            original_name: item.original_name.clone(),
            suggested_name: None,
            status: ItemStatus::Error,
            error_detail: Some(error.into()),
            processing_time_ms,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == ItemStatus::Completed
    }
}

// ---------------------------------------------------------------------------
// Concurrency bound
// ---------------------------------------------------------------------------

/// Default upper bound for [`ConcurrencyLimit::Adaptive`].
pub const DEFAULT_MAX_CONCURRENCY: usize = 5;

/// How many items of one job may be in flight at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcurrencyLimit {
    /// `min(max, max(1, total_items / 2))`.
    Adaptive { max: usize },
    /// A fixed pool size regardless of job size.
    Fixed(usize),
}

impl ConcurrencyLimit {
    /// Resolve the bound for a job of `total_items` items. Never below 1.
    pub fn permits_for(self, total_items: usize) -> usize {
        match self {
            Self::Adaptive { max } => (total_items / 2).max(1).min(max.max(1)),
            Self::Fixed(n) => n.max(1),
        }
    }
}

impl Default for ConcurrencyLimit {
    fn default() -> Self {
        Self::Adaptive {
            max: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parses_canonical_message() {
        let msg = JobMessage::parse(
            r#"{"job_id":"jr_ab12","file_keys":["demo/jr_ab12/000_cat.jpg"],"user_prompt":"pets","total_files":1}"#,
        )
        .unwrap();
        assert_eq!(msg.job_id, "jr_ab12");
        assert_eq!(msg.user_prompt, "pets");
        assert!(!msg.has_count_mismatch());
    }

    #[test]
    fn parses_legacy_field_names() {
        let msg =
            JobMessage::parse(r#"{"job_id":"jr_1","prompt":"p","keys":["a/b.png"]}"#).unwrap();
        assert_eq!(msg.file_keys, vec!["a/b.png"]);
        assert_eq!(msg.user_prompt, "p");
        assert_eq!(msg.total_files, None);
    }

    #[test]
    fn prompt_defaults_to_empty() {
        let msg = JobMessage::parse(r#"{"job_id":"jr_1","file_keys":[]}"#).unwrap();
        assert_eq!(msg.user_prompt, "");
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert_matches!(JobMessage::parse("not json"), Err(CoreError::Malformed(_)));
        assert_matches!(
            JobMessage::parse(r#"{"file_keys":[]}"#),
            Err(CoreError::Malformed(_))
        );
    }

    #[test]
    fn empty_job_id_fails_validation() {
        let msg = JobMessage::parse(r#"{"job_id":"  ","file_keys":["a.jpg"]}"#).unwrap();
        assert_matches!(msg.into_descriptor(), Err(CoreError::Validation(_)));
    }

    #[test]
    fn blank_file_key_fails_validation() {
        let msg = JobMessage::parse(r#"{"job_id":"j","file_keys":["a.jpg",""]}"#).unwrap();
        assert_matches!(msg.into_descriptor(), Err(CoreError::Validation(_)));
    }

    #[test]
    fn count_mismatch_is_reported_not_rejected() {
        let msg =
            JobMessage::parse(r#"{"job_id":"j","file_keys":["a.jpg"],"total_files":3}"#).unwrap();
        assert!(msg.has_count_mismatch());
        let job = msg.into_descriptor().unwrap();
        assert_eq!(job.total_items(), 1);
    }

    #[test]
    fn odd_total_files_values_do_not_reject_the_message() {
        let parse = |total: &str| {
            JobMessage::parse(&format!(
                r#"{{"job_id":"j","file_keys":["a.jpg","b.jpg"],"total_files":{total}}}"#
            ))
            .unwrap()
            .total_files
        };
        assert_eq!(parse(r#""2""#), Some(2));
        assert_eq!(parse("-1"), None);
        assert_eq!(parse("1.5"), None);
        assert_eq!(parse(r#""lots""#), None);
        assert_eq!(parse("null"), None);
    }

    #[test]
    fn negative_total_files_is_not_a_mismatch() {
        let msg =
            JobMessage::parse(r#"{"job_id":"j","file_keys":["a.jpg"],"total_files":-1}"#).unwrap();
        assert!(!msg.has_count_mismatch());
        assert_eq!(msg.into_descriptor().unwrap().total_items(), 1);
    }

    #[test]
    fn work_items_carry_index_and_basename() {
        let job = JobMessage::parse(
            r#"{"job_id":"j","file_keys":["demo/j/000_cat.jpg","flat.png"]}"#,
        )
        .unwrap()
        .into_descriptor()
        .unwrap();
        let items = job.work_items();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].index, 0);
        assert_eq!(items[0].original_name, "000_cat.jpg");
        assert_eq!(items[1].original_name, "flat.png");
    }

    #[test]
    fn completed_result_serializes_with_manifest_field_names() {
        let item = WorkItem {
            index: 0,
            input_ref: "demo/j/000_cat.jpg".into(),
            original_name: "000_cat.jpg".into(),
        };
        let json = serde_json::to_value(NameResult::completed(&item, "cat.jpg".into(), 12)).unwrap();
        assert_eq!(json["index"], 0);
        assert_eq!(json["original"], "000_cat.jpg");
        assert_eq!(json["suggested"], "cat.jpg");
        assert_eq!(json["status"], "completed");
        assert_eq!(json["processing_time_ms"], 12);
        assert!(json["timestamp"].is_string());
        assert!(json.get("error").is_none());
    }

    #[test]
    fn failed_result_has_null_suggestion_and_error() {
        let item = WorkItem {
            index: 3,
            input_ref: "x.jpg".into(),
            original_name: "x.jpg".into(),
        };
        let result = NameResult::failed(&item, "backend unavailable", 5);
        assert!(!result.is_completed());
        let json = serde_json::to_value(&result).unwrap();
        assert!(json["suggested"].is_null());
        assert_eq!(json["status"], "error");
        assert_eq!(json["error"], "backend unavailable");
    }

    #[test]
    fn adaptive_limit_follows_item_count() {
        let limit = ConcurrencyLimit::default();
        assert_eq!(limit.permits_for(0), 1);
        assert_eq!(limit.permits_for(1), 1);
        assert_eq!(limit.permits_for(4), 2);
        assert_eq!(limit.permits_for(9), 4);
        assert_eq!(limit.permits_for(100), 5);
    }

    #[test]
    fn fixed_limit_is_never_zero() {
        assert_eq!(ConcurrencyLimit::Fixed(0).permits_for(10), 1);
        assert_eq!(ConcurrencyLimit::Fixed(8).permits_for(2), 8);
    }
}
