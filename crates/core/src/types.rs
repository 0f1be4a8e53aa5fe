/// Opaque job identifier assigned by the submission endpoint (e.g. `jr_ab12cd34`).
pub type JobId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
