//! The object storage port.

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Unknown multipart upload {upload_id} for {key}")]
    UnknownUpload { key: String, upload_id: String },

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Record could not be encoded: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// A part accepted by the store, as needed to complete the upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedPart {
    /// 1-based part number.
    pub part_number: i32,
    pub etag: String,
}

/// Key/value object storage with a multipart write protocol.
///
/// Implementations must be safe to share across tasks (`Arc<dyn ObjectStore>`).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read a whole object.
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Open a multipart session and return its upload id.
    async fn create_multipart(&self, key: &str, content_type: &str) -> Result<String, StorageError>;

    /// Upload one part of an open session.
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> Result<UploadedPart, StorageError>;

    /// Commit `parts` (in order) as the final object.
    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> Result<(), StorageError>;

    /// Discard an open session and its parts.
    async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<(), StorageError>;

    /// Locator for `key` suitable for clients, e.g. `s3://bucket/key`.
    fn uri(&self, key: &str) -> String;
}
