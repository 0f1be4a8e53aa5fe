//! The name suggestion port.

use async_trait::async_trait;

/// Why a suggestion could not be produced for one image.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SuggestError {
    /// The bytes are not an image the backend can decode.
    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// The backend is out of capacity or unreachable; retrying later may work.
    #[error("Inference backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Inference backend error: {0}")]
    Backend(String),
}

/// Suggests a filename slug for an image.
///
/// Implementations are shared as `Arc<dyn NameSuggester>` across every item
/// task of every job, so they must tolerate concurrent calls. Returned names
/// are already sanitized slugs; callers do not sanitize them again.
#[async_trait]
pub trait NameSuggester: Send + Sync {
    async fn suggest_name(&self, image: &[u8], user_prompt: &str) -> Result<String, SuggestError>;
}
