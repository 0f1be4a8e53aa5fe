#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Malformed job message: {0}")]
    Malformed(#[from] serde_json::Error),
}
