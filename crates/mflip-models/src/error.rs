//! Model error types.

use thiserror::Error;

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Could not parse queue entry: {0}")]
    QueueEntryParse(String),

    #[error("Step not found: {0}")]
    StepNotFound(String),

    #[error("Unsupported item type: {0}")]
    UnsupportedItemType(String),

    #[error("Invalid status code: {0}")]
    InvalidStatus(u8),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ModelError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn queue_entry_parse(msg: impl Into<String>) -> Self {
        Self::QueueEntryParse(msg.into())
    }
}
