//! Queue and persistence error types.

use mflip_models::ModelError;
use mflip_store::StoreError;
use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Timed out waiting for lock on {0}")]
    LockTimeout(String),

    /// A stored record could not be decoded, or an index points at nothing
    #[error("Data integrity: {0}")]
    DataIntegrity(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn data_integrity(msg: impl Into<String>) -> Self {
        Self::DataIntegrity(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Failures of the backing store itself, as opposed to bad or missing data.
    pub fn is_store_failure(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}
