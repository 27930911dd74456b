//! Store error types.

use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Wrong type for key {0}")]
    WrongType(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl StoreError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    pub fn wrong_type(key: impl Into<String>) -> Self {
        Self::WrongType(key.into())
    }
}
