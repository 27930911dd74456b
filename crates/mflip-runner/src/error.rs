//! Runner error types.

use mflip_models::ModelError;
use mflip_queue::QueueError;
use mflip_templates::TemplateError;
use thiserror::Error;

use crate::orchestrator::OrchestratorError;

pub type RunnerResult<T> = Result<T, RunnerError>;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RunnerError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// HTTP-equivalent status code for callers that expose the runner.
    pub fn status_code(&self) -> u16 {
        match self {
            RunnerError::NotFound(_) => 404,
            RunnerError::Queue(e) if e.is_not_found() => 404,
            RunnerError::Template(TemplateError::TemplateNotFound(_))
            | RunnerError::Template(TemplateError::SettingsNotFound(_)) => 404,
            RunnerError::Validation(_) | RunnerError::Model(_) => 400,
            RunnerError::Queue(QueueError::Validation(_)) => 400,
            RunnerError::Template(TemplateError::InvalidSettingsId(_))
            | RunnerError::Template(TemplateError::MissingSettingsId) => 400,
            RunnerError::Orchestrator(_) => 502,
            _ => 500,
        }
    }

    /// Whether a reconciliation tick must stop on this error.
    ///
    /// Store outages and orchestrator lookups end the tick; bad or missing
    /// records only affect the entry being processed.
    pub fn is_tick_fatal(&self) -> bool {
        match self {
            RunnerError::Queue(e) => e.is_store_failure() || matches!(e, QueueError::LockTimeout(_)),
            RunnerError::Orchestrator(e) => e.is_lookup_failure(),
            _ => false,
        }
    }
}
