//! The external worker orchestrator, as seen by the runner.
//!
//! Workers are launched with a set of environment variables and labels,
//! then found again by label on every reconciliation tick.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use mflip_models::WorkerDescriptor;

/// Label key carrying the step id on every launched worker.
pub const STEP_ID_LABEL: &str = "mediaflipper.jobStepId";

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Launch failed: {0}")]
    LaunchFailed(String),

    #[error("Listing workers failed: {0}")]
    ListFailed(String),

    #[error("Orchestrator returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl OrchestratorError {
    /// Failures that leave the runner unable to tell what workers exist.
    pub fn is_lookup_failure(&self) -> bool {
        matches!(self, OrchestratorError::ListFailed(_) | OrchestratorError::Http(_))
    }
}

/// A `key=value` worker label.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Label {
    pub key: String,
    pub value: String,
}

impl Label {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn for_step(step_id: Uuid) -> Self {
        Self::new(STEP_ID_LABEL, step_id.to_string())
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// Everything needed to start one worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchRequest {
    pub step_id: Uuid,
    pub name: String,
    /// `analysis`, `thumbnail`, `transcode` or `custom`
    pub worker_kind: String,
    /// Worker template reference, resolved by the orchestrator
    pub template: String,
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    /// Whether `env` replaces the template's own variables of the same name
    pub overwrite_env: bool,
}

/// Reference to a launched worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerHandle {
    pub uid: String,
    pub name: String,
}

impl From<&WorkerDescriptor> for WorkerHandle {
    fn from(desc: &WorkerDescriptor) -> Self {
        Self {
            uid: desc.job_uid.clone(),
            name: desc.name.clone(),
        }
    }
}

#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn launch_worker(&self, request: LaunchRequest) -> OrchestratorResult<WorkerHandle>;

    /// Every worker carrying `label`. An empty list means none exist.
    async fn find_workers_by_label(&self, label: &Label) -> OrchestratorResult<Vec<WorkerDescriptor>>;

    async fn fetch_logs(&self, worker: &WorkerHandle) -> OrchestratorResult<String>;

    async fn delete_worker(&self, worker: &WorkerHandle) -> OrchestratorResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_label() {
        let id = Uuid::parse_str("47e0bcd5-e028-413a-bcf8-64ee10f93db0").unwrap();
        assert_eq!(
            Label::for_step(id).to_string(),
            "mediaflipper.jobStepId=47e0bcd5-e028-413a-bcf8-64ee10f93db0"
        );
    }
}
