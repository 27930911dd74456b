//! Descriptions of external workers as reported by the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse state of an external worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Active,
    Completed,
    Failed,
    /// Anything the orchestrator reports that does not map cleanly
    Unknown,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Active => "active",
            WorkerStatus::Completed => "completed",
            WorkerStatus::Failed => "failed",
            WorkerStatus::Unknown => "unknown",
        }
    }
}

/// Snapshot of one worker. Not stored on its own; copied onto the step it runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerDescriptor {
    /// Orchestrator-assigned unique id, used for logs and deletion
    pub job_uid: String,
    pub status: WorkerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
    /// Human-readable name shown in the orchestrator console
    #[serde(rename = "consoleName")]
    pub name: String,
}

impl WorkerDescriptor {
    pub fn new(job_uid: impl Into<String>, name: impl Into<String>, status: WorkerStatus) -> Self {
        Self {
            job_uid: job_uid.into(),
            status,
            start_time: None,
            completion_time: None,
            name: name.into(),
        }
    }

    pub fn with_start_time(mut self, at: DateTime<Utc>) -> Self {
        self.start_time = Some(at);
        self
    }

    pub fn with_completion_time(mut self, at: DateTime<Utc>) -> Self {
        self.completion_time = Some(at);
        self
    }
}
