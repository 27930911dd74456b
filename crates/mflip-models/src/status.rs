//! Job and step status.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ModelError;

/// Lifecycle state shared by containers and steps.
///
/// Persisted as its integer code so queue entries stay compact
/// (`Pending = 0` .. `NotQueued = 6`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(into = "u8", try_from = "u8")]
pub enum JobStatus {
    /// Waiting to be dispatched
    #[default]
    Pending,
    /// A worker has been launched for it
    Started,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// The worker disappeared from the orchestrator
    Lost,
    /// Removed by an operator
    Aborted,
    /// Created but never put onto a queue
    NotQueued,
}

impl JobStatus {
    pub const ALL: [JobStatus; 7] = [
        JobStatus::Pending,
        JobStatus::Started,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Lost,
        JobStatus::Aborted,
        JobStatus::NotQueued,
    ];

    pub fn code(&self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Started => 1,
            JobStatus::Completed => 2,
            JobStatus::Failed => 3,
            JobStatus::Lost => 4,
            JobStatus::Aborted => 5,
            JobStatus::NotQueued => 6,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Started => "started",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Lost => "lost",
            JobStatus::Aborted => "aborted",
            JobStatus::NotQueued => "not_queued",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Lost | JobStatus::Aborted
        )
    }
}

impl From<JobStatus> for u8 {
    fn from(status: JobStatus) -> Self {
        status.code()
    }
}

impl TryFrom<u8> for JobStatus {
    type Error = ModelError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        JobStatus::ALL
            .into_iter()
            .find(|s| s.code() == code)
            .ok_or(ModelError::InvalidStatus(code))
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip() {
        for status in JobStatus::ALL {
            assert_eq!(JobStatus::try_from(status.code()).unwrap(), status);
        }
        assert!(matches!(
            JobStatus::try_from(42),
            Err(ModelError::InvalidStatus(42))
        ));
    }

    #[test]
    fn test_serializes_as_integer() {
        assert_eq!(serde_json::to_string(&JobStatus::Completed).unwrap(), "2");
        let parsed: JobStatus = serde_json::from_str("4").unwrap();
        assert_eq!(parsed, JobStatus::Lost);
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Lost.is_terminal());
        assert!(!JobStatus::Started.is_terminal());
        assert!(!JobStatus::NotQueued.is_terminal());
    }
}
