//! Compact queue entries.

use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{ModelError, ModelResult};
use crate::status::JobStatus;
use crate::step::JobStep;

/// One in-flight unit of work: `jobId|stepId|status`.
///
/// Only ids and a status code are kept so a queue scan never has to
/// decode whole containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobQueueEntry {
    pub job_id: Uuid,
    pub step_id: Uuid,
    pub status: JobStatus,
}

impl JobQueueEntry {
    pub fn new(job_id: Uuid, step_id: Uuid, status: JobStatus) -> Self {
        Self {
            job_id,
            step_id,
            status,
        }
    }

    pub fn for_step(step: &JobStep) -> Self {
        Self::new(step.container_id(), step.id(), step.status())
    }

    pub fn marshal(&self) -> String {
        self.to_string()
    }

    pub fn unmarshal(raw: &str) -> ModelResult<Self> {
        raw.parse()
    }
}

impl fmt::Display for JobQueueEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.job_id, self.step_id, self.status.code())
    }
}

impl FromStr for JobQueueEntry {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('|').collect();
        let [job, step, status] = parts.as_slice() else {
            return Err(ModelError::queue_entry_parse(format!(
                "expected 3 fields, got {} in '{}'",
                parts.len(),
                s
            )));
        };

        let job_id = Uuid::parse_str(job)
            .map_err(|e| ModelError::queue_entry_parse(format!("job id '{}': {}", job, e)))?;
        let step_id = Uuid::parse_str(step)
            .map_err(|e| ModelError::queue_entry_parse(format!("step id '{}': {}", step, e)))?;
        let code: u8 = status
            .parse()
            .map_err(|e| ModelError::queue_entry_parse(format!("status '{}': {}", status, e)))?;
        let status = JobStatus::try_from(code)
            .map_err(|e| ModelError::queue_entry_parse(e.to_string()))?;

        Ok(Self::new(job_id, step_id, status))
    }
}
