//! Structured logging for container operations.
//!
//! Every runner operation on a container logs through a [`JobLogger`] so
//! that `job_id`, `step_id` and `operation` fields are always present.

use tracing::{error, info, warn, Span};
use uuid::Uuid;

use mflip_models::JobStep;

#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: Uuid,
    step_id: Option<Uuid>,
    operation: &'static str,
}

impl JobLogger {
    /// Logger for an operation on a whole container.
    pub fn new(job_id: Uuid, operation: &'static str) -> Self {
        Self {
            job_id,
            step_id: None,
            operation,
        }
    }

    /// Logger for an operation on one step.
    pub fn for_step(step: &JobStep, operation: &'static str) -> Self {
        Self {
            job_id: step.container_id(),
            step_id: Some(step.id()),
            operation,
        }
    }

    pub fn with_step(mut self, step_id: Uuid) -> Self {
        self.step_id = Some(step_id);
        self
    }

    fn step_field(&self) -> String {
        self.step_id.map(|s| s.to_string()).unwrap_or_default()
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            step_id = %self.step_field(),
            operation = self.operation,
            "Started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            step_id = %self.step_field(),
            operation = self.operation,
            "{}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            step_id = %self.step_field(),
            operation = self.operation,
            "{}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            step_id = %self.step_field(),
            operation = self.operation,
            "{}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            step_id = %self.step_field(),
            operation = self.operation,
            "Completed: {}", message
        );
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn step_id(&self) -> Option<Uuid> {
        self.step_id
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// Span for instrumenting a whole operation.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            step_id = %self.step_field(),
            operation = self.operation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_logger_creation() {
        let job_id = Uuid::new_v4();
        let logger = JobLogger::new(job_id, "remove_job");

        assert_eq!(logger.job_id(), job_id);
        assert_eq!(logger.step_id(), None);
        assert_eq!(logger.operation(), "remove_job");
    }

    #[test]
    fn test_job_logger_for_step() {
        let job_id = Uuid::new_v4();
        let step = JobStep::analysis(job_id, "analysis.yaml");
        let logger = JobLogger::for_step(&step, "dispatch");

        assert_eq!(logger.job_id(), job_id);
        assert_eq!(logger.step_id(), Some(step.id()));
    }
}
