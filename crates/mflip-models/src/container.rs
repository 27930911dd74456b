//! Job containers: one submitted job owning a linear sequence of steps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ModelError, ModelResult};
use crate::item_type::ItemType;
use crate::status::JobStatus;
use crate::step::JobStep;

/// Link from a container back to the bulk item it was created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkAssociation {
    pub item: Uuid,
    pub list: Uuid,
}

/// A submitted job.
///
/// `completed_steps` is a cursor into `steps`: the step at that index is the
/// current one. Once the cursor reaches the end the status is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobContainer {
    pub id: Uuid,
    pub steps: Vec<JobStep>,
    pub completed_steps: usize,
    pub status: JobStatus,
    pub template_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub incoming_media_file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub associated_bulk: Option<BulkAssociation>,
    #[serde(default)]
    pub item_type: ItemType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcoded_media_id: Option<Uuid>,
    #[serde(default)]
    pub output_path: String,
}

impl JobContainer {
    /// Create an empty, pending container for a template.
    pub fn new(template_id: Uuid, item_type: ItemType) -> Self {
        Self {
            id: Uuid::new_v4(),
            steps: Vec::new(),
            completed_steps: 0,
            status: JobStatus::Pending,
            template_id,
            error_message: None,
            incoming_media_file: String::new(),
            start_time: Some(Utc::now()),
            end_time: None,
            associated_bulk: None,
            item_type,
            thumbnail_id: None,
            transcoded_media_id: None,
            output_path: String::new(),
        }
    }

    pub fn with_output_path(mut self, path: impl Into<String>) -> Self {
        self.output_path = path.into();
        self
    }

    pub fn with_bulk_association(mut self, association: BulkAssociation) -> Self {
        self.associated_bulk = Some(association);
        self
    }

    /// First step of the pipeline.
    ///
    /// A container without steps has nothing to do: it is marked
    /// `Completed` on the spot and `None` is returned.
    pub fn initial_step(&mut self) -> Option<JobStep> {
        match self.steps.first() {
            Some(step) => Some(step.clone()),
            None => {
                debug!(job_id = %self.id, "Container has no steps, marking completed");
                self.finish(JobStatus::Completed);
                None
            }
        }
    }

    /// The step the cursor points at, if any remain.
    pub fn current_step(&self) -> Option<&JobStep> {
        self.steps.get(self.completed_steps)
    }

    /// Mark the current step completed and advance.
    ///
    /// Returns the next step, or `None` when the pipeline is finished, in
    /// which case the container is now `Completed`.
    pub fn complete_step_and_move_on(&mut self) -> Option<JobStep> {
        let Some(current) = self.steps.get(self.completed_steps) else {
            warn!(
                job_id = %self.id,
                completed_steps = self.completed_steps,
                "Tried to complete a step on a container with no steps remaining"
            );
            self.finish(JobStatus::Completed);
            return None;
        };

        self.steps[self.completed_steps] = current.with_new_status(JobStatus::Completed, None);
        self.completed_steps += 1;

        match self.steps.get(self.completed_steps) {
            Some(next) => Some(next.clone()),
            None => {
                self.finish(JobStatus::Completed);
                None
            }
        }
    }

    /// Fail the container and its current step.
    ///
    /// Past the end of the pipeline there is no current step; the call is
    /// logged and nothing changes.
    pub fn fail_current_step(&mut self, message: &str) {
        self.end_current_step(JobStatus::Failed, message);
    }

    /// Mark the container and its current step as lost.
    pub fn lose_current_step(&mut self, message: &str) {
        self.end_current_step(JobStatus::Lost, message);
    }

    fn end_current_step(&mut self, status: JobStatus, message: &str) {
        let Some(current) = self.steps.get(self.completed_steps) else {
            warn!(
                job_id = %self.id,
                completed_steps = self.completed_steps,
                total_steps = self.steps.len(),
                status = %status,
                "No current step to end: {}", message
            );
            return;
        };

        self.steps[self.completed_steps] = current.with_new_status(status, Some(message));
        self.error_message = Some(message.to_string());
        self.finish(status);
    }

    /// Mark the current step and the container as started.
    pub fn start_current_step(&mut self) -> ModelResult<JobStep> {
        let current = self.current_step().ok_or_else(|| {
            ModelError::StepNotFound(format!("container {} has no current step", self.id))
        })?;
        let started = current.with_new_status(JobStatus::Started, None);
        self.steps[self.completed_steps] = started.clone();
        self.status = JobStatus::Started;
        if self.start_time.is_none() {
            self.start_time = Some(Utc::now());
        }
        Ok(started)
    }

    /// Fail the whole container without touching any step.
    pub fn fail(&mut self, message: &str) {
        self.error_message = Some(message.to_string());
        self.finish(JobStatus::Failed);
    }

    /// Abort the container, leaving step states as they are.
    pub fn abort(&mut self) {
        self.finish(JobStatus::Aborted);
    }

    fn finish(&mut self, status: JobStatus) {
        self.status = status;
        self.end_time = Some(Utc::now());
    }

    pub fn find_step_by_id(&self, step_id: Uuid) -> Option<&JobStep> {
        self.steps.iter().find(|s| s.id() == step_id)
    }

    /// Replace the step with the same id as `step`.
    pub fn update_step_by_id(&mut self, step: JobStep) -> ModelResult<()> {
        let slot = self
            .steps
            .iter_mut()
            .find(|s| s.id() == step.id())
            .ok_or_else(|| {
                ModelError::StepNotFound(format!("step {} in container {}", step.id(), self.id))
            })?;
        *slot = step;
        Ok(())
    }

    /// Set the incoming media file on the container and every step.
    pub fn set_media_file(&mut self, path: impl Into<String>) {
        let path = path.into();
        self.steps = self
            .steps
            .iter()
            .map(|s| s.with_new_media_file(path.clone()))
            .collect();
        self.incoming_media_file = path;
    }

    pub fn is_finished(&self) -> bool {
        self.completed_steps >= self.steps.len() || self.status.is_terminal()
    }
}
