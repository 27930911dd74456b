//! Worker cleanup: keep a finished worker's log, then delete the worker.

use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use mflip_queue::ContainerLogStore;

use crate::error::{RunnerError, RunnerResult};
use crate::orchestrator::{Label, Orchestrator, WorkerHandle};

#[derive(Clone)]
pub struct WorkerCleanup {
    orchestrator: Arc<dyn Orchestrator>,
    logs: ContainerLogStore,
}

impl WorkerCleanup {
    pub fn new(orchestrator: Arc<dyn Orchestrator>, logs: ContainerLogStore) -> Self {
        Self { orchestrator, logs }
    }

    /// Find the worker that ran `step_id` and clean it up.
    pub async fn cleanup_step(&self, step_id: Uuid) -> RunnerResult<WorkerHandle> {
        let workers = self
            .orchestrator
            .find_workers_by_label(&Label::for_step(step_id))
            .await?;
        let worker = workers
            .first()
            .map(WorkerHandle::from)
            .ok_or_else(|| RunnerError::not_found(format!("no worker for step {}", step_id)))?;
        self.cleanup_worker(step_id, &worker).await?;
        Ok(worker)
    }

    /// Store the worker's log under the step, then delete the worker.
    ///
    /// The worker is left alone if its log could not be stored.
    pub async fn cleanup_worker(&self, step_id: Uuid, worker: &WorkerHandle) -> RunnerResult<()> {
        let log = self.orchestrator.fetch_logs(worker).await?;
        debug!(step_id = %step_id, bytes = log.len(), "Fetched worker log");
        self.logs.store_log(step_id, &log).await?;
        self.orchestrator.delete_worker(worker).await?;
        info!(step_id = %step_id, worker = %worker.name, "Cleaned up worker");
        Ok(())
    }
}
