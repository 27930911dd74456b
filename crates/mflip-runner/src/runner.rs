//! The job runner.
//!
//! Two ticks drive every container through its pipeline:
//! - [`JobRunner::waiting_queue_tick`] pops REQUEST entries and dispatches
//!   their first step while the RUNNING queue is under the concurrency cap.
//! - [`JobRunner::clear_completed_tick`] holds the RUNNING lock, looks up the
//!   worker of every running step and moves containers on accordingly.
//!
//! Nothing is cached between ticks; every decision re-reads the store.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn, Instrument};
use uuid::Uuid;

use mflip_models::{
    JobContainer, JobQueueEntry, JobStatus, JobStep, WorkerDescriptor, WorkerStatus,
};
use mflip_queue::{ContainerLogStore, ContainerStore, JobQueue, QueueError, QueueName};
use mflip_store::{KeySpace, Store};

use crate::cleanup::WorkerCleanup;
use crate::config::RunnerConfig;
use crate::error::{RunnerError, RunnerResult};
use crate::launcher::launch_request;
use crate::logging::JobLogger;
use crate::metrics;
use crate::orchestrator::{Label, Orchestrator, WorkerHandle};

/// What one reconciliation step did with a RUNNING entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// Worker is running; the step was marked started
    Started,
    /// Worker is running and the step already knew it
    Unchanged,
    /// Step completed and the next step was dispatched
    Advanced,
    /// Step completed and it was the last one
    Completed,
    Failed,
    Lost,
    /// Worker state is ambiguous; retried next tick
    Undetermined,
    /// Entry was stale or already handled elsewhere
    Skipped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub checked: usize,
    pub started: usize,
    pub advanced: usize,
    pub completed: usize,
    pub failed: usize,
    pub lost: usize,
    pub skipped: usize,
}

impl TickReport {
    fn record(&mut self, outcome: Reconciliation) {
        self.checked += 1;
        match outcome {
            Reconciliation::Started => self.started += 1,
            Reconciliation::Advanced => self.advanced += 1,
            Reconciliation::Completed => self.completed += 1,
            Reconciliation::Failed => self.failed += 1,
            Reconciliation::Lost => self.lost += 1,
            Reconciliation::Skipped => self.skipped += 1,
            Reconciliation::Unchanged | Reconciliation::Undetermined => {}
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub waiting: u64,
    pub running: u64,
}

/// The worker most recently started, if any.
fn latest_worker(workers: Vec<WorkerDescriptor>) -> Option<WorkerDescriptor> {
    workers.into_iter().max_by_key(|w| w.start_time)
}

pub struct JobRunner {
    queue: JobQueue,
    containers: ContainerStore,
    orchestrator: Arc<dyn Orchestrator>,
    cleanup: WorkerCleanup,
    config: RunnerConfig,
}

impl JobRunner {
    pub fn new(
        store: Arc<dyn Store>,
        keys: KeySpace,
        orchestrator: Arc<dyn Orchestrator>,
        config: RunnerConfig,
    ) -> Self {
        let logs = ContainerLogStore::new(store.clone(), keys.clone());
        Self {
            queue: JobQueue::new(store.clone(), keys.clone()),
            containers: ContainerStore::new(store, keys),
            cleanup: WorkerCleanup::new(orchestrator.clone(), logs),
            orchestrator,
            config,
        }
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn containers(&self) -> &ContainerStore {
        &self.containers
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Persist a new container and put it on the REQUEST queue.
    pub async fn add_job(&self, container: &JobContainer) -> RunnerResult<()> {
        let first_step = container.steps.first().map(|s| s.id()).unwrap_or_else(Uuid::nil);
        self.containers.store(container).await?;
        self.queue
            .add_to_queue(
                QueueName::Request,
                &JobQueueEntry::new(container.id, first_step, JobStatus::Pending),
            )
            .await?;
        JobLogger::new(container.id, "add_job").log_progress("Added to the request queue");
        Ok(())
    }

    /// Take every queue entry of `container` off both queues and abort it.
    ///
    /// Returns the aborted container as persisted.
    pub async fn remove_job(&self, container: &JobContainer) -> RunnerResult<JobContainer> {
        let logger = JobLogger::new(container.id, "remove_job");
        for queue in QueueName::ALL {
            let entries = self.queue.snapshot_queue(queue).await?;
            for entry in entries.iter().filter(|e| e.job_id == container.id) {
                match self.queue.remove_from_queue(queue, entry).await {
                    Ok(()) => logger.log_progress(&format!("Removed {} from {}", entry, queue)),
                    // taken by a tick since the snapshot
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }

        let mut aborted = container.clone();
        aborted.abort();
        self.containers.store(&aborted).await?;
        logger.log_completion("Job aborted");
        Ok(aborted)
    }

    pub async fn queue_stats(&self) -> RunnerResult<QueueStats> {
        let lengths = self.queue.all_queue_lengths().await?;
        for (queue, length) in &lengths {
            metrics::set_queue_length(*queue, *length);
        }
        Ok(QueueStats {
            waiting: lengths.get(&QueueName::Request).copied().unwrap_or(0),
            running: lengths.get(&QueueName::Running).copied().unwrap_or(0),
        })
    }

    pub async fn purge_queue(&self, queue: QueueName) -> RunnerResult<()> {
        self.queue.purge_queue(queue).await?;
        Ok(())
    }

    /// Capture the log of a step's worker and delete the worker.
    pub async fn cleanup_step(&self, job_id: Uuid, step_id: Uuid) -> RunnerResult<WorkerHandle> {
        let container = self.containers.load(job_id).await?;
        if container.find_step_by_id(step_id).is_none() {
            return Err(RunnerError::not_found(format!(
                "step {} in container {}",
                step_id, job_id
            )));
        }
        self.cleanup.cleanup_step(step_id).await
    }

    /// Launch the container's current step and put it on the RUNNING queue.
    ///
    /// On success the step and container are `Started` and persisted.
    pub async fn dispatch(&self, container: &mut JobContainer) -> RunnerResult<JobStep> {
        let step = container.current_step().cloned().ok_or_else(|| {
            RunnerError::not_found(format!("container {} has no step to dispatch", container.id))
        })?;
        let span = JobLogger::for_step(&step, "dispatch").create_span();
        let result = self.dispatch_step(container, &step).instrument(span).await;
        if result.is_err() {
            metrics::record_dispatch_failure(step.kind());
        }
        result
    }

    async fn dispatch_step(
        &self,
        container: &mut JobContainer,
        step: &JobStep,
    ) -> RunnerResult<JobStep> {
        let logger = JobLogger::for_step(step, "dispatch");
        let request = launch_request(step, container, self.config.worker_max_retries)?;
        let handle = self.orchestrator.launch_worker(request).await?;

        let worker = WorkerDescriptor::new(&handle.uid, &handle.name, WorkerStatus::Active)
            .with_start_time(Utc::now());
        let started = container.start_current_step()?.with_worker(worker);
        container.update_step_by_id(started.clone())?;
        self.containers.store(container).await?;
        self.queue
            .add_to_queue(QueueName::Running, &JobQueueEntry::for_step(&started))
            .await?;

        metrics::record_step_dispatched(step.kind());
        logger.log_start(&format!("{} worker {} launched", step.kind(), handle.name));
        Ok(started)
    }

    /// Start waiting containers until the RUNNING queue reaches the cap.
    ///
    /// Returns how many containers were dispatched.
    pub async fn waiting_queue_tick(&self) -> RunnerResult<usize> {
        let started = Instant::now();
        let mut dispatched = 0;
        loop {
            let running = self.queue.queue_length(QueueName::Running).await?;
            if running >= self.config.max_concurrent_jobs {
                debug!(running, cap = self.config.max_concurrent_jobs, "Running queue is full");
                break;
            }
            let entry = match self.queue.pop_next(QueueName::Request).await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e @ QueueError::DataIntegrity(_)) => {
                    warn!("Dropping request entry: {}", e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if self.start_container(entry).await? {
                dispatched += 1;
            }
        }
        metrics::record_tick("waiting", started.elapsed().as_secs_f64());
        Ok(dispatched)
    }

    /// Dispatch the first step of a popped container.
    ///
    /// Only store failures are returned; anything else is logged and the
    /// container is left as it is for inspection.
    async fn start_container(&self, entry: JobQueueEntry) -> RunnerResult<bool> {
        let logger = JobLogger::new(entry.job_id, "start_container");
        let mut container = match self.containers.load(entry.job_id).await {
            Ok(container) => container,
            Err(e) if e.is_store_failure() => return Err(e.into()),
            Err(e) => {
                logger.log_warning(&format!("Dropping request entry: {}", e));
                return Ok(false);
            }
        };

        if container.status.is_terminal() {
            logger.log_warning(&format!("Container is already {}, not starting", container.status));
            return Ok(false);
        }

        if container.initial_step().is_none() {
            self.containers.store(&container).await?;
            logger.log_completion("Container has no steps");
            return Ok(false);
        }

        match self.dispatch(&mut container).await {
            Ok(_) => Ok(true),
            Err(RunnerError::Queue(e)) if e.is_store_failure() => Err(e.into()),
            Err(e) => {
                logger.log_error(&format!("Could not dispatch first step: {}", e));
                Ok(false)
            }
        }
    }

    /// Reconcile every RUNNING entry against the orchestrator.
    ///
    /// Holds the RUNNING queue lock for the duration. A failed worker lookup
    /// or store failure abandons the rest of the tick; the next tick starts
    /// again from a fresh snapshot.
    pub async fn clear_completed_tick(&self) -> RunnerResult<TickReport> {
        let started = Instant::now();
        let report = self
            .queue
            .with_queue_lock(QueueName::Running, self.config.lock_wait_timeout, || {
                self.reconcile_running()
            })
            .await??;
        metrics::record_tick("clear_completed", started.elapsed().as_secs_f64());
        Ok(report)
    }

    async fn reconcile_running(&self) -> RunnerResult<TickReport> {
        let snapshot = self.queue.snapshot_queue(QueueName::Running).await?;
        let mut report = TickReport::default();

        for entry in snapshot {
            let workers = self
                .orchestrator
                .find_workers_by_label(&Label::for_step(entry.step_id))
                .await?;
            let outcome = match self.reconcile_entry(entry, workers).await {
                Ok(outcome) => outcome,
                Err(e) if e.is_tick_fatal() => return Err(e),
                Err(e) => {
                    warn!(
                        job_id = %entry.job_id,
                        step_id = %entry.step_id,
                        "Could not reconcile running entry: {}", e
                    );
                    Reconciliation::Skipped
                }
            };
            report.record(outcome);
        }
        Ok(report)
    }

    async fn reconcile_entry(
        &self,
        entry: JobQueueEntry,
        workers: Vec<WorkerDescriptor>,
    ) -> RunnerResult<Reconciliation> {
        let Some(worker) = latest_worker(workers) else {
            return self.step_lost(entry).await;
        };
        match worker.status {
            WorkerStatus::Active => self.step_active(entry, worker).await,
            WorkerStatus::Completed => self.step_completed(entry, worker).await,
            WorkerStatus::Failed => self.step_failed(entry, worker).await,
            WorkerStatus::Unknown => {
                debug!(
                    job_id = %entry.job_id,
                    step_id = %entry.step_id,
                    worker = %worker.name,
                    "Worker state is ambiguous, leaving for the next tick"
                );
                Ok(Reconciliation::Undetermined)
            }
        }
    }

    async fn step_active(
        &self,
        entry: JobQueueEntry,
        worker: WorkerDescriptor,
    ) -> RunnerResult<Reconciliation> {
        let mut container = self.containers.load(entry.job_id).await?;
        let step = container
            .find_step_by_id(entry.step_id)
            .cloned()
            .ok_or_else(|| {
                RunnerError::not_found(format!("step {} in container {}", entry.step_id, entry.job_id))
            })?;

        if step.status() == JobStatus::Started {
            return Ok(Reconciliation::Unchanged);
        }
        if step.status().is_terminal() {
            JobLogger::for_step(&step, "reconcile").log_warning(&format!(
                "Worker is active but step is already {}",
                step.status()
            ));
            return Ok(Reconciliation::Unchanged);
        }

        container.update_step_by_id(step.with_new_status(JobStatus::Started, None).with_worker(worker))?;
        container.status = JobStatus::Started;
        self.containers.store(&container).await?;
        JobLogger::for_step(&step, "reconcile").log_progress("Worker is running");
        Ok(Reconciliation::Started)
    }

    /// Remove the entry from RUNNING and load its container, checking the
    /// entry's step is the container's current one.
    ///
    /// `None` means another party already handled the entry or the container
    /// no longer matches it.
    async fn take_entry(&self, entry: &JobQueueEntry) -> RunnerResult<Option<JobContainer>> {
        match self.queue.remove_from_queue(QueueName::Running, entry).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(job_id = %entry.job_id, step_id = %entry.step_id, "Entry already taken");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }

        let container = self.containers.load(entry.job_id).await?;
        let current = container.current_step().map(|s| s.id());
        if current != Some(entry.step_id) {
            warn!(
                job_id = %entry.job_id,
                step_id = %entry.step_id,
                current_step = ?current,
                "Running entry does not match the container's current step, dropping it"
            );
            return Ok(None);
        }
        Ok(Some(container))
    }

    /// Copy the worker onto the container's current step.
    fn record_worker(container: &mut JobContainer, worker: WorkerDescriptor) -> RunnerResult<()> {
        if let Some(step) = container.current_step() {
            let updated = step.with_worker(worker);
            container.update_step_by_id(updated)?;
        }
        Ok(())
    }

    async fn step_completed(
        &self,
        entry: JobQueueEntry,
        worker: WorkerDescriptor,
    ) -> RunnerResult<Reconciliation> {
        let Some(mut container) = self.take_entry(&entry).await? else {
            return Ok(Reconciliation::Skipped);
        };
        let logger = JobLogger::new(container.id, "step_completed").with_step(entry.step_id);

        Self::record_worker(&mut container, worker.clone())?;
        let next = container.complete_step_and_move_on();
        self.containers.store(&container).await?;
        metrics::record_step_finished("completed");
        self.cleanup_finished(entry.step_id, &worker).await;

        if next.is_none() {
            logger.log_completion("Last step finished");
            return Ok(Reconciliation::Completed);
        }

        match self.dispatch(&mut container).await {
            Ok(step) => {
                logger.log_progress(&format!("Moved on to {} step {}", step.kind(), step.id()));
                Ok(Reconciliation::Advanced)
            }
            // the worker may already be running; leave the container for the next tick
            Err(e) if e.is_tick_fatal() => {
                logger.log_error(&format!("Could not record next step: {}", e));
                Err(e)
            }
            Err(e) => {
                let message = format!("Could not dispatch next step: {}", e);
                logger.log_error(&message);
                container.fail(&message);
                self.containers.store(&container).await?;
                Ok(Reconciliation::Failed)
            }
        }
    }

    async fn step_failed(
        &self,
        entry: JobQueueEntry,
        worker: WorkerDescriptor,
    ) -> RunnerResult<Reconciliation> {
        let Some(mut container) = self.take_entry(&entry).await? else {
            return Ok(Reconciliation::Skipped);
        };
        let message = format!("Worker {} failed", worker.name);

        Self::record_worker(&mut container, worker.clone())?;
        container.fail_current_step(&message);
        self.containers.store(&container).await?;
        metrics::record_step_finished("failed");
        JobLogger::new(container.id, "step_failed")
            .with_step(entry.step_id)
            .log_error(&message);
        self.cleanup_finished(entry.step_id, &worker).await;
        Ok(Reconciliation::Failed)
    }

    async fn step_lost(&self, entry: JobQueueEntry) -> RunnerResult<Reconciliation> {
        let Some(mut container) = self.take_entry(&entry).await? else {
            return Ok(Reconciliation::Skipped);
        };
        container.lose_current_step("No worker found for step");
        self.containers.store(&container).await?;
        metrics::record_step_finished("lost");
        JobLogger::new(container.id, "step_lost")
            .with_step(entry.step_id)
            .log_warning("No worker found, step marked lost");
        Ok(Reconciliation::Lost)
    }

    async fn cleanup_finished(&self, step_id: Uuid, worker: &WorkerDescriptor) {
        if !self.config.cleanup_finished_workers {
            return;
        }
        if let Err(e) = self
            .cleanup
            .cleanup_worker(step_id, &WorkerHandle::from(worker))
            .await
        {
            warn!(step_id = %step_id, worker = %worker.name, "Worker cleanup failed: {}", e);
        }
    }
}
