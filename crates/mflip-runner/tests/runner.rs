//! JobRunner dispatch and reconciliation against an in-memory store.

mod common;

use std::sync::Arc;

use tokio_test::{assert_err, assert_ok};
use uuid::Uuid;

use mflip_models::{JobContainer, JobQueueEntry, JobStatus, WorkerStatus};
use mflip_queue::{ContainerLogStore, QueueName};
use mflip_runner::{RunnerConfig, RunnerError};
use mflip_store::KeySpace;

use common::{container, default_harness, harness, Harness, WORKER_LOG};

/// Add a container and run the waiting tick once so its first step is running.
async fn dispatched(h: &Harness, steps: usize) -> JobContainer {
    let job = container(steps);
    h.runner.add_job(&job).await.unwrap();
    assert_eq!(h.runner.waiting_queue_tick().await.unwrap(), 1);
    h.runner.containers().load(job.id).await.unwrap()
}

async fn running(h: &Harness) -> Vec<JobQueueEntry> {
    h.runner.queue().snapshot_queue(QueueName::Running).await.unwrap()
}

#[tokio::test]
async fn test_add_job_queues_first_step() {
    let h = default_harness();
    let job = container(2);
    assert_ok!(h.runner.add_job(&job).await);

    let waiting = h.runner.queue().snapshot_queue(QueueName::Request).await.unwrap();
    assert_eq!(waiting, vec![JobQueueEntry::new(job.id, job.steps[0].id(), JobStatus::Pending)]);
    assert_eq!(h.runner.containers().load(job.id).await.unwrap(), job);
}

#[tokio::test]
async fn test_dispatch_starts_step_and_records_worker() {
    let h = default_harness();
    let job = dispatched(&h, 1).await;

    assert_eq!(job.status, JobStatus::Started);
    let step = &job.steps[0];
    assert_eq!(step.status(), JobStatus::Started);
    let worker = step.worker().unwrap();
    assert_eq!(worker.status, WorkerStatus::Active);
    assert_eq!(worker.name, "mediaflipper-analysis-interview.mp4");

    assert_eq!(running(&h).await, vec![JobQueueEntry::for_step(step)]);
    let launched = h.orchestrator.launched();
    assert_eq!(launched.len(), 1);
    assert_eq!(launched[0].env["WRAPPER_MODE"], "analyse");
    assert_eq!(launched[0].env["FILE_NAME"], "/srv/media/incoming/interview.mp4");
}

#[tokio::test]
async fn test_missing_worker_marks_step_lost() {
    let h = default_harness();
    let job = dispatched(&h, 1).await;
    h.orchestrator.forget(job.steps[0].id());

    let report = h.runner.clear_completed_tick().await.unwrap();
    assert_eq!(report.lost, 1);
    assert!(running(&h).await.is_empty());

    let job = h.runner.containers().load(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Lost);
    assert_eq!(job.steps[0].status(), JobStatus::Lost);
    assert!(job.end_time.is_some());
}

#[tokio::test]
async fn test_completed_step_dispatches_next() {
    let h = default_harness();
    let job = dispatched(&h, 2).await;
    h.orchestrator.set_worker_status(job.steps[0].id(), WorkerStatus::Completed);

    let report = h.runner.clear_completed_tick().await.unwrap();
    assert_eq!(report.advanced, 1);

    let job = h.runner.containers().load(job.id).await.unwrap();
    assert_eq!(job.completed_steps, 1);
    assert_eq!(job.status, JobStatus::Started);
    assert_eq!(job.steps[0].status(), JobStatus::Completed);
    assert_eq!(job.steps[0].worker().unwrap().status, WorkerStatus::Completed);
    assert_eq!(job.steps[1].status(), JobStatus::Started);

    assert_eq!(running(&h).await, vec![JobQueueEntry::for_step(&job.steps[1])]);
    assert_eq!(h.orchestrator.launched().len(), 2);
}

#[tokio::test]
async fn test_completed_last_step_completes_container() {
    let h = default_harness();
    let job = dispatched(&h, 1).await;
    h.orchestrator.set_worker_status(job.steps[0].id(), WorkerStatus::Completed);

    let report = h.runner.clear_completed_tick().await.unwrap();
    assert_eq!(report.completed, 1);
    assert!(running(&h).await.is_empty());

    let job = h.runner.containers().load(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.completed_steps, 1);
    assert!(job.end_time.is_some());
    assert!(h.orchestrator.deleted().is_empty());
}

#[tokio::test]
async fn test_failed_worker_fails_container() {
    let h = default_harness();
    let job = dispatched(&h, 2).await;
    h.orchestrator.set_worker_status(job.steps[0].id(), WorkerStatus::Failed);

    let report = h.runner.clear_completed_tick().await.unwrap();
    assert_eq!(report.failed, 1);
    assert!(running(&h).await.is_empty());

    let job = h.runner.containers().load(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.steps[0].status(), JobStatus::Failed);
    assert_eq!(job.steps[1].status(), JobStatus::Pending);
    assert!(job.error_message.unwrap().contains("mediaflipper-analysis-interview.mp4"));
    assert_eq!(h.orchestrator.launched().len(), 1);
}

#[tokio::test]
async fn test_active_worker_marks_step_started() {
    let h = default_harness();
    let job = container(1);
    let step = job.steps[0].clone();
    h.runner.containers().store(&job).await.unwrap();
    h.runner
        .queue()
        .add_to_queue(QueueName::Running, &JobQueueEntry::for_step(&step))
        .await
        .unwrap();
    h.orchestrator.set_worker_status(step.id(), WorkerStatus::Active);

    let report = h.runner.clear_completed_tick().await.unwrap();
    assert_eq!(report.started, 1);

    let stored = h.runner.containers().load(job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Started);
    assert_eq!(stored.steps[0].status(), JobStatus::Started);
    assert_eq!(stored.steps[0].worker().unwrap().name, "manual-worker");

    // already started: nothing more to do and the entry stays
    let report = h.runner.clear_completed_tick().await.unwrap();
    assert_eq!(report.checked, 1);
    assert_eq!(report.started, 0);
    assert_eq!(running(&h).await.len(), 1);
}

#[tokio::test]
async fn test_unknown_worker_state_is_left_alone() {
    let h = default_harness();
    let job = dispatched(&h, 1).await;
    h.orchestrator.set_worker_status(job.steps[0].id(), WorkerStatus::Unknown);

    let report = h.runner.clear_completed_tick().await.unwrap();
    assert_eq!(report.checked, 1);
    assert_eq!(report.lost + report.failed + report.completed, 0);
    assert_eq!(running(&h).await.len(), 1);
    assert_eq!(
        h.runner.containers().load(job.id).await.unwrap().status,
        JobStatus::Started
    );
}

#[tokio::test]
async fn test_list_failure_abandons_tick() {
    let h = default_harness();
    let job = dispatched(&h, 1).await;
    h.orchestrator.fail_lists(true);

    let err = assert_err!(h.runner.clear_completed_tick().await);
    assert!(matches!(err, RunnerError::Orchestrator(_)));
    assert_eq!(err.status_code(), 502);

    assert_eq!(running(&h).await.len(), 1);
    assert!(!h.runner.queue().check_queue_lock(QueueName::Running).await.unwrap());

    // the next tick starts over once the gateway is back
    h.orchestrator.fail_lists(false);
    h.orchestrator.set_worker_status(job.steps[0].id(), WorkerStatus::Completed);
    let report = h.runner.clear_completed_tick().await.unwrap();
    assert_eq!(report.completed, 1);
}

#[tokio::test]
async fn test_waiting_tick_respects_cap() {
    let h = harness(RunnerConfig {
        max_concurrent_jobs: 2,
        ..RunnerConfig::default()
    });
    for _ in 0..3 {
        h.runner.add_job(&container(1)).await.unwrap();
    }

    assert_eq!(h.runner.waiting_queue_tick().await.unwrap(), 2);
    let stats = h.runner.queue_stats().await.unwrap();
    assert_eq!(stats.waiting, 1);
    assert_eq!(stats.running, 2);

    // full: nothing moves until a slot frees up
    assert_eq!(h.runner.waiting_queue_tick().await.unwrap(), 0);
    assert_eq!(h.runner.queue_stats().await.unwrap().waiting, 1);
}

#[tokio::test]
async fn test_initial_dispatch_failure_leaves_container() {
    let h = default_harness();
    h.orchestrator.fail_launches(true);
    let job = container(1);
    h.runner.add_job(&job).await.unwrap();

    assert_eq!(h.runner.waiting_queue_tick().await.unwrap(), 0);

    let stats = h.runner.queue_stats().await.unwrap();
    assert_eq!((stats.waiting, stats.running), (0, 0));
    let stored = h.runner.containers().load(job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Pending);
    assert_eq!(stored.steps[0].status(), JobStatus::Pending);
}

#[tokio::test]
async fn test_step_without_media_is_not_dispatched() {
    let h = default_harness();
    let mut job = container(1);
    job.set_media_file("");
    h.runner.add_job(&job).await.unwrap();

    assert_eq!(h.runner.waiting_queue_tick().await.unwrap(), 0);
    assert!(h.orchestrator.launched().is_empty());
}

#[tokio::test]
async fn test_empty_container_completes_without_dispatch() {
    let h = default_harness();
    let job = container(0);
    h.runner.add_job(&job).await.unwrap();

    assert_eq!(h.runner.waiting_queue_tick().await.unwrap(), 0);
    let stored = h.runner.containers().load(job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert!(stored.end_time.is_some());
}

#[tokio::test]
async fn test_next_step_dispatch_failure_fails_container() {
    let h = default_harness();
    let job = dispatched(&h, 2).await;
    h.orchestrator.fail_launches(true);
    h.orchestrator.set_worker_status(job.steps[0].id(), WorkerStatus::Completed);

    let report = h.runner.clear_completed_tick().await.unwrap();
    assert_eq!(report.failed, 1);
    assert!(running(&h).await.is_empty());

    let job = h.runner.containers().load(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.completed_steps, 1);
    assert!(job.error_message.unwrap().contains("quota exceeded"));
}

#[tokio::test]
async fn test_store_failure_after_next_launch_keeps_container() {
    let h = default_harness();
    let job = dispatched(&h, 2).await;
    h.faults
        .refuse_push_to(Some(KeySpace::default().queue(QueueName::Running.as_str())));
    h.orchestrator.set_worker_status(job.steps[0].id(), WorkerStatus::Completed);

    let err = assert_err!(h.runner.clear_completed_tick().await);
    assert!(err.is_tick_fatal());
    assert_eq!(err.status_code(), 500);
    assert!(!h.runner.queue().check_queue_lock(QueueName::Running).await.unwrap());

    // the second worker was launched, so the container must not be failed
    assert_eq!(h.orchestrator.launched().len(), 2);
    let job = h.runner.containers().load(job.id).await.unwrap();
    assert_ne!(job.status, JobStatus::Failed);
    assert!(job.error_message.is_none());
    assert_eq!(job.completed_steps, 1);
}

#[tokio::test]
async fn test_remove_job_clears_queues_and_aborts() {
    let h = default_harness();
    let running_job = dispatched(&h, 1).await;
    let waiting_job = container(1);
    h.runner.add_job(&waiting_job).await.unwrap();

    let aborted = h.runner.remove_job(&running_job).await.unwrap();
    assert_eq!(aborted.status, JobStatus::Aborted);
    assert!(running(&h).await.is_empty());

    let aborted = h.runner.remove_job(&waiting_job).await.unwrap();
    assert_eq!(aborted.status, JobStatus::Aborted);
    assert_eq!(h.runner.queue_stats().await.unwrap().waiting, 0);
    assert_eq!(
        h.runner.containers().load(waiting_job.id).await.unwrap().status,
        JobStatus::Aborted
    );
}

#[tokio::test]
async fn test_aborted_container_is_not_started() {
    let h = default_harness();
    let job = container(1);
    h.runner.add_job(&job).await.unwrap();
    let mut aborted = job.clone();
    aborted.abort();
    h.runner.containers().store(&aborted).await.unwrap();

    assert_eq!(h.runner.waiting_queue_tick().await.unwrap(), 0);
    assert!(h.orchestrator.launched().is_empty());
}

#[tokio::test]
async fn test_cleanup_step_stores_log_and_deletes_worker() {
    let h = default_harness();
    let job = dispatched(&h, 1).await;
    let step_id = job.steps[0].id();

    let handle = h.runner.cleanup_step(job.id, step_id).await.unwrap();
    assert_eq!(h.orchestrator.deleted(), vec![handle]);

    let logs = ContainerLogStore::new(h.store.clone(), KeySpace::default());
    assert_eq!(logs.get_log(step_id).await.unwrap().as_deref(), Some(WORKER_LOG));

    let err = h.runner.cleanup_step(job.id, Uuid::new_v4()).await.unwrap_err();
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn test_finished_workers_cleaned_up_when_enabled() {
    let h = harness(RunnerConfig {
        cleanup_finished_workers: true,
        ..RunnerConfig::default()
    });
    let job = dispatched(&h, 1).await;
    h.orchestrator.set_worker_status(job.steps[0].id(), WorkerStatus::Completed);

    h.runner.clear_completed_tick().await.unwrap();
    let deleted = h.orchestrator.deleted();
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0].name, "mediaflipper-analysis-interview.mp4");
}

#[tokio::test]
async fn test_purge_queue() {
    let h = default_harness();
    for _ in 0..2 {
        h.runner.add_job(&container(1)).await.unwrap();
    }
    h.runner.purge_queue(QueueName::Request).await.unwrap();
    assert_eq!(h.runner.queue_stats().await.unwrap().waiting, 0);
}

#[tokio::test]
async fn test_runner_shared_across_tasks() {
    let h = default_harness();
    let runner = Arc::clone(&h.runner);
    let job = container(1);
    let id = job.id;
    tokio::spawn(async move { runner.add_job(&job).await })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(h.runner.waiting_queue_tick().await.unwrap(), 1);
    assert_eq!(
        h.runner.containers().load(id).await.unwrap().status,
        JobStatus::Started
    );
}
