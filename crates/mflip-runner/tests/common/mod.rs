//! Shared fixtures: an in-memory store with injectable faults and a
//! scripted orchestrator.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use mflip_models::{ItemType, JobContainer, JobStep, WorkerDescriptor, WorkerStatus};
use mflip_runner::orchestrator::STEP_ID_LABEL;
use mflip_runner::{
    JobRunner, Label, LaunchRequest, Orchestrator, OrchestratorError, OrchestratorResult,
    RunnerConfig, WorkerHandle,
};
use mflip_store::{KeySpace, MemoryStore, Pipeline, Store, StoreError, StoreResult};

pub const WORKER_LOG: &str = "frame=120 fps=30 done";

/// Orchestrator whose workers are whatever the test says they are.
///
/// Launching registers an Active worker under the step's label.
#[derive(Default)]
pub struct FakeOrchestrator {
    workers: Mutex<HashMap<String, Vec<WorkerDescriptor>>>,
    launched: Mutex<Vec<LaunchRequest>>,
    deleted: Mutex<Vec<WorkerHandle>>,
    fail_launch: AtomicBool,
    fail_list: AtomicBool,
    next_uid: AtomicUsize,
}

impl FakeOrchestrator {
    pub fn set_worker_status(&self, step_id: Uuid, status: WorkerStatus) {
        let mut workers = self.workers.lock().unwrap();
        let entry = workers.entry(step_id.to_string()).or_default();
        match entry.last_mut() {
            Some(worker) => worker.status = status,
            None => entry.push(
                WorkerDescriptor::new(format!("uid-{}", step_id), "manual-worker", status)
                    .with_start_time(Utc::now()),
            ),
        }
    }

    /// Drop every worker for a step, as if the orchestrator forgot it.
    pub fn forget(&self, step_id: Uuid) {
        self.workers.lock().unwrap().remove(&step_id.to_string());
    }

    pub fn fail_launches(&self, fail: bool) {
        self.fail_launch.store(fail, Ordering::SeqCst);
    }

    pub fn fail_lists(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    pub fn launched(&self) -> Vec<LaunchRequest> {
        self.launched.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<WorkerHandle> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl Orchestrator for FakeOrchestrator {
    async fn launch_worker(&self, request: LaunchRequest) -> OrchestratorResult<WorkerHandle> {
        if self.fail_launch.load(Ordering::SeqCst) {
            return Err(OrchestratorError::LaunchFailed("quota exceeded".to_string()));
        }
        let uid = format!("uid-{}", self.next_uid.fetch_add(1, Ordering::SeqCst));
        let worker = WorkerDescriptor::new(&uid, &request.name, WorkerStatus::Active)
            .with_start_time(Utc::now());
        let label = request
            .labels
            .get(STEP_ID_LABEL)
            .cloned()
            .unwrap_or_else(|| request.step_id.to_string());
        self.workers.lock().unwrap().entry(label).or_default().push(worker);

        let handle = WorkerHandle {
            uid,
            name: request.name.clone(),
        };
        self.launched.lock().unwrap().push(request);
        Ok(handle)
    }

    async fn find_workers_by_label(&self, label: &Label) -> OrchestratorResult<Vec<WorkerDescriptor>> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(OrchestratorError::ListFailed("gateway unavailable".to_string()));
        }
        Ok(self
            .workers
            .lock()
            .unwrap()
            .get(&label.value)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_logs(&self, _worker: &WorkerHandle) -> OrchestratorResult<String> {
        Ok(WORKER_LOG.to_string())
    }

    async fn delete_worker(&self, worker: &WorkerHandle) -> OrchestratorResult<()> {
        self.deleted.lock().unwrap().push(worker.clone());
        Ok(())
    }
}

/// A [`MemoryStore`] that can be told to stall pipelines or refuse pushes
/// onto one list.
pub struct ScriptedStore {
    inner: Arc<MemoryStore>,
    exec_delay: Mutex<Option<Duration>>,
    refuse_push_to: Mutex<Option<String>>,
}

impl ScriptedStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            exec_delay: Mutex::new(None),
            refuse_push_to: Mutex::new(None),
        }
    }

    /// Sleep this long before every pipeline executes.
    pub fn delay_exec(&self, delay: Option<Duration>) {
        *self.exec_delay.lock().unwrap() = delay;
    }

    /// Fail every push onto `key` with a connection error.
    pub fn refuse_push_to(&self, key: Option<String>) {
        *self.refuse_push_to.lock().unwrap() = key;
    }
}

#[async_trait]
impl Store for ScriptedStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.inner.get(key).await
    }

    async fn mget(&self, keys: &[String]) -> StoreResult<Vec<Option<String>>> {
        self.inner.mget(keys).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.inner.exists(key).await
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()> {
        self.inner.zadd(key, member, score).await
    }

    async fn zrange(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>> {
        self.inner.zrange(key, start, stop).await
    }

    async fn zrevrange(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>> {
        self.inner.zrevrange(key, start, stop).await
    }

    async fn zrem(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.inner.zrem(key, member).await
    }

    async fn zcard(&self, key: &str) -> StoreResult<u64> {
        self.inner.zcard(key).await
    }

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.inner.sadd(key, member).await
    }

    async fn srem(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.inner.srem(key, member).await
    }

    async fn sscan(
        &self,
        key: &str,
        cursor: u64,
        pattern: Option<&str>,
        count: usize,
    ) -> StoreResult<(u64, Vec<String>)> {
        self.inner.sscan(key, cursor, pattern, count).await
    }

    async fn rpush(&self, key: &str, value: &str) -> StoreResult<u64> {
        let refused = self.refuse_push_to.lock().unwrap().as_deref() == Some(key);
        if refused {
            return Err(StoreError::connection_failed("connection reset by peer"));
        }
        self.inner.rpush(key, value).await
    }

    async fn lpop(&self, key: &str) -> StoreResult<Option<String>> {
        self.inner.lpop(key).await
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>> {
        self.inner.lrange(key, start, stop).await
    }

    async fn lrem(&self, key: &str, count: isize, value: &str) -> StoreResult<u64> {
        self.inner.lrem(key, count, value).await
    }

    async fn llen(&self, key: &str) -> StoreResult<u64> {
        self.inner.llen(key).await
    }

    async fn exec(&self, pipeline: Pipeline) -> StoreResult<()> {
        let delay = *self.exec_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.exec(pipeline).await
    }
}

pub struct Harness {
    /// The data behind `faults`, for direct reads
    pub store: Arc<MemoryStore>,
    pub faults: Arc<ScriptedStore>,
    pub orchestrator: Arc<FakeOrchestrator>,
    pub runner: Arc<JobRunner>,
}

pub fn harness(config: RunnerConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let faults = Arc::new(ScriptedStore::new(store.clone()));
    let orchestrator = Arc::new(FakeOrchestrator::default());
    let runner = Arc::new(JobRunner::new(
        faults.clone(),
        KeySpace::default(),
        orchestrator.clone(),
        config,
    ));
    Harness {
        store,
        faults,
        orchestrator,
        runner,
    }
}

pub fn default_harness() -> Harness {
    harness(RunnerConfig::default())
}

/// A video container with `steps` analysis steps and a media file.
pub fn container(steps: usize) -> JobContainer {
    let mut container = JobContainer::new(Uuid::new_v4(), ItemType::Video);
    for _ in 0..steps {
        container
            .steps
            .push(JobStep::analysis(container.id, "analysis.yaml").with_item_type(ItemType::Video));
    }
    container.set_media_file("/srv/media/incoming/interview.mp4");
    container
}
