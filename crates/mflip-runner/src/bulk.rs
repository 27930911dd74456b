//! Bulk enqueue and fail-pending pipelines.
//!
//! Items stream out of the store, each one is turned into a job (or its
//! jobs are removed), and the resulting state changes go through a batched
//! writer task that commits a pipeline every `commit_every` items. Both
//! stages are joined by bounded channels.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use mflip_models::{BulkAssociation, BulkItem, BulkItemState, BulkList, BulkListAction, JobContainer};
use mflip_queue::bulk::STREAM_BUFFER;
use mflip_queue::{BulkItemStream, BulkListStore, ContainerStore};
use mflip_store::Pipeline;
use mflip_templates::TemplateResolver;

use crate::config::RunnerConfig;
use crate::error::{RunnerError, RunnerResult};
use crate::metrics;
use crate::runner::JobRunner;

/// Where bulk-built jobs go.
#[async_trait]
pub trait JobSink: Send + Sync {
    async fn add_job(&self, container: &JobContainer) -> RunnerResult<()>;

    async fn remove_job(&self, container: &JobContainer) -> RunnerResult<JobContainer>;
}

#[async_trait]
impl JobSink for JobRunner {
    async fn add_job(&self, container: &JobContainer) -> RunnerResult<()> {
        JobRunner::add_job(self, container).await
    }

    async fn remove_job(&self, container: &JobContainer) -> RunnerResult<JobContainer> {
        JobRunner::remove_job(self, container).await
    }
}

/// Which items of a list to process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemFilter {
    State(BulkItemState),
    Item(Uuid),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub item_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnqueueSummary {
    /// Items whose job reached the request queue
    pub enqueued: usize,
    /// Item state changes written before the drain finished
    pub committed: usize,
    pub failures: Vec<ItemFailure>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailPendingSummary {
    pub items: usize,
    pub jobs_removed: usize,
    pub committed: usize,
}

/// Receives items and writes their new state in batches.
struct StatusWriter {
    tx: mpsc::Sender<BulkItem>,
    task: JoinHandle<usize>,
}

impl StatusWriter {
    fn spawn(lists: BulkListStore, state: BulkItemState, commit_every: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<BulkItem>(STREAM_BUFFER);
        let task = tokio::spawn(async move {
            let mut pipe = Pipeline::new();
            let mut staged = 0usize;
            let mut committed = 0usize;

            while let Some(item) = rx.recv().await {
                match lists.stage_state_change(&mut pipe, &item, state) {
                    Ok(_) => staged += 1,
                    Err(e) => {
                        warn!(item_id = %item.id, "Could not stage state change: {}", e);
                        continue;
                    }
                }
                if staged >= commit_every {
                    committed += commit(&lists, std::mem::take(&mut pipe), staged).await;
                    staged = 0;
                }
            }
            committed + commit(&lists, pipe, staged).await
        });
        Self { tx, task }
    }

    async fn send(&self, item: BulkItem) -> RunnerResult<()> {
        self.tx
            .send(item)
            .await
            .map_err(|_| RunnerError::internal("bulk status writer stopped early"))
    }

    /// Close the channel and wait for the last commit, up to `timeout`.
    ///
    /// Returns how many items were committed, or `None` if the wait timed
    /// out; the writer then finishes in the background.
    async fn finish(self, timeout: Duration) -> Option<usize> {
        drop(self.tx);
        match tokio::time::timeout(timeout, self.task).await {
            Ok(Ok(committed)) => Some(committed),
            Ok(Err(e)) => {
                error!("Bulk status writer panicked: {}", e);
                None
            }
            Err(_) => None,
        }
    }
}

async fn commit(lists: &BulkListStore, pipe: Pipeline, staged: usize) -> usize {
    if staged == 0 {
        return 0;
    }
    match lists.commit(pipe).await {
        Ok(()) => {
            debug!(count = staged, "Committed bulk item states");
            staged
        }
        Err(e) => {
            error!(count = staged, "Could not commit bulk item states: {}", e);
            0
        }
    }
}

#[derive(Clone)]
pub struct BulkProcessor {
    lists: BulkListStore,
    containers: ContainerStore,
    sink: Arc<dyn JobSink>,
    resolver: Arc<dyn TemplateResolver>,
    commit_every: usize,
    drain_timeout: Duration,
}

impl BulkProcessor {
    pub fn new(
        lists: BulkListStore,
        containers: ContainerStore,
        sink: Arc<dyn JobSink>,
        resolver: Arc<dyn TemplateResolver>,
        config: &RunnerConfig,
    ) -> Self {
        Self {
            lists,
            containers,
            sink,
            resolver,
            commit_every: config.bulk_commit_every.max(1),
            drain_timeout: config.bulk_drain_timeout,
        }
    }

    fn stream(&self, list_id: Uuid, filter: ItemFilter) -> BulkItemStream {
        match filter {
            ItemFilter::State(state) => self.lists.stream_records_by_state(list_id, state),
            ItemFilter::Item(item_id) => self.lists.stream_record(item_id),
        }
    }

    /// Drain the writer, logging a timeout. The action flag is cleared
    /// afterwards either way.
    async fn drain(&self, writer: StatusWriter, list_id: Uuid) -> usize {
        match writer.finish(self.drain_timeout).await {
            Some(committed) => committed,
            None => {
                warn!(
                    bulk_list_id = %list_id,
                    timeout_ms = self.drain_timeout.as_millis() as u64,
                    "Timed out waiting for bulk status writes"
                );
                0
            }
        }
    }

    async fn clear_flag(&self, list_id: Uuid, action: BulkListAction) {
        if let Err(e) = self.lists.clear_action_running(list_id, action).await {
            error!(bulk_list_id = %list_id, action = action.as_str(), "Could not clear action flag: {}", e);
        }
    }

    /// Build a job for one item and put it on the request queue.
    async fn enqueue_item(&self, list: &BulkList, item: &BulkItem) -> RunnerResult<JobContainer> {
        if item.bulk_list_id != list.id {
            return Err(RunnerError::validation(format!(
                "item {} belongs to list {}, not {}",
                item.id, item.bulk_list_id, list.id
            )));
        }
        let template_id = list.template_for(item.item_type)?;
        let mut container = self
            .resolver
            .new_job_container(template_id, item.item_type)?
            .with_bulk_association(BulkAssociation {
                item: item.id,
                list: list.id,
            });
        container.set_media_file(item.source_path.clone());
        self.sink.add_job(&container).await?;
        Ok(container)
    }

    /// Turn matching items into jobs and mark them Pending.
    ///
    /// A failing item is recorded and skipped. A store error while
    /// streaming ends the run early and is returned once the flag is cleared.
    pub async fn enqueue_contents(
        &self,
        list: &BulkList,
        filter: ItemFilter,
    ) -> RunnerResult<EnqueueSummary> {
        self.lists
            .set_action_running(list.id, BulkListAction::JobsQueueing)
            .await?;
        info!(bulk_list_id = %list.id, ?filter, "Enqueueing bulk items");

        let writer = StatusWriter::spawn(self.lists.clone(), BulkItemState::Pending, self.commit_every);
        let mut rx = self.stream(list.id, filter);
        let mut summary = EnqueueSummary::default();
        let mut stream_error = None;

        while let Some(next) = rx.recv().await {
            let item = match next {
                Ok(item) => item,
                Err(e) => {
                    stream_error = Some(RunnerError::from(e));
                    break;
                }
            };
            match self.enqueue_item(list, &item).await {
                Ok(container) => {
                    debug!(item_id = %item.id, job_id = %container.id, "Bulk item enqueued");
                    summary.enqueued += 1;
                    if let Err(e) = writer.send(item).await {
                        stream_error = Some(e);
                        break;
                    }
                }
                Err(e) => {
                    warn!(item_id = %item.id, path = %item.source_path, "Skipping bulk item: {}", e);
                    summary.failures.push(ItemFailure {
                        item_id: item.id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        summary.committed = self.drain(writer, list.id).await;
        self.clear_flag(list.id, BulkListAction::JobsQueueing).await;
        metrics::record_bulk_items(summary.enqueued as u64, summary.failures.len() as u64);

        if let Some(e) = stream_error {
            error!(bulk_list_id = %list.id, "Bulk enqueue stopped early: {}", e);
            return Err(e);
        }
        info!(
            bulk_list_id = %list.id,
            enqueued = summary.enqueued,
            failed = summary.failures.len(),
            committed = summary.committed,
            "Bulk enqueue finished"
        );
        Ok(summary)
    }

    /// Run [`Self::enqueue_contents`] in the background.
    pub fn enqueue_contents_async(
        &self,
        list: BulkList,
        filter: ItemFilter,
    ) -> JoinHandle<RunnerResult<EnqueueSummary>> {
        let this = self.clone();
        tokio::spawn(async move { this.enqueue_contents(&list, filter).await })
    }

    /// Remove the jobs of every Pending item and mark the items Failed.
    pub async fn fail_pending(&self, list: &BulkList) -> RunnerResult<FailPendingSummary> {
        self.lists
            .set_action_running(list.id, BulkListAction::FailPending)
            .await?;
        info!(bulk_list_id = %list.id, "Failing pending bulk items");

        let writer = StatusWriter::spawn(self.lists.clone(), BulkItemState::Failed, self.commit_every);
        let mut rx = self.stream(list.id, ItemFilter::State(BulkItemState::Pending));
        let mut summary = FailPendingSummary::default();
        let mut stream_error = None;

        while let Some(next) = rx.recv().await {
            let item = match next {
                Ok(item) => item,
                Err(e) => {
                    stream_error = Some(RunnerError::from(e));
                    break;
                }
            };
            summary.jobs_removed += self.remove_item_jobs(&item).await;
            summary.items += 1;
            if let Err(e) = writer.send(item).await {
                stream_error = Some(e);
                break;
            }
        }

        summary.committed = self.drain(writer, list.id).await;
        self.clear_flag(list.id, BulkListAction::FailPending).await;

        if let Some(e) = stream_error {
            error!(bulk_list_id = %list.id, "Fail pending stopped early: {}", e);
            return Err(e);
        }
        info!(
            bulk_list_id = %list.id,
            items = summary.items,
            jobs_removed = summary.jobs_removed,
            "Fail pending finished"
        );
        Ok(summary)
    }

    pub fn fail_pending_async(&self, list: BulkList) -> JoinHandle<RunnerResult<FailPendingSummary>> {
        let this = self.clone();
        tokio::spawn(async move { this.fail_pending(&list).await })
    }

    /// Abort every unfinished job of an item. Returns how many were removed.
    async fn remove_item_jobs(&self, item: &BulkItem) -> usize {
        let containers = match self.containers.for_bulk_item(item.id).await {
            Ok(containers) => containers,
            Err(e) => {
                warn!(item_id = %item.id, "Could not look up jobs for bulk item: {}", e);
                return 0;
            }
        };

        let mut removed = 0;
        for container in containers.iter().filter(|c| !c.status.is_terminal()) {
            match self.sink.remove_job(container).await {
                Ok(_) => removed += 1,
                Err(e) => warn!(item_id = %item.id, job_id = %container.id, "Could not remove job: {}", e),
            }
        }
        removed
    }
}
