//! The REQUEST and RUNNING job queues and their advisory locks.
//!
//! Queues are lists of marshalled [`JobQueueEntry`] values. The lock for a
//! queue is a key with a short TTL: it marks "a reconciliation pass is
//! working from a snapshot of this queue" and clears itself if the holder
//! dies.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use mflip_models::JobQueueEntry;
use mflip_store::{KeySpace, Store};

use crate::error::{QueueError, QueueResult};

/// Lifetime of a queue lock key.
pub const LOCK_TTL: Duration = Duration::from_secs(2);

/// How often lock waiters re-check the key.
pub const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueName {
    /// Jobs waiting to be dispatched
    #[serde(rename = "jobrequestqueue")]
    Request,
    /// Steps with a live worker
    #[serde(rename = "jobrunningqueue")]
    Running,
}

impl QueueName {
    pub const ALL: [QueueName; 2] = [QueueName::Request, QueueName::Running];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Request => "jobrequestqueue",
            QueueName::Running => "jobrunningqueue",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for QueueName {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QueueName::ALL
            .into_iter()
            .find(|q| q.as_str() == s)
            .ok_or_else(|| QueueError::validation(format!("invalid queue name '{}'", s)))
    }
}

/// Queue operations over a shared store. Cheap to clone.
#[derive(Clone)]
pub struct JobQueue {
    store: Arc<dyn Store>,
    keys: KeySpace,
}

impl JobQueue {
    pub fn new(store: Arc<dyn Store>, keys: KeySpace) -> Self {
        Self { store, keys }
    }

    /// Append an entry. Returns the new queue length.
    pub async fn add_to_queue(&self, queue: QueueName, entry: &JobQueueEntry) -> QueueResult<u64> {
        let len = self
            .store
            .rpush(&self.keys.queue(queue.as_str()), &entry.marshal())
            .await?;
        debug!(queue = %queue, job_id = %entry.job_id, step_id = %entry.step_id, "Added to queue");
        Ok(len)
    }

    /// Remove one exact occurrence of `entry`.
    pub async fn remove_from_queue(&self, queue: QueueName, entry: &JobQueueEntry) -> QueueResult<()> {
        let removed = self
            .store
            .lrem(&self.keys.queue(queue.as_str()), 1, &entry.marshal())
            .await?;
        if removed == 0 {
            return Err(QueueError::not_found(format!(
                "entry {} is not on {}",
                entry, queue
            )));
        }
        debug!(queue = %queue, job_id = %entry.job_id, step_id = %entry.step_id, "Removed from queue");
        Ok(())
    }

    /// Every entry on the queue, head first.
    ///
    /// Entries that fail to parse are logged and left out.
    pub async fn snapshot_queue(&self, queue: QueueName) -> QueueResult<Vec<JobQueueEntry>> {
        let raw = self
            .store
            .lrange(&self.keys.queue(queue.as_str()), 0, -1)
            .await?;
        Ok(raw
            .iter()
            .filter_map(|s| match JobQueueEntry::unmarshal(s) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(queue = %queue, raw = %s, "Skipping unreadable queue entry: {}", e);
                    None
                }
            })
            .collect())
    }

    /// Pop the head of the queue.
    pub async fn pop_next(&self, queue: QueueName) -> QueueResult<Option<JobQueueEntry>> {
        match self.store.lpop(&self.keys.queue(queue.as_str())).await? {
            None => Ok(None),
            Some(raw) => JobQueueEntry::unmarshal(&raw).map(Some).map_err(|e| {
                QueueError::data_integrity(format!("popped unreadable entry '{}' from {}: {}", raw, queue, e))
            }),
        }
    }

    pub async fn queue_length(&self, queue: QueueName) -> QueueResult<u64> {
        Ok(self.store.llen(&self.keys.queue(queue.as_str())).await?)
    }

    pub async fn all_queue_lengths(&self) -> QueueResult<HashMap<QueueName, u64>> {
        let mut lengths = HashMap::new();
        for queue in QueueName::ALL {
            lengths.insert(queue, self.queue_length(queue).await?);
        }
        Ok(lengths)
    }

    /// Drop every entry on the queue.
    pub async fn purge_queue(&self, queue: QueueName) -> QueueResult<()> {
        self.store.delete(&self.keys.queue(queue.as_str())).await?;
        warn!(queue = %queue, "Purged queue");
        Ok(())
    }

    pub async fn set_queue_lock(&self, queue: QueueName) -> QueueResult<()> {
        self.store
            .set(&self.keys.queue_lock(queue.as_str()), "1", Some(LOCK_TTL))
            .await?;
        Ok(())
    }

    pub async fn release_queue_lock(&self, queue: QueueName) -> QueueResult<()> {
        self.store.delete(&self.keys.queue_lock(queue.as_str())).await?;
        Ok(())
    }

    pub async fn check_queue_lock(&self, queue: QueueName) -> QueueResult<bool> {
        Ok(self.store.exists(&self.keys.queue_lock(queue.as_str())).await?)
    }

    /// Block until the queue is unlocked, or fail after `timeout`.
    pub async fn wait_for_queue_lock(&self, queue: QueueName, timeout: Duration) -> QueueResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.check_queue_lock(queue).await? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(QueueError::LockTimeout(queue.to_string()));
            }
            tokio::time::sleep(LOCK_POLL_INTERVAL).await;
        }
    }

    /// Wait for the lock, hold it while `f` runs, then release it.
    ///
    /// The lock is released whether or not `f` succeeds.
    pub async fn with_queue_lock<T, F, Fut>(
        &self,
        queue: QueueName,
        timeout: Duration,
        f: F,
    ) -> QueueResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.wait_for_queue_lock(queue, timeout).await?;
        self.set_queue_lock(queue).await?;
        let result = f().await;
        if let Err(e) = self.release_queue_lock(queue).await {
            error!(queue = %queue, "Could not release queue lock: {}", e);
        }
        Ok(result)
    }

    /// Run `callback` in the background as soon as the queue is unlocked.
    ///
    /// The callback receives the error if the lock could not be checked.
    /// With `assert_lock`, the lock is held for the callback's duration.
    pub fn when_queue_available<F, Fut>(
        &self,
        queue: QueueName,
        assert_lock: bool,
        callback: F,
    ) -> JoinHandle<()>
    where
        F: FnOnce(QueueResult<()>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                match this.check_queue_lock(queue).await {
                    Err(e) => {
                        error!(queue = %queue, "Could not check queue lock: {}", e);
                        callback(Err(e)).await;
                        return;
                    }
                    Ok(true) => tokio::time::sleep(LOCK_POLL_INTERVAL).await,
                    Ok(false) => break,
                }
            }

            if assert_lock {
                if let Err(e) = this.set_queue_lock(queue).await {
                    callback(Err(e)).await;
                    return;
                }
                callback(Ok(())).await;
                if let Err(e) = this.release_queue_lock(queue).await {
                    error!(queue = %queue, "Could not release queue lock: {}", e);
                }
            } else {
                callback(Ok(())).await;
            }
        })
    }
}
