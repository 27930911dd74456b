//! Job container persistence.
//!
//! A container is stored whole as JSON under `prefix:JobContainer:<id>`,
//! alongside a start-time index, one index per status and a set of
//! containers per bulk item. Record and indices are written in one
//! pipeline; readers skip index entries whose record has gone.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use mflip_models::{JobContainer, JobStatus};
use mflip_store::{KeySpace, Pipeline, Store};

use crate::error::{QueueError, QueueResult};

const SCAN_PAGE: usize = 100;

#[derive(Clone)]
pub struct ContainerStore {
    store: Arc<dyn Store>,
    keys: KeySpace,
}

/// Decode a stored container; anything undecodable is a data-integrity problem.
pub fn decode_container(id: impl std::fmt::Display, raw: &str) -> QueueResult<JobContainer> {
    serde_json::from_str(raw)
        .map_err(|e| QueueError::data_integrity(format!("container {} is unreadable: {}", id, e)))
}

impl ContainerStore {
    pub fn new(store: Arc<dyn Store>, keys: KeySpace) -> Self {
        Self { store, keys }
    }

    /// Write the container and refresh its index entries.
    pub async fn store(&self, container: &JobContainer) -> QueueResult<()> {
        let id = container.id.to_string();
        let score = container
            .start_time
            .unwrap_or_else(Utc::now)
            .timestamp_millis() as f64;

        let mut pipe = Pipeline::new();
        pipe.set(self.keys.container(container.id), serde_json::to_string(container)?)
            .zadd(self.keys.container_time_index(), id.clone(), score);
        for status in JobStatus::ALL {
            let index = self.keys.container_status_index(status.code());
            if status == container.status {
                pipe.zadd(index, id.clone(), score);
            } else {
                pipe.zrem(index, id.clone());
            }
        }
        if let Some(bulk) = &container.associated_bulk {
            pipe.sadd(self.keys.container_bulk_item_index(bulk.item), id.clone());
        }

        self.store.exec(pipe).await?;
        debug!(job_id = %container.id, status = %container.status, "Stored container");
        Ok(())
    }

    pub async fn load(&self, id: Uuid) -> QueueResult<JobContainer> {
        match self.store.get(&self.keys.container(id)).await? {
            Some(raw) => decode_container(id, &raw),
            None => Err(QueueError::not_found(format!("job container {}", id))),
        }
    }

    /// Delete the record and every index entry that points at it.
    pub async fn remove(&self, container: &JobContainer) -> QueueResult<()> {
        let id = container.id.to_string();
        let mut pipe = Pipeline::new();
        pipe.del(self.keys.container(container.id))
            .zrem(self.keys.container_time_index(), id.clone());
        for status in JobStatus::ALL {
            pipe.zrem(self.keys.container_status_index(status.code()), id.clone());
        }
        if let Some(bulk) = &container.associated_bulk {
            pipe.srem(self.keys.container_bulk_item_index(bulk.item), id.clone());
        }
        self.store.exec(pipe).await?;
        debug!(job_id = %container.id, "Removed container");
        Ok(())
    }

    /// Containers newest first, optionally restricted to one status.
    ///
    /// `start` and `stop` are inclusive positions in the index.
    pub async fn list(
        &self,
        start: isize,
        stop: isize,
        status: Option<JobStatus>,
    ) -> QueueResult<Vec<JobContainer>> {
        let index = match status {
            Some(s) => self.keys.container_status_index(s.code()),
            None => self.keys.container_time_index(),
        };
        let ids = self.store.zrevrange(&index, start, stop).await?;
        self.load_many(&ids).await
    }

    pub async fn count(&self, status: Option<JobStatus>) -> QueueResult<u64> {
        let index = match status {
            Some(s) => self.keys.container_status_index(s.code()),
            None => self.keys.container_time_index(),
        };
        Ok(self.store.zcard(&index).await?)
    }

    /// Every container created for a bulk item.
    pub async fn for_bulk_item(&self, item_id: Uuid) -> QueueResult<Vec<JobContainer>> {
        let key = self.keys.container_bulk_item_index(item_id);
        let mut ids = Vec::new();
        let mut cursor = 0;
        loop {
            let (next, page) = self.store.sscan(&key, cursor, None, SCAN_PAGE).await?;
            ids.extend(page);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        self.load_many(&ids).await
    }

    async fn load_many(&self, raw_ids: &[String]) -> QueueResult<Vec<JobContainer>> {
        let ids: Vec<Uuid> = raw_ids
            .iter()
            .filter_map(|raw| match Uuid::parse_str(raw) {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(raw = %raw, "Skipping malformed id in container index: {}", e);
                    None
                }
            })
            .collect();
        let record_keys: Vec<String> = ids.iter().map(|id| self.keys.container(*id)).collect();
        let records = self.store.mget(&record_keys).await?;

        let mut out = Vec::with_capacity(records.len());
        for (id, raw) in ids.iter().zip(records) {
            match raw {
                None => warn!(job_id = %id, "Index refers to a container that no longer exists"),
                Some(raw) => match decode_container(id, &raw) {
                    Ok(c) => out.push(c),
                    Err(e) => warn!(job_id = %id, "Skipping container: {}", e),
                },
            }
        }
        Ok(out)
    }
}
