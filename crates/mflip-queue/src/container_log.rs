//! Worker logs captured at cleanup time, keyed by step.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use mflip_store::{KeySpace, Store};

use crate::error::QueueResult;

#[derive(Clone)]
pub struct ContainerLogStore {
    store: Arc<dyn Store>,
    keys: KeySpace,
    retention: Option<Duration>,
}

impl ContainerLogStore {
    pub fn new(store: Arc<dyn Store>, keys: KeySpace) -> Self {
        Self {
            store,
            keys,
            retention: None,
        }
    }

    /// Expire stored logs after `retention`.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = Some(retention);
        self
    }

    pub async fn store_log(&self, step_id: Uuid, content: &str) -> QueueResult<()> {
        self.store
            .set(&self.keys.container_log(step_id), content, self.retention)
            .await?;
        Ok(())
    }

    pub async fn get_log(&self, step_id: Uuid) -> QueueResult<Option<String>> {
        Ok(self.store.get(&self.keys.container_log(step_id)).await?)
    }

    pub async fn remove_log(&self, step_id: Uuid) -> QueueResult<bool> {
        Ok(self.store.delete(&self.keys.container_log(step_id)).await?)
    }
}
