//! Persisted key layout.
//!
//! Every key lives under a configurable prefix (`mediaflipper` by default).
//! Other crates build keys through [`KeySpace`] only, so the layout is
//! defined in one place.

use uuid::Uuid;

pub const DEFAULT_PREFIX: &str = "mediaflipper";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// `prefix:JobContainer:<id>`
    pub fn container(&self, id: Uuid) -> String {
        format!("{}:JobContainer:{}", self.prefix, id)
    }

    /// Sorted set of container ids scored by start time.
    pub fn container_time_index(&self) -> String {
        format!("{}:jobcontainer:starttimeindex", self.prefix)
    }

    /// Sorted set of container ids in one status, scored by start time.
    pub fn container_status_index(&self, status_code: u8) -> String {
        format!("{}:jobcontainer:statusindex:{}", self.prefix, status_code)
    }

    /// Set of container ids created for one bulk item.
    pub fn container_bulk_item_index(&self, item_id: Uuid) -> String {
        format!("{}:jobcontainer:bulkitem:{}", self.prefix, item_id)
    }

    /// `prefix:<queuename>`
    pub fn queue(&self, name: &str) -> String {
        format!("{}:{}", self.prefix, name)
    }

    /// `prefix:<queuename>:lock`
    pub fn queue_lock(&self, name: &str) -> String {
        format!("{}:{}:lock", self.prefix, name)
    }

    /// `prefix:containerlog:<stepId>`
    pub fn container_log(&self, step_id: Uuid) -> String {
        format!("{}:containerlog:{}", self.prefix, step_id)
    }

    pub fn bulk_list(&self, list_id: Uuid) -> String {
        format!("{}:bulklist:{}", self.prefix, list_id)
    }

    pub fn bulk_list_time_index(&self) -> String {
        format!("{}:bulklist:timeindex", self.prefix)
    }

    /// `prefix:bulklist:<id>:state:<state>`
    pub fn bulk_list_state_index(&self, list_id: Uuid, state_code: u8) -> String {
        format!("{}:bulklist:{}:state:{}", self.prefix, list_id, state_code)
    }

    /// Set of `path|itemId` strings.
    pub fn bulk_list_path_index(&self, list_id: Uuid) -> String {
        format!("{}:bulklist:{}:filepathindex", self.prefix, list_id)
    }

    pub fn bulk_list_actions(&self, list_id: Uuid) -> String {
        format!("{}:bulklist:{}:actions", self.prefix, list_id)
    }

    pub fn bulk_item(&self, item_id: Uuid) -> String {
        format!("{}:bulkitem:{}", self.prefix, item_id)
    }
}
