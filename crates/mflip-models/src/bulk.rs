//! Bulk lists: large batches of source files turned into jobs en masse.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ModelError;
use crate::item_type::ItemType;

/// Processing state of a bulk item. Persisted as its integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(into = "u8", try_from = "u8")]
pub enum BulkItemState {
    #[default]
    NotQueued,
    Pending,
    Active,
    Completed,
    Failed,
}

impl BulkItemState {
    pub const ALL: [BulkItemState; 5] = [
        BulkItemState::NotQueued,
        BulkItemState::Pending,
        BulkItemState::Active,
        BulkItemState::Completed,
        BulkItemState::Failed,
    ];

    pub fn code(&self) -> u8 {
        match self {
            BulkItemState::NotQueued => 0,
            BulkItemState::Pending => 1,
            BulkItemState::Active => 2,
            BulkItemState::Completed => 3,
            BulkItemState::Failed => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BulkItemState::NotQueued => "not_queued",
            BulkItemState::Pending => "pending",
            BulkItemState::Active => "active",
            BulkItemState::Completed => "completed",
            BulkItemState::Failed => "failed",
        }
    }
}

impl From<BulkItemState> for u8 {
    fn from(state: BulkItemState) -> Self {
        state.code()
    }
}

impl TryFrom<u8> for BulkItemState {
    type Error = ModelError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        BulkItemState::ALL
            .into_iter()
            .find(|s| s.code() == code)
            .ok_or(ModelError::InvalidStatus(code))
    }
}

impl FromStr for BulkItemState {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.to_lowercase();
        BulkItemState::ALL
            .into_iter()
            .find(|state| state.as_str() == lowered)
            .ok_or_else(|| ModelError::validation(format!("unknown bulk item state '{}'", s)))
    }
}

impl fmt::Display for BulkItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One source file inside a bulk list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkItem {
    pub id: Uuid,
    pub bulk_list_id: Uuid,
    pub source_path: String,
    /// Sort key within the state index
    pub priority: i32,
    pub state: BulkItemState,
    #[serde(default)]
    pub item_type: ItemType,
}

impl BulkItem {
    /// New item, prioritised by the leading bytes of its path unless overridden.
    pub fn new(
        bulk_list_id: Uuid,
        source_path: impl Into<String>,
        item_type: ItemType,
        priority_override: Option<i32>,
    ) -> Self {
        let source_path = source_path.into();
        let priority = priority_override.unwrap_or_else(|| path_priority(&source_path));
        Self {
            id: Uuid::new_v4(),
            bulk_list_id,
            source_path,
            priority,
            state: BulkItemState::NotQueued,
            item_type,
        }
    }

    pub fn with_state(&self, state: BulkItemState) -> Self {
        Self {
            state,
            ..self.clone()
        }
    }
}

/// Roughly alphabetical ordering from the first four bytes of a path.
fn path_priority(path: &str) -> i32 {
    let mut prefix = [0u8; 4];
    for (slot, byte) in prefix.iter_mut().zip(path.bytes()) {
        *slot = byte;
    }
    (u32::from_be_bytes(prefix) >> 1) as i32
}

/// Long-running operations on a bulk list, flagged while in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BulkListAction {
    #[serde(rename = "remove-system-files")]
    RemoveSystemFiles,
    #[serde(rename = "remove-non-transcodable")]
    RemoveNonTranscodable,
    #[serde(rename = "jobs-queueing")]
    JobsQueueing,
    #[serde(rename = "fail-pending")]
    FailPending,
}

impl BulkListAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            BulkListAction::RemoveSystemFiles => "remove-system-files",
            BulkListAction::RemoveNonTranscodable => "remove-non-transcodable",
            BulkListAction::JobsQueueing => "jobs-queueing",
            BulkListAction::FailPending => "fail-pending",
        }
    }
}

impl FromStr for BulkListAction {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "remove-system-files" => Ok(BulkListAction::RemoveSystemFiles),
            "remove-non-transcodable" => Ok(BulkListAction::RemoveNonTranscodable),
            "jobs-queueing" => Ok(BulkListAction::JobsQueueing),
            "fail-pending" => Ok(BulkListAction::FailPending),
            other => Err(ModelError::validation(format!("unknown bulk action '{}'", other))),
        }
    }
}

/// A batch of items with the templates to use per media type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkList {
    #[serde(rename = "bulkListId")]
    pub id: Uuid,
    pub creation_time: DateTime<Utc>,
    #[serde(default)]
    pub nick_name: String,
    pub video_template_id: Uuid,
    pub audio_template_id: Uuid,
    pub image_template_id: Uuid,
}

impl BulkList {
    pub fn new(nick_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            creation_time: Utc::now(),
            nick_name: nick_name.into(),
            video_template_id: Uuid::nil(),
            audio_template_id: Uuid::nil(),
            image_template_id: Uuid::nil(),
        }
    }

    pub fn with_templates(mut self, video: Uuid, audio: Uuid, image: Uuid) -> Self {
        self.video_template_id = video;
        self.audio_template_id = audio;
        self.image_template_id = image;
        self
    }

    /// Template to build jobs for an item of this type.
    pub fn template_for(&self, item_type: ItemType) -> Result<Uuid, ModelError> {
        match item_type {
            ItemType::Video => Ok(self.video_template_id),
            ItemType::Audio => Ok(self.audio_template_id),
            ItemType::Image => Ok(self.image_template_id),
            ItemType::Other => Err(ModelError::UnsupportedItemType(
                "can't enqueue an item of type other, there is no template for it".to_string(),
            )),
        }
    }
}
