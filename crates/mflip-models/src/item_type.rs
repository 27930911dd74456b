//! Media item classification.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ModelError;

/// Broad media type of a source file; selects the pipeline template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Video,
    Audio,
    Image,
    #[default]
    Other,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Video => "video",
            ItemType::Audio => "audio",
            ItemType::Image => "image",
            ItemType::Other => "other",
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ItemType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "video" => Ok(ItemType::Video),
            "audio" => Ok(ItemType::Audio),
            "image" => Ok(ItemType::Image),
            "other" => Ok(ItemType::Other),
            other => Err(ModelError::UnsupportedItemType(other.to_string())),
        }
    }
}
