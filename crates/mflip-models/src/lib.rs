//! Shared data models for MediaFlipper.
//!
//! This crate provides Serde-serializable types for:
//! - Job containers and their pipeline steps
//! - Job and step status
//! - Compact queue entries
//! - Worker descriptors reported by the orchestrator
//! - Transcode settings
//! - Bulk lists and bulk items
//!
//! Everything here is pure data plus transition logic; no I/O.

pub mod bulk;
pub mod container;
pub mod error;
pub mod item_type;
pub mod queue_entry;
pub mod settings;
pub mod status;
pub mod step;
pub mod worker;

// Re-export common types
pub use bulk::{BulkItem, BulkItemState, BulkList, BulkListAction};
pub use container::{BulkAssociation, JobContainer};
pub use error::{ModelError, ModelResult};
pub use item_type::ItemType;
pub use queue_entry::JobQueueEntry;
pub use settings::{
    AudioSettings, AvSettings, ImageSettings, ScaleSettings, SettingsSummary, TranscodeSettings,
    VideoSettings, WrapperSettings,
};
pub use status::JobStatus;
pub use step::{AnalysisStep, CustomStep, JobStep, StepBase, StepKind, ThumbnailStep, TranscodeStep};
pub use worker::{WorkerDescriptor, WorkerStatus};
