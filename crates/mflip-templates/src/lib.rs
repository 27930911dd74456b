//! Pipeline templates and transcode settings.
//!
//! [`JobTemplateManager`] turns a template id into a fresh
//! [`mflip_models::JobContainer`], resolving transcode settings from a
//! [`TranscodeSettingsManager`]. Definitions load from JSON files.

pub mod error;
pub mod loader;
pub mod settings;
pub mod templates;

pub use error::{TemplateError, TemplateResult};
pub use settings::TranscodeSettingsManager;
pub use templates::{
    JobStepTemplateDefinition, JobTemplateDefinition, JobTemplateManager, TemplateResolver,
};
