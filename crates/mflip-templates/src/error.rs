//! Template and settings error types.

use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

pub type TemplateResult<T> = Result<T, TemplateError>;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Template not found: {0}")]
    TemplateNotFound(Uuid),

    #[error("Invalid transcode settings id '{0}'")]
    InvalidSettingsId(String),

    #[error("No transcode settings match {0}")]
    SettingsNotFound(Uuid),

    #[error("Template step has no transcode settings id")]
    MissingSettingsId,

    #[error("Duplicate definition id {0}")]
    Duplicate(Uuid),

    #[error("Could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
