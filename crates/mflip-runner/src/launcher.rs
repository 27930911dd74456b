//! Launch requests for each step variant.

use std::collections::BTreeMap;
use std::path::Path;

use mflip_models::{JobContainer, JobStep, TranscodeSettings};

use crate::error::{RunnerError, RunnerResult};
use crate::orchestrator::{LaunchRequest, STEP_ID_LABEL};

/// Value of `WRAPPER_MODE` for a step.
fn wrapper_mode(step: &JobStep) -> &'static str {
    match step {
        JobStep::Analysis(_) => "analyse",
        JobStep::Thumbnail(_) => "thumbnail",
        JobStep::Transcode(_) => "transcode",
        JobStep::Custom(_) => "custom",
    }
}

fn worker_name(step: &JobStep) -> String {
    let file = Path::new(step.media_file())
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| step.id().to_string());
    format!("mediaflipper-{}-{}", step.kind(), file)
}

fn required_settings<'a>(
    step: &JobStep,
    settings: Option<&'a TranscodeSettings>,
) -> RunnerResult<&'a TranscodeSettings> {
    settings.ok_or_else(|| {
        RunnerError::validation(format!(
            "{} step {} has no transcode settings",
            step.kind(),
            step.id()
        ))
    })
}

/// Build the request that launches a worker for `step`.
///
/// Steps without a media file cannot run, and neither can transcode steps
/// whose settings were never resolved. A thumbnail step without settings
/// leaves the worker to its default frame grab.
pub fn launch_request(
    step: &JobStep,
    container: &JobContainer,
    max_retries: u32,
) -> RunnerResult<LaunchRequest> {
    if step.media_file().is_empty() {
        return Err(RunnerError::validation(format!(
            "can't run {} step {} with no media file",
            step.kind(),
            step.id()
        )));
    }

    let mut env = BTreeMap::from([
        ("WRAPPER_MODE".to_string(), wrapper_mode(step).to_string()),
        ("JOB_CONTAINER_ID".to_string(), step.container_id().to_string()),
        ("JOB_STEP_ID".to_string(), step.id().to_string()),
        ("FILE_NAME".to_string(), step.media_file().to_string()),
        ("MAX_RETRIES".to_string(), max_retries.to_string()),
        ("MEDIA_TYPE".to_string(), step.base().item_type.to_string()),
    ]);
    let mut overwrite_env = true;

    match step {
        JobStep::Analysis(_) => {}
        JobStep::Thumbnail(s) => {
            if let Some(settings) = &s.transcode_settings {
                env.insert("TRANSCODE_SETTINGS".into(), serde_json::to_string(settings)?);
            }
            env.insert(
                "THUMBNAIL_FRAME".into(),
                format!("{:.6}", s.thumbnail_frame_seconds),
            );
        }
        JobStep::Transcode(s) => {
            let settings = required_settings(step, s.transcode_settings.as_ref())?;
            env.insert("TRANSCODE_SETTINGS".into(), serde_json::to_string(settings)?);
        }
        JobStep::Custom(s) => {
            if let Some(id) = container.transcoded_media_id {
                env.insert("TRANSCODED_MEDIA_ID".into(), id.to_string());
            }
            if let Some(id) = container.thumbnail_id {
                env.insert("THUMBNAIL_ID".into(), id.to_string());
            }
            env.extend(s.custom_arguments.clone());
            // custom workers keep their template's environment
            overwrite_env = false;
        }
    }

    Ok(LaunchRequest {
        step_id: step.id(),
        name: worker_name(step),
        worker_kind: step.kind().to_string(),
        template: step.base().worker_template.clone(),
        env,
        labels: BTreeMap::from([(STEP_ID_LABEL.to_string(), step.id().to_string())]),
        overwrite_env,
    })
}
