//! Pipeline steps.
//!
//! A step is one unit of work inside a [`JobContainer`](crate::JobContainer).
//! Steps are values: every `with_*` method returns an updated copy and the
//! caller writes it back into the container, which is what gets persisted.
//!
//! The serialized form carries a `stepType` discriminant
//! (`analysis`, `thumbnail`, `transcode`, `custom`) next to the step fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::item_type::ItemType;
use crate::settings::TranscodeSettings;
use crate::status::JobStatus;
use crate::worker::WorkerDescriptor;

/// Fields shared by every step variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepBase {
    #[serde(rename = "jobStepId")]
    pub id: Uuid,
    pub job_container_id: Uuid,
    #[serde(rename = "jobStepStatus")]
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default)]
    pub media_file: String,
    /// Reference to the worker template the orchestrator launches from
    #[serde(default)]
    pub worker_template: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<WorkerDescriptor>,
    #[serde(default)]
    pub item_type: ItemType,
}

impl StepBase {
    pub fn new(job_container_id: Uuid, worker_template: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_container_id,
            status: JobStatus::Pending,
            last_error: None,
            media_file: String::new(),
            worker_template: worker_template.into(),
            start_time: None,
            end_time: None,
            worker: None,
            item_type: ItemType::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisStep {
    #[serde(flatten)]
    pub base: StepBase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_result: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailStep {
    #[serde(flatten)]
    pub base: StepBase,
    #[serde(default)]
    pub thumbnail_frame_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_result: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcode_settings: Option<TranscodeSettings>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscodeStep {
    #[serde(flatten)]
    pub base: StepBase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcode_result: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcode_settings: Option<TranscodeSettings>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomStep {
    #[serde(flatten)]
    pub base: StepBase,
    /// Extra environment passed verbatim to the worker
    #[serde(default)]
    pub custom_arguments: BTreeMap<String, String>,
}

/// Discriminant of a [`JobStep`], without its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
    Analysis,
    Thumbnail,
    Transcode,
    Custom,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Analysis => "analysis",
            StepKind::Thumbnail => "thumbnail",
            StepKind::Transcode => "transcode",
            StepKind::Custom => "custom",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One step of a linear pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stepType", rename_all = "lowercase")]
pub enum JobStep {
    Analysis(AnalysisStep),
    Thumbnail(ThumbnailStep),
    Transcode(TranscodeStep),
    Custom(CustomStep),
}

impl JobStep {
    pub fn analysis(job_container_id: Uuid, worker_template: impl Into<String>) -> Self {
        JobStep::Analysis(AnalysisStep {
            base: StepBase::new(job_container_id, worker_template),
            analysis_result: None,
        })
    }

    pub fn thumbnail(
        job_container_id: Uuid,
        worker_template: impl Into<String>,
        thumbnail_frame_seconds: f64,
        transcode_settings: Option<TranscodeSettings>,
    ) -> Self {
        JobStep::Thumbnail(ThumbnailStep {
            base: StepBase::new(job_container_id, worker_template),
            thumbnail_frame_seconds,
            thumbnail_result: None,
            transcode_settings,
        })
    }

    pub fn transcode(
        job_container_id: Uuid,
        worker_template: impl Into<String>,
        transcode_settings: Option<TranscodeSettings>,
    ) -> Self {
        JobStep::Transcode(TranscodeStep {
            base: StepBase::new(job_container_id, worker_template),
            transcode_result: None,
            transcode_settings,
        })
    }

    pub fn custom(
        job_container_id: Uuid,
        worker_template: impl Into<String>,
        custom_arguments: BTreeMap<String, String>,
    ) -> Self {
        JobStep::Custom(CustomStep {
            base: StepBase::new(job_container_id, worker_template),
            custom_arguments,
        })
    }

    pub fn base(&self) -> &StepBase {
        match self {
            JobStep::Analysis(s) => &s.base,
            JobStep::Thumbnail(s) => &s.base,
            JobStep::Transcode(s) => &s.base,
            JobStep::Custom(s) => &s.base,
        }
    }

    fn base_mut(&mut self) -> &mut StepBase {
        match self {
            JobStep::Analysis(s) => &mut s.base,
            JobStep::Thumbnail(s) => &mut s.base,
            JobStep::Transcode(s) => &mut s.base,
            JobStep::Custom(s) => &mut s.base,
        }
    }

    pub fn kind(&self) -> StepKind {
        match self {
            JobStep::Analysis(_) => StepKind::Analysis,
            JobStep::Thumbnail(_) => StepKind::Thumbnail,
            JobStep::Transcode(_) => StepKind::Transcode,
            JobStep::Custom(_) => StepKind::Custom,
        }
    }

    pub fn id(&self) -> Uuid {
        self.base().id
    }

    pub fn container_id(&self) -> Uuid {
        self.base().job_container_id
    }

    pub fn status(&self) -> JobStatus {
        self.base().status
    }

    pub fn last_error(&self) -> Option<&str> {
        self.base().last_error.as_deref()
    }

    pub fn media_file(&self) -> &str {
        &self.base().media_file
    }

    pub fn worker(&self) -> Option<&WorkerDescriptor> {
        self.base().worker.as_ref()
    }

    /// Identifier of whatever the step produced, once a worker has reported it.
    pub fn output_id(&self) -> Option<Uuid> {
        match self {
            JobStep::Analysis(s) => s.analysis_result,
            JobStep::Thumbnail(s) => s.thumbnail_result,
            JobStep::Transcode(s) => s.transcode_result,
            JobStep::Custom(_) => None,
        }
    }

    pub fn transcode_settings(&self) -> Option<&TranscodeSettings> {
        match self {
            JobStep::Thumbnail(s) => s.transcode_settings.as_ref(),
            JobStep::Transcode(s) => s.transcode_settings.as_ref(),
            _ => None,
        }
    }

    /// Copy of this step with a new status.
    ///
    /// Moving to `Started` stamps the start time if it is unset, moving to
    /// a terminal status stamps the end time. An error message, if given,
    /// replaces the previous one.
    pub fn with_new_status(&self, status: JobStatus, error: Option<&str>) -> Self {
        let mut updated = self.clone();
        let now = Utc::now();
        let base = updated.base_mut();
        base.status = status;
        if status == JobStatus::Started && base.start_time.is_none() {
            base.start_time = Some(now);
        }
        if status.is_terminal() {
            base.end_time = Some(now);
        }
        if let Some(msg) = error {
            base.last_error = Some(msg.to_string());
        }
        updated
    }

    pub fn with_new_media_file(&self, media_file: impl Into<String>) -> Self {
        let mut updated = self.clone();
        updated.base_mut().media_file = media_file.into();
        updated
    }

    pub fn with_worker(&self, worker: WorkerDescriptor) -> Self {
        let mut updated = self.clone();
        updated.base_mut().worker = Some(worker);
        updated
    }

    pub fn with_item_type(&self, item_type: ItemType) -> Self {
        let mut updated = self.clone();
        updated.base_mut().item_type = item_type;
        updated
    }

    /// Copy of this step recording its output. Custom steps have no output slot.
    pub fn with_output_id(&self, output: Uuid) -> Self {
        let mut updated = self.clone();
        match &mut updated {
            JobStep::Analysis(s) => s.analysis_result = Some(output),
            JobStep::Thumbnail(s) => s.thumbnail_result = Some(output),
            JobStep::Transcode(s) => s.transcode_result = Some(output),
            JobStep::Custom(_) => {}
        }
        updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_new_status_returns_copy() {
        let step = JobStep::analysis(Uuid::new_v4(), "analysis.yaml");
        let started = step.with_new_status(JobStatus::Started, None);

        assert_eq!(step.status(), JobStatus::Pending);
        assert!(step.base().start_time.is_none());
        assert_eq!(started.status(), JobStatus::Started);
        assert!(started.base().start_time.is_some());
        assert!(started.base().end_time.is_none());
        assert_eq!(started.id(), step.id());
    }

    #[test]
    fn test_terminal_status_stamps_end_time_and_error() {
        let step = JobStep::transcode(Uuid::new_v4(), "transcode.yaml", None);
        let failed = step.with_new_status(JobStatus::Failed, Some("codec missing"));

        assert!(failed.base().end_time.is_some());
        assert_eq!(failed.last_error(), Some("codec missing"));
    }

    #[test]
    fn test_discriminant_is_written() {
        let step = JobStep::thumbnail(Uuid::new_v4(), "thumb.yaml", 2.5, None);
        let json = serde_json::to_value(&step).unwrap();

        assert_eq!(json["stepType"], "thumbnail");
        assert_eq!(json["jobStepStatus"], 0);
        assert_eq!(json["thumbnailFrameSeconds"], 2.5);
    }

    #[test]
    fn test_variant_survives_round_trip() {
        let mut args = BTreeMap::new();
        args.insert("EXTRA".to_string(), "1".to_string());
        let steps = vec![
            JobStep::analysis(Uuid::new_v4(), "a.yaml"),
            JobStep::thumbnail(Uuid::new_v4(), "t.yaml", 1.0, None),
            JobStep::transcode(Uuid::new_v4(), "x.yaml", None),
            JobStep::custom(Uuid::new_v4(), "c.yaml", args),
        ];

        for step in steps {
            let json = serde_json::to_string(&step).unwrap();
            let back: JobStep = serde_json::from_str(&json).unwrap();
            assert_eq!(back.kind(), step.kind());
            assert_eq!(back, step);
        }
    }

    #[test]
    fn test_unknown_discriminant_is_rejected() {
        let json = format!(
            r#"{{"stepType": "teleport", "jobStepId": "{}", "jobContainerId": "{}", "jobStepStatus": 0}}"#,
            Uuid::new_v4(),
            Uuid::new_v4()
        );
        assert!(serde_json::from_str::<JobStep>(&json).is_err());
    }

    #[test]
    fn test_output_id_only_for_result_bearing_steps() {
        let output = Uuid::new_v4();
        let analysis = JobStep::analysis(Uuid::new_v4(), "a.yaml").with_output_id(output);
        let custom = JobStep::custom(Uuid::new_v4(), "c.yaml", BTreeMap::new()).with_output_id(output);

        assert_eq!(analysis.output_id(), Some(output));
        assert_eq!(custom.output_id(), None);
    }
}
