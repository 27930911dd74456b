//! Pipeline templates and container construction.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use mflip_models::{ItemType, JobContainer, JobStep, TranscodeSettings};

use crate::error::{TemplateError, TemplateResult};
use crate::loader::load_definitions;
use crate::settings::TranscodeSettingsManager;

/// One step of a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStepTemplateDefinition {
    pub id: Uuid,
    /// `analysis`, `thumbnail`, `transcode` or `custom`
    pub predetermined_type: String,
    pub worker_template: String,
    #[serde(default)]
    pub in_progress_label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcode_settings_id: Option<String>,
    #[serde(default)]
    pub thumbnail_frame_seconds: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_arguments: BTreeMap<String, String>,
}

/// A named, linear pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobTemplateDefinition {
    pub id: Uuid,
    pub name: String,
    pub steps: Vec<JobStepTemplateDefinition>,
    #[serde(default)]
    pub output_path: String,
}

/// Builds containers from templates.
pub trait TemplateResolver: Send + Sync {
    /// Build a fresh container for `template_id`.
    fn new_job_container(&self, template_id: Uuid, item_type: ItemType) -> TemplateResult<JobContainer>;

    fn list_templates(&self) -> Vec<JobTemplateDefinition>;

    fn get_template(&self, template_id: Uuid) -> Option<JobTemplateDefinition>;
}

#[derive(Debug, Clone)]
pub struct JobTemplateManager {
    templates: HashMap<Uuid, JobTemplateDefinition>,
    settings: TranscodeSettingsManager,
}

impl JobTemplateManager {
    pub fn new(
        templates: Vec<JobTemplateDefinition>,
        settings: TranscodeSettingsManager,
    ) -> TemplateResult<Self> {
        let mut by_id = HashMap::with_capacity(templates.len());
        for template in templates {
            let id = template.id;
            if by_id.insert(id, template).is_some() {
                return Err(TemplateError::Duplicate(id));
            }
        }
        Ok(Self {
            templates: by_id,
            settings,
        })
    }

    /// Load every template definition under `path`.
    pub fn load(path: &Path, settings: TranscodeSettingsManager) -> TemplateResult<Self> {
        let manager = Self::new(load_definitions(path)?, settings)?;
        info!(count = manager.templates.len(), path = %path.display(), "Loaded job templates");
        Ok(manager)
    }

    pub fn settings(&self) -> &TranscodeSettingsManager {
        &self.settings
    }

    /// Settings for a step, or `None` with a warning. The step then fails
    /// when it is dispatched rather than blocking the whole container.
    /// Settings named by a template step. A step that names none gets `None`.
    fn step_settings(&self, step: &JobStepTemplateDefinition) -> TemplateResult<Option<TranscodeSettings>> {
        match step.transcode_settings_id.as_deref() {
            None | Some("") => Ok(None),
            raw => self.settings.resolve(raw).map(Some),
        }
    }

    fn settings_for(&self, template_id: Uuid, step: &JobStepTemplateDefinition) -> Option<TranscodeSettings> {
        match self.step_settings(step) {
            Ok(s) => s,
            Err(e) => {
                warn!(
                    template_id = %template_id,
                    step_template_id = %step.id,
                    "Could not get transcode settings: {}", e
                );
                None
            }
        }
    }
}

impl TemplateResolver for JobTemplateManager {
    fn new_job_container(&self, template_id: Uuid, item_type: ItemType) -> TemplateResult<JobContainer> {
        let template = self
            .templates
            .get(&template_id)
            .ok_or(TemplateError::TemplateNotFound(template_id))?;

        let mut container =
            JobContainer::new(template_id, item_type).with_output_path(template.output_path.clone());

        for step in &template.steps {
            let built = match step.predetermined_type.as_str() {
                "analysis" => JobStep::analysis(container.id, &step.worker_template),
                "thumbnail" => JobStep::thumbnail(
                    container.id,
                    &step.worker_template,
                    step.thumbnail_frame_seconds,
                    self.settings_for(template_id, step),
                ),
                "transcode" => JobStep::transcode(
                    container.id,
                    &step.worker_template,
                    self.settings_for(template_id, step),
                ),
                "custom" => JobStep::custom(
                    container.id,
                    &step.worker_template,
                    step.custom_arguments.clone(),
                ),
                other => {
                    warn!(
                        template_id = %template_id,
                        step_template_id = %step.id,
                        "Skipping unrecognised step type '{}'", other
                    );
                    continue;
                }
            };
            container.steps.push(built.with_item_type(item_type));
        }

        Ok(container)
    }

    fn list_templates(&self) -> Vec<JobTemplateDefinition> {
        let mut all: Vec<_> = self.templates.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    fn get_template(&self, template_id: Uuid) -> Option<JobTemplateDefinition> {
        self.templates.get(&template_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mflip_models::{JobStatus, StepKind};
    use std::collections::HashSet;

    const SETTINGS_ID: &str = "1b57e2a1-4a7e-4f35-a7f8-3c6f0bb5ef65";

    fn settings() -> TranscodeSettingsManager {
        let s: TranscodeSettings = serde_json::from_str(&format!(
            r#"{{"settingsid": "{}", "name": "thumb", "scale_x": 640, "scale_y": 360}}"#,
            SETTINGS_ID
        ))
        .unwrap();
        TranscodeSettingsManager::from_settings(vec![s]).unwrap()
    }

    fn step(kind: &str, settings_id: Option<&str>) -> JobStepTemplateDefinition {
        JobStepTemplateDefinition {
            id: Uuid::new_v4(),
            predetermined_type: kind.to_string(),
            worker_template: format!("{}.yaml", kind),
            in_progress_label: String::new(),
            transcode_settings_id: settings_id.map(str::to_string),
            thumbnail_frame_seconds: 3.0,
            custom_arguments: BTreeMap::new(),
        }
    }

    fn manager(steps: Vec<JobStepTemplateDefinition>) -> (JobTemplateManager, Uuid) {
        let template = JobTemplateDefinition {
            id: Uuid::new_v4(),
            name: "Video proxy".to_string(),
            steps,
            output_path: "/srv/proxies".to_string(),
        };
        let id = template.id;
        (JobTemplateManager::new(vec![template], settings()).unwrap(), id)
    }

    #[test]
    fn test_missing_template_is_not_found() {
        let (mgr, _) = manager(vec![]);
        let missing = Uuid::new_v4();
        assert!(matches!(
            mgr.new_job_container(missing, ItemType::Video),
            Err(TemplateError::TemplateNotFound(id)) if id == missing
        ));
    }

    #[test]
    fn test_builds_steps_in_order_with_fresh_ids() {
        let (mgr, template_id) = manager(vec![
            step("analysis", None),
            step("thumbnail", Some(SETTINGS_ID)),
            step("transcode", Some(SETTINGS_ID)),
            step("custom", None),
        ]);
        let container = mgr.new_job_container(template_id, ItemType::Video).unwrap();

        let kinds: Vec<StepKind> = container.steps.iter().map(|s| s.kind()).collect();
        assert_eq!(
            kinds,
            vec![StepKind::Analysis, StepKind::Thumbnail, StepKind::Transcode, StepKind::Custom]
        );

        let ids: HashSet<Uuid> = container.steps.iter().map(|s| s.id()).collect();
        assert_eq!(ids.len(), 4);
        assert!(!ids.contains(&container.id));
        assert!(container.steps.iter().all(|s| s.container_id() == container.id));
        assert!(container.steps.iter().all(|s| s.status() == JobStatus::Pending));
        assert!(container.steps.iter().all(|s| s.base().item_type == ItemType::Video));

        assert_eq!(container.template_id, template_id);
        assert_eq!(container.output_path, "/srv/proxies");
        assert_eq!(container.status, JobStatus::Pending);
        assert!(container.start_time.is_some());
        assert!(container.steps[1].transcode_settings().is_some());
    }

    #[test]
    fn test_two_builds_never_share_ids() {
        let (mgr, template_id) = manager(vec![step("analysis", None)]);
        let a = mgr.new_job_container(template_id, ItemType::Audio).unwrap();
        let b = mgr.new_job_container(template_id, ItemType::Audio).unwrap();

        assert_ne!(a.id, b.id);
        assert_ne!(a.steps[0].id(), b.steps[0].id());
    }

    #[test]
    fn test_missing_settings_is_soft() {
        let (mgr, template_id) = manager(vec![
            step("transcode", Some(&Uuid::new_v4().to_string())),
            step("thumbnail", None),
        ]);
        let container = mgr.new_job_container(template_id, ItemType::Video).unwrap();

        assert_eq!(container.steps.len(), 2);
        assert!(container.steps.iter().all(|s| s.transcode_settings().is_none()));
    }

    #[test]
    fn test_step_without_settings_id_is_not_an_error() {
        let (mgr, _) = manager(vec![]);

        assert!(mgr.step_settings(&step("thumbnail", None)).unwrap().is_none());
        assert!(mgr.step_settings(&step("thumbnail", Some(""))).unwrap().is_none());
        assert!(mgr.step_settings(&step("thumbnail", Some(SETTINGS_ID))).unwrap().is_some());
        assert!(matches!(
            mgr.step_settings(&step("transcode", Some("not-a-uuid"))),
            Err(TemplateError::InvalidSettingsId(_))
        ));
    }

    #[test]
    fn test_unknown_step_type_is_skipped() {
        let (mgr, template_id) = manager(vec![
            step("analysis", None),
            step("teleport", None),
            step("custom", None),
        ]);
        let container = mgr.new_job_container(template_id, ItemType::Image).unwrap();

        assert_eq!(container.steps.len(), 2);
        assert_eq!(container.steps[1].kind(), StepKind::Custom);
    }

    #[test]
    fn test_load_template_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("templates.json");
        let template_id = Uuid::new_v4();
        std::fs::write(
            &path,
            format!(
                r#"{{"id": "{}", "name": "Audio", "outputPath": "/out",
                    "steps": [{{"id": "{}", "predeterminedType": "analysis",
                                "workerTemplate": "analysis.yaml"}}]}}"#,
                template_id,
                Uuid::new_v4()
            ),
        )
        .unwrap();

        let mgr = JobTemplateManager::load(&path, settings()).unwrap();
        assert_eq!(mgr.list_templates().len(), 1);
        assert_eq!(mgr.get_template(template_id).unwrap().name, "Audio");
    }
}
