//! Known transcode settings, looked up by id.

use std::collections::HashMap;
use std::path::Path;

use tracing::info;
use uuid::Uuid;

use mflip_models::{SettingsSummary, TranscodeSettings};

use crate::error::{TemplateError, TemplateResult};
use crate::loader::load_definitions;

#[derive(Debug, Clone, Default)]
pub struct TranscodeSettingsManager {
    known: HashMap<Uuid, TranscodeSettings>,
}

impl TranscodeSettingsManager {
    pub fn from_settings(settings: Vec<TranscodeSettings>) -> TemplateResult<Self> {
        let mut known = HashMap::with_capacity(settings.len());
        for s in settings {
            let id = s.settings_id();
            if known.insert(id, s).is_some() {
                return Err(TemplateError::Duplicate(id));
            }
        }
        Ok(Self { known })
    }

    /// Load every settings definition under `path`.
    pub fn load(path: &Path) -> TemplateResult<Self> {
        let manager = Self::from_settings(load_definitions(path)?)?;
        info!(count = manager.known.len(), path = %path.display(), "Loaded transcode settings");
        Ok(manager)
    }

    pub fn get_setting(&self, id: Uuid) -> Option<&TranscodeSettings> {
        self.known.get(&id)
    }

    /// Resolve a settings id as written in a template step.
    pub fn resolve(&self, raw_id: Option<&str>) -> TemplateResult<TranscodeSettings> {
        let raw_id = raw_id
            .filter(|s| !s.is_empty())
            .ok_or(TemplateError::MissingSettingsId)?;
        let id = Uuid::parse_str(raw_id)
            .map_err(|_| TemplateError::InvalidSettingsId(raw_id.to_string()))?;
        self.get_setting(id)
            .cloned()
            .ok_or(TemplateError::SettingsNotFound(id))
    }

    pub fn list_settings(&self) -> Vec<TranscodeSettings> {
        let mut all: Vec<_> = self.known.values().cloned().collect();
        all.sort_by_key(|s| s.summarise().name);
        all
    }

    pub fn list_summary(&self) -> Vec<SettingsSummary> {
        self.list_settings().iter().map(|s| s.summarise()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const IMAGE_SETTINGS: &str = r#"[
        {"settingsid": "1b57e2a1-4a7e-4f35-a7f8-3c6f0bb5ef65", "name": "thumb",
         "scale_x": 640, "scale_y": 360},
        {"settingsid": "2c57e2a1-4a7e-4f35-a7f8-3c6f0bb5ef65", "name": "poster",
         "scale_x": 1920, "x_max_size": true, "scale_y": 1080}
    ]"#;

    #[test]
    fn test_load_directory_and_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("images.json")).unwrap();
        file.write_all(IMAGE_SETTINGS.as_bytes()).unwrap();
        std::fs::write(dir.path().join("README.txt"), "ignored").unwrap();

        let manager = TranscodeSettingsManager::load(dir.path()).unwrap();
        assert_eq!(manager.list_summary().len(), 2);
        assert_eq!(manager.list_summary()[0].name, "poster");

        let resolved = manager
            .resolve(Some("1b57e2a1-4a7e-4f35-a7f8-3c6f0bb5ef65"))
            .unwrap();
        assert_eq!(resolved.summarise().name, "thumb");
    }

    #[test]
    fn test_resolve_failures() {
        let manager = TranscodeSettingsManager::default();

        assert!(matches!(manager.resolve(None), Err(TemplateError::MissingSettingsId)));
        assert!(matches!(manager.resolve(Some("")), Err(TemplateError::MissingSettingsId)));
        assert!(matches!(
            manager.resolve(Some("not-a-uuid")),
            Err(TemplateError::InvalidSettingsId(_))
        ));
        assert!(matches!(
            manager.resolve(Some(&Uuid::new_v4().to_string())),
            Err(TemplateError::SettingsNotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let one: TranscodeSettings = serde_json::from_str(
            r#"{"settingsid": "1b57e2a1-4a7e-4f35-a7f8-3c6f0bb5ef65", "name": "a", "scale_x": 1, "scale_y": 1}"#,
        )
        .unwrap();
        assert!(matches!(
            TranscodeSettingsManager::from_settings(vec![one.clone(), one]),
            Err(TemplateError::Duplicate(_))
        ));
    }
}
