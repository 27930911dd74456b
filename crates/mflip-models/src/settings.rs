//! Transcode settings passed to thumbnail and transcode workers.
//!
//! Two shapes exist: audio/video settings for ffmpeg and image settings for
//! an ImageMagick resize. Workers receive them as JSON and build their own
//! command lines. Both are serialized without a tag and told apart by their
//! fields.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Output scaling for video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleSettings {
    /// -1 preserves aspect
    #[serde(rename = "scalex")]
    pub scale_x: i32,
    #[serde(rename = "scaley")]
    pub scale_y: i32,
    #[serde(rename = "allowupscaling", default)]
    pub allow_upscaling: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoSettings {
    pub codec: String,
    /// Bytes per second; ignored when `crf` is set
    #[serde(default)]
    pub bitrate: i64,
    #[serde(default)]
    pub crf: i8,
    #[serde(default)]
    pub preset: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<ScaleSettings>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioSettings {
    pub codec: String,
    pub bitrate: i64,
    pub channels: i8,
    pub samplerate: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrapperSettings {
    pub format: String,
}

/// Audio/video transcode settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvSettings {
    #[serde(rename = "settingsid")]
    pub settings_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub video: VideoSettings,
    pub audio: AudioSettings,
    pub wrapper: WrapperSettings,
}

/// Still-image resize settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSettings {
    #[serde(rename = "settingsid")]
    pub settings_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub scale_x: i32,
    /// When set, `scale_x` is a maximum rather than an exact size
    #[serde(default)]
    pub x_max_size: bool,
    pub scale_y: i32,
    #[serde(default)]
    pub y_max_size: bool,
}

/// Id, name and description of a settings entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsSummary {
    #[serde(rename = "settingsid")]
    pub settings_id: Uuid,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TranscodeSettings {
    Av(AvSettings),
    Image(ImageSettings),
}

impl TranscodeSettings {
    pub fn settings_id(&self) -> Uuid {
        match self {
            TranscodeSettings::Av(s) => s.settings_id,
            TranscodeSettings::Image(s) => s.settings_id,
        }
    }

    pub fn summarise(&self) -> SettingsSummary {
        let (settings_id, name, description) = match self {
            TranscodeSettings::Av(s) => (s.settings_id, &s.name, &s.description),
            TranscodeSettings::Image(s) => (s.settings_id, &s.name, &s.description),
        };
        SettingsSummary {
            settings_id,
            name: name.clone(),
            description: description.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn av_json() -> &'static str {
        r#"{
            "settingsid": "a7bc7e39-fda6-4b07-9a1a-a1e3e3bd6a4b",
            "name": "WebM",
            "description": "webm proxy",
            "video": {"codec": "vp8", "bitrate": 0, "crf": 20, "preset": "",
                      "scale": {"scalex": 1280, "scaley": -1}},
            "audio": {"codec": "opus", "bitrate": 96000, "channels": 2, "samplerate": 48000},
            "wrapper": {"format": "webm"}
        }"#
    }

    #[test]
    fn test_untagged_shapes_decode_to_matching_variant() {
        let av: TranscodeSettings = serde_json::from_str(av_json()).unwrap();
        assert!(matches!(av, TranscodeSettings::Av(_)));

        let image: TranscodeSettings = serde_json::from_str(
            r#"{"settingsid": "1b57e2a1-4a7e-4f35-a7f8-3c6f0bb5ef65", "name": "thumb",
                "scale_x": 640, "x_max_size": true, "scale_y": 360}"#,
        )
        .unwrap();
        assert!(matches!(image, TranscodeSettings::Image(_)));
        assert_eq!(image.summarise().name, "thumb");
    }

    #[test]
    fn test_av_round_trips_through_worker_json() {
        let av: TranscodeSettings = serde_json::from_str(av_json()).unwrap();
        let json = serde_json::to_value(&av).unwrap();
        assert_eq!(json["video"]["scale"]["scalex"], 1280);
        assert!(json["video"]["scale"].get("allowupscaling").is_some());
        assert_eq!(av.summarise().name, "WebM");
        assert_eq!(av.settings_id().to_string(), "a7bc7e39-fda6-4b07-9a1a-a1e3e3bd6a4b");
    }
}
