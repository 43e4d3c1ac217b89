//! The persisted timeline file read by the player.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{Timeline, TimelineEntry, DEFAULT_RESOLUTION};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Midi,
    VocalAudio,
    VocalAudioOnly,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub bpm: Option<f64>,
    #[serde(default)]
    pub beat_times: Option<Vec<f64>>,
    #[serde(default)]
    pub source_file: Option<String>,
    #[serde(default)]
    pub source_type: Option<SourceType>,
    #[serde(default)]
    pub vocal_start_time: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineFile {
    pub timeline: Vec<TimelineEntry>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Older files hold only the bare entry array.
#[derive(Deserialize)]
#[serde(untagged)]
enum AnyTimelineFile {
    Full(TimelineFile),
    Legacy(Vec<TimelineEntry>),
}

impl TimelineFile {
    pub fn new(timeline: &Timeline, metadata: Metadata) -> Self {
        Self {
            timeline: timeline.entries.clone(),
            metadata,
        }
    }

    /// Rebuild a queryable timeline. The spacing is read back from the
    /// first two entries.
    pub fn to_timeline(&self) -> Timeline {
        let resolution = match self.timeline.as_slice() {
            [a, b, ..] if b.time > a.time => b.time - a.time,
            _ => DEFAULT_RESOLUTION,
        };
        Timeline::new(resolution, self.timeline.clone())
    }

    pub fn to_json(&self, pretty: bool) -> Result<String> {
        let json = if pretty {
            serde_json::to_string_pretty(self)
        } else {
            serde_json::to_string(self)
        };
        json.context("Failed to serialize timeline")
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let parsed: AnyTimelineFile =
            serde_json::from_str(json).context("Not a pitch timeline file")?;
        Ok(match parsed {
            AnyTimelineFile::Full(file) => file,
            AnyTimelineFile::Legacy(timeline) => Self {
                timeline,
                metadata: Metadata::default(),
            },
        })
    }

    pub fn save(&self, path: &Path, pretty: bool) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        std::fs::write(path, self.to_json(pretty)?)
            .with_context(|| format!("Failed to write timeline: {}", path.display()))?;
        log::info!("Saved {} entries to {}", self.timeline.len(), path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read timeline: {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("Failed to load {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TimelineFile {
        TimelineFile {
            timeline: vec![
                TimelineEntry { time: 0.0, pitch: None },
                TimelineEntry { time: 0.05, pitch: Some(261.6255653) },
                TimelineEntry { time: 0.1, pitch: Some(293.6647679) },
            ],
            metadata: Metadata {
                bpm: None,
                beat_times: None,
                source_file: Some("song.mid".into()),
                source_type: Some(SourceType::Midi),
                vocal_start_time: Some(0.05),
            },
        }
    }

    #[test]
    fn writes_documented_shape() {
        let json = sample().to_json(false).unwrap();
        assert_eq!(
            json,
            r#"{"timeline":[{"time":0.0,"pitch":null},{"time":0.05,"pitch":261.63},{"time":0.1,"pitch":293.66}],"metadata":{"bpm":null,"beat_times":null,"source_file":"song.mid","source_type":"midi","vocal_start_time":0.05}}"#
        );
    }

    #[test]
    fn source_type_names() {
        assert_eq!(
            serde_json::to_string(&SourceType::VocalAudioOnly).unwrap(),
            r#""vocal_audio_only""#
        );
        assert_eq!(
            serde_json::to_string(&SourceType::VocalAudio).unwrap(),
            r#""vocal_audio""#
        );
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("pitch.json");
        sample().save(&path, true).unwrap();

        let loaded = TimelineFile::load(&path).unwrap();
        assert_eq!(loaded.metadata, sample().metadata);
        assert_eq!(loaded.timeline[1].pitch, Some(261.63));

        let timeline = loaded.to_timeline();
        assert!((timeline.resolution - 0.05).abs() < 1e-9);
        assert_eq!(timeline.pitch_at(0.1), Some(293.66));
    }

    #[test]
    fn loads_legacy_array() {
        let file = TimelineFile::from_json(r#"[{"time":0.0,"pitch":null},{"time":0.1,"pitch":440.0}]"#)
            .unwrap();
        assert_eq!(file.metadata, Metadata::default());
        assert_eq!(file.timeline.len(), 2);
        assert!((file.to_timeline().resolution - 0.1).abs() < 1e-9);
    }

    #[test]
    fn loads_partial_metadata() {
        let file = TimelineFile::from_json(
            r#"{"timeline":[{"time":0.0,"pitch":220.0}],"metadata":{"bpm":98.5}}"#,
        )
        .unwrap();
        assert_eq!(file.metadata.bpm, Some(98.5));
        assert_eq!(file.metadata.source_type, None);
        assert_eq!(file.to_timeline().resolution, DEFAULT_RESOLUTION);
    }

    #[test]
    fn rejects_other_json() {
        assert!(TimelineFile::from_json(r#"{"foo": 1}"#).is_err());
        assert!(TimelineFile::load(Path::new("/nonexistent/pitch.json")).is_err());
    }
}
