use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub separator: SeparatorConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    /// MIDI timeline spacing (seconds).
    #[serde(default = "default_resolution")]
    pub resolution: f64,
    #[serde(default = "default_window_size")]
    pub window_size: f64,
    #[serde(default = "default_hop_size")]
    pub hop_size: f64,
    /// RMS gate for batch audio analysis.
    #[serde(default = "default_volume_threshold")]
    pub volume_threshold: f32,
    /// RMS gate for live microphone buffers.
    #[serde(default = "default_live_volume_threshold")]
    pub live_volume_threshold: f32,
    #[serde(default = "default_silence_top_db")]
    pub silence_top_db: f32,
    /// Pitch sources tried in order for audio runs.
    #[serde(default = "default_detectors")]
    pub detectors: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_path")]
    pub path: PathBuf,
    #[serde(default = "default_pretty")]
    pub pretty: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeparatorConfig {
    #[serde(default = "default_separator_program")]
    pub program: String,
    #[serde(default = "default_separator_args")]
    pub args: Vec<String>,
    /// File name of the vocal stem inside the per-song output directory.
    #[serde(default = "default_separator_stem")]
    pub stem: String,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            resolution: default_resolution(),
            window_size: default_window_size(),
            hop_size: default_hop_size(),
            volume_threshold: default_volume_threshold(),
            live_volume_threshold: default_live_volume_threshold(),
            silence_top_db: default_silence_top_db(),
            detectors: default_detectors(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: default_output_path(),
            pretty: default_pretty(),
        }
    }
}

impl Default for SeparatorConfig {
    fn default() -> Self {
        Self {
            program: default_separator_program(),
            args: default_separator_args(),
            stem: default_separator_stem(),
        }
    }
}

pub fn default_resolution() -> f64 { 0.05 }
pub fn default_window_size() -> f64 { 0.1 }
pub fn default_hop_size() -> f64 { 0.05 }
fn default_volume_threshold() -> f32 { 0.02 }
fn default_live_volume_threshold() -> f32 { 0.003 }
fn default_silence_top_db() -> f32 { 20.0 }
fn default_detectors() -> Vec<String> { vec!["autocorrelation".into()] }
pub fn default_output_path() -> PathBuf { PathBuf::from("static/assets/music_pitch_data.json") }
fn default_pretty() -> bool { true }
fn default_separator_program() -> String { "spleeter".into() }
fn default_separator_args() -> Vec<String> {
    ["separate", "-p", "spleeter:2stems", "-o", "{output_dir}", "{input}"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_separator_stem() -> String { "vocals.wav".into() }

pub fn load_config(path: &Path) -> Option<Config> {
    let content = std::fs::read_to_string(path).ok()?;
    toml::from_str(&content).ok()
}

/// Explicit path, else ./pitchline.toml, else ~/.config/pitchline/config.toml,
/// else the platform config directory.
pub fn find_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let local = PathBuf::from("pitchline.toml");
    if local.exists() {
        return Some(local);
    }
    if let Some(home) = dirs::home_dir() {
        let xdg = home.join(".config").join("pitchline").join("config.toml");
        if xdg.exists() {
            return Some(xdg);
        }
    }
    if let Some(config_dir) = dirs::config_dir() {
        let platform = config_dir.join("pitchline").join("config.toml");
        if platform.exists() {
            return Some(platform);
        }
    }
    None
}
