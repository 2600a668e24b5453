use crate::component::video_compressor::CompressionPreset;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

pub const MAX_RECENT_PATHS: usize = 10;
pub const DEFAULT_MAX_WORKERS: usize = 2;
pub const DEFAULT_PRESET: &str = "web";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Language {
    #[default]
    #[serde(rename = "en-US")]
    English,
    #[serde(rename = "zh-TW")]
    TraditionalChinese,
}

impl Language {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::English => "en-US",
            Self::TraditionalChinese => "zh-TW",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::English => write!(f, "English"),
            Self::TraditionalChinese => write!(f, "繁體中文"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressorSettings {
    pub default_preset: String,
    pub max_workers: usize,
    /// Batch output directory; `None` writes next to each input
    pub output_dir: Option<PathBuf>,
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
    pub preserve_alpha_when_detected: bool,
}

impl Default for CompressorSettings {
    fn default() -> Self {
        Self {
            default_preset: DEFAULT_PRESET.to_string(),
            max_workers: DEFAULT_MAX_WORKERS,
            output_dir: None,
            ffmpeg_path: None,
            ffprobe_path: None,
            preserve_alpha_when_detected: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    pub language: Language,
    pub compressor: CompressorSettings,
    /// Registered after the built-ins and allowed to replace them
    pub custom_presets: BTreeMap<String, CompressionPreset>,
    /// Most recent first
    pub recent_paths: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub settings: UserSettings,
}
