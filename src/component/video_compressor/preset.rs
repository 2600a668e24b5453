//! Named compression profiles and parameter resolution.

use super::error::{CompressorError, CompressorResult};
use log::{debug, info};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{LazyLock, PoisonError, RwLock};

pub const CRF_RANGE: (u8, u8) = (0, 63);

static REGEX_BITRATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+(\.\d+)?[kKmM]?$").expect("Invalid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    Vp8,
    Vp9,
}

impl Codec {
    /// ffmpeg encoder library for this codec
    #[must_use]
    pub const fn encoder_library(self) -> &'static str {
        match self {
            Self::Vp8 => "libvpx",
            Self::Vp9 => "libvpx-vp9",
        }
    }

    #[must_use]
    pub const fn speed_flag(self) -> &'static str {
        match self {
            Self::Vp8 => "-cpu-used",
            Self::Vp9 => "-speed",
        }
    }

    /// Inclusive range accepted for `speed`
    #[must_use]
    pub const fn speed_range(self) -> (u8, u8) {
        match self {
            Self::Vp8 => (0, 16),
            Self::Vp9 => (0, 5),
        }
    }

    #[must_use]
    pub const fn supports_alpha(self) -> bool {
        matches!(self, Self::Vp9)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Vp8 => "vp8",
            Self::Vp9 => "vp9",
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Codec {
    type Err = CompressorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "vp8" => Ok(Self::Vp8),
            "vp9" => Ok(Self::Vp9),
            other => Err(CompressorError::InvalidParameter(format!(
                "invalid codec '{other}', must be 'vp8' or 'vp9'"
            ))),
        }
    }
}

/// ffmpeg-style bitrate such as `1M`, `1.5M` or `500k`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Bitrate(String);

impl Bitrate {
    pub fn new(value: impl Into<String>) -> CompressorResult<Self> {
        let value = value.into();
        if REGEX_BITRATE.is_match(&value) {
            Ok(Self(value))
        } else {
            Err(CompressorError::InvalidParameter(format!(
                "invalid bitrate '{value}', expected a number optionally followed by k or M"
            )))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Bitrate {
    type Error = CompressorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Bitrate> for String {
    fn from(value: Bitrate) -> Self {
        value.0
    }
}

impl fmt::Display for Bitrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = CompressorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            CompressorError::InvalidParameter(format!(
                "invalid resolution '{s}', expected WIDTHxHEIGHT"
            ))
        };
        let (w, h) = s.trim().split_once(['x', 'X']).ok_or_else(invalid)?;
        let width = w.parse::<u32>().map_err(|_| invalid())?;
        let height = h.parse::<u32>().map_err(|_| invalid())?;
        if width == 0 || height == 0 {
            return Err(invalid());
        }
        Ok(Self { width, height })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionPreset {
    /// Human readable name shown in listings
    pub label: String,
    pub codec: Codec,
    pub video_bitrate: Bitrate,
    pub audio_bitrate: Bitrate,
    pub crf: u8,
    pub speed: u8,
    #[serde(default)]
    pub max_resolution: Option<Resolution>,
    #[serde(default)]
    pub two_pass: bool,
}

impl CompressionPreset {
    pub fn validate(&self) -> CompressorResult<()> {
        validate_ranges(self.codec, self.crf, self.speed)
    }
}

fn validate_ranges(codec: Codec, crf: u8, speed: u8) -> CompressorResult<()> {
    let (crf_min, crf_max) = CRF_RANGE;
    if !(crf_min..=crf_max).contains(&crf) {
        return Err(CompressorError::InvalidParameter(format!(
            "crf must be between {crf_min}-{crf_max}, got {crf}"
        )));
    }

    let (speed_min, speed_max) = codec.speed_range();
    if !(speed_min..=speed_max).contains(&speed) {
        return Err(CompressorError::InvalidParameter(format!(
            "{codec} speed must be between {speed_min}-{speed_max}, got {speed}"
        )));
    }
    Ok(())
}

/// Caller-supplied replacements for individual preset fields.
///
/// Every field that is set replaces the preset value as a whole;
/// `max_resolution: Some(None)` removes the preset's resolution cap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresetOverrides {
    pub codec: Option<Codec>,
    pub video_bitrate: Option<Bitrate>,
    pub audio_bitrate: Option<Bitrate>,
    pub crf: Option<u8>,
    pub speed: Option<u8>,
    pub max_resolution: Option<Option<Resolution>>,
    pub two_pass: Option<bool>,
    pub preserve_alpha: bool,
}

impl PresetOverrides {
    #[must_use]
    pub fn with_alpha() -> Self {
        Self {
            preserve_alpha: true,
            ..Self::default()
        }
    }
}

/// Preset merged with overrides, validated and ready for command building.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectiveParameters {
    pub preset_name: String,
    pub codec: Codec,
    pub video_bitrate: Bitrate,
    pub audio_bitrate: Bitrate,
    pub crf: u8,
    pub speed: u8,
    pub max_resolution: Option<Resolution>,
    pub two_pass: bool,
    pub preserve_alpha: bool,
}

impl EffectiveParameters {
    fn merge(
        preset_name: &str,
        preset: &CompressionPreset,
        overrides: &PresetOverrides,
    ) -> CompressorResult<Self> {
        let params = Self {
            preset_name: preset_name.to_string(),
            codec: overrides.codec.unwrap_or(preset.codec),
            video_bitrate: overrides
                .video_bitrate
                .clone()
                .unwrap_or_else(|| preset.video_bitrate.clone()),
            audio_bitrate: overrides
                .audio_bitrate
                .clone()
                .unwrap_or_else(|| preset.audio_bitrate.clone()),
            crf: overrides.crf.unwrap_or(preset.crf),
            speed: overrides.speed.unwrap_or(preset.speed),
            max_resolution: overrides.max_resolution.unwrap_or(preset.max_resolution),
            two_pass: overrides.two_pass.unwrap_or(preset.two_pass),
            preserve_alpha: overrides.preserve_alpha,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> CompressorResult<()> {
        validate_ranges(self.codec, self.crf, self.speed)?;
        if self.preserve_alpha && !self.codec.supports_alpha() {
            return Err(CompressorError::InvalidParameter(format!(
                "alpha channel is only supported with vp9, but '{}' was specified",
                self.codec
            )));
        }
        Ok(())
    }
}

/// Process-wide preset table. Built-ins are ordinary entries.
#[derive(Debug)]
pub struct PresetRegistry {
    presets: RwLock<BTreeMap<String, CompressionPreset>>,
}

impl Default for PresetRegistry {
    fn default() -> Self {
        Self::with_builtin_presets()
    }
}

impl PresetRegistry {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            presets: RwLock::new(BTreeMap::new()),
        }
    }

    #[must_use]
    pub fn with_builtin_presets() -> Self {
        let presets = builtin_presets()
            .into_iter()
            .map(|(name, preset)| (name.to_string(), preset))
            .collect();
        Self {
            presets: RwLock::new(presets),
        }
    }

    /// Adds a preset. An existing name is rejected unless `overwrite` is set.
    pub fn register(
        &self,
        name: &str,
        preset: CompressionPreset,
        overwrite: bool,
    ) -> CompressorResult<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CompressorError::InvalidParameter(
                "preset name must not be empty".to_string(),
            ));
        }
        preset.validate()?;

        let mut presets = self.presets.write().unwrap_or_else(PoisonError::into_inner);
        if presets.contains_key(name) && !overwrite {
            return Err(CompressorError::DuplicateName(name.to_string()));
        }
        if presets.insert(name.to_string(), preset).is_some() {
            info!("Preset replaced: {name}");
        } else {
            debug!("Preset registered: {name}");
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> CompressorResult<CompressionPreset> {
        let presets = self.presets.read().unwrap_or_else(PoisonError::into_inner);
        presets
            .get(name)
            .cloned()
            .ok_or_else(|| CompressorError::UnknownPreset {
                name: name.to_string(),
                available: presets.keys().cloned().collect::<Vec<_>>().join(", "),
            })
    }

    pub fn resolve(
        &self,
        name: &str,
        overrides: &PresetOverrides,
    ) -> CompressorResult<EffectiveParameters> {
        let preset = self.get(name)?;
        EffectiveParameters::merge(name, &preset, overrides)
    }

    /// `(name, label)` pairs sorted by name
    #[must_use]
    pub fn list(&self) -> Vec<(String, String)> {
        self.presets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, preset)| (name.clone(), preset.label.clone()))
            .collect()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.presets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }
}

#[allow(clippy::too_many_arguments)]
fn builtin(
    label: &str,
    codec: Codec,
    video_bitrate: &str,
    audio_bitrate: &str,
    crf: u8,
    speed: u8,
    two_pass: bool,
    max_resolution: Option<Resolution>,
) -> CompressionPreset {
    CompressionPreset {
        label: label.to_string(),
        codec,
        video_bitrate: Bitrate(video_bitrate.to_string()),
        audio_bitrate: Bitrate(audio_bitrate.to_string()),
        crf,
        speed,
        max_resolution,
        two_pass,
    }
}

#[must_use]
pub fn builtin_presets() -> Vec<(&'static str, CompressionPreset)> {
    let full_hd = Some(Resolution::new(1920, 1080));
    vec![
        ("web", builtin("Web Optimized", Codec::Vp9, "1M", "128k", 31, 4, false, full_hd)),
        (
            "web-small",
            builtin(
                "Web Small",
                Codec::Vp9,
                "500k",
                "96k",
                35,
                4,
                false,
                Some(Resolution::new(1280, 720)),
            ),
        ),
        ("archive", builtin("Archive Quality", Codec::Vp9, "3M", "192k", 20, 1, true, None)),
        ("high-quality", builtin("High Quality", Codec::Vp9, "5M", "256k", 15, 2, true, None)),
        (
            "vp8-legacy",
            builtin("VP8 Legacy Compatible", Codec::Vp8, "1M", "128k", 10, 3, false, full_hd),
        ),
        (
            "alpha-web",
            builtin("Web with Alpha Channel", Codec::Vp9, "1.5M", "128k", 28, 3, false, full_hd),
        ),
    ]
}
