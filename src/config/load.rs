use crate::component::video_compressor::PresetRegistry;
use crate::config::types::{Config, UserSettings};
use anyhow::{Context, Result};
use log::{info, warn};
use std::fs;
use std::path::Path;

pub const SETTINGS_FILE: &str = "settings.json";

impl Config {
    pub fn new() -> Result<Self> {
        Self::load_from(Path::new(SETTINGS_FILE))
    }

    /// A missing file yields defaults; a corrupt one is reported.
    pub fn load_from(path: &Path) -> Result<Self> {
        Ok(Self {
            settings: load_settings(path)?,
        })
    }

    /// Built-in presets plus the custom ones from settings.
    #[must_use]
    pub fn preset_registry(&self) -> PresetRegistry {
        let registry = PresetRegistry::with_builtin_presets();
        for (name, preset) in &self.settings.custom_presets {
            match registry.register(name, preset.clone(), true) {
                Ok(()) => info!("Loaded custom preset: {name}"),
                Err(e) => warn!("Skipping custom preset '{name}': {e}"),
            }
        }
        registry
    }
}

fn load_settings(path: &Path) -> Result<UserSettings> {
    if !path.exists() {
        return Ok(UserSettings::default());
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings from {}", path.display()))?;

    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse settings from {}", path.display()))
}
