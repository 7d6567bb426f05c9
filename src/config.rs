use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use log::{debug, info, warn, error};

use crate::error::ConfigError;

// Default values for configuration
pub const DEFAULT_FREQUENCY_HZ: f32 = 30.0;
pub const DEFAULT_FRAME_WIDTH: u32 = 640;
pub const DEFAULT_FRAME_HEIGHT: u32 = 480;
pub const APP_DIR_NAME: &str = "OverlayCompositor";

/// One registry row as persisted: enough to rebuild it with add + set_topic + set_enabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayEntry {
    pub plugin_class: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Pipeline settings that persist across sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Compositor output rate in hertz
    #[serde(default = "default_frequency_hz")]
    pub frequency_hz: f32,

    /// Base image topic, optionally followed by a transport name ("/camera compressed")
    #[serde(default)]
    pub base_topic: String,

    /// Overlays in draw order, bottom first
    #[serde(default)]
    pub overlays: Vec<OverlayEntry>,
}

fn default_frequency_hz() -> f32 {
    DEFAULT_FREQUENCY_HZ
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            frequency_hz: DEFAULT_FREQUENCY_HZ,
            base_topic: String::new(),
            overlays: Vec::new(),
        }
    }
}

impl PipelineSettings {
    /// Get the path to the settings file
    /// On macOS: ~/Library/Application Support/OverlayCompositor/settings.yaml
    /// On Linux: ~/.config/OverlayCompositor/settings.yaml
    /// On Windows: C:\Users\<user>\AppData\Roaming\OverlayCompositor\settings.yaml
    pub fn settings_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."));

        config_dir.join(APP_DIR_NAME).join("settings.yaml")
    }

    /// Load settings from the YAML file
    /// If custom_path is provided, uses that path; otherwise uses the default settings path.
    /// Missing or broken files fall back to defaults.
    pub fn load(custom_path: Option<&Path>) -> Self {
        let path = match custom_path {
            Some(p) => {
                info!("Using custom settings path: {}", p.display());
                p.to_path_buf()
            }
            None => Self::settings_path(),
        };

        if !path.exists() {
            info!("Settings file not found at {:?}, using defaults", path);
            return Self::default();
        }

        match Self::read(&path) {
            Ok(settings) => {
                info!("Loaded settings from {:?}", path);
                debug!("Settings: frequency={}Hz, base_topic='{}', overlays={}",
                    settings.frequency_hz, settings.base_topic, settings.overlays.len());
                settings
            }
            Err(e) => {
                error!("Failed to load settings file at {:?}: {}", path, e);
                warn!("Using default settings");
                Self::default()
            }
        }
    }

    /// Strict variant of [`PipelineSettings::load`]: read, parse and validate one file.
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let settings: Self = serde_yaml::from_str(&contents)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, serde_yaml::to_string(self)?)?;
        info!("Saved settings to {:?}", path);
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_frequency(self.frequency_hz)
    }
}

pub fn validate_frequency(frequency_hz: f32) -> Result<(), ConfigError> {
    if frequency_hz.is_finite() && frequency_hz > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidFrequency(frequency_hz))
    }
}
