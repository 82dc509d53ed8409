//! Configuration management for stagefocus.
//!
//! Provides configuration loading, saving, and defaults for the scan
//! control loop and the simulated device characteristics used when running
//! without hardware.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::axis::SimulatedAxisConfig;
use crate::errors::FocusError;
use crate::scan::ScanOptions;
use crate::source::SimulatedSourceConfig;
use crate::types::ScanRange;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageFocusConfig {
    /// Sweep issued when the CLI gets no explicit range
    pub default_range: ScanRange,
    /// Control-loop tunables
    pub scan: ScanOptions,
    /// Simulated camera characteristics
    pub source: SimulatedSourceConfig,
    /// Simulated stage characteristics
    pub axis: SimulatedAxisConfig,
}

impl Default for StageFocusConfig {
    fn default() -> Self {
        Self {
            default_range: ScanRange::new(0.0, 10.0, 1.0),
            scan: ScanOptions::default(),
            source: SimulatedSourceConfig::default(),
            axis: SimulatedAxisConfig::default(),
        }
    }
}

impl StageFocusConfig {
    /// Load configuration from TOML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, FocusError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).map_err(|e| {
            FocusError::DeviceUnavailable(format!("Failed to read config file: {}", e))
        })?;

        let config: StageFocusConfig = toml::from_str(&contents).map_err(|e| {
            FocusError::DeviceUnavailable(format!("Failed to parse config file: {}", e))
        })?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to TOML file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), FocusError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                FocusError::DeviceUnavailable(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = toml::to_string_pretty(self).map_err(|e| {
            FocusError::DeviceUnavailable(format!("Failed to serialize config: {}", e))
        })?;

        fs::write(path, toml_string).map_err(|e| {
            FocusError::DeviceUnavailable(format!("Failed to write config file: {}", e))
        })?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path.
    pub fn default_path() -> PathBuf {
        PathBuf::from("stagefocus.toml")
    }

    /// Load from default location or fall back to defaults.
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }
}
