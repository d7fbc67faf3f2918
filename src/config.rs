use log::warn;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::dmk::Density;

/// Configuration file name
const CONFIG_FILE: &str = "dmkfdc.toml";

/// Density of images made by `--create`
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum DensityConfig {
    Single,
    Double,
}

impl Default for DensityConfig {
    fn default() -> Self {
        DensityConfig::Double
    }
}

impl From<DensityConfig> for Density {
    fn from(config: DensityConfig) -> Self {
        match config {
            DensityConfig::Single => Density::Single,
            DensityConfig::Double => Density::Double,
        }
    }
}

/// Coarse controller timing, in scheduler ticks.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(default)]
pub struct Timing {
    /// Ticks between a read command and its first DRQ, and after a write
    pub settle_ticks: u32,
    /// Ticks per disk revolution
    pub rotation_ticks: u32,
    /// Ticks the index pulse stays high each revolution
    pub index_ticks: u32,
    /// Ticks the motor keeps turning after a drive select
    pub motor_on_ticks: u32,
    /// Sleep between scheduler ticks
    pub tick_interval_us: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Timing {
            settle_ticks: 5,
            rotation_ticks: 200,
            index_ticks: 5,
            motor_on_ticks: 2000,
            tick_interval_us: 10,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub drive0: Option<String>,
    pub drive1: Option<String>,
    pub drive2: Option<String>,
    pub drive3: Option<String>,

    pub create_density: DensityConfig,

    pub timing: Timing,
}

impl Config {
    /// Load configuration from file, or return default if file doesn't exist
    pub fn load() -> Self {
        Self::load_from_path(CONFIG_FILE)
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            return Config::default();
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    warn!("Failed to parse {}: {}", path.display(), e);
                    warn!("Using default configuration.");
                    Config::default()
                }
            },
            Err(e) => {
                warn!("Failed to read {}: {}", path.display(), e);
                warn!("Using default configuration.");
                Config::default()
            }
        }
    }

    /// Apply command-line overrides to the configuration.
    /// CLI arguments take priority over TOML config file settings.
    pub fn apply_cli_overrides(&mut self, drives: [Option<&str>; 4], single_density: bool) {
        let slots = [&mut self.drive0, &mut self.drive1, &mut self.drive2, &mut self.drive3];
        for (slot, path) in slots.into_iter().zip(drives) {
            if let Some(path) = path {
                *slot = Some(path.to_string());
            }
        }
        if single_density {
            self.create_density = DensityConfig::Single;
        }
    }

    pub fn drive_paths(&self) -> [Option<&str>; 4] {
        [
            self.drive0.as_deref(),
            self.drive1.as_deref(),
            self.drive2.as_deref(),
            self.drive3.as_deref(),
        ]
    }
}
