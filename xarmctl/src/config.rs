/*!
Configuration management for the xarmctl application.
*/

use serde::{Deserialize, Serialize};
use std::path::Path;
use anyhow::{Context, Result};
use xarm::ControllerConfig;

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub controller: ControllerConfig,
    pub cli: CliConfig,
}

impl AppConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read xarmctl config {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Invalid controller/cli settings in {}", path.display()))
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self).context("Failed to render xarmctl config as TOML")?;

        std::fs::write(path, content).with_context(|| format!("Failed to write xarmctl config {}", path.display()))
    }
}

/// Command-line front end settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Transport designator, "USB" or a "COM…" port name
    pub device: String,

    /// Default move duration in milliseconds
    pub move_duration_ms: u16,

    /// Monitor loop period in milliseconds
    pub monitor_interval_ms: u64,

    /// Monitor loop iterations
    pub monitor_iterations: u32,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            device: "USB".to_string(),
            move_duration_ms: 1000,
            monitor_interval_ms: 10, // 100 Hz
            monitor_iterations: 100,
        }
    }
}
