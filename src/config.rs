// =============================================================================
// CONFIGURATION - Load settings from gpu_bridge.toml
// =============================================================================
//
// This module handles loading and parsing configuration from gpu_bridge.toml
// (or the file named by GPU_BRIDGE_CONFIG). Provides sensible defaults if the
// config file is missing or has errors.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backend::software::SoftDeviceDesc;
use crate::options::{ContextOptions, RecorderOptions};

pub const DEFAULT_CONFIG_PATH: &str = "gpu_bridge.toml";
pub const CONFIG_PATH_ENV: &str = "GPU_BRIDGE_CONFIG";

/// Root configuration structure
#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub context: ContextOptions,
    pub recorder: RecorderOptions,
    pub software: SoftwareConfig,
    pub logging: LoggingConfig,
    pub demo: DemoConfig,
}

/// Emulated device settings
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct SoftwareConfig {
    pub label: String,
    pub max_texture_dimension: i32,
    /// Artificial GPU latency per submission, in milliseconds.
    pub execution_delay_ms: u64,
}

impl Default for SoftwareConfig {
    fn default() -> Self {
        let desc = SoftDeviceDesc::default();
        Self {
            label: desc.label,
            max_texture_dimension: desc.max_texture_dimension,
            execution_delay_ms: 0,
        }
    }
}

impl SoftwareConfig {
    pub fn device_desc(&self) -> SoftDeviceDesc {
        SoftDeviceDesc {
            label: self.label.clone(),
            max_texture_dimension: self.max_texture_dimension,
            execution_delay: Duration::from_millis(self.execution_delay_ms),
        }
    }
}

/// Logging settings
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level filter used when RUST_LOG is not set.
    pub level: String,
    pub log_to_file: bool,
    pub log_file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_to_file: false,
            log_file: "gpu_bridge.log".to_string(),
        }
    }
}

/// Demo binary settings
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct DemoConfig {
    /// "software" or "vulkan"
    pub backend: String,
    pub frames: u32,
    pub width: i32,
    pub height: i32,
    pub clear_color: [f32; 4],
    /// Block on every frame instead of only the last one.
    pub sync_every_frame: bool,
    pub validation_layers: bool,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            backend: "software".to_string(),
            frames: 3,
            width: 256,
            height: 256,
            clear_color: [0.1, 0.2, 0.8, 1.0],
            sync_every_frame: false,
            validation_layers: false,
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        let path = Self::default_path();
        Self::load_from_path(&path).unwrap_or_else(|e| {
            log::warn!("Failed to load {:?}: {:#}. Using defaults.", path, e);
            Config::default()
        })
    }

    /// `GPU_BRIDGE_CONFIG` if set, else `gpu_bridge.toml` in the working directory.
    pub fn default_path() -> PathBuf {
        std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_sections_use_defaults() {
        let config = Config::parse(
            r#"
            [context]
            require_ordered_recordings = true

            [software]
            execution_delay_ms = 5
            "#,
        )
        .unwrap();

        assert!(config.context.require_ordered_recordings);
        assert_eq!(config.context.max_in_flight_submissions, 8);
        assert_eq!(config.recorder, RecorderOptions::default());
        assert_eq!(
            config.software.device_desc().execution_delay,
            Duration::from_millis(5)
        );
        assert_eq!(config.demo.backend, "software");
    }

    #[test]
    fn recorder_override_parses() {
        let config = Config::parse(
            r#"
            [recorder]
            gpu_budget_bytes = 1024
            require_ordered_recordings = false
            "#,
        )
        .unwrap();
        assert_eq!(config.recorder.gpu_budget_bytes, 1024);
        assert_eq!(config.recorder.require_ordered_recordings, Some(false));
    }

    #[test]
    fn type_errors_are_reported() {
        assert!(Config::parse("[demo]\nframes = \"many\"").is_err());
    }

    #[test]
    fn absent_file_yields_defaults() {
        let config = Config::load_from_path("/nonexistent/gpu_bridge.toml").unwrap();
        assert_eq!(config, Config::default());
    }
}
