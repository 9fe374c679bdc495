//! Stage Configuration
//!
//! Engine and stage settings stored in TOML format, validated once per
//! activation before any engine is constructed.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::StageError;

/// Settings handed to the ALPR engine when a handle is constructed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Country code used to locate the license plate (e.g. "us", "eu")
    pub country_code: String,
    /// Location of the engine configuration file
    pub config_path: PathBuf,
    /// Location of the engine runtime data (detection models, OCR data)
    pub runtime_data_path: PathBuf,
    /// Maximum number of candidates reported per detected plate
    pub top_n: u32,
    /// Default region for pattern matching (only honoured by some country codes)
    pub default_region: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            country_code: "us".to_string(),
            config_path: PathBuf::from("/etc/openalpr/openalpr.conf"),
            runtime_data_path: PathBuf::from("/usr/share/openalpr/runtime_data"),
            top_n: 10,
            default_region: "ga".to_string(),
        }
    }
}

/// Full configuration surface of the recognition stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    /// Read every unit's image from this file instead of the unit content.
    /// Bench/smoke testing only.
    pub image_source_override: Option<PathBuf>,
    /// Number of engine handles built per activation
    pub pool_size: usize,
    /// Deadline for a single recognize call; unset blocks until the engine returns
    pub recognize_timeout_ms: Option<u64>,
    /// Engine settings
    pub engine: EngineConfig,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            image_source_override: None,
            pool_size: 1,
            recognize_timeout_ms: None,
            engine: EngineConfig::default(),
        }
    }
}

impl StageConfig {
    /// Check every field before an activation may start
    pub fn validate(&self) -> Result<(), StageError> {
        let engine = &self.engine;

        if engine.country_code.trim().is_empty() {
            return Err(StageError::config("country_code", "must not be empty"));
        }
        if engine.config_path.as_os_str().is_empty() {
            return Err(StageError::config("config_path", "must not be empty"));
        }
        if engine.runtime_data_path.as_os_str().is_empty() {
            return Err(StageError::config("runtime_data_path", "must not be empty"));
        }
        if engine.default_region.trim().is_empty() {
            return Err(StageError::config("default_region", "must not be empty"));
        }
        if self.pool_size == 0 {
            return Err(StageError::config("pool_size", "must be at least 1"));
        }
        if self.recognize_timeout_ms == Some(0) {
            return Err(StageError::config(
                "recognize_timeout_ms",
                "must be greater than zero when set",
            ));
        }
        if let Some(path) = &self.image_source_override {
            if path.as_os_str().is_empty() {
                return Err(StageError::config(
                    "image_source_override",
                    "must not be empty when set",
                ));
            }
            warn!(
                "Image source override is set to {:?}; incoming unit content will be ignored",
                path
            );
        }

        Ok(())
    }

    /// Operator-facing name of a configuration field
    pub fn describe_field(field: &str) -> &'static str {
        match field {
            "country_code" => "OpenALPR Country Code",
            "config_path" => "OpenALPR Configuration File Path",
            "runtime_data_path" => "OpenALPR Runtime File Path",
            "top_n" => "OpenALPR topN",
            "default_region" => "OpenALPR Default Region",
            "image_source_override" => "License Plate Image",
            "pool_size" => "Engine Pool Size",
            "recognize_timeout_ms" => "Recognition Timeout",
            _ => "Unknown Property",
        }
    }
}

/// Get the default location of the stage configuration file
pub fn default_config_path() -> Result<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("com", "alprstage", "alpr-stage")
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

    Ok(proj_dirs.config_dir().join("stage.toml"))
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<StageConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: StageConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &StageConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
