/// Thumbnail cache configuration
///
/// Every field has a default, so an empty JSON object is a valid config file.
/// Values are validated once when the service is constructed.
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use sysinfo::System;

use crate::error::ConfigError;

const MIB: u64 = 1024 * 1024;

/// Used when the available system memory cannot be determined
const FALLBACK_MEMORY_BUDGET: u64 = 64 * MIB;

/// Tunables for both cache tiers and the decode pipeline
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ThumbnailConfig {
    /// Directory holding one compressed file per cache key
    pub cache_dir: PathBuf,

    /// Byte budget of the in-memory tier
    pub memory_budget_bytes: u64,

    /// Byte budget of the on-disk tier
    pub disk_budget_bytes: u64,

    /// A trim pass deletes down to `disk_budget_bytes * disk_trim_target_ratio`
    pub disk_trim_target_ratio: f64,

    /// Leaders allowed to decode at the same time
    pub max_concurrent_decodes: usize,

    /// Handles per chunk in batch retrieval
    pub batch_chunk_size: usize,

    /// JPEG quality (1-100) for disk entries
    pub jpeg_quality: u8,

    /// Chance that a completed load triggers a disk trim
    pub trim_probability: f64,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            memory_budget_bytes: default_memory_budget(),
            disk_budget_bytes: 100 * MIB,
            disk_trim_target_ratio: 0.8,
            max_concurrent_decodes: 4,
            batch_chunk_size: 8,
            jpeg_quality: 75,
            trim_probability: 0.1,
        }
    }
}

impl ThumbnailConfig {
    /// Parse a config from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the config to pretty JSON
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Disk size a trim pass deletes down to
    pub fn disk_trim_target(&self) -> u64 {
        (self.disk_budget_bytes as f64 * self.disk_trim_target_ratio) as u64
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_decodes == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_decodes must be at least 1".into(),
            ));
        }
        if self.batch_chunk_size == 0 {
            return Err(ConfigError::Invalid(
                "batch_chunk_size must be at least 1".into(),
            ));
        }
        if !(self.disk_trim_target_ratio > 0.0 && self.disk_trim_target_ratio <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "disk_trim_target_ratio must be in (0, 1], got {}",
                self.disk_trim_target_ratio
            )));
        }
        if !(0.0..=1.0).contains(&self.trim_probability) {
            return Err(ConfigError::Invalid(format!(
                "trim_probability must be in [0, 1], got {}",
                self.trim_probability
            )));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(ConfigError::Invalid(format!(
                "jpeg_quality must be in 1..=100, got {}",
                self.jpeg_quality
            )));
        }
        Ok(())
    }
}

/// Get the default thumbnail cache directory
/// Returns ~/.cache/thumbcache/thumbnails on Linux
pub fn default_cache_dir() -> PathBuf {
    let mut path = dirs_next::cache_dir()
        .or_else(dirs_next::home_dir)
        .unwrap_or_else(std::env::temp_dir);

    path.push("thumbcache");
    path.push("thumbnails");
    path
}

/// One eighth of the currently available system memory
fn default_memory_budget() -> u64 {
    let mut system = System::new();
    system.refresh_memory();
    match system.available_memory() {
        0 => FALLBACK_MEMORY_BUDGET,
        available => available / 8,
    }
}
