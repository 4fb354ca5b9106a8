// SPDX-License-Identifier: GPL-3.0-only

//! Persistent pipeline configuration
//!
//! Stored as JSON at `<config dir>/depthcam/config.json`. Every field has a
//! default, so partial files are accepted.

use crate::backends::sensor::FormatRequirements;
use crate::constants::{DEFAULT_QUEUE_POLL_INTERVAL_MS, DEFAULT_TEXTURE_CACHE_CAPACITY};
use crate::errors::{AppError, AppResult};
use crate::pipelines::photo::{EncodingQuality, ThumbnailConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Constraints on the sensor mode chosen at session setup
    pub format: FormatRequirements,
    /// Hardware depth smoothing at session start
    pub depth_filtering: bool,
    /// Depth thumbnail grid
    pub thumbnail: ThumbnailConfig,
    /// Bound planes kept by the texture cache
    pub texture_cache_capacity: usize,
    /// Still photo JPEG quality
    pub photo_quality: EncodingQuality,
    /// Carry the still's depth map inside the photo file
    pub embed_depth_in_photo: bool,
    /// Idle wake-up interval of the sensor queue
    pub queue_poll_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            format: FormatRequirements::default(),
            depth_filtering: true,
            thumbnail: ThumbnailConfig::default(),
            texture_cache_capacity: DEFAULT_TEXTURE_CACHE_CAPACITY,
            photo_quality: EncodingQuality::High,
            embed_depth_in_photo: true,
            queue_poll_interval_ms: DEFAULT_QUEUE_POLL_INTERVAL_MS,
        }
    }
}

impl Config {
    /// Default location of the configuration file
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("depthcam")
            .join("config.json")
    }

    /// Load from `path` (or the default location)
    ///
    /// A missing file yields the defaults; an unreadable or malformed file
    /// is an error.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let path = path.map(PathBuf::from).unwrap_or_else(Self::default_path);

        if !path.exists() {
            debug!(path = %path.display(), "No configuration file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path).map_err(|e| {
            AppError::Config(format!("Failed to read '{}': {}", path.display(), e))
        })?;
        let config = serde_json::from_str(&content).map_err(|e| {
            AppError::Config(format!("Failed to parse '{}': {}", path.display(), e))
        })?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Write to `path` (or the default location), creating parent directories
    pub fn save(&self, path: Option<&Path>) -> AppResult<PathBuf> {
        let path = path.map(PathBuf::from).unwrap_or_else(Self::default_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;
        debug!(path = %path.display(), "Saved configuration");
        Ok(path)
    }

    pub fn queue_poll_interval(&self) -> Duration {
        Duration::from_millis(self.queue_poll_interval_ms.max(1))
    }
}
