// SPDX-License-Identifier: GPL-3.0-only

use crate::backends::camera::{CameraBackendType, PreviewSize};
use crate::constants::{self, edges, preview};
use crate::errors::{AppError, AppResult};
use crate::gpu::GpuBackendType;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// File name inside the config directory
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Camera backend to use (PipeWire, V4L2 or the test pattern)
    pub backend: CameraBackendType,
    /// Index into the backend's camera list
    pub camera_index: usize,
    /// Size requested from the camera and given to the external texture
    pub preview_width: u32,
    pub preview_height: u32,
    /// Render target size
    pub surface_width: u32,
    pub surface_height: u32,
    pub gpu_backend: GpuBackendType,
    /// Show the edge detector output at startup
    pub start_with_edges: bool,
    /// Mirror camera preview horizontally (selfie mode)
    pub mirror_preview: bool,
    pub edge_low_threshold: f32,
    pub edge_high_threshold: f32,
    /// Frame rate of the synthetic camera
    pub test_pattern_fps: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: CameraBackendType::default(),
            camera_index: 0,
            preview_width: preview::WIDTH,
            preview_height: preview::HEIGHT,
            surface_width: preview::SURFACE_WIDTH,
            surface_height: preview::SURFACE_HEIGHT,
            gpu_backend: GpuBackendType::default(),
            start_with_edges: false,
            mirror_preview: false,
            edge_low_threshold: edges::LOW_THRESHOLD,
            edge_high_threshold: edges::HIGH_THRESHOLD,
            test_pattern_fps: 30,
        }
    }
}

impl Config {
    /// `<config_dir>/edge-viewer/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(constants::APP_NAME).join(CONFIG_FILE))
    }

    /// Load from the default location, falling back to defaults
    pub fn load() -> Self {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => {
                warn!("No config directory, using defaults");
                Self::default()
            }
        }
    }

    /// Load from `path`. A missing file gives defaults silently; an unreadable
    /// or corrupt one gives defaults with a warning.
    pub fn load_from(path: &Path) -> Self {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                return Self::default();
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read config, using defaults");
                return Self::default();
            }
        };
        match serde_json::from_str::<Config>(&text) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt config, using defaults");
                Self::default()
            }
        }
    }

    pub fn save(&self) -> AppResult<PathBuf> {
        let path = Self::default_path()
            .ok_or_else(|| AppError::Config("no config directory".to_string()))?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        info!(path = %path.display(), "Config saved");
        Ok(())
    }

    /// Preview size shared by the camera request and the texture buffer
    pub fn preview_size(&self) -> PreviewSize {
        PreviewSize::new(self.preview_width, self.preview_height)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> AppResult<()> {
        if self.preview_width == 0 || self.preview_height == 0 {
            return Err(AppError::Config(format!(
                "preview size {}x{} is empty",
                self.preview_width, self.preview_height
            )));
        }
        if self.surface_width == 0 || self.surface_height == 0 {
            return Err(AppError::Config(format!(
                "surface size {}x{} is empty",
                self.surface_width, self.surface_height
            )));
        }
        if self.edge_low_threshold > self.edge_high_threshold {
            return Err(AppError::Config(format!(
                "edge thresholds out of order: low {} > high {}",
                self.edge_low_threshold, self.edge_high_threshold
            )));
        }
        if self.test_pattern_fps == 0 {
            return Err(AppError::Config("test pattern fps must be positive".to_string()));
        }
        Ok(())
    }
}
