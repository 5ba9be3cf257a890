// SPDX-License-Identifier: GPL-3.0-only

//! Shared types for camera backends

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use crate::constants::preview;

/// Camera backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CameraBackendType {
    /// PipeWire camera nodes through GStreamer (modern Linux standard)
    #[default]
    PipeWire,
    /// V4L2 device nodes through GStreamer
    V4l2,
    /// Synthetic frames, no hardware required
    TestPattern,
}

impl CameraBackendType {
    pub const ALL: [CameraBackendType; 3] = [
        CameraBackendType::PipeWire,
        CameraBackendType::V4l2,
        CameraBackendType::TestPattern,
    ];

    /// Whether opening a camera on this backend needs a runtime grant
    pub fn requires_permission(&self) -> bool {
        !matches!(self, CameraBackendType::TestPattern)
    }
}

impl std::fmt::Display for CameraBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CameraBackendType::PipeWire => write!(f, "PipeWire"),
            CameraBackendType::V4l2 => write!(f, "V4L2"),
            CameraBackendType::TestPattern => write!(f, "test pattern"),
        }
    }
}

impl std::str::FromStr for CameraBackendType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pipewire" => Ok(CameraBackendType::PipeWire),
            "v4l2" => Ok(CameraBackendType::V4l2),
            "test-pattern" | "testpattern" | "test" => Ok(CameraBackendType::TestPattern),
            other => Err(format!(
                "unknown backend '{}' (expected pipewire, v4l2 or test-pattern)",
                other
            )),
        }
    }
}

/// Sensor rotation in degrees (clockwise)
///
/// Camera sensors may be physically mounted at an angle relative to the
/// display. The preview compensates through the texture transform matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SensorRotation {
    /// No rotation (sensor is oriented correctly)
    #[default]
    None,
    /// 90 degrees clockwise
    Rotate90,
    /// 180 degrees (upside down)
    Rotate180,
    /// 270 degrees clockwise (90 degrees counter-clockwise)
    Rotate270,
}

impl SensorRotation {
    /// Create rotation from an integer degree value (normalised to 0-360).
    pub fn from_degrees_int(degrees: i32) -> Self {
        match degrees.rem_euclid(360) {
            90 => SensorRotation::Rotate90,
            180 => SensorRotation::Rotate180,
            270 => SensorRotation::Rotate270,
            _ => SensorRotation::None,
        }
    }

    /// Get the rotation in degrees
    pub fn degrees(&self) -> u32 {
        match self {
            SensorRotation::None => 0,
            SensorRotation::Rotate90 => 90,
            SensorRotation::Rotate180 => 180,
            SensorRotation::Rotate270 => 270,
        }
    }

    /// Check if rotation swaps width and height
    pub fn swaps_dimensions(&self) -> bool {
        matches!(self, SensorRotation::Rotate90 | SensorRotation::Rotate270)
    }
}

impl std::fmt::Display for SensorRotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}

/// Fixed preview size shared by the camera request and the texture bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PreviewSize {
    pub width: u32,
    pub height: u32,
}

impl PreviewSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Size of one tightly packed RGBA frame
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * preview::BYTES_PER_PIXEL
    }
}

impl Default for PreviewSize {
    fn default() -> Self {
        Self::new(preview::WIDTH, preview::HEIGHT)
    }
}

impl std::fmt::Display for PreviewSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// One camera frame, tightly packed RGBA
#[derive(Debug, Clone)]
pub struct CameraFrame {
    pub width: u32,
    pub height: u32,
    pub data: Arc<[u8]>,
    /// Orientation of the sensor that produced the frame
    pub rotation: SensorRotation,
    /// Whether the preview should be mirrored horizontally
    pub mirrored: bool,
    /// Monotonic per-session frame number
    pub sequence: u64,
    /// Timestamp when frame was captured (for latency diagnostics)
    pub captured_at: Instant,
}

impl CameraFrame {
    /// Wrap RGBA pixels; `None` when the buffer does not match the size
    pub fn rgba(width: u32, height: u32, data: impl Into<Arc<[u8]>>) -> Option<Self> {
        let data = data.into();
        if width == 0 || height == 0 || data.len() != PreviewSize::new(width, height).frame_len() {
            return None;
        }
        Some(Self {
            width,
            height,
            data,
            rotation: SensorRotation::None,
            mirrored: false,
            sequence: 0,
            captured_at: Instant::now(),
        })
    }

    pub fn with_rotation(mut self, rotation: SensorRotation) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn mirrored(mut self, mirrored: bool) -> Self {
        self.mirrored = mirrored;
        self
    }
}

/// A camera a backend can open
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraInfo {
    /// Backend specific identifier (PipeWire node serial, device path, ...)
    pub id: String,
    pub name: String,
    pub backend: CameraBackendType,
    pub rotation: SensorRotation,
}

/// Autofocus mode for a capture request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AfMode {
    Off,
    /// Focus continuously for still preview (the default for preview requests)
    #[default]
    ContinuousPicture,
}

/// Repeating capture request for the preview target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRequest {
    pub size: PreviewSize,
    pub af_mode: AfMode,
}

impl CaptureRequest {
    /// Preview request with continuous autofocus
    pub fn preview(size: PreviewSize) -> Self {
        Self {
            size,
            af_mode: AfMode::ContinuousPicture,
        }
    }
}
