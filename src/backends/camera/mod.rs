// SPDX-License-Identifier: MPL-2.0

//! Camera backend abstraction
//!
//! ```text
//! ┌──────────────────────────┐
//! │ CameraCaptureController  │  ← lifecycle, background worker
//! └────────────┬─────────────┘
//!              │
//!              ▼
//! ┌──────────────────────────┐
//! │   CameraBackend trait    │  ← enumerate, open
//! └────────────┬─────────────┘
//!        ┌─────┴───────┐
//!        ▼             ▼
//!   ┌─────────┐  ┌───────────┐
//!   │GStreamer│  │TestPattern│
//!   └─────────┘  └───────────┘
//! ```
//!
//! A backend opens a [`CameraDevice`], the device configures one
//! [`CaptureSession`] at a fixed size, and the session pushes frames into a
//! [`FrameSink`] once a repeating request is set.

pub mod controller;
pub mod frame_loop;
pub mod pipeline;
pub mod test_pattern;
pub mod types;
pub mod worker;

pub use controller::{CameraCaptureController, CameraEvent};
pub use types::*;

use std::sync::Arc;

use crate::errors::CameraError;

/// Receives every captured frame, on the session's streaming thread
pub type FrameSink = Arc<dyn Fn(CameraFrame) + Send + Sync>;

pub trait CameraBackend: Send + Sync {
    fn backend_type(&self) -> CameraBackendType;

    /// Cameras this backend can open, in a stable order
    fn enumerate_cameras(&self) -> Result<Vec<CameraInfo>, CameraError>;

    fn open_camera(&self, id: &str) -> Result<Box<dyn CameraDevice>, CameraError>;
}

/// An opened camera
pub trait CameraDevice: Send {
    fn info(&self) -> &CameraInfo;

    /// Configure a session whose single output delivers frames of `size`.
    ///
    /// An error here is a configuration failure for this open attempt.
    fn create_capture_session(
        &mut self,
        size: PreviewSize,
    ) -> Result<Box<dyn CaptureSession>, CameraError>;

    fn close(&mut self) -> Result<(), CameraError>;
}

/// A configured stream from one camera
pub trait CaptureSession: Send {
    /// Start streaming into `sink` until the session is closed
    fn set_repeating_request(
        &mut self,
        request: CaptureRequest,
        sink: FrameSink,
    ) -> Result<(), CameraError>;

    /// Stop streaming; no frame reaches the sink after this returns
    fn close(&mut self) -> Result<(), CameraError>;
}

/// Create the backend for `backend_type`
pub fn create_backend(
    backend_type: CameraBackendType,
    test_pattern_fps: u32,
) -> Arc<dyn CameraBackend> {
    match backend_type {
        CameraBackendType::PipeWire | CameraBackendType::V4l2 => {
            Arc::new(pipeline::GstCameraBackend::new(backend_type))
        }
        CameraBackendType::TestPattern => {
            Arc::new(test_pattern::TestPatternBackend::new(test_pattern_fps))
        }
    }
}
