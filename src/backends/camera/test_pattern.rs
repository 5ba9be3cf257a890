// SPDX-License-Identifier: GPL-3.0-only

//! Synthetic camera producing moving colour bars.
//!
//! Used when no physical camera is wanted: headless benchmarks, demos and
//! tests. Frames are generated on a paced capture loop thread, so delivery
//! is asynchronous to the consumer exactly like a real camera.

use std::time::Duration;

use tracing::{debug, info};

use super::frame_loop::{FrameLoop, LoopAction};
use super::types::{
    CameraBackendType, CameraFrame, CameraInfo, CaptureRequest, PreviewSize, SensorRotation,
};
use super::{CameraBackend, CameraDevice, CaptureSession, FrameSink};
use crate::constants::threads;
use crate::errors::CameraError;

pub const TEST_PATTERN_ID: &str = "test-pattern";

/// Colour bars, left to right
const BARS: [[u8; 3]; 8] = [
    [255, 255, 255],
    [255, 255, 0],
    [0, 255, 255],
    [0, 255, 0],
    [255, 0, 255],
    [255, 0, 0],
    [0, 0, 255],
    [0, 0, 0],
];

/// Pixels the pattern moves per frame
const SCROLL_STEP: u64 = 4;

/// RGBA colour bars shifted left by `sequence` steps
pub fn pattern_frame(size: PreviewSize, sequence: u64) -> Option<CameraFrame> {
    let width = size.width as u64;
    let mut data = Vec::with_capacity(size.frame_len());
    let offset = (sequence * SCROLL_STEP) % width.max(1);
    for _ in 0..size.height {
        for x in 0..width {
            let bar = ((x + offset) % width * BARS.len() as u64 / width) as usize;
            let [r, g, b] = BARS[bar];
            data.extend_from_slice(&[r, g, b, 255]);
        }
    }
    CameraFrame::rgba(size.width, size.height, data).map(|frame| frame.with_sequence(sequence))
}

fn test_pattern_info() -> CameraInfo {
    CameraInfo {
        id: TEST_PATTERN_ID.to_string(),
        name: "Test Pattern".to_string(),
        backend: CameraBackendType::TestPattern,
        rotation: SensorRotation::None,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TestPatternBackend {
    fps: u32,
}

impl TestPatternBackend {
    pub fn new(fps: u32) -> Self {
        Self { fps: fps.max(1) }
    }
}

impl CameraBackend for TestPatternBackend {
    fn backend_type(&self) -> CameraBackendType {
        CameraBackendType::TestPattern
    }

    fn enumerate_cameras(&self) -> Result<Vec<CameraInfo>, CameraError> {
        Ok(vec![test_pattern_info()])
    }

    fn open_camera(&self, id: &str) -> Result<Box<dyn CameraDevice>, CameraError> {
        if id != TEST_PATTERN_ID {
            return Err(CameraError::NotAvailable(id.to_string()));
        }
        info!(fps = self.fps, "Test pattern camera opened");
        Ok(Box::new(TestPatternDevice {
            info: test_pattern_info(),
            fps: self.fps,
            closed: false,
        }))
    }
}

struct TestPatternDevice {
    info: CameraInfo,
    fps: u32,
    closed: bool,
}

impl CameraDevice for TestPatternDevice {
    fn info(&self) -> &CameraInfo {
        &self.info
    }

    fn create_capture_session(
        &mut self,
        size: PreviewSize,
    ) -> Result<Box<dyn CaptureSession>, CameraError> {
        if self.closed {
            return Err(CameraError::Closed);
        }
        if size.width == 0 || size.height == 0 {
            return Err(CameraError::ConfigureFailed(format!(
                "unsupported size {}",
                size
            )));
        }
        Ok(Box::new(TestPatternSession {
            size,
            interval: Duration::from_secs(1) / self.fps,
            frame_loop: None,
        }))
    }

    fn close(&mut self) -> Result<(), CameraError> {
        if self.closed {
            return Err(CameraError::Closed);
        }
        self.closed = true;
        debug!("Test pattern camera closed");
        Ok(())
    }
}

struct TestPatternSession {
    size: PreviewSize,
    interval: Duration,
    frame_loop: Option<FrameLoop>,
}

impl CaptureSession for TestPatternSession {
    fn set_repeating_request(
        &mut self,
        request: CaptureRequest,
        sink: FrameSink,
    ) -> Result<(), CameraError> {
        if request.size != self.size {
            return Err(CameraError::ConfigureFailed(format!(
                "request size {} does not match session size {}",
                request.size, self.size
            )));
        }
        if let Some(mut previous) = self.frame_loop.take() {
            previous.shutdown();
        }

        let size = self.size;
        let mut sequence = 0u64;
        let frame_loop = FrameLoop::paced(threads::TEST_PATTERN, self.interval, move || {
            if let Some(frame) = pattern_frame(size, sequence) {
                sink(frame);
            }
            sequence += 1;
            LoopAction::Continue
        })?;
        self.frame_loop = Some(frame_loop);
        Ok(())
    }

    fn close(&mut self) -> Result<(), CameraError> {
        if let Some(mut frame_loop) = self.frame_loop.take() {
            frame_loop.shutdown();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_pattern_frame_layout() {
        let frame = pattern_frame(PreviewSize::new(8, 2), 0).unwrap();
        assert_eq!(frame.data.len(), 8 * 2 * 4);
        // First bar is white, last is black, all opaque
        assert_eq!(&frame.data[0..4], &[255, 255, 255, 255]);
        assert_eq!(&frame.data[28..32], &[0, 0, 0, 255]);
    }

    #[test]
    fn test_pattern_moves_between_frames() {
        let size = PreviewSize::new(64, 1);
        let a = pattern_frame(size, 0).unwrap();
        let b = pattern_frame(size, 1).unwrap();
        assert_ne!(a.data, b.data);
        assert_eq!(b.sequence, 1);
    }

    #[test]
    fn test_open_unknown_camera_fails() {
        let backend = TestPatternBackend::new(30);
        assert!(matches!(
            backend.open_camera("/dev/video0"),
            Err(CameraError::NotAvailable(_))
        ));
    }

    #[test]
    fn test_session_streams_until_closed() {
        let backend = TestPatternBackend::new(200);
        let mut device = backend.open_camera(TEST_PATTERN_ID).unwrap();
        let size = PreviewSize::new(8, 8);
        let mut session = device.create_capture_session(size).unwrap();

        let frames = Arc::new(Mutex::new(Vec::new()));
        let sink_frames = Arc::clone(&frames);
        session
            .set_repeating_request(
                CaptureRequest::preview(size),
                Arc::new(move |frame: CameraFrame| sink_frames.lock().unwrap().push(frame.sequence)),
            )
            .unwrap();
        std::thread::sleep(Duration::from_millis(60));
        session.close().unwrap();

        let delivered = frames.lock().unwrap().len();
        assert!(delivered > 0);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(frames.lock().unwrap().len(), delivered);

        device.close().unwrap();
        assert_eq!(device.close(), Err(CameraError::Closed));
    }
}
