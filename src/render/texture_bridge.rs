// SPDX-License-Identifier: GPL-3.0-only

//! Handoff between the camera producer and the render consumer.
//!
//! The producer side ([`FrameSurface`]) writes the newest frame into a single
//! slot and sets a ready bit. The consumer side ([`ExternalTextureBridge`])
//! test-and-clears that bit once per wake and uploads the staged frame into the
//! external texture. Frames arriving between two drains replace each other;
//! nothing is queued.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::backends::camera::types::{CameraFrame, PreviewSize, SensorRotation};
use crate::errors::GpuError;
use crate::gpu::{GpuDevice, TextureDesc, TextureHandle};

/// Column-major 4x4 identity
pub const IDENTITY_TRANSFORM: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// Texture-coordinate transform for a sensor rotation and optional mirror.
///
/// Coordinates are mirrored horizontally first, then rotated about the texture
/// centre. The result is column-major, ready for a `mat4x4<f32>` uniform.
pub fn transform_matrix(rotation: SensorRotation, mirror: bool) -> [f32; 16] {
    let (cos, sin) = match rotation {
        SensorRotation::None => (1.0, 0.0),
        SensorRotation::Rotate90 => (0.0, 1.0),
        SensorRotation::Rotate180 => (-1.0, 0.0),
        SensorRotation::Rotate270 => (0.0, -1.0),
    };
    let flip = if mirror { -1.0 } else { 1.0 };

    // A = R * diag(flip, 1)
    let a00 = cos * flip;
    let a01 = -sin;
    let a10 = sin * flip;
    let a11 = cos;

    // Keep the centre fixed: t = c - A c
    let tx = 0.5 - (a00 * 0.5 + a01 * 0.5);
    let ty = 0.5 - (a10 * 0.5 + a11 * 0.5);

    [
        a00, a10, 0.0, 0.0, //
        a01, a11, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        tx, ty, 0.0, 1.0,
    ]
}

/// Wakes the render consumer.
///
/// Requests are idempotent: any number of calls before the consumer runs
/// result in one wake.
#[derive(Clone)]
pub struct RenderRequester(Arc<dyn Fn() + Send + Sync>);

impl RenderRequester {
    pub fn new(wake: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Arc::new(wake))
    }

    /// A requester that does nothing, for driving a render loop by hand
    pub fn noop() -> Self {
        Self::new(|| {})
    }

    pub fn request_render(&self) {
        (self.0)();
    }
}

impl fmt::Debug for RenderRequester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RenderRequester")
    }
}

#[derive(Debug, Default)]
struct Slot {
    ready: bool,
    frame: Option<CameraFrame>,
    buffer_size: Option<PreviewSize>,
}

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    // The slot holds plain data; a panicking holder cannot leave it half-written
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Producer endpoint the camera writes into
#[derive(Debug, Clone)]
pub struct FrameSurface {
    slot: Arc<Mutex<Slot>>,
    requester: RenderRequester,
}

impl FrameSurface {
    /// Size the camera is configured to deliver; applied when the texture is created
    pub fn set_default_buffer_size(&self, size: PreviewSize) {
        lock(&self.slot).buffer_size = Some(size);
    }

    pub fn default_buffer_size(&self) -> Option<PreviewSize> {
        lock(&self.slot).buffer_size
    }

    /// Replace the pending frame; an undrained older frame is dropped
    pub fn queue_frame(&self, frame: CameraFrame) {
        lock(&self.slot).frame = Some(frame);
    }

    /// Set the ready bit and wake the consumer
    pub fn signal_frame_available(&self) {
        lock(&self.slot).ready = true;
        self.requester.request_render();
    }

    /// Queue a frame and signal it in one step
    pub fn on_frame_available(&self, frame: CameraFrame) {
        {
            let mut slot = lock(&self.slot);
            slot.frame = Some(frame);
            slot.ready = true;
        }
        self.requester.request_render();
    }

    /// Whether a signal is waiting to be drained
    pub fn is_pending(&self) -> bool {
        lock(&self.slot).ready
    }
}

/// Consumer side: owns the external texture and its transform
#[derive(Debug)]
pub struct ExternalTextureBridge {
    slot: Arc<Mutex<Slot>>,
    requester: RenderRequester,
    texture: Option<TextureHandle>,
    staged: Option<CameraFrame>,
    transform: [f32; 16],
    mirror: bool,
}

impl ExternalTextureBridge {
    pub fn new(requester: RenderRequester) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot::default())),
            requester,
            texture: None,
            staged: None,
            transform: IDENTITY_TRANSFORM,
            mirror: false,
        }
    }

    /// Mirror the preview horizontally (front-facing cameras)
    pub fn set_mirror(&mut self, mirror: bool) {
        self.mirror = mirror;
    }

    /// Producer endpoint sharing this bridge's slot
    pub fn surface(&self) -> FrameSurface {
        FrameSurface {
            slot: Arc::clone(&self.slot),
            requester: self.requester.clone(),
        }
    }

    /// Create the external texture; a no-op when already attached
    pub fn attach(&mut self, device: &mut dyn GpuDevice) -> Result<TextureHandle, GpuError> {
        if let Some(texture) = self.texture {
            return Ok(texture);
        }
        let size = lock(&self.slot).buffer_size.unwrap_or_default();
        let texture = device.create_texture(TextureDesc::external(size.width, size.height))?;
        debug!(%texture, %size, "External texture attached");
        self.texture = Some(texture);
        Ok(texture)
    }

    pub fn texture(&self) -> Option<TextureHandle> {
        self.texture
    }

    /// Whether a signal is waiting, without cloning a producer endpoint
    pub fn is_pending(&self) -> bool {
        lock(&self.slot).ready
    }

    /// Test-and-clear the ready bit.
    ///
    /// On `true` the pending frame is staged, and the caller must call
    /// [`update_tex_image`](Self::update_tex_image) before sampling.
    pub fn drain_if_ready(&mut self) -> bool {
        let mut slot = lock(&self.slot);
        if !slot.ready {
            return false;
        }
        slot.ready = false;
        if let Some(frame) = slot.frame.take() {
            self.staged = Some(frame);
        }
        true
    }

    /// Latch the staged frame into the texture and refresh the transform
    pub fn update_tex_image(&mut self, device: &mut dyn GpuDevice) -> Result<(), GpuError> {
        let texture = self.attach(device)?;
        let Some(frame) = self.staged.take() else {
            // Signalled without new pixels; the texture keeps its last image
            return Ok(());
        };
        device.upload_texture(texture, frame.width, frame.height, &frame.data)?;
        self.transform = transform_matrix(frame.rotation, frame.mirrored ^ self.mirror);
        Ok(())
    }

    /// Transform fetched by the last [`update_tex_image`](Self::update_tex_image)
    pub fn transform_matrix(&self) -> [f32; 16] {
        self.transform
    }

    /// Delete the texture. Safe to call more than once; only the first call
    /// releases anything.
    pub fn release(&mut self, device: &mut dyn GpuDevice) -> Result<(), GpuError> {
        self.staged = None;
        {
            let mut slot = lock(&self.slot);
            slot.ready = false;
            slot.frame = None;
        }
        match self.texture.take() {
            Some(texture) => {
                debug!(%texture, "External texture released");
                device.delete_texture(texture)
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::SoftwareDevice;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn apply(m: &[f32; 16], u: f32, v: f32) -> (f32, f32) {
        (m[0] * u + m[4] * v + m[12], m[1] * u + m[5] * v + m[13])
    }

    fn frame(value: u8) -> CameraFrame {
        CameraFrame::rgba(2, 2, vec![value; 16]).unwrap()
    }

    #[test]
    fn test_identity_transform() {
        assert_eq!(
            transform_matrix(SensorRotation::None, false),
            IDENTITY_TRANSFORM
        );
    }

    #[test]
    fn test_mirror_flips_horizontally() {
        let m = transform_matrix(SensorRotation::None, true);
        assert_eq!(apply(&m, 0.0, 0.0), (1.0, 0.0));
        assert_eq!(apply(&m, 1.0, 1.0), (0.0, 1.0));
    }

    #[test]
    fn test_rotations_keep_corners_in_unit_square() {
        let m = transform_matrix(SensorRotation::Rotate180, false);
        assert_eq!(apply(&m, 0.0, 0.0), (1.0, 1.0));
        let m = transform_matrix(SensorRotation::Rotate90, false);
        assert_eq!(apply(&m, 0.0, 0.0), (1.0, 0.0));
        let m = transform_matrix(SensorRotation::Rotate270, false);
        assert_eq!(apply(&m, 0.0, 0.0), (0.0, 1.0));
    }

    #[test]
    fn test_signals_between_drains_coalesce() {
        let wakes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&wakes);
        let mut bridge = ExternalTextureBridge::new(RenderRequester::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let surface = bridge.surface();

        for i in 0..5 {
            surface.on_frame_available(frame(i));
        }
        assert_eq!(wakes.load(Ordering::SeqCst), 5);
        assert!(bridge.drain_if_ready());
        assert!(!bridge.drain_if_ready());

        let mut device = SoftwareDevice::new(2, 2);
        bridge.update_tex_image(&mut device).unwrap();
        let texture = bridge.texture().unwrap();
        // Only the newest frame reaches the texture
        assert_eq!(device.read_texture(texture).unwrap(), vec![4u8; 16]);
    }

    #[test]
    fn test_pending_tracks_ready_bit() {
        let mut bridge = ExternalTextureBridge::new(RenderRequester::noop());
        let surface = bridge.surface();
        assert!(!bridge.is_pending());
        surface.on_frame_available(frame(3));
        assert!(bridge.is_pending());
        assert!(bridge.drain_if_ready());
        assert!(!bridge.is_pending());
    }

    #[test]
    fn test_no_signal_no_drain() {
        let mut bridge = ExternalTextureBridge::new(RenderRequester::noop());
        let surface = bridge.surface();
        assert!(!bridge.drain_if_ready());
        // A queued frame without a signal is not a wake
        surface.queue_frame(frame(1));
        assert!(!bridge.drain_if_ready());
        surface.signal_frame_available();
        assert!(bridge.drain_if_ready());
    }

    #[test]
    fn test_attach_uses_default_buffer_size() {
        let mut bridge = ExternalTextureBridge::new(RenderRequester::noop());
        bridge.surface().set_default_buffer_size(PreviewSize::new(8, 6));
        let mut device = SoftwareDevice::new(4, 4);
        let texture = bridge.attach(&mut device).unwrap();
        assert_eq!(device.texture_size(texture).unwrap(), (8, 6));
        // Attaching twice keeps the same texture
        assert_eq!(bridge.attach(&mut device).unwrap(), texture);
        assert_eq!(device.stats().textures, 1);
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut bridge = ExternalTextureBridge::new(RenderRequester::noop());
        let mut device = SoftwareDevice::new(4, 4);
        bridge.attach(&mut device).unwrap();
        bridge.release(&mut device).unwrap();
        bridge.release(&mut device).unwrap();
        assert_eq!(device.stats().textures, 0);
        assert!(bridge.texture().is_none());
    }

    #[test]
    fn test_update_uses_frame_orientation() {
        let mut bridge = ExternalTextureBridge::new(RenderRequester::noop());
        let surface = bridge.surface();
        let mut device = SoftwareDevice::new(4, 4);
        surface.on_frame_available(frame(9).with_rotation(SensorRotation::Rotate180));
        assert!(bridge.drain_if_ready());
        bridge.update_tex_image(&mut device).unwrap();
        assert_eq!(
            bridge.transform_matrix(),
            transform_matrix(SensorRotation::Rotate180, false)
        );
    }
}
