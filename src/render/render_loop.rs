// SPDX-License-Identifier: GPL-3.0-only

//! Render-on-demand consumer.
//!
//! Each wake drains the frame-ready signal. Without a pending frame the wake is
//! a cheap no-op. With one, the frame is latched into the external texture,
//! processed into a transient texture, drawn, counted, and the transient
//! texture is deleted before the wake returns.

use std::time::Instant;

use futures::channel::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

use super::fps::FpsMeter;
use super::mode::ProcessingModeFlag;
use super::program::{FRAGMENT_SHADER, RenderProgram, VERTEX_SHADER};
use super::texture_bridge::{ExternalTextureBridge, FrameSurface, RenderRequester};
use super::{DrawOutcome, Renderer};
use crate::constants::timing::FRAME_LOG_INTERVAL;
use crate::errors::RenderError;
use crate::gpu::{GpuDevice, TextureDesc};
use crate::processing::ProcessingGateway;

/// Where the consumer is within one wake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderState {
    /// No pending frame, not scheduled
    #[default]
    Idle,
    /// Signal drained, about to process
    FrameWoken,
    Processing,
    Drawing,
}

/// Counters for one render loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    /// Wakes that drained a signal
    pub frames_woken: u64,
    pub frames_rendered: u64,
    /// Frames dropped because latching or processing failed
    pub frames_skipped: u64,
    /// Wakes with nothing to drain
    pub empty_wakes: u64,
}

pub struct RenderLoop {
    bridge: ExternalTextureBridge,
    program: Option<RenderProgram>,
    gateway: Box<dyn ProcessingGateway>,
    mode: ProcessingModeFlag,
    fps: FpsMeter,
    fps_sender: Option<UnboundedSender<f64>>,
    requester: RenderRequester,
    vertex_source: String,
    fragment_source: String,
    state: RenderState,
    stats: RenderStats,
}

impl RenderLoop {
    pub fn new(
        gateway: Box<dyn ProcessingGateway>,
        mode: ProcessingModeFlag,
        requester: RenderRequester,
    ) -> Self {
        Self {
            bridge: ExternalTextureBridge::new(requester.clone()),
            program: None,
            gateway,
            mode,
            fps: FpsMeter::new(),
            fps_sender: None,
            requester,
            vertex_source: VERTEX_SHADER.to_string(),
            fragment_source: FRAGMENT_SHADER.to_string(),
            state: RenderState::Idle,
            stats: RenderStats::default(),
        }
    }

    /// Send every FPS emission to `sender`
    pub fn with_fps_sender(mut self, sender: UnboundedSender<f64>) -> Self {
        self.fps_sender = Some(sender);
        self
    }

    /// Use different program sources (the preview program by default)
    pub fn with_shaders(mut self, vertex: &str, fragment: &str) -> Self {
        self.vertex_source = vertex.to_string();
        self.fragment_source = fragment.to_string();
        self
    }

    /// Mirror the preview horizontally
    pub fn with_mirror(mut self, mirror: bool) -> Self {
        self.bridge.set_mirror(mirror);
        self
    }

    /// Producer endpoint for the camera
    pub fn surface(&self) -> FrameSurface {
        self.bridge.surface()
    }

    pub fn state(&self) -> RenderState {
        self.state
    }

    pub fn stats(&self) -> RenderStats {
        self.stats
    }

    pub fn is_initialized(&self) -> bool {
        self.program.is_some()
    }

    fn emit_fps(&mut self, now: Instant) {
        if let Some(rate) = self.fps.on_frame_rendered(now)
            && let Some(sender) = &self.fps_sender
            && sender.unbounded_send(rate).is_err()
        {
            debug!("FPS receiver gone");
            self.fps_sender = None;
        }
    }
}

impl Renderer for RenderLoop {
    fn on_surface_created(&mut self, device: &mut dyn GpuDevice) -> Result<(), RenderError> {
        self.bridge.attach(device)?;
        match RenderProgram::compile(device, &self.vertex_source, &self.fragment_source) {
            Ok(program) => {
                info!(
                    device = %device.name(),
                    gateway = self.gateway.name(),
                    "Render surface created"
                );
                self.program = Some(program);
                self.state = RenderState::Idle;
                Ok(())
            }
            Err(e) => {
                // Leave nothing behind; the surface never reaches Drawing
                if let Err(release_error) = self.bridge.release(device) {
                    warn!(error = %release_error, "Failed to release external texture");
                }
                Err(RenderError::Compile(e))
            }
        }
    }

    fn on_surface_changed(
        &mut self,
        device: &mut dyn GpuDevice,
        width: u32,
        height: u32,
    ) -> Result<(), RenderError> {
        debug!(width, height, "Render surface changed");
        device.set_viewport(width, height)?;
        Ok(())
    }

    fn on_draw_frame(&mut self, device: &mut dyn GpuDevice) -> Result<DrawOutcome, RenderError> {
        let Some(program) = &self.program else {
            return Err(RenderError::NotInitialized);
        };

        if !self.bridge.drain_if_ready() {
            self.stats.empty_wakes += 1;
            return Ok(DrawOutcome::Idle);
        }
        self.state = RenderState::FrameWoken;
        self.stats.frames_woken += 1;

        if let Err(e) = self.bridge.update_tex_image(device) {
            warn!(error = %e, "Failed to latch camera frame, skipping");
            self.stats.frames_skipped += 1;
            self.state = RenderState::Idle;
            return Ok(DrawOutcome::Skipped);
        }
        let transform = self.bridge.transform_matrix();
        let input = self.bridge.texture().ok_or(RenderError::NotInitialized)?;
        let (width, height) = device.texture_size(input)?;
        let output = device.create_texture(TextureDesc::texture_2d(width, height))?;

        self.state = RenderState::Processing;
        let mode = self.mode.get();
        let outcome = match self.gateway.process(device, input, output, mode) {
            Ok(()) => {
                self.state = RenderState::Drawing;
                device.clear([0.0, 0.0, 0.0, 1.0]);
                program
                    .draw(device, output, &transform)
                    .map(|()| DrawOutcome::Drawn)
            }
            Err(e) => {
                self.stats.frames_skipped += 1;
                if self.stats.frames_skipped % FRAME_LOG_INTERVAL == 1 {
                    warn!(
                        error = %e,
                        gateway = self.gateway.name(),
                        skipped = self.stats.frames_skipped,
                        "Processing failed, frame skipped"
                    );
                }
                Ok(DrawOutcome::Skipped)
            }
        };

        if let Err(e) = device.delete_texture(output) {
            error!(error = %e, "Failed to delete transient texture");
        }
        self.state = RenderState::Idle;

        if let Ok(DrawOutcome::Drawn) = outcome {
            self.stats.frames_rendered += 1;
            if self.stats.frames_rendered % FRAME_LOG_INTERVAL == 0 {
                debug!(frames = self.stats.frames_rendered, ?mode, "Frames rendered");
            }
            self.emit_fps(Instant::now());
        }

        // A frame that arrived while this one was in flight needs another wake
        if self.bridge.is_pending() {
            self.requester.request_render();
        }
        outcome
    }

    fn on_surface_destroyed(&mut self, device: &mut dyn GpuDevice) {
        if let Some(program) = self.program.take()
            && let Err(e) = program.release(device)
        {
            warn!(error = %e, "Failed to release preview program");
        }
        if let Err(e) = self.bridge.release(device) {
            warn!(error = %e, "Failed to release external texture");
        }
        self.fps.reset();
        self.state = RenderState::Idle;
        debug!("Render surface destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::types::{CameraFrame, PreviewSize};
    use crate::errors::ProcessingError;
    use crate::gpu::{SoftwareDevice, TextureHandle};
    use crate::processing::PassthroughGateway;
    use crate::render::mode::ProcessingMode;

    struct FailingGateway;

    impl ProcessingGateway for FailingGateway {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn process(
            &mut self,
            _device: &mut dyn GpuDevice,
            _input: TextureHandle,
            _output: TextureHandle,
            _mode: ProcessingMode,
        ) -> Result<(), ProcessingError> {
            Err(ProcessingError::Unavailable("not configured".to_string()))
        }
    }

    fn frame(value: u8) -> CameraFrame {
        CameraFrame::rgba(4, 4, vec![value; 64]).unwrap()
    }

    fn ready_loop(gateway: Box<dyn ProcessingGateway>) -> (RenderLoop, SoftwareDevice) {
        let mut device = SoftwareDevice::new(4, 4);
        let mut render = RenderLoop::new(
            gateway,
            ProcessingModeFlag::default(),
            RenderRequester::noop(),
        );
        render.surface().set_default_buffer_size(PreviewSize::new(4, 4));
        render.on_surface_created(&mut device).unwrap();
        render.on_surface_changed(&mut device, 4, 4).unwrap();
        (render, device)
    }

    #[test]
    fn test_wake_without_signal_does_no_work() {
        let (mut render, mut device) = ready_loop(Box::new(PassthroughGateway));
        device.clear([1.0, 0.0, 0.0, 1.0]);
        let before = device.read_framebuffer().unwrap();

        assert_eq!(render.on_draw_frame(&mut device).unwrap(), DrawOutcome::Idle);
        assert_eq!(device.read_framebuffer().unwrap(), before);
        assert_eq!(render.stats().empty_wakes, 1);
        assert_eq!(render.state(), RenderState::Idle);
    }

    #[test]
    fn test_drawn_frame_reaches_framebuffer_and_transient_is_freed() {
        let (mut render, mut device) = ready_loop(Box::new(PassthroughGateway));
        render.surface().on_frame_available(frame(77));

        assert_eq!(render.on_draw_frame(&mut device).unwrap(), DrawOutcome::Drawn);
        let presented = device.read_framebuffer().unwrap();
        assert!(presented.data.iter().all(|&b| b == 77));
        // Only the external texture survives the frame
        assert_eq!(device.stats().textures, 1);
        assert_eq!(device.stats().enabled_attributes, 0);
    }

    #[test]
    fn test_processing_failure_skips_draw_and_recovers() {
        let (mut render, mut device) = ready_loop(Box::new(FailingGateway));
        device.clear([0.0, 0.0, 1.0, 1.0]);
        let before = device.read_framebuffer().unwrap();

        render.surface().on_frame_available(frame(10));
        assert_eq!(render.on_draw_frame(&mut device).unwrap(), DrawOutcome::Skipped);
        assert_eq!(device.read_framebuffer().unwrap(), before);
        assert_eq!(device.stats().textures, 1);

        // The signal mechanism keeps working for later frames
        render.surface().on_frame_available(frame(11));
        assert!(render.bridge.is_pending());
        assert_eq!(render.on_draw_frame(&mut device).unwrap(), DrawOutcome::Skipped);
        assert_eq!(render.stats().frames_skipped, 2);
        assert_eq!(render.stats().frames_woken, 2);
    }

    #[test]
    fn test_draw_before_surface_created_is_error() {
        let mut device = SoftwareDevice::new(4, 4);
        let mut render = RenderLoop::new(
            Box::new(PassthroughGateway),
            ProcessingModeFlag::default(),
            RenderRequester::noop(),
        );
        render.surface().on_frame_available(frame(1));
        assert_eq!(
            render.on_draw_frame(&mut device),
            Err(RenderError::NotInitialized)
        );
    }

    #[test]
    fn test_invalid_shader_fails_surface_creation_without_leaks() {
        let mut device = SoftwareDevice::new(4, 4);
        let mut render = RenderLoop::new(
            Box::new(PassthroughGateway),
            ProcessingModeFlag::default(),
            RenderRequester::noop(),
        )
        .with_shaders(VERTEX_SHADER, "@fragment fn fs_main() -> {");

        let result = render.on_surface_created(&mut device);
        assert!(matches!(result, Err(RenderError::Compile(_))));
        assert!(!render.is_initialized());
        assert_eq!(device.stats().textures, 0);
        assert_eq!(device.stats().programs, 0);

        render.surface().on_frame_available(frame(1));
        assert_eq!(
            render.on_draw_frame(&mut device),
            Err(RenderError::NotInitialized)
        );
    }

    #[test]
    fn test_fps_emissions_are_sent() {
        let (sender, mut receiver) = futures::channel::mpsc::unbounded();
        let (render, mut device) = ready_loop(Box::new(PassthroughGateway));
        let mut render = render.with_fps_sender(sender);

        // Seed, then a frame after a full window
        render.surface().on_frame_available(frame(1));
        render.on_draw_frame(&mut device).unwrap();
        render.emit_fps(Instant::now() + std::time::Duration::from_secs(2));

        let rate = receiver.try_recv().unwrap();
        assert!(rate > 0.0 && rate < 1.0);
    }

    #[test]
    fn test_surface_destroyed_releases_everything() {
        let (mut render, mut device) = ready_loop(Box::new(PassthroughGateway));
        render.on_surface_destroyed(&mut device);
        assert_eq!(device.stats().textures, 0);
        assert_eq!(device.stats().programs, 0);
        // Second teardown is harmless
        render.on_surface_destroyed(&mut device);
        assert!(!render.is_initialized());
    }
}
