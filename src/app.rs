// SPDX-License-Identifier: GPL-3.0-only

//! Composition root tying the camera producer to the render consumer.
//!
//! ```text
//! CameraCaptureController ─► FrameSurface ─► SurfaceHost(RenderLoop) ─► presenter
//!                                                   │
//!                                                   └─► FPS channel ─► fps_text
//! ```
//!
//! [`PreviewApp::resume`] and [`PreviewApp::pause`] are the lifecycle entry
//! points a UI calls when it becomes visible or hidden.

use std::sync::{Arc, Mutex, MutexGuard};

use futures::channel::mpsc::{UnboundedReceiver, unbounded};
use tracing::{debug, error, info, warn};

use crate::backends::camera::{
    CameraBackend, CameraCaptureController, CameraEvent, PreviewSize, create_backend,
};
use crate::config::Config;
use crate::constants::{fps, labels};
use crate::errors::{AppResult, CameraError};
use crate::gpu::{self, GpuDevice, PresentedFrame, ResourceStats, SoftwareDevice};
use crate::permission::{self, PermissionGate};
use crate::processing::{EdgeDetectionGateway, ProcessingGateway};
use crate::render::{
    DeviceFactory, FrameSurface, HostStats, ProcessingMode, ProcessingModeFlag, RenderLoop,
    SurfaceHost, format_fps,
};

type LatestFrame = Arc<Mutex<Option<PresentedFrame>>>;

fn lock_frame(slot: &LatestFrame) -> MutexGuard<'_, Option<PresentedFrame>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct PreviewApp {
    host: SurfaceHost,
    controller: CameraCaptureController,
    surface: FrameSurface,
    camera_events: UnboundedReceiver<CameraEvent>,
    fps_receiver: UnboundedReceiver<f64>,
    mode: ProcessingModeFlag,
    gate: Box<dyn PermissionGate>,
    latest_frame: LatestFrame,
    fps_text: String,
    status: Option<String>,
    paused: bool,
}

impl PreviewApp {
    /// Build the pipeline described by `config` with its real backend,
    /// permission gate and GPU device
    pub fn new(config: &Config) -> AppResult<Self> {
        let backend = create_backend(config.backend, config.test_pattern_fps);
        let gate = permission::gate_for(config.backend);
        let gateway = Box::new(EdgeDetectionGateway::new(
            config.edge_low_threshold,
            config.edge_high_threshold,
        ));
        let (gpu_backend, width, height) =
            (config.gpu_backend, config.surface_width, config.surface_height);
        let device_factory: DeviceFactory =
            Box::new(move || gpu::create_device(gpu_backend, width, height));
        Self::with_parts(config, backend, gate, gateway, device_factory)
    }

    /// Build the pipeline from explicit parts.
    ///
    /// The render surface is created before this returns, so a program build
    /// failure is reported here. Capture does not start until
    /// [`resume`](Self::resume).
    pub fn with_parts(
        config: &Config,
        backend: Arc<dyn CameraBackend>,
        gate: Box<dyn PermissionGate>,
        gateway: Box<dyn ProcessingGateway>,
        device_factory: DeviceFactory,
    ) -> AppResult<Self> {
        config.validate()?;

        let initial = if config.start_with_edges {
            ProcessingMode::Edges
        } else {
            ProcessingMode::Raw
        };
        let mode = ProcessingModeFlag::new(initial);
        let (fps_sender, fps_receiver) = unbounded();

        let mut host = SurfaceHost::new(config.surface_width, config.surface_height);
        let render_loop = RenderLoop::new(gateway, mode.clone(), host.requester())
            .with_fps_sender(fps_sender)
            .with_mirror(config.mirror_preview);
        let surface = render_loop.surface();
        // Size the external texture before the render thread attaches it
        surface.set_default_buffer_size(config.preview_size());

        let latest_frame: LatestFrame = Arc::new(Mutex::new(None));
        let presented = Arc::clone(&latest_frame);
        host.start(
            Box::new(render_loop),
            device_factory,
            Box::new(move |frame: PresentedFrame| {
                *lock_frame(&presented) = Some(frame);
            }),
        )
        .inspect_err(|e| error!(error = %e, "Render surface failed to initialize"))?;

        let (controller, camera_events) = CameraCaptureController::new(
            backend,
            surface.clone(),
            config.preview_size(),
            config.camera_index,
        );

        info!(
            backend = %config.backend,
            gate = gate.name(),
            mode = ?initial,
            "Preview pipeline ready"
        );

        Ok(Self {
            host,
            controller,
            surface,
            camera_events,
            fps_receiver,
            mode,
            gate,
            latest_frame,
            fps_text: fps::PLACEHOLDER.to_string(),
            status: None,
            paused: true,
        })
    }

    /// Recreate the surface and, when camera access is granted, start
    /// capture. A refused grant leaves the pipeline idle with a status
    /// message.
    pub fn resume(&mut self) -> AppResult<()> {
        self.host.resume()?;
        self.paused = false;

        match self.gate.check() {
            Ok(()) => {
                self.controller.start()?;
                self.status = None;
            }
            Err(CameraError::PermissionDenied) => {
                warn!(gate = self.gate.name(), "Camera permission denied");
                self.status = Some(labels::PERMISSION_DENIED.to_string());
            }
            Err(e) => {
                warn!(gate = self.gate.name(), error = %e, "Camera not accessible");
                self.status = Some(e.to_string());
            }
        }
        Ok(())
    }

    /// Release the surface resources, then tear capture down
    pub fn pause(&mut self) -> AppResult<()> {
        let host_result = self.host.pause();
        self.controller.stop();
        self.paused = true;
        self.fps_text = fps::PLACEHOLDER.to_string();
        self.status = Some(labels::PAUSED.to_string());
        debug!("Preview paused");
        host_result.map_err(Into::into)
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Flip between raw and processed display, returning the new toggle label
    pub fn toggle_mode(&self) -> &'static str {
        let mode = self.mode.toggle();
        info!(mode = ?mode, "Processing mode toggled");
        mode.toggle_label()
    }

    pub fn mode(&self) -> ProcessingMode {
        self.mode.get()
    }

    /// Label for the toggle control in the current mode
    pub fn toggle_label(&self) -> &'static str {
        self.mode.get().toggle_label()
    }

    /// Apply pending FPS emissions and camera events, returning the newest
    /// rate emitted since the last poll
    pub fn poll(&mut self) -> Option<f64> {
        let mut newest = None;
        while let Ok(rate) = self.fps_receiver.try_recv() {
            self.fps_text = format_fps(rate);
            newest = Some(rate);
        }
        while let Ok(event) = self.camera_events.try_recv() {
            self.on_camera_event(event);
        }
        newest
    }

    fn on_camera_event(&mut self, event: CameraEvent) {
        match event {
            CameraEvent::Opened { camera } => {
                debug!(camera = %camera, "Camera opened");
            }
            CameraEvent::Configured => {
                self.status = None;
            }
            CameraEvent::OpenFailed(e) | CameraEvent::ConfigureFailed(e) => {
                self.status = Some(e.to_string());
            }
            CameraEvent::Closed => {}
        }
    }

    pub fn fps_text(&self) -> &str {
        &self.fps_text
    }

    /// Status line message, if any
    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    /// Most recently presented framebuffer
    pub fn latest_frame(&self) -> Option<PresentedFrame> {
        lock_frame(&self.latest_frame).clone()
    }

    /// Buffer size the external texture is created with
    pub fn preview_buffer_size(&self) -> Option<PreviewSize> {
        self.surface.default_buffer_size()
    }

    pub fn is_capturing(&self) -> bool {
        self.controller.has_session()
    }

    pub fn frames_delivered(&self) -> u64 {
        self.controller.frames_delivered()
    }

    pub fn host_stats(&self) -> HostStats {
        self.host.stats()
    }

    pub fn resource_stats(&self) -> ResourceStats {
        self.host.resource_stats()
    }

    /// Change the render target size
    pub fn resize(&self, width: u32, height: u32) {
        self.host.resize(width, height);
    }
}

impl Drop for PreviewApp {
    fn drop(&mut self) {
        self.controller.stop();
        self.host.stop();
    }
}

/// Device factory for the CPU rasteriser, used by headless runs
pub fn software_device_factory(width: u32, height: u32) -> DeviceFactory {
    Box::new(move || Box::new(SoftwareDevice::new(width, height)) as Box<dyn GpuDevice>)
}
