// SPDX-License-Identifier: GPL-3.0-only

//! Render thread hosting a [`Renderer`].
//!
//! The host owns the GPU device and calls the renderer only from its own
//! thread. A draw happens when a [`RenderRequester`] marks the surface dirty;
//! there is no fixed tick. Pausing destroys the surface resources and resuming
//! creates them again, and both wait for the render thread before returning.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::texture_bridge::RenderRequester;
use super::{DrawOutcome, Renderer};
use crate::constants::{threads, timing};
use crate::errors::RenderError;
use crate::gpu::{GpuDevice, PresentedFrame, ResourceStats};

/// Builds the device on the render thread
pub type DeviceFactory = Box<dyn FnOnce() -> Box<dyn GpuDevice> + Send>;

/// Receives every drawn frame, on the render thread
pub type Presenter = Box<dyn FnMut(PresentedFrame) + Send>;

/// Counters kept by the render thread
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostStats {
    pub wakes: u64,
    pub drawn: u64,
    pub skipped: u64,
    /// Wakes that found nothing to draw
    pub idle: u64,
    pub errors: u64,
    pub surfaces_created: u64,
    pub surfaces_destroyed: u64,
}

#[derive(Debug, Default)]
struct HostState {
    dirty: bool,
    paused: bool,
    quit: bool,
    size: (u32, u32),
    resized: bool,
    /// Surface resources exist
    live: bool,
    /// A create or destroy is running
    busy: bool,
    /// Creation failed; nothing happens until the next resume
    failed: bool,
    last_error: Option<RenderError>,
    exited: bool,
    resources: ResourceStats,
    stats: HostStats,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<HostState>,
    wake: Condvar,
    ack: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Block until `done` holds, the thread exits, or `timeout` passes
    fn wait_until(
        &self,
        timeout: Duration,
        done: impl Fn(&HostState) -> bool,
    ) -> Result<MutexGuard<'_, HostState>, RenderError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if done(&state) {
                return Ok(state);
            }
            if state.exited {
                return Err(RenderError::HostStopped);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!("Render thread did not respond in time");
                return Err(RenderError::HostStopped);
            }
            state = match self.ack.wait_timeout(state, remaining) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}

/// Owner of the render thread
pub struct SurfaceHost {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl SurfaceHost {
    pub fn new(width: u32, height: u32) -> Self {
        let shared = Shared::default();
        shared.lock().size = (width, height);
        Self {
            shared: Arc::new(shared),
            thread: None,
        }
    }

    /// Requester that marks this host dirty and wakes its thread
    pub fn requester(&self) -> RenderRequester {
        let shared = Arc::clone(&self.shared);
        RenderRequester::new(move || {
            shared.lock().dirty = true;
            shared.wake.notify_one();
        })
    }

    /// Spawn the render thread and create the surface.
    ///
    /// A creation failure is returned here. The thread stays up, so a later
    /// [`resume`](Self::resume) can retry.
    pub fn start(
        &mut self,
        renderer: Box<dyn Renderer>,
        device_factory: DeviceFactory,
        presenter: Presenter,
    ) -> Result<(), RenderError> {
        if self.thread.is_some() {
            return Err(RenderError::SurfaceFailed(
                "render thread already running".to_string(),
            ));
        }

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(threads::RENDER.to_string())
            .spawn(move || {
                let device = device_factory();
                RenderThread {
                    shared,
                    renderer,
                    device,
                    presenter,
                }
                .run();
            })
            .map_err(|e| {
                RenderError::SurfaceFailed(format!("failed to spawn render thread: {}", e))
            })?;
        self.thread = Some(handle);

        self.wait_for_surface()
    }

    /// Destroy the surface resources and stop drawing
    pub fn pause(&self) -> Result<(), RenderError> {
        if self.thread.is_none() {
            return Err(RenderError::HostStopped);
        }
        {
            let mut state = self.shared.lock();
            if state.paused {
                return Ok(());
            }
            state.paused = true;
        }
        self.shared.wake.notify_one();
        self.shared
            .wait_until(timing::HOST_ACK_TIMEOUT, |s| !s.live && !s.busy)?;
        debug!("Render surface paused");
        Ok(())
    }

    /// Recreate the surface resources, retrying a failed creation
    pub fn resume(&self) -> Result<(), RenderError> {
        if self.thread.is_none() {
            return Err(RenderError::HostStopped);
        }
        {
            let mut state = self.shared.lock();
            if !state.paused && state.live {
                return Ok(());
            }
            state.paused = false;
            state.failed = false;
            state.last_error = None;
        }
        self.shared.wake.notify_one();
        self.wait_for_surface()
    }

    fn wait_for_surface(&self) -> Result<(), RenderError> {
        let mut state = self
            .shared
            .wait_until(timing::HOST_ACK_TIMEOUT, |s| !s.busy && (s.live || s.failed))?;
        if state.failed {
            return Err(state.last_error.take().unwrap_or_else(|| {
                RenderError::SurfaceFailed("surface creation failed".to_string())
            }));
        }
        Ok(())
    }

    /// Change the render target size; applied on the render thread
    pub fn resize(&self, width: u32, height: u32) {
        {
            let mut state = self.shared.lock();
            state.size = (width, height);
            state.resized = true;
        }
        self.shared.wake.notify_one();
    }

    pub fn is_paused(&self) -> bool {
        self.shared.lock().paused
    }

    /// Whether surface resources currently exist
    pub fn is_live(&self) -> bool {
        self.shared.lock().live
    }

    /// Device resource counts as of the last render thread action
    pub fn resource_stats(&self) -> ResourceStats {
        self.shared.lock().resources
    }

    pub fn stats(&self) -> HostStats {
        self.shared.lock().stats
    }

    /// Wait until `count` frames have been drawn in total, returning the
    /// counters at that point (or at timeout)
    pub fn wait_for_frames(&self, count: u64, timeout: Duration) -> HostStats {
        match self
            .shared
            .wait_until(timeout, |s| s.stats.drawn >= count)
        {
            Ok(state) => state.stats,
            Err(_) => self.stats(),
        }
    }

    /// Release the surface and join the render thread
    pub fn stop(&mut self) {
        let Some(handle) = self.thread.take() else {
            return;
        };
        self.shared.lock().quit = true;
        self.shared.wake.notify_one();
        if handle.join().is_err() {
            warn!("Render thread panicked");
        } else {
            debug!("Render thread joined");
        }
    }
}

impl Drop for SurfaceHost {
    fn drop(&mut self) {
        self.stop();
    }
}

enum Action {
    Create(u32, u32),
    Resize(u32, u32),
    Destroy,
    Draw,
    Quit,
}

struct RenderThread {
    shared: Arc<Shared>,
    renderer: Box<dyn Renderer>,
    device: Box<dyn GpuDevice>,
    presenter: Presenter,
}

impl RenderThread {
    fn run(mut self) {
        info!(device = %self.device.name(), "Render thread started");
        let mut live = false;

        loop {
            match self.next_action() {
                Action::Quit => break,
                Action::Create(width, height) => live = self.create_surface(width, height),
                Action::Destroy => {
                    self.destroy_surface();
                    live = false;
                }
                Action::Resize(width, height) => {
                    if let Err(e) = self
                        .renderer
                        .on_surface_changed(self.device.as_mut(), width, height)
                    {
                        warn!(error = %e, width, height, "Failed to resize render surface");
                    }
                }
                Action::Draw => self.draw(),
            }
        }

        if live {
            self.destroy_surface();
        }
        self.shared.lock().exited = true;
        self.shared.ack.notify_all();
        info!("Render thread exiting");
    }

    fn next_action(&self) -> Action {
        let mut state = self.shared.lock();
        loop {
            if state.quit {
                return Action::Quit;
            }
            if state.paused && state.live {
                state.busy = true;
                return Action::Destroy;
            }
            if !state.paused && !state.live && !state.failed {
                state.busy = true;
                state.resized = false;
                return Action::Create(state.size.0, state.size.1);
            }
            if state.resized {
                state.resized = false;
                if state.live {
                    return Action::Resize(state.size.0, state.size.1);
                }
            }
            if state.dirty {
                state.dirty = false;
                if state.live {
                    state.stats.wakes += 1;
                    return Action::Draw;
                }
            }
            state = self
                .shared
                .wake
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    fn create_surface(&mut self, width: u32, height: u32) -> bool {
        let device = self.device.as_mut();
        let mut result = self.renderer.on_surface_created(device);
        if result.is_ok() {
            result = self.renderer.on_surface_changed(device, width, height);
            if result.is_err() {
                self.renderer.on_surface_destroyed(device);
            }
        }

        let live = result.is_ok();
        {
            let mut state = self.shared.lock();
            state.busy = false;
            state.live = live;
            match result {
                Ok(()) => {
                    state.stats.surfaces_created += 1;
                    info!(width, height, "Render surface ready");
                }
                Err(e) => {
                    error!(error = %e, "Render surface failed to initialize");
                    state.failed = true;
                    state.last_error = Some(e);
                }
            }
            state.resources = self.device.stats();
        }
        self.shared.ack.notify_all();
        live
    }

    fn destroy_surface(&mut self) {
        self.renderer.on_surface_destroyed(self.device.as_mut());
        {
            let mut state = self.shared.lock();
            state.busy = false;
            state.live = false;
            state.stats.surfaces_destroyed += 1;
            state.resources = self.device.stats();
        }
        self.shared.ack.notify_all();
        debug!("Render surface destroyed");
    }

    fn draw(&mut self) {
        let outcome = self.renderer.on_draw_frame(self.device.as_mut());
        if let Ok(DrawOutcome::Drawn) = outcome {
            match self.device.read_framebuffer() {
                Ok(frame) => (self.presenter)(frame),
                Err(e) => warn!(error = %e, "Failed to read back drawn frame"),
            }
        }

        {
            let mut state = self.shared.lock();
            match &outcome {
                Ok(DrawOutcome::Drawn) => state.stats.drawn += 1,
                Ok(DrawOutcome::Skipped) => state.stats.skipped += 1,
                Ok(DrawOutcome::Idle) => state.stats.idle += 1,
                Err(e) => {
                    state.stats.errors += 1;
                    if state.stats.errors % timing::FRAME_LOG_INTERVAL == 1 {
                        warn!(error = %e, errors = state.stats.errors, "Draw failed");
                    }
                }
            }
            state.resources = self.device.stats();
        }
        self.shared.ack.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::types::{CameraFrame, PreviewSize};
    use crate::gpu::SoftwareDevice;
    use crate::processing::PassthroughGateway;
    use crate::render::mode::ProcessingModeFlag;
    use crate::render::program::VERTEX_SHADER;
    use crate::render::render_loop::RenderLoop;
    use crate::render::texture_bridge::FrameSurface;

    const WAIT: Duration = Duration::from_secs(5);

    fn software(width: u32, height: u32) -> DeviceFactory {
        Box::new(move || Box::new(SoftwareDevice::new(width, height)) as Box<dyn GpuDevice>)
    }

    fn render_loop(host: &SurfaceHost) -> (RenderLoop, FrameSurface) {
        let render = RenderLoop::new(
            Box::new(PassthroughGateway),
            ProcessingModeFlag::default(),
            host.requester(),
        );
        let surface = render.surface();
        surface.set_default_buffer_size(PreviewSize::new(4, 4));
        (render, surface)
    }

    #[test]
    fn test_signalled_frame_is_presented() {
        let mut host = SurfaceHost::new(4, 4);
        let (render, surface) = render_loop(&host);
        let presented = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&presented);
        host.start(
            Box::new(render),
            software(4, 4),
            Box::new(move |frame| sink.lock().unwrap().push(frame)),
        )
        .unwrap();

        surface.on_frame_available(CameraFrame::rgba(4, 4, vec![90; 64]).unwrap());
        let stats = host.wait_for_frames(1, WAIT);
        assert_eq!(stats.drawn, 1);

        let frames = presented.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].pixel(2, 2), Some([90, 90, 90, 90]));
    }

    #[test]
    fn test_invalid_shader_fails_start() {
        let mut host = SurfaceHost::new(4, 4);
        let (render, _surface) = render_loop(&host);
        let render = render.with_shaders(VERTEX_SHADER, "this is not wgsl");
        let result = host.start(Box::new(render), software(4, 4), Box::new(|_| {}));

        assert!(matches!(result, Err(RenderError::Compile(_))));
        assert!(!host.is_live());
        assert_eq!(host.resource_stats(), ResourceStats::default());
    }

    #[test]
    fn test_pause_releases_and_resume_recreates() {
        let mut host = SurfaceHost::new(4, 4);
        let (render, _surface) = render_loop(&host);
        host.start(Box::new(render), software(4, 4), Box::new(|_| {}))
            .unwrap();
        let live = host.resource_stats();
        assert_eq!(live.textures, 1);
        assert_eq!(live.programs, 1);

        host.pause().unwrap();
        assert!(host.is_paused());
        assert_eq!(host.resource_stats(), ResourceStats::default());

        host.resume().unwrap();
        assert_eq!(host.resource_stats(), live);
        assert_eq!(host.stats().surfaces_created, 2);
        assert_eq!(host.stats().surfaces_destroyed, 1);
    }

    #[test]
    fn test_lifecycle_before_start_is_rejected() {
        let host = SurfaceHost::new(4, 4);
        assert_eq!(host.pause(), Err(RenderError::HostStopped));
        assert_eq!(host.resume(), Err(RenderError::HostStopped));
    }

    #[test]
    fn test_signals_while_paused_are_not_drawn() {
        let mut host = SurfaceHost::new(4, 4);
        let (render, surface) = render_loop(&host);
        host.start(Box::new(render), software(4, 4), Box::new(|_| {}))
            .unwrap();
        host.pause().unwrap();

        surface.on_frame_available(CameraFrame::rgba(4, 4, vec![1; 64]).unwrap());
        thread::sleep(Duration::from_millis(50));
        assert_eq!(host.stats().drawn, 0);
        assert_eq!(host.stats().wakes, 0);
    }
}
