// SPDX-License-Identifier: GPL-3.0-only

//! Camera producer driving one device into the preview surface.
//!
//! Every camera callback runs on a dedicated [`BackgroundWorker`]:
//!
//! ```text
//! start ─► open ─► on_opened ─► start_preview ─┬─► on_configured ─► repeating request
//!                                              └─► on_configure_failed
//! frame ─► latest-frame slot ─► drain_latest_frame ─► FrameSurface::on_frame_available
//! stop  ─► close session ─► close device ─► join worker
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};
use tracing::{debug, error, info, warn};

use super::types::{CameraFrame, CaptureRequest, PreviewSize};
use super::worker::{BackgroundWorker, WorkerHandle};
use super::{CameraBackend, CameraDevice, CaptureSession, FrameSink};
use crate::constants::{threads, timing};
use crate::errors::CameraError;
use crate::render::texture_bridge::FrameSurface;

/// Camera lifecycle notifications for the UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraEvent {
    Opened { camera: String },
    OpenFailed(CameraError),
    /// Repeating request running
    Configured,
    /// Terminal for this open attempt; no session exists
    ConfigureFailed(CameraError),
    Closed,
}

#[derive(Default)]
struct CaptureState {
    device: Option<Box<dyn CameraDevice>>,
    session: Option<Box<dyn CaptureSession>>,
}

struct Shared {
    backend: Arc<dyn CameraBackend>,
    surface: FrameSurface,
    size: PreviewSize,
    camera_index: usize,
    closing: AtomicBool,
    frames: AtomicU64,
    /// Newest frame not yet handed to the worker; older ones are overwritten
    latest_frame: Mutex<Option<CameraFrame>>,
    /// Set while a drain job sits in the worker queue
    drain_queued: AtomicBool,
    state: Mutex<CaptureState>,
    events: UnboundedSender<CameraEvent>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, CaptureState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn latest(&self) -> MutexGuard<'_, Option<CameraFrame>> {
        self.latest_frame
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    fn emit(&self, event: CameraEvent) {
        if self.events.unbounded_send(event).is_err() {
            debug!("Camera event receiver gone");
        }
    }
}

pub struct CameraCaptureController {
    shared: Arc<Shared>,
    worker: Option<BackgroundWorker>,
}

impl CameraCaptureController {
    /// Controller for the `camera_index`-th camera of `backend`, delivering
    /// `size` frames into `surface`
    pub fn new(
        backend: Arc<dyn CameraBackend>,
        surface: FrameSurface,
        size: PreviewSize,
        camera_index: usize,
    ) -> (Self, UnboundedReceiver<CameraEvent>) {
        let (events, receiver) = unbounded();
        let controller = Self {
            shared: Arc::new(Shared {
                backend,
                surface,
                size,
                camera_index,
                closing: AtomicBool::new(false),
                frames: AtomicU64::new(0),
                latest_frame: Mutex::new(None),
                drain_queued: AtomicBool::new(false),
                state: Mutex::new(CaptureState::default()),
                events,
            }),
            worker: None,
        };
        (controller, receiver)
    }

    /// Start the background worker and open the camera on it.
    ///
    /// Returns once the open is queued; the outcome arrives as a
    /// [`CameraEvent`].
    pub fn start(&mut self) -> Result<(), CameraError> {
        if self.worker.is_some() {
            debug!("Camera already started");
            return Ok(());
        }
        let worker = BackgroundWorker::start(threads::CAMERA_BACKGROUND)?;
        self.shared.closing.store(false, Ordering::SeqCst);
        // A frame left over from the previous session is stale
        self.shared.latest().take();
        self.shared.drain_queued.store(false, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        let handle = worker.handle();
        if !worker.post(move || open_camera(&shared, &handle)) {
            return Err(CameraError::Backend("camera worker exited".to_string()));
        }
        self.worker = Some(worker);
        Ok(())
    }

    /// Close the session, then the device, then join the worker.
    ///
    /// Each step is best effort. No camera callback runs after this returns.
    pub fn stop(&mut self) {
        let Some(mut worker) = self.worker.take() else {
            return;
        };
        info!("Stopping camera");
        self.shared.closing.store(true, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        if !worker.post(move || close_camera(&shared)) {
            warn!("Camera worker gone, closing camera on the caller");
            close_camera(&self.shared);
        }
        worker.quit_safely();
        self.shared.emit(CameraEvent::Closed);
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Whether a configured session is streaming
    pub fn has_session(&self) -> bool {
        self.shared.lock().session.is_some()
    }

    pub fn has_device(&self) -> bool {
        self.shared.lock().device.is_some()
    }

    pub fn frames_delivered(&self) -> u64 {
        self.shared.frames.load(Ordering::Relaxed)
    }

    pub fn preview_size(&self) -> PreviewSize {
        self.shared.size
    }
}

impl Drop for CameraCaptureController {
    fn drop(&mut self) {
        self.stop();
    }
}

fn open_camera(shared: &Arc<Shared>, worker: &WorkerHandle) {
    if shared.is_closing() {
        return;
    }
    let opened = shared.backend.enumerate_cameras().and_then(|cameras| {
        let camera = cameras
            .get(shared.camera_index)
            .ok_or(CameraError::NoCameraFound)?;
        shared.backend.open_camera(&camera.id)
    });
    match opened {
        Ok(device) => on_opened(shared, worker, device),
        Err(e) => {
            error!(error = %e, index = shared.camera_index, "Failed to open camera");
            shared.emit(CameraEvent::OpenFailed(e));
        }
    }
}

fn on_opened(shared: &Arc<Shared>, worker: &WorkerHandle, mut device: Box<dyn CameraDevice>) {
    let camera = device.info().name.clone();
    info!(camera = %camera, id = %device.info().id, "Camera device opened");
    if shared.is_closing() {
        if let Err(e) = device.close() {
            warn!(error = %e, "Failed to close camera opened during shutdown");
        }
        return;
    }
    shared.lock().device = Some(device);
    shared.emit(CameraEvent::Opened { camera });
    start_preview(shared, worker);
}

fn start_preview(shared: &Arc<Shared>, worker: &WorkerHandle) {
    // Camera output and texture buffer share one size
    shared.surface.set_default_buffer_size(shared.size);

    let created = match shared.lock().device.as_mut() {
        Some(device) => device.create_capture_session(shared.size),
        None => Err(CameraError::Closed),
    };
    match created {
        Ok(session) => on_configured(shared, worker, session),
        Err(e) => on_configure_failed(shared, e),
    }
}

fn on_configured(
    shared: &Arc<Shared>,
    worker: &WorkerHandle,
    mut session: Box<dyn CaptureSession>,
) {
    if shared.is_closing() {
        if let Err(e) = session.close() {
            warn!(error = %e, "Failed to close session configured during shutdown");
        }
        return;
    }

    let frame_shared = Arc::clone(shared);
    let frame_worker = worker.clone();
    let sink: FrameSink = Arc::new(move |frame| {
        *frame_shared.latest() = Some(frame);
        if frame_shared.drain_queued.swap(true, Ordering::SeqCst) {
            return;
        }
        let shared = Arc::clone(&frame_shared);
        if !frame_worker.post(move || drain_latest_frame(&shared)) {
            // Worker quit; frames are unwanted until the next start
            frame_shared.drain_queued.store(false, Ordering::SeqCst);
        }
    });

    if let Err(e) = session.set_repeating_request(CaptureRequest::preview(shared.size), sink) {
        if let Err(close_error) = session.close() {
            warn!(error = %close_error, "Failed to close rejected capture session");
        }
        on_configure_failed(shared, e);
        return;
    }

    info!(size = %shared.size, "Capture session configured");
    shared.lock().session = Some(session);
    shared.emit(CameraEvent::Configured);
}

fn on_configure_failed(shared: &Shared, e: CameraError) {
    error!(error = %e, size = %shared.size, "Capture session configuration failed");
    shared.emit(CameraEvent::ConfigureFailed(e));
}

/// Hand the newest waiting frame to the surface.
///
/// The queued flag is cleared before the slot is taken, so a frame stored
/// after the take always schedules another drain.
fn drain_latest_frame(shared: &Shared) {
    shared.drain_queued.store(false, Ordering::SeqCst);
    let frame = shared.latest().take();
    if let Some(frame) = frame {
        on_frame_available(shared, frame);
    }
}

fn on_frame_available(shared: &Shared, frame: CameraFrame) {
    if shared.is_closing() {
        return;
    }
    let count = shared.frames.fetch_add(1, Ordering::Relaxed) + 1;
    if count % timing::FRAME_LOG_INTERVAL == 0 {
        debug!(frames = count, sequence = frame.sequence, "Camera frames delivered");
    }
    shared.surface.on_frame_available(frame);
}

fn close_camera(shared: &Shared) {
    shared.latest().take();
    let (session, device) = {
        let mut state = shared.lock();
        (state.session.take(), state.device.take())
    };
    if let Some(mut session) = session {
        match session.close() {
            Ok(()) => debug!("Capture session closed"),
            Err(e) => warn!(error = %e, "Failed to close capture session"),
        }
    }
    if let Some(mut device) = device {
        match device.close() {
            Ok(()) => info!(camera = %device.info().name, "Camera device closed"),
            Err(e) => warn!(error = %e, "Failed to close camera device"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::types::{CameraBackendType, CameraInfo, SensorRotation};
    use crate::gpu::{GpuDevice, SoftwareDevice};
    use crate::render::texture_bridge::{ExternalTextureBridge, RenderRequester};
    use std::thread;
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct Calls {
        log: Mutex<Vec<String>>,
        threads: Mutex<Vec<Option<String>>>,
        sink: Mutex<Option<FrameSink>>,
    }

    impl Calls {
        fn record(&self, call: &str) {
            self.log.lock().unwrap().push(call.to_string());
            self.threads
                .lock()
                .unwrap()
                .push(thread::current().name().map(str::to_string));
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    struct MockBackend {
        configure_fails: bool,
        calls: Arc<Calls>,
    }

    struct MockDevice {
        info: CameraInfo,
        configure_fails: bool,
        calls: Arc<Calls>,
    }

    struct MockSession {
        calls: Arc<Calls>,
    }

    impl CameraBackend for MockBackend {
        fn backend_type(&self) -> CameraBackendType {
            CameraBackendType::TestPattern
        }

        fn enumerate_cameras(&self) -> Result<Vec<CameraInfo>, CameraError> {
            Ok(vec![CameraInfo {
                id: "mock0".to_string(),
                name: "Mock".to_string(),
                backend: CameraBackendType::TestPattern,
                rotation: SensorRotation::None,
            }])
        }

        fn open_camera(&self, id: &str) -> Result<Box<dyn CameraDevice>, CameraError> {
            self.calls.record("open");
            let info = self.enumerate_cameras()?.remove(0);
            assert_eq!(info.id, id);
            Ok(Box::new(MockDevice {
                info,
                configure_fails: self.configure_fails,
                calls: Arc::clone(&self.calls),
            }))
        }
    }

    impl CameraDevice for MockDevice {
        fn info(&self) -> &CameraInfo {
            &self.info
        }

        fn create_capture_session(
            &mut self,
            _size: PreviewSize,
        ) -> Result<Box<dyn CaptureSession>, CameraError> {
            self.calls.record("create_session");
            if self.configure_fails {
                return Err(CameraError::ConfigureFailed("mock".to_string()));
            }
            Ok(Box::new(MockSession {
                calls: Arc::clone(&self.calls),
            }))
        }

        fn close(&mut self) -> Result<(), CameraError> {
            self.calls.record("device.close");
            Ok(())
        }
    }

    impl CaptureSession for MockSession {
        fn set_repeating_request(
            &mut self,
            _request: CaptureRequest,
            sink: FrameSink,
        ) -> Result<(), CameraError> {
            self.calls.record("repeating");
            *self.calls.sink.lock().unwrap() = Some(sink);
            Ok(())
        }

        fn close(&mut self) -> Result<(), CameraError> {
            self.calls.record("session.close");
            // Fails on purpose; teardown must still close the device
            Err(CameraError::Backend("mock close failure".to_string()))
        }
    }

    fn controller(
        configure_fails: bool,
    ) -> (
        CameraCaptureController,
        UnboundedReceiver<CameraEvent>,
        FrameSurface,
        Arc<Calls>,
    ) {
        let calls = Arc::new(Calls::default());
        let backend = Arc::new(MockBackend {
            configure_fails,
            calls: Arc::clone(&calls),
        });
        let surface = ExternalTextureBridge::new(RenderRequester::noop()).surface();
        let (controller, events) = CameraCaptureController::new(
            backend,
            surface.clone(),
            PreviewSize::new(2, 2),
            0,
        );
        (controller, events, surface, calls)
    }

    fn wait_until(mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        done()
    }

    fn wait_for_event(
        events: &mut UnboundedReceiver<CameraEvent>,
        wanted: fn(&CameraEvent) -> bool,
    ) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            match events.try_recv() {
                Ok(event) if wanted(&event) => return,
                Ok(_) => {}
                Err(_) => thread::sleep(Duration::from_millis(5)),
            }
        }
        panic!("expected camera event did not arrive");
    }

    #[test]
    fn test_configure_failure_leaves_session_unset() {
        let (mut controller, mut events, surface, calls) = controller(true);
        controller.start().unwrap();
        wait_for_event(&mut events, |e| matches!(e, CameraEvent::ConfigureFailed(_)));

        assert!(!controller.has_session());
        assert!(!calls.log().contains(&"repeating".to_string()));
        assert_eq!(surface.default_buffer_size(), Some(PreviewSize::new(2, 2)));

        controller.stop();
        assert_eq!(calls.log(), vec!["open", "create_session", "device.close"]);
    }

    #[test]
    fn test_callbacks_run_on_background_worker() {
        let (mut controller, mut events, _surface, calls) = controller(false);
        controller.start().unwrap();
        wait_for_event(&mut events, |e| *e == CameraEvent::Configured);
        controller.stop();

        let names = calls.threads.lock().unwrap().clone();
        assert!(!names.is_empty());
        for name in names {
            assert_eq!(name.as_deref(), Some(threads::CAMERA_BACKGROUND));
        }
    }

    #[test]
    fn test_frames_reach_surface() {
        let (mut controller, mut events, surface, calls) = controller(false);
        controller.start().unwrap();
        wait_for_event(&mut events, |e| *e == CameraEvent::Configured);
        assert!(controller.has_session());

        let sink = calls.sink.lock().unwrap().clone().unwrap();
        sink(CameraFrame::rgba(2, 2, vec![7u8; 16]).unwrap());

        let deadline = Instant::now() + Duration::from_secs(2);
        while !surface.is_pending() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(surface.is_pending());
        assert_eq!(controller.frames_delivered(), 1);
    }

    #[test]
    fn test_frames_behind_a_busy_worker_coalesce_to_newest() {
        let calls = Arc::new(Calls::default());
        let backend = Arc::new(MockBackend {
            configure_fails: false,
            calls: Arc::clone(&calls),
        });
        let mut bridge = ExternalTextureBridge::new(RenderRequester::noop());
        let (mut controller, mut events) =
            CameraCaptureController::new(backend, bridge.surface(), PreviewSize::new(2, 2), 0);
        controller.start().unwrap();
        wait_for_event(&mut events, |e| *e == CameraEvent::Configured);
        let sink = calls.sink.lock().unwrap().clone().unwrap();

        // Hold the worker so every frame arrives while it is busy
        let (release, held) = std::sync::mpsc::channel::<()>();
        assert!(controller.worker.as_ref().unwrap().post(move || {
            let _ = held.recv();
        }));
        for value in 0..50u8 {
            sink(CameraFrame::rgba(2, 2, vec![value; 16]).unwrap());
        }
        release.send(()).unwrap();

        let surface = bridge.surface();
        assert!(wait_until(|| surface.is_pending()));
        thread::sleep(Duration::from_millis(20));
        assert_eq!(controller.frames_delivered(), 1);

        let mut device = SoftwareDevice::new(2, 2);
        let texture = bridge.attach(&mut device).unwrap();
        assert!(bridge.drain_if_ready());
        bridge.update_tex_image(&mut device).unwrap();
        assert_eq!(device.read_texture(texture).unwrap(), vec![49u8; 16]);

        controller.stop();
    }

    #[test]
    fn test_stop_tears_down_in_order_despite_failures() {
        let (mut controller, mut events, surface, calls) = controller(false);
        controller.start().unwrap();
        wait_for_event(&mut events, |e| *e == CameraEvent::Configured);
        let sink = calls.sink.lock().unwrap().clone().unwrap();

        controller.stop();
        assert_eq!(
            calls.log(),
            vec!["open", "create_session", "repeating", "session.close", "device.close"]
        );
        assert!(!controller.has_session());
        assert!(!controller.has_device());
        wait_for_event(&mut events, |e| *e == CameraEvent::Closed);

        // A late frame from the stopped session is ignored
        sink(CameraFrame::rgba(2, 2, vec![1u8; 16]).unwrap());
        thread::sleep(Duration::from_millis(20));
        assert!(!surface.is_pending());
    }

    #[test]
    fn test_restart_after_stop_opens_again() {
        let (mut controller, mut events, _surface, calls) = controller(false);
        for _ in 0..2 {
            controller.start().unwrap();
            wait_for_event(&mut events, |e| *e == CameraEvent::Configured);
            controller.stop();
        }
        let opens = calls.log().iter().filter(|c| *c == "open").count();
        assert_eq!(opens, 2);
    }
}
