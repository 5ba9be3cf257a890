// SPDX-License-Identifier: MPL-2.0

//! Integration tests for the camera to display pipeline

use edge_viewer::backends::camera::{
    CameraBackend, CameraBackendType, CameraCaptureController, CameraDevice, CameraEvent,
    CameraFrame, CameraInfo, CaptureSession, PreviewSize, SensorRotation,
};
use edge_viewer::errors::{CameraError, CompileError, RenderError};
use edge_viewer::gpu::{GpuDevice, SoftwareDevice, TextureDesc};
use edge_viewer::processing::{EdgeDetectionGateway, PassthroughGateway, ProcessingGateway};
use edge_viewer::render::program::VERTEX_SHADER;
use edge_viewer::render::{
    DeviceFactory, DrawOutcome, ProcessingMode, ProcessingModeFlag, RenderLoop, RenderRequester,
    Renderer, SurfaceHost,
};
use futures::channel::mpsc::UnboundedReceiver;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn software(width: u32, height: u32) -> DeviceFactory {
    Box::new(move || Box::new(SoftwareDevice::new(width, height)) as Box<dyn GpuDevice>)
}

fn gradient_frame(width: u32, height: u32) -> CameraFrame {
    let data: Vec<u8> = (0..width * height * 4).map(|i| (i * 7 % 251) as u8).collect();
    CameraFrame::rgba(width, height, data).unwrap()
}

#[test]
fn test_burst_of_signals_wakes_once() {
    let wakes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&wakes);
    let requester = RenderRequester::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let mut render = RenderLoop::new(
        Box::new(PassthroughGateway),
        ProcessingModeFlag::default(),
        requester,
    );
    let surface = render.surface();
    surface.set_default_buffer_size(PreviewSize::new(4, 4));

    let mut device = SoftwareDevice::new(4, 4);
    render.on_surface_created(&mut device).unwrap();

    for _ in 0..5 {
        surface.on_frame_available(gradient_frame(4, 4));
    }
    assert_eq!(wakes.load(Ordering::SeqCst), 5);

    assert_eq!(render.on_draw_frame(&mut device), Ok(DrawOutcome::Drawn));
    assert_eq!(render.on_draw_frame(&mut device), Ok(DrawOutcome::Idle));
    assert_eq!(render.on_draw_frame(&mut device), Ok(DrawOutcome::Idle));

    let stats = render.stats();
    assert_eq!(stats.frames_woken, 1);
    assert_eq!(stats.frames_rendered, 1);
    assert_eq!(stats.empty_wakes, 2);

    render.on_surface_destroyed(&mut device);
    assert_eq!(device.stats().textures, 0);
}

#[test]
fn test_no_wake_without_signal() {
    let mut render = RenderLoop::new(
        Box::new(PassthroughGateway),
        ProcessingModeFlag::default(),
        RenderRequester::noop(),
    );
    let mut device = SoftwareDevice::new(4, 4);
    render.on_surface_created(&mut device).unwrap();

    assert_eq!(render.on_draw_frame(&mut device), Ok(DrawOutcome::Idle));
    assert_eq!(render.stats().frames_woken, 0);
}

#[test]
fn test_toggle_is_an_involution() {
    let flag = ProcessingModeFlag::new(ProcessingMode::Raw);
    flag.toggle();
    assert_eq!(flag.get(), ProcessingMode::Edges);
    flag.toggle();
    assert_eq!(flag.get(), ProcessingMode::Raw);
}

#[test]
fn test_raw_mode_is_byte_identical() {
    let frame = gradient_frame(16, 8);
    let gateways: Vec<Box<dyn ProcessingGateway>> = vec![
        Box::new(PassthroughGateway),
        Box::new(EdgeDetectionGateway::default()),
    ];
    for mut gateway in gateways {
        let mut device = SoftwareDevice::new(16, 8);
        let input = device.create_texture(TextureDesc::texture_2d(16, 8)).unwrap();
        let output = device.create_texture(TextureDesc::texture_2d(16, 8)).unwrap();
        device.upload_texture(input, 16, 8, &frame.data).unwrap();

        gateway
            .process(&mut device, input, output, ProcessingMode::Raw)
            .unwrap();
        assert_eq!(
            device.read_texture(output).unwrap(),
            frame.data.to_vec(),
            "{} altered raw pixels",
            gateway.name()
        );
    }
}

#[test]
fn test_invalid_fragment_source_fails_surface() {
    let mut host = SurfaceHost::new(4, 4);
    let render = RenderLoop::new(
        Box::new(PassthroughGateway),
        ProcessingModeFlag::default(),
        host.requester(),
    )
    .with_shaders(VERTEX_SHADER, "@fragment fn main() -> @location(0) vec4<f32> {");

    let result = host.start(Box::new(render), software(4, 4), Box::new(|_| {}));
    assert!(
        matches!(result, Err(RenderError::Compile(CompileError::Fragment(_)))),
        "{:?}",
        result
    );
    assert!(!host.is_live());
    assert_eq!(host.resource_stats().programs, 0);
    assert_eq!(host.resource_stats().textures, 0);
}

#[test]
fn test_pause_resume_cycles_do_not_leak() {
    let mut host = SurfaceHost::new(8, 8);
    let render = RenderLoop::new(
        Box::new(PassthroughGateway),
        ProcessingModeFlag::new(ProcessingMode::Edges),
        host.requester(),
    );
    let surface = render.surface();
    surface.set_default_buffer_size(PreviewSize::new(8, 8));
    host.start(Box::new(render), software(8, 8), Box::new(|_| {}))
        .unwrap();

    let mut after_first = None;
    for cycle in 1..=10u64 {
        surface.on_frame_available(gradient_frame(8, 8));
        let stats = host.wait_for_frames(cycle, Duration::from_secs(5));
        assert_eq!(stats.drawn, cycle);

        host.pause().unwrap();
        host.resume().unwrap();

        let resources = host.resource_stats();
        match after_first {
            None => after_first = Some(resources),
            Some(first) => assert_eq!(resources, first, "cycle {}", cycle),
        }
    }
    let first = after_first.unwrap();
    assert_eq!(first.textures, 1);
    assert_eq!(first.programs, 1);
    assert_eq!(first.enabled_attributes, 0);
    assert_eq!(host.stats().surfaces_created, 11);
}

#[derive(Default)]
struct MockLog {
    calls: Mutex<Vec<&'static str>>,
}

impl MockLog {
    fn push(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }
}

fn mock_info() -> CameraInfo {
    CameraInfo {
        id: "mock".to_string(),
        name: "Mock Camera".to_string(),
        backend: CameraBackendType::TestPattern,
        rotation: SensorRotation::None,
    }
}

struct RejectingBackend(Arc<MockLog>);

impl CameraBackend for RejectingBackend {
    fn backend_type(&self) -> CameraBackendType {
        CameraBackendType::TestPattern
    }

    fn enumerate_cameras(&self) -> Result<Vec<CameraInfo>, CameraError> {
        Ok(vec![mock_info()])
    }

    fn open_camera(&self, _id: &str) -> Result<Box<dyn CameraDevice>, CameraError> {
        self.0.push("open");
        Ok(Box::new(RejectingDevice {
            info: mock_info(),
            log: Arc::clone(&self.0),
        }))
    }
}

struct RejectingDevice {
    info: CameraInfo,
    log: Arc<MockLog>,
}

impl CameraDevice for RejectingDevice {
    fn info(&self) -> &CameraInfo {
        &self.info
    }

    fn create_capture_session(
        &mut self,
        _size: PreviewSize,
    ) -> Result<Box<dyn CaptureSession>, CameraError> {
        self.log.push("create_session");
        Err(CameraError::ConfigureFailed("mock refuses".to_string()))
    }

    fn close(&mut self) -> Result<(), CameraError> {
        self.log.push("device.close");
        Ok(())
    }
}

fn next_event(events: &mut UnboundedReceiver<CameraEvent>) -> Option<CameraEvent> {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if let Ok(event) = events.try_recv() {
            return Some(event);
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    None
}

#[test]
fn test_configure_failure_leaves_session_unset() {
    let log = Arc::new(MockLog::default());
    let render = RenderLoop::new(
        Box::new(PassthroughGateway),
        ProcessingModeFlag::default(),
        RenderRequester::noop(),
    );
    let (mut controller, mut events) = CameraCaptureController::new(
        Arc::new(RejectingBackend(Arc::clone(&log))),
        render.surface(),
        PreviewSize::new(8, 8),
        0,
    );
    controller.start().unwrap();

    assert_eq!(
        next_event(&mut events),
        Some(CameraEvent::Opened {
            camera: "Mock Camera".to_string()
        })
    );
    assert!(matches!(
        next_event(&mut events),
        Some(CameraEvent::ConfigureFailed(CameraError::ConfigureFailed(_)))
    ));
    assert!(!controller.has_session());
    assert!(!log.calls.lock().unwrap().contains(&"repeating"));
    assert_eq!(render.surface().default_buffer_size(), Some(PreviewSize::new(8, 8)));

    controller.stop();
    assert_eq!(
        *log.calls.lock().unwrap(),
        vec!["open", "create_session", "device.close"]
    );
}
