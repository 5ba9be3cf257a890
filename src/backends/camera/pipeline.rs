// SPDX-License-Identifier: MPL-2.0

//! GStreamer camera backend
//!
//! One pipeline per capture session:
//!
//! ```text
//! pipewiresrc | v4l2src → videoconvert → videoscale → RGBA caps → appsink
//! ```
//!
//! The pipeline is built when the session is configured and only set to
//! PLAYING by the repeating request, so a session that fails to configure
//! never touches the device.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use gstreamer::prelude::*;
use gstreamer_app::AppSink;
use gstreamer_video::VideoInfo;
use tracing::{debug, error, info, warn};

use super::types::{
    AfMode, CameraBackendType, CameraFrame, CameraInfo, CaptureRequest, PreviewSize,
    SensorRotation,
};
use super::{CameraBackend, CameraDevice, CaptureSession, FrameSink};
use crate::constants::{pipeline, preview, timing};
use crate::errors::CameraError;

/// Name of the source element in the launch description
const SOURCE_NAME: &str = "src";

/// Id used for "let PipeWire pick the camera"
pub const PIPEWIRE_DEFAULT_ID: &str = "";

fn init_gstreamer() -> Result<(), CameraError> {
    gstreamer::init().map_err(|e| CameraError::Backend(e.to_string()))
}

/// PipeWire or V4L2 cameras through GStreamer
#[derive(Debug, Clone, Copy)]
pub struct GstCameraBackend {
    kind: CameraBackendType,
}

impl GstCameraBackend {
    pub fn new(kind: CameraBackendType) -> Self {
        Self { kind }
    }
}

impl CameraBackend for GstCameraBackend {
    fn backend_type(&self) -> CameraBackendType {
        self.kind
    }

    fn enumerate_cameras(&self) -> Result<Vec<CameraInfo>, CameraError> {
        let cameras = match self.kind {
            CameraBackendType::PipeWire => enumerate_pipewire()?,
            _ => enumerate_v4l2(),
        };
        debug!(backend = %self.kind, count = cameras.len(), "Enumerated cameras");
        if cameras.is_empty() {
            return Err(CameraError::NoCameraFound);
        }
        Ok(cameras)
    }

    fn open_camera(&self, id: &str) -> Result<Box<dyn CameraDevice>, CameraError> {
        init_gstreamer()?;
        let source = match self.kind {
            CameraBackendType::PipeWire => {
                if gstreamer::ElementFactory::find("pipewiresrc").is_none() {
                    return Err(CameraError::NotAvailable(
                        "pipewiresrc element not installed".to_string(),
                    ));
                }
                pipewire_source(id)
            }
            _ => {
                if !Path::new(id).exists() {
                    return Err(CameraError::NotAvailable(id.to_string()));
                }
                format!("v4l2src name={} device={}", SOURCE_NAME, id)
            }
        };

        let info = self
            .enumerate_cameras()
            .ok()
            .and_then(|cameras| cameras.into_iter().find(|c| c.id == id))
            .unwrap_or_else(|| CameraInfo {
                id: id.to_string(),
                name: id.to_string(),
                backend: self.kind,
                rotation: SensorRotation::None,
            });
        info!(camera = %info.name, id, backend = %self.kind, "Camera opened");

        Ok(Box::new(GstCameraDevice {
            info,
            source,
            closed: false,
        }))
    }
}

/// Source element for a PipeWire camera id
fn pipewire_source(id: &str) -> String {
    if id.is_empty() {
        info!("Using default PipeWire camera (auto-select)");
        format!("pipewiresrc name={} do-timestamp=true", SOURCE_NAME)
    } else if let Some(serial) = id.strip_prefix("pipewire-serial-") {
        format!(
            "pipewiresrc name={} target-object={} do-timestamp=true",
            SOURCE_NAME, serial
        )
    } else if id.starts_with("/dev/video") {
        // V4L2 node exposed through PipeWire
        format!(
            "pipewiresrc name={} path=v4l2:{} do-timestamp=true",
            SOURCE_NAME, id
        )
    } else {
        warn!(id, "Unknown PipeWire camera id, using path property");
        format!("pipewiresrc name={} path={} do-timestamp=true", SOURCE_NAME, id)
    }
}

/// Launch description for a session delivering `size` RGBA frames
pub fn launch_description(source: &str, size: PreviewSize) -> String {
    format!(
        "{} ! videoconvert ! videoscale ! \
         video/x-raw,format={},width=(int){},height=(int){} ! \
         appsink name={}",
        source,
        pipeline::OUTPUT_FORMAT,
        size.width,
        size.height,
        pipeline::SINK_NAME
    )
}

fn enumerate_pipewire() -> Result<Vec<CameraInfo>, CameraError> {
    init_gstreamer()?;
    if gstreamer::ElementFactory::find("pipewiresrc").is_none() {
        return Err(CameraError::NotAvailable(
            "pipewiresrc element not installed".to_string(),
        ));
    }

    let monitor = gstreamer::DeviceMonitor::new();
    let _ = monitor.add_filter(Some("Video/Source"), None);
    let mut cameras = Vec::new();
    if monitor.start().is_ok() {
        for device in monitor.devices() {
            let Some(props) = device.properties() else {
                continue;
            };
            // Only nodes published by the PipeWire provider carry a serial
            let Ok(serial) = props.get::<String>("object.serial") else {
                continue;
            };
            cameras.push(CameraInfo {
                id: format!("pipewire-serial-{}", serial),
                name: device.display_name().to_string(),
                backend: CameraBackendType::PipeWire,
                rotation: SensorRotation::None,
            });
        }
        monitor.stop();
    } else {
        debug!("Device monitor failed to start");
    }

    if cameras.is_empty() {
        info!("Using PipeWire auto-selection (default camera)");
        cameras.push(CameraInfo {
            id: PIPEWIRE_DEFAULT_ID.to_string(),
            name: "Default Camera (PipeWire)".to_string(),
            backend: CameraBackendType::PipeWire,
            rotation: SensorRotation::None,
        });
    }
    Ok(cameras)
}

fn enumerate_v4l2() -> Vec<CameraInfo> {
    let mut nodes = v4l::context::enum_devices();
    nodes.sort_by_key(|node| node.index());
    nodes
        .into_iter()
        .filter_map(|node| {
            let path = node.path().to_str()?.to_string();
            let name = node.name().unwrap_or_else(|| path.clone());
            Some(CameraInfo {
                id: path,
                name,
                backend: CameraBackendType::V4l2,
                rotation: SensorRotation::None,
            })
        })
        .collect()
}

struct GstCameraDevice {
    info: CameraInfo,
    source: String,
    closed: bool,
}

impl CameraDevice for GstCameraDevice {
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
        let description = launch_description(&self.source, size);
        info!(pipeline = %description, "Configuring capture session");

        let pipeline = gstreamer::parse::launch(&description)
            .map_err(|e| CameraError::ConfigureFailed(e.to_string()))?
            .dynamic_cast::<gstreamer::Pipeline>()
            .map_err(|_| {
                CameraError::ConfigureFailed("launch did not produce a pipeline".to_string())
            })?;

        let appsink = pipeline
            .by_name(pipeline::SINK_NAME)
            .ok_or_else(|| CameraError::ConfigureFailed("failed to get appsink".to_string()))?
            .dynamic_cast::<AppSink>()
            .map_err(|_| CameraError::ConfigureFailed("failed to cast appsink".to_string()))?;

        appsink.set_property("sync", false);
        appsink.set_property("max-buffers", pipeline::MAX_BUFFERS);
        appsink.set_property("drop", true);
        appsink.set_property("enable-last-sample", false);

        // Reaching READY opens the device, which surfaces bad ids and busy nodes here
        if let Err(e) = pipeline.set_state(gstreamer::State::Ready) {
            let _ = pipeline.set_state(gstreamer::State::Null);
            return Err(CameraError::ConfigureFailed(format!(
                "pipeline refused READY: {}",
                e
            )));
        }

        Ok(Box::new(GstCaptureSession {
            pipeline,
            appsink,
            size,
            rotation: self.info.rotation,
            streaming: false,
        }))
    }

    fn close(&mut self) -> Result<(), CameraError> {
        if self.closed {
            return Err(CameraError::Closed);
        }
        self.closed = true;
        info!(camera = %self.info.name, "Camera closed");
        Ok(())
    }
}

struct GstCaptureSession {
    pipeline: gstreamer::Pipeline,
    appsink: AppSink,
    size: PreviewSize,
    rotation: SensorRotation,
    streaming: bool,
}

impl GstCaptureSession {
    fn apply_af_mode(&self, af_mode: AfMode) {
        let Some(source) = self.pipeline.by_name(SOURCE_NAME) else {
            return;
        };
        if source.find_property("extra-controls").is_none() {
            debug!(?af_mode, "Source has no controls, autofocus left to the driver");
            return;
        }
        let continuous = i32::from(af_mode == AfMode::ContinuousPicture);
        let controls = gstreamer::Structure::builder("c")
            .field("focus_automatic_continuous", continuous)
            .build();
        source.set_property_from_value("extra-controls", &controls.to_value());
        debug!(?af_mode, "Autofocus mode applied");
    }

    fn install_sink(&self, sink: FrameSink) {
        let frame_counter = Arc::new(AtomicU64::new(0));
        let rotation = self.rotation;
        self.appsink.set_callbacks(
            gstreamer_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| {
                    let frame_num = frame_counter.fetch_add(1, Ordering::Relaxed);
                    let frame = pull_frame(appsink, frame_num)?;
                    sink(frame.with_rotation(rotation).with_sequence(frame_num));
                    if frame_num % timing::FRAME_LOG_INTERVAL == 0 {
                        debug!(frame = frame_num, "Camera frame delivered");
                    }
                    Ok(gstreamer::FlowSuccess::Ok)
                })
                .build(),
        );
    }

    fn shut_down(&mut self) -> Result<(), CameraError> {
        self.appsink
            .set_callbacks(gstreamer_app::AppSinkCallbacks::builder().build());
        self.streaming = false;
        self.pipeline
            .set_state(gstreamer::State::Null)
            .map_err(|e| CameraError::Backend(format!("Failed to stop pipeline: {}", e)))?;
        let (result, state, _) = self.pipeline.state(gstreamer::ClockTime::from_seconds(
            timing::STOP_TIMEOUT_SECS,
        ));
        match result {
            Ok(_) => debug!(state = ?state, "Capture pipeline stopped"),
            Err(e) => debug!(error = ?e, state = ?state, "Pipeline state change had issues"),
        }
        Ok(())
    }
}

/// Copy one appsink sample into a tightly packed RGBA frame
fn pull_frame(appsink: &AppSink, frame_num: u64) -> Result<CameraFrame, gstreamer::FlowError> {
    let log = frame_num % timing::FRAME_LOG_INTERVAL == 0;
    let sample = appsink.pull_sample().map_err(|_| gstreamer::FlowError::Eos)?;
    let buffer = sample.buffer().ok_or(gstreamer::FlowError::Error)?;
    if buffer.flags().contains(gstreamer::BufferFlags::CORRUPTED) {
        if log {
            warn!(frame = frame_num, "Buffer marked as corrupted, skipping frame");
        }
        return Err(gstreamer::FlowError::Error);
    }
    let caps = sample.caps().ok_or(gstreamer::FlowError::Error)?;
    let video_info = VideoInfo::from_caps(caps).map_err(|e| {
        if log {
            error!(frame = frame_num, error = ?e, "Failed to get video info");
        }
        gstreamer::FlowError::Error
    })?;
    let map = buffer
        .map_readable()
        .map_err(|_| gstreamer::FlowError::Error)?;

    let width = video_info.width();
    let height = video_info.height();
    let row_len = width as usize * preview::BYTES_PER_PIXEL;
    let stride = video_info.stride()[0] as usize;
    let packed = if stride == row_len {
        map.as_slice()
            .get(..row_len * height as usize)
            .map(<[u8]>::to_vec)
    } else {
        map.as_slice()
            .chunks(stride)
            .take(height as usize)
            .map(|row| row.get(..row_len))
            .collect::<Option<Vec<_>>>()
            .map(|rows| rows.concat())
    };
    let data = packed.ok_or(gstreamer::FlowError::Error)?;

    CameraFrame::rgba(width, height, data).ok_or(gstreamer::FlowError::Error)
}

impl CaptureSession for GstCaptureSession {
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
        self.apply_af_mode(request.af_mode);
        self.install_sink(sink);

        self.pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| CameraError::Backend(format!("Failed to start pipeline: {}", e)))?;
        let (result, state, pending) = self.pipeline.state(gstreamer::ClockTime::from_seconds(
            timing::START_TIMEOUT_SECS,
        ));
        debug!(result = ?result, state = ?state, pending = ?pending, "Pipeline state");
        if state != gstreamer::State::Playing {
            warn!("Pipeline is not in PLAYING state");
        }
        self.streaming = true;
        info!(size = %self.size, "Repeating preview request started");
        Ok(())
    }

    fn close(&mut self) -> Result<(), CameraError> {
        self.shut_down()
    }
}

impl Drop for GstCaptureSession {
    fn drop(&mut self) {
        if self.streaming {
            debug!("Dropping capture session - explicitly stopping");
        }
        self.appsink
            .set_callbacks(gstreamer_app::AppSinkCallbacks::builder().build());
        let _ = self.pipeline.set_state(gstreamer::State::Null);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_description_fixes_size_and_format() {
        let description =
            launch_description("v4l2src device=/dev/video0", PreviewSize::new(1280, 720));
        assert!(description.starts_with("v4l2src device=/dev/video0 ! videoconvert"));
        assert!(description.contains("format=RGBA,width=(int)1280,height=(int)720"));
        assert!(description.ends_with("appsink name=sink"));
    }

    #[test]
    fn test_pipewire_source_from_id() {
        assert!(pipewire_source("").ends_with("do-timestamp=true"));
        assert!(pipewire_source("pipewire-serial-42").contains("target-object=42"));
        assert!(pipewire_source("/dev/video2").contains("path=v4l2:/dev/video2"));
    }

    #[test]
    fn test_missing_v4l2_node_is_not_available() {
        let backend = GstCameraBackend::new(CameraBackendType::V4l2);
        // Either GStreamer is missing or the node is; both are NotAvailable/Backend
        let result = backend.open_camera("/dev/video-does-not-exist");
        assert!(matches!(
            result,
            Err(CameraError::NotAvailable(_)) | Err(CameraError::Backend(_))
        ));
    }
}
