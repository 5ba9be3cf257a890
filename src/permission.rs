// SPDX-License-Identifier: GPL-3.0-only

//! Runtime camera access grant
//!
//! Capture is only attempted after a [`PermissionGate`] grants access. Inside
//! a sandbox the grant comes from the XDG camera portal; outside one it comes
//! from whether the V4L2 device nodes can be opened.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use futures::StreamExt;
use tracing::{debug, info, warn};
use zbus::zvariant::{OwnedObjectPath, OwnedValue, Value};

use crate::backends::camera::CameraBackendType;
use crate::errors::CameraError;

const PORTAL_DESTINATION: &str = "org.freedesktop.portal.Desktop";
const PORTAL_PATH: &str = "/org/freedesktop/portal/desktop";
const CAMERA_INTERFACE: &str = "org.freedesktop.portal.Camera";
const REQUEST_INTERFACE: &str = "org.freedesktop.portal.Request";

/// Marker file present inside a Flatpak sandbox
const FLATPAK_INFO: &str = "/.flatpak-info";

pub trait PermissionGate: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok` when capture may start, `PermissionDenied` when the user or system
    /// refused
    fn check(&self) -> Result<(), CameraError>;
}

/// Fixed answer, for synthetic cameras and tests
#[derive(Debug, Clone, Copy)]
pub struct StaticGate {
    granted: bool,
}

impl StaticGate {
    pub fn granted() -> Self {
        Self { granted: true }
    }

    pub fn denied() -> Self {
        Self { granted: false }
    }
}

impl PermissionGate for StaticGate {
    fn name(&self) -> &'static str {
        "static"
    }

    fn check(&self) -> Result<(), CameraError> {
        if self.granted {
            Ok(())
        } else {
            Err(CameraError::PermissionDenied)
        }
    }
}

/// Grants access when at least one video node opens read-write
#[derive(Debug, Clone)]
pub struct DeviceNodeGate {
    dev_dir: PathBuf,
}

impl Default for DeviceNodeGate {
    fn default() -> Self {
        Self::new("/dev")
    }
}

impl DeviceNodeGate {
    pub fn new(dev_dir: impl Into<PathBuf>) -> Self {
        Self {
            dev_dir: dev_dir.into(),
        }
    }

    fn video_nodes(&self) -> Vec<PathBuf> {
        let Ok(entries) = std::fs::read_dir(&self.dev_dir) else {
            return Vec::new();
        };
        let mut nodes: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with("video"))
            })
            .collect();
        nodes.sort();
        nodes
    }
}

impl PermissionGate for DeviceNodeGate {
    fn name(&self) -> &'static str {
        "device-node"
    }

    fn check(&self) -> Result<(), CameraError> {
        let nodes = self.video_nodes();
        if nodes.is_empty() {
            return Err(CameraError::NoCameraFound);
        }
        let mut denied = 0;
        for node in &nodes {
            match OpenOptions::new().read(true).write(true).open(node) {
                Ok(_) => {
                    debug!(node = %node.display(), "Camera node accessible");
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::PermissionDenied => denied += 1,
                Err(e) => debug!(node = %node.display(), error = %e, "Camera node not usable"),
            }
        }
        if denied > 0 {
            warn!(denied, "No camera node may be opened by this user");
            Err(CameraError::PermissionDenied)
        } else {
            Err(CameraError::NotAvailable(
                "no camera node could be opened".to_string(),
            ))
        }
    }
}

/// XDG desktop portal camera grant, used inside a sandbox
#[derive(Debug, Clone, Default)]
pub struct PortalGate {
    fallback: DeviceNodeGate,
}

impl PortalGate {
    pub fn is_sandboxed() -> bool {
        Path::new(FLATPAK_INFO).exists()
    }
}

impl PermissionGate for PortalGate {
    fn name(&self) -> &'static str {
        "portal"
    }

    fn check(&self) -> Result<(), CameraError> {
        if !Self::is_sandboxed() {
            debug!("Not sandboxed, checking device nodes directly");
            return self.fallback.check();
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| CameraError::Backend(format!("failed to start runtime: {}", e)))?;
        match runtime.block_on(request_portal_access()) {
            Ok(true) => {
                info!("Camera access granted by portal");
                Ok(())
            }
            Ok(false) => {
                warn!("Camera access denied by portal");
                Err(CameraError::PermissionDenied)
            }
            Err(e) => {
                warn!(error = %e, "Camera portal unavailable");
                Err(CameraError::NotAvailable(e))
            }
        }
    }
}

/// Ask the portal for camera access and wait for the user's answer
async fn request_portal_access() -> Result<bool, String> {
    let connection = zbus::Connection::session()
        .await
        .map_err(|e| format!("Failed to connect to session D-Bus: {}", e))?;

    let camera = zbus::Proxy::new(&connection, PORTAL_DESTINATION, PORTAL_PATH, CAMERA_INTERFACE)
        .await
        .map_err(|e| format!("Failed to create camera portal proxy: {}", e))?;

    let present: bool = camera.get_property("IsCameraPresent").await.unwrap_or(true);
    if !present {
        return Err("portal reports no camera".to_string());
    }

    // The request object path is predictable from our bus name and token, so
    // subscribe before calling to avoid missing a fast response
    let token = format!("edge_viewer_{}", uuid::Uuid::new_v4().simple());
    let sender = connection
        .unique_name()
        .ok_or_else(|| "connection has no unique name".to_string())?
        .as_str()
        .trim_start_matches(':')
        .replace('.', "_");
    let request_path = format!("{}/request/{}/{}", PORTAL_PATH, sender, token);
    let request = zbus::Proxy::new(
        &connection,
        PORTAL_DESTINATION,
        request_path.as_str(),
        REQUEST_INTERFACE,
    )
    .await
    .map_err(|e| format!("Failed to create request proxy: {}", e))?;
    let mut responses = request
        .receive_signal("Response")
        .await
        .map_err(|e| format!("Failed to subscribe to portal response: {}", e))?;

    let mut options: HashMap<&str, Value> = HashMap::new();
    options.insert("handle_token", Value::new(token.as_str()));
    let handle: OwnedObjectPath = camera
        .call("AccessCamera", &(options,))
        .await
        .map_err(|e| format!("AccessCamera failed: {}", e))?;
    debug!(handle = %handle, "Camera access requested");

    let message = responses
        .next()
        .await
        .ok_or_else(|| "portal closed the request".to_string())?;
    let (response, _results): (u32, HashMap<String, OwnedValue>) = message
        .body()
        .deserialize()
        .map_err(|e| format!("Malformed portal response: {}", e))?;
    Ok(response == 0)
}

/// Gate matching how `backend` reaches the camera
pub fn gate_for(backend: CameraBackendType) -> Box<dyn PermissionGate> {
    match backend {
        CameraBackendType::TestPattern => Box::new(StaticGate::granted()),
        CameraBackendType::PipeWire => Box::new(PortalGate::default()),
        CameraBackendType::V4l2 => Box::new(DeviceNodeGate::default()),
    }
}
