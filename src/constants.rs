// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

use std::time::Duration;

/// Fixed preview configuration
///
/// The camera request and the external texture's default buffer size are both
/// configured from these values, so they always agree.
pub mod preview {
    /// Preview width requested from the camera
    pub const WIDTH: u32 = 1280;

    /// Preview height requested from the camera
    pub const HEIGHT: u32 = 720;

    /// Default offscreen render target width
    pub const SURFACE_WIDTH: u32 = 640;

    /// Default offscreen render target height
    pub const SURFACE_HEIGHT: u32 = 360;

    /// Bytes per pixel of the RGBA frames handed to the texture bridge
    pub const BYTES_PER_PIXEL: usize = 4;
}

/// Frame-rate accounting
pub mod fps {
    use super::Duration;

    /// Length of one FPS window; a rate is emitted once a window has elapsed
    pub const WINDOW: Duration = Duration::from_secs(1);

    /// Placeholder shown before the first window completes
    pub const PLACEHOLDER: &str = "FPS: --";
}

/// Edge detection parameters
pub mod edges {
    /// Lower hysteresis threshold on the gradient magnitude
    pub const LOW_THRESHOLD: f32 = 80.0;

    /// Upper hysteresis threshold on the gradient magnitude
    pub const HIGH_THRESHOLD: f32 = 100.0;
}

/// User-facing labels
pub mod labels {
    /// Toggle label while raw frames are displayed
    pub const SHOW_EDGES: &str = "Show Edges";

    /// Toggle label while processed frames are displayed
    pub const SHOW_RAW: &str = "Show Raw";

    pub const PERMISSION_DENIED: &str = "Camera permission denied";

    pub const PAUSED: &str = "Paused";
}

/// GStreamer pipeline constants
pub mod pipeline {
    /// Maximum buffer queue size (keep small for low latency)
    pub const MAX_BUFFERS: u32 = 2;

    /// Output pixel format for appsink
    pub const OUTPUT_FORMAT: &str = "RGBA";

    /// Name of the appsink element in the launch description
    pub const SINK_NAME: &str = "sink";
}

/// Timing constants
pub mod timing {
    use super::Duration;

    /// Frame counter modulo for periodic logging
    pub const FRAME_LOG_INTERVAL: u64 = 30;

    /// Pipeline state change timeout on stop
    pub const STOP_TIMEOUT_SECS: u64 = 2;

    /// Pipeline playing state timeout on start
    pub const START_TIMEOUT_SECS: u64 = 5;

    /// How long lifecycle calls wait for the render thread to acknowledge
    pub const HOST_ACK_TIMEOUT: Duration = Duration::from_secs(5);

    /// Terminal input poll interval
    pub const INPUT_POLL: Duration = Duration::from_millis(16);
}

/// Names given to spawned threads
pub mod threads {
    /// Camera callback context
    pub const CAMERA_BACKGROUND: &str = "CameraBackground";

    /// GPU render context
    pub const RENDER: &str = "PreviewRender";

    /// Synthetic frame producer
    pub const TEST_PATTERN: &str = "TestPattern";
}

/// Application identifier used for config and log directories
pub const APP_NAME: &str = "edge-viewer";

/// Build version, injected by build.rs
pub const VERSION: &str = env!("EDGE_VIEWER_VERSION");
