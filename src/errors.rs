// SPDX-License-Identifier: MPL-2.0

//! Error types for the preview pipeline

use std::fmt;

use crate::gpu::{ProgramHandle, TextureHandle};

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Main application error type
#[derive(Debug, Clone)]
pub enum AppError {
    /// Camera-related errors
    Camera(CameraError),
    /// Render surface errors
    Render(RenderError),
    /// Frame processing errors
    Processing(ProcessingError),
    /// Camera access was not granted
    Permission(String),
    /// Configuration errors
    Config(String),
    /// I/O errors (terminal, log file)
    Io(String),
    /// Generic error with message
    Other(String),
}

/// Camera-specific errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    /// No camera devices found
    NoCameraFound,
    /// Camera exists but cannot be used right now
    NotAvailable(String),
    /// Runtime camera grant was refused
    PermissionDenied,
    /// Opening the device failed
    OpenFailed(String),
    /// Capture session could not be configured
    ConfigureFailed(String),
    /// Camera disconnected during operation
    Disconnected,
    /// Backend error (e.g., GStreamer)
    Backend(String),
    /// Operation on a device or session that was already closed
    Closed,
}

/// GPU resource errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GpuError {
    TextureNotFound(TextureHandle),
    ProgramNotFound(ProgramHandle),
    InvalidSize { width: u32, height: u32 },
    AttributeNotEnabled(String),
    MissingUniform(String),
    /// Adapter/device level failure
    Device(String),
    /// Mapping a readback buffer failed
    Readback(String),
}

/// Shader program build failures
///
/// A failed build never yields a program handle; handles are non-zero by construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    Vertex(String),
    Fragment(String),
    /// Both stages compiled but do not agree on their interface
    Link(String),
}

/// Render surface errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    Compile(CompileError),
    Gpu(GpuError),
    /// A draw was requested before the surface was created
    NotInitialized,
    /// The render thread is gone
    HostStopped,
    SurfaceFailed(String),
}

/// Errors from a processing gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingError {
    /// Gateway missing or mis-configured
    Unavailable(String),
    SizeMismatch {
        input: (u32, u32),
        output: (u32, u32),
    },
    Gpu(GpuError),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Camera(e) => write!(f, "Camera error: {}", e),
            AppError::Render(e) => write!(f, "Render error: {}", e),
            AppError::Processing(e) => write!(f, "Processing error: {}", e),
            AppError::Permission(msg) => write!(f, "Permission error: {}", msg),
            AppError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Io(msg) => write!(f, "I/O error: {}", msg),
            AppError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Display for CameraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraError::NoCameraFound => write!(f, "No camera devices found"),
            CameraError::NotAvailable(msg) => write!(f, "Camera not available: {}", msg),
            CameraError::PermissionDenied => write!(f, "Camera permission denied"),
            CameraError::OpenFailed(msg) => write!(f, "Failed to open camera: {}", msg),
            CameraError::ConfigureFailed(msg) => {
                write!(f, "Capture session configuration failed: {}", msg)
            }
            CameraError::Disconnected => write!(f, "Camera disconnected"),
            CameraError::Backend(msg) => write!(f, "Backend error: {}", msg),
            CameraError::Closed => write!(f, "Camera already closed"),
        }
    }
}

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuError::TextureNotFound(h) => write!(f, "Unknown texture {}", h),
            GpuError::ProgramNotFound(h) => write!(f, "Unknown program {}", h),
            GpuError::InvalidSize { width, height } => {
                write!(f, "Invalid texture size {}x{}", width, height)
            }
            GpuError::AttributeNotEnabled(name) => {
                write!(f, "Vertex attribute '{}' is not enabled", name)
            }
            GpuError::MissingUniform(name) => write!(f, "Uniform '{}' not found", name),
            GpuError::Device(msg) => write!(f, "GPU device error: {}", msg),
            GpuError::Readback(msg) => write!(f, "GPU readback failed: {}", msg),
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Vertex(msg) => write!(f, "Vertex shader failed to compile: {}", msg),
            CompileError::Fragment(msg) => {
                write!(f, "Fragment shader failed to compile: {}", msg)
            }
            CompileError::Link(msg) => write!(f, "Program failed to link: {}", msg),
        }
    }
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::Compile(e) => write!(f, "{}", e),
            RenderError::Gpu(e) => write!(f, "{}", e),
            RenderError::NotInitialized => write!(f, "Render surface not initialized"),
            RenderError::HostStopped => write!(f, "Render thread stopped"),
            RenderError::SurfaceFailed(msg) => write!(f, "Surface creation failed: {}", msg),
        }
    }
}

impl fmt::Display for ProcessingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessingError::Unavailable(msg) => write!(f, "Processing unavailable: {}", msg),
            ProcessingError::SizeMismatch { input, output } => write!(
                f,
                "Output {}x{} does not match input {}x{}",
                output.0, output.1, input.0, input.1
            ),
            ProcessingError::Gpu(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for AppError {}
impl std::error::Error for CameraError {}
impl std::error::Error for GpuError {}
impl std::error::Error for CompileError {}
impl std::error::Error for RenderError {}
impl std::error::Error for ProcessingError {}

// Conversions from sub-errors to AppError
impl From<CameraError> for AppError {
    fn from(err: CameraError) -> Self {
        AppError::Camera(err)
    }
}

impl From<RenderError> for AppError {
    fn from(err: RenderError) -> Self {
        AppError::Render(err)
    }
}

impl From<ProcessingError> for AppError {
    fn from(err: ProcessingError) -> Self {
        AppError::Processing(err)
    }
}

impl From<CompileError> for RenderError {
    fn from(err: CompileError) -> Self {
        RenderError::Compile(err)
    }
}

impl From<GpuError> for RenderError {
    fn from(err: GpuError) -> Self {
        RenderError::Gpu(err)
    }
}

impl From<GpuError> for ProcessingError {
    fn from(err: GpuError) -> Self {
        ProcessingError::Gpu(err)
    }
}

impl From<String> for AppError {
    fn from(msg: String) -> Self {
        AppError::Other(msg)
    }
}

impl From<&str> for AppError {
    fn from(msg: &str) -> Self {
        AppError::Other(msg.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Config(err.to_string())
    }
}
