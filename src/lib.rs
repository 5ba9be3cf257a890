// SPDX-License-Identifier: MPL-2.0

//! Edge Viewer - live camera preview with GPU edge detection
//!
//! Camera frames are handed to a render thread that draws only when a new
//! frame is ready, optionally running them through an edge detector first.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`backends`]: Camera backends and the capture controller
//! - [`render`]: Frame handoff, the render loop and its host thread
//! - [`gpu`]: GPU device abstraction (wgpu and software)
//! - [`processing`]: Frame processing gateways
//! - [`permission`]: Runtime camera access grants
//! - [`app`]: Composition root with the pause/resume lifecycle
//! - [`terminal`]: Terminal preview
//! - [`config`]: User configuration handling
//!
//! # Example
//!
//! ```ignore
//! let config = edge_viewer::Config::load();
//! let mut app = edge_viewer::PreviewApp::new(&config)?;
//! app.resume()?;
//! ```

pub mod app;
pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod gpu;
pub mod permission;
pub mod processing;
pub mod render;
pub mod terminal;

// Re-export commonly used types
pub use app::PreviewApp;
pub use config::Config;
pub use errors::{AppError, AppResult};
pub use render::{ProcessingMode, RenderLoop, SurfaceHost};
