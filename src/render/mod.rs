// SPDX-License-Identifier: GPL-3.0-only

//! Preview rendering.
//!
//! - [`texture_bridge`]: producer/consumer handoff and the external texture
//! - [`program`]: the full-screen quad program
//! - [`render_loop`]: the consumer state machine
//! - [`surface`]: the render thread hosting a [`Renderer`]
//! - [`fps`]: frame-rate accounting
//! - [`mode`]: raw/processed toggle

pub mod fps;
pub mod mode;
pub mod program;
pub mod render_loop;
pub mod surface;
pub mod texture_bridge;

use crate::errors::RenderError;
use crate::gpu::GpuDevice;

pub use fps::{FpsMeter, format_fps};
pub use mode::{ProcessingMode, ProcessingModeFlag};
pub use render_loop::{RenderLoop, RenderState, RenderStats};
pub use surface::{DeviceFactory, HostStats, Presenter, SurfaceHost};
pub use texture_bridge::{ExternalTextureBridge, FrameSurface, RenderRequester};

/// Result of one wake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawOutcome {
    /// Nothing was pending
    Idle,
    /// A frame was drained but not drawn
    Skipped,
    Drawn,
}

/// Callbacks a [`SurfaceHost`] drives on its render thread
pub trait Renderer: Send {
    /// GPU resources for the surface; failure keeps the surface from drawing
    fn on_surface_created(&mut self, device: &mut dyn GpuDevice) -> Result<(), RenderError>;

    fn on_surface_changed(
        &mut self,
        device: &mut dyn GpuDevice,
        width: u32,
        height: u32,
    ) -> Result<(), RenderError>;

    fn on_draw_frame(&mut self, device: &mut dyn GpuDevice) -> Result<DrawOutcome, RenderError>;

    /// Release everything created in `on_surface_created`, exactly once
    fn on_surface_destroyed(&mut self, device: &mut dyn GpuDevice);
}
