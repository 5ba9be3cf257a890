// SPDX-License-Identifier: GPL-3.0-only

//! GPU capability layer for the preview renderer.
//!
//! The renderer never talks to wgpu directly. It drives a [`GpuDevice`], which
//! models the small slice of a GL-style context the preview needs: textures,
//! programs built from a vertex and a fragment shader, vertex attributes that
//! are enabled and disabled around each draw, and a framebuffer that can be read
//! back for presentation.
//!
//! Two implementations exist:
//!
//! - [`WgpuDevice`]: Vulkan through wgpu, rendering into an offscreen target
//! - [`SoftwareDevice`]: a CPU rasteriser with identical handle semantics, used
//!   headless and whenever no adapter is available
//!
//! Handles are `NonZeroU32`, so a failed program build cannot be represented by
//! a zero handle that later gets drawn with.

pub mod shader;
pub mod software;
pub mod wgpu_device;

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::{CompileError, GpuError};

pub use software::SoftwareDevice;
pub use wgpu_device::WgpuDevice;

/// Handle to a texture owned by a [`GpuDevice`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(NonZeroU32);

/// Handle to a linked program owned by a [`GpuDevice`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramHandle(NonZeroU32);

impl TextureHandle {
    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl ProgramHandle {
    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for TextureHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tex#{}", self.0)
    }
}

impl fmt::Display for ProgramHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "prog#{}", self.0)
    }
}

/// Vertex attribute location, as declared with `@location(n)` in the vertex stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttribLocation(pub u32);

/// Uniform location, the `@binding(n)` of a group 0 resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformLocation(pub u32);

/// What a texture is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureKind {
    /// Backed by an image stream the camera writes into
    External,
    /// Plain application texture
    Texture2d,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDesc {
    pub kind: TextureKind,
    pub width: u32,
    pub height: u32,
}

impl TextureDesc {
    pub fn external(width: u32, height: u32) -> Self {
        Self {
            kind: TextureKind::External,
            width,
            height,
        }
    }

    pub fn texture_2d(width: u32, height: u32) -> Self {
        Self {
            kind: TextureKind::Texture2d,
            width,
            height,
        }
    }
}

/// Everything one full-screen draw needs
#[derive(Debug, Clone, Copy)]
pub struct DrawCall<'a> {
    pub program: ProgramHandle,
    pub texture: TextureHandle,
    /// Location of the texture the sampler reads from
    pub sampler_uniform: UniformLocation,
    /// Location of the 4x4 texture-coordinate transform
    pub transform_uniform: UniformLocation,
    /// Column-major transform matrix
    pub transform: &'a [f32; 16],
    /// Vertices drawn as a triangle strip
    pub vertex_count: u32,
}

/// Live resource counts, used to detect leaks across surface lifecycles
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceStats {
    pub textures: usize,
    pub programs: usize,
    pub enabled_attributes: usize,
}

/// RGBA contents of the framebuffer after a draw
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresentedFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl PresentedFrame {
    /// RGBA value at a pixel, `None` when out of bounds
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = ((y * self.width + x) * 4) as usize;
        let px = self.data.get(i..i + 4)?;
        Some([px[0], px[1], px[2], px[3]])
    }
}

/// Which device implementation to create
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GpuBackendType {
    /// wgpu (Vulkan), falling back to software when no adapter exists
    #[default]
    Wgpu,
    /// CPU rasteriser
    Software,
}

impl GpuBackendType {
    pub fn display_name(&self) -> &'static str {
        match self {
            GpuBackendType::Wgpu => "wgpu",
            GpuBackendType::Software => "software",
        }
    }
}

/// The GPU context owned by the render thread.
///
/// All calls happen on that one thread; implementations are `Send` so the
/// context can be created elsewhere and moved in.
pub trait GpuDevice: Send {
    /// Short description for logs
    fn name(&self) -> String;

    fn create_texture(&mut self, desc: TextureDesc) -> Result<TextureHandle, GpuError>;
    fn delete_texture(&mut self, texture: TextureHandle) -> Result<(), GpuError>;
    fn texture_size(&self, texture: TextureHandle) -> Result<(u32, u32), GpuError>;

    /// Replace the contents of a texture, reallocating it when the size changes
    fn upload_texture(
        &mut self,
        texture: TextureHandle,
        width: u32,
        height: u32,
        rgba: &[u8],
    ) -> Result<(), GpuError>;

    /// Read a texture back as tightly packed RGBA
    fn read_texture(&mut self, texture: TextureHandle) -> Result<Vec<u8>, GpuError>;

    /// Copy `src` into `dst`; both must have the same size
    fn copy_texture(&mut self, src: TextureHandle, dst: TextureHandle) -> Result<(), GpuError>;

    /// Compile both stages and link them into a program
    fn create_program(
        &mut self,
        vertex_source: &str,
        fragment_source: &str,
    ) -> Result<ProgramHandle, CompileError>;
    fn delete_program(&mut self, program: ProgramHandle) -> Result<(), GpuError>;
    fn attrib_location(&self, program: ProgramHandle, name: &str) -> Option<AttribLocation>;
    fn uniform_location(&self, program: ProgramHandle, name: &str) -> Option<UniformLocation>;

    /// Resize the render target
    fn set_viewport(&mut self, width: u32, height: u32) -> Result<(), GpuError>;
    fn clear(&mut self, color: [f32; 4]);

    /// Enable a vertex attribute array with the given per-vertex component count
    fn enable_vertex_attrib(
        &mut self,
        location: AttribLocation,
        components: u32,
        data: &[f32],
    ) -> Result<(), GpuError>;
    fn disable_vertex_attrib(&mut self, location: AttribLocation);

    fn draw_quad(&mut self, call: &DrawCall<'_>) -> Result<(), GpuError>;

    /// Read the render target back for presentation
    fn read_framebuffer(&mut self) -> Result<PresentedFrame, GpuError>;

    fn stats(&self) -> ResourceStats;
}

/// Create the device for `backend`, falling back to software rendering when
/// wgpu cannot provide an adapter.
pub fn create_device(backend: GpuBackendType, width: u32, height: u32) -> Box<dyn GpuDevice> {
    match backend {
        GpuBackendType::Software => {
            info!(width, height, "Using software GPU device");
            Box::new(SoftwareDevice::new(width, height))
        }
        GpuBackendType::Wgpu => match WgpuDevice::new("edge-viewer preview", width, height) {
            Ok(device) => Box::new(device),
            Err(e) => {
                warn!(error = %e, "wgpu unavailable, falling back to software rendering");
                Box::new(SoftwareDevice::new(width, height))
            }
        },
    }
}

/// Map from non-zero ids to resources, shared by the device implementations
#[derive(Debug)]
pub(crate) struct HandleTable<T> {
    next: u32,
    entries: HashMap<u32, T>,
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self {
            next: 1,
            entries: HashMap::new(),
        }
    }
}

impl<T> HandleTable<T> {
    pub(crate) fn insert(&mut self, value: T) -> NonZeroU32 {
        // Ids start at 1 and only grow, so this never yields zero
        let id = NonZeroU32::new(self.next).unwrap_or(NonZeroU32::MIN);
        self.next = self.next.wrapping_add(1).max(1);
        self.entries.insert(id.get(), value);
        id
    }

    pub(crate) fn get(&self, id: NonZeroU32) -> Option<&T> {
        self.entries.get(&id.get())
    }

    pub(crate) fn get_mut(&mut self, id: NonZeroU32) -> Option<&mut T> {
        self.entries.get_mut(&id.get())
    }

    pub(crate) fn remove(&mut self, id: NonZeroU32) -> Option<T> {
        self.entries.remove(&id.get())
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

impl TextureHandle {
    pub(crate) fn from_raw(id: NonZeroU32) -> Self {
        Self(id)
    }

    pub(crate) fn raw(self) -> NonZeroU32 {
        self.0
    }
}

impl ProgramHandle {
    pub(crate) fn from_raw(id: NonZeroU32) -> Self {
        Self(id)
    }

    pub(crate) fn raw(self) -> NonZeroU32 {
        self.0
    }
}
