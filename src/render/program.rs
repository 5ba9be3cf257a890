// SPDX-License-Identifier: GPL-3.0-only

//! Full-screen quad program used to present a frame

use tracing::{debug, error};

use crate::errors::{CompileError, GpuError, RenderError};
use crate::gpu::{
    AttribLocation, DrawCall, GpuDevice, ProgramHandle, TextureHandle, UniformLocation,
};

pub const VERTEX_SHADER: &str = include_str!("preview_vertex.wgsl");
pub const FRAGMENT_SHADER: &str = include_str!("preview_fragment.wgsl");

/// Clip-space corners, drawn as a triangle strip
pub const QUAD_VERTICES: [f32; 8] = [
    -1.0, -1.0, //
    1.0, -1.0, //
    -1.0, 1.0, //
    1.0, 1.0,
];

/// Texture coordinates matching [`QUAD_VERTICES`]; v grows downwards
pub const QUAD_TEX_COORDS: [f32; 8] = [
    0.0, 1.0, //
    1.0, 1.0, //
    0.0, 0.0, //
    1.0, 0.0,
];

const QUAD_VERTEX_COUNT: u32 = 4;
const COMPONENTS: u32 = 2;

/// A linked program with its attribute and uniform locations resolved
#[derive(Debug)]
pub struct RenderProgram {
    program: ProgramHandle,
    position: AttribLocation,
    tex_coord: AttribLocation,
    transform: UniformLocation,
    sampler: UniformLocation,
}

impl RenderProgram {
    /// Compile and link, then resolve the locations the draw needs.
    ///
    /// A program missing any of them is deleted again and reported as a link
    /// failure.
    pub fn compile(
        device: &mut dyn GpuDevice,
        vertex_source: &str,
        fragment_source: &str,
    ) -> Result<Self, CompileError> {
        let program = device
            .create_program(vertex_source, fragment_source)
            .inspect_err(|e| error!(error = %e, "Shader program build failed"))?;

        let resolved = (
            device.attrib_location(program, "a_position"),
            device.attrib_location(program, "a_tex_coord"),
            device.uniform_location(program, "u_transform"),
            device.uniform_location(program, "u_texture"),
        );
        match resolved {
            (Some(position), Some(tex_coord), Some(transform), Some(sampler)) => {
                debug!(%program, "Preview program ready");
                Ok(Self {
                    program,
                    position,
                    tex_coord,
                    transform,
                    sampler,
                })
            }
            _ => {
                let _ = device.delete_program(program);
                let e = CompileError::Link(
                    "program must declare a_position, a_tex_coord, u_transform and u_texture"
                        .to_string(),
                );
                error!(error = %e, "Shader program build failed");
                Err(e)
            }
        }
    }

    pub fn handle(&self) -> ProgramHandle {
        self.program
    }

    /// Draw `texture` over the whole viewport through `transform`.
    ///
    /// Vertex attributes are enabled for the duration of the call only.
    pub fn draw(
        &self,
        device: &mut dyn GpuDevice,
        texture: TextureHandle,
        transform: &[f32; 16],
    ) -> Result<(), RenderError> {
        let mut attributes = EnabledAttributes::new(device);
        attributes.enable(self.position, &QUAD_VERTICES)?;
        attributes.enable(self.tex_coord, &QUAD_TEX_COORDS)?;
        attributes.device().draw_quad(&DrawCall {
            program: self.program,
            texture,
            sampler_uniform: self.sampler,
            transform_uniform: self.transform,
            transform,
            vertex_count: QUAD_VERTEX_COUNT,
        })?;
        Ok(())
    }

    pub fn release(self, device: &mut dyn GpuDevice) -> Result<(), GpuError> {
        debug!(program = %self.program, "Preview program released");
        device.delete_program(self.program)
    }
}

/// Disables every attribute it enabled when dropped
struct EnabledAttributes<'a> {
    device: &'a mut dyn GpuDevice,
    enabled: Vec<AttribLocation>,
}

impl<'a> EnabledAttributes<'a> {
    fn new(device: &'a mut dyn GpuDevice) -> Self {
        Self {
            device,
            enabled: Vec::with_capacity(2),
        }
    }

    fn enable(&mut self, location: AttribLocation, data: &[f32]) -> Result<(), GpuError> {
        self.device.enable_vertex_attrib(location, COMPONENTS, data)?;
        self.enabled.push(location);
        Ok(())
    }

    fn device(&mut self) -> &mut (dyn GpuDevice + 'a) {
        &mut *self.device
    }
}

impl Drop for EnabledAttributes<'_> {
    fn drop(&mut self) {
        for location in self.enabled.drain(..) {
            self.device.disable_vertex_attrib(location);
        }
    }
}
