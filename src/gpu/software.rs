// SPDX-License-Identifier: GPL-3.0-only

//! CPU implementation of [`GpuDevice`].
//!
//! Programs are validated and reflected from the same WGSL as the wgpu path, but
//! the draw itself is fixed: the first vertex input is the clip-space position,
//! the second the texture coordinate, which is multiplied by the transform
//! uniform and sampled (nearest, clamp to edge) from the bound texture. That is
//! exactly what the preview program does, so both devices present the same
//! image.

use std::collections::HashMap;

use tracing::debug;

use super::shader::{ProgramLayout, UniformKind, link_program};
use super::{
    AttribLocation, DrawCall, GpuDevice, HandleTable, PresentedFrame, ProgramHandle,
    ResourceStats, TextureDesc, TextureHandle, UniformLocation,
};
use crate::errors::{CompileError, GpuError};

#[derive(Debug, Clone)]
struct CpuTexture {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl CpuTexture {
    fn new(width: u32, height: u32) -> Result<Self, GpuError> {
        if width == 0 || height == 0 {
            return Err(GpuError::InvalidSize { width, height });
        }
        Ok(Self {
            width,
            height,
            data: vec![0; (width * height * 4) as usize],
        })
    }

    fn sample_nearest(&self, u: f32, v: f32) -> [u8; 4] {
        let x = (u * self.width as f32).floor() as i64;
        let y = (v * self.height as f32).floor() as i64;
        let x = x.clamp(0, self.width as i64 - 1) as u32;
        let y = y.clamp(0, self.height as i64 - 1) as u32;
        let i = ((y * self.width + x) * 4) as usize;
        [
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ]
    }
}

#[derive(Debug, Clone)]
struct VertexArray {
    components: u32,
    data: Vec<f32>,
}

impl VertexArray {
    fn vec2(&self, index: u32) -> Option<[f32; 2]> {
        let start = (index * self.components) as usize;
        let x = *self.data.get(start)?;
        let y = if self.components > 1 {
            *self.data.get(start + 1)?
        } else {
            0.0
        };
        Some([x, y])
    }
}

/// CPU rasteriser with GL-like handle semantics
pub struct SoftwareDevice {
    textures: HandleTable<CpuTexture>,
    programs: HandleTable<ProgramLayout>,
    attributes: HashMap<u32, VertexArray>,
    framebuffer: CpuTexture,
}

impl SoftwareDevice {
    pub fn new(width: u32, height: u32) -> Self {
        let framebuffer = CpuTexture::new(width.max(1), height.max(1)).unwrap_or(CpuTexture {
            width: 1,
            height: 1,
            data: vec![0; 4],
        });
        Self {
            textures: HandleTable::default(),
            programs: HandleTable::default(),
            attributes: HashMap::new(),
            framebuffer,
        }
    }

    fn texture(&self, handle: TextureHandle) -> Result<&CpuTexture, GpuError> {
        self.textures
            .get(handle.raw())
            .ok_or(GpuError::TextureNotFound(handle))
    }

    fn texture_mut(&mut self, handle: TextureHandle) -> Result<&mut CpuTexture, GpuError> {
        self.textures
            .get_mut(handle.raw())
            .ok_or(GpuError::TextureNotFound(handle))
    }
}

fn vertex_array<'a>(
    attributes: &'a HashMap<u32, VertexArray>,
    layout: &ProgramLayout,
    index: usize,
) -> Result<&'a VertexArray, GpuError> {
    let attribute = layout.attributes.get(index).ok_or_else(|| {
        GpuError::Device("program needs position and texture coordinate inputs".to_string())
    })?;
    attributes
        .get(&attribute.location)
        .ok_or_else(|| GpuError::AttributeNotEnabled(attribute.name.clone()))
}

fn check_uniform(
    layout: &ProgramLayout,
    location: UniformLocation,
    kind: UniformKind,
) -> Result<(), GpuError> {
    match layout.uniform_at(location.0) {
        Some(u) if u.kind == kind => Ok(()),
        _ => Err(GpuError::MissingUniform(format!("binding {}", location.0))),
    }
}

/// Signed doubled area of the triangle (a, b, p)
fn edge(a: [f32; 2], b: [f32; 2], p: [f32; 2]) -> f32 {
    (b[0] - a[0]) * (p[1] - a[1]) - (b[1] - a[1]) * (p[0] - a[0])
}

impl GpuDevice for SoftwareDevice {
    fn name(&self) -> String {
        "software".to_string()
    }

    fn create_texture(&mut self, desc: TextureDesc) -> Result<TextureHandle, GpuError> {
        let texture = CpuTexture::new(desc.width, desc.height)?;
        let id = self.textures.insert(texture);
        Ok(TextureHandle::from_raw(id))
    }

    fn delete_texture(&mut self, texture: TextureHandle) -> Result<(), GpuError> {
        self.textures
            .remove(texture.raw())
            .map(|_| ())
            .ok_or(GpuError::TextureNotFound(texture))
    }

    fn texture_size(&self, texture: TextureHandle) -> Result<(u32, u32), GpuError> {
        self.texture(texture).map(|t| (t.width, t.height))
    }

    fn upload_texture(
        &mut self,
        texture: TextureHandle,
        width: u32,
        height: u32,
        rgba: &[u8],
    ) -> Result<(), GpuError> {
        if width == 0 || height == 0 || rgba.len() != (width * height * 4) as usize {
            return Err(GpuError::InvalidSize { width, height });
        }
        let target = self.texture_mut(texture)?;
        target.width = width;
        target.height = height;
        target.data.clear();
        target.data.extend_from_slice(rgba);
        Ok(())
    }

    fn read_texture(&mut self, texture: TextureHandle) -> Result<Vec<u8>, GpuError> {
        self.texture(texture).map(|t| t.data.clone())
    }

    fn copy_texture(&mut self, src: TextureHandle, dst: TextureHandle) -> Result<(), GpuError> {
        let source = self.texture(src)?.clone();
        let target = self.texture_mut(dst)?;
        if (source.width, source.height) != (target.width, target.height) {
            return Err(GpuError::Device(format!(
                "copy from {}x{} into {}x{}",
                source.width, source.height, target.width, target.height
            )));
        }
        target.data.copy_from_slice(&source.data);
        Ok(())
    }

    fn create_program(
        &mut self,
        vertex_source: &str,
        fragment_source: &str,
    ) -> Result<ProgramHandle, CompileError> {
        let layout = link_program(vertex_source, fragment_source)?;
        debug!(
            attributes = layout.attributes.len(),
            uniforms = layout.uniforms.len(),
            "Software program linked"
        );
        Ok(ProgramHandle::from_raw(self.programs.insert(layout)))
    }

    fn delete_program(&mut self, program: ProgramHandle) -> Result<(), GpuError> {
        self.programs
            .remove(program.raw())
            .map(|_| ())
            .ok_or(GpuError::ProgramNotFound(program))
    }

    fn attrib_location(&self, program: ProgramHandle, name: &str) -> Option<AttribLocation> {
        let layout = self.programs.get(program.raw())?;
        layout.attribute(name).map(|a| AttribLocation(a.location))
    }

    fn uniform_location(&self, program: ProgramHandle, name: &str) -> Option<UniformLocation> {
        let layout = self.programs.get(program.raw())?;
        layout.uniform(name).map(|u| UniformLocation(u.binding))
    }

    fn set_viewport(&mut self, width: u32, height: u32) -> Result<(), GpuError> {
        if (width, height) != (self.framebuffer.width, self.framebuffer.height) {
            self.framebuffer = CpuTexture::new(width, height)?;
        }
        Ok(())
    }

    fn clear(&mut self, color: [f32; 4]) {
        let px = color.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8);
        for chunk in self.framebuffer.data.chunks_exact_mut(4) {
            chunk.copy_from_slice(&px);
        }
    }

    fn enable_vertex_attrib(
        &mut self,
        location: AttribLocation,
        components: u32,
        data: &[f32],
    ) -> Result<(), GpuError> {
        if components == 0 || components > 4 {
            return Err(GpuError::Device(format!(
                "invalid component count {} for location {}",
                components, location.0
            )));
        }
        self.attributes.insert(
            location.0,
            VertexArray {
                components,
                data: data.to_vec(),
            },
        );
        Ok(())
    }

    fn disable_vertex_attrib(&mut self, location: AttribLocation) {
        self.attributes.remove(&location.0);
    }

    fn draw_quad(&mut self, call: &DrawCall<'_>) -> Result<(), GpuError> {
        let Self {
            textures,
            programs,
            attributes,
            framebuffer,
        } = self;
        let layout = programs
            .get(call.program.raw())
            .ok_or(GpuError::ProgramNotFound(call.program))?;
        check_uniform(layout, call.transform_uniform, UniformKind::Buffer)?;
        check_uniform(layout, call.sampler_uniform, UniformKind::Texture)?;
        let positions = vertex_array(attributes, layout, 0)?;
        let tex_coords = vertex_array(attributes, layout, 1)?;
        let source = textures
            .get(call.texture.raw())
            .ok_or(GpuError::TextureNotFound(call.texture))?;

        let width = framebuffer.width;
        let height = framebuffer.height;
        let m = call.transform;

        let mut vertices = Vec::with_capacity(call.vertex_count as usize);
        for i in 0..call.vertex_count {
            let (Some(p), Some(t)) = (positions.vec2(i), tex_coords.vec2(i)) else {
                return Err(GpuError::Device(format!(
                    "vertex {} is outside the enabled attribute arrays",
                    i
                )));
            };
            let screen = [
                (p[0] + 1.0) * 0.5 * width as f32,
                (1.0 - p[1]) * 0.5 * height as f32,
            ];
            let uv = [
                m[0] * t[0] + m[4] * t[1] + m[12],
                m[1] * t[0] + m[5] * t[1] + m[13],
            ];
            vertices.push((screen, uv));
        }

        let out = &mut framebuffer.data;
        for tri in vertices.windows(3) {
            let (a, b, c) = (tri[0], tri[1], tri[2]);
            let area = edge(a.0, b.0, c.0);
            if area.abs() < f32::EPSILON {
                continue;
            }
            let min_x = a.0[0].min(b.0[0]).min(c.0[0]).floor().max(0.0) as u32;
            let max_x = a.0[0].max(b.0[0]).max(c.0[0]).ceil().min(width as f32) as u32;
            let min_y = a.0[1].min(b.0[1]).min(c.0[1]).floor().max(0.0) as u32;
            let max_y = a.0[1].max(b.0[1]).max(c.0[1]).ceil().min(height as f32) as u32;

            for y in min_y..max_y {
                for x in min_x..max_x {
                    let p = [x as f32 + 0.5, y as f32 + 0.5];
                    let w0 = edge(b.0, c.0, p) / area;
                    let w1 = edge(c.0, a.0, p) / area;
                    let w2 = edge(a.0, b.0, p) / area;
                    if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                        continue;
                    }
                    let u = w0 * a.1[0] + w1 * b.1[0] + w2 * c.1[0];
                    let v = w0 * a.1[1] + w1 * b.1[1] + w2 * c.1[1];
                    let i = ((y * width + x) * 4) as usize;
                    out[i..i + 4].copy_from_slice(&source.sample_nearest(u, v));
                }
            }
        }
        Ok(())
    }

    fn read_framebuffer(&mut self) -> Result<PresentedFrame, GpuError> {
        Ok(PresentedFrame {
            width: self.framebuffer.width,
            height: self.framebuffer.height,
            data: self.framebuffer.data.clone(),
        })
    }

    fn stats(&self) -> ResourceStats {
        ResourceStats {
            textures: self.textures.len(),
            programs: self.programs.len(),
            enabled_attributes: self.attributes.len(),
        }
    }
}
