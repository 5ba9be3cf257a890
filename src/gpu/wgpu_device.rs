// SPDX-License-Identifier: GPL-3.0-only

//! wgpu-backed [`GpuDevice`].
//!
//! Renders into an offscreen RGBA target which is read back for presentation.
//! Programs become render pipelines with a triangle-strip topology, one vertex
//! buffer per reflected attribute and a bind group layout generated from the
//! reflected group 0 bindings.

use std::collections::HashMap;

use tracing::{debug, error, info};
use wgpu::util::DeviceExt;

use super::shader::{ProgramLayout, UniformKind, link_program};
use super::{
    AttribLocation, DrawCall, GpuDevice, HandleTable, PresentedFrame, ProgramHandle,
    ResourceStats, TextureDesc, TextureHandle, TextureKind, UniformLocation,
};
use crate::errors::{CompileError, GpuError};

const TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    kind: TextureKind,
    width: u32,
    height: u32,
}

struct GpuProgram {
    layout: ProgramLayout,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    /// Uniform buffers keyed by binding
    uniform_buffers: HashMap<u32, wgpu::Buffer>,
}

struct VertexArray {
    components: u32,
    data: Vec<f32>,
}

/// Vulkan device rendering the preview offscreen
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_name: String,
    sampler: wgpu::Sampler,
    textures: HandleTable<GpuTexture>,
    programs: HandleTable<GpuProgram>,
    attributes: HashMap<u32, VertexArray>,
    target: GpuTexture,
}

impl WgpuDevice {
    /// Create a device with a `width`x`height` render target
    pub fn new(label: &str, width: u32, height: u32) -> Result<Self, GpuError> {
        pollster::block_on(Self::new_async(label, width, height))
    }

    async fn new_async(label: &str, width: u32, height: u32) -> Result<Self, GpuError> {
        info!(label = label, "Creating GPU device for preview rendering");

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::VULKAN,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| {
                GpuError::Device(format!("Failed to find suitable GPU adapter: {}", e))
            })?;

        let adapter_info = adapter.get_info();
        info!(
            adapter = %adapter_info.name,
            backend = ?adapter_info.backend,
            "GPU adapter selected for preview"
        );

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some(label),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults(),
                memory_hints: wgpu::MemoryHints::Performance,
                ..Default::default()
            })
            .await
            .map_err(|e| GpuError::Device(format!("Failed to create GPU device: {}", e)))?;

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("preview sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let target = allocate_texture(
            &device,
            TextureDesc::texture_2d(width, height),
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        )?;

        Ok(Self {
            device,
            queue,
            adapter_name: adapter_info.name,
            sampler,
            textures: HandleTable::default(),
            programs: HandleTable::default(),
            attributes: HashMap::new(),
            target,
        })
    }

    fn texture(&self, handle: TextureHandle) -> Result<&GpuTexture, GpuError> {
        self.textures
            .get(handle.raw())
            .ok_or(GpuError::TextureNotFound(handle))
    }

    fn submit(&self, encoder: wgpu::CommandEncoder) {
        self.queue.submit(std::iter::once(encoder.finish()));
    }

    fn encoder(&self, label: &str) -> wgpu::CommandEncoder {
        self.device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }

    /// Copy a texture into a mappable buffer and strip the row padding
    fn read_back(&self, texture: &GpuTexture) -> Result<Vec<u8>, GpuError> {
        let unpadded = texture.width * 4;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded = unpadded.div_ceil(align) * align;

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback_staging"),
            size: (padded * texture.height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self.encoder("readback_encoder");
        encoder.copy_texture_to_buffer(
            texture.texture.as_image_copy(),
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(texture.height),
                },
            },
            extent(texture.width, texture.height),
        );
        self.submit(encoder);

        let buffer_slice = staging.slice(..);
        let (sender, receiver) = futures::channel::oneshot::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        let _ = self.device.poll(wgpu::PollType::wait_indefinitely());
        pollster::block_on(receiver)
            .map_err(|_| GpuError::Readback("map callback dropped".to_string()))?
            .map_err(|e| GpuError::Readback(format!("{:?}", e)))?;

        let mapped = buffer_slice.get_mapped_range();
        let mut out = Vec::with_capacity((unpadded * texture.height) as usize);
        for row in mapped.chunks_exact(padded as usize) {
            out.extend_from_slice(&row[..unpadded as usize]);
        }
        drop(mapped);
        staging.unmap();
        Ok(out)
    }

    fn build_program(
        &self,
        layout: ProgramLayout,
        vs: &str,
        fs: &str,
    ) -> Result<GpuProgram, CompileError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let vs_module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("preview vertex shader"),
            source: wgpu::ShaderSource::Wgsl(vs.into()),
        });
        let fs_module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("preview fragment shader"),
            source: wgpu::ShaderSource::Wgsl(fs.into()),
        });

        let entries: Vec<wgpu::BindGroupLayoutEntry> = layout
            .uniforms
            .iter()
            .map(|u| wgpu::BindGroupLayoutEntry {
                binding: u.binding,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: match u.kind {
                    UniformKind::Buffer => wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    UniformKind::Texture => wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    UniformKind::Sampler => {
                        wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering)
                    }
                },
                count: None,
            })
            .collect();

        let bind_group_layout =
            self.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("preview bind group layout"),
                    entries: &entries,
                });

        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("preview pipeline layout"),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            });

        let vertex_attributes: Vec<[wgpu::VertexAttribute; 1]> = layout
            .attributes
            .iter()
            .map(|a| {
                [wgpu::VertexAttribute {
                    format: vertex_format(a.components),
                    offset: 0,
                    shader_location: a.location,
                }]
            })
            .collect();
        let vertex_buffers: Vec<wgpu::VertexBufferLayout> = layout
            .attributes
            .iter()
            .zip(&vertex_attributes)
            .map(|(a, attrs)| wgpu::VertexBufferLayout {
                array_stride: (a.components * 4) as u64,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: attrs,
            })
            .collect();

        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("preview pipeline"),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &vs_module,
                    entry_point: Some(layout.vertex_entry.as_str()),
                    buffers: &vertex_buffers,
                    compilation_options: Default::default(),
                },
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleStrip,
                    ..Default::default()
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: &fs_module,
                    entry_point: Some(layout.fragment_entry.as_str()),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: TEXTURE_FORMAT,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                multiview: None,
                cache: None,
            });

        if let Some(e) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(CompileError::Link(e.to_string()));
        }

        let uniform_buffers = layout
            .uniforms
            .iter()
            .filter(|u| u.kind == UniformKind::Buffer)
            .map(|u| {
                let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(u.name.as_str()),
                    size: u.size.max(16) as u64,
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                });
                (u.binding, buffer)
            })
            .collect();

        Ok(GpuProgram {
            layout,
            pipeline,
            bind_group_layout,
            uniform_buffers,
        })
    }
}

fn extent(width: u32, height: u32) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    }
}

fn vertex_format(components: u32) -> wgpu::VertexFormat {
    match components {
        1 => wgpu::VertexFormat::Float32,
        2 => wgpu::VertexFormat::Float32x2,
        3 => wgpu::VertexFormat::Float32x3,
        _ => wgpu::VertexFormat::Float32x4,
    }
}

fn allocate_texture(
    device: &wgpu::Device,
    desc: TextureDesc,
    usage: wgpu::TextureUsages,
) -> Result<GpuTexture, GpuError> {
    if desc.width == 0 || desc.height == 0 {
        return Err(GpuError::InvalidSize {
            width: desc.width,
            height: desc.height,
        });
    }
    let label = match desc.kind {
        TextureKind::External => "external camera texture",
        TextureKind::Texture2d => "preview texture",
    };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: extent(desc.width, desc.height),
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: TEXTURE_FORMAT,
        usage,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    Ok(GpuTexture {
        texture,
        view,
        kind: desc.kind,
        width: desc.width,
        height: desc.height,
    })
}

fn sampled_usage() -> wgpu::TextureUsages {
    wgpu::TextureUsages::TEXTURE_BINDING
        | wgpu::TextureUsages::COPY_DST
        | wgpu::TextureUsages::COPY_SRC
}

impl GpuDevice for WgpuDevice {
    fn name(&self) -> String {
        format!("wgpu ({})", self.adapter_name)
    }

    fn create_texture(&mut self, desc: TextureDesc) -> Result<TextureHandle, GpuError> {
        let texture = allocate_texture(&self.device, desc, sampled_usage())?;
        Ok(TextureHandle::from_raw(self.textures.insert(texture)))
    }

    fn delete_texture(&mut self, texture: TextureHandle) -> Result<(), GpuError> {
        let removed = self
            .textures
            .remove(texture.raw())
            .ok_or(GpuError::TextureNotFound(texture))?;
        removed.texture.destroy();
        Ok(())
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
        let kind = self.texture(texture)?.kind;
        let needs_realloc = self
            .texture(texture)
            .map(|t| (t.width, t.height) != (width, height))?;
        if needs_realloc {
            let replacement = allocate_texture(
                &self.device,
                TextureDesc {
                    kind,
                    width,
                    height,
                },
                sampled_usage(),
            )?;
            if let Some(slot) = self.textures.get_mut(texture.raw()) {
                let old = std::mem::replace(slot, replacement);
                old.texture.destroy();
            }
        }

        let target = self.texture(texture)?;
        self.queue.write_texture(
            target.texture.as_image_copy(),
            rgba,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            extent(width, height),
        );
        Ok(())
    }

    fn read_texture(&mut self, texture: TextureHandle) -> Result<Vec<u8>, GpuError> {
        let source = self.texture(texture)?;
        self.read_back(source)
    }

    fn copy_texture(&mut self, src: TextureHandle, dst: TextureHandle) -> Result<(), GpuError> {
        let source = self.texture(src)?;
        let target = self.texture(dst)?;
        if (source.width, source.height) != (target.width, target.height) {
            return Err(GpuError::Device(format!(
                "copy from {}x{} into {}x{}",
                source.width, source.height, target.width, target.height
            )));
        }
        let mut encoder = self.encoder("texture_copy");
        encoder.copy_texture_to_texture(
            source.texture.as_image_copy(),
            target.texture.as_image_copy(),
            extent(source.width, source.height),
        );
        self.submit(encoder);
        Ok(())
    }

    fn create_program(
        &mut self,
        vertex_source: &str,
        fragment_source: &str,
    ) -> Result<ProgramHandle, CompileError> {
        let layout = link_program(vertex_source, fragment_source)?;
        let program = self
            .build_program(layout, vertex_source, fragment_source)
            .inspect_err(|e| error!(error = %e, "Render pipeline creation failed"))?;
        debug!(
            attributes = program.layout.attributes.len(),
            uniforms = program.layout.uniforms.len(),
            "Render pipeline created"
        );
        Ok(ProgramHandle::from_raw(self.programs.insert(program)))
    }

    fn delete_program(&mut self, program: ProgramHandle) -> Result<(), GpuError> {
        let removed = self
            .programs
            .remove(program.raw())
            .ok_or(GpuError::ProgramNotFound(program))?;
        for buffer in removed.uniform_buffers.values() {
            buffer.destroy();
        }
        Ok(())
    }

    fn attrib_location(&self, program: ProgramHandle, name: &str) -> Option<AttribLocation> {
        let program = self.programs.get(program.raw())?;
        program
            .layout
            .attribute(name)
            .map(|a| AttribLocation(a.location))
    }

    fn uniform_location(&self, program: ProgramHandle, name: &str) -> Option<UniformLocation> {
        let program = self.programs.get(program.raw())?;
        program
            .layout
            .uniform(name)
            .map(|u| UniformLocation(u.binding))
    }

    fn set_viewport(&mut self, width: u32, height: u32) -> Result<(), GpuError> {
        if (width, height) != (self.target.width, self.target.height) {
            let target = allocate_texture(
                &self.device,
                TextureDesc::texture_2d(width, height),
                wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            )?;
            let old = std::mem::replace(&mut self.target, target);
            old.texture.destroy();
        }
        Ok(())
    }

    fn clear(&mut self, color: [f32; 4]) {
        let mut encoder = self.encoder("preview clear");
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("preview clear"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.target.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: color[0] as f64,
                            g: color[1] as f64,
                            b: color[2] as f64,
                            a: color[3] as f64,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }
        self.submit(encoder);
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
        let program = self
            .programs
            .get(call.program.raw())
            .ok_or(GpuError::ProgramNotFound(call.program))?;
        let texture = self.texture(call.texture)?;

        match program.layout.uniform_at(call.sampler_uniform.0) {
            Some(u) if u.kind == UniformKind::Texture => {}
            _ => {
                return Err(GpuError::MissingUniform(format!(
                    "binding {}",
                    call.sampler_uniform.0
                )));
            }
        }
        let transform_buffer = program
            .uniform_buffers
            .get(&call.transform_uniform.0)
            .ok_or_else(|| {
                GpuError::MissingUniform(format!("binding {}", call.transform_uniform.0))
            })?;
        self.queue
            .write_buffer(transform_buffer, 0, bytemuck::cast_slice(call.transform));

        let mut vertex_buffers = Vec::with_capacity(program.layout.attributes.len());
        for attribute in &program.layout.attributes {
            let array = self
                .attributes
                .get(&attribute.location)
                .ok_or_else(|| GpuError::AttributeNotEnabled(attribute.name.clone()))?;
            if array.components != attribute.components
                || array.data.len() < (array.components * call.vertex_count) as usize
            {
                return Err(GpuError::Device(format!(
                    "attribute '{}' does not hold {} vertices of {} components",
                    attribute.name, call.vertex_count, attribute.components
                )));
            }
            vertex_buffers.push(self.device.create_buffer_init(
                &wgpu::util::BufferInitDescriptor {
                    label: Some(attribute.name.as_str()),
                    contents: bytemuck::cast_slice(&array.data),
                    usage: wgpu::BufferUsages::VERTEX,
                },
            ));
        }

        let entries: Vec<wgpu::BindGroupEntry> = program
            .layout
            .uniforms
            .iter()
            .filter_map(|u| {
                let resource = match u.kind {
                    UniformKind::Buffer => {
                        program.uniform_buffers.get(&u.binding)?.as_entire_binding()
                    }
                    UniformKind::Texture => wgpu::BindingResource::TextureView(&texture.view),
                    UniformKind::Sampler => wgpu::BindingResource::Sampler(&self.sampler),
                };
                Some(wgpu::BindGroupEntry {
                    binding: u.binding,
                    resource,
                })
            })
            .collect();
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("preview bind group"),
            layout: &program.bind_group_layout,
            entries: &entries,
        });

        let mut encoder = self.encoder("preview draw");
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("preview draw"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.target.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&program.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            for (slot, buffer) in vertex_buffers.iter().enumerate() {
                pass.set_vertex_buffer(slot as u32, buffer.slice(..));
            }
            pass.draw(0..call.vertex_count, 0..1);
        }
        self.submit(encoder);
        Ok(())
    }

    fn read_framebuffer(&mut self) -> Result<PresentedFrame, GpuError> {
        let data = self.read_back(&self.target)?;
        Ok(PresentedFrame {
            width: self.target.width,
            height: self.target.height,
            data,
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
