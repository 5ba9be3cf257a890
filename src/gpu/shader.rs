// SPDX-License-Identifier: GPL-3.0-only

//! WGSL program validation and reflection.
//!
//! Each stage is parsed and validated with naga on its own, then the two are
//! "linked": every location the fragment stage reads must be written by the
//! vertex stage, and both stages must agree on any group 0 binding they share.
//! The resulting [`ProgramLayout`] is what devices use to answer attribute and
//! uniform location queries.

use naga::{AddressSpace, Binding, ShaderStage, TypeInner, VectorSize};

use crate::errors::CompileError;

/// A vertex input declared with `@location(n)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeInfo {
    pub name: String,
    pub location: u32,
    /// Number of f32 components (vec2 = 2)
    pub components: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformKind {
    /// `var<uniform>` buffer
    Buffer,
    Texture,
    Sampler,
}

/// A group 0 resource binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformInfo {
    pub name: String,
    pub binding: u32,
    pub kind: UniformKind,
    /// Byte size of the uniform buffer; zero for textures and samplers
    pub size: u32,
}

/// Reflected interface of a linked program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramLayout {
    pub vertex_entry: String,
    pub fragment_entry: String,
    pub attributes: Vec<AttributeInfo>,
    pub uniforms: Vec<UniformInfo>,
}

impl ProgramLayout {
    pub fn attribute(&self, name: &str) -> Option<&AttributeInfo> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn uniform(&self, name: &str) -> Option<&UniformInfo> {
        self.uniforms.iter().find(|u| u.name == name)
    }

    pub fn uniform_at(&self, binding: u32) -> Option<&UniformInfo> {
        self.uniforms.iter().find(|u| u.binding == binding)
    }
}

/// Validate both stages and reflect the linked interface
pub fn link_program(
    vertex_source: &str,
    fragment_source: &str,
) -> Result<ProgramLayout, CompileError> {
    let vertex = parse_and_validate(vertex_source).map_err(CompileError::Vertex)?;
    let fragment = parse_and_validate(fragment_source).map_err(CompileError::Fragment)?;

    let vs_entry = vertex
        .entry_points
        .iter()
        .find(|ep| ep.stage == ShaderStage::Vertex)
        .ok_or_else(|| CompileError::Vertex("no @vertex entry point".to_string()))?;
    let fs_entry = fragment
        .entry_points
        .iter()
        .find(|ep| ep.stage == ShaderStage::Fragment)
        .ok_or_else(|| CompileError::Fragment("no @fragment entry point".to_string()))?;

    let mut attributes = Vec::new();
    for arg in &vs_entry.function.arguments {
        collect_locations(
            &vertex,
            arg.name.as_deref(),
            arg.ty,
            arg.binding.as_ref(),
            &mut attributes,
        );
    }

    let mut vertex_outputs = Vec::new();
    if let Some(result) = &vs_entry.function.result {
        collect_locations(
            &vertex,
            None,
            result.ty,
            result.binding.as_ref(),
            &mut vertex_outputs,
        );
    }

    let mut fragment_inputs = Vec::new();
    for arg in &fs_entry.function.arguments {
        collect_locations(
            &fragment,
            arg.name.as_deref(),
            arg.ty,
            arg.binding.as_ref(),
            &mut fragment_inputs,
        );
    }

    for input in &fragment_inputs {
        if !vertex_outputs.iter().any(|o| o.location == input.location) {
            return Err(CompileError::Link(format!(
                "fragment input '{}' at location {} is not written by the vertex stage",
                input.name, input.location
            )));
        }
    }

    let mut uniforms = collect_uniforms(&vertex);
    for uniform in collect_uniforms(&fragment) {
        match uniforms.iter().find(|u| u.binding == uniform.binding) {
            Some(existing) if existing.name != uniform.name || existing.kind != uniform.kind => {
                return Err(CompileError::Link(format!(
                    "binding {} is '{}' in the vertex stage but '{}' in the fragment stage",
                    uniform.binding, existing.name, uniform.name
                )));
            }
            Some(_) => {}
            None => uniforms.push(uniform),
        }
    }
    uniforms.sort_by_key(|u| u.binding);

    Ok(ProgramLayout {
        vertex_entry: vs_entry.name.clone(),
        fragment_entry: fs_entry.name.clone(),
        attributes,
        uniforms,
    })
}

fn parse_and_validate(source: &str) -> Result<naga::Module, String> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| e.emit_to_string(source))?;
    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|e| e.as_inner().to_string())?;
    Ok(module)
}

/// Gather `@location` bindings from an argument or result, flattening structs
fn collect_locations(
    module: &naga::Module,
    name: Option<&str>,
    ty: naga::Handle<naga::Type>,
    binding: Option<&Binding>,
    out: &mut Vec<AttributeInfo>,
) {
    match binding {
        Some(Binding::Location { location, .. }) => out.push(AttributeInfo {
            name: name.unwrap_or_default().to_string(),
            location: *location,
            components: component_count(&module.types[ty].inner),
        }),
        Some(Binding::BuiltIn(_)) => {}
        None => {
            if let TypeInner::Struct { members, .. } = &module.types[ty].inner {
                for member in members {
                    collect_locations(
                        module,
                        member.name.as_deref(),
                        member.ty,
                        member.binding.as_ref(),
                        out,
                    );
                }
            }
        }
    }
}

fn component_count(inner: &TypeInner) -> u32 {
    match inner {
        TypeInner::Vector { size, .. } => match size {
            VectorSize::Bi => 2,
            VectorSize::Tri => 3,
            VectorSize::Quad => 4,
        },
        _ => 1,
    }
}

fn collect_uniforms(module: &naga::Module) -> Vec<UniformInfo> {
    module
        .global_variables
        .iter()
        .filter_map(|(_, var)| {
            let binding = var.binding.as_ref()?;
            if binding.group != 0 {
                return None;
            }
            let inner = &module.types[var.ty].inner;
            let kind = match (var.space, inner) {
                (AddressSpace::Uniform, _) => UniformKind::Buffer,
                (_, TypeInner::Image { .. }) => UniformKind::Texture,
                (_, TypeInner::Sampler { .. }) => UniformKind::Sampler,
                _ => return None,
            };
            let size = match kind {
                UniformKind::Buffer => inner.size(module.to_ctx()),
                _ => 0,
            };
            Some(UniformInfo {
                name: var.name.clone().unwrap_or_default(),
                binding: binding.binding,
                kind,
                size,
            })
        })
        .collect()
}
