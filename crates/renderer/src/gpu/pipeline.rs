use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use crate::api::{PassKind, ProgramId};
use crate::introspect::GlslType;
use crate::layout::ProgramLayout;
use crate::mesh::AttributeData;
use crate::uniforms::ScalarKind;

use super::target::{COLOR_FORMAT, DEPTH_FORMAT};
use super::textures::view_dimension;

/// One vertex buffer slot. A stride of zero reads the same element for every
/// vertex, which is how absent mesh attributes are fed from the zero buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct VertexSlot {
    pub location: u32,
    pub format: wgpu::VertexFormat,
    pub stride: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct PipelineKey {
    pub vertex: ProgramId,
    pub fragment: ProgramId,
    pub slots: Vec<VertexSlot>,
    pub pass: PassKind,
}

impl PipelineKey {
    pub fn uses(&self, program: ProgramId) -> bool {
        self.vertex == program || self.fragment == program
    }
}

/// What gets bound at one `(group, binding)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BindingSource {
    /// Index into the owning program's uniform block buffers.
    Block {
        program: ProgramId,
        block: usize,
        size: u32,
    },
    Texture {
        name: String,
        dimension: wgpu::TextureViewDimension,
    },
    Sampler {
        comparison: bool,
    },
}

impl BindingSource {
    fn binding_type(&self) -> wgpu::BindingType {
        match self {
            BindingSource::Block { .. } => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            BindingSource::Texture { dimension, .. } => wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: *dimension,
                multisampled: false,
            },
            BindingSource::Sampler { comparison: true } => {
                wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Comparison)
            }
            BindingSource::Sampler { comparison: false } => {
                wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering)
            }
        }
    }
}

pub(crate) type Bindings = BTreeMap<(u32, u32), BindingSource>;

/// Merges the bindings of the programs in a pipeline, in stage order. The
/// first program declaring a slot owns it; a later declaration of a different
/// kind or block size is an error.
pub(crate) fn collect_bindings(programs: &[(ProgramId, &ProgramLayout)]) -> Result<Bindings, String> {
    let mut bindings = Bindings::new();
    for (program, layout) in programs {
        for (index, block) in layout.blocks.iter().enumerate() {
            let source = BindingSource::Block {
                program: *program,
                block: index,
                size: block.data_size,
            };
            insert_binding(&mut bindings, (block.group, block.binding), source, &block.name)?;
        }
        for uniform in &layout.uniforms {
            let Some(slot) = uniform.binding else {
                continue;
            };
            let source = match uniform.ty {
                GlslType::Sampler => BindingSource::Sampler { comparison: false },
                GlslType::SamplerShadow => BindingSource::Sampler { comparison: true },
                ty => match view_dimension(ty) {
                    Some(dimension) => BindingSource::Texture {
                        name: uniform.name.clone(),
                        dimension,
                    },
                    None => {
                        return Err(format!(
                            "'{}' has type {}; declare a separate texture and sampler instead",
                            uniform.name,
                            ty.glsl_name()
                        ))
                    }
                },
            };
            insert_binding(&mut bindings, slot, source, &uniform.name)?;
        }
    }
    Ok(bindings)
}

fn insert_binding(
    bindings: &mut Bindings,
    slot: (u32, u32),
    source: BindingSource,
    name: &str,
) -> Result<(), String> {
    match bindings.entry(slot) {
        Entry::Vacant(vacant) => {
            vacant.insert(source);
            Ok(())
        }
        Entry::Occupied(existing) => {
            let compatible = match (existing.get(), &source) {
                (BindingSource::Block { size: a, .. }, BindingSource::Block { size: b, .. }) => {
                    a == b
                }
                (BindingSource::Texture { dimension: a, .. }, BindingSource::Texture { dimension: b, .. }) => {
                    a == b
                }
                (a, b) => a == b,
            };
            if compatible {
                Ok(())
            } else {
                Err(format!(
                    "'{name}' at set {} binding {} conflicts with an earlier declaration",
                    slot.0, slot.1
                ))
            }
        }
    }
}

pub(crate) fn attribute_format(data: &AttributeData, components: u8) -> Option<wgpu::VertexFormat> {
    let kind = match data {
        AttributeData::Float(_) => ScalarKind::Float,
        AttributeData::Int(_) => ScalarKind::Int,
        AttributeData::Uint(_) => ScalarKind::UInt,
    };
    vertex_format(kind, components)
}

/// Format used for a shader input no mesh stream provides.
pub(crate) fn input_format(ty: GlslType) -> Option<wgpu::VertexFormat> {
    let shape = ty.shape()?;
    if shape.columns != 1 {
        return None;
    }
    vertex_format(shape.kind, shape.rows)
}

fn vertex_format(kind: ScalarKind, components: u8) -> Option<wgpu::VertexFormat> {
    use wgpu::VertexFormat::*;
    let format = match (kind, components) {
        (ScalarKind::Float, 1) => Float32,
        (ScalarKind::Float, 2) => Float32x2,
        (ScalarKind::Float, 3) => Float32x3,
        (ScalarKind::Float, 4) => Float32x4,
        (ScalarKind::Int, 1) => Sint32,
        (ScalarKind::Int, 2) => Sint32x2,
        (ScalarKind::Int, 3) => Sint32x3,
        (ScalarKind::Int, 4) => Sint32x4,
        (ScalarKind::UInt, 1) => Uint32,
        (ScalarKind::UInt, 2) => Uint32x2,
        (ScalarKind::UInt, 3) => Uint32x3,
        (ScalarKind::UInt, 4) => Uint32x4,
        _ => return None,
    };
    Some(format)
}

pub(crate) struct PipelineEntry {
    pub pipeline: wgpu::RenderPipeline,
    pub group_layouts: Vec<wgpu::BindGroupLayout>,
    pub bindings: Bindings,
    /// Bind groups plus the texture generation they were built against.
    pub bind_groups: Option<(u64, Vec<wgpu::BindGroup>)>,
}

pub(crate) fn create_pipeline(
    device: &wgpu::Device,
    key: &PipelineKey,
    vertex_module: &wgpu::ShaderModule,
    fragment_module: &wgpu::ShaderModule,
    bindings: Bindings,
) -> PipelineEntry {
    let group_count = bindings.keys().map(|(group, _)| group + 1).max().unwrap_or(0);
    let group_layouts: Vec<wgpu::BindGroupLayout> = (0..group_count)
        .map(|group| {
            let entries: Vec<wgpu::BindGroupLayoutEntry> = bindings
                .iter()
                .filter(|((g, _), _)| *g == group)
                .map(|((_, binding), source)| wgpu::BindGroupLayoutEntry {
                    binding: *binding,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: source.binding_type(),
                    count: None,
                })
                .collect();
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(&format!("set {group} layout")),
                entries: &entries,
            })
        })
        .collect();
    let layout_refs: Vec<&wgpu::BindGroupLayout> = group_layouts.iter().collect();
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("program pipeline layout"),
        bind_group_layouts: &layout_refs,
        push_constant_ranges: &[],
    });

    let attributes: Vec<[wgpu::VertexAttribute; 1]> = key
        .slots
        .iter()
        .map(|slot| {
            [wgpu::VertexAttribute {
                format: slot.format,
                offset: 0,
                shader_location: slot.location,
            }]
        })
        .collect();
    let buffers: Vec<wgpu::VertexBufferLayout> = key
        .slots
        .iter()
        .zip(&attributes)
        .map(|(slot, attribute)| wgpu::VertexBufferLayout {
            array_stride: slot.stride,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: attribute,
        })
        .collect();

    let depth_stencil = match key.pass {
        PassKind::Background => None,
        PassKind::Scene => Some(wgpu::DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: true,
            depth_compare: wgpu::CompareFunction::Less,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
    };

    let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(&format!("{} + {} pipeline", key.vertex, key.fragment)),
        layout: Some(&pipeline_layout),
        vertex: wgpu::VertexState {
            module: vertex_module,
            entry_point: Some("main"),
            buffers: &buffers,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: fragment_module,
            entry_point: Some("main"),
            targets: &[Some(wgpu::ColorTargetState {
                format: COLOR_FORMAT,
                blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            ..Default::default()
        },
        depth_stencil,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    });

    PipelineEntry {
        pipeline,
        group_layouts,
        bindings,
        bind_groups: None,
    }
}
