//! wgpu implementation of [`GraphicsApi`].
//!
//! - `reflect` parses GLSL through naga on the CPU and turns each stage into a
//!   [`ProgramLayout`] the resource queries are answered from.
//! - `context` owns the headless instance/device pair and runs fallible
//!   object creation inside validation error scopes.
//! - `pipeline` merges bindings across the programs of a pipeline and builds
//!   render pipelines, cached per vertex/fragment program, vertex layout and
//!   pass kind.
//! - `textures` uploads named textures and keeps 1x1 placeholders for
//!   declarations nothing has been uploaded for.
//! - `target` is the off-screen colour/depth target and its readback.
//!
//! Programs own one buffer per uniform block plus a CPU mirror. `set_uniform`
//! packs into the mirror; dirty mirrors are copied to the GPU through a
//! staging buffer right before the draw that reads them.
mod context;
mod pipeline;
mod reflect;
mod target;
mod textures;

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use image::RgbaImage;
use shadersrc::ShaderStage;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use wgpu::util::DeviceExt;

use crate::api::{
    ApiError, Geometry, GraphicsApi, Interface, MeshId, PassKind, ProgramId, Property, ShaderId,
    TextureData,
};
use crate::layout::{check_interface, ProgramLayout};
use crate::mesh::MeshData;
use crate::program::ProgramPipeline;
use crate::uniforms::UniformValue;

use context::GpuContext;
use pipeline::{BindingSource, PipelineEntry, PipelineKey, VertexSlot};
use target::RenderTarget;
use textures::GpuTexture;

pub use context::AdapterPreference;
pub use reflect::check_shader;

#[derive(Debug, Error)]
pub enum GpuError {
    #[error("snapshot readback failed: {0}")]
    Readback(String),
    #[error("GPU poll failed: {0}")]
    Poll(#[from] wgpu::PollError),
    #[error("failed to map snapshot buffer: {0}")]
    Map(#[from] wgpu::BufferAsyncError),
    #[error("failed to write snapshot: {0}")]
    Image(#[from] image::ImageError),
}

struct GpuShader {
    stage: ShaderStage,
    compiled: bool,
    log: String,
    module: Option<wgpu::ShaderModule>,
    layout: ProgramLayout,
}

struct BlockBuffer {
    buffer: wgpu::Buffer,
    mirror: Vec<u8>,
    dirty: bool,
}

#[derive(Default)]
struct GpuProgram {
    attached: Vec<ShaderId>,
    linked: bool,
    log: String,
    layout: ProgramLayout,
    modules: BTreeMap<ShaderStage, wgpu::ShaderModule>,
    blocks: Vec<BlockBuffer>,
}

struct LinkedProgram {
    layout: ProgramLayout,
    modules: BTreeMap<ShaderStage, wgpu::ShaderModule>,
    blocks: Vec<BlockBuffer>,
}

struct GpuMesh {
    /// Buffer, format and stride per attribute name.
    streams: HashMap<String, (wgpu::Buffer, wgpu::VertexFormat, u64)>,
    indices: Option<(wgpu::Buffer, u32)>,
    vertex_count: u32,
}

struct FrameState {
    encoder: wgpu::CommandEncoder,
    clear: wgpu::Color,
    passes: usize,
    depth_cleared: bool,
}

pub struct WgpuApi {
    context: GpuContext,
    target: RenderTarget,
    next_id: u32,
    shaders: HashMap<ShaderId, GpuShader>,
    programs: HashMap<ProgramId, GpuProgram>,
    meshes: HashMap<MeshId, GpuMesh>,
    textures: HashMap<String, GpuTexture>,
    placeholders: HashMap<wgpu::TextureViewDimension, GpuTexture>,
    texture_generation: u64,
    sampler: wgpu::Sampler,
    comparison_sampler: wgpu::Sampler,
    zero_buffer: wgpu::Buffer,
    pipelines: HashMap<PipelineKey, Result<PipelineEntry, String>>,
    frame: Option<FrameState>,
}

impl WgpuApi {
    /// Creates a device with an off-screen target of `size` pixels.
    pub fn headless(size: [u32; 2], preference: AdapterPreference) -> anyhow::Result<Self> {
        let context = GpuContext::headless(size, preference)?;
        let target = RenderTarget::new(&context.device, size);
        let (sampler, comparison_sampler) = textures::create_samplers(&context.device);
        let zero_buffer = context
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("zero attribute buffer"),
                contents: &[0u8; 64],
                usage: wgpu::BufferUsages::VERTEX,
            });
        info!(
            adapter = %context.adapter_name,
            width = target.size[0],
            height = target.size[1],
            "initialised headless renderer"
        );
        Ok(Self {
            context,
            target,
            next_id: 0,
            shaders: HashMap::new(),
            programs: HashMap::new(),
            meshes: HashMap::new(),
            textures: HashMap::new(),
            placeholders: HashMap::new(),
            texture_generation: 0,
            sampler,
            comparison_sampler,
            zero_buffer,
            pipelines: HashMap::new(),
            frame: None,
        })
    }

    pub fn adapter_name(&self) -> &str {
        &self.context.adapter_name
    }

    /// Reads back the colour target as it stands after the last submitted frame.
    pub fn snapshot(&self) -> Result<RgbaImage, GpuError> {
        self.target
            .read_back(&self.context.device, &self.context.queue)
    }

    pub fn save_snapshot(&self, path: &Path) -> Result<(), GpuError> {
        let image = self.snapshot()?;
        image.save(path)?;
        info!(path = %path.display(), "saved snapshot");
        Ok(())
    }

    fn next(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn layout(&self, program: ProgramId) -> Option<&ProgramLayout> {
        self.programs
            .get(&program)
            .filter(|p| p.linked)
            .map(|p| &p.layout)
    }

    fn linked(&self, program: ProgramId) -> Result<&GpuProgram, String> {
        self.programs
            .get(&program)
            .filter(|p| p.linked)
            .ok_or_else(|| format!("{program} is not linked"))
    }

    fn link_stages(&self, attached: &[ShaderId]) -> Result<LinkedProgram, String> {
        let mut stages: BTreeMap<ShaderStage, (&wgpu::ShaderModule, &ProgramLayout)> =
            BTreeMap::new();
        for id in attached {
            let shader = self
                .shaders
                .get(id)
                .ok_or_else(|| format!("{id} does not exist"))?;
            let module = match (&shader.module, shader.compiled) {
                (Some(module), true) => module,
                _ => return Err(format!("{id} is not compiled")),
            };
            if stages.insert(shader.stage, (module, &shader.layout)).is_some() {
                return Err(format!("more than one {} shader attached", shader.stage));
            }
        }
        if stages.is_empty() {
            return Err("no shaders attached".to_string());
        }
        if let (Some((_, vertex)), Some((_, fragment))) = (
            stages.get(&ShaderStage::Vertex),
            stages.get(&ShaderStage::Fragment),
        ) {
            check_interface(vertex, fragment)?;
        }

        let borrowed: Vec<(ShaderStage, &ProgramLayout)> = stages
            .iter()
            .map(|(stage, (_, layout))| (*stage, *layout))
            .collect();
        let layout = ProgramLayout::link(&borrowed)?;
        let blocks = layout
            .blocks
            .iter()
            .map(|block| {
                let size = u64::from(block.data_size).max(16).next_multiple_of(16);
                BlockBuffer {
                    buffer: self.context.device.create_buffer(&wgpu::BufferDescriptor {
                        label: Some(&format!("uniform block {}", block.name)),
                        size,
                        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                        mapped_at_creation: false,
                    }),
                    mirror: vec![0; size as usize],
                    dirty: false,
                }
            })
            .collect();
        let modules = stages
            .into_iter()
            .map(|(stage, (module, _))| (stage, module.clone()))
            .collect();
        Ok(LinkedProgram {
            layout,
            modules,
            blocks,
        })
    }

    fn pipeline_key(
        &self,
        pipeline: &ProgramPipeline,
        geometry: Geometry,
        pass: PassKind,
    ) -> Result<PipelineKey, String> {
        let vertex = pipeline
            .program(ShaderStage::Vertex)
            .ok_or("pipeline has no vertex stage")?;
        let fragment = pipeline
            .program(ShaderStage::Fragment)
            .ok_or("pipeline has no fragment stage")?;
        let mesh = match geometry {
            Geometry::FullscreenTriangle => None,
            Geometry::Mesh(id) => Some(
                self.meshes
                    .get(&id)
                    .ok_or_else(|| format!("mesh {} does not exist", id.0))?,
            ),
        };

        let mut slots = Vec::new();
        for input in &self.linked(vertex)?.layout.inputs {
            let location = u32::try_from(input.location)
                .map_err(|_| format!("vertex input '{}' has no location", input.name))?;
            let slot = match mesh.and_then(|m| m.streams.get(&input.name)) {
                Some((_, format, stride)) => VertexSlot {
                    location,
                    format: *format,
                    stride: *stride,
                },
                None => VertexSlot {
                    location,
                    format: pipeline::input_format(input.ty).ok_or_else(|| {
                        format!(
                            "vertex input '{}' has unsupported type {}",
                            input.name,
                            input.ty.glsl_name()
                        )
                    })?,
                    stride: 0,
                },
            };
            slots.push(slot);
        }
        Ok(PipelineKey {
            vertex,
            fragment,
            slots,
            pass,
        })
    }

    fn build_pipeline(&self, key: &PipelineKey) -> Result<PipelineEntry, String> {
        let vertex = self.linked(key.vertex)?;
        let fragment = self.linked(key.fragment)?;
        let vertex_module = vertex
            .modules
            .get(&ShaderStage::Vertex)
            .ok_or_else(|| format!("{} has no vertex stage", key.vertex))?;
        let fragment_module = fragment
            .modules
            .get(&ShaderStage::Fragment)
            .ok_or_else(|| format!("{} has no fragment stage", key.fragment))?;

        let mut programs = vec![(key.vertex, &vertex.layout)];
        if key.fragment != key.vertex {
            programs.push((key.fragment, &fragment.layout));
        }
        let bindings = pipeline::collect_bindings(&programs)?;
        self.context.validated(|device| {
            pipeline::create_pipeline(device, key, vertex_module, fragment_module, bindings)
        })
    }

    /// Builds and caches the pipeline for `key`; failures are cached and
    /// logged once too.
    fn ensure_pipeline(&mut self, key: &PipelineKey) -> Result<(), String> {
        if let Some(entry) = self.pipelines.get(key) {
            return entry.as_ref().map(|_| ()).map_err(Clone::clone);
        }
        let built = self.build_pipeline(key);
        let result = built.as_ref().map(|_| ()).map_err(Clone::clone);
        match &built {
            Ok(_) => debug!(
                vertex = %key.vertex,
                fragment = %key.fragment,
                pass = ?key.pass,
                "created render pipeline"
            ),
            Err(err) => error!(
                vertex = %key.vertex,
                fragment = %key.fragment,
                "failed to create render pipeline: {err}"
            ),
        }
        self.pipelines.insert(key.clone(), built);
        result
    }

    fn ensure_bind_groups(&mut self, key: &PipelineKey) {
        let generation = self.texture_generation;
        let missing: Vec<wgpu::TextureViewDimension> = match self.pipelines.get(key) {
            Some(Ok(entry)) if entry.bind_groups.as_ref().map(|(g, _)| *g) != Some(generation) => {
                entry
                    .bindings
                    .values()
                    .filter_map(|source| match source {
                        BindingSource::Texture { name, dimension }
                            if self.textures.get(name).map(|t| t.dimension)
                                != Some(*dimension) =>
                        {
                            Some(*dimension)
                        }
                        _ => None,
                    })
                    .collect()
            }
            _ => return,
        };
        for dimension in missing {
            if !self.placeholders.contains_key(&dimension) {
                let placeholder =
                    GpuTexture::placeholder(&self.context.device, &self.context.queue, dimension);
                self.placeholders.insert(dimension, placeholder);
            }
        }

        let groups = match self.pipelines.get(key) {
            Some(Ok(entry)) => self.create_bind_groups(entry),
            _ => None,
        };
        if let Some(Ok(entry)) = self.pipelines.get_mut(key) {
            entry.bind_groups = groups.map(|groups| (generation, groups));
        }
    }

    fn create_bind_groups(&self, entry: &PipelineEntry) -> Option<Vec<wgpu::BindGroup>> {
        let mut groups = Vec::with_capacity(entry.group_layouts.len());
        for (group, layout) in entry.group_layouts.iter().enumerate() {
            let mut entries = Vec::new();
            for ((set, binding), source) in &entry.bindings {
                if *set as usize != group {
                    continue;
                }
                let resource = match source {
                    BindingSource::Block { program, block, .. } => self
                        .programs
                        .get(program)?
                        .blocks
                        .get(*block)?
                        .buffer
                        .as_entire_binding(),
                    BindingSource::Texture { name, dimension } => {
                        let texture = self
                            .textures
                            .get(name)
                            .filter(|t| t.dimension == *dimension)
                            .or_else(|| self.placeholders.get(dimension))?;
                        wgpu::BindingResource::TextureView(&texture.view)
                    }
                    BindingSource::Sampler { comparison: true } => {
                        wgpu::BindingResource::Sampler(&self.comparison_sampler)
                    }
                    BindingSource::Sampler { comparison: false } => {
                        wgpu::BindingResource::Sampler(&self.sampler)
                    }
                };
                entries.push(wgpu::BindGroupEntry {
                    binding: *binding,
                    resource,
                });
            }
            groups.push(
                self.context
                    .device
                    .create_bind_group(&wgpu::BindGroupDescriptor {
                        label: Some(&format!("set {group}")),
                        layout,
                        entries: &entries,
                    }),
            );
        }
        Some(groups)
    }

    fn flush_uniforms(&mut self, key: &PipelineKey) {
        let Some(frame) = self.frame.as_mut() else {
            return;
        };
        let device = &self.context.device;
        for id in [key.vertex, key.fragment] {
            let Some(program) = self.programs.get_mut(&id) else {
                continue;
            };
            for block in program.blocks.iter_mut().filter(|b| b.dirty) {
                let staging = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("uniform staging buffer"),
                    contents: &block.mirror,
                    usage: wgpu::BufferUsages::COPY_SRC,
                });
                frame.encoder.copy_buffer_to_buffer(
                    &staging,
                    0,
                    &block.buffer,
                    0,
                    block.mirror.len() as u64,
                );
                block.dirty = false;
            }
        }
    }

    fn record_pass(&mut self, key: &PipelineKey, geometry: Geometry) -> Result<(), String> {
        let Self {
            frame,
            pipelines,
            programs,
            meshes,
            target,
            zero_buffer,
            ..
        } = self;
        let frame = frame.as_mut().ok_or("draw outside of a frame")?;
        let Some(Ok(entry)) = pipelines.get(key) else {
            return Err(format!("no render pipeline for {} + {}", key.vertex, key.fragment));
        };
        let (_, bind_groups) = entry.bind_groups.as_ref().ok_or_else(|| {
            format!("bind groups for {} + {} are unavailable", key.vertex, key.fragment)
        })?;
        let inputs = programs
            .get(&key.vertex)
            .map(|p| &p.layout.inputs)
            .ok_or_else(|| format!("{} does not exist", key.vertex))?;
        let mesh = match geometry {
            Geometry::FullscreenTriangle => None,
            Geometry::Mesh(id) => Some(
                meshes
                    .get(&id)
                    .ok_or_else(|| format!("mesh {} does not exist", id.0))?,
            ),
        };

        let color_load = if frame.passes == 0 {
            wgpu::LoadOp::Clear(frame.clear)
        } else {
            wgpu::LoadOp::Load
        };
        let depth_stencil_attachment = match key.pass {
            PassKind::Background => None,
            PassKind::Scene => {
                let load = if frame.depth_cleared {
                    wgpu::LoadOp::Load
                } else {
                    wgpu::LoadOp::Clear(1.0)
                };
                frame.depth_cleared = true;
                Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &target.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                })
            }
        };
        frame.passes += 1;

        let mut pass = frame
            .encoder
            .begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("shadebox pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.color_view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: color_load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        pass.set_pipeline(&entry.pipeline);
        for (index, group) in bind_groups.iter().enumerate() {
            pass.set_bind_group(index as u32, group, &[]);
        }
        for (slot, (input, vertex_slot)) in inputs.iter().zip(&key.slots).enumerate() {
            let stream = mesh
                .filter(|_| vertex_slot.stride > 0)
                .and_then(|m| m.streams.get(&input.name));
            let buffer = stream.map_or(&*zero_buffer, |(buffer, _, _)| buffer);
            pass.set_vertex_buffer(slot as u32, buffer.slice(..));
        }

        match mesh {
            None => pass.draw(0..3, 0..1),
            Some(mesh) => match &mesh.indices {
                Some((buffer, count)) if *count > 0 => {
                    pass.set_index_buffer(buffer.slice(..), wgpu::IndexFormat::Uint32);
                    pass.draw_indexed(0..*count, 0, 0..1);
                }
                Some(_) => {}
                None if mesh.vertex_count > 0 => pass.draw(0..mesh.vertex_count, 0..1),
                None => {}
            },
        }
        Ok(())
    }
}

impl GraphicsApi for WgpuApi {
    fn create_shader(&mut self, stage: ShaderStage) -> Result<ShaderId, ApiError> {
        let id = ShaderId(self.next());
        self.shaders.insert(
            id,
            GpuShader {
                stage,
                compiled: false,
                log: String::new(),
                module: None,
                layout: ProgramLayout::default(),
            },
        );
        Ok(id)
    }

    fn compile_shader(&mut self, shader: ShaderId, source: &str) -> bool {
        let Some(stage) = self.shaders.get(&shader).map(|s| s.stage) else {
            return false;
        };
        let label = format!("{stage} {shader}");
        let outcome = reflect::parse(stage, source).and_then(|(module, info)| {
            let layout = reflect::reflect(stage, &module, &info);
            let naga_stage = reflect::naga_stage(stage)
                .ok_or_else(|| format!("{stage} shaders are not supported by the wgpu backend"))?;
            let gpu_module = self.context.validated(|device| {
                device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(&label),
                    source: wgpu::ShaderSource::Glsl {
                        shader: Cow::Borrowed(source),
                        stage: naga_stage,
                        defines: &[],
                    },
                })
            })?;
            Ok((gpu_module, layout))
        });

        let Some(record) = self.shaders.get_mut(&shader) else {
            return false;
        };
        match outcome {
            Ok((module, layout)) => {
                record.compiled = true;
                record.log.clear();
                record.module = Some(module);
                record.layout = layout;
            }
            Err(log) => {
                record.compiled = false;
                record.log = log;
                record.module = None;
                record.layout = ProgramLayout::default();
            }
        }
        record.compiled
    }

    fn shader_info_log(&self, shader: ShaderId) -> String {
        self.shaders
            .get(&shader)
            .map(|s| s.log.clone())
            .unwrap_or_default()
    }

    fn delete_shader(&mut self, shader: ShaderId) {
        self.shaders.remove(&shader);
    }

    fn create_program(&mut self, _separable: bool) -> ProgramId {
        let id = ProgramId(self.next());
        self.programs.insert(id, GpuProgram::default());
        id
    }

    fn attach_shader(&mut self, program: ProgramId, shader: ShaderId) {
        if let Some(entry) = self.programs.get_mut(&program) {
            entry.attached.push(shader);
        }
    }

    fn link_program(&mut self, program: ProgramId) -> bool {
        let Some(attached) = self.programs.get(&program).map(|p| p.attached.clone()) else {
            return false;
        };
        let outcome = self.link_stages(&attached);
        self.pipelines.retain(|key, _| !key.uses(program));
        let Some(entry) = self.programs.get_mut(&program) else {
            return false;
        };
        match outcome {
            Ok(linked) => {
                entry.linked = true;
                entry.log.clear();
                entry.layout = linked.layout;
                entry.modules = linked.modules;
                entry.blocks = linked.blocks;
            }
            Err(log) => {
                entry.linked = false;
                entry.log = log;
                entry.layout = ProgramLayout::default();
                entry.modules.clear();
                entry.blocks.clear();
            }
        }
        entry.linked
    }

    fn program_info_log(&self, program: ProgramId) -> String {
        self.programs
            .get(&program)
            .map(|p| p.log.clone())
            .unwrap_or_default()
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.programs.remove(&program);
        self.pipelines.retain(|key, _| !key.uses(program));
    }

    fn active_resources(&self, program: ProgramId, interface: Interface) -> u32 {
        self.layout(program).map_or(0, |l| l.count(interface))
    }

    fn resource_properties(
        &self,
        program: ProgramId,
        interface: Interface,
        index: u32,
        properties: &[Property],
        values: &mut [i32],
    ) {
        let Some(layout) = self.layout(program) else {
            return;
        };
        for (property, value) in properties.iter().zip(values.iter_mut()) {
            *value = layout.property(interface, index, *property);
        }
    }

    fn resource_name(&self, program: ProgramId, interface: Interface, index: u32) -> String {
        self.layout(program)
            .and_then(|l| l.name(interface, index))
            .unwrap_or_default()
            .to_string()
    }

    fn resource_active_variables(
        &self,
        program: ProgramId,
        interface: Interface,
        index: u32,
    ) -> Vec<u32> {
        self.layout(program)
            .map(|l| l.active_variables(interface, index))
            .unwrap_or_default()
    }

    fn set_uniform(&mut self, program: ProgramId, location: i32, value: &UniformValue) {
        let Some(entry) = self.programs.get_mut(&program).filter(|p| p.linked) else {
            return;
        };
        let Some(uniform) = entry.layout.uniform_at_location(location) else {
            debug!(%program, location, "no uniform at location");
            return;
        };
        let Ok(block) = usize::try_from(uniform.block_index) else {
            debug!(%program, name = %uniform.name, "uniform outside a block has no backing buffer");
            return;
        };
        let member = uniform.member_layout();
        let Some(buffer) = entry.blocks.get_mut(block) else {
            return;
        };
        if value.write_packed(&mut buffer.mirror, member) {
            buffer.dirty = true;
        } else {
            warn!(
                %program,
                name = %uniform.name,
                value = %value.describe(),
                "value does not fit the uniform block"
            );
        }
    }

    fn upload_mesh(&mut self, mesh: &MeshData) -> Result<MeshId, ApiError> {
        mesh.validate()
            .map_err(|err| ApiError::InvalidUpload(err.to_string()))?;
        let device = &self.context.device;
        let mut streams = HashMap::new();
        for stream in &mesh.attributes {
            let format = pipeline::attribute_format(&stream.data, stream.components)
                .ok_or_else(|| {
                    ApiError::InvalidUpload(format!(
                        "attribute '{}' has {} components",
                        stream.name, stream.components
                    ))
                })?;
            let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("attribute {}", stream.name)),
                contents: stream.data.as_bytes(),
                usage: wgpu::BufferUsages::VERTEX,
            });
            streams.insert(stream.name.clone(), (buffer, format, format.size()));
        }
        let indices = mesh.indices.as_ref().map(|indices| {
            let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("mesh indices"),
                contents: bytemuck::cast_slice(indices),
                usage: wgpu::BufferUsages::INDEX,
            });
            (buffer, indices.len() as u32)
        });
        let gpu_mesh = GpuMesh {
            streams,
            indices,
            vertex_count: mesh.vertex_count() as u32,
        };
        let id = MeshId(self.next());
        self.meshes.insert(id, gpu_mesh);
        Ok(id)
    }

    fn delete_mesh(&mut self, mesh: MeshId) {
        self.meshes.remove(&mesh);
    }

    fn upload_texture(&mut self, name: &str, texture: &TextureData) -> Result<(), ApiError> {
        let uploaded =
            GpuTexture::upload(&self.context.device, &self.context.queue, name, texture)?;
        self.textures.insert(name.to_string(), uploaded);
        self.texture_generation += 1;
        debug!(name, width = texture.width, height = texture.height, "uploaded texture");
        Ok(())
    }

    fn validate_pipeline(
        &mut self,
        pipeline: &ProgramPipeline,
        geometry: Geometry,
        pass: PassKind,
    ) -> Result<(), String> {
        let mut previous: Option<(ProgramId, &ProgramLayout)> = None;
        for (stage, program) in pipeline.stages() {
            let layout = self
                .layout(program)
                .ok_or_else(|| format!("{stage} stage program {program} is not linked"))?;
            match previous {
                Some((producer_id, _)) if producer_id == program => continue,
                Some((_, producer)) => check_interface(producer, layout)?,
                None => {}
            }
            previous = Some((program, layout));
        }
        let key = self.pipeline_key(pipeline, geometry, pass)?;
        self.ensure_pipeline(&key)
    }

    fn begin_frame(&mut self, clear_color: [f64; 4]) {
        if self.frame.is_some() {
            warn!("frame started twice; discarding the unfinished one");
        }
        let encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("shadebox frame encoder"),
            });
        let [r, g, b, a] = clear_color;
        self.frame = Some(FrameState {
            encoder,
            clear: wgpu::Color { r, g, b, a },
            passes: 0,
            depth_cleared: false,
        });
    }

    fn draw(
        &mut self,
        pipeline: &ProgramPipeline,
        geometry: Geometry,
        pass: PassKind,
    ) -> Result<(), String> {
        if self.frame.is_none() {
            return Err("draw outside of a frame".to_string());
        }
        let key = self.pipeline_key(pipeline, geometry, pass)?;
        self.ensure_pipeline(&key)?;
        self.ensure_bind_groups(&key);
        self.flush_uniforms(&key);
        self.record_pass(&key, geometry)
    }

    fn end_frame(&mut self) {
        let Some(mut frame) = self.frame.take() else {
            return;
        };
        if frame.passes == 0 {
            let _clear = frame
                .encoder
                .begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("shadebox clear pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &self.target.color_view,
                        depth_slice: None,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(frame.clear),
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
        }
        self.context.queue.submit(Some(frame.encoder.finish()));
    }

    fn surface_size(&self) -> [u32; 2] {
        self.target.size
    }
}
