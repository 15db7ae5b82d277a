//! In-memory `GraphicsApi` for tests.
//!
//! Shaders "compile" unless their text contains `#error`; programs fail to
//! link when any attached source contains `link_error`. Resource layouts are
//! registered with [`FakeApi::declare`] and attached to every shader whose
//! source carries a `// layout: <name>` line. Mesh draws are refused when a
//! mesh attribute's scalar kind differs from the vertex input of that name.
use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};

use shadersrc::ShaderStage;
use tracing_subscriber::fmt::MakeWriter;

use crate::api::{
    ApiError, Geometry, GraphicsApi, Interface, MeshId, PassKind, ProgramId, Property, ShaderId,
    TextureData,
};
use crate::layout::{check_interface, ProgramLayout};
use crate::mesh::{AttributeData, MeshData};
use crate::program::ProgramPipeline;
use crate::uniforms::{ScalarKind, UniformValue};

struct FakeShader {
    stage: ShaderStage,
    source: String,
    compiled: bool,
    log: String,
}

struct FakeProgram {
    attached: Vec<ShaderId>,
    linked: bool,
    log: String,
    layout: ProgramLayout,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedDraw {
    pub pipeline: ProgramPipeline,
    pub geometry: Geometry,
    pub pass: PassKind,
}

#[derive(Default)]
pub struct FakeApi {
    next_id: u32,
    shaders: HashMap<ShaderId, FakeShader>,
    programs: HashMap<ProgramId, FakeProgram>,
    layouts: HashMap<String, ProgramLayout>,
    compile_calls: usize,
    programs_created: usize,
    deleted_shaders: Vec<ShaderId>,
    uniform_writes: Vec<(ProgramId, i32, UniformValue)>,
    draws: Vec<RecordedDraw>,
    /// Attribute names and scalar kinds per mesh.
    meshes: HashMap<MeshId, Vec<(String, ScalarKind)>>,
    textures: HashMap<String, (u32, u32)>,
    rejected_stages: Vec<ShaderStage>,
    frames: usize,
}

impl FakeApi {
    pub fn declare(&mut self, name: &str, layout: ProgramLayout) -> &mut Self {
        self.layouts.insert(name.to_string(), layout);
        self
    }

    /// Makes `create_shader` fail for `stage`, like a backend without it.
    pub fn reject_stage(&mut self, stage: ShaderStage) -> &mut Self {
        self.rejected_stages.push(stage);
        self
    }

    fn next(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn layout_for(&self, source: &str) -> ProgramLayout {
        let mut stage_layout = ProgramLayout::default();
        let names = source
            .lines()
            .filter_map(|line| line.trim().strip_prefix("// layout:"))
            .map(str::trim);
        for name in names {
            if let Some(layout) = self.layouts.get(name) {
                let offset = stage_layout.uniforms.len() as i32;
                let block_offset = stage_layout.blocks.len() as u32;
                for mut uniform in layout.uniforms.clone() {
                    if uniform.block_index >= 0 {
                        uniform.block_index += block_offset as i32;
                    }
                    stage_layout.uniforms.push(uniform);
                }
                for mut block in layout.blocks.clone() {
                    block.members.iter_mut().for_each(|m| *m += offset as u32);
                    stage_layout.blocks.push(block);
                }
                stage_layout.inputs.extend(layout.inputs.iter().cloned());
                stage_layout.outputs.extend(layout.outputs.iter().cloned());
                for stage in ShaderStage::ALL {
                    let i = stage.index();
                    stage_layout.subroutine_uniforms[i]
                        .extend(layout.subroutine_uniforms[i].iter().cloned());
                    stage_layout.subroutines[i].extend(layout.subroutines[i].iter().cloned());
                }
            }
        }
        stage_layout
    }

    fn layout(&self, program: ProgramId) -> Option<&ProgramLayout> {
        self.programs
            .get(&program)
            .filter(|p| p.linked)
            .map(|p| &p.layout)
    }

    fn check_geometry(&self, pipeline: &ProgramPipeline, geometry: Geometry) -> Result<(), String> {
        let Geometry::Mesh(id) = geometry else {
            return Ok(());
        };
        let attributes = self
            .meshes
            .get(&id)
            .ok_or_else(|| format!("mesh {} does not exist", id.0))?;
        let Some(vertex) = pipeline
            .program(ShaderStage::Vertex)
            .and_then(|program| self.layout(program))
        else {
            return Ok(());
        };
        for input in &vertex.inputs {
            let Some((_, kind)) = attributes.iter().find(|(name, _)| *name == input.name) else {
                continue;
            };
            if input.ty.shape().map(|shape| shape.kind) != Some(*kind) {
                return Err(format!(
                    "mesh attribute '{}' holds {kind:?} data but the vertex input is {}",
                    input.name,
                    input.ty.glsl_name()
                ));
            }
        }
        Ok(())
    }

    pub fn compile_calls(&self) -> usize {
        self.compile_calls
    }

    pub fn programs_created(&self) -> usize {
        self.programs_created
    }

    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    pub fn live_shaders(&self) -> usize {
        self.shaders.len()
    }

    pub fn is_deleted_shader(&self, shader: ShaderId) -> bool {
        self.deleted_shaders.contains(&shader)
    }

    pub fn uniform_writes(&self) -> &[(ProgramId, i32, UniformValue)] {
        &self.uniform_writes
    }

    pub fn take_draws(&mut self) -> Vec<RecordedDraw> {
        std::mem::take(&mut self.draws)
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    pub fn texture(&self, name: &str) -> Option<(u32, u32)> {
        self.textures.get(name).copied()
    }

    pub fn frames(&self) -> usize {
        self.frames
    }
}

impl GraphicsApi for FakeApi {
    fn create_shader(&mut self, stage: ShaderStage) -> Result<ShaderId, ApiError> {
        if self.rejected_stages.contains(&stage) {
            return Err(ApiError::UnsupportedStage(stage));
        }
        let id = ShaderId(self.next());
        self.shaders.insert(
            id,
            FakeShader {
                stage,
                source: String::new(),
                compiled: false,
                log: String::new(),
            },
        );
        Ok(id)
    }

    fn compile_shader(&mut self, shader: ShaderId, source: &str) -> bool {
        self.compile_calls += 1;
        let Some(entry) = self.shaders.get_mut(&shader) else {
            return false;
        };
        entry.source = source.to_string();
        match source.lines().find(|line| line.trim_start().starts_with("#error")) {
            Some(line) => {
                entry.compiled = false;
                entry.log = format!("0:1: error: {}", line.trim());
            }
            None => {
                entry.compiled = true;
                entry.log.clear();
            }
        }
        entry.compiled
    }

    fn shader_info_log(&self, shader: ShaderId) -> String {
        self.shaders
            .get(&shader)
            .map(|s| s.log.clone())
            .unwrap_or_default()
    }

    fn delete_shader(&mut self, shader: ShaderId) {
        self.shaders.remove(&shader);
        self.deleted_shaders.push(shader);
    }

    fn create_program(&mut self, _separable: bool) -> ProgramId {
        self.programs_created += 1;
        let id = ProgramId(self.next());
        self.programs.insert(
            id,
            FakeProgram {
                attached: Vec::new(),
                linked: false,
                log: String::new(),
                layout: ProgramLayout::default(),
            },
        );
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
        let mut stage_layouts = Vec::new();
        let mut log = String::new();
        for id in &attached {
            match self.shaders.get(id) {
                Some(shader) if !shader.compiled => log = format!("{id} is not compiled"),
                Some(shader) if shader.source.contains("link_error") => {
                    log = "error: link_error requested by source".to_string()
                }
                Some(shader) => stage_layouts.push((shader.stage, self.layout_for(&shader.source))),
                None => log = format!("{id} does not exist"),
            }
        }
        let linked = if log.is_empty() {
            let borrowed: Vec<_> = stage_layouts.iter().map(|(s, l)| (*s, l)).collect();
            ProgramLayout::link(&borrowed).map_err(|err| log = err).ok()
        } else {
            None
        };

        let entry = self.programs.get_mut(&program).expect("program checked above");
        entry.linked = linked.is_some();
        entry.layout = linked.unwrap_or_default();
        entry.log = log;
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
        self.uniform_writes.push((program, location, value.clone()));
    }

    fn upload_mesh(&mut self, mesh: &MeshData) -> Result<MeshId, ApiError> {
        let id = MeshId(self.next());
        let attributes = mesh
            .attributes
            .iter()
            .map(|stream| {
                let kind = match stream.data {
                    AttributeData::Float(_) => ScalarKind::Float,
                    AttributeData::Int(_) => ScalarKind::Int,
                    AttributeData::Uint(_) => ScalarKind::UInt,
                };
                (stream.name.clone(), kind)
            })
            .collect();
        self.meshes.insert(id, attributes);
        Ok(id)
    }

    fn delete_mesh(&mut self, mesh: MeshId) {
        self.meshes.remove(&mesh);
    }

    fn upload_texture(&mut self, name: &str, texture: &TextureData) -> Result<(), ApiError> {
        self.textures
            .insert(name.to_string(), (texture.width, texture.height));
        Ok(())
    }

    fn validate_pipeline(
        &mut self,
        pipeline: &ProgramPipeline,
        geometry: Geometry,
        _pass: PassKind,
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
        self.check_geometry(pipeline, geometry)
    }

    fn begin_frame(&mut self, _clear_color: [f64; 4]) {}

    fn draw(
        &mut self,
        pipeline: &ProgramPipeline,
        geometry: Geometry,
        pass: PassKind,
    ) -> Result<(), String> {
        self.check_geometry(pipeline, geometry)?;
        self.draws.push(RecordedDraw {
            pipeline: pipeline.clone(),
            geometry,
            pass,
        });
        Ok(())
    }

    fn end_frame(&mut self) {
        self.frames += 1;
    }

    fn surface_size(&self) -> [u32; 2] {
        [64, 64]
    }
}

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for Captured {
    type Writer = Captured;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Runs `f` with a thread-local subscriber and returns everything logged at
/// warn level or above.
pub fn with_captured_warnings<R>(f: impl FnOnce() -> R) -> (R, String) {
    let captured = Captured::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(captured.clone())
        .with_max_level(tracing::Level::WARN)
        .with_ansi(false)
        .finish();
    let result = tracing::subscriber::with_default(subscriber, f);
    (result, captured.text())
}
