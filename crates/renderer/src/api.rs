//! The narrow graphics-API surface the hot-reload core is written against.
//!
//! Everything above this trait (compiler cache, programs, introspection, the
//! sandbox) speaks in opaque ids and resource-property queries, so the same
//! logic runs on the wgpu backend and on the in-memory fake used by tests.
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use shadersrc::ShaderStage;
use thiserror::Error;

use crate::mesh::MeshData;
use crate::program::ProgramPipeline;
use crate::uniforms::UniformValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId(pub u32);

impl fmt::Display for ShaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shader#{}", self.0)
    }
}

impl fmt::Display for ProgramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "program#{}", self.0)
    }
}

/// Resource interfaces a linked program can be queried for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interface {
    Uniform,
    UniformBlock,
    ProgramInput,
    ProgramOutput,
    SubroutineUniform(ShaderStage),
    Subroutine(ShaderStage),
}

impl Interface {
    pub fn label(&self) -> String {
        match self {
            Interface::Uniform => "uniform".to_string(),
            Interface::UniformBlock => "uniform block".to_string(),
            Interface::ProgramInput => "program input".to_string(),
            Interface::ProgramOutput => "program output".to_string(),
            Interface::SubroutineUniform(stage) => format!("{stage} subroutine uniform"),
            Interface::Subroutine(stage) => format!("{stage} subroutine"),
        }
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Per-resource properties answered by [`GraphicsApi::resource_properties`].
///
/// Values come back as `i32`; `-1` means "not applicable" (a uniform outside
/// any block has block index -1, a block member has no location on backends
/// that lack a default uniform block, and so on).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Property {
    Type,
    ArraySize,
    Offset,
    BlockIndex,
    ArrayStride,
    MatrixStride,
    IsRowMajor,
    Location,
    BufferBinding,
    BufferDataSize,
    NumActiveVariables,
    NumCompatibleSubroutines,
    ReferencedBy(ShaderStage),
}

/// What a draw call rasterises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Geometry {
    /// Three vertices with no vertex buffers; the vertex stage positions them.
    FullscreenTriangle,
    Mesh(MeshId),
}

/// Background passes ignore depth; scene passes test and write it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassKind {
    Background,
    Scene,
}

/// Decoded RGBA8 image, rows already flipped to bottom-up order.
#[derive(Debug, Clone)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unsupported shader stage {0}")]
    UnsupportedStage(ShaderStage),
    #[error("unknown {0}")]
    UnknownObject(String),
    #[error("invalid upload: {0}")]
    InvalidUpload(String),
}

/// The graphics operations the core needs. All calls happen on the render
/// thread; implementations are not expected to be `Send`.
pub trait GraphicsApi {
    fn create_shader(&mut self, stage: ShaderStage) -> Result<ShaderId, ApiError>;
    /// Submits and compiles `source`; returns the compile status.
    fn compile_shader(&mut self, shader: ShaderId, source: &str) -> bool;
    fn shader_info_log(&self, shader: ShaderId) -> String;
    fn delete_shader(&mut self, shader: ShaderId);

    fn create_program(&mut self, separable: bool) -> ProgramId;
    fn attach_shader(&mut self, program: ProgramId, shader: ShaderId);
    /// Links the attached shaders; returns the link status.
    fn link_program(&mut self, program: ProgramId) -> bool;
    fn program_info_log(&self, program: ProgramId) -> String;
    fn delete_program(&mut self, program: ProgramId);

    fn active_resources(&self, program: ProgramId, interface: Interface) -> u32;
    /// Batched property query. `values` is filled positionally to match `properties`.
    fn resource_properties(
        &self,
        program: ProgramId,
        interface: Interface,
        index: u32,
        properties: &[Property],
        values: &mut [i32],
    );
    fn resource_name(&self, program: ProgramId, interface: Interface, index: u32) -> String;
    /// Active-variable indices of a block (into the uniform interface) or the
    /// compatible subroutine indices of a subroutine uniform.
    fn resource_active_variables(
        &self,
        program: ProgramId,
        interface: Interface,
        index: u32,
    ) -> Vec<u32>;

    fn set_uniform(&mut self, program: ProgramId, location: i32, value: &UniformValue);

    fn upload_mesh(&mut self, mesh: &MeshData) -> Result<MeshId, ApiError>;
    fn delete_mesh(&mut self, mesh: MeshId);
    /// Makes `texture` available to every program declaring a texture named `name`.
    fn upload_texture(&mut self, name: &str, texture: &TextureData) -> Result<(), ApiError>;

    /// Checks that `pipeline` can draw `geometry` in `pass`, the exact
    /// combination a following [`draw`](Self::draw) will use.
    fn validate_pipeline(
        &mut self,
        pipeline: &ProgramPipeline,
        geometry: Geometry,
        pass: PassKind,
    ) -> Result<(), String>;
    fn begin_frame(&mut self, clear_color: [f64; 4]);
    fn draw(
        &mut self,
        pipeline: &ProgramPipeline,
        geometry: Geometry,
        pass: PassKind,
    ) -> Result<(), String>;
    fn end_frame(&mut self);
    fn surface_size(&self) -> [u32; 2];
}

#[derive(Debug, Default)]
struct Buried {
    shaders: Vec<ShaderId>,
    programs: Vec<ProgramId>,
}

/// Deferred deletion queue for API objects whose owners are dropped without
/// access to the API (last `Rc` of a shader going away, a program replaced in
/// its slot). The owner of the API drains it with [`Graveyard::collect`].
#[derive(Debug, Clone, Default)]
pub struct Graveyard {
    inner: Rc<RefCell<Buried>>,
}

impl Graveyard {
    pub fn bury_shader(&self, shader: ShaderId) {
        self.inner.borrow_mut().shaders.push(shader);
    }

    pub fn bury_program(&self, program: ProgramId) {
        self.inner.borrow_mut().programs.push(program);
    }

    pub fn pending(&self) -> usize {
        let buried = self.inner.borrow();
        buried.shaders.len() + buried.programs.len()
    }

    /// Deletes everything buried so far. Programs go first so no shader is
    /// deleted while still attached.
    pub fn collect<A: GraphicsApi + ?Sized>(&self, api: &mut A) -> usize {
        let Buried { shaders, programs } = std::mem::take(&mut *self.inner.borrow_mut());
        let count = shaders.len() + programs.len();
        for program in programs {
            api.delete_program(program);
        }
        for shader in shaders {
            api.delete_shader(shader);
        }
        if count > 0 {
            tracing::trace!(count, "deleted released graphics objects");
        }
        count
    }
}
