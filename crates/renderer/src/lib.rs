//! Hot-reload core for shadebox.
//!
//! The crate turns files on disk into running GPU programs and keeps them
//! running while they are edited. The overall flow is:
//!
//! ```text
//!   FileWatcher ──drain──▶ Sandbox::frame ──import──▶ ShaderCompiler ──▶ Program
//!                               │                                          │
//!                               │                               ProgramIntrospector
//!                               ▼                                          │
//!                     validate + draw ◀── FrameUniforms::apply (by name) ◀─┘
//! ```
//!
//! Everything above [`GraphicsApi`] is backend agnostic. [`WgpuApi`] is the
//! real backend: GLSL goes through naga for reflection and wgpu for
//! execution, and frames land in an off-screen target that can be saved as a
//! PNG. Tests run the same code against an in-memory fake.

mod api;
mod builtin;
mod compiler;
mod frame;
mod gpu;
mod introspect;
mod layout;
mod mesh;
mod program;
mod sandbox;
mod uniforms;

#[cfg(test)]
mod fake;

pub use api::{
    ApiError, Geometry, GraphicsApi, Graveyard, Interface, MeshId, PassKind, ProgramId, Property,
    ShaderId, TextureData,
};
pub use builtin::{fullscreen_vertex, BACKGROUND_TAG, FULLSCREEN_VERTEX_GLSL};
pub use compiler::{CompileError, CompiledShader, CompilerStats, ShaderCompiler, ShaderSource};
pub use frame::{
    Camera, FrameUniforms, Light, Material, SceneSettings, SteppedTimeSource, SystemTimeSource,
    TimeSample, TimeSource,
};
pub use gpu::{check_shader, AdapterPreference, GpuError, WgpuApi};
pub use introspect::{
    GlslType, IntrospectionReport, ProgramIntrospector, Resource, TypeShape, UniformBlock,
};
pub use layout::{
    check_interface, BlockLayout, ProgramLayout, SubroutineUniformLayout, UniformLayout,
    VariableLayout,
};
pub use mesh::{
    AttributeData, AttributeStream, GeometryError, GeometryLoader, JsonMeshLoader, MeshData,
};
pub use program::{LinkError, Program, ProgramPipeline};
pub use sandbox::{FrameStats, ImportError, Sandbox, SandboxOptions, SlotInfo, SlotState};
pub use uniforms::{
    IntoUniform, MemberLayout, ScalarKind, Shape, Transposed, UniformData, UniformValue,
};
