//! Shader source handling shared by the shadebox crates: stage detection,
//! path expansion and `#include` flattening.

mod include;
mod path;
mod stage;

pub use include::{IncludeError, LoadedSource, SourceError, SourceLoader};
pub use path::PathResolver;
pub use stage::ShaderStage;
