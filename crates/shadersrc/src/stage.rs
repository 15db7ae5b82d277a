use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Programmable pipeline stage a shader source is written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShaderStage {
    Vertex,
    TessControl,
    TessEvaluation,
    Geometry,
    Fragment,
    Compute,
}

impl ShaderStage {
    pub const ALL: [ShaderStage; 6] = [
        ShaderStage::Vertex,
        ShaderStage::TessControl,
        ShaderStage::TessEvaluation,
        ShaderStage::Geometry,
        ShaderStage::Fragment,
        ShaderStage::Compute,
    ];

    /// Stage implied by a conventional file extension (`.vert`, `.frag`, ...).
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "vert" | "vs" | "vsh" => Some(Self::Vertex),
            "tesc" => Some(Self::TessControl),
            "tese" => Some(Self::TessEvaluation),
            "geom" | "gs" => Some(Self::Geometry),
            "frag" | "fs" | "fsh" => Some(Self::Fragment),
            "comp" | "cs" => Some(Self::Compute),
            _ => None,
        }
    }

    /// Position of the stage in [`ShaderStage::ALL`], usable as an array index.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Single-bit mask for this stage, as used by "referenced by" sets.
    pub fn bit(self) -> u8 {
        1 << self.index()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vertex => "vertex",
            Self::TessControl => "tess_control",
            Self::TessEvaluation => "tess_evaluation",
            Self::Geometry => "geometry",
            Self::Fragment => "fragment",
            Self::Compute => "compute",
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShaderStage {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "vertex" | "vert" => Ok(Self::Vertex),
            "tess_control" | "tesc" => Ok(Self::TessControl),
            "tess_evaluation" | "tese" => Ok(Self::TessEvaluation),
            "geometry" | "geom" => Ok(Self::Geometry),
            "fragment" | "frag" => Ok(Self::Fragment),
            "compute" | "comp" => Ok(Self::Compute),
            other => Err(format!("unknown shader stage '{other}'")),
        }
    }
}
