//! CPU-side geometry and the loader seam used by the sandbox.
//!
//! Meshes are a list of named attribute streams. At draw time each stream is
//! matched by name against the vertex program's reflected inputs, so a mesh
//! can carry more (or fewer) attributes than any given shader consumes.
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GeometryError {
    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse mesh document {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid mesh: {0}")]
    Invalid(String),
    #[error("no geometry loader handles {0}")]
    Unsupported(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeData {
    Float(Vec<f32>),
    Int(Vec<i32>),
    Uint(Vec<u32>),
}

impl AttributeData {
    pub fn len(&self) -> usize {
        match self {
            Self::Float(values) => values.len(),
            Self::Int(values) => values.len(),
            Self::Uint(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Float(values) => bytemuck::cast_slice(values),
            Self::Int(values) => bytemuck::cast_slice(values),
            Self::Uint(values) => bytemuck::cast_slice(values),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeStream {
    pub name: String,
    pub components: u8,
    pub data: AttributeData,
}

impl AttributeStream {
    pub fn new(name: impl Into<String>, components: u8, data: AttributeData) -> Self {
        Self {
            name: name.into(),
            components,
            data,
        }
    }

    pub fn vertex_count(&self) -> usize {
        match self.components {
            0 => 0,
            n => self.data.len() / n as usize,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshData {
    pub attributes: Vec<AttributeStream>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indices: Option<Vec<u32>>,
}

impl MeshData {
    pub fn vertex_count(&self) -> usize {
        self.attributes
            .first()
            .map_or(0, AttributeStream::vertex_count)
    }

    /// Number of vertices a draw submits: the index count when indexed.
    pub fn element_count(&self) -> usize {
        self.indices
            .as_ref()
            .map_or_else(|| self.vertex_count(), Vec::len)
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeStream> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn validate(&self) -> Result<(), GeometryError> {
        let Some(first) = self.attributes.first() else {
            return Err(GeometryError::Invalid("mesh has no attributes".into()));
        };
        let vertices = first.vertex_count();
        let mut seen = HashSet::new();
        for stream in &self.attributes {
            if !(1..=4).contains(&stream.components) {
                return Err(GeometryError::Invalid(format!(
                    "attribute '{}' has {} components; expected 1 to 4",
                    stream.name, stream.components
                )));
            }
            if stream.data.len() % stream.components as usize != 0 {
                return Err(GeometryError::Invalid(format!(
                    "attribute '{}' length {} is not a multiple of {}",
                    stream.name,
                    stream.data.len(),
                    stream.components
                )));
            }
            if stream.vertex_count() != vertices {
                return Err(GeometryError::Invalid(format!(
                    "attribute '{}' has {} vertices but '{}' has {vertices}",
                    stream.name,
                    stream.vertex_count(),
                    first.name
                )));
            }
            if !seen.insert(stream.name.as_str()) {
                return Err(GeometryError::Invalid(format!(
                    "attribute '{}' appears twice",
                    stream.name
                )));
            }
        }
        if let Some(bad) = self
            .indices
            .iter()
            .flatten()
            .find(|&&index| index as usize >= vertices)
        {
            return Err(GeometryError::Invalid(format!(
                "index {bad} out of range for {vertices} vertices"
            )));
        }
        Ok(())
    }
}

/// Turns a geometry file into [`MeshData`].
pub trait GeometryLoader {
    fn can_load(&self, path: &Path) -> bool;
    fn load(&self, path: &Path) -> Result<MeshData, GeometryError>;
}

/// Loads `*.mesh.json` documents:
///
/// ```json
/// { "attributes": [ { "name": "position", "components": 3, "data": { "float": [0, 0, 0] } } ],
///   "indices": [0] }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMeshLoader;

impl GeometryLoader for JsonMeshLoader {
    fn can_load(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(".mesh.json"))
    }

    fn load(&self, path: &Path) -> Result<MeshData, GeometryError> {
        let text = fs::read_to_string(path).map_err(|source| GeometryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mesh: MeshData = serde_json::from_str(&text).map_err(|source| GeometryError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        mesh.validate()?;
        Ok(mesh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn triangle() -> MeshData {
        MeshData {
            attributes: vec![
                AttributeStream::new(
                    "position",
                    3,
                    AttributeData::Float(vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0]),
                ),
                AttributeStream::new("uv", 2, AttributeData::Float(vec![0.0; 6])),
            ],
            indices: Some(vec![0, 1, 2]),
        }
    }

    #[test]
    fn counts_vertices_and_elements() {
        let mesh = triangle();
        assert!(mesh.validate().is_ok());
        assert_eq!(mesh.vertex_count(), 3);
        assert_eq!(mesh.element_count(), 3);
        assert_eq!(mesh.attribute("uv").map(|a| a.components), Some(2));
        assert_eq!(mesh.attributes[0].data.as_bytes().len(), 36);
    }

    #[test]
    fn rejects_mismatched_streams() {
        let mut mesh = triangle();
        mesh.attributes[1].data = AttributeData::Float(vec![0.0; 4]);
        let err = mesh.validate().unwrap_err();
        assert!(err.to_string().contains("uv"));

        let mut mesh = triangle();
        mesh.indices = Some(vec![0, 1, 3]);
        assert!(mesh.validate().is_err());
    }

    #[test]
    fn loads_json_documents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tri.mesh.json");
        let mut file = fs::File::create(&path).unwrap();
        write!(
            file,
            r#"{{"attributes":[{{"name":"position","components":2,"data":{{"float":[0,0,1,0,0,1]}}}}]}}"#
        )
        .unwrap();

        let loader = JsonMeshLoader;
        assert!(loader.can_load(&path));
        assert!(!loader.can_load(Path::new("tri.obj")));
        let mesh = loader.load(&path).unwrap();
        assert_eq!(mesh.vertex_count(), 3);
        assert!(mesh.indices.is_none());
    }

    #[test]
    fn parse_errors_name_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.mesh.json");
        fs::write(&path, "{ not json").unwrap();
        let err = JsonMeshLoader.load(&path).unwrap_err();
        assert!(matches!(err, GeometryError::Parse { .. }));
        assert!(err.to_string().contains("bad.mesh.json"));
    }
}
