use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Broad classification used to pick the import routine for a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FileKind {
    Shader,
    Image,
    Geometry,
    /// A file pulled in by another file (for example a GLSL `#include`).
    Dependency,
}

const SHADER_EXTENSIONS: [&str; 12] = [
    "vert", "vs", "frag", "fs", "geom", "gs", "tesc", "tese", "comp", "cs", "vsh", "fsh",
];
const IMAGE_EXTENSIONS: [&str; 7] = ["png", "jpg", "jpeg", "bmp", "gif", "tga", "hdr"];
const DEPENDENCY_EXTENSIONS: [&str; 4] = ["glsl", "inc", "h", "glslinc"];

impl FileKind {
    /// Guesses the kind from the file name. Geometry documents use the
    /// double extension `.mesh.json`.
    pub fn infer(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        if name.ends_with(".mesh.json") {
            return Some(Self::Geometry);
        }
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        let ext = ext.as_str();
        if SHADER_EXTENSIONS.contains(&ext) {
            Some(Self::Shader)
        } else if IMAGE_EXTENSIONS.contains(&ext) {
            Some(Self::Image)
        } else if DEPENDENCY_EXTENSIONS.contains(&ext) {
            Some(Self::Dependency)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shader => "shader",
            Self::Image => "image",
            Self::Geometry => "geometry",
            Self::Dependency => "dependency",
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity plus modification snapshot of one watched file.
///
/// Equality, ordering and hashing only consider `(path, tag)`; the stored
/// timestamp and kind are attributes, not identity.
#[derive(Debug, Clone)]
pub struct TrackedFile {
    path: PathBuf,
    tag: String,
    kind: FileKind,
    modified: SystemTime,
}

impl TrackedFile {
    pub fn new(
        path: impl Into<PathBuf>,
        tag: impl Into<String>,
        kind: FileKind,
        modified: SystemTime,
    ) -> Self {
        Self {
            path: path.into(),
            tag: tag.into(),
            kind,
            modified,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    pub fn modified(&self) -> SystemTime {
        self.modified
    }

    pub fn key(&self) -> (PathBuf, String) {
        (self.path.clone(), self.tag.clone())
    }

    pub(crate) fn set_modified(&mut self, modified: SystemTime) {
        self.modified = modified;
    }

    pub fn is(&self, path: &Path, tag: &str) -> bool {
        self.path == path && self.tag == tag
    }
}

impl PartialEq for TrackedFile {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path && self.tag == other.tag
    }
}

impl Eq for TrackedFile {}

impl Hash for TrackedFile {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
        self.tag.hash(state);
    }
}

impl PartialOrd for TrackedFile {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TrackedFile {
    fn cmp(&self, other: &Self) -> Ordering {
        self.path
            .cmp(&other.path)
            .then_with(|| self.tag.cmp(&other.tag))
    }
}

impl fmt::Display for TrackedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.path.display(), self.tag)
    }
}
