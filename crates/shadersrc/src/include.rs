//! Flattens GLSL sources by splicing `#include "file"` and
//! `#pragma include "file"` directives, collecting every file pulled in so the
//! caller can watch it.
//!
//! Lookup order for a directive is the including file's directory first, then
//! each configured include directory. A file is spliced at most once per
//! flattened source, which also breaks include cycles.
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, trace};

use crate::stage::ShaderStage;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Include(#[from] IncludeError),
}

#[derive(Debug, Error)]
pub enum IncludeError {
    #[error("cannot find include \"{include}\" requested by {includer} (line {line})")]
    NotFound {
        include: String,
        includer: PathBuf,
        line: usize,
    },

    #[error("malformed include directive in {includer} (line {line}): {directive}")]
    Malformed {
        directive: String,
        includer: PathBuf,
        line: usize,
    },
}

/// Fully flattened shader text plus everything it depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedSource {
    pub path: PathBuf,
    pub stage: Option<ShaderStage>,
    pub text: String,
    /// Canonical paths of every spliced file, in first-inclusion order.
    pub dependencies: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct SourceLoader {
    include_dirs: Vec<PathBuf>,
}

impl SourceLoader {
    pub fn new(include_dirs: Vec<PathBuf>) -> Self {
        Self { include_dirs }
    }

    pub fn include_dirs(&self) -> &[PathBuf] {
        &self.include_dirs
    }

    /// Loads `path`, resolving includes. `stage` overrides extension-based detection.
    pub fn load(&self, path: &Path, stage: Option<ShaderStage>) -> Result<LoadedSource, SourceError> {
        let root = canonical(path);
        let mut state = FlattenState {
            seen: HashSet::from([root.clone()]),
            dependencies: Vec::new(),
            output: String::new(),
        };
        let text = read(&root)?;
        self.flatten(&root, &text, true, &mut state)?;

        let stage = stage.or_else(|| ShaderStage::from_path(path));
        debug!(
            path = %root.display(),
            stage = ?stage,
            dependencies = state.dependencies.len(),
            "loaded shader source"
        );
        Ok(LoadedSource {
            path: root,
            stage,
            text: state.output,
            dependencies: state.dependencies,
        })
    }

    fn flatten(
        &self,
        file: &Path,
        text: &str,
        is_root: bool,
        state: &mut FlattenState,
    ) -> Result<(), SourceError> {
        for (index, line) in text.lines().enumerate() {
            let line_number = index + 1;
            let trimmed = line.trim_start();

            if !is_root && trimmed.starts_with("#version") {
                trace!(file = %file.display(), "dropping #version from included file");
                continue;
            }

            let Some(target) = parse_directive(trimmed, file, line_number)? else {
                state.output.push_str(line);
                state.output.push('\n');
                continue;
            };

            let resolved = self.locate(&target, file).ok_or_else(|| IncludeError::NotFound {
                include: target.clone(),
                includer: file.to_path_buf(),
                line: line_number,
            })?;

            if !state.seen.insert(resolved.clone()) {
                trace!(include = %resolved.display(), "include already spliced; skipping");
                continue;
            }
            state.dependencies.push(resolved.clone());

            let included = read(&resolved)?;
            state.output.push_str("#line 1\n");
            self.flatten(&resolved, &included, false, state)?;
            state.output.push_str(&format!("#line {}\n", line_number + 1));
        }
        Ok(())
    }

    fn locate(&self, target: &str, includer: &Path) -> Option<PathBuf> {
        let local = includer.parent().map(|dir| dir.join(target));
        local
            .into_iter()
            .chain(self.include_dirs.iter().map(|dir| dir.join(target)))
            .find(|candidate| candidate.is_file())
            .map(|found| canonical(&found))
    }
}

struct FlattenState {
    seen: HashSet<PathBuf>,
    dependencies: Vec<PathBuf>,
    output: String,
}

/// Returns the include target when `line` is an include directive.
fn parse_directive(
    line: &str,
    includer: &Path,
    line_number: usize,
) -> Result<Option<String>, IncludeError> {
    let rest = if let Some(rest) = line.strip_prefix("#include") {
        rest
    } else if let Some(rest) = line.strip_prefix("#pragma") {
        match rest.trim_start().strip_prefix("include") {
            Some(rest) => rest,
            None => return Ok(None),
        }
    } else {
        return Ok(None);
    };

    let malformed = || IncludeError::Malformed {
        directive: line.trim().to_string(),
        includer: includer.to_path_buf(),
        line: line_number,
    };

    let rest = rest.trim();
    let (open, close) = match rest.chars().next() {
        Some('"') => ('"', '"'),
        Some('<') => ('<', '>'),
        Some('(') => ('(', ')'),
        _ => return Err(malformed()),
    };
    let inner = rest.strip_prefix(open).ok_or_else(malformed)?;
    let end = inner.find(close).ok_or_else(malformed)?;
    let target = inner[..end].trim().trim_matches('"');
    if target.is_empty() {
        return Err(malformed());
    }
    Ok(Some(target.to_string()))
}

fn read(path: &Path) -> Result<String, SourceError> {
    fs::read_to_string(path).map_err(|source| SourceError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn splices_relative_include() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "common.glsl", "float helper() { return 1.0; }\n");
        let main = write(
            dir.path(),
            "scene.frag",
            "#version 450\n#include \"common.glsl\"\nvoid main() {}\n",
        );

        let loaded = SourceLoader::default().load(&main, None).unwrap();
        assert_eq!(loaded.stage, Some(ShaderStage::Fragment));
        assert!(loaded.text.starts_with("#version 450\n#line 1\nfloat helper()"));
        assert!(loaded.text.contains("#line 3\nvoid main() {}"));
        assert_eq!(loaded.dependencies.len(), 1);
        assert!(loaded.dependencies[0].ends_with("common.glsl"));
    }

    #[test]
    fn falls_back_to_include_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let lib = dir.path().join("lib");
        write(&lib, "noise.glsl", "float noise() { return 0.5; }\n");
        let main = write(
            dir.path(),
            "shaders/a.frag",
            "#pragma include \"noise.glsl\"\nvoid main() {}\n",
        );

        let loader = SourceLoader::new(vec![lib]);
        let loaded = loader.load(&main, None).unwrap();
        assert!(loaded.text.contains("float noise()"));
    }

    #[test]
    fn nested_includes_are_all_dependencies() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.glsl", "#include \"b.glsl\"\nfloat a;\n");
        write(dir.path(), "b.glsl", "#version 450\nfloat b;\n");
        let main = write(dir.path(), "m.vert", "#include <a.glsl>\n");

        let loaded = SourceLoader::default().load(&main, None).unwrap();
        let names: Vec<_> = loaded
            .dependencies
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.glsl", "b.glsl"]);
        assert!(!loaded.text.contains("#version"));
        assert!(loaded.text.find("float b;").unwrap() < loaded.text.find("float a;").unwrap());
    }

    #[test]
    fn cycles_are_spliced_once() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "x.glsl", "#include \"y.glsl\"\nfloat x;\n");
        write(dir.path(), "y.glsl", "#include \"x.glsl\"\nfloat y;\n");
        let main = write(dir.path(), "m.frag", "#include \"x.glsl\"\n#include \"y.glsl\"\n");

        let loaded = SourceLoader::default().load(&main, None).unwrap();
        assert_eq!(loaded.text.matches("float x;").count(), 1);
        assert_eq!(loaded.text.matches("float y;").count(), 1);
    }

    #[test]
    fn missing_include_names_includer() {
        let dir = tempfile::tempdir().unwrap();
        let main = write(dir.path(), "m.frag", "void f();\n#include \"missing.glsl\"\n");

        let err = SourceLoader::default().load(&main, None).unwrap_err();
        match err {
            SourceError::Include(IncludeError::NotFound {
                include,
                includer,
                line,
            }) => {
                assert_eq!(include, "missing.glsl");
                assert!(includer.ends_with("m.frag"));
                assert_eq!(line, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn malformed_directive_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let main = write(dir.path(), "m.frag", "#include missing.glsl\n");
        let err = SourceLoader::default().load(&main, None).unwrap_err();
        assert!(matches!(
            err,
            SourceError::Include(IncludeError::Malformed { .. })
        ));
    }

    #[test]
    fn other_pragmas_pass_through() {
        let dir = tempfile::tempdir().unwrap();
        let main = write(dir.path(), "m.frag", "#pragma optimize(off)\n");
        let loaded = SourceLoader::default().load(&main, None).unwrap();
        assert_eq!(loaded.text, "#pragma optimize(off)\n");
        assert!(loaded.dependencies.is_empty());
    }

    #[test]
    fn explicit_stage_overrides_extension() {
        let dir = tempfile::tempdir().unwrap();
        let main = write(dir.path(), "sky.glsl", "void main() {}\n");
        let loaded = SourceLoader::default()
            .load(&main, Some(ShaderStage::Fragment))
            .unwrap();
        assert_eq!(loaded.stage, Some(ShaderStage::Fragment));

        let unknown = SourceLoader::default().load(&main, None).unwrap();
        assert_eq!(unknown.stage, None);
    }

    #[test]
    fn missing_root_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SourceLoader::default()
            .load(&dir.path().join("none.frag"), None)
            .unwrap_err();
        assert!(matches!(err, SourceError::Io { .. }));
    }
}
