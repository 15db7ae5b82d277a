//! Hot-reload orchestration.
//!
//! Each frame the sandbox drains the file watcher, re-imports whatever
//! changed, validates the pipeline of every tag and draws the valid ones with
//! the per-frame uniforms their programs declare. A shader that fails to
//! compile or link leaves its slot `Failed` but keeps the last good program
//! bound, so a bad edit never blanks the output.
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use filewatch::{FileKind, FileWatcher, TrackedFile};
use serde::Serialize;
use shadersrc::{ShaderStage, SourceError, SourceLoader};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::api::{ApiError, Geometry, GraphicsApi, MeshId, PassKind, TextureData};
use crate::builtin::{self, BACKGROUND_TAG};
use crate::compiler::{CompileError, ShaderCompiler, ShaderSource};
use crate::frame::{FrameUniforms, SceneSettings, SystemTimeSource, TimeSource};
use crate::introspect::IntrospectionReport;
use crate::mesh::{GeometryError, GeometryLoader, JsonMeshLoader};
use crate::program::{LinkError, Program, ProgramPipeline};

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("cannot tell what kind of file {0} is")]
    UnknownKind(PathBuf),
    #[error("cannot determine the shader stage of {0}")]
    UnknownStage(PathBuf),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error("failed to decode image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Lifecycle of one `(tag, stage)` slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SlotState {
    Empty,
    Compiling,
    Linked,
    Failed,
}

struct StageSlot {
    path: PathBuf,
    state: SlotState,
    program: Option<Program>,
    last_error: Option<String>,
}

impl StageSlot {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            state: SlotState::Empty,
            program: None,
            last_error: None,
        }
    }
}

/// Read-only view of a slot for status output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotInfo {
    pub tag: String,
    pub stage: ShaderStage,
    pub path: PathBuf,
    pub state: SlotState,
    pub program: Option<u32>,
    pub last_error: Option<String>,
    /// Why the tag's pipeline was skipped, while it still is.
    pub pipeline_error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub frame: u64,
    pub imported: usize,
    pub failed_imports: usize,
    pub pipelines_drawn: usize,
    pub pipelines_skipped: usize,
    pub draws: usize,
}

pub struct SandboxOptions {
    pub include_dirs: Vec<PathBuf>,
    pub scene: SceneSettings,
    pub clear_color: [f64; 4],
    pub time: Box<dyn TimeSource>,
    pub geometry: Box<dyn GeometryLoader>,
}

impl Default for SandboxOptions {
    fn default() -> Self {
        Self {
            include_dirs: Vec::new(),
            scene: SceneSettings::default(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            time: Box::new(SystemTimeSource::new()),
            geometry: Box::new(JsonMeshLoader),
        }
    }
}

type FileKey = (PathBuf, String);

pub struct Sandbox<A: GraphicsApi> {
    api: A,
    watcher: FileWatcher,
    compiler: ShaderCompiler,
    loader: SourceLoader,
    geometry: Box<dyn GeometryLoader>,
    time: Box<dyn TimeSource>,
    scene: SceneSettings,
    clear_color: [f64; 4],
    slots: BTreeMap<(String, ShaderStage), StageSlot>,
    stage_overrides: HashMap<FileKey, ShaderStage>,
    /// Dependency path to the shader files that include it.
    dependents: BTreeMap<PathBuf, BTreeSet<FileKey>>,
    /// Includes the sandbox started watching itself, as opposed to files
    /// watched through `watch_file`.
    dependency_watches: BTreeSet<FileKey>,
    meshes: BTreeMap<FileKey, MeshId>,
    builtin_vertex: Option<Program>,
    /// Current pipeline failure per tag; each distinct one is logged once.
    pipeline_errors: HashMap<String, String>,
    frame_index: u64,
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

impl<A: GraphicsApi> Sandbox<A> {
    pub fn new(api: A, watcher: FileWatcher, compiler: ShaderCompiler, options: SandboxOptions) -> Self {
        Self {
            api,
            watcher,
            compiler,
            loader: SourceLoader::new(options.include_dirs),
            geometry: options.geometry,
            time: options.time,
            scene: options.scene,
            clear_color: options.clear_color,
            slots: BTreeMap::new(),
            stage_overrides: HashMap::new(),
            dependents: BTreeMap::new(),
            dependency_watches: BTreeSet::new(),
            meshes: BTreeMap::new(),
            builtin_vertex: None,
            pipeline_errors: HashMap::new(),
            frame_index: 0,
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn api_mut(&mut self) -> &mut A {
        &mut self.api
    }

    pub fn watcher(&self) -> &FileWatcher {
        &self.watcher
    }

    pub fn compiler(&self) -> &ShaderCompiler {
        &self.compiler
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    /// Starts watching `path` under `tag` and imports it right away. `kind`
    /// defaults to the one inferred from the file name; `stage` overrides
    /// extension-based stage detection for shaders.
    pub fn watch_file(
        &mut self,
        path: &Path,
        kind: Option<FileKind>,
        tag: &str,
        stage: Option<ShaderStage>,
    ) -> Result<(), ImportError> {
        let kind = kind
            .or_else(|| FileKind::infer(path))
            .ok_or_else(|| ImportError::UnknownKind(path.to_path_buf()))?;
        let path = canonical(path);
        let key = (path.clone(), tag.to_string());
        if self.dependency_watches.remove(&key) {
            if kind == FileKind::Dependency {
                debug!(path = %path.display(), tag, "include is now watched explicitly");
                return Ok(());
            }
            self.watcher.unwatch(&path, tag);
        }
        if !self.watcher.watch(&path, kind, tag) {
            return Ok(());
        }
        if let Some(stage) = stage {
            self.stage_overrides.insert(key, stage);
        }
        self.import(&path, tag, kind)
    }

    /// Stops watching `(path, tag)` and drops whatever was imported from it.
    pub fn unwatch_file(&mut self, path: &Path, tag: &str) -> bool {
        let path = canonical(path);
        if !self.watcher.unwatch(&path, tag) {
            return false;
        }
        let key = (path.clone(), tag.to_string());
        self.stage_overrides.remove(&key);
        self.dependency_watches.remove(&key);
        self.slots
            .retain(|(slot_tag, _), slot| !(slot_tag == tag && slot.path == path));
        if let Some(mesh) = self.meshes.remove(&key) {
            self.api.delete_mesh(mesh);
        }
        self.release_dependencies(&key, &BTreeSet::new());
        self.compiler.purge_unused();
        true
    }

    /// Re-imports every watched file regardless of modification times.
    /// Returns how many imports failed.
    pub fn reload_all(&mut self) -> usize {
        let files = self.watcher.tracked_files();
        let failed = files
            .iter()
            .filter(|file| file.kind() != FileKind::Dependency)
            .filter(|file| {
                self.import(file.path(), file.tag(), file.kind())
                    .map_err(|err| {
                        error!(path = %file.path().display(), tag = file.tag(), "reload failed: {err}")
                    })
                    .is_err()
            })
            .count();
        info!(files = files.len(), failed, "reloaded all watched files");
        failed
    }

    pub fn slot_states(&self) -> Vec<SlotInfo> {
        self.slots
            .iter()
            .map(|((tag, stage), slot)| SlotInfo {
                tag: tag.clone(),
                stage: *stage,
                path: slot.path.clone(),
                state: slot.state,
                program: slot.program.as_ref().map(|p| p.id().0),
                last_error: slot.last_error.clone(),
                pipeline_error: self.pipeline_errors.get(tag).cloned(),
            })
            .collect()
    }

    /// Reflection of the program currently bound in `(tag, stage)`.
    pub fn introspection_report(
        &mut self,
        tag: &str,
        stage: ShaderStage,
    ) -> Option<IntrospectionReport> {
        let slot = self.slots.get_mut(&(tag.to_string(), stage))?;
        let program = slot.program.as_mut()?;
        Some(program.introspector().summary(&self.api))
    }

    /// Runs one drain → import → render cycle.
    pub fn frame(&mut self) -> FrameStats {
        let mut stats = FrameStats {
            frame: self.frame_index,
            ..FrameStats::default()
        };
        let updated = self.watcher.drain_updated();
        if !updated.is_empty() {
            let (imported, failed) = self.import_updated(updated);
            stats.imported = imported;
            stats.failed_imports = failed;
        }
        self.compiler.collect_garbage(&mut self.api);

        let time = self.time.sample();
        let uniforms = FrameUniforms::new(&self.scene, time, self.api.surface_size());
        self.api.begin_frame(self.clear_color);
        for tag in self.pipeline_tags() {
            let pipeline = match self.assemble(&tag) {
                Ok(Some(pipeline)) => pipeline,
                Ok(None) => continue,
                Err(err) => {
                    self.report_pipeline_error(&tag, err);
                    stats.pipelines_skipped += 1;
                    continue;
                }
            };
            let targets = self.draw_targets(&tag);
            let checks = if targets.is_empty() {
                vec![(Geometry::FullscreenTriangle, PassKind::Scene)]
            } else {
                targets.clone()
            };
            let validated = checks
                .iter()
                .try_for_each(|&(geometry, pass)| self.api.validate_pipeline(&pipeline, geometry, pass));
            if let Err(err) = validated {
                self.report_pipeline_error(&tag, err);
                stats.pipelines_skipped += 1;
                continue;
            }

            self.apply_uniforms(&tag, &uniforms);
            let mut failure = None;
            for (geometry, pass) in targets {
                match self.api.draw(&pipeline, geometry, pass) {
                    Ok(()) => stats.draws += 1,
                    Err(err) => {
                        failure.get_or_insert(err);
                    }
                }
            }
            match failure {
                Some(err) => {
                    self.report_pipeline_error(&tag, err);
                    stats.pipelines_skipped += 1;
                }
                None => {
                    self.pipeline_errors.remove(&tag);
                    stats.pipelines_drawn += 1;
                }
            }
        }
        self.api.end_frame();
        self.frame_index += 1;
        stats
    }

    fn import_updated(&mut self, updated: BTreeSet<TrackedFile>) -> (usize, usize) {
        let mut shaders: BTreeSet<FileKey> = BTreeSet::new();
        let mut others = Vec::new();
        for file in updated {
            match file.kind() {
                FileKind::Shader => {
                    shaders.insert(file.key());
                }
                FileKind::Dependency => {
                    let affected = self.dependents.get(file.path()).cloned().unwrap_or_default();
                    debug!(
                        path = %file.path().display(),
                        shaders = affected.len(),
                        "dependency changed"
                    );
                    shaders.extend(affected);
                }
                kind => others.push((file.key(), kind)),
            }
        }

        let mut imported = 0;
        let mut failed = 0;
        let jobs = shaders
            .into_iter()
            .map(|key| (key, FileKind::Shader))
            .chain(others);
        for ((path, tag), kind) in jobs {
            match self.import(&path, &tag, kind) {
                Ok(()) => imported += 1,
                Err(err) => {
                    failed += 1;
                    error!(path = %path.display(), tag = %tag, %kind, "import failed: {err}");
                }
            }
        }
        (imported, failed)
    }

    fn import(&mut self, path: &Path, tag: &str, kind: FileKind) -> Result<(), ImportError> {
        match kind {
            FileKind::Shader => self.import_shader(path, tag),
            FileKind::Geometry => self.import_geometry(path, tag),
            FileKind::Image => self.import_image(path, tag),
            FileKind::Dependency => {
                let key = (path.to_path_buf(), tag.to_string());
                let affected: Vec<FileKey> = self
                    .dependents
                    .iter()
                    .filter(|(dependency, _)| dependency.as_path() == path)
                    .flat_map(|(_, shaders)| shaders.iter().cloned())
                    .filter(|shader| shader.1 == key.1)
                    .collect();
                for (shader, shader_tag) in affected {
                    self.import_shader(&shader, &shader_tag)?;
                }
                Ok(())
            }
        }
    }

    fn import_shader(&mut self, path: &Path, tag: &str) -> Result<(), ImportError> {
        let key = (path.to_path_buf(), tag.to_string());
        let stage = self
            .stage_overrides
            .get(&key)
            .copied()
            .or_else(|| ShaderStage::from_path(path))
            .ok_or_else(|| ImportError::UnknownStage(path.to_path_buf()))?;
        let slot_key = (tag.to_string(), stage);
        let slot = self
            .slots
            .entry(slot_key.clone())
            .or_insert_with(|| StageSlot::new(path.to_path_buf()));
        slot.path = path.to_path_buf();
        slot.state = SlotState::Compiling;

        let result = self.build_program(&key, stage);
        let Some(slot) = self.slots.get_mut(&slot_key) else {
            return Ok(());
        };
        match result {
            Ok(program) => {
                info!(tag, %stage, program = %program.id(), "shader reloaded");
                // The old program goes to the graveyard; its introspector with it.
                slot.program = Some(program);
                slot.state = SlotState::Linked;
                slot.last_error = None;
                self.pipeline_errors.remove(tag);
                self.compiler.purge_unused();
                Ok(())
            }
            Err(err) => {
                slot.state = SlotState::Failed;
                slot.last_error = Some(err.to_string());
                if slot.program.is_some() {
                    warn!(tag, %stage, "keeping the previous program until the shader is fixed");
                }
                Err(err)
            }
        }
    }

    fn build_program(&mut self, key: &FileKey, stage: ShaderStage) -> Result<Program, ImportError> {
        let loaded = self.loader.load(&key.0, Some(stage))?;
        self.track_dependencies(key, &loaded.dependencies);
        let source = ShaderSource::new(Some(stage), loaded.text);
        let shader = self.compiler.compile(&mut self.api, &source, false)?;
        let program = Program::link(&mut self.api, self.compiler.graveyard(), &[shader], true)?;
        Ok(program)
    }

    fn track_dependencies(&mut self, shader: &FileKey, dependencies: &[PathBuf]) {
        let current: BTreeSet<PathBuf> = dependencies.iter().map(|d| canonical(d)).collect();
        self.release_dependencies(shader, &current);
        let tag = &shader.1;
        for dependency in current {
            self.dependents
                .entry(dependency.clone())
                .or_default()
                .insert(shader.clone());
            if !self.watcher.is_tracked(&dependency, tag)
                && self.watcher.watch(&dependency, FileKind::Dependency, tag)
            {
                self.dependency_watches.insert((dependency, tag.clone()));
            }
        }
    }

    /// Drops `shader` from the dependents of every include not in `keep`.
    /// An include nothing under the tag uses any more is unwatched, unless
    /// it was watched explicitly.
    fn release_dependencies(&mut self, shader: &FileKey, keep: &BTreeSet<PathBuf>) {
        let tag = &shader.1;
        let mut orphaned = Vec::new();
        for (dependency, shaders) in self.dependents.iter_mut() {
            if keep.contains(dependency) {
                continue;
            }
            if shaders.remove(shader) && !shaders.iter().any(|(_, t)| t == tag) {
                orphaned.push(dependency.clone());
            }
        }
        self.dependents.retain(|_, shaders| !shaders.is_empty());
        for dependency in orphaned {
            let key = (dependency, tag.clone());
            if self.dependency_watches.remove(&key) && self.watcher.is_tracked(&key.0, tag) {
                self.watcher.unwatch(&key.0, tag);
            }
        }
    }

    fn import_geometry(&mut self, path: &Path, tag: &str) -> Result<(), ImportError> {
        let mesh = self.geometry.load(path)?;
        let id = self.api.upload_mesh(&mesh)?;
        info!(
            path = %path.display(),
            tag,
            vertices = mesh.vertex_count(),
            attributes = mesh.attributes.len(),
            "geometry imported"
        );
        if let Some(previous) = self.meshes.insert((path.to_path_buf(), tag.to_string()), id) {
            self.api.delete_mesh(previous);
        }
        Ok(())
    }

    fn import_image(&mut self, path: &Path, tag: &str) -> Result<(), ImportError> {
        let mut image = image::open(path)
            .map_err(|source| ImportError::Image {
                path: path.to_path_buf(),
                source,
            })?
            .to_rgba8();
        image::imageops::flip_vertical_in_place(&mut image);
        let (width, height) = image.dimensions();
        let texture = TextureData {
            width,
            height,
            rgba: image.into_raw(),
        };
        self.api.upload_texture(tag, &texture)?;
        info!(path = %path.display(), texture = tag, width, height, "image imported");
        Ok(())
    }

    /// Tags with at least one shader slot, background first.
    fn pipeline_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self
            .slots
            .keys()
            .map(|(tag, _)| tag.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        tags.sort_by_key(|tag| tag != BACKGROUND_TAG);
        tags
    }

    fn assemble(&mut self, tag: &str) -> Result<Option<ProgramPipeline>, String> {
        let mut pipeline = ProgramPipeline::new();
        for ((slot_tag, _), slot) in &self.slots {
            if slot_tag != tag {
                continue;
            }
            if let Some(program) = &slot.program {
                pipeline.use_program_stages(program);
            }
        }
        if pipeline.is_empty() {
            return Ok(None);
        }
        if tag == BACKGROUND_TAG && pipeline.program(ShaderStage::Vertex).is_none() {
            let vertex = self.builtin_vertex()?;
            pipeline.use_program_stages(vertex);
        }
        Ok(Some(pipeline))
    }

    fn builtin_vertex(&mut self) -> Result<&Program, String> {
        let program = match self.builtin_vertex.take() {
            Some(program) => program,
            None => {
                let source = builtin::fullscreen_vertex();
                self.compiler
                    .compile(&mut self.api, &source, false)
                    .map_err(ImportError::from)
                    .and_then(|shader| {
                        Program::link(&mut self.api, self.compiler.graveyard(), &[shader], true)
                            .map_err(ImportError::from)
                    })
                    .map_err(|err| format!("built-in full-screen vertex stage is unusable: {err}"))?
            }
        };
        Ok(&*self.builtin_vertex.insert(program))
    }

    /// Logs `err` for `tag` unless it is the failure already reported.
    fn report_pipeline_error(&mut self, tag: &str, err: String) {
        if self.pipeline_errors.get(tag) != Some(&err) {
            error!(tag, "pipeline is invalid, skipping it: {err}");
            self.pipeline_errors.insert(tag.to_string(), err);
        }
    }

    fn apply_uniforms(&mut self, tag: &str, uniforms: &FrameUniforms) {
        let mut written = 0;
        for ((slot_tag, _), slot) in self.slots.iter_mut() {
            if slot_tag != tag {
                continue;
            }
            if let Some(program) = slot.program.as_mut() {
                written += uniforms.apply(program.introspector(), &mut self.api);
            }
        }
        if tag == BACKGROUND_TAG {
            if let Some(program) = self.builtin_vertex.as_mut() {
                written += uniforms.apply(program.introspector(), &mut self.api);
            }
        }
        tracing::trace!(tag, written, "applied frame uniforms");
    }

    /// Background tags draw one full-screen triangle; scene tags draw every
    /// mesh watched under the same tag.
    fn draw_targets(&self, tag: &str) -> Vec<(Geometry, PassKind)> {
        if tag == BACKGROUND_TAG {
            return vec![(Geometry::FullscreenTriangle, PassKind::Background)];
        }
        self.meshes
            .iter()
            .filter(|((_, mesh_tag), _)| mesh_tag == tag)
            .map(|(_, id)| (Geometry::Mesh(*id), PassKind::Scene))
            .collect()
    }
}
