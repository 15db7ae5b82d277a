//! Content-addressed shader compilation.
//!
//! The cache key is the exact `(stage, text)` pair, so an edited file always
//! produces a new entry and unchanged text is compiled at most once. Entries
//! hold an `Rc` to the compiled shader; programs hold further clones. A shader
//! object is deleted only once the cache and every program have let go of it.
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use shadersrc::ShaderStage;
use thiserror::Error;
use tracing::{debug, error};

use crate::api::{ApiError, GraphicsApi, Graveyard, ShaderId};

/// Source text for one stage. Equal iff stage and text are byte-identical.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderSource {
    stage: Option<ShaderStage>,
    text: Rc<str>,
}

impl ShaderSource {
    pub fn new(stage: Option<ShaderStage>, text: impl Into<Rc<str>>) -> Self {
        Self {
            stage,
            text: text.into(),
        }
    }

    pub fn stage(&self) -> Option<ShaderStage> {
        self.stage
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("cannot determine the shader stage of the source")]
    ShaderTypeUnknown,
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// A shader object plus its compile status and info log.
pub struct CompiledShader {
    id: ShaderId,
    stage: ShaderStage,
    compiled: bool,
    info_log: String,
    graveyard: Graveyard,
}

impl CompiledShader {
    pub fn id(&self) -> ShaderId {
        self.id
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    /// False when compilation failed; such shaders must not be attached.
    pub fn is_compiled(&self) -> bool {
        self.compiled
    }

    pub fn info_log(&self) -> &str {
        &self.info_log
    }
}

impl fmt::Debug for CompiledShader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledShader")
            .field("id", &self.id)
            .field("stage", &self.stage)
            .field("compiled", &self.compiled)
            .finish()
    }
}

impl Drop for CompiledShader {
    fn drop(&mut self) {
        self.graveyard.bury_shader(self.id);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompilerStats {
    pub hits: u64,
    pub misses: u64,
    pub failures: u64,
    pub entries: usize,
}

#[derive(Debug, Default)]
pub struct ShaderCompiler {
    cache: HashMap<ShaderSource, Rc<CompiledShader>>,
    graveyard: Graveyard,
    hits: u64,
    misses: u64,
    failures: u64,
}

impl ShaderCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deletion queue shared with programs linked from this compiler's shaders.
    pub fn graveyard(&self) -> &Graveyard {
        &self.graveyard
    }

    /// Returns the cached shader for `source`, compiling it on a miss. With
    /// `force` any cached entry is evicted first and the source recompiled.
    ///
    /// A failed compile is not an error: the returned shader reports
    /// `is_compiled() == false` and carries the info log.
    pub fn compile<A: GraphicsApi + ?Sized>(
        &mut self,
        api: &mut A,
        source: &ShaderSource,
        force: bool,
    ) -> Result<Rc<CompiledShader>, CompileError> {
        if force {
            self.evict(source);
        } else if let Some(shader) = self.cache.get(source) {
            self.hits += 1;
            debug!(stage = %shader.stage, id = %shader.id, "shader cache hit");
            return Ok(Rc::clone(shader));
        }

        let Some(stage) = source.stage else {
            error!("refusing to compile shader with unknown stage");
            return Err(CompileError::ShaderTypeUnknown);
        };

        self.misses += 1;
        let id = api.create_shader(stage)?;
        let compiled = api.compile_shader(id, source.text());
        let info_log = api.shader_info_log(id);
        if compiled {
            debug!(%stage, %id, "compiled shader");
        } else {
            self.failures += 1;
            error!(%stage, %id, "shader compilation failed:\n{info_log}");
        }

        let shader = Rc::new(CompiledShader {
            id,
            stage,
            compiled,
            info_log,
            graveyard: self.graveyard.clone(),
        });
        self.cache.insert(source.clone(), Rc::clone(&shader));
        Ok(shader)
    }

    /// Drops the cache entry for `source`; programs still using it keep it alive.
    pub fn evict(&mut self, source: &ShaderSource) -> bool {
        self.cache.remove(source).is_some()
    }

    /// Drops entries nothing but the cache references. Returns how many went.
    pub fn purge_unused(&mut self) -> usize {
        let before = self.cache.len();
        self.cache.retain(|_, shader| Rc::strong_count(shader) > 1);
        before - self.cache.len()
    }

    /// Deletes API objects for every shader and program released so far.
    pub fn collect_garbage<A: GraphicsApi + ?Sized>(&self, api: &mut A) -> usize {
        self.graveyard.collect(api)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn stats(&self) -> CompilerStats {
        CompilerStats {
            hits: self.hits,
            misses: self.misses,
            failures: self.failures,
            entries: self.cache.len(),
        }
    }
}
