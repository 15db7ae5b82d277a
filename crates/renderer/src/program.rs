use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use shadersrc::ShaderStage;
use thiserror::Error;
use tracing::{debug, error};

use crate::api::{GraphicsApi, Graveyard, ProgramId};
use crate::compiler::CompiledShader;
use crate::introspect::ProgramIntrospector;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("no shaders to link")]
    NoStages,
    #[error("{stage} shader did not compile:\n{log}")]
    NotCompiled { stage: ShaderStage, log: String },
    #[error("program link failed:\n{log}")]
    Failed { log: String },
}

/// A linked program object. Immutable once linked: a changed stage means a
/// new `Program` and, with it, a fresh introspector.
pub struct Program {
    id: ProgramId,
    separable: bool,
    stages: Vec<ShaderStage>,
    shaders: Vec<Rc<CompiledShader>>,
    introspector: Option<ProgramIntrospector>,
    graveyard: Graveyard,
}

impl Program {
    /// Links `shaders` into one program. Separable programs usually carry a
    /// single stage and are combined at draw time by a [`ProgramPipeline`].
    pub fn link<A: GraphicsApi + ?Sized>(
        api: &mut A,
        graveyard: &Graveyard,
        shaders: &[Rc<CompiledShader>],
        separable: bool,
    ) -> Result<Program, LinkError> {
        if shaders.is_empty() {
            return Err(LinkError::NoStages);
        }
        if let Some(bad) = shaders.iter().find(|shader| !shader.is_compiled()) {
            return Err(LinkError::NotCompiled {
                stage: bad.stage(),
                log: bad.info_log().to_string(),
            });
        }

        let id = api.create_program(separable);
        for shader in shaders {
            api.attach_shader(id, shader.id());
        }
        if !api.link_program(id) {
            let log = api.program_info_log(id);
            api.delete_program(id);
            error!(program = %id, "program link failed:\n{log}");
            return Err(LinkError::Failed { log });
        }

        let mut stages: Vec<ShaderStage> = shaders.iter().map(|s| s.stage()).collect();
        stages.sort();
        stages.dedup();
        debug!(program = %id, ?stages, separable, "linked program");
        Ok(Program {
            id,
            separable,
            stages,
            shaders: shaders.to_vec(),
            introspector: None,
            graveyard: graveyard.clone(),
        })
    }

    pub fn id(&self) -> ProgramId {
        self.id
    }

    pub fn is_separable(&self) -> bool {
        self.separable
    }

    pub fn stages(&self) -> &[ShaderStage] {
        &self.stages
    }

    pub fn has_stage(&self, stage: ShaderStage) -> bool {
        self.stages.contains(&stage)
    }

    pub fn shaders(&self) -> &[Rc<CompiledShader>] {
        &self.shaders
    }

    /// The program's introspector, created on first use.
    pub fn introspector(&mut self) -> &mut ProgramIntrospector {
        let id = self.id;
        self.introspector
            .get_or_insert_with(|| ProgramIntrospector::new(id))
    }

    pub fn has_introspector(&self) -> bool {
        self.introspector.is_some()
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("id", &self.id)
            .field("separable", &self.separable)
            .field("stages", &self.stages)
            .finish()
    }
}

impl Drop for Program {
    fn drop(&mut self) {
        self.graveyard.bury_program(self.id);
    }
}

/// Separable programs bound together for one draw, one per stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramPipeline {
    stages: BTreeMap<ShaderStage, ProgramId>,
}

impl ProgramPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds every stage `program` contains.
    pub fn use_program_stages(&mut self, program: &Program) -> &mut Self {
        for stage in program.stages() {
            self.stages.insert(*stage, program.id());
        }
        self
    }

    pub fn program(&self, stage: ShaderStage) -> Option<ProgramId> {
        self.stages.get(&stage).copied()
    }

    pub fn stages(&self) -> impl Iterator<Item = (ShaderStage, ProgramId)> + '_ {
        self.stages.iter().map(|(stage, id)| (*stage, *id))
    }

    /// Distinct programs in stage order.
    pub fn programs(&self) -> Vec<ProgramId> {
        let mut programs: Vec<ProgramId> = Vec::new();
        for id in self.stages.values() {
            if !programs.contains(id) {
                programs.push(*id);
            }
        }
        programs
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{ShaderCompiler, ShaderSource};
    use crate::fake::FakeApi;

    fn compile(
        api: &mut FakeApi,
        compiler: &mut ShaderCompiler,
        stage: ShaderStage,
        text: &str,
    ) -> Rc<CompiledShader> {
        compiler
            .compile(api, &ShaderSource::new(Some(stage), text), false)
            .unwrap()
    }

    #[test]
    fn links_separable_stage() {
        let mut api = FakeApi::default();
        let mut compiler = ShaderCompiler::new();
        let shader = compile(&mut api, &mut compiler, ShaderStage::Fragment, "void main(){}");

        let program = Program::link(&mut api, compiler.graveyard(), &[shader], true).unwrap();
        assert!(program.is_separable());
        assert_eq!(program.stages(), &[ShaderStage::Fragment]);
        assert!(!program.has_introspector());
    }

    #[test]
    fn refuses_failed_shaders() {
        let mut api = FakeApi::default();
        let mut compiler = ShaderCompiler::new();
        let shader = compile(&mut api, &mut compiler, ShaderStage::Vertex, "#error nope");
        let err = Program::link(&mut api, compiler.graveyard(), &[shader], true).unwrap_err();
        match &err {
            LinkError::NotCompiled { stage, log } => {
                assert_eq!(*stage, ShaderStage::Vertex);
                assert!(log.contains("#error nope"), "{log}");
            }
            other => panic!("unexpected link error: {other}"),
        }
        assert!(err.to_string().contains("#error nope"));
        assert_eq!(api.programs_created(), 0);
    }

    #[test]
    fn link_failure_deletes_the_program() {
        let mut api = FakeApi::default();
        let mut compiler = ShaderCompiler::new();
        let shader = compile(
            &mut api,
            &mut compiler,
            ShaderStage::Fragment,
            "// link_error\nvoid main(){}",
        );
        let err = Program::link(&mut api, compiler.graveyard(), &[shader], true).unwrap_err();
        assert!(matches!(err, LinkError::Failed { .. }));
        assert_eq!(api.live_programs(), 0);
    }

    #[test]
    fn dropped_program_is_deleted_on_collect() {
        let mut api = FakeApi::default();
        let mut compiler = ShaderCompiler::new();
        let shader = compile(&mut api, &mut compiler, ShaderStage::Fragment, "void main(){}");
        let program = Program::link(&mut api, compiler.graveyard(), &[shader], true).unwrap();
        assert_eq!(api.live_programs(), 1);

        drop(program);
        compiler.collect_garbage(&mut api);
        assert_eq!(api.live_programs(), 0);
    }

    #[test]
    fn pipeline_collects_stages_of_monolithic_program() {
        let mut api = FakeApi::default();
        let mut compiler = ShaderCompiler::new();
        let vert = compile(&mut api, &mut compiler, ShaderStage::Vertex, "void main(){}");
        let frag = compile(&mut api, &mut compiler, ShaderStage::Fragment, "void main(){}");
        let program =
            Program::link(&mut api, compiler.graveyard(), &[vert, frag], false).unwrap();

        let mut pipeline = ProgramPipeline::new();
        pipeline.use_program_stages(&program);
        assert_eq!(pipeline.program(ShaderStage::Vertex), Some(program.id()));
        assert_eq!(pipeline.program(ShaderStage::Fragment), Some(program.id()));
        assert_eq!(pipeline.programs(), vec![program.id()]);
    }
}
