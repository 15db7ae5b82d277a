//! Runtime reflection over a linked program's active resources.
//!
//! Each interface is queried the first time something asks for it and then
//! kept for the introspector's lifetime. Subroutine-uniform interfaces are
//! per stage and most programs never touch them, so each stage is loaded
//! separately. There is no partial invalidation: a relinked program gets a
//! new introspector.
mod resource;
mod types;

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use shadersrc::ShaderStage;
use tracing::{trace, warn};

use crate::api::{GraphicsApi, Interface, ProgramId};
use crate::uniforms::IntoUniform;

use resource::{
    decoders, Decoder, BLOCK_DECODERS, IO_DECODERS, SUBROUTINE_UNIFORM_DECODERS, UNIFORM_DECODERS,
};
pub use resource::{Resource, UniformBlock};
pub use types::{GlslType, TypeShape};

const SLOT_COUNT: usize = 4 + ShaderStage::ALL.len();

/// Position of an interface in the introspector's cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InterfaceSlot {
    Uniform,
    UniformBlock,
    ProgramInput,
    ProgramOutput,
    SubroutineUniform(ShaderStage),
}

impl InterfaceSlot {
    fn of(interface: Interface) -> Option<Self> {
        match interface {
            Interface::Uniform => Some(Self::Uniform),
            Interface::UniformBlock => Some(Self::UniformBlock),
            Interface::ProgramInput => Some(Self::ProgramInput),
            Interface::ProgramOutput => Some(Self::ProgramOutput),
            Interface::SubroutineUniform(stage) => Some(Self::SubroutineUniform(stage)),
            Interface::Subroutine(_) => None,
        }
    }

    fn index(self) -> usize {
        match self {
            Self::Uniform => 0,
            Self::UniformBlock => 1,
            Self::ProgramInput => 2,
            Self::ProgramOutput => 3,
            Self::SubroutineUniform(stage) => 4 + stage.index(),
        }
    }

    fn interface(self) -> Interface {
        match self {
            Self::Uniform => Interface::Uniform,
            Self::UniformBlock => Interface::UniformBlock,
            Self::ProgramInput => Interface::ProgramInput,
            Self::ProgramOutput => Interface::ProgramOutput,
            Self::SubroutineUniform(stage) => Interface::SubroutineUniform(stage),
        }
    }
}

/// The resources of one interface with a name index.
#[derive(Debug, Clone, Default)]
pub struct InterfaceResources {
    resources: Vec<Resource>,
    by_name: HashMap<String, usize>,
}

impl InterfaceResources {
    fn from_resources(interface: Interface, resources: Vec<Resource>) -> Self {
        let mut by_name = HashMap::with_capacity(resources.len());
        for (position, resource) in resources.iter().enumerate() {
            if by_name.contains_key(&resource.name) {
                warn!(
                    interface = %interface,
                    name = %resource.name,
                    "duplicate resource name reported; keeping the first"
                );
                continue;
            }
            by_name.insert(resource.name.clone(), position);
        }
        Self { resources, by_name }
    }

    pub fn get(&self, name: &str) -> Option<&Resource> {
        self.by_name.get(name).map(|&position| &self.resources[position])
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }
}

/// Lazily built reflection of one program. Stores only the program id; the
/// owning [`Program`](crate::program::Program) drops it with itself.
#[derive(Debug)]
pub struct ProgramIntrospector {
    program: ProgramId,
    interfaces: [Option<InterfaceResources>; SLOT_COUNT],
}

impl ProgramIntrospector {
    pub fn new(program: ProgramId) -> Self {
        Self {
            program,
            interfaces: Default::default(),
        }
    }

    pub fn program(&self) -> ProgramId {
        self.program
    }

    pub fn is_loaded(&self, interface: Interface) -> bool {
        InterfaceSlot::of(interface)
            .map(|slot| self.interfaces[slot.index()].is_some())
            .unwrap_or(false)
    }

    fn ensure<A: GraphicsApi + ?Sized>(&mut self, api: &A, slot: InterfaceSlot) -> &InterfaceResources {
        let program = self.program;
        self.interfaces[slot.index()].get_or_insert_with(|| load_interface(api, program, slot))
    }

    /// Every active resource of `interface`. The subroutine (function) list is
    /// not cached separately and comes back empty here.
    pub fn resources<A: GraphicsApi + ?Sized>(&mut self, api: &A, interface: Interface) -> &[Resource] {
        match InterfaceSlot::of(interface) {
            Some(slot) => self.ensure(api, slot).resources(),
            None => &[],
        }
    }

    pub fn subroutine_uniforms<A: GraphicsApi + ?Sized>(
        &mut self,
        api: &A,
        stage: ShaderStage,
    ) -> &[Resource] {
        self.ensure(api, InterfaceSlot::SubroutineUniform(stage))
            .resources()
    }

    /// Exact-name lookup. A miss is logged once per call at warn level.
    pub fn find<A: GraphicsApi + ?Sized>(
        &mut self,
        api: &A,
        interface: Interface,
        name: &str,
    ) -> Option<&Resource> {
        let program = self.program;
        let found = self.get(api, interface, name);
        if found.is_none() {
            warn!(%program, %interface, name, "resource not found");
        }
        found
    }

    /// Like [`find`](Self::find) without the warning; absent uniforms are
    /// normal for the render loop.
    pub fn get<A: GraphicsApi + ?Sized>(
        &mut self,
        api: &A,
        interface: Interface,
        name: &str,
    ) -> Option<&Resource> {
        let slot = InterfaceSlot::of(interface)?;
        self.ensure(api, slot).get(name)
    }

    pub fn uniform_block<A: GraphicsApi + ?Sized>(
        &mut self,
        api: &A,
        name: &str,
    ) -> Option<UniformBlock<'_>> {
        self.find(api, Interface::UniformBlock, name)
            .map(UniformBlock::new)
    }

    /// Sets uniform `name` to `value` through its reflected location.
    /// Returns false, silently, when the program has no such uniform.
    pub fn assign<A: GraphicsApi + ?Sized, V: IntoUniform>(
        &mut self,
        api: &mut A,
        name: &str,
        value: V,
    ) -> bool {
        let program = self.program;
        let Some(resource) = self.get(&*api, Interface::Uniform, name) else {
            return false;
        };
        if resource.location < 0 {
            trace!(%program, name, "uniform has no location; skipping");
            return false;
        }
        let location = resource.location;
        let value = value.into_uniform();
        #[cfg(debug_assertions)]
        warn_on_shape_mismatch(program, resource, &value);
        api.set_uniform(program, location, &value);
        true
    }

    /// Loads every interface and gathers them into a serialisable report.
    pub fn summary<A: GraphicsApi + ?Sized>(&mut self, api: &A) -> IntrospectionReport {
        let mut report = IntrospectionReport {
            program: self.program.0,
            uniforms: self.resources(api, Interface::Uniform).to_vec(),
            uniform_blocks: self.resources(api, Interface::UniformBlock).to_vec(),
            inputs: self.resources(api, Interface::ProgramInput).to_vec(),
            outputs: self.resources(api, Interface::ProgramOutput).to_vec(),
            subroutine_uniforms: BTreeMap::new(),
        };
        for stage in ShaderStage::ALL {
            let uniforms = self.subroutine_uniforms(api, stage);
            if !uniforms.is_empty() {
                report
                    .subroutine_uniforms
                    .insert(stage.as_str().to_string(), uniforms.to_vec());
            }
        }
        report
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IntrospectionReport {
    pub program: u32,
    pub uniforms: Vec<Resource>,
    pub uniform_blocks: Vec<Resource>,
    pub inputs: Vec<Resource>,
    pub outputs: Vec<Resource>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub subroutine_uniforms: BTreeMap<String, Vec<Resource>>,
}

fn query_resources<A: GraphicsApi + ?Sized>(
    api: &A,
    program: ProgramId,
    interface: Interface,
    indices: impl IntoIterator<Item = u32>,
    table: &[&'static Decoder],
) -> Vec<Resource> {
    let properties: Vec<_> = table.iter().map(|decoder| decoder.property).collect();
    let mut values = vec![-1; properties.len()];
    indices
        .into_iter()
        .map(|index| {
            let mut resource = Resource::new(index, api.resource_name(program, interface, index));
            values.fill(-1);
            api.resource_properties(program, interface, index, &properties, &mut values);
            for (decoder, value) in table.iter().zip(&values) {
                (decoder.apply)(&mut resource, decoder.property, *value);
            }
            resource
        })
        .collect()
}

fn load_interface<A: GraphicsApi + ?Sized>(
    api: &A,
    program: ProgramId,
    slot: InterfaceSlot,
) -> InterfaceResources {
    let interface = slot.interface();
    let count = api.active_resources(program, interface);
    let resources = match slot {
        InterfaceSlot::Uniform => query_resources(
            api,
            program,
            interface,
            0..count,
            &decoders(&UNIFORM_DECODERS, true),
        ),
        InterfaceSlot::UniformBlock => {
            let member_table = decoders(&UNIFORM_DECODERS, true);
            let mut blocks = query_resources(
                api,
                program,
                interface,
                0..count,
                &decoders(&BLOCK_DECODERS, true),
            );
            for block in &mut blocks {
                let members = api.resource_active_variables(program, interface, block.index);
                block.members =
                    query_resources(api, program, Interface::Uniform, members, &member_table);
            }
            blocks
        }
        InterfaceSlot::ProgramInput | InterfaceSlot::ProgramOutput => query_resources(
            api,
            program,
            interface,
            0..count,
            &decoders(&IO_DECODERS, true),
        ),
        InterfaceSlot::SubroutineUniform(stage) => {
            let names: Vec<String> = (0..api.active_resources(program, Interface::Subroutine(stage)))
                .map(|index| api.resource_name(program, Interface::Subroutine(stage), index))
                .collect();
            let mut uniforms = query_resources(
                api,
                program,
                interface,
                0..count,
                &decoders(&SUBROUTINE_UNIFORM_DECODERS, false),
            );
            for uniform in &mut uniforms {
                uniform.referenced_by = stage.bit();
                uniform.compatible_subroutines = api
                    .resource_active_variables(program, interface, uniform.index)
                    .into_iter()
                    .filter_map(|index| names.get(index as usize).cloned())
                    .collect();
            }
            uniforms
        }
    };
    trace!(%program, %interface, count = resources.len(), "introspected interface");
    InterfaceResources::from_resources(interface, resources)
}

#[cfg(debug_assertions)]
fn warn_on_shape_mismatch(
    program: ProgramId,
    resource: &Resource,
    value: &crate::uniforms::UniformValue,
) {
    use crate::uniforms::ScalarKind;

    let Some(declared) = resource.ty.shape() else {
        return;
    };
    let (columns, rows) = value.shape.dimensions();
    let kind_matches = declared.kind == value.kind()
        || (declared.kind == ScalarKind::Bool && value.kind() != ScalarKind::Double);
    let too_many = resource.array_size > 0 && value.count() > resource.array_size as usize;
    if !kind_matches || declared.columns != columns || declared.rows != rows || too_many {
        warn!(
            %program,
            name = %resource.name,
            declared = resource.ty.glsl_name(),
            array_size = resource.array_size,
            given = %value.describe(),
            "uniform assigned a value of a different shape"
        );
    }
}

#[cfg(test)]
mod tests;
