//! Backend-side description of a linked program's resources.
//!
//! Backends build one `ProgramLayout` per compiled shader, merge them at link
//! time and then answer the [`GraphicsApi`](crate::api::GraphicsApi) resource
//! queries from it. The introspector never sees this type; it only issues the
//! queries.
use std::collections::BTreeMap;

use shadersrc::ShaderStage;

use crate::api::{Interface, Property};
use crate::introspect::GlslType;
use crate::uniforms::MemberLayout;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformLayout {
    pub name: String,
    pub ty: GlslType,
    pub array_size: u32,
    pub offset: i32,
    pub block_index: i32,
    pub array_stride: i32,
    pub matrix_stride: i32,
    pub row_major: bool,
    pub location: i32,
    pub referenced_by: u8,
    /// (group, binding) of opaque resources.
    pub binding: Option<(u32, u32)>,
}

impl UniformLayout {
    pub fn in_block(name: impl Into<String>, ty: GlslType, block: i32, offset: i32) -> Self {
        Self {
            name: name.into(),
            ty,
            array_size: 1,
            offset,
            block_index: block,
            array_stride: 0,
            matrix_stride: 0,
            row_major: false,
            location: -1,
            referenced_by: 0,
            binding: None,
        }
    }

    pub fn opaque(name: impl Into<String>, ty: GlslType, group: u32, binding: u32) -> Self {
        Self {
            name: name.into(),
            ty,
            array_size: 1,
            offset: -1,
            block_index: -1,
            array_stride: -1,
            matrix_stride: -1,
            row_major: false,
            location: -1,
            referenced_by: 0,
            binding: Some((group, binding)),
        }
    }

    pub fn member_layout(&self) -> MemberLayout {
        MemberLayout {
            offset: self.offset.max(0) as usize,
            array_stride: self.array_stride.max(0) as usize,
            matrix_stride: self.matrix_stride.max(0) as usize,
            row_major: self.row_major,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockLayout {
    pub name: String,
    pub group: u32,
    pub binding: u32,
    pub data_size: u32,
    /// Indices into [`ProgramLayout::uniforms`].
    pub members: Vec<u32>,
    pub referenced_by: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableLayout {
    pub name: String,
    pub ty: GlslType,
    pub array_size: u32,
    pub location: i32,
    pub referenced_by: u8,
}

impl VariableLayout {
    pub fn new(name: impl Into<String>, ty: GlslType, location: i32) -> Self {
        Self {
            name: name.into(),
            ty,
            array_size: 1,
            location,
            referenced_by: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubroutineUniformLayout {
    pub name: String,
    pub location: i32,
    pub array_size: u32,
    /// Indices into the stage's subroutine list.
    pub compatible: Vec<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramLayout {
    pub uniforms: Vec<UniformLayout>,
    pub blocks: Vec<BlockLayout>,
    pub inputs: Vec<VariableLayout>,
    pub outputs: Vec<VariableLayout>,
    pub subroutine_uniforms: [Vec<SubroutineUniformLayout>; 6],
    pub subroutines: [Vec<String>; 6],
}

impl ProgramLayout {
    /// Adds a block and its members, fixing up member block indices.
    pub fn push_block(
        &mut self,
        name: impl Into<String>,
        group: u32,
        binding: u32,
        data_size: u32,
        members: Vec<UniformLayout>,
    ) -> u32 {
        let block_index = self.blocks.len() as u32;
        let mut indices = Vec::with_capacity(members.len());
        for mut member in members {
            member.block_index = block_index as i32;
            indices.push(self.uniforms.len() as u32);
            self.uniforms.push(member);
        }
        self.blocks.push(BlockLayout {
            name: name.into(),
            group,
            binding,
            data_size,
            members: indices,
            referenced_by: 0,
        });
        block_index
    }

    /// Marks every resource as referenced by `stage`.
    pub fn mark_stage(&mut self, stage: ShaderStage) {
        let bit = stage.bit();
        self.uniforms.iter_mut().for_each(|u| u.referenced_by |= bit);
        self.blocks.iter_mut().for_each(|b| b.referenced_by |= bit);
        self.inputs.iter_mut().for_each(|v| v.referenced_by |= bit);
        self.outputs.iter_mut().for_each(|v| v.referenced_by |= bit);
    }

    /// Combines per-stage layouts into the layout of one linked program.
    ///
    /// Blocks and uniforms declared by several stages are merged by name and
    /// their stage masks combined. Inputs come from the first stage, outputs
    /// from the last. Every non-opaque uniform gets a location equal to its
    /// index, which is how backends without a default uniform block address
    /// block members through `set_uniform`.
    pub fn link(stages: &[(ShaderStage, &ProgramLayout)]) -> Result<ProgramLayout, String> {
        let mut linked = ProgramLayout::default();
        let mut block_lookup: BTreeMap<String, usize> = BTreeMap::new();
        let mut uniform_lookup: BTreeMap<String, usize> = BTreeMap::new();

        for (stage, layout) in stages {
            let bit = stage.bit();
            let mut remap = Vec::with_capacity(layout.blocks.len());
            for block in &layout.blocks {
                let index = match block_lookup.get(&block.name) {
                    Some(&existing) => {
                        let merged = &mut linked.blocks[existing];
                        if merged.data_size != block.data_size || merged.binding != block.binding {
                            return Err(format!(
                                "uniform block '{}' is declared differently by the {stage} stage",
                                block.name
                            ));
                        }
                        merged.referenced_by |= bit;
                        existing
                    }
                    None => {
                        linked.blocks.push(BlockLayout {
                            members: Vec::new(),
                            referenced_by: bit,
                            ..block.clone()
                        });
                        block_lookup.insert(block.name.clone(), linked.blocks.len() - 1);
                        linked.blocks.len() - 1
                    }
                };
                remap.push(index);
            }

            for uniform in &layout.uniforms {
                if let Some(&existing) = uniform_lookup.get(&uniform.name) {
                    let merged = &mut linked.uniforms[existing];
                    if merged.ty != uniform.ty {
                        return Err(format!(
                            "uniform '{}' has conflicting types {} and {}",
                            uniform.name,
                            merged.ty.glsl_name(),
                            uniform.ty.glsl_name()
                        ));
                    }
                    merged.referenced_by |= bit;
                    continue;
                }
                let mut merged = uniform.clone();
                merged.referenced_by = bit;
                if uniform.block_index >= 0 {
                    let block = remap[uniform.block_index as usize];
                    merged.block_index = block as i32;
                    linked.blocks[block]
                        .members
                        .push(linked.uniforms.len() as u32);
                }
                uniform_lookup.insert(uniform.name.clone(), linked.uniforms.len());
                linked.uniforms.push(merged);
            }

            linked.subroutine_uniforms[stage.index()] =
                layout.subroutine_uniforms[stage.index()].clone();
            linked.subroutines[stage.index()] = layout.subroutines[stage.index()].clone();
        }

        if let Some((stage, first)) = stages.first() {
            linked.inputs = first.inputs.clone();
            linked
                .inputs
                .iter_mut()
                .for_each(|v| v.referenced_by = stage.bit());
        }
        if let Some((stage, last)) = stages.last() {
            linked.outputs = last.outputs.clone();
            linked
                .outputs
                .iter_mut()
                .for_each(|v| v.referenced_by = stage.bit());
        }

        for (index, uniform) in linked.uniforms.iter_mut().enumerate() {
            if !uniform.ty.is_opaque() {
                uniform.location = index as i32;
            }
        }
        Ok(linked)
    }

    pub fn count(&self, interface: Interface) -> u32 {
        let count = match interface {
            Interface::Uniform => self.uniforms.len(),
            Interface::UniformBlock => self.blocks.len(),
            Interface::ProgramInput => self.inputs.len(),
            Interface::ProgramOutput => self.outputs.len(),
            Interface::SubroutineUniform(stage) => self.subroutine_uniforms[stage.index()].len(),
            Interface::Subroutine(stage) => self.subroutines[stage.index()].len(),
        };
        count as u32
    }

    pub fn name(&self, interface: Interface, index: u32) -> Option<&str> {
        let index = index as usize;
        match interface {
            Interface::Uniform => self.uniforms.get(index).map(|u| u.name.as_str()),
            Interface::UniformBlock => self.blocks.get(index).map(|b| b.name.as_str()),
            Interface::ProgramInput => self.inputs.get(index).map(|v| v.name.as_str()),
            Interface::ProgramOutput => self.outputs.get(index).map(|v| v.name.as_str()),
            Interface::SubroutineUniform(stage) => self.subroutine_uniforms[stage.index()]
                .get(index)
                .map(|s| s.name.as_str()),
            Interface::Subroutine(stage) => {
                self.subroutines[stage.index()].get(index).map(String::as_str)
            }
        }
    }

    pub fn active_variables(&self, interface: Interface, index: u32) -> Vec<u32> {
        let index = index as usize;
        match interface {
            Interface::UniformBlock => self
                .blocks
                .get(index)
                .map(|b| b.members.clone())
                .unwrap_or_default(),
            Interface::SubroutineUniform(stage) => self.subroutine_uniforms[stage.index()]
                .get(index)
                .map(|s| s.compatible.clone())
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    /// Answers one property of one resource; `-1` when it does not apply.
    pub fn property(&self, interface: Interface, index: u32, property: Property) -> i32 {
        let index = index as usize;
        let referenced = |mask: u8, stage: ShaderStage| i32::from(mask & stage.bit() != 0);
        match interface {
            Interface::Uniform => {
                let Some(u) = self.uniforms.get(index) else {
                    return -1;
                };
                match property {
                    Property::Type => u.ty.code(),
                    Property::ArraySize => u.array_size as i32,
                    Property::Offset => u.offset,
                    Property::BlockIndex => u.block_index,
                    Property::ArrayStride => u.array_stride,
                    Property::MatrixStride => u.matrix_stride,
                    Property::IsRowMajor => i32::from(u.row_major),
                    Property::Location => u.location,
                    Property::BufferBinding => u.binding.map_or(-1, |(_, b)| b as i32),
                    Property::ReferencedBy(stage) => referenced(u.referenced_by, stage),
                    _ => -1,
                }
            }
            Interface::UniformBlock => {
                let Some(b) = self.blocks.get(index) else {
                    return -1;
                };
                match property {
                    Property::BufferBinding => b.binding as i32,
                    Property::BufferDataSize => b.data_size as i32,
                    Property::NumActiveVariables => b.members.len() as i32,
                    Property::ReferencedBy(stage) => referenced(b.referenced_by, stage),
                    _ => -1,
                }
            }
            Interface::ProgramInput | Interface::ProgramOutput => {
                let list = if interface == Interface::ProgramInput {
                    &self.inputs
                } else {
                    &self.outputs
                };
                let Some(v) = list.get(index) else {
                    return -1;
                };
                match property {
                    Property::Type => v.ty.code(),
                    Property::ArraySize => v.array_size as i32,
                    Property::Location => v.location,
                    Property::ReferencedBy(stage) => referenced(v.referenced_by, stage),
                    _ => -1,
                }
            }
            Interface::SubroutineUniform(stage) => {
                let Some(s) = self.subroutine_uniforms[stage.index()].get(index) else {
                    return -1;
                };
                match property {
                    Property::ArraySize => s.array_size as i32,
                    Property::Location => s.location,
                    Property::NumCompatibleSubroutines => s.compatible.len() as i32,
                    Property::ReferencedBy(other) => i32::from(other == stage),
                    _ => -1,
                }
            }
            Interface::Subroutine(stage) => match property {
                Property::ReferencedBy(other)
                    if index < self.subroutines[stage.index()].len() =>
                {
                    i32::from(other == stage)
                }
                _ => -1,
            },
        }
    }

    pub fn uniform_at_location(&self, location: i32) -> Option<&UniformLayout> {
        self.uniforms.iter().find(|u| u.location == location && location >= 0)
    }

    pub fn input_location(&self, name: &str) -> Option<i32> {
        self.inputs.iter().find(|v| v.name == name).map(|v| v.location)
    }
}

/// Checks that two separately linked stages can run together: every input of
/// the consumer is written by the producer at the same location and type.
pub fn check_interface(producer: &ProgramLayout, consumer: &ProgramLayout) -> Result<(), String> {
    for input in &consumer.inputs {
        match producer.outputs.iter().find(|o| o.location == input.location) {
            Some(output) if output.ty == input.ty => {}
            Some(output) => {
                return Err(format!(
                    "input '{}' at location {} is {} but the previous stage writes {} '{}'",
                    input.name,
                    input.location,
                    input.ty.glsl_name(),
                    output.ty.glsl_name(),
                    output.name
                ))
            }
            None => {
                return Err(format!(
                    "input '{}' at location {} is not written by the previous stage",
                    input.name, input.location
                ))
            }
        }
    }
    for block in &consumer.blocks {
        let clash = producer.blocks.iter().find(|b| {
            b.group == block.group && b.binding == block.binding && b.data_size != block.data_size
        });
        if let Some(other) = clash {
            return Err(format!(
                "uniform blocks '{}' and '{}' share set {} binding {} with different sizes",
                other.name, block.name, block.group, block.binding
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage_layout(block_member: &str, output: Option<(&str, GlslType, i32)>) -> ProgramLayout {
        let mut layout = ProgramLayout::default();
        layout.push_block(
            "Frame",
            0,
            0,
            80,
            vec![
                UniformLayout::in_block("Projection", GlslType::Mat4, 0, 0),
                UniformLayout::in_block(block_member, GlslType::Float, 0, 64),
            ],
        );
        if let Some((name, ty, location)) = output {
            layout.outputs.push(VariableLayout::new(name, ty, location));
        }
        layout
    }

    #[test]
    fn link_merges_shared_blocks_and_assigns_locations() {
        let vertex = stage_layout("Time", Some(("v_normal", GlslType::Vec3, 0)));
        let fragment = stage_layout("Time", Some(("color", GlslType::Vec4, 0)));
        let linked = ProgramLayout::link(&[
            (ShaderStage::Vertex, &vertex),
            (ShaderStage::Fragment, &fragment),
        ])
        .unwrap();

        assert_eq!(linked.blocks.len(), 1);
        assert_eq!(linked.uniforms.len(), 2);
        assert_eq!(linked.blocks[0].members, vec![0, 1]);
        assert_eq!(
            linked.blocks[0].referenced_by,
            ShaderStage::Vertex.bit() | ShaderStage::Fragment.bit()
        );
        assert_eq!(linked.uniforms[1].location, 1);
        assert_eq!(linked.outputs[0].name, "color");
    }

    #[test]
    fn link_rejects_conflicting_block_sizes() {
        let vertex = stage_layout("Time", None);
        let mut fragment = stage_layout("Time", None);
        fragment.blocks[0].data_size = 96;
        let err = ProgramLayout::link(&[
            (ShaderStage::Vertex, &vertex),
            (ShaderStage::Fragment, &fragment),
        ])
        .unwrap_err();
        assert!(err.contains("Frame"));
    }

    #[test]
    fn property_queries_report_not_applicable() {
        let layout = stage_layout("Time", None);
        assert_eq!(layout.property(Interface::Uniform, 1, Property::Offset), 64);
        assert_eq!(
            layout.property(Interface::Uniform, 1, Property::BufferDataSize),
            -1
        );
        assert_eq!(layout.property(Interface::Uniform, 9, Property::Type), -1);
        assert_eq!(
            layout.property(Interface::UniformBlock, 0, Property::NumActiveVariables),
            2
        );
    }

    #[test]
    fn interface_check_requires_matching_outputs() {
        let producer = stage_layout("Time", Some(("v_uv", GlslType::Vec2, 0)));
        let mut consumer = ProgramLayout::default();
        consumer.inputs.push(VariableLayout::new("v_uv", GlslType::Vec2, 0));
        assert!(check_interface(&producer, &consumer).is_ok());

        consumer.inputs[0].ty = GlslType::Vec3;
        assert!(check_interface(&producer, &consumer).is_err());

        consumer.inputs[0].location = 3;
        let err = check_interface(&producer, &consumer).unwrap_err();
        assert!(err.contains("not written"));
    }
}
