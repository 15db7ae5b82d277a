//! CPU-side GLSL parsing and reflection through naga.
//!
//! Each compiled stage is turned into a [`ProgramLayout`] holding only the
//! resources its entry point actually uses, which is what a GL driver would
//! report as "active".
use shadersrc::ShaderStage;
use wgpu::naga::front::glsl::{Frontend, Options};
use wgpu::naga::valid::{Capabilities, ModuleInfo, ValidationFlags, Validator};
use wgpu::naga::{
    self, AddressSpace, ArraySize, Binding, Handle, ImageClass, ImageDimension, Module, TypeInner,
    VectorSize,
};

use crate::introspect::GlslType;
use crate::layout::{ProgramLayout, UniformLayout, VariableLayout};
use crate::uniforms::ScalarKind;

/// Maps a stage onto naga's; `None` for stages wgpu cannot run.
pub(crate) fn naga_stage(stage: ShaderStage) -> Option<naga::ShaderStage> {
    match stage {
        ShaderStage::Vertex => Some(naga::ShaderStage::Vertex),
        ShaderStage::Fragment => Some(naga::ShaderStage::Fragment),
        ShaderStage::Compute => Some(naga::ShaderStage::Compute),
        ShaderStage::TessControl | ShaderStage::TessEvaluation | ShaderStage::Geometry => None,
    }
}

/// Parses and validates one stage. Errors carry the rendered diagnostic.
pub(crate) fn parse(stage: ShaderStage, source: &str) -> Result<(Module, ModuleInfo), String> {
    let naga_stage = naga_stage(stage)
        .ok_or_else(|| format!("{stage} shaders are not supported by the wgpu backend"))?;
    let module = Frontend::default()
        .parse(&Options::from(naga_stage), source)
        .map_err(|errors| errors.emit_to_string(source))?;
    let info = Validator::new(ValidationFlags::all(), Capabilities::all())
        .validate(&module)
        .map_err(|error| error.emit_to_string(source))?;
    Ok((module, info))
}

/// Parses, validates and reflects `source` without touching a GPU.
pub fn check_shader(stage: ShaderStage, source: &str) -> Result<ProgramLayout, String> {
    let (module, info) = parse(stage, source)?;
    Ok(reflect(stage, &module, &info))
}

pub(crate) fn reflect(stage: ShaderStage, module: &Module, info: &ModuleInfo) -> ProgramLayout {
    let mut layout = ProgramLayout::default();
    let Some((index, entry)) = module
        .entry_points
        .iter()
        .enumerate()
        .find(|(_, entry)| naga_stage(stage) == Some(entry.stage))
    else {
        return layout;
    };
    let usage = info.get_entry_point(index);

    for (handle, global) in module.global_variables.iter() {
        if usage[handle].is_empty() {
            continue;
        }
        let Some(binding) = global.binding.as_ref() else {
            continue;
        };
        let ty = &module.types[global.ty];
        match (global.space, &ty.inner) {
            (AddressSpace::Uniform, TypeInner::Struct { members, span }) => {
                let name = ty
                    .name
                    .clone()
                    .or_else(|| global.name.clone())
                    .unwrap_or_else(|| format!("block_{}_{}", binding.group, binding.binding));
                let mut flattened = Vec::new();
                for member in members {
                    let member_name = member.name.clone().unwrap_or_default();
                    flatten_member(module, &member_name, member.ty, member.offset, &mut flattened);
                }
                layout.push_block(name, binding.group, binding.binding, *span, flattened);
            }
            (AddressSpace::Handle, inner) => {
                let Some(ty) = opaque_type(inner) else {
                    tracing::debug!(name = ?global.name, "skipping unsupported opaque global");
                    continue;
                };
                let name = global.name.clone().unwrap_or_default();
                layout.uniforms.push(UniformLayout::opaque(
                    name,
                    ty,
                    binding.group,
                    binding.binding,
                ));
            }
            (space, _) => {
                tracing::debug!(name = ?global.name, ?space, "skipping global outside uniform space");
            }
        }
    }

    for argument in &entry.function.arguments {
        push_locations(
            module,
            argument.name.as_deref(),
            argument.ty,
            argument.binding.as_ref(),
            &mut layout.inputs,
        );
    }
    if let Some(result) = &entry.function.result {
        push_locations(
            module,
            None,
            result.ty,
            result.binding.as_ref(),
            &mut layout.outputs,
        );
    }
    layout.inputs.sort_by_key(|v| v.location);
    layout.outputs.sort_by_key(|v| v.location);
    layout.mark_stage(stage);
    layout
}

fn push_locations(
    module: &Module,
    name: Option<&str>,
    ty: Handle<naga::Type>,
    binding: Option<&Binding>,
    out: &mut Vec<VariableLayout>,
) {
    match binding {
        Some(Binding::Location { location, .. }) => {
            let (glsl, array_size, _, _) = describe(module, ty);
            let mut variable = VariableLayout::new(name.unwrap_or_default(), glsl, *location as i32);
            variable.array_size = array_size.max(1);
            out.push(variable);
        }
        Some(Binding::BuiltIn(_)) => {}
        None => {
            if let TypeInner::Struct { members, .. } = &module.types[ty].inner {
                for member in members {
                    push_locations(
                        module,
                        member.name.as_deref(),
                        member.ty,
                        member.binding.as_ref(),
                        out,
                    );
                }
            }
        }
    }
}

/// Adds a block member, expanding nested structs into `outer.inner` names.
fn flatten_member(
    module: &Module,
    name: &str,
    ty: Handle<naga::Type>,
    offset: u32,
    out: &mut Vec<UniformLayout>,
) {
    if let TypeInner::Struct { members, .. } = &module.types[ty].inner {
        for member in members {
            let nested = format!("{name}.{}", member.name.as_deref().unwrap_or_default());
            flatten_member(module, &nested, member.ty, offset + member.offset, out);
        }
        return;
    }
    let (glsl, array_size, array_stride, matrix_stride) = describe(module, ty);
    let mut uniform = UniformLayout::in_block(name, glsl, 0, offset as i32);
    uniform.array_size = array_size.max(1);
    uniform.array_stride = array_stride as i32;
    uniform.matrix_stride = matrix_stride as i32;
    out.push(uniform);
}

fn scalar_kind(scalar: naga::Scalar) -> ScalarKind {
    match (scalar.kind, scalar.width) {
        (naga::ScalarKind::Float, 8) => ScalarKind::Double,
        (naga::ScalarKind::Float | naga::ScalarKind::AbstractFloat, _) => ScalarKind::Float,
        (naga::ScalarKind::Sint | naga::ScalarKind::AbstractInt, _) => ScalarKind::Int,
        (naga::ScalarKind::Uint, _) => ScalarKind::UInt,
        (naga::ScalarKind::Bool, _) => ScalarKind::Bool,
    }
}

fn vector_size(size: VectorSize) -> u8 {
    size as u8
}

/// Type, array length, array stride and matrix column stride of a value type.
fn describe(module: &Module, ty: Handle<naga::Type>) -> (GlslType, u32, u32, u32) {
    match &module.types[ty].inner {
        TypeInner::Scalar(scalar) => (GlslType::vector(scalar_kind(*scalar), 1), 1, 0, 0),
        TypeInner::Vector { size, scalar } => (
            GlslType::vector(scalar_kind(*scalar), vector_size(*size)),
            1,
            0,
            0,
        ),
        TypeInner::Matrix {
            columns,
            rows,
            scalar,
        } => {
            let rows = vector_size(*rows);
            let aligned_rows = if rows == 2 { 2 } else { 4 };
            (
                GlslType::matrix(scalar_kind(*scalar), vector_size(*columns), rows),
                1,
                0,
                aligned_rows * u32::from(scalar.width),
            )
        }
        TypeInner::Array { base, size, stride } => {
            let length = match size {
                ArraySize::Constant(length) => length.get(),
                _ => 0,
            };
            let (element, _, _, matrix_stride) = describe(module, *base);
            (element, length, *stride, matrix_stride)
        }
        _ => (GlslType::default(), 1, 0, 0),
    }
}

fn opaque_type(inner: &TypeInner) -> Option<GlslType> {
    match inner {
        TypeInner::Image {
            dim,
            arrayed,
            class: ImageClass::Sampled { .. } | ImageClass::Depth { .. },
        } => match (dim, arrayed) {
            (ImageDimension::D1, false) => Some(GlslType::Texture1D),
            (ImageDimension::D2, false) => Some(GlslType::Texture2D),
            (ImageDimension::D2, true) => Some(GlslType::Texture2DArray),
            (ImageDimension::D3, false) => Some(GlslType::Texture3D),
            (ImageDimension::Cube, false) => Some(GlslType::TextureCube),
            _ => None,
        },
        TypeInner::Sampler { comparison: false } => Some(GlslType::Sampler),
        TypeInner::Sampler { comparison: true } => Some(GlslType::SamplerShadow),
        _ => None,
    }
}
