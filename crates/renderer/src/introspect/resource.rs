use serde::{Serialize, Serializer};
use shadersrc::ShaderStage;

use crate::api::Property;
use crate::uniforms::{IntoUniform, MemberLayout};

use super::types::GlslType;

/// One active resource of one program interface.
///
/// Fields that do not apply to the resource's interface stay at `-1`
/// (or empty) and are left out of serialised reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resource {
    pub index: u32,
    pub name: String,
    #[serde(rename = "type", skip_serializing_if = "is_untyped")]
    pub ty: GlslType,
    #[serde(skip_serializing_if = "is_unset")]
    pub array_size: i32,
    #[serde(skip_serializing_if = "is_unset")]
    pub offset: i32,
    #[serde(skip_serializing_if = "is_unset")]
    pub block_index: i32,
    #[serde(skip_serializing_if = "is_unset")]
    pub array_stride: i32,
    #[serde(skip_serializing_if = "is_unset")]
    pub matrix_stride: i32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub row_major: bool,
    #[serde(skip_serializing_if = "is_unset")]
    pub location: i32,
    #[serde(skip_serializing_if = "is_unset")]
    pub binding: i32,
    #[serde(skip_serializing_if = "is_unset")]
    pub data_size: i32,
    #[serde(serialize_with = "stage_names")]
    pub referenced_by: u8,
    /// Block members, resolved through the block's active-variable list.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<Resource>,
    /// Subroutines compatible with a subroutine uniform.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub compatible_subroutines: Vec<String>,
}

fn is_unset(value: &i32) -> bool {
    *value < 0
}

fn is_untyped(ty: &GlslType) -> bool {
    matches!(ty, GlslType::Unknown(0))
}

fn stage_names<S: Serializer>(mask: &u8, serializer: S) -> Result<S::Ok, S::Error> {
    let names: Vec<&str> = ShaderStage::ALL
        .iter()
        .filter(|stage| mask & stage.bit() != 0)
        .map(|stage| stage.as_str())
        .collect();
    names.serialize(serializer)
}

impl Resource {
    pub fn new(index: u32, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
            ty: GlslType::default(),
            array_size: -1,
            offset: -1,
            block_index: -1,
            array_stride: -1,
            matrix_stride: -1,
            row_major: false,
            location: -1,
            binding: -1,
            data_size: -1,
            referenced_by: 0,
            members: Vec::new(),
            compatible_subroutines: Vec::new(),
        }
    }

    pub fn is_referenced_by(&self, stage: ShaderStage) -> bool {
        self.referenced_by & stage.bit() != 0
    }

    /// Member of a uniform block by name. Members of blocks with an instance
    /// name are reported as `Block.member`; both spellings match.
    pub fn member(&self, name: &str) -> Option<&Resource> {
        self.members.iter().find(|member| {
            member.name == name
                || member
                    .name
                    .rsplit_once('.')
                    .is_some_and(|(_, short)| short == name)
        })
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

/// Read-only view of a reflected uniform block.
#[derive(Debug, Clone, Copy)]
pub struct UniformBlock<'a> {
    resource: &'a Resource,
}

impl<'a> UniformBlock<'a> {
    pub(crate) fn new(resource: &'a Resource) -> Self {
        Self { resource }
    }

    pub fn name(&self) -> &'a str {
        &self.resource.name
    }

    pub fn binding(&self) -> i32 {
        self.resource.binding
    }

    pub fn data_size(&self) -> usize {
        self.resource.data_size.max(0) as usize
    }

    pub fn members(&self) -> &'a [Resource] {
        &self.resource.members
    }

    pub fn find(&self, member: &str) -> Option<&'a Resource> {
        self.resource.member(member)
    }

    /// Zeroed backing memory sized for the block.
    pub fn allocate(&self) -> Vec<u8> {
        vec![0; self.data_size()]
    }

    /// Packs `value` into `buffer` at the member's offset and strides.
    /// Returns false when the member is absent or the value does not fit.
    pub fn write(&self, buffer: &mut [u8], member: &str, value: impl IntoUniform) -> bool {
        match self.find(member) {
            Some(resource) => value
                .into_uniform()
                .write_packed(buffer, resource.member_layout()),
            None => false,
        }
    }
}

pub(crate) type Setter = fn(&mut Resource, Property, i32);

/// One entry of a decoding table: which property to request and where the
/// answer goes. The request list and the setters come from the same table,
/// so they always line up positionally.
pub(crate) struct Decoder {
    pub property: Property,
    pub apply: Setter,
}

fn set_type(r: &mut Resource, _: Property, v: i32) {
    r.ty = GlslType::from_code(v);
}
fn set_array_size(r: &mut Resource, _: Property, v: i32) {
    r.array_size = v;
}
fn set_offset(r: &mut Resource, _: Property, v: i32) {
    r.offset = v;
}
fn set_block_index(r: &mut Resource, _: Property, v: i32) {
    r.block_index = v;
}
fn set_array_stride(r: &mut Resource, _: Property, v: i32) {
    r.array_stride = v;
}
fn set_matrix_stride(r: &mut Resource, _: Property, v: i32) {
    r.matrix_stride = v;
}
fn set_row_major(r: &mut Resource, _: Property, v: i32) {
    r.row_major = v > 0;
}
fn set_location(r: &mut Resource, _: Property, v: i32) {
    r.location = v;
}
fn set_binding(r: &mut Resource, _: Property, v: i32) {
    r.binding = v;
}
fn set_data_size(r: &mut Resource, _: Property, v: i32) {
    r.data_size = v;
}
fn reserve_members(r: &mut Resource, _: Property, v: i32) {
    r.members.reserve(v.max(0) as usize);
}
fn reserve_compatible(r: &mut Resource, _: Property, v: i32) {
    r.compatible_subroutines.reserve(v.max(0) as usize);
}
fn set_referenced(r: &mut Resource, property: Property, v: i32) {
    if let Property::ReferencedBy(stage) = property {
        if v > 0 {
            r.referenced_by |= stage.bit();
        }
    }
}

static REFERENCED_BY: [Decoder; 6] = [
    Decoder { property: Property::ReferencedBy(ShaderStage::Vertex), apply: set_referenced },
    Decoder { property: Property::ReferencedBy(ShaderStage::TessControl), apply: set_referenced },
    Decoder { property: Property::ReferencedBy(ShaderStage::TessEvaluation), apply: set_referenced },
    Decoder { property: Property::ReferencedBy(ShaderStage::Geometry), apply: set_referenced },
    Decoder { property: Property::ReferencedBy(ShaderStage::Fragment), apply: set_referenced },
    Decoder { property: Property::ReferencedBy(ShaderStage::Compute), apply: set_referenced },
];

pub(crate) static UNIFORM_DECODERS: [Decoder; 8] = [
    Decoder { property: Property::Type, apply: set_type },
    Decoder { property: Property::ArraySize, apply: set_array_size },
    Decoder { property: Property::Offset, apply: set_offset },
    Decoder { property: Property::BlockIndex, apply: set_block_index },
    Decoder { property: Property::ArrayStride, apply: set_array_stride },
    Decoder { property: Property::MatrixStride, apply: set_matrix_stride },
    Decoder { property: Property::IsRowMajor, apply: set_row_major },
    Decoder { property: Property::Location, apply: set_location },
];

pub(crate) static BLOCK_DECODERS: [Decoder; 3] = [
    Decoder { property: Property::BufferBinding, apply: set_binding },
    Decoder { property: Property::BufferDataSize, apply: set_data_size },
    Decoder { property: Property::NumActiveVariables, apply: reserve_members },
];

pub(crate) static IO_DECODERS: [Decoder; 3] = [
    Decoder { property: Property::Type, apply: set_type },
    Decoder { property: Property::ArraySize, apply: set_array_size },
    Decoder { property: Property::Location, apply: set_location },
];

pub(crate) static SUBROUTINE_UNIFORM_DECODERS: [Decoder; 3] = [
    Decoder { property: Property::ArraySize, apply: set_array_size },
    Decoder { property: Property::Location, apply: set_location },
    Decoder { property: Property::NumCompatibleSubroutines, apply: reserve_compatible },
];

/// Decoders for an interface: its own table followed, where the interface
/// tracks stage usage, by one `ReferencedBy` entry per stage.
pub(crate) fn decoders(base: &'static [Decoder], with_stages: bool) -> Vec<&'static Decoder> {
    let mut table: Vec<&'static Decoder> = base.iter().collect();
    if with_stages {
        table.extend(REFERENCED_BY.iter());
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_lookup_accepts_qualified_names() {
        let mut block = Resource::new(0, "Transformations");
        block.members.push(Resource::new(3, "Transformations.View_Model"));
        block.members.push(Resource::new(4, "Projection"));
        assert_eq!(block.member("View_Model").map(|m| m.index), Some(3));
        assert_eq!(
            block.member("Transformations.View_Model").map(|m| m.index),
            Some(3)
        );
        assert_eq!(block.member("Projection").map(|m| m.index), Some(4));
        assert!(block.member("Model").is_none());
    }

    #[test]
    fn decoders_apply_positionally() {
        let table = decoders(&UNIFORM_DECODERS, true);
        let values: Vec<i32> = (0..table.len() as i32).collect();
        let mut resource = Resource::new(0, "x");
        for (decoder, value) in table.iter().zip(values) {
            (decoder.apply)(&mut resource, decoder.property, value);
        }
        assert_eq!(resource.array_size, 1);
        assert_eq!(resource.offset, 2);
        assert_eq!(resource.location, 7);
        // ReferencedBy entries got 8..13, all positive.
        assert_eq!(resource.referenced_by.count_ones(), 6);
    }

    #[test]
    fn block_write_uses_member_offset() {
        let mut block = Resource::new(0, "Light");
        block.data_size = 32;
        let mut color = Resource::new(1, "color");
        color.offset = 16;
        block.members.push(color);

        let view = UniformBlock::new(&block);
        let mut buffer = view.allocate();
        assert!(view.write(&mut buffer, "color", [1.0f32, 0.5, 0.25]));
        assert_eq!(&buffer[16..20], &1.0f32.to_ne_bytes());
        assert!(!view.write(&mut buffer, "missing", 1.0f32));
    }

    #[test]
    fn report_omits_unset_fields() {
        let mut resource = Resource::new(2, "Time");
        resource.ty = GlslType::Float;
        resource.offset = 64;
        resource.referenced_by = ShaderStage::Fragment.bit();
        let json = serde_json::to_value(&resource).unwrap();
        assert_eq!(json["type"], "float");
        assert_eq!(json["offset"], 64);
        assert_eq!(json["referenced_by"], serde_json::json!(["fragment"]));
        assert!(json.get("location").is_none());
    }
}
