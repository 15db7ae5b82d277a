use serde::Serialize;

use crate::uniforms::ScalarKind;

macro_rules! glsl_types {
    ($($variant:ident = $code:literal, $name:literal;)*) => {
        /// Declared type of a reflected resource. Codes match the GL type
        /// enumerants so dumps line up with other GL tooling.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
        #[serde(into = "&'static str")]
        pub enum GlslType {
            $($variant,)*
            Unknown(i32),
        }

        impl GlslType {
            pub fn code(self) -> i32 {
                match self {
                    $(GlslType::$variant => $code,)*
                    GlslType::Unknown(code) => code,
                }
            }

            pub fn from_code(code: i32) -> Self {
                match code {
                    $($code => GlslType::$variant,)*
                    other => GlslType::Unknown(other),
                }
            }

            pub fn glsl_name(self) -> &'static str {
                match self {
                    $(GlslType::$variant => $name,)*
                    GlslType::Unknown(_) => "unknown",
                }
            }
        }
    };
}

glsl_types! {
    Float = 0x1406, "float";
    Vec2 = 0x8B50, "vec2";
    Vec3 = 0x8B51, "vec3";
    Vec4 = 0x8B52, "vec4";
    Double = 0x140A, "double";
    DVec2 = 0x8FFC, "dvec2";
    DVec3 = 0x8FFD, "dvec3";
    DVec4 = 0x8FFE, "dvec4";
    Int = 0x1404, "int";
    IVec2 = 0x8B53, "ivec2";
    IVec3 = 0x8B54, "ivec3";
    IVec4 = 0x8B55, "ivec4";
    UInt = 0x1405, "uint";
    UVec2 = 0x8DC6, "uvec2";
    UVec3 = 0x8DC7, "uvec3";
    UVec4 = 0x8DC8, "uvec4";
    Bool = 0x8B56, "bool";
    BVec2 = 0x8B57, "bvec2";
    BVec3 = 0x8B58, "bvec3";
    BVec4 = 0x8B59, "bvec4";
    Mat2 = 0x8B5A, "mat2";
    Mat3 = 0x8B5B, "mat3";
    Mat4 = 0x8B5C, "mat4";
    Mat2x3 = 0x8B65, "mat2x3";
    Mat2x4 = 0x8B66, "mat2x4";
    Mat3x2 = 0x8B67, "mat3x2";
    Mat3x4 = 0x8B68, "mat3x4";
    Mat4x2 = 0x8B69, "mat4x2";
    Mat4x3 = 0x8B6A, "mat4x3";
    DMat2 = 0x8F46, "dmat2";
    DMat3 = 0x8F47, "dmat3";
    DMat4 = 0x8F48, "dmat4";
    Sampler2D = 0x8B5E, "sampler2D";
    Sampler3D = 0x8B5F, "sampler3D";
    SamplerCube = 0x8B60, "samplerCube";
    Texture1D = 0x9001, "texture1D";
    Texture2D = 0x9002, "texture2D";
    Texture3D = 0x9003, "texture3D";
    TextureCube = 0x9004, "textureCube";
    Texture2DArray = 0x9005, "texture2DArray";
    Sampler = 0x9006, "sampler";
    SamplerShadow = 0x9007, "samplerShadow";
}

impl From<GlslType> for &'static str {
    fn from(value: GlslType) -> Self {
        value.glsl_name()
    }
}

impl Default for GlslType {
    fn default() -> Self {
        GlslType::Unknown(0)
    }
}

/// Component layout of a non-opaque type: scalar kind, columns and rows.
/// Vectors have one column; scalars are 1x1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeShape {
    pub kind: ScalarKind,
    pub columns: u8,
    pub rows: u8,
}

impl GlslType {
    pub fn vector(kind: ScalarKind, size: u8) -> Self {
        use GlslType::*;
        match (kind, size) {
            (ScalarKind::Float, 1) => Float,
            (ScalarKind::Float, 2) => Vec2,
            (ScalarKind::Float, 3) => Vec3,
            (ScalarKind::Float, 4) => Vec4,
            (ScalarKind::Double, 1) => Double,
            (ScalarKind::Double, 2) => DVec2,
            (ScalarKind::Double, 3) => DVec3,
            (ScalarKind::Double, 4) => DVec4,
            (ScalarKind::Int, 1) => Int,
            (ScalarKind::Int, 2) => IVec2,
            (ScalarKind::Int, 3) => IVec3,
            (ScalarKind::Int, 4) => IVec4,
            (ScalarKind::UInt, 1) => UInt,
            (ScalarKind::UInt, 2) => UVec2,
            (ScalarKind::UInt, 3) => UVec3,
            (ScalarKind::UInt, 4) => UVec4,
            (ScalarKind::Bool, 1) => Bool,
            (ScalarKind::Bool, 2) => BVec2,
            (ScalarKind::Bool, 3) => BVec3,
            (ScalarKind::Bool, 4) => BVec4,
            _ => Unknown(0),
        }
    }

    pub fn matrix(kind: ScalarKind, columns: u8, rows: u8) -> Self {
        use GlslType::*;
        match (kind, columns, rows) {
            (ScalarKind::Float, 2, 2) => Mat2,
            (ScalarKind::Float, 3, 3) => Mat3,
            (ScalarKind::Float, 4, 4) => Mat4,
            (ScalarKind::Float, 2, 3) => Mat2x3,
            (ScalarKind::Float, 2, 4) => Mat2x4,
            (ScalarKind::Float, 3, 2) => Mat3x2,
            (ScalarKind::Float, 3, 4) => Mat3x4,
            (ScalarKind::Float, 4, 2) => Mat4x2,
            (ScalarKind::Float, 4, 3) => Mat4x3,
            (ScalarKind::Double, 2, 2) => DMat2,
            (ScalarKind::Double, 3, 3) => DMat3,
            (ScalarKind::Double, 4, 4) => DMat4,
            _ => Unknown(0),
        }
    }

    pub fn shape(self) -> Option<TypeShape> {
        use GlslType::*;
        let (kind, columns, rows) = match self {
            Float => (ScalarKind::Float, 1, 1),
            Vec2 => (ScalarKind::Float, 1, 2),
            Vec3 => (ScalarKind::Float, 1, 3),
            Vec4 => (ScalarKind::Float, 1, 4),
            Double => (ScalarKind::Double, 1, 1),
            DVec2 => (ScalarKind::Double, 1, 2),
            DVec3 => (ScalarKind::Double, 1, 3),
            DVec4 => (ScalarKind::Double, 1, 4),
            Int => (ScalarKind::Int, 1, 1),
            IVec2 => (ScalarKind::Int, 1, 2),
            IVec3 => (ScalarKind::Int, 1, 3),
            IVec4 => (ScalarKind::Int, 1, 4),
            UInt => (ScalarKind::UInt, 1, 1),
            UVec2 => (ScalarKind::UInt, 1, 2),
            UVec3 => (ScalarKind::UInt, 1, 3),
            UVec4 => (ScalarKind::UInt, 1, 4),
            Bool => (ScalarKind::Bool, 1, 1),
            BVec2 => (ScalarKind::Bool, 1, 2),
            BVec3 => (ScalarKind::Bool, 1, 3),
            BVec4 => (ScalarKind::Bool, 1, 4),
            Mat2 => (ScalarKind::Float, 2, 2),
            Mat3 => (ScalarKind::Float, 3, 3),
            Mat4 => (ScalarKind::Float, 4, 4),
            Mat2x3 => (ScalarKind::Float, 2, 3),
            Mat2x4 => (ScalarKind::Float, 2, 4),
            Mat3x2 => (ScalarKind::Float, 3, 2),
            Mat3x4 => (ScalarKind::Float, 3, 4),
            Mat4x2 => (ScalarKind::Float, 4, 2),
            Mat4x3 => (ScalarKind::Float, 4, 3),
            DMat2 => (ScalarKind::Double, 2, 2),
            DMat3 => (ScalarKind::Double, 3, 3),
            DMat4 => (ScalarKind::Double, 4, 4),
            _ => return None,
        };
        Some(TypeShape {
            kind,
            columns,
            rows,
        })
    }

    pub fn is_opaque(self) -> bool {
        use GlslType::*;
        matches!(
            self,
            Sampler2D
                | Sampler3D
                | SamplerCube
                | Texture1D
                | Texture2D
                | Texture3D
                | TextureCube
                | Texture2DArray
                | Sampler
                | SamplerShadow
        )
    }

    pub fn is_texture(self) -> bool {
        use GlslType::*;
        matches!(
            self,
            Texture1D | Texture2D | Texture3D | TextureCube | Texture2DArray
        )
    }
}
