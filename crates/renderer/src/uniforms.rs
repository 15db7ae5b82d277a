//! Shape-typed uniform values and the conversions from Rust argument types.
//!
//! The scalar kind comes from the argument's element type and the shape from
//! its arity, so `assign("Light", Vec3::ONE)` and `assign("Light", (1.0, 1.0, 1.0))`
//! produce the same `UniformValue`.
use glam::{
    DMat2, DMat3, DMat4, DVec2, DVec3, DVec4, IVec2, IVec3, IVec4, Mat2, Mat3, Mat4, UVec2,
    UVec3, UVec4, Vec2, Vec3, Vec4,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Float,
    Double,
    Int,
    UInt,
    Bool,
}

impl ScalarKind {
    pub fn size(self) -> usize {
        match self {
            ScalarKind::Double => 8,
            _ => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// One to four components.
    Vector(u8),
    /// `data` is column-major unless `transpose` is set.
    Matrix { columns: u8, rows: u8, transpose: bool },
}

impl Shape {
    pub fn components(self) -> usize {
        match self {
            Shape::Vector(n) => n as usize,
            Shape::Matrix { columns, rows, .. } => columns as usize * rows as usize,
        }
    }

    /// (columns, rows); vectors are a single column.
    pub fn dimensions(self) -> (u8, u8) {
        match self {
            Shape::Vector(n) => (1, n),
            Shape::Matrix { columns, rows, .. } => (columns, rows),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UniformData {
    Float(Vec<f32>),
    Double(Vec<f64>),
    Int(Vec<i32>),
    UInt(Vec<u32>),
}

impl UniformData {
    pub fn len(&self) -> usize {
        match self {
            UniformData::Float(values) => values.len(),
            UniformData::Double(values) => values.len(),
            UniformData::Int(values) => values.len(),
            UniformData::UInt(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn kind(&self) -> ScalarKind {
        match self {
            UniformData::Float(_) => ScalarKind::Float,
            UniformData::Double(_) => ScalarKind::Double,
            UniformData::Int(_) => ScalarKind::Int,
            UniformData::UInt(_) => ScalarKind::UInt,
        }
    }

    fn write_scalar(&self, index: usize, dst: &mut [u8]) {
        match self {
            UniformData::Float(values) => dst[..4].copy_from_slice(&values[index].to_ne_bytes()),
            UniformData::Double(values) => dst[..8].copy_from_slice(&values[index].to_ne_bytes()),
            UniformData::Int(values) => dst[..4].copy_from_slice(&values[index].to_ne_bytes()),
            UniformData::UInt(values) => dst[..4].copy_from_slice(&values[index].to_ne_bytes()),
        }
    }
}

/// A value ready to be forwarded to a uniform: `count()` elements of `shape`.
#[derive(Debug, Clone, PartialEq)]
pub struct UniformValue {
    pub shape: Shape,
    pub data: UniformData,
}

/// Where and how a uniform lives inside a block's backing memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemberLayout {
    pub offset: usize,
    pub array_stride: usize,
    pub matrix_stride: usize,
    pub row_major: bool,
}

impl UniformValue {
    pub fn kind(&self) -> ScalarKind {
        self.data.kind()
    }

    /// Number of array elements carried.
    pub fn count(&self) -> usize {
        let components = self.shape.components().max(1);
        self.data.len() / components
    }

    pub fn describe(&self) -> String {
        let kind = format!("{:?}", self.kind()).to_lowercase();
        let shape = match self.shape {
            Shape::Vector(1) => kind,
            Shape::Vector(n) => format!("{kind}x{n}"),
            Shape::Matrix { columns, rows, .. } => format!("{kind} mat{columns}x{rows}"),
        };
        match self.count() {
            1 => shape,
            n => format!("{shape}[{n}]"),
        }
    }

    /// Packs the value into `dst` following `layout` (std140 strides as
    /// reported by introspection). Returns false, writing nothing, when the
    /// value would not fit.
    pub fn write_packed(&self, dst: &mut [u8], layout: MemberLayout) -> bool {
        let scalar = self.kind().size();
        let (columns, rows) = self.shape.dimensions();
        let (columns, rows) = (columns as usize, rows as usize);
        let element_span = match self.shape {
            Shape::Vector(n) => n as usize * scalar,
            Shape::Matrix { .. } => {
                let major = if layout.row_major { rows } else { columns };
                let minor = if layout.row_major { columns } else { rows };
                let stride = layout.matrix_stride.max(minor * scalar);
                (major - 1) * stride + minor * scalar
            }
        };
        let element_stride = if layout.array_stride == 0 {
            element_span
        } else {
            layout.array_stride
        };

        let count = self.count();
        if count == 0 {
            return false;
        }
        let end = layout.offset + (count - 1) * element_stride + element_span;
        if end > dst.len() {
            return false;
        }

        let per_element = columns * rows;
        for element in 0..count {
            let base = layout.offset + element * element_stride;
            match self.shape {
                Shape::Vector(n) => {
                    for component in 0..n as usize {
                        let at = base + component * scalar;
                        self.data
                            .write_scalar(element * per_element + component, &mut dst[at..]);
                    }
                }
                Shape::Matrix { transpose, .. } => {
                    let stride = layout.matrix_stride.max(
                        if layout.row_major { columns } else { rows } * scalar,
                    );
                    for column in 0..columns {
                        for row in 0..rows {
                            let source = if transpose {
                                row * columns + column
                            } else {
                                column * rows + row
                            };
                            let at = if layout.row_major {
                                base + row * stride + column * scalar
                            } else {
                                base + column * stride + row * scalar
                            };
                            self.data
                                .write_scalar(element * per_element + source, &mut dst[at..]);
                        }
                    }
                }
            }
        }
        true
    }
}

/// Conversion from Rust argument types into a shaped [`UniformValue`].
pub trait IntoUniform {
    fn into_uniform(self) -> UniformValue;
}

impl IntoUniform for UniformValue {
    fn into_uniform(self) -> UniformValue {
        self
    }
}

/// Marks matrix data as row-major so the API transposes it on upload.
#[derive(Debug, Clone, Copy)]
pub struct Transposed<M>(pub M);

impl<M: IntoUniform> IntoUniform for Transposed<M> {
    fn into_uniform(self) -> UniformValue {
        let mut value = self.0.into_uniform();
        if let Shape::Matrix { transpose, .. } = &mut value.shape {
            *transpose = !*transpose;
        }
        value
    }
}

fn vector(data: UniformData, size: u8) -> UniformValue {
    UniformValue {
        shape: Shape::Vector(size),
        data,
    }
}

macro_rules! array_uniform {
    ($ty:ty, $variant:ident, $size:literal) => {
        impl IntoUniform for [$ty; $size] {
            fn into_uniform(self) -> UniformValue {
                vector(UniformData::$variant(self.to_vec()), $size)
            }
        }
    };
}

macro_rules! scalar_uniform {
    ($ty:ty, $variant:ident) => {
        impl IntoUniform for $ty {
            fn into_uniform(self) -> UniformValue {
                vector(UniformData::$variant(vec![self]), 1)
            }
        }

        array_uniform!($ty, $variant, 1);
        array_uniform!($ty, $variant, 2);
        array_uniform!($ty, $variant, 3);
        array_uniform!($ty, $variant, 4);

        impl IntoUniform for ($ty, $ty) {
            fn into_uniform(self) -> UniformValue {
                vector(UniformData::$variant(vec![self.0, self.1]), 2)
            }
        }

        impl IntoUniform for ($ty, $ty, $ty) {
            fn into_uniform(self) -> UniformValue {
                vector(UniformData::$variant(vec![self.0, self.1, self.2]), 3)
            }
        }

        impl IntoUniform for ($ty, $ty, $ty, $ty) {
            fn into_uniform(self) -> UniformValue {
                vector(UniformData::$variant(vec![self.0, self.1, self.2, self.3]), 4)
            }
        }

        /// A scalar array (`uniform float weights[8]`).
        impl IntoUniform for &[$ty] {
            fn into_uniform(self) -> UniformValue {
                vector(UniformData::$variant(self.to_vec()), 1)
            }
        }
    };
}

scalar_uniform!(f32, Float);
scalar_uniform!(f64, Double);
scalar_uniform!(i32, Int);
scalar_uniform!(u32, UInt);

impl IntoUniform for bool {
    fn into_uniform(self) -> UniformValue {
        vector(UniformData::Int(vec![i32::from(self)]), 1)
    }
}

macro_rules! glam_vector_uniform {
    ($ty:ty, $variant:ident, $size:literal) => {
        impl IntoUniform for $ty {
            fn into_uniform(self) -> UniformValue {
                vector(UniformData::$variant(self.to_array().to_vec()), $size)
            }
        }

        impl IntoUniform for &[$ty] {
            fn into_uniform(self) -> UniformValue {
                let data = self.iter().flat_map(|v| v.to_array()).collect();
                vector(UniformData::$variant(data), $size)
            }
        }
    };
}

glam_vector_uniform!(Vec2, Float, 2);
glam_vector_uniform!(Vec3, Float, 3);
glam_vector_uniform!(Vec4, Float, 4);
glam_vector_uniform!(DVec2, Double, 2);
glam_vector_uniform!(DVec3, Double, 3);
glam_vector_uniform!(DVec4, Double, 4);
glam_vector_uniform!(IVec2, Int, 2);
glam_vector_uniform!(IVec3, Int, 3);
glam_vector_uniform!(IVec4, Int, 4);
glam_vector_uniform!(UVec2, UInt, 2);
glam_vector_uniform!(UVec3, UInt, 3);
glam_vector_uniform!(UVec4, UInt, 4);

macro_rules! glam_matrix_uniform {
    ($ty:ty, $variant:ident, $size:literal) => {
        impl IntoUniform for $ty {
            fn into_uniform(self) -> UniformValue {
                UniformValue {
                    shape: Shape::Matrix {
                        columns: $size,
                        rows: $size,
                        transpose: false,
                    },
                    data: UniformData::$variant(self.to_cols_array().to_vec()),
                }
            }
        }

        impl IntoUniform for &[$ty] {
            fn into_uniform(self) -> UniformValue {
                UniformValue {
                    shape: Shape::Matrix {
                        columns: $size,
                        rows: $size,
                        transpose: false,
                    },
                    data: UniformData::$variant(
                        self.iter().flat_map(|m| m.to_cols_array()).collect(),
                    ),
                }
            }
        }
    };
}

glam_matrix_uniform!(Mat2, Float, 2);
glam_matrix_uniform!(Mat3, Float, 3);
glam_matrix_uniform!(Mat4, Float, 4);
glam_matrix_uniform!(DMat2, Double, 2);
glam_matrix_uniform!(DMat3, Double, 3);
glam_matrix_uniform!(DMat4, Double, 4);

#[cfg(test)]
mod tests {
    use super::*;

    fn floats(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    #[test]
    fn tuples_and_glam_agree() {
        assert_eq!((1.0f32, 2.0, 3.0).into_uniform(), Vec3::new(1.0, 2.0, 3.0).into_uniform());
        assert_eq!([1u32, 2].into_uniform().shape, Shape::Vector(2));
        assert_eq!(true.into_uniform().data, UniformData::Int(vec![1]));
    }

    #[test]
    fn transposed_flips_matrix_flag_only() {
        let value = Transposed(Mat4::IDENTITY).into_uniform();
        assert_eq!(
            value.shape,
            Shape::Matrix {
                columns: 4,
                rows: 4,
                transpose: true
            }
        );
        let scalar = Transposed(2.0f32).into_uniform();
        assert_eq!(scalar.shape, Shape::Vector(1));
    }

    #[test]
    fn counts_array_elements() {
        let lights: &[Vec3] = &[Vec3::ZERO, Vec3::ONE];
        let value = lights.into_uniform();
        assert_eq!(value.count(), 2);
        assert_eq!(value.describe(), "floatx3[2]");
        assert_eq!(Mat4::IDENTITY.into_uniform().describe(), "float mat4x4");
    }

    #[test]
    fn packs_vec3_array_with_std140_stride() {
        let lights: &[Vec3] = &[Vec3::new(1.0, 2.0, 3.0), Vec3::new(4.0, 5.0, 6.0)];
        let mut buffer = vec![0u8; 32];
        let layout = MemberLayout {
            offset: 0,
            array_stride: 16,
            ..Default::default()
        };
        assert!(lights.into_uniform().write_packed(&mut buffer, layout));
        assert_eq!(
            floats(&buffer),
            vec![1.0, 2.0, 3.0, 0.0, 4.0, 5.0, 6.0, 0.0]
        );
    }

    #[test]
    fn packs_mat3_with_padded_columns() {
        let matrix = Mat3::from_cols_array(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
        let mut buffer = vec![0u8; 48];
        let layout = MemberLayout {
            offset: 0,
            array_stride: 0,
            matrix_stride: 16,
            row_major: false,
        };
        assert!(matrix.into_uniform().write_packed(&mut buffer, layout));
        assert_eq!(
            floats(&buffer),
            vec![1.0, 2.0, 3.0, 0.0, 4.0, 5.0, 6.0, 0.0, 7.0, 8.0, 9.0, 0.0]
        );
    }

    #[test]
    fn transposed_data_lands_column_major() {
        let row_major = [1.0f32, 2.0, 3.0, 4.0];
        let value = Transposed(Mat2::from_cols_array(&row_major)).into_uniform();
        let mut buffer = vec![0u8; 16];
        let layout = MemberLayout {
            matrix_stride: 8,
            ..Default::default()
        };
        assert!(value.write_packed(&mut buffer, layout));
        assert_eq!(floats(&buffer), vec![1.0, 3.0, 2.0, 4.0]);
    }

    #[test]
    fn refuses_out_of_bounds_writes() {
        let mut buffer = vec![0u8; 8];
        let layout = MemberLayout {
            offset: 4,
            ..Default::default()
        };
        assert!(!Vec2::ONE.into_uniform().write_packed(&mut buffer, layout));
        assert!(buffer.iter().all(|b| *b == 0));
    }
}
