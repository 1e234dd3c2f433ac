//! Reflected shader data layouts
//!
//! [`ReflectedType`] is a tagged-union description of a block's type tree as found in SPIR-V.
//! It is walked generically: [`ReflectedType::size`] for validating host structs against
//! shaders, [`ReflectedType::fields`] for flattened per-field access (editor property tables
//! and byte-level push-constant editing of hot-swappable shaders).

/// Numeric format of a scalar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    /// IEEE float of `bits` width
    Float {
        /// Bit width
        bits: u32,
    },
    /// Integer of `bits` width
    Int {
        /// Bit width
        bits: u32,
        /// Two's complement signed
        signed: bool,
    },
    /// 32-bit boolean
    Bool,
    /// 64-bit physical buffer address
    DeviceAddress,
}

impl ScalarKind {
    /// Size in bytes
    pub fn size(self) -> u32 {
        match self {
            Self::Float { bits } | Self::Int { bits, .. } => bits / 8,
            Self::Bool => 4,
            Self::DeviceAddress => 8,
        }
    }
}

/// One member of a reflected struct
#[derive(Debug, Clone, PartialEq)]
pub struct ReflectedMember {
    /// Member name, empty if stripped
    pub name: String,
    /// Byte offset within the struct
    pub offset: u32,
    /// Member type
    pub ty: ReflectedType,
}

/// Reflected type tree
#[derive(Debug, Clone, PartialEq)]
pub enum ReflectedType {
    /// Single scalar
    Scalar(ScalarKind),
    /// Vector of `count` scalars
    Vector {
        /// Component format
        scalar: ScalarKind,
        /// Component count
        count: u32,
    },
    /// Column-major matrix
    Matrix {
        /// Component format
        scalar: ScalarKind,
        /// Number of column vectors
        columns: u32,
        /// Components per column
        rows: u32,
    },
    /// Array of a single element type
    Array {
        /// Element type
        element: Box<ReflectedType>,
        /// Element count, `None` for runtime-sized arrays
        count: Option<u32>,
        /// Byte stride between elements, when decorated
        stride: Option<u32>,
    },
    /// Struct with explicitly offset members
    Struct(Vec<ReflectedMember>),
}

/// Leaf of a flattened type tree
#[derive(Debug, Clone, PartialEq)]
pub struct ReflectedField {
    /// Dotted path, e.g. `lights[1].color`
    pub path: String,
    /// Absolute byte offset within the root block
    pub offset: u32,
    /// Leaf type (scalar, vector or matrix)
    pub kind: ReflectedType,
}

impl ReflectedType {
    /// Size in bytes, runtime arrays counted as empty
    pub fn size(&self) -> u32 {
        match self {
            Self::Scalar(scalar) => scalar.size(),
            Self::Vector { scalar, count } => scalar.size() * count,
            Self::Matrix { columns, .. } => self.column_stride().unwrap_or(0) * columns,
            Self::Array { element, count, stride } => {
                let stride = stride.unwrap_or_else(|| element.size());
                stride * count.unwrap_or(0)
            }
            Self::Struct(members) => members
                .iter()
                .map(|m| m.offset + m.ty.size())
                .max()
                .unwrap_or(0),
        }
    }

    // Columns of three components are padded to four
    fn column_stride(&self) -> Option<u32> {
        match self {
            Self::Matrix { scalar, rows, .. } => {
                let padded = if *rows == 3 { 4 } else { *rows };
                Some(padded * scalar.size())
            }
            _ => None,
        }
    }

    /// Flatten into leaves with absolute offsets, in declaration order
    pub fn fields(&self) -> Vec<ReflectedField> {
        let mut out = Vec::new();
        self.walk(String::new(), 0, &mut out);
        out
    }

    fn walk(&self, path: String, base: u32, out: &mut Vec<ReflectedField>) {
        match self {
            Self::Scalar(_) | Self::Vector { .. } | Self::Matrix { .. } => out.push(ReflectedField {
                path,
                offset: base,
                kind: self.clone(),
            }),
            Self::Array { element, count, stride } => {
                let stride = stride.unwrap_or_else(|| element.size());
                for index in 0..count.unwrap_or(0) {
                    element.walk(format!("{path}[{index}]"), base + index * stride, out);
                }
            }
            Self::Struct(members) => {
                for member in members {
                    let child = if path.is_empty() {
                        member.name.clone()
                    } else {
                        format!("{path}.{}", member.name)
                    };
                    member.ty.walk(child, base + member.offset, out);
                }
            }
        }
    }

    /// Convert a spirq type; opaque handles and pointers become device addresses
    pub fn from_spirq(ty: &spirq::ty::Type) -> Self {
        use spirq::ty::Type;
        match ty {
            Type::Scalar(scalar) => Self::Scalar(scalar_kind(scalar)),
            Type::Vector(vector) => Self::Vector {
                scalar: scalar_kind(&vector.scalar_ty),
                count: vector.nscalar,
            },
            Type::Matrix(matrix) => Self::Matrix {
                scalar: scalar_kind(&matrix.vector_ty.scalar_ty),
                columns: matrix.nvector,
                rows: matrix.vector_ty.nscalar,
            },
            Type::Array(array) => Self::Array {
                element: Box::new(Self::from_spirq(&array.element_ty)),
                count: array.nelement,
                stride: array.stride.map(|s| s as u32),
            },
            Type::Struct(structure) => Self::Struct(
                structure
                    .members
                    .iter()
                    .map(|member| ReflectedMember {
                        name: member.name.clone().unwrap_or_default(),
                        offset: member.offset.unwrap_or(0) as u32,
                        ty: Self::from_spirq(&member.ty),
                    })
                    .collect(),
            ),
            _ => Self::Scalar(ScalarKind::DeviceAddress),
        }
    }
}

fn scalar_kind(scalar: &spirq::ty::ScalarType) -> ScalarKind {
    use spirq::ty::ScalarType;
    match scalar {
        ScalarType::Float { bits } => ScalarKind::Float { bits: *bits },
        ScalarType::Integer { bits, is_signed } => ScalarKind::Int {
            bits: *bits,
            signed: *is_signed,
        },
        ScalarType::Boolean | ScalarType::Void => ScalarKind::Bool,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const F32: ScalarKind = ScalarKind::Float { bits: 32 };

    fn member(name: &str, offset: u32, ty: ReflectedType) -> ReflectedMember {
        ReflectedMember {
            name: name.to_string(),
            offset,
            ty,
        }
    }

    fn shadow_block() -> ReflectedType {
        ReflectedType::Struct(vec![
            member("vertexBuffer", 0, ReflectedType::Scalar(ScalarKind::DeviceAddress)),
            member("modelBuffer", 8, ReflectedType::Scalar(ScalarKind::Int { bits: 64, signed: false })),
            member("projectionBuffer", 16, ReflectedType::Scalar(ScalarKind::DeviceAddress)),
            member("projectionIndex", 24, ReflectedType::Scalar(ScalarKind::Int { bits: 32, signed: false })),
        ])
    }

    #[test]
    fn test_struct_size_is_end_of_last_member() {
        assert_eq!(shadow_block().size(), 28);
    }

    #[test]
    fn test_matrix_columns_padded() {
        let mat4 = ReflectedType::Matrix { scalar: F32, columns: 4, rows: 4 };
        let mat3 = ReflectedType::Matrix { scalar: F32, columns: 3, rows: 3 };
        assert_eq!(mat4.size(), 64);
        assert_eq!(mat3.size(), 48);
    }

    #[test]
    fn test_fields_flatten_arrays_and_nesting() {
        let light = ReflectedType::Struct(vec![
            member("color", 0, ReflectedType::Vector { scalar: F32, count: 4 }),
            member("strength", 16, ReflectedType::Scalar(F32)),
        ]);
        let block = ReflectedType::Struct(vec![
            member("view", 0, ReflectedType::Matrix { scalar: F32, columns: 4, rows: 4 }),
            member(
                "lights",
                64,
                ReflectedType::Array { element: Box::new(light), count: Some(2), stride: Some(32) },
            ),
        ]);

        let fields = block.fields();
        let paths: Vec<_> = fields.iter().map(|f| (f.path.as_str(), f.offset)).collect();
        assert_eq!(
            paths,
            vec![
                ("view", 0),
                ("lights[0].color", 64),
                ("lights[0].strength", 80),
                ("lights[1].color", 96),
                ("lights[1].strength", 112),
            ]
        );
        assert_eq!(block.size(), 128);
    }

    #[test]
    fn test_runtime_array_counts_as_empty() {
        let runtime = ReflectedType::Array { element: Box::new(ReflectedType::Scalar(F32)), count: None, stride: Some(4) };
        assert_eq!(runtime.size(), 0);
        assert!(runtime.fields().is_empty());
    }
}
