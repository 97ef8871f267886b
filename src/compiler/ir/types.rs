//! IR type definitions and the interning type table
//!
//! Types are structural: two requests for the same shape always produce the
//! same [`TypeId`]. Struct types are nominal and refer to a [`StructId`]
//! declared on the module.

use super::instruction::InstId;
use std::collections::HashMap;

/// Interned type handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

/// Struct declaration handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StructId(pub u32);

/// Module-unique field identity
///
/// Legalized copies of a struct keep the keys of the fields they retain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldKey(pub u32);

/// Scalar element kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    /// `bool`
    Bool,
    /// 32-bit signed integer
    Int,
    /// 32-bit unsigned integer
    UInt,
    /// 64-bit signed integer
    Int64,
    /// 64-bit unsigned integer
    UInt64,
    /// 16-bit float
    Half,
    /// 32-bit float
    Float,
    /// 64-bit float
    Double,
}

impl ScalarKind {
    /// True for the integer kinds
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            ScalarKind::Int | ScalarKind::UInt | ScalarKind::Int64 | ScalarKind::UInt64
        )
    }

    /// Storage size in bytes
    pub fn size_in_bytes(self) -> u32 {
        match self {
            ScalarKind::Half => 2,
            ScalarKind::Bool | ScalarKind::Int | ScalarKind::UInt | ScalarKind::Float => 4,
            ScalarKind::Int64 | ScalarKind::UInt64 | ScalarKind::Double => 8,
        }
    }
}

/// Texture dimensionality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureShape {
    /// 1D texture
    Texture1D,
    /// 2D texture
    Texture2D,
    /// 3D texture
    Texture3D,
    /// Cube map
    TextureCube,
    /// Typed buffer
    TextureBuffer,
}

/// Access mode of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceAccess {
    /// Read-only
    Read,
    /// Read-write
    ReadWrite,
    /// Rasterizer-ordered read-write
    RasterOrdered,
    /// Append-only
    Append,
    /// Consume-only
    Consume,
}

/// Texture/image type payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureType {
    /// Dimensionality
    pub shape: TextureShape,
    /// Access mode
    pub access: ResourceAccess,
    /// Multisampled
    pub multisample: bool,
    /// Arrayed
    pub array: bool,
    /// Depth-comparison texture
    pub shadow: bool,
    /// Element type (scalar or vector)
    pub element: TypeId,
}

impl TextureType {
    /// Read-only, single-sampled, non-array texture
    pub fn sampled(shape: TextureShape, element: TypeId) -> Self {
        Self {
            shape,
            access: ResourceAccess::Read,
            multisample: false,
            array: false,
            shadow: false,
            element,
        }
    }
}

/// Uniform-buffer-like container kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformBufferKind {
    /// `ConstantBuffer<T>` / `cbuffer`
    ConstantBuffer,
    /// `TextureBuffer<T>` / `tbuffer`
    TextureBuffer,
    /// `ParameterBlock<T>`
    ParameterBlock,
    /// GLSL shader storage block
    ShaderStorage,
}

/// Pointer-like wrapper kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PtrKind {
    /// Plain address (locals, globals)
    Ptr,
    /// `out` parameter
    Out,
    /// `inout` parameter
    InOut,
}

/// Geometry stream primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// `PointStream`
    Point,
    /// `LineStream`
    Line,
    /// `TriangleStream`
    Triangle,
}

/// Tessellation patch direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatchKind {
    /// `InputPatch`
    Input,
    /// `OutputPatch`
    Output,
}

/// IR type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    /// No value
    Void,
    /// Scalar
    Scalar(ScalarKind),
    /// Vector of `count` scalars
    Vector {
        /// Element kind
        element: ScalarKind,
        /// Component count (2..=4)
        count: u32,
    },
    /// Matrix
    Matrix {
        /// Element kind
        element: ScalarKind,
        /// Row count
        rows: u32,
        /// Column count
        columns: u32,
    },
    /// Sized or unsized array
    Array {
        /// Element type
        element: TypeId,
        /// Element count, `None` when unsized
        count: Option<u32>,
    },
    /// Reference to a struct declaration
    Struct(StructId),
    /// Texture or image
    Texture(TextureType),
    /// Sampler state
    Sampler {
        /// Comparison sampler
        comparison: bool,
    },
    /// Uniform-buffer-like container of `element`
    UniformBuffer {
        /// Container kind
        kind: UniformBufferKind,
        /// Element type
        element: TypeId,
    },
    /// Structured buffer of `element`
    StructuredBuffer {
        /// Access mode
        access: ResourceAccess,
        /// Element type
        element: TypeId,
    },
    /// Pointer-like wrapper
    Ptr {
        /// Wrapper kind
        kind: PtrKind,
        /// Pointee
        pointee: TypeId,
    },
    /// Geometry-shader output stream
    StreamOutput {
        /// Primitive kind
        kind: StreamKind,
        /// Vertex type
        element: TypeId,
    },
    /// Tessellation patch
    Patch {
        /// Direction
        kind: PatchKind,
        /// Control point type
        element: TypeId,
        /// Control point count
        count: u32,
    },
    /// Placeholder for the n-th type parameter of a generic function
    GenericParam(u32),
    /// The conforming type inside an interface requirement signature
    This,
    /// Interface-typed (existential) value; refers to the interface declaration
    Interface(InstId),
    /// Fixed-size opaque payload able to hold any marshallable value
    AnyValue {
        /// Payload size in bytes
        size: u32,
    },
    /// Dynamic identity of a witness table
    WitnessTableId,
    /// Dynamic identity of a concrete type
    RttiHandle,
    /// Function signature
    Func {
        /// Parameter types
        params: Vec<TypeId>,
        /// Result type
        result: TypeId,
    },
}

/// Interning table for [`Type`]
#[derive(Debug, Clone, Default)]
pub struct TypeTable {
    types: Vec<Type>,
    lookup: HashMap<Type, TypeId>,
}

impl TypeTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a type, returning the existing id for a structurally equal one
    pub fn intern(&mut self, ty: Type) -> TypeId {
        if let Some(&id) = self.lookup.get(&ty) {
            return id;
        }
        let id = TypeId(self.types.len() as u32);
        self.types.push(ty.clone());
        self.lookup.insert(ty, id);
        id
    }

    /// Look up an interned type
    pub fn get(&self, id: TypeId) -> &Type {
        &self.types[id.0 as usize]
    }

    /// Number of distinct types
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// True when no type has been interned
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// `void`
    pub fn void(&mut self) -> TypeId {
        self.intern(Type::Void)
    }

    /// Scalar of the given kind
    pub fn scalar(&mut self, kind: ScalarKind) -> TypeId {
        self.intern(Type::Scalar(kind))
    }

    /// `float`
    pub fn float(&mut self) -> TypeId {
        self.scalar(ScalarKind::Float)
    }

    /// `int`
    pub fn int(&mut self) -> TypeId {
        self.scalar(ScalarKind::Int)
    }

    /// `uint`
    pub fn uint(&mut self) -> TypeId {
        self.scalar(ScalarKind::UInt)
    }

    /// `bool`
    pub fn bool(&mut self) -> TypeId {
        self.scalar(ScalarKind::Bool)
    }

    /// Vector type
    pub fn vector(&mut self, element: ScalarKind, count: u32) -> TypeId {
        self.intern(Type::Vector { element, count })
    }

    /// Matrix type
    pub fn matrix(&mut self, element: ScalarKind, rows: u32, columns: u32) -> TypeId {
        self.intern(Type::Matrix {
            element,
            rows,
            columns,
        })
    }

    /// Array type
    pub fn array(&mut self, element: TypeId, count: Option<u32>) -> TypeId {
        self.intern(Type::Array { element, count })
    }

    /// Pointer-like wrapper
    pub fn ptr(&mut self, kind: PtrKind, pointee: TypeId) -> TypeId {
        self.intern(Type::Ptr { kind, pointee })
    }

    /// Function signature
    pub fn func(&mut self, params: Vec<TypeId>, result: TypeId) -> TypeId {
        self.intern(Type::Func { params, result })
    }

    /// True for `void`
    pub fn is_void(&self, id: TypeId) -> bool {
        matches!(self.get(id), Type::Void)
    }

    /// Strip one pointer-like wrapper, if any
    pub fn value_type(&self, id: TypeId) -> TypeId {
        match self.get(id) {
            Type::Ptr { pointee, .. } => *pointee,
            _ => id,
        }
    }

    /// Element kind of a scalar, vector or matrix type
    pub fn scalar_kind(&self, id: TypeId) -> Option<ScalarKind> {
        match self.get(id) {
            Type::Scalar(kind) => Some(*kind),
            Type::Vector { element, .. } | Type::Matrix { element, .. } => Some(*element),
            _ => None,
        }
    }

    /// Component count of a vector (1 for scalars)
    pub fn vector_count(&self, id: TypeId) -> Option<u32> {
        match self.get(id) {
            Type::Scalar(_) => Some(1),
            Type::Vector { count, .. } => Some(*count),
            _ => None,
        }
    }

    /// Opaque resource handles: textures, samplers and structured buffers
    pub fn is_resource(&self, id: TypeId) -> bool {
        matches!(
            self.get(id),
            Type::Texture(_) | Type::Sampler { .. } | Type::StructuredBuffer { .. }
        )
    }

    /// Signature parts of a function type
    pub fn func_signature(&self, id: TypeId) -> Option<(&[TypeId], TypeId)> {
        match self.get(id) {
            Type::Func { params, result } => Some((params, *result)),
            _ => None,
        }
    }

    /// Rebuild `ty` bottom-up, letting `f` substitute any type it recognizes.
    ///
    /// `f` is consulted first for every visited type; when it returns `None`
    /// composite types are rebuilt from their rewritten children. Struct
    /// declarations are nominal and are not entered.
    pub fn rewrite(
        &mut self,
        ty: TypeId,
        f: &mut dyn FnMut(&mut TypeTable, TypeId) -> Option<TypeId>,
        memo: &mut HashMap<TypeId, TypeId>,
    ) -> TypeId {
        if let Some(&done) = memo.get(&ty) {
            return done;
        }
        let result = match f(self, ty) {
            Some(replacement) => replacement,
            None => match self.get(ty).clone() {
                Type::Array { element, count } => {
                    let element = self.rewrite(element, f, memo);
                    self.array(element, count)
                }
                Type::Ptr { kind, pointee } => {
                    let pointee = self.rewrite(pointee, f, memo);
                    self.ptr(kind, pointee)
                }
                Type::UniformBuffer { kind, element } => {
                    let element = self.rewrite(element, f, memo);
                    self.intern(Type::UniformBuffer { kind, element })
                }
                Type::StructuredBuffer { access, element } => {
                    let element = self.rewrite(element, f, memo);
                    self.intern(Type::StructuredBuffer { access, element })
                }
                Type::StreamOutput { kind, element } => {
                    let element = self.rewrite(element, f, memo);
                    self.intern(Type::StreamOutput { kind, element })
                }
                Type::Patch {
                    kind,
                    element,
                    count,
                } => {
                    let element = self.rewrite(element, f, memo);
                    self.intern(Type::Patch {
                        kind,
                        element,
                        count,
                    })
                }
                Type::Func { params, result } => {
                    let params = params
                        .into_iter()
                        .map(|p| self.rewrite(p, f, memo))
                        .collect();
                    let result = self.rewrite(result, f, memo);
                    self.func(params, result)
                }
                _ => ty,
            },
        };
        memo.insert(ty, result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_dedup() {
        let mut table = TypeTable::new();
        let a = table.vector(ScalarKind::Float, 4);
        let b = table.vector(ScalarKind::Float, 4);
        let c = table.vector(ScalarKind::Float, 3);
        assert_eq!(a, b);
        assert_ne!(a, c);

        let arr1 = table.array(a, Some(3));
        let arr2 = table.array(b, Some(3));
        assert_eq!(arr1, arr2);
    }

    #[test]
    fn test_rewrite_replaces_nested_types() {
        let mut table = TypeTable::new();
        let handle = table.intern(Type::WitnessTableId);
        let arr = table.array(handle, Some(2));
        let ptr = table.ptr(PtrKind::Ptr, arr);

        let u64_ty = table.scalar(ScalarKind::UInt64);
        let mut memo = HashMap::new();
        let rewritten = table.rewrite(
            ptr,
            &mut |t, id| matches!(t.get(id), Type::WitnessTableId).then_some(u64_ty),
            &mut memo,
        );

        let expected_arr = table.array(u64_ty, Some(2));
        assert_eq!(rewritten, table.ptr(PtrKind::Ptr, expected_arr));
    }
}
