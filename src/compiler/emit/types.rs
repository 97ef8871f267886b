//! Type spelling and struct declarations
//!
//! A type is spelled as a prefix and a suffix around the declared name so
//! that array extents land after it (`float name[4]`).

use super::EmitContext;
use crate::compiler::ir::{
    PatchKind, PtrKind, ResourceAccess, ScalarKind, StreamKind, StructId, TextureShape, TextureType,
    Type, TypeId, UniformBufferKind,
};
use crate::compiler::target::Dialect;
use crate::{Error, Result};

/// Version introducing `double` in GLSL
const GLSL_DOUBLE_VERSION: u32 = 400;
/// Version introducing shader storage blocks in GLSL
pub(super) const GLSL_STORAGE_BUFFER_VERSION: u32 = 430;
const GLSL_INT64_EXTENSION: &str = "GL_ARB_gpu_shader_int64";

/// Text placed before and after the declared name
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct TypeSpelling {
    pub pre: String,
    pub post: String,
}

impl TypeSpelling {
    fn plain(text: impl Into<String>) -> Self {
        Self {
            pre: text.into(),
            post: String::new(),
        }
    }

    /// `pre name post`
    pub fn declare(&self, name: &str) -> String {
        format!("{} {}{}", self.pre, name, self.post)
    }

    /// The type on its own, e.g. inside a constructor
    pub fn bare(&self) -> String {
        format!("{}{}", self.pre, self.post)
    }
}

fn hlsl_scalar(kind: ScalarKind) -> &'static str {
    match kind {
        ScalarKind::Bool => "bool",
        ScalarKind::Int => "int",
        ScalarKind::UInt => "uint",
        ScalarKind::Int64 => "int64_t",
        ScalarKind::UInt64 => "uint64_t",
        ScalarKind::Half => "half",
        ScalarKind::Float => "float",
        ScalarKind::Double => "double",
    }
}

fn glsl_scalar(kind: ScalarKind) -> &'static str {
    match kind {
        ScalarKind::Bool => "bool",
        ScalarKind::Int => "int",
        ScalarKind::UInt => "uint",
        ScalarKind::Int64 => "int64_t",
        ScalarKind::UInt64 => "uint64_t",
        // promoted; GLSL has no 16-bit float without extensions
        ScalarKind::Half | ScalarKind::Float => "float",
        ScalarKind::Double => "double",
    }
}

/// Element prefix for GLSL vector, matrix and texture names
pub(super) fn glsl_type_prefix(kind: ScalarKind) -> &'static str {
    match kind {
        ScalarKind::Half | ScalarKind::Float => "",
        ScalarKind::Int => "i",
        ScalarKind::UInt => "u",
        ScalarKind::Bool => "b",
        ScalarKind::Double => "d",
        ScalarKind::Int64 => "i64",
        ScalarKind::UInt64 => "u64",
    }
}

fn shape_suffix(shape: TextureShape) -> &'static str {
    match shape {
        TextureShape::Texture1D => "1D",
        TextureShape::Texture2D => "2D",
        TextureShape::Texture3D => "3D",
        TextureShape::TextureCube => "Cube",
        TextureShape::TextureBuffer => "Buffer",
    }
}

fn hlsl_access_prefix(access: ResourceAccess) -> &'static str {
    match access {
        ResourceAccess::Read => "",
        ResourceAccess::ReadWrite => "RW",
        ResourceAccess::RasterOrdered => "RasterizerOrdered",
        ResourceAccess::Append => "Append",
        ResourceAccess::Consume => "Consume",
    }
}

impl EmitContext<'_> {
    /// Record the version or extension a scalar kind needs on GLSL
    fn require_scalar_support(&mut self, kind: ScalarKind) {
        if self.target.dialect != Dialect::Glsl {
            return;
        }
        match kind {
            ScalarKind::Double => self.extensions.require_version(GLSL_DOUBLE_VERSION),
            ScalarKind::Int64 | ScalarKind::UInt64 => {
                self.extensions.require_extension(GLSL_INT64_EXTENSION)
            }
            _ => {}
        }
    }

    /// Report a type the dialect cannot spell, once per type
    fn unsupported_type(&mut self, ty: TypeId, what: &str) -> TypeSpelling {
        if self.reported_types.insert(ty) {
            let message = format!(
                "{} has no spelling in {}",
                what,
                self.target.dialect.as_str().to_uppercase()
            );
            self.error(message);
        }
        TypeSpelling::plain(format!("/* unsupported {} */", what))
    }

    /// Spell `ty`, registering any version or extension it requires
    pub(super) fn spell_type(&mut self, ty: TypeId) -> Result<TypeSpelling> {
        let glsl = self.is_glsl();
        let spelling = match self.module.types.get(ty).clone() {
            Type::Void => TypeSpelling::plain("void"),
            Type::Scalar(kind) => {
                self.require_scalar_support(kind);
                TypeSpelling::plain(if glsl { glsl_scalar(kind) } else { hlsl_scalar(kind) })
            }
            Type::Vector { element, count } => {
                self.require_scalar_support(element);
                if glsl {
                    TypeSpelling::plain(format!("{}vec{}", glsl_type_prefix(element), count))
                } else {
                    TypeSpelling::plain(format!("{}{}", hlsl_scalar(element), count))
                }
            }
            Type::Matrix {
                element,
                rows,
                columns,
            } => {
                if glsl {
                    match element {
                        ScalarKind::Float | ScalarKind::Half | ScalarKind::Double => {
                            self.require_scalar_support(element);
                            TypeSpelling::plain(format!(
                                "{}mat{}x{}",
                                glsl_type_prefix(element),
                                rows,
                                columns
                            ))
                        }
                        _ => return Ok(self.unsupported_type(ty, "a non-floating-point matrix")),
                    }
                } else {
                    TypeSpelling::plain(format!("{}{}x{}", hlsl_scalar(element), rows, columns))
                }
            }
            Type::Array { element, count } => {
                let inner = self.spell_type(element)?;
                let extent = match count {
                    Some(n) => format!("[{}]", n),
                    None => "[]".to_string(),
                };
                TypeSpelling {
                    pre: inner.pre,
                    post: format!("{}{}", extent, inner.post),
                }
            }
            Type::Struct(id) => TypeSpelling::plain(self.module.struct_decl(id).name.clone()),
            Type::Texture(texture) => {
                if glsl {
                    let base = match texture.access {
                        ResourceAccess::Read => "texture",
                        ResourceAccess::ReadWrite | ResourceAccess::RasterOrdered => "image",
                        ResourceAccess::Append | ResourceAccess::Consume => {
                            return Ok(self.unsupported_type(ty, "an append/consume texture"))
                        }
                    };
                    TypeSpelling::plain(self.glsl_texture_name(&texture, base))
                } else {
                    let element = self.spell_type(texture.element)?.bare();
                    let shape = match texture.shape {
                        TextureShape::TextureBuffer => "Buffer".to_string(),
                        shape => format!("Texture{}", shape_suffix(shape)),
                    };
                    TypeSpelling::plain(format!(
                        "{}{}{}{}<{}>",
                        hlsl_access_prefix(texture.access),
                        shape,
                        if texture.multisample { "MS" } else { "" },
                        if texture.array { "Array" } else { "" },
                        element
                    ))
                }
            }
            Type::Sampler { comparison } => TypeSpelling::plain(match (glsl, comparison) {
                (false, false) => "SamplerState",
                (false, true) => "SamplerComparisonState",
                (true, false) => "sampler",
                (true, true) => "samplerShadow",
            }),
            Type::UniformBuffer { kind, element } => {
                if glsl {
                    return Ok(self.unsupported_type(ty, "a uniform block used as a value"));
                }
                let wrapper = match kind {
                    UniformBufferKind::ConstantBuffer | UniformBufferKind::ParameterBlock => {
                        "ConstantBuffer"
                    }
                    UniformBufferKind::TextureBuffer => "TextureBuffer",
                    UniformBufferKind::ShaderStorage => {
                        return Ok(self.unsupported_type(ty, "a shader storage block"))
                    }
                };
                let element = self.spell_type(element)?.bare();
                TypeSpelling::plain(format!("{}<{}>", wrapper, element))
            }
            Type::StructuredBuffer { access, element } => {
                if glsl {
                    return Ok(self.unsupported_type(ty, "a structured buffer used as a value"));
                }
                let element = self.spell_type(element)?.bare();
                TypeSpelling::plain(format!(
                    "{}StructuredBuffer<{}>",
                    hlsl_access_prefix(access),
                    element
                ))
            }
            Type::Ptr { pointee, .. } => self.spell_type(pointee)?,
            Type::StreamOutput { kind, element } => {
                if glsl {
                    return Ok(self.unsupported_type(ty, "a geometry output stream"));
                }
                let stream = match kind {
                    StreamKind::Point => "PointStream",
                    StreamKind::Line => "LineStream",
                    StreamKind::Triangle => "TriangleStream",
                };
                let element = self.spell_type(element)?.bare();
                TypeSpelling::plain(format!("{}<{}>", stream, element))
            }
            Type::Patch {
                kind,
                element,
                count,
            } => {
                let inner = self.spell_type(element)?;
                if glsl {
                    TypeSpelling {
                        pre: inner.pre,
                        post: format!("[{}]{}", count, inner.post),
                    }
                } else {
                    let patch = match kind {
                        PatchKind::Input => "InputPatch",
                        PatchKind::Output => "OutputPatch",
                    };
                    TypeSpelling::plain(format!("{}<{}, {}>", patch, inner.bare(), count))
                }
            }
            Type::GenericParam(_)
            | Type::This
            | Type::Interface(_)
            | Type::AnyValue { .. }
            | Type::WitnessTableId
            | Type::RttiHandle
            | Type::Func { .. } => {
                return Err(Error::invariant(format!(
                    "type `{}` reached emission",
                    crate::compiler::debug::format_type(self.module, ty)
                )))
            }
        };
        Ok(spelling)
    }

    /// `type name` for a declaration
    pub(super) fn declarator(&mut self, ty: TypeId, name: &str) -> Result<String> {
        Ok(self.spell_type(ty)?.declare(name))
    }

    /// `[in|out|inout] type name` for a function parameter
    pub(super) fn param_declarator(&mut self, ty: TypeId, name: &str) -> Result<String> {
        let (direction, value_ty) = match self.module.types.get(ty) {
            Type::Ptr {
                kind: PtrKind::Out,
                pointee,
            } => ("out ", *pointee),
            Type::Ptr {
                kind: PtrKind::InOut,
                pointee,
            } => ("inout ", *pointee),
            _ => ("", ty),
        };
        Ok(format!("{}{}", direction, self.declarator(value_ty, name)?))
    }

    /// GLSL texture-like name: `[iu]<base><shape>[MS][Array]`
    pub(super) fn glsl_texture_name(&mut self, texture: &TextureType, base: &str) -> String {
        let prefix = match self.module.types.scalar_kind(texture.element) {
            Some(kind) => {
                self.require_scalar_support(kind);
                glsl_type_prefix(kind)
            }
            None => "",
        };
        format!(
            "{}{}{}{}{}",
            prefix,
            base,
            shape_suffix(texture.shape),
            if texture.multisample { "MS" } else { "" },
            if texture.array { "Array" } else { "" }
        )
    }

    // =========================================================================
    // Struct declarations
    // =========================================================================

    /// Declare every struct reachable from `ty` that has not been declared,
    /// field types before the structs that contain them
    pub(super) fn ensure_types_declared(&mut self, ty: TypeId) -> Result<()> {
        match self.module.types.get(ty).clone() {
            Type::Struct(id) => self.ensure_struct_declared(id),
            Type::Array { element, .. }
            | Type::UniformBuffer { element, .. }
            | Type::StructuredBuffer { element, .. }
            | Type::StreamOutput { element, .. }
            | Type::Patch { element, .. } => self.ensure_types_declared(element),
            Type::Ptr { pointee, .. } => self.ensure_types_declared(pointee),
            Type::Func { params, result } => {
                for param in params {
                    self.ensure_types_declared(param)?;
                }
                self.ensure_types_declared(result)
            }
            _ => Ok(()),
        }
    }

    fn ensure_struct_declared(&mut self, id: StructId) -> Result<()> {
        if !self.declared_structs.insert(id) {
            return Ok(());
        }
        let module = self.module;
        let decl = module.struct_decl(id);
        for field in &decl.fields {
            self.ensure_types_declared(field.ty)?;
        }
        if decl.builtin {
            return Ok(());
        }

        tracing::trace!(name = %decl.name, "declaring struct");
        self.emit(&format!("\nstruct {}\n{{\n", decl.name));
        self.writer.indent();
        for field in &decl.fields {
            if module.types.is_void(field.ty) {
                continue;
            }
            let line = self.declarator(field.ty, &field.name)?;
            self.emit(&format!("{};\n", line));
        }
        self.writer.dedent();
        self.emit("};\n");
        Ok(())
    }
}
