//! Value naming, the fold policy, expressions and statements

use super::{EmitContext, EmitMode};
use crate::compiler::ir::{BinaryOp, InstId, Op, ScalarKind, Type, TypeId, UnaryOp, UniformBufferKind};
use crate::{Error, Result};

const SWIZZLE_COMPONENTS: [char; 4] = ['x', 'y', 'z', 'w'];

fn swizzle_text(components: &[u32]) -> Result<String> {
    components
        .iter()
        .map(|&c| {
            SWIZZLE_COMPONENTS
                .get(c as usize)
                .copied()
                .ok_or_else(|| Error::invariant(format!("swizzle component {} out of range", c)))
        })
        .collect()
}

/// Replace characters a hint may carry that are not valid in identifiers
fn sanitize_hint(hint: &str) -> String {
    hint.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Round-trippable floating-point spelling
fn float_text(value: f64, kind: ScalarKind) -> String {
    if value.is_nan() {
        return "(0.0/0.0)".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "(1.0/0.0)" } else { "(-1.0/0.0)" }.to_string();
    }
    let text = match kind {
        ScalarKind::Double => format!("{:?}", value),
        _ => format!("{:?}", value as f32),
    };
    if text.contains(['.', 'e', 'E']) {
        text
    } else {
        format!("{}.0", text)
    }
}

impl EmitContext<'_> {
    // =========================================================================
    // Naming
    // =========================================================================

    /// Name a value is referred to by, allocated on first use
    pub(super) fn name_of(&mut self, id: InstId) -> String {
        if let Some(name) = self.names.get(&id) {
            return name.clone();
        }
        let module = self.module;
        let inst = module.inst(id);
        let name = if self.is_glsl() && inst.entry_point().is_some() {
            "main".to_string()
        } else if let (true, Some(name)) = (inst.op.is_global(), inst.name.as_deref()) {
            name.to_string()
        } else if let Some(hint) = inst.name_hint() {
            format!("{}_{}", sanitize_hint(hint), self.allocate_unique_id())
        } else {
            format!("_S{}", self.allocate_unique_id())
        };
        self.names.insert(id, name.clone());
        name
    }

    // =========================================================================
    // Fold policy
    // =========================================================================

    /// True when values of `ty` cannot live in an ordinary local
    fn type_folds(&self, ty: TypeId) -> bool {
        let types = &self.module.types;
        match types.get(types.value_type(ty)) {
            Type::UniformBuffer { .. } | Type::StreamOutput { .. } | Type::Patch { .. } => true,
            Type::Texture(_) | Type::StructuredBuffer { .. } | Type::Sampler { .. } => self.is_glsl(),
            Type::Array { element, .. } => self.type_folds(*element),
            _ => false,
        }
    }

    /// Print the value at its use instead of naming it
    pub(super) fn should_fold(&self, id: InstId, mode: EmitMode) -> bool {
        let inst = self.module.inst(id);
        match inst.op {
            Op::Var | Op::Param => return false,
            ref op if op.is_global() => return false,
            ref op if op.is_literal() => return true,
            Op::FieldAddress(_) | Op::GetElementPtr | Op::Specialize | Op::BufferElementRef => {
                return true
            }
            _ => {}
        }
        if mode == EmitMode::GlobalConstant {
            return true;
        }
        inst.ty.map_or(false, |ty| self.type_folds(ty))
    }

    /// Text for `id` used as an operand
    pub(super) fn operand(&mut self, id: InstId, mode: EmitMode) -> Result<String> {
        if !self.should_fold(id, mode) {
            return Ok(self.name_of(id));
        }
        let text = self.expr(id, mode)?;
        let bare = match &self.module.inst(id).op {
            Op::IntLit(v) => *v >= 0,
            Op::FloatLit(v) => *v >= 0.0 && v.is_finite(),
            Op::BoolLit(_) => true,
            Op::FieldAddress(_)
            | Op::FieldExtract(_)
            | Op::GetElementPtr
            | Op::GetElement
            | Op::BufferElementRef
            | Op::BufferLoad
            | Op::Specialize
            | Op::Load => true,
            _ => false,
        };
        Ok(if bare { text } else { format!("({})", text) })
    }

    fn operands_text(&mut self, ids: &[InstId], mode: EmitMode) -> Result<String> {
        let mut parts = Vec::with_capacity(ids.len());
        for &id in ids {
            parts.push(self.operand(id, mode)?);
        }
        Ok(parts.join(", "))
    }

    fn result_type(&self, id: InstId) -> Result<TypeId> {
        self.module.type_of(id)
    }

    /// A field access on a `cbuffer`-style block names the field directly
    fn is_implicit_deref(&self, base: InstId) -> bool {
        let types = &self.module.types;
        match self.module.inst(base).ty.map(|ty| types.get(types.value_type(ty))) {
            Some(Type::UniformBuffer { kind, .. }) => *kind != UniformBufferKind::ParameterBlock,
            _ => false,
        }
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    /// The defining expression of `id`
    pub(super) fn expr(&mut self, id: InstId, mode: EmitMode) -> Result<String> {
        let module = self.module;
        let inst = module.inst(id);
        let ops = &inst.operands;
        let operand_at = |index: usize| -> Result<InstId> {
            ops.get(index).copied().ok_or_else(|| {
                Error::invariant(format!(
                    "{} %{} is missing operand {}",
                    inst.op.mnemonic(),
                    id.0,
                    index
                ))
            })
        };

        let text = match &inst.op {
            Op::IntLit(value) => {
                let kind = inst.ty.and_then(|ty| module.types.scalar_kind(ty));
                match kind {
                    Some(ScalarKind::UInt) => format!("{}u", *value as u32),
                    Some(ScalarKind::Int64) => format!("{}ll", value),
                    Some(ScalarKind::UInt64) => format!("{}ull", *value as u64),
                    _ => value.to_string(),
                }
            }
            Op::FloatLit(value) => {
                let kind = inst
                    .ty
                    .and_then(|ty| module.types.scalar_kind(ty))
                    .unwrap_or(ScalarKind::Float);
                let mut text = float_text(*value, kind);
                if kind == ScalarKind::Double && value.is_finite() {
                    text.push_str(if self.is_glsl() { "lf" } else { "L" });
                }
                text
            }
            Op::BoolLit(value) => value.to_string(),

            Op::Func | Op::GlobalVar | Op::GlobalParam | Op::GlobalConstant | Op::Param | Op::Var => {
                self.name_of(id)
            }

            Op::Undefined => {
                let ty = self.spell_type(self.result_type(id)?)?.bare();
                if self.is_glsl() {
                    format!("{}(0)", ty)
                } else {
                    format!("({})0", ty)
                }
            }
            Op::Load => self.operand(operand_at(0)?, mode)?,
            Op::FieldExtract(key) | Op::FieldAddress(key) => {
                let base = operand_at(0)?;
                let field = module.field_name(*key);
                if self.is_implicit_deref(base) {
                    field.to_string()
                } else {
                    format!("{}.{}", self.operand(base, mode)?, field)
                }
            }
            Op::GetElement | Op::GetElementPtr | Op::BufferLoad | Op::BufferElementRef => {
                let base = self.operand(operand_at(0)?, mode)?;
                let index = self.operand(operand_at(1)?, mode)?;
                format!("{}[{}]", base, index)
            }
            Op::Swizzle(components) => {
                let base = self.operand(operand_at(0)?, mode)?;
                format!("{}.{}", base, swizzle_text(components)?)
            }
            Op::Construct | Op::MakeVector => {
                let ty = self.spell_type(self.result_type(id)?)?.bare();
                if ops.len() == 1 && !self.is_glsl() {
                    format!("({}) {}", ty, self.operand(ops[0], mode)?)
                } else {
                    format!("{}({})", ty, self.operands_text(ops, mode)?)
                }
            }
            Op::MakeArray => format!("{{ {} }}", self.operands_text(ops, mode)?),
            Op::MakeStruct => {
                if self.is_glsl() {
                    let ty = self.spell_type(self.result_type(id)?)?.bare();
                    format!("{}({})", ty, self.operands_text(ops, mode)?)
                } else {
                    format!("{{ {} }}", self.operands_text(ops, mode)?)
                }
            }
            Op::Call => {
                let callee = operand_at(0)?;
                let args = &ops[1..];
                let target = self.resolve_callee(callee);
                let resolved = module.inst(target);
                if resolved.op == Op::Func && resolved.body.is_empty() {
                    self.intrinsic_call(target, args, mode)?
                } else {
                    let callee = self.operand(callee, mode)?;
                    format!("{}({})", callee, self.operands_text(args, mode)?)
                }
            }
            Op::Binary(op) => {
                let lhs = self.operand(operand_at(0)?, mode)?;
                let rhs = self.operand(operand_at(1)?, mode)?;
                let is_matrix = inst
                    .ty
                    .map_or(false, |ty| matches!(module.types.get(ty), Type::Matrix { .. }));
                match (op, self.is_glsl()) {
                    (BinaryOp::MatMul, true) => format!("{} * {}", rhs, lhs),
                    (BinaryOp::MatMul, false) => format!("mul({}, {})", lhs, rhs),
                    (BinaryOp::Mul, true) if is_matrix => format!("matrixCompMult({}, {})", lhs, rhs),
                    (op, _) => format!("{} {} {}", lhs, op.symbol(), rhs),
                }
            }
            Op::Unary(op) => {
                let value = self.operand(operand_at(0)?, mode)?;
                let ty = self.result_type(id)?;
                let is_bool = module.types.scalar_kind(ty) == Some(ScalarKind::Bool);
                let is_vector = matches!(module.types.get(ty), Type::Vector { .. });
                match op {
                    UnaryOp::Neg => format!("-{}", value),
                    UnaryOp::Not if is_bool && is_vector && self.is_glsl() => format!("not({})", value),
                    UnaryOp::Not if is_bool => format!("!{}", value),
                    UnaryOp::Not => format!("~{}", value),
                }
            }
            Op::Select => {
                let cond = self.operand(operand_at(0)?, mode)?;
                let if_true = self.operand(operand_at(1)?, mode)?;
                let if_false = self.operand(operand_at(2)?, mode)?;
                format!("{} ? {} : {}", cond, if_true, if_false)
            }
            Op::BitCast => self.bit_cast(id, operand_at(0)?, mode)?,
            Op::Specialize => self.operand(operand_at(0)?, mode)?,

            Op::Store | Op::BufferStore | Op::SwizzleSet(_) => {
                return Err(Error::invariant(format!(
                    "{} %{} used as an expression",
                    inst.op.mnemonic(),
                    id.0
                )))
            }
            Op::WitnessTable { .. }
            | Op::RttiObject { .. }
            | Op::Interface { .. }
            | Op::MakeExistential
            | Op::MakeExistentialWithRtti
            | Op::ExtractExistentialValue
            | Op::ExtractExistentialType
            | Op::ExtractExistentialWitnessTable
            | Op::LookupWitnessMethod { .. }
            | Op::PackAnyValue
            | Op::UnpackAnyValue => {
                return Err(Error::invariant(format!(
                    "{} %{} reached emission",
                    inst.op.mnemonic(),
                    id.0
                )))
            }
            Op::Return
            | Op::Discard
            | Op::Unreachable
            | Op::Branch(_)
            | Op::ConditionalBranch { .. }
            | Op::IfElse { .. }
            | Op::Loop { .. }
            | Op::Switch { .. } => {
                return Err(Error::invariant(format!(
                    "terminator {} %{} used as a value",
                    inst.op.mnemonic(),
                    id.0
                )))
            }
        };
        Ok(text)
    }

    fn bit_cast(&mut self, id: InstId, value: InstId, mode: EmitMode) -> Result<String> {
        let to_ty = self.result_type(id)?;
        let from_ty = self.module.type_of(value)?;
        let to = self.module.types.scalar_kind(to_ty);
        let from = self.module.types.scalar_kind(from_ty);
        let text = self.operand(value, mode)?;
        if to == from {
            return Ok(text);
        }

        use ScalarKind::{Float, Int, UInt};
        let function = match (self.is_glsl(), from, to) {
            (false, _, Some(UInt)) => Some("asuint"),
            (false, _, Some(Int)) => Some("asint"),
            (false, _, Some(Float)) => Some("asfloat"),
            (true, Some(Float), Some(UInt)) => Some("floatBitsToUint"),
            (true, Some(Float), Some(Int)) => Some("floatBitsToInt"),
            (true, Some(UInt), Some(Float)) => Some("uintBitsToFloat"),
            (true, Some(Int), Some(Float)) => Some("intBitsToFloat"),
            _ => None,
        };
        match function {
            Some(function) => Ok(format!("{}({})", function, text)),
            None => {
                let ty = self.spell_type(to_ty)?.bare();
                Ok(format!("{}({})", ty, text))
            }
        }
    }

    // =========================================================================
    // Statements
    // =========================================================================

    /// Emit the statement for a non-terminator instruction, if it needs one
    pub(super) fn emit_inst_stmt(&mut self, id: InstId) -> Result<()> {
        let module = self.module;
        let inst = module.inst(id);
        if inst.op.is_terminator() {
            return Err(Error::invariant(format!(
                "terminator {} %{} inside a block body",
                inst.op.mnemonic(),
                id.0
            )));
        }
        if matches!(inst.op, Op::Param | Op::FieldAddress(_)) || self.should_fold(id, EmitMode::Default) {
            return Ok(());
        }

        self.advance_to_inst(id);
        let mode = EmitMode::Default;
        match &inst.op {
            Op::Var => {
                let value_ty = module.types.value_type(self.result_type(id)?);
                let name = self.name_of(id);
                let decl = self.declarator(value_ty, &name)?;
                self.emit(&format!("{};\n", decl));
            }
            Op::Undefined => {
                let name = self.name_of(id);
                let decl = self.declarator(self.result_type(id)?, &name)?;
                self.emit(&format!("{};\n", decl));
            }
            Op::Store => {
                let target = self.operand(inst.operands[0], mode)?;
                let value = self.operand(inst.operands[1], mode)?;
                self.emit(&format!("{} = {};\n", target, value));
            }
            Op::BufferStore => {
                let buffer = self.operand(inst.operands[0], mode)?;
                let index = self.operand(inst.operands[1], mode)?;
                let value = self.operand(inst.operands[2], mode)?;
                self.emit(&format!("{}[{}] = {};\n", buffer, index, value));
            }
            Op::SwizzleSet(components) => {
                let name = self.name_of(id);
                let decl = self.declarator(self.result_type(id)?, &name)?;
                let base = self.operand(inst.operands[0], mode)?;
                let source = self.operand(inst.operands[1], mode)?;
                self.emit(&format!("{} = {};\n", decl, base));
                self.emit(&format!("{}.{} = {};\n", name, swizzle_text(components)?, source));
            }
            _ => {
                let value = self.expr(id, mode)?;
                match inst.ty.filter(|&ty| !module.types.is_void(ty)) {
                    Some(ty) => {
                        let name = self.name_of(id);
                        let decl = self.declarator(ty, &name)?;
                        self.emit(&format!("{} = {};\n", decl, value));
                    }
                    None => self.emit(&format!("{};\n", value)),
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::{Builder, Decoration, Module, ProgramLayout};
    use crate::compiler::target::TargetDescriptor;
    use crate::diagnostics::DiagnosticSink;

    fn with_ctx<T>(
        module: &Module,
        target: TargetDescriptor,
        f: impl FnOnce(&mut EmitContext<'_>) -> T,
    ) -> T {
        let mut sink = DiagnosticSink::new();
        let layout = ProgramLayout::default();
        let mut ctx = EmitContext::new(module, &layout, &target, &mut sink);
        f(&mut ctx)
    }

    #[test]
    fn test_float_spelling_round_trips() {
        assert_eq!(float_text(1.0, ScalarKind::Float), "1.0");
        assert_eq!(float_text(0.1, ScalarKind::Float), "0.1");
        assert_eq!(float_text(f64::INFINITY, ScalarKind::Float), "(1.0/0.0)");
        assert!(float_text(1e30, ScalarKind::Float).contains('e'));
    }

    #[test]
    fn test_literal_suffixes() {
        let mut module = Module::new("t");
        let u = module.uint_lit(7);
        let i64_ty = module.types.scalar(ScalarKind::Int64);
        let big = module.int_literal(i64_ty, 1 << 40);
        with_ctx(&module, TargetDescriptor::hlsl(50), |ctx| {
            assert_eq!(ctx.operand(u, EmitMode::Default).unwrap(), "7u");
            assert_eq!(ctx.operand(big, EmitMode::Default).unwrap(), "1099511627776ll");
        });
    }

    #[test]
    fn test_names_use_hints_and_counter() {
        let mut module = Module::new("t");
        let float = module.types.float();
        let void = module.types.void();
        let mut b = Builder::new(&mut module);
        let (_, params) = b.func_with_body("f", vec![float, float], void);
        b.ret(None);
        module.inst_mut(params[0]).decorate(Decoration::NameHint("color".into()));
        with_ctx(&module, TargetDescriptor::hlsl(50), |ctx| {
            assert_eq!(ctx.name_of(params[0]), "color_1");
            assert_eq!(ctx.name_of(params[1]), "_S2");
            assert_eq!(ctx.name_of(params[0]), "color_1");
        });
    }

    #[test]
    fn test_matrix_multiply_per_dialect() {
        let mut module = Module::new("t");
        let mat = module.types.matrix(ScalarKind::Float, 4, 4);
        let void = module.types.void();
        let mut b = Builder::new(&mut module);
        let (_, params) = b.func_with_body("f", vec![mat, mat], void);
        let product = b.binary(BinaryOp::MatMul, mat, params[0], params[1]);
        let scaled = b.binary(BinaryOp::Mul, mat, params[0], params[1]);
        b.ret(None);
        with_ctx(&module, TargetDescriptor::glsl(450), |ctx| {
            assert_eq!(ctx.expr(product, EmitMode::Default).unwrap(), "_S2 * _S1");
            assert_eq!(ctx.expr(scaled, EmitMode::Default).unwrap(), "matrixCompMult(_S1, _S2)");
        });
        with_ctx(&module, TargetDescriptor::hlsl(50), |ctx| {
            assert_eq!(ctx.expr(product, EmitMode::Default).unwrap(), "mul(_S1, _S2)");
        });
    }

    #[test]
    fn test_bit_casts_per_dialect() {
        let mut module = Module::new("t");
        let float = module.types.float();
        let uint = module.types.uint();
        let void = module.types.void();
        let mut b = Builder::new(&mut module);
        let (_, params) = b.func_with_body("f", vec![float], void);
        let cast = b.bit_cast(uint, params[0]);
        b.ret(None);
        with_ctx(&module, TargetDescriptor::glsl(450), |ctx| {
            assert_eq!(ctx.expr(cast, EmitMode::Default).unwrap(), "floatBitsToUint(_S1)");
        });
        with_ctx(&module, TargetDescriptor::hlsl(50), |ctx| {
            assert_eq!(ctx.expr(cast, EmitMode::Default).unwrap(), "asuint(_S1)");
        });
    }

    #[test]
    fn test_textures_fold_only_on_glsl() {
        let mut module = Module::new("t");
        let float4 = module.types.vector(ScalarKind::Float, 4);
        let tex_ty = module.types.intern(Type::Texture(crate::compiler::ir::TextureType::sampled(
            crate::compiler::ir::TextureShape::Texture2D,
            float4,
        )));
        let void = module.types.void();
        let mut b = Builder::new(&mut module);
        let global = b.global_param("tex", tex_ty, None);
        let (_, _) = b.func_with_body("f", vec![], void);
        let loaded = b.emit(Op::Load, Some(tex_ty), vec![global]);
        b.ret(None);
        with_ctx(&module, TargetDescriptor::glsl(450), |ctx| {
            assert!(ctx.should_fold(loaded, EmitMode::Default));
            assert!(!ctx.should_fold(global, EmitMode::Default));
        });
        with_ctx(&module, TargetDescriptor::hlsl(50), |ctx| {
            assert!(!ctx.should_fold(loaded, EmitMode::Default));
            assert!(ctx.should_fold(loaded, EmitMode::GlobalConstant));
        });
    }

    #[test]
    fn test_existential_ops_are_faults() {
        let mut module = Module::new("t");
        let float = module.types.float();
        let void = module.types.void();
        let mut b = Builder::new(&mut module);
        let (_, params) = b.func_with_body("f", vec![float], void);
        let packed = b.emit(Op::PackAnyValue, Some(float), vec![params[0]]);
        b.ret(None);
        with_ctx(&module, TargetDescriptor::hlsl(50), |ctx| {
            assert!(ctx.expr(packed, EmitMode::Default).unwrap_err().is_internal());
        });
    }
}
