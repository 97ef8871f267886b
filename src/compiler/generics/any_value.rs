//! Fixed-size any-value representation and its marshalling functions
//!
//! An `AnyValue{N}` is a struct holding `uint data[N / 4]`. Each concrete
//! type stored in one gets a generated pack function copying its 32-bit
//! scalar leaves into consecutive words, and a matching unpack function.

use super::{type_label, AnyValueLayout, GenericsLowering};
use crate::compiler::ir::{BinaryOp, Builder, FieldKey, InstId, Module, Op, ScalarKind, Type, TypeId};
use crate::diagnostics::SourceLoc;
use crate::{Error, Result};
use std::collections::HashMap;

/// One step from a value to one of its parts
#[derive(Debug, Clone, Copy)]
enum Step {
    /// Struct field
    Field(FieldKey),
    /// Vector component, matrix row or array element, with its type
    Index(u32, TypeId),
}

/// A 32-bit scalar inside a marshalled value
#[derive(Debug, Clone)]
struct Leaf {
    path: Vec<Step>,
    scalar: ScalarKind,
}

impl GenericsLowering<'_> {
    /// Replace every any-value type with its generated struct and every
    /// pack/unpack instruction with a call to the marshalling function.
    pub(super) fn lower_any_values(&mut self) -> Result<()> {
        let mut replacements = HashMap::new();
        for index in 0..self.module.types.len() {
            let ty = TypeId(index as u32);
            if let Type::AnyValue { size } = *self.module.types.get(ty) {
                let layout = self.any_value_layout(size);
                replacements.insert(ty, layout.ty);
            }
        }
        if !replacements.is_empty() {
            self.module
                .rewrite_types(&mut |_, ty| replacements.get(&ty).copied());
        }

        let marshals = self.ops_matching(|op| matches!(op, Op::PackAnyValue | Op::UnpackAnyValue));
        for id in marshals {
            let inst = self.module.inst(id);
            let operand = *inst
                .operands
                .first()
                .ok_or_else(|| Error::invariant("any-value marshal without an operand"))?;
            let loc = inst.loc.clone();
            let packing = inst.op == Op::PackAnyValue;
            let (concrete, any_ty) = if packing {
                (self.module.type_of(operand)?, self.module.type_of(id)?)
            } else {
                (self.module.type_of(id)?, self.module.type_of(operand)?)
            };

            let Some((pack, unpack)) = self.marshalling_functions(concrete, any_ty, loc.as_ref())?
            else {
                continue;
            };
            let inst = self.module.inst_mut(id);
            inst.op = Op::Call;
            inst.operands = vec![if packing { pack } else { unpack }, operand];
        }
        Ok(())
    }

    /// Generated struct for an any-value of `size` bytes
    fn any_value_layout(&mut self, size: u32) -> AnyValueLayout {
        if let Some(&layout) = self.any_values.get(&size) {
            return layout;
        }
        let words = size.div_ceil(4).max(1);
        let uint = self.module.types.uint();
        let data_ty = self.module.types.array(uint, Some(words));
        let id = self
            .module
            .add_struct(format!("AnyValue{}", words * 4), &[("data", data_ty)]);
        let data = self.module.struct_decl(id).fields[0].key;
        let layout = AnyValueLayout {
            ty: self.module.struct_type(id),
            data,
            words,
        };
        self.any_values.insert(size, layout);
        layout
    }

    fn layout_for_struct(&self, any_ty: TypeId) -> Result<AnyValueLayout> {
        self.any_values
            .values()
            .find(|layout| layout.ty == any_ty)
            .copied()
            .ok_or_else(|| Error::invariant("any-value marshal on a non any-value type"))
    }

    /// Pack/unpack functions for `concrete`, generated on first request.
    ///
    /// Returns `None` after reporting a diagnostic when the type cannot be
    /// stored in the any-value.
    fn marshalling_functions(
        &mut self,
        concrete: TypeId,
        any_ty: TypeId,
        loc: Option<&SourceLoc>,
    ) -> Result<Option<(InstId, InstId)>> {
        if let Some(&pair) = self.marshalling.get(&(concrete, any_ty)) {
            return Ok(Some(pair));
        }
        let layout = self.layout_for_struct(any_ty)?;
        let label = type_label(self.module, concrete);

        let mut leaves = Vec::new();
        if let Err(reason) = collect_leaves(self.module, concrete, &mut Vec::new(), &mut leaves) {
            self.sink.error(
                loc,
                format!("type `{}` cannot be stored in an any-value: {}", label, reason),
            );
            return Ok(None);
        }
        if leaves.len() as u32 > layout.words {
            self.sink.error(
                loc,
                format!(
                    "type `{}` needs {} bytes but an any-value holds {}",
                    label,
                    leaves.len() * 4,
                    layout.words * 4
                ),
            );
            return Ok(None);
        }

        let pack = build_pack(self.module, concrete, layout, &leaves, &label);
        let unpack = build_unpack(self.module, concrete, layout, &leaves, &label);
        self.marshalling.insert((concrete, any_ty), (pack, unpack));
        self.stats.marshalling_functions += 2;
        tracing::trace!(ty = %label, leaves = leaves.len(), "generated any-value marshalling");
        Ok(Some((pack, unpack)))
    }
}

/// Flatten `ty` into 32-bit scalar leaves in declaration order
fn collect_leaves(
    module: &mut Module,
    ty: TypeId,
    path: &mut Vec<Step>,
    out: &mut Vec<Leaf>,
) -> std::result::Result<(), String> {
    match module.types.get(ty).clone() {
        Type::Scalar(kind) => {
            if kind.size_in_bytes() != 4 && kind != ScalarKind::Bool {
                return Err(format!("{:?} is not a 32-bit scalar", kind).to_lowercase());
            }
            out.push(Leaf {
                path: path.clone(),
                scalar: kind,
            });
        }
        Type::Vector { element, count } => {
            let scalar = module.types.scalar(element);
            for i in 0..count {
                path.push(Step::Index(i, scalar));
                collect_leaves(module, scalar, path, out)?;
                path.pop();
            }
        }
        Type::Matrix {
            element,
            rows,
            columns,
        } => {
            let row = module.types.vector(element, columns);
            for r in 0..rows {
                path.push(Step::Index(r, row));
                collect_leaves(module, row, path, out)?;
                path.pop();
            }
        }
        Type::Array {
            element,
            count: Some(count),
        } => {
            for i in 0..count {
                path.push(Step::Index(i, element));
                collect_leaves(module, element, path, out)?;
                path.pop();
            }
        }
        Type::Struct(id) => {
            let fields: Vec<(FieldKey, TypeId)> = module
                .struct_decl(id)
                .fields
                .iter()
                .map(|f| (f.key, f.ty))
                .collect();
            for (key, field_ty) in fields {
                path.push(Step::Field(key));
                collect_leaves(module, field_ty, path, out)?;
                path.pop();
            }
        }
        Type::Array { count: None, .. } => return Err("unsized arrays have no fixed size".into()),
        _ => {
            return Err(format!(
                "`{}` has no bit representation",
                super::super::debug::format_type(module, ty)
            ))
        }
    }
    Ok(())
}

fn build_pack(
    module: &mut Module,
    concrete: TypeId,
    layout: AnyValueLayout,
    leaves: &[Leaf],
    label: &str,
) -> InstId {
    let uint = module.types.uint();
    let mut b = Builder::new(module);
    let (func, params) = b.func_with_body(&format!("pack_{}", label), vec![concrete], layout.ty);
    let value = params[0];
    let result = b.var(layout.ty);
    let data = b.field_address(result, layout.data);

    for (slot, leaf) in leaves.iter().enumerate() {
        let mut part = value;
        for step in &leaf.path {
            part = match *step {
                Step::Field(key) => b.field_extract(part, key),
                Step::Index(i, ty) => {
                    let index = b.module().int_lit(i64::from(i));
                    b.get_element(part, index, ty)
                }
            };
        }
        let word = match leaf.scalar {
            ScalarKind::UInt => part,
            ScalarKind::Bool => b.construct(uint, vec![part]),
            _ => b.bit_cast(uint, part),
        };
        let index = b.module().int_lit(slot as i64);
        let slot_ptr = b.get_element_ptr(data, index, uint);
        b.store(slot_ptr, word);
    }

    let packed = b.load(result);
    b.ret(Some(packed));
    func
}

fn build_unpack(
    module: &mut Module,
    concrete: TypeId,
    layout: AnyValueLayout,
    leaves: &[Leaf],
    label: &str,
) -> InstId {
    let uint = module.types.uint();
    let bool_ty = module.types.bool();
    let mut b = Builder::new(module);
    let (func, params) = b.func_with_body(&format!("unpack_{}", label), vec![layout.ty], concrete);
    let any = params[0];
    let result = b.var(concrete);
    let data = b.field_extract(any, layout.data);

    for (slot, leaf) in leaves.iter().enumerate() {
        let index = b.module().int_lit(slot as i64);
        let word = b.get_element(data, index, uint);
        let part = match leaf.scalar {
            ScalarKind::UInt => word,
            ScalarKind::Bool => {
                let zero = b.module().uint_lit(0);
                b.binary(BinaryOp::Neq, bool_ty, word, zero)
            }
            kind => {
                let ty = b.module().types.scalar(kind);
                b.bit_cast(ty, word)
            }
        };
        let mut target = result;
        for step in &leaf.path {
            target = match *step {
                Step::Field(key) => b.field_address(target, key),
                Step::Index(i, ty) => {
                    let index = b.module().int_lit(i64::from(i));
                    b.get_element_ptr(target, index, ty)
                }
            };
        }
        b.store(target, part);
    }

    let unpacked = b.load(result);
    b.ret(Some(unpacked));
    func
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_struct_leaves_follow_declaration_order() {
        let mut module = Module::new("leaves");
        let float3 = module.types.vector(ScalarKind::Float, 3);
        let int = module.types.int();
        let id = module.add_struct("Light", &[("dir", float3), ("kind", int)]);
        let ty = module.struct_type(id);

        let mut leaves = Vec::new();
        collect_leaves(&mut module, ty, &mut Vec::new(), &mut leaves).expect("marshallable");
        assert_eq!(leaves.len(), 4);
        assert_eq!(leaves[3].scalar, ScalarKind::Int);
        assert!(matches!(leaves[0].path[0], Step::Field(..)));
        assert!(matches!(leaves[0].path[1], Step::Index(0, _)));
    }

    #[test]
    fn test_doubles_are_rejected() {
        let mut module = Module::new("leaves");
        let double = module.types.scalar(ScalarKind::Double);
        let mut leaves = Vec::new();
        let err = collect_leaves(&mut module, double, &mut Vec::new(), &mut leaves)
            .expect_err("doubles do not fit a word");
        assert!(err.contains("double"));
    }
}
