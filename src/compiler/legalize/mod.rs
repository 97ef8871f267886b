//! # Type Legalization
//!
//! Rewrites every value whose type the target cannot express directly:
//! aggregates holding resources are split into an ordinary aggregate plus
//! separate resource values, and collapsed wrappers are dereferenced away.
//!
//! ## Module Structure
//!
//! ```text
//! legalize/
//! ├── mod.rs     # This file - pass driver and instruction rewrites
//! ├── types.rs   # LegalType, PairInfo, TypeLegalizer (memoized classifier)
//! └── values.rs  # LegalVal (value-level mirror of LegalType)
//! ```
//!
//! ## Phases
//!
//! 1. Global declarations are split, one declaration per leaf, each with
//!    the binding offsets summed along its field path.
//! 2. Function signatures are expanded; non-simple results become trailing
//!    `out` parameters.
//! 3. Bodies are rewritten instruction by instruction.
//! 4. Replaced values are deleted.

mod types;
mod values;

pub use types::{
    LegalType, PairElement, PairInfo, PairSide, PairType, TupleElement, TupleType, TypeLegalizer,
    WrappedBufferType,
};
pub use values::LegalVal;

use super::debug::format_type;
use super::ir::{
    BindingChain, BlockId, Builder, Decoration, FieldKey, Inst, InstId, LegalizedPart, Module, Op,
    PtrKind, TypeId, TypeLayout, VarLayout,
};
use super::target::TargetCapabilities;
use crate::diagnostics::{DiagnosticSink, SourceLoc};
use crate::{Error, Result};
use std::collections::HashMap;
use std::rc::Rc;

/// Counters reported by [`legalize_module`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct LegalizeStats {
    /// Types whose legal form differs from the original
    pub types_split: usize,
    /// Global declarations replaced by per-leaf declarations
    pub declarations_split: usize,
    /// Local values replaced by legalized parts
    pub values_split: usize,
    /// Functions whose signature changed
    pub functions_rewritten: usize,
}

/// Legalize every type in `module` for a target with `capabilities`.
///
/// Problems (arrays of resources on targets without them, resources in
/// places that cannot be split) are reported to `sink`; the pass stops at
/// the end of the phase in which the first one was found.
pub fn legalize_module(
    module: &mut Module,
    capabilities: TargetCapabilities,
    sink: &mut DiagnosticSink,
) -> Result<LegalizeStats> {
    let mut pass = Legalizer {
        module,
        sink,
        types: TypeLegalizer::new(capabilities),
        values: HashMap::new(),
        results: HashMap::new(),
        out_params: HashMap::new(),
        replaced: Vec::new(),
        current_func: None,
        stats: LegalizeStats::default(),
    };
    pass.run()?;
    tracing::debug!(
        types = pass.stats.types_split,
        declarations = pass.stats.declarations_split,
        values = pass.stats.values_split,
        functions = pass.stats.functions_rewritten,
        "type legalization complete"
    );
    Ok(pass.stats)
}

struct Legalizer<'a> {
    module: &'a mut Module,
    sink: &'a mut DiagnosticSink,
    types: TypeLegalizer,
    values: HashMap<InstId, LegalVal>,
    /// Legal result types of functions returning through `out` parameters
    results: HashMap<InstId, LegalType>,
    out_params: HashMap<InstId, Vec<InstId>>,
    replaced: Vec<InstId>,
    current_func: Option<InstId>,
    stats: LegalizeStats,
}

impl Legalizer<'_> {
    fn run(&mut self) -> Result<()> {
        let globals = self.module.globals().to_vec();

        // Phase 1: global declarations
        for &global in &globals {
            if matches!(self.module.inst(global).op, Op::GlobalParam | Op::GlobalVar) {
                self.legalize_global(global)?;
            }
        }
        if self.sink.has_errors() {
            return Ok(());
        }

        // Phase 2: function signatures
        for &global in &globals {
            let inst = self.module.inst(global);
            if inst.op == Op::Func && !inst.body.is_empty() {
                self.legalize_signature(global)?;
            }
        }
        if self.sink.has_errors() {
            return Ok(());
        }

        // Phase 3: bodies
        for &global in &globals {
            let inst = self.module.inst(global);
            if inst.removed || inst.body.is_empty() {
                continue;
            }
            self.current_func = Some(global);
            let entry = self.module.entry_block(global);
            for block in self.module.inst(global).body.clone() {
                if Some(block) != entry {
                    for param in self.module.block(block).params.clone() {
                        self.legalize_param(block, param)?;
                    }
                }
                for inst in self.module.block(block).insts.clone() {
                    self.legalize_inst(inst)?;
                }
            }
        }
        self.current_func = None;

        // Phase 4: drop replaced values
        for id in std::mem::take(&mut self.replaced).into_iter().rev() {
            self.module.remove_inst(id);
        }
        self.stats.types_split = self.types.split_count();
        Ok(())
    }

    /// Legal type of `ty`, reporting any classification problem at `loc`
    fn legal_type(&mut self, ty: TypeId, loc: Option<&SourceLoc>) -> LegalType {
        let legal = self.types.legalize(self.module, ty);
        for problem in self.types.take_problems() {
            self.sink.error(loc, problem);
        }
        legal
    }

    fn value_of(&self, id: InstId) -> LegalVal {
        self.values
            .get(&id)
            .cloned()
            .unwrap_or(LegalVal::Simple(id))
    }

    // =========================================================================
    // Declarations and signatures
    // =========================================================================

    fn legalize_global(&mut self, global: InstId) -> Result<()> {
        let inst = self.module.inst(global).clone();
        let ty = self.module.type_of(global)?;
        let legal = self.legal_type(ty, inst.loc.as_ref());
        match legal {
            LegalType::Simple(new_ty) => {
                if new_ty != ty {
                    self.module.inst_mut(global).ty = Some(new_ty);
                }
                return Ok(());
            }
            LegalType::None => return Ok(()),
            _ => {}
        }

        let base = inst
            .name
            .clone()
            .unwrap_or_else(|| format!("_g{}", global.0));
        let layout = inst.layout().cloned();
        let mut parts = Vec::new();
        let mut leaves = Vec::new();
        for (path, leaf_ty) in legal.leaf_types() {
            let mut part = Inst::new(inst.op.clone(), Some(leaf_ty), Vec::new());
            part.loc = inst.loc.clone();
            part.name = Some(leaf_name(self.module, &base, &path, "_"));
            if let Some(layout) = &layout {
                let leaf = leaf_layout(&BindingChain::new(layout), &path);
                part.decorate(Decoration::Layout(Rc::new(leaf)));
            }
            let id = self.module.add_global(part);
            parts.push(LegalizedPart {
                path: leaf_name(self.module, &base, &path, "."),
                inst: id,
            });
            leaves.push(id);
        }
        tracing::trace!(global = %base, parts = parts.len(), "split global declaration");

        let value = LegalVal::from_leaves(&legal, &mut leaves.into_iter())?;
        self.values.insert(global, value);
        self.replaced.push(global);
        self.module.legalized_decls.insert(base, parts);
        self.stats.declarations_split += 1;
        Ok(())
    }

    fn legalize_signature(&mut self, func: InstId) -> Result<()> {
        let Some(entry) = self.module.entry_block(func) else {
            return Ok(());
        };
        let loc = self.module.inst(func).loc.clone();
        let mut changed = false;
        for param in self.module.block(entry).params.clone() {
            changed |= self.legalize_param(entry, param)?;
        }

        let fn_ty = self.module.type_of(func)?;
        let result = self
            .module
            .types
            .func_signature(fn_ty)
            .map(|(_, result)| result)
            .ok_or_else(|| Error::invariant(format!("function %{} has no signature", func.0)))?;
        let legal = self.legal_type(result, loc.as_ref());
        let new_result = match &legal {
            LegalType::Simple(ty) => *ty,
            LegalType::None => result,
            _ => {
                let mut outs = Vec::new();
                for (index, (_, leaf)) in legal.leaf_types().into_iter().enumerate() {
                    let ptr = self.module.types.ptr(PtrKind::Out, leaf);
                    let out = self.module.add_block_param(entry, ptr);
                    self.module
                        .inst_mut(out)
                        .decorate(Decoration::NameHint(format!("result_{}", index)));
                    outs.push(out);
                }
                self.out_params.insert(func, outs);
                self.results.insert(func, legal.clone());
                self.module.types.void()
            }
        };

        if changed || new_result != result {
            let params = self
                .module
                .block(entry)
                .params
                .iter()
                .map(|&p| self.module.type_of(p))
                .collect::<Result<Vec<_>>>()?;
            let ty = self.module.types.func(params, new_result);
            self.module.inst_mut(func).ty = Some(ty);
            self.stats.functions_rewritten += 1;
        }
        Ok(())
    }

    /// Retype or expand one block parameter; true when anything changed
    fn legalize_param(&mut self, block: BlockId, param: InstId) -> Result<bool> {
        let inst = self.module.inst(param).clone();
        let ty = self.module.type_of(param)?;
        let legal = self.legal_type(ty, inst.loc.as_ref());
        match legal {
            LegalType::Simple(new_ty) => {
                if new_ty == ty {
                    return Ok(false);
                }
                self.module.inst_mut(param).ty = Some(new_ty);
                Ok(true)
            }
            LegalType::None => Ok(false),
            _ => {
                let index = self
                    .module
                    .block(block)
                    .params
                    .iter()
                    .position(|&p| p == param)
                    .ok_or_else(|| Error::invariant("parameter is not owned by its block"))?;
                let hint = inst.name_hint().map(str::to_string);
                let mut leaves = Vec::new();
                for (offset, (path, leaf)) in legal.leaf_types().into_iter().enumerate() {
                    let id = self.module.insert_block_param(block, index + offset, leaf);
                    if let Some(hint) = &hint {
                        let name = leaf_name(self.module, hint, &path, "_");
                        self.module.inst_mut(id).decorate(Decoration::NameHint(name));
                    }
                    leaves.push(id);
                }
                let value = LegalVal::from_leaves(&legal, &mut leaves.into_iter())?;
                self.values.insert(param, value);
                self.module.remove_inst(param);
                self.stats.values_split += 1;
                Ok(true)
            }
        }
    }

    // =========================================================================
    // Instructions
    // =========================================================================

    fn legalize_inst(&mut self, id: InstId) -> Result<()> {
        let inst = self.module.inst(id).clone();
        if inst.removed {
            return Ok(());
        }
        let operands: Vec<LegalVal> = inst.operands.iter().map(|&o| self.value_of(o)).collect();

        match inst.op {
            Op::Call => {
                let callee = inst.operands.first().copied();
                if let Some(legal) = callee.and_then(|c| self.results.get(&c)).cloned() {
                    return self.call_with_out_params(id, &operands, &legal);
                }
            }
            Op::Return => {
                let outs = self
                    .current_func
                    .and_then(|f| self.out_params.get(&f))
                    .cloned();
                if let Some(outs) = outs {
                    return self.return_through_out_params(id, &operands, &outs);
                }
            }
            _ => {}
        }

        let result = match inst.ty {
            Some(ty) => self.legal_type(ty, inst.loc.as_ref()),
            None => LegalType::None,
        };
        let result_simple = matches!(result, LegalType::None | LegalType::Simple(_));
        let operands_simple = operands.iter().all(|v| v.as_simple().is_some());

        if operands_simple && result_simple {
            let target = self.module.inst_mut(id);
            target.operands = operands.iter().filter_map(LegalVal::as_simple).collect();
            if let LegalType::Simple(ty) = result {
                target.ty = Some(ty);
            }
            return Ok(());
        }

        let value = match &inst.op {
            Op::Var | Op::Undefined => {
                let hint = inst.name_hint().map(str::to_string);
                let mut leaves = Vec::new();
                for (path, leaf) in result.leaf_types() {
                    let mut part = Inst::new(inst.op.clone(), Some(leaf), Vec::new());
                    part.loc = inst.loc.clone();
                    if let Some(hint) = &hint {
                        part.decorate(Decoration::NameHint(leaf_name(self.module, hint, &path, "_")));
                    }
                    leaves.push(self.module.insert_before(id, part)?);
                }
                Some(LegalVal::from_leaves(&result, &mut leaves.into_iter())?)
            }
            Op::Load => Some(self.load_val(&operands[0], id)?),
            Op::Store => {
                self.store_val(&operands[0], &operands[1], id)?;
                None
            }
            Op::FieldExtract(key) => Some(self.field_val(&operands[0], *key, false, id)?),
            Op::FieldAddress(key) => Some(self.field_val(&operands[0], *key, true, id)?),
            Op::MakeStruct => Some(self.make_struct_val(&operands, &result, id)?),
            Op::Call | Op::Branch(_) | Op::Loop { .. } if result_simple => {
                let mut flat = Vec::with_capacity(operands.len());
                for value in &operands {
                    flat.extend(value.leaves());
                }
                self.module.inst_mut(id).operands = flat;
                return Ok(());
            }
            op => {
                let shown = inst
                    .ty
                    .or_else(|| {
                        inst.operands
                            .iter()
                            .zip(&operands)
                            .find(|(_, v)| v.as_simple().is_none())
                            .and_then(|(&o, _)| self.module.inst(o).ty)
                    })
                    .map(|ty| format_type(self.module, ty))
                    .unwrap_or_default();
                self.sink.error(
                    inst.loc.as_ref(),
                    format!(
                        "`{}` cannot operate on a value of type `{}` on this target",
                        op.mnemonic(),
                        shown
                    ),
                );
                return Ok(());
            }
        };

        if let Some(value) = value {
            self.values.insert(id, value);
        }
        self.replaced.push(id);
        self.stats.values_split += 1;
        Ok(())
    }

    fn load_val(&mut self, ptr: &LegalVal, anchor: InstId) -> Result<LegalVal> {
        Ok(match ptr {
            LegalVal::None => LegalVal::None,
            LegalVal::Simple(p) => {
                let loc = self.module.inst(anchor).loc.clone();
                let mut b = Builder::new(self.module);
                b.set_insert_before(anchor);
                b.set_loc(loc);
                LegalVal::Simple(b.load(*p))
            }
            LegalVal::ImplicitDeref(inner) => (**inner).clone(),
            LegalVal::Tuple(elements) => LegalVal::Tuple(
                elements
                    .iter()
                    .map(|(key, v)| Ok((*key, self.load_val(v, anchor)?)))
                    .collect::<Result<_>>()?,
            ),
            LegalVal::Pair {
                ordinary,
                special,
                info,
            } => LegalVal::Pair {
                ordinary: Box::new(self.load_val(ordinary, anchor)?),
                special: Box::new(self.load_val(special, anchor)?),
                info: info.clone(),
            },
        })
    }

    fn store_val(&mut self, ptr: &LegalVal, value: &LegalVal, anchor: InstId) -> Result<()> {
        match (ptr, value) {
            (LegalVal::None, _) => Ok(()),
            (LegalVal::Simple(p), LegalVal::Simple(v)) => {
                let loc = self.module.inst(anchor).loc.clone();
                let mut b = Builder::new(self.module);
                b.set_insert_before(anchor);
                b.set_loc(loc);
                b.store(*p, *v);
                Ok(())
            }
            (LegalVal::Tuple(ptrs), LegalVal::Tuple(_)) => {
                for (key, p) in ptrs {
                    let v = value.tuple_element(*key).ok_or_else(|| {
                        Error::invariant("stored tuple is missing a part of its destination")
                    })?;
                    self.store_val(p, v, anchor)?;
                }
                Ok(())
            }
            (
                LegalVal::Pair {
                    ordinary: po,
                    special: ps,
                    ..
                },
                LegalVal::Pair {
                    ordinary: vo,
                    special: vs,
                    ..
                },
            ) => {
                self.store_val(po, vo, anchor)?;
                self.store_val(ps, vs, anchor)
            }
            _ => Err(Error::invariant(
                "store of a value whose legalized shape differs from its destination",
            )),
        }
    }

    /// Field `key` of a legalized value, as an address when `address` is set
    fn field_val(
        &mut self,
        base: &LegalVal,
        key: FieldKey,
        address: bool,
        anchor: InstId,
    ) -> Result<LegalVal> {
        match base {
            LegalVal::None => Ok(LegalVal::None),
            LegalVal::Simple(b) => {
                let loc = self.module.inst(anchor).loc.clone();
                let mut builder = Builder::new(self.module);
                builder.set_insert_before(anchor);
                builder.set_loc(loc);
                Ok(LegalVal::Simple(if address {
                    builder.field_address(*b, key)
                } else {
                    builder.field_extract(*b, key)
                }))
            }
            LegalVal::ImplicitDeref(inner) => {
                let field = self.field_val(inner, key, false, anchor)?;
                Ok(if address {
                    LegalVal::ImplicitDeref(Box::new(field))
                } else {
                    field
                })
            }
            LegalVal::Tuple(_) => base.tuple_element(key).cloned().ok_or_else(|| {
                Error::invariant(format!(
                    "legalized tuple has no field `{}`",
                    self.module.field_name(key)
                ))
            }),
            LegalVal::Pair {
                ordinary,
                special,
                info,
            } => {
                let element = info.element(key).ok_or_else(|| {
                    Error::invariant(format!(
                        "pair has no record of field `{}`",
                        self.module.field_name(key)
                    ))
                })?;
                match element.side {
                    PairSide::Ordinary => self.field_val(ordinary, key, address, anchor),
                    PairSide::Special => self.field_val(special, key, address, anchor),
                    PairSide::Both => {
                        let field_info = element
                            .field_info
                            .clone()
                            .ok_or_else(|| Error::invariant("split field without pair info"))?;
                        Ok(LegalVal::Pair {
                            ordinary: Box::new(self.field_val(ordinary, key, address, anchor)?),
                            special: Box::new(self.field_val(special, key, address, anchor)?),
                            info: field_info,
                        })
                    }
                }
            }
        }
    }

    fn make_struct_val(
        &mut self,
        operands: &[LegalVal],
        result: &LegalType,
        anchor: InstId,
    ) -> Result<LegalVal> {
        match result {
            LegalType::Tuple(tuple) => Ok(LegalVal::Tuple(
                tuple
                    .elements
                    .iter()
                    .zip(operands)
                    .map(|(e, v)| (e.key, v.clone()))
                    .collect(),
            )),
            LegalType::Pair(pair) => {
                let mut ordinary = Vec::new();
                let mut special = Vec::new();
                for (element, value) in pair.info.elements.iter().zip(operands) {
                    match (element.side, value) {
                        (PairSide::Ordinary, LegalVal::Simple(v)) => ordinary.push(*v),
                        (PairSide::Special, v) => special.push((element.key, v.clone())),
                        (
                            PairSide::Both,
                            LegalVal::Pair {
                                ordinary: o,
                                special: s,
                                ..
                            },
                        ) => {
                            ordinary.push(o.as_simple().ok_or_else(|| {
                                Error::invariant("ordinary half of a split field is not simple")
                            })?);
                            special.push((element.key, (**s).clone()));
                        }
                        _ => {
                            return Err(Error::invariant(
                                "struct field value does not match its legalized placement",
                            ))
                        }
                    }
                }
                let ordinary_ty = pair
                    .ordinary
                    .as_simple()
                    .ok_or_else(|| Error::invariant("ordinary half of a pair is not simple"))?;
                let loc = self.module.inst(anchor).loc.clone();
                let mut b = Builder::new(self.module);
                b.set_insert_before(anchor);
                b.set_loc(loc);
                let aggregate = b.make_struct(ordinary_ty, ordinary);
                Ok(LegalVal::Pair {
                    ordinary: Box::new(LegalVal::Simple(aggregate)),
                    special: Box::new(LegalVal::Tuple(special)),
                    info: pair.info.clone(),
                })
            }
            _ => Err(Error::invariant("struct construction with a non-aggregate legal type")),
        }
    }

    /// Pass temporaries for the leaves of the callee's result and read them
    /// back after the call
    fn call_with_out_params(
        &mut self,
        call: InstId,
        operands: &[LegalVal],
        legal: &LegalType,
    ) -> Result<()> {
        let loc = self.module.inst(call).loc.clone();
        let leaves = legal.leaf_types();
        let mut temps = Vec::with_capacity(leaves.len());
        {
            let mut b = Builder::new(self.module);
            b.set_insert_before(call);
            b.set_loc(loc.clone());
            for (_, ty) in &leaves {
                temps.push(b.var(*ty));
            }
        }

        let mut args = Vec::with_capacity(operands.len() + temps.len());
        args.extend(operands.first().and_then(LegalVal::as_simple));
        for value in operands.iter().skip(1) {
            args.extend(value.leaves());
        }
        args.extend(temps.iter().copied());
        let inst = self.module.inst_mut(call);
        inst.operands = args;
        inst.ty = None;

        let mut loads = Vec::with_capacity(temps.len());
        let mut after = call;
        for (temp, (_, ty)) in temps.into_iter().zip(leaves) {
            let mut load = Inst::new(Op::Load, Some(ty), vec![temp]);
            load.loc = loc.clone();
            after = self.module.insert_after(after, load)?;
            loads.push(after);
        }
        let value = LegalVal::from_leaves(legal, &mut loads.into_iter())?;
        self.values.insert(call, value);
        Ok(())
    }

    fn return_through_out_params(
        &mut self,
        ret: InstId,
        operands: &[LegalVal],
        outs: &[InstId],
    ) -> Result<()> {
        let value = operands.first().ok_or_else(|| {
            Error::invariant("return without a value from a function with a result")
        })?;
        let leaves = value.leaves();
        if leaves.len() != outs.len() {
            return Err(Error::invariant(format!(
                "returned value has {} parts but the function has {} out parameters",
                leaves.len(),
                outs.len()
            )));
        }
        let loc = self.module.inst(ret).loc.clone();
        let mut b = Builder::new(self.module);
        b.set_insert_before(ret);
        b.set_loc(loc);
        for (&out, leaf) in outs.iter().zip(leaves) {
            b.store(out, leaf);
        }
        self.module.inst_mut(ret).operands.clear();
        Ok(())
    }
}

/// `base` followed by the field names along `path`
fn leaf_name(module: &Module, base: &str, path: &[FieldKey], separator: &str) -> String {
    let mut name = base.to_string();
    for &key in path {
        name.push_str(separator);
        name.push_str(module.field_name(key));
    }
    name
}

/// Layout of the storage reached by `path`, with offsets summed along the
/// chain of enclosing layouts
fn leaf_layout(chain: &BindingChain<'_>, path: &[FieldKey]) -> VarLayout {
    let Some((&key, rest)) = path.split_first() else {
        return chain.flatten();
    };
    let type_layout = &chain.layout.type_layout;
    match &**type_layout {
        TypeLayout::ParameterGroup { element, .. } => {
            let inner = chain.push(element);
            match element.type_layout.field(key) {
                Some(field) => leaf_layout(&inner.push(field), rest),
                None => inner.flatten(),
            }
        }
        TypeLayout::Struct { .. } => match type_layout.field(key) {
            Some(field) => leaf_layout(&chain.push(field), rest),
            None => chain.flatten(),
        },
        _ => chain.flatten(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::{ResourceKind, ScalarKind, TextureShape, TextureType, Type};
    use crate::compiler::target::Stage;

    const SPLIT: TargetCapabilities = TargetCapabilities {
        resources_in_structs: false,
        arrays_of_resources: true,
    };

    struct Material {
        ty: TypeId,
        albedo: FieldKey,
        map: FieldKey,
        float4: TypeId,
        texture: TypeId,
    }

    fn material(module: &mut Module) -> Material {
        let float4 = module.types.vector(ScalarKind::Float, 4);
        let texture = module
            .types
            .intern(Type::Texture(TextureType::sampled(TextureShape::Texture2D, float4)));
        let id = module.add_struct("Material", &[("albedo", float4), ("map", texture)]);
        Material {
            ty: module.struct_type(id),
            albedo: module.field_key(id, "albedo").expect("albedo"),
            map: module.field_key(id, "map").expect("map"),
            float4,
            texture,
        }
    }

    fn mark_entry(module: &mut Module, func: InstId) {
        module.inst_mut(func).decorate(Decoration::EntryPoint {
            stage: Stage::Fragment,
            name: "main".into(),
        });
    }

    #[test]
    fn test_global_param_split_with_summed_binding() {
        let mut module = Module::new("params");
        let m = material(&mut module);
        let layout = VarLayout::new(TypeLayout::Struct {
            fields: vec![
                (m.albedo, Rc::new(VarLayout::simple().with_resource(ResourceKind::Uniform, 0, 0))),
                (m.map, Rc::new(VarLayout::simple().with_resource(ResourceKind::ShaderResource, 1, 0))),
            ],
        })
        .with_resource(ResourceKind::ShaderResource, 2, 0);

        let mut b = Builder::new(&mut module);
        let param = b.global_param("mat", m.ty, Some(layout));
        let (main, _) = b.func_with_body("main", vec![], m.float4);
        let map = b.field_extract(param, m.map);
        let sample = b.func("sample", vec![m.texture], m.float4);
        let texel = b.call(sample, vec![map]);
        b.ret(Some(texel));
        mark_entry(&mut module, main);

        let mut sink = DiagnosticSink::new();
        let stats = legalize_module(&mut module, SPLIT, &mut sink).expect("legalize");
        assert!(!sink.has_errors());
        assert_eq!(stats.declarations_split, 1);
        assert!(module.inst(param).removed);

        let parts = &module.legalized_decls["mat"];
        let paths: Vec<&str> = parts.iter().map(|p| p.path.as_str()).collect();
        assert_eq!(paths, vec!["mat", "mat.map"]);

        let texture_global = parts[1].inst;
        assert_eq!(module.inst(texture_global).name.as_deref(), Some("mat_map"));
        let binding = module
            .inst(texture_global)
            .layout()
            .and_then(|l| l.resource_info(ResourceKind::ShaderResource))
            .map(|info| info.index);
        assert_eq!(binding, Some(3));
        assert_eq!(module.inst(texel).operands, vec![sample, texture_global]);
    }

    #[test]
    fn test_local_variable_split_into_parts() {
        let mut module = Module::new("locals");
        let m = material(&mut module);
        let mut b = Builder::new(&mut module);
        let source = b.global_param("src", m.ty, None);
        let (main, _) = b.func_with_body("main", vec![], m.float4);
        let var = b.var(m.ty);
        b.store(var, source);
        let albedo_ptr = b.field_address(var, m.albedo);
        let albedo = b.load(albedo_ptr);
        b.ret(Some(albedo));
        mark_entry(&mut module, main);

        let mut sink = DiagnosticSink::new();
        legalize_module(&mut module, SPLIT, &mut sink).expect("legalize");
        assert!(!sink.has_errors());
        assert!(module.inst(var).removed);

        let vars: Vec<InstId> = module
            .func_insts(main)
            .into_iter()
            .filter(|&i| module.inst(i).op == Op::Var)
            .collect();
        assert_eq!(vars.len(), 2);
        let stores = module
            .func_insts(main)
            .into_iter()
            .filter(|&i| module.inst(i).op == Op::Store)
            .count();
        assert_eq!(stores, 2);
        assert!(!module.inst(albedo).removed);
        assert_eq!(
            module.inst(module.inst(albedo).operands[0]).op,
            Op::FieldAddress(m.albedo)
        );
    }

    #[test]
    fn test_split_result_returned_through_out_params() {
        let mut module = Module::new("results");
        let m = material(&mut module);
        let mut b = Builder::new(&mut module);
        let texture = b.global_param("t", m.texture, None);
        let (make, _) = b.func_with_body("make", vec![], m.ty);
        let albedo = b.undefined(m.float4);
        let value = b.make_struct(m.ty, vec![albedo, texture]);
        b.ret(Some(value));

        let (main, _) = b.func_with_body("main", vec![], m.float4);
        let made = b.call(make, vec![]);
        let picked = b.field_extract(made, m.albedo);
        b.ret(Some(picked));
        mark_entry(&mut module, main);

        let mut sink = DiagnosticSink::new();
        let stats = legalize_module(&mut module, SPLIT, &mut sink).expect("legalize");
        assert!(!sink.has_errors());
        assert_eq!(stats.functions_rewritten, 1);

        let fn_ty = module.type_of(make).expect("typed");
        let (params, result) = module.types.func_signature(fn_ty).expect("signature");
        assert_eq!(params.len(), 2);
        assert!(module.types.is_void(result));
        assert_eq!(module.inst(made).operands.len(), 3);
        assert_eq!(module.inst(made).ty, None);
    }

    #[test]
    fn test_targets_with_resources_in_structs_keep_aggregates() {
        let mut module = Module::new("hlsl");
        let m = material(&mut module);
        let mut b = Builder::new(&mut module);
        let param = b.global_param("mat", m.ty, None);
        let mut sink = DiagnosticSink::new();
        let stats = legalize_module(
            &mut module,
            TargetCapabilities {
                resources_in_structs: true,
                arrays_of_resources: true,
            },
            &mut sink,
        )
        .expect("legalize");
        assert_eq!(stats, LegalizeStats::default());
        assert!(!module.inst(param).removed);
    }
}
