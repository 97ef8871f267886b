//! # Generics Lowering
//!
//! Removes generic functions, interface-typed values and witness tables from
//! a module so that every remaining value has a concrete target type.
//!
//! ## Stages
//!
//! ```text
//! 1. augment existentials      MakeExistential -> MakeExistentialWithRtti
//! 2. lower generic functions   thread RTTI/witness params, any-value retyping
//! 3. lower generic types       AnyValue{N} structs + pack/unpack functions
//! 4. lower existentials        interface values -> {rtti, witness, payload}
//! 5. lower generic calls       devirtualize or switch-dispatch by witness id
//! 6. specialize RTTI objects   witness tables / RTTI objects -> u64 ids
//! 7. cleanup                   SSA reconstruction + dead code elimination
//! ```
//!
//! Every stage reports user errors through the [`DiagnosticSink`]; the
//! pipeline stops after the first stage that leaves a nonzero error count.

mod any_value;
mod dispatch;

use super::ir::{
    Builder, Decoration, FieldKey, GenericParam, Inst, InstId, Module, Op, ScalarKind, Type, TypeId,
};
use super::optimizer::Optimizer;
use crate::diagnostics::DiagnosticSink;
use crate::{Error, Result};
use std::collections::HashMap;

/// Counters reported by [`lower_generics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct GenericsLoweringStats {
    /// `MakeExistential` instructions given an explicit RTTI operand
    pub existentials_augmented: usize,
    /// Generic function definitions rewritten to take runtime type arguments
    pub generic_functions_lowered: usize,
    /// Calls through `Specialize` rewritten into direct calls
    pub specialized_calls_lowered: usize,
    /// Generated pack and unpack functions
    pub marshalling_functions: usize,
    /// Existential constructions and projections rewritten onto the tuple
    pub existentials_lowered: usize,
    /// Interface calls resolved through a statically known witness table
    pub devirtualized_calls: usize,
    /// Interface calls routed through a dispatch function
    pub dynamic_calls_lowered: usize,
    /// Generated dispatch functions
    pub dispatch_functions: usize,
    /// Witness tables replaced by their integer id
    pub witness_tables_eliminated: usize,
    /// RTTI objects replaced by their integer id
    pub rtti_objects_eliminated: usize,
    /// Interface declarations deleted
    pub interfaces_eliminated: usize,
    /// Variables promoted by the closing cleanup
    pub promoted_variables: usize,
    /// Instructions deleted by the closing cleanup
    pub removed_instructions: usize,
}

/// Lower every generic construct in `module`.
///
/// Returns the stage counters; user errors are left in `sink` and stop the
/// remaining stages.
pub fn lower_generics(
    module: &mut Module,
    any_value_size: u32,
    sink: &mut DiagnosticSink,
) -> Result<GenericsLoweringStats> {
    let mut pass = GenericsLowering::new(module, sink, any_value_size);
    pass.run()?;
    Ok(pass.stats)
}

/// Generated `AnyValue{N}` struct
#[derive(Debug, Clone, Copy)]
struct AnyValueLayout {
    ty: TypeId,
    data: FieldKey,
    words: u32,
}

/// Generated existential tuple struct
#[derive(Debug, Clone, Copy)]
struct ExistentialLayout {
    ty: TypeId,
    rtti: FieldKey,
    witness: FieldKey,
    payload: FieldKey,
}

type Stage<'a> = fn(&mut GenericsLowering<'a>) -> Result<()>;

/// State shared by all stages of one lowering run
struct GenericsLowering<'a> {
    module: &'a mut Module,
    sink: &'a mut DiagnosticSink,
    any_value_size: u32,
    witness_ids: Vec<(InstId, u64)>,
    rtti_ids: Vec<(InstId, u64)>,
    rtti_for_type: HashMap<TypeId, InstId>,
    any_values: HashMap<u32, AnyValueLayout>,
    marshalling: HashMap<(TypeId, TypeId), (InstId, InstId)>,
    existential: Option<ExistentialLayout>,
    wrappers: HashMap<(InstId, u32), InstId>,
    dispatchers: HashMap<(InstId, u32), InstId>,
    stats: GenericsLoweringStats,
}

impl<'a> GenericsLowering<'a> {
    fn new(module: &'a mut Module, sink: &'a mut DiagnosticSink, any_value_size: u32) -> Self {
        Self {
            module,
            sink,
            any_value_size,
            witness_ids: Vec::new(),
            rtti_ids: Vec::new(),
            rtti_for_type: HashMap::new(),
            any_values: HashMap::new(),
            marshalling: HashMap::new(),
            existential: None,
            wrappers: HashMap::new(),
            dispatchers: HashMap::new(),
            stats: GenericsLoweringStats::default(),
        }
    }

    fn run(&mut self) -> Result<()> {
        self.assign_ids();

        let stages: [(&str, Stage<'a>); 7] = [
            ("augment existentials", Self::augment_existentials),
            ("lower generic functions", Self::lower_generic_functions),
            ("lower generic types", Self::lower_generic_types),
            ("lower existentials", Self::lower_existentials),
            ("lower generic calls", Self::lower_generic_calls),
            ("specialize RTTI objects", Self::specialize_rtti_objects),
            ("cleanup", Self::cleanup),
        ];

        for (name, stage) in stages {
            tracing::debug!(stage = name, "generics lowering");
            stage(self)?;
            if self.sink.has_errors() {
                tracing::debug!(
                    stage = name,
                    errors = self.sink.error_count(),
                    "generics lowering stopped"
                );
                return Ok(());
            }
        }

        tracing::debug!(stats = ?self.stats, "generics lowering complete");
        Ok(())
    }

    // =========================================================================
    // Identity assignment
    // =========================================================================

    /// Number witness tables and RTTI objects in module order
    fn assign_ids(&mut self) {
        for &global in self.module.globals() {
            match &self.module.inst(global).op {
                Op::WitnessTable { .. } => {
                    let id = self.witness_ids.len() as u64;
                    self.witness_ids.push((global, id));
                }
                Op::RttiObject { concrete } => {
                    let id = self.rtti_ids.len() as u64;
                    self.rtti_ids.push((global, id));
                    self.rtti_for_type.insert(*concrete, global);
                }
                _ => {}
            }
        }
    }

    /// RTTI object describing `concrete`, created on first request
    fn rtti_object_for(&mut self, concrete: TypeId) -> InstId {
        if let Some(&existing) = self.rtti_for_type.get(&concrete) {
            return existing;
        }
        let handle = self.module.types.intern(Type::RttiHandle);
        let mut inst = Inst::new(Op::RttiObject { concrete }, Some(handle), Vec::new());
        inst.name = Some(format!("rtti_{}", type_label(self.module, concrete)));
        let global = self.module.add_global(inst);
        let id = self.rtti_ids.len() as u64;
        self.rtti_ids.push((global, id));
        self.rtti_for_type.insert(concrete, global);
        global
    }

    fn any_value_type(&mut self) -> TypeId {
        self.module.types.intern(Type::AnyValue {
            size: self.any_value_size,
        })
    }

    fn ops_matching(&self, pred: impl Fn(&Op) -> bool) -> Vec<InstId> {
        self.module
            .live_insts()
            .filter(|&id| pred(&self.module.inst(id).op))
            .collect()
    }

    // =========================================================================
    // Stage 1: explicit RTTI on existential construction
    // =========================================================================

    fn augment_existentials(&mut self) -> Result<()> {
        for id in self.ops_matching(|op| matches!(op, Op::MakeExistential)) {
            let value = *self
                .module
                .inst(id)
                .operands
                .first()
                .ok_or_else(|| Error::invariant("make_existential without a value operand"))?;
            let concrete = self.module.type_of(value)?;
            let rtti = self.rtti_object_for(concrete);
            let inst = self.module.inst_mut(id);
            inst.op = Op::MakeExistentialWithRtti;
            inst.operands.push(rtti);
            self.stats.existentials_augmented += 1;
        }
        Ok(())
    }

    // =========================================================================
    // Stage 2: generic functions
    // =========================================================================

    fn lower_generic_functions(&mut self) -> Result<()> {
        let generics: Vec<(InstId, Vec<GenericParam>)> = self
            .module
            .globals()
            .iter()
            .filter_map(|&g| {
                let inst = self.module.inst(g);
                match (inst.op == Op::Func, inst.generic_params()) {
                    (true, Some(params)) if !inst.body.is_empty() => Some((g, params.to_vec())),
                    _ => None,
                }
            })
            .collect();
        if generics.is_empty() {
            return Ok(());
        }
        let any_ty = self.any_value_type();

        // Call sites are rewritten against the still-generic signatures.
        for (func, _) in &generics {
            let fn_ty = self.module.type_of(*func)?;
            let (params, result) = match self.module.types.func_signature(fn_ty) {
                Some((params, result)) => (params.to_vec(), result),
                None => return Err(Error::invariant("generic function without a function type")),
            };
            let specializations: Vec<InstId> = self
                .module
                .uses_of(*func)
                .into_iter()
                .filter(|&u| {
                    let inst = self.module.inst(u);
                    inst.op == Op::Specialize && inst.operands.first() == Some(func)
                })
                .collect();
            for spec in specializations {
                self.lower_specialization(spec, *func, &params, result, any_ty)?;
            }
        }

        for (func, params) in generics {
            self.lower_generic_definition(func, &params, any_ty)?;
        }
        Ok(())
    }

    fn lower_specialization(
        &mut self,
        spec: InstId,
        func: InstId,
        params: &[TypeId],
        result: TypeId,
        any_ty: TypeId,
    ) -> Result<()> {
        let type_args = self.module.inst(spec).operands[1..].to_vec();

        for user in self.module.uses_of(spec) {
            let inst = self.module.inst(user);
            let is_direct_call = inst.op == Op::Call
                && inst.operands.first() == Some(&spec)
                && !inst.operands[1..].contains(&spec);
            if !is_direct_call {
                let loc = inst.loc.clone();
                self.sink.error(
                    loc.as_ref(),
                    "a specialized generic function can only be called, not used as a value",
                );
                continue;
            }
            let args = inst.operands[1..].to_vec();
            let loc = inst.loc.clone();
            let call_ty = inst.ty;
            if args.len() != params.len() {
                return Err(Error::invariant(format!(
                    "call %{} passes {} arguments to a function taking {}",
                    user.0,
                    args.len(),
                    params.len()
                )));
            }

            let mut operands = Vec::with_capacity(1 + type_args.len() + args.len());
            operands.push(func);
            operands.extend_from_slice(&type_args);
            let mut b = Builder::new(self.module);
            b.set_insert_before(user);
            b.set_loc(loc.clone());
            for (&arg, &param_ty) in args.iter().zip(params) {
                if matches!(b.module_ref().types.get(param_ty), Type::GenericParam(_)) {
                    operands.push(b.emit(Op::PackAnyValue, Some(any_ty), vec![arg]));
                } else {
                    if mentions_generic(&b.module_ref().types, param_ty) {
                        self.sink.error(
                            loc.as_ref(),
                            "generic type parameters can only be passed by value",
                        );
                    }
                    operands.push(arg);
                }
            }
            self.module.inst_mut(user).operands = operands;

            if matches!(self.module.types.get(result), Type::GenericParam(_)) {
                let mut unpack = Inst::new(Op::UnpackAnyValue, call_ty, vec![user]);
                unpack.loc = loc;
                self.module.inst_mut(user).ty = Some(any_ty);
                let unpack = self.module.insert_after(user, unpack)?;
                self.module.replace_all_uses(user, unpack);
                self.module.inst_mut(unpack).operands = vec![user];
            }
            self.stats.specialized_calls_lowered += 1;
            tracing::trace!(call = user.0, "lowered specialized call");
        }

        if self.module.uses_of(spec).is_empty() {
            self.module.remove_inst(spec);
        }
        Ok(())
    }

    fn lower_generic_definition(
        &mut self,
        func: InstId,
        params: &[GenericParam],
        any_ty: TypeId,
    ) -> Result<()> {
        let entry = self
            .module
            .entry_block(func)
            .ok_or_else(|| Error::invariant("generic definition without a body"))?;
        let rtti_ty = self.module.types.intern(Type::RttiHandle);
        let witness_ty = self.module.types.intern(Type::WitnessTableId);

        let mut index = 0;
        for param in params {
            let rtti = self.module.insert_block_param(entry, index, rtti_ty);
            self.module
                .inst_mut(rtti)
                .decorate(Decoration::NameHint(format!("{}_type", param.name)));
            self.module.replace_all_uses(param.rtti, rtti);
            self.module.remove_inst(param.rtti);
            index += 1;
            if let Some(placeholder) = param.witness {
                let witness = self.module.insert_block_param(entry, index, witness_ty);
                self.module
                    .inst_mut(witness)
                    .decorate(Decoration::NameHint(format!("{}_witness", param.name)));
                self.module.replace_all_uses(placeholder, witness);
                self.module.remove_inst(placeholder);
                index += 1;
            }
        }

        let mut memo = HashMap::new();
        let mut to_any = |types: &mut super::ir::TypeTable, ty: TypeId| {
            matches!(types.get(ty), Type::GenericParam(_)).then_some(any_ty)
        };
        for id in self.module.func_insts(func) {
            if let Some(ty) = self.module.inst(id).ty {
                let ty = self.module.types.rewrite(ty, &mut to_any, &mut memo);
                self.module.inst_mut(id).ty = Some(ty);
            }
        }
        let fn_ty = self.module.type_of(func)?;
        let fn_ty = self.module.types.rewrite(fn_ty, &mut to_any, &mut memo);
        self.module.inst_mut(func).ty = Some(fn_ty);
        self.module.refresh_func_type(func)?;
        self.module
            .inst_mut(func)
            .strip_decorations(|d| matches!(d, Decoration::Generic(_)));

        self.stats.generic_functions_lowered += 1;
        Ok(())
    }

    // =========================================================================
    // Stage 3: any-value types (see any_value.rs)
    // =========================================================================

    fn lower_generic_types(&mut self) -> Result<()> {
        self.lower_any_values()
    }

    // =========================================================================
    // Stage 4: existential values
    // =========================================================================

    fn existential_layout(&mut self) -> ExistentialLayout {
        if let Some(layout) = self.existential {
            return layout;
        }
        let rtti_ty = self.module.types.intern(Type::RttiHandle);
        let witness_ty = self.module.types.intern(Type::WitnessTableId);
        let any_ty = self.any_value_type();
        let id = self.module.add_struct(
            "Existential",
            &[("rtti", rtti_ty), ("witnessTable", witness_ty), ("payload", any_ty)],
        );
        let decl = self.module.struct_decl(id);
        let (rtti, witness, payload) = (decl.fields[0].key, decl.fields[1].key, decl.fields[2].key);
        let layout = ExistentialLayout {
            ty: self.module.struct_type(id),
            rtti,
            witness,
            payload,
        };
        self.existential = Some(layout);
        layout
    }

    fn lower_existentials(&mut self) -> Result<()> {
        let targets = self.ops_matching(|op| {
            matches!(
                op,
                Op::MakeExistential
                    | Op::MakeExistentialWithRtti
                    | Op::ExtractExistentialValue
                    | Op::ExtractExistentialType
                    | Op::ExtractExistentialWitnessTable
            )
        });
        let has_interface_types = (0..self.module.types.len())
            .any(|i| matches!(self.module.types.get(TypeId(i as u32)), Type::Interface(_)));
        if targets.is_empty() && !has_interface_types {
            return Ok(());
        }

        let layout = self.existential_layout();
        let any_ty = self.any_value_type();
        let rtti_ty = self.module.types.intern(Type::RttiHandle);
        let witness_ty = self.module.types.intern(Type::WitnessTableId);

        for id in targets {
            let op = self.module.inst(id).op.clone();
            match op {
                Op::MakeExistential => {
                    return Err(Error::invariant(
                        "make_existential without RTTI survived augmentation",
                    ));
                }
                Op::MakeExistentialWithRtti => {
                    let (value, witness, rtti) = match self.module.inst(id).operands[..] {
                        [value, witness, rtti] => (value, witness, rtti),
                        _ => return Err(Error::invariant("malformed make_existential")),
                    };
                    let loc = self.module.inst(id).loc.clone();
                    let mut b = Builder::new(self.module);
                    b.set_insert_before(id);
                    b.set_loc(loc);
                    let payload = b.emit(Op::PackAnyValue, Some(any_ty), vec![value]);
                    let inst = self.module.inst_mut(id);
                    inst.op = Op::MakeStruct;
                    inst.ty = Some(layout.ty);
                    inst.operands = vec![rtti, witness, payload];
                }
                Op::ExtractExistentialValue => {
                    let inst = self.module.inst_mut(id);
                    inst.op = Op::FieldExtract(layout.payload);
                    inst.ty = Some(any_ty);
                }
                Op::ExtractExistentialType => {
                    let inst = self.module.inst_mut(id);
                    inst.op = Op::FieldExtract(layout.rtti);
                    inst.ty = Some(rtti_ty);
                }
                Op::ExtractExistentialWitnessTable => {
                    let inst = self.module.inst_mut(id);
                    inst.op = Op::FieldExtract(layout.witness);
                    inst.ty = Some(witness_ty);
                }
                other => {
                    return Err(Error::invariant(format!(
                        "unexpected {} while lowering existentials",
                        other.mnemonic()
                    )));
                }
            }
            self.stats.existentials_lowered += 1;
        }

        let tuple = layout.ty;
        self.module
            .rewrite_types(&mut |types, ty| matches!(types.get(ty), Type::Interface(_)).then_some(tuple));
        self.lower_any_values()
    }

    // =========================================================================
    // Stage 5: interface calls (see dispatch.rs)
    // =========================================================================

    fn lower_generic_calls(&mut self) -> Result<()> {
        self.lower_interface_calls()?;
        self.lower_any_values()
    }

    // =========================================================================
    // Stage 6: witness tables and RTTI objects become integers
    // =========================================================================

    fn specialize_rtti_objects(&mut self) -> Result<()> {
        let id_ty = self.module.types.scalar(ScalarKind::UInt64);

        for (table, id) in std::mem::take(&mut self.witness_ids) {
            let literal = self.module.int_literal(id_ty, id as i64);
            self.module.replace_all_uses(table, literal);
            self.module.remove_inst(table);
            self.stats.witness_tables_eliminated += 1;
        }
        for (object, id) in std::mem::take(&mut self.rtti_ids) {
            let literal = self.module.int_literal(id_ty, id as i64);
            self.module.replace_all_uses(object, literal);
            self.module.remove_inst(object);
            self.stats.rtti_objects_eliminated += 1;
        }
        self.rtti_for_type.clear();

        let interfaces: Vec<InstId> = self
            .module
            .globals()
            .iter()
            .copied()
            .filter(|&g| matches!(self.module.inst(g).op, Op::Interface { .. }))
            .collect();
        if !interfaces.is_empty() {
            let placeholder = self.module.int_lit(0);
            for interface in interfaces {
                self.module.replace_all_uses(interface, placeholder);
                self.module.remove_inst(interface);
                self.stats.interfaces_eliminated += 1;
            }
        }

        let int_ty = self.module.types.int();
        self.module.rewrite_types(&mut |types, ty| match types.get(ty) {
            Type::WitnessTableId | Type::RttiHandle => Some(id_ty),
            Type::Interface(_) => Some(int_ty),
            _ => None,
        });
        Ok(())
    }

    // =========================================================================
    // Stage 7: cleanup
    // =========================================================================

    fn cleanup(&mut self) -> Result<()> {
        let cleanup = Optimizer::new().run(self.module)?;
        self.stats.promoted_variables += cleanup.promoted_variables;
        self.stats.removed_instructions += cleanup.removed_instructions;
        Ok(())
    }
}

/// True when `ty` refers to a generic type parameter anywhere in its structure
fn mentions_generic(types: &super::ir::TypeTable, ty: TypeId) -> bool {
    match types.get(ty) {
        Type::GenericParam(_) => true,
        Type::Array { element, .. }
        | Type::UniformBuffer { element, .. }
        | Type::StructuredBuffer { element, .. }
        | Type::StreamOutput { element, .. }
        | Type::Patch { element, .. } => mentions_generic(types, *element),
        Type::Ptr { pointee, .. } => mentions_generic(types, *pointee),
        Type::Func { params, result } => {
            params.iter().any(|&p| mentions_generic(types, p)) || mentions_generic(types, *result)
        }
        _ => false,
    }
}

/// Identifier-safe rendering of a type for generated names
fn type_label(module: &Module, ty: TypeId) -> String {
    let text = super::debug::format_type(module, ty);
    let mut label: String = text
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    while label.ends_with('_') {
        label.pop();
    }
    label
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::{BinaryOp, Requirement};
    use crate::compiler::target::Stage as ShaderStage;

    fn mark_entry(module: &mut Module, func: InstId) {
        module.inst_mut(func).decorate(Decoration::EntryPoint {
            stage: ShaderStage::Fragment,
            name: "main".into(),
        });
    }

    #[test]
    fn test_stats_default_is_zero() {
        assert_eq!(GenericsLoweringStats::default().dispatch_functions, 0);
    }

    #[test]
    fn test_generic_function_gains_type_params() {
        let mut module = Module::new("generic");
        let float = module.types.float();
        let t = module.types.intern(Type::GenericParam(0));
        let rtti_ty = module.types.intern(Type::RttiHandle);
        let rtti_placeholder = module.create_inst(Inst::new(Op::Param, Some(rtti_ty), vec![]));

        let mut b = Builder::new(&mut module);
        let (identity, params) = b.func_with_body("identity", vec![t], t);
        b.ret(Some(params[0]));
        let spec_ty = b.module().types.func(vec![float], float);

        let (main, _) = b.func_with_body("entry", vec![], float);
        let rtti_float = b.module().add_global(Inst::new(
            Op::RttiObject { concrete: float },
            Some(rtti_ty),
            vec![],
        ));
        let spec = b.specialize(identity, vec![rtti_float], spec_ty);
        let one = b.module().float_lit(1.0);
        let call = b.call_typed(spec, vec![one], Some(float));
        let sum = b.binary(BinaryOp::Add, float, call, one);
        b.ret(Some(sum));

        module.inst_mut(identity).decorate(Decoration::Generic(vec![GenericParam {
            name: "T".into(),
            constraint: None,
            rtti: rtti_placeholder,
            witness: None,
        }]));
        mark_entry(&mut module, main);

        let mut sink = DiagnosticSink::new();
        let stats = lower_generics(&mut module, 16, &mut sink).expect("lowering");
        assert!(!sink.has_errors(), "{:?}", sink.diagnostics());
        assert_eq!(stats.generic_functions_lowered, 1);
        assert_eq!(stats.specialized_calls_lowered, 1);
        assert_eq!(stats.marshalling_functions, 2);
        assert_eq!(module.func_params(identity).len(), 2);
        assert!(module.inst(identity).generic_params().is_none());
        assert_eq!(module.inst(call).operands[0], identity);
        assert!(module.global_by_name("pack_float").is_some());
        assert!(module.global_by_name("unpack_float").is_some());
    }

    #[test]
    fn test_witness_tables_become_ids() {
        let mut module = Module::new("ids");
        let float = module.types.float();
        let this = module.types.intern(Type::This);
        let iface = module.add_global(Inst::new(
            Op::Interface {
                requirements: vec![Requirement {
                    name: "area".into(),
                    params: vec![this],
                    result: float,
                }],
            },
            None,
            vec![],
        ));
        let mut b = Builder::new(&mut module);
        let area = b.func("circle_area", vec![float], float);
        let witness_ty = b.module().types.intern(Type::WitnessTableId);
        let table = b.module().add_global(Inst::new(
            Op::WitnessTable {
                interface: iface,
                concrete: float,
            },
            Some(witness_ty),
            vec![area],
        ));
        let fn_ty = b.module().types.func(vec![float], float);
        let (main, _) = b.func_with_body("entry", vec![], float);
        let lookup = b.lookup_witness_method(table, iface, 0, fn_ty);
        let two = b.module().float_lit(2.0);
        let call = b.call_typed(lookup, vec![two], Some(float));
        b.ret(Some(call));
        mark_entry(&mut module, main);

        let mut sink = DiagnosticSink::new();
        let stats = lower_generics(&mut module, 16, &mut sink).expect("lowering");
        assert_eq!(stats.devirtualized_calls, 1);
        assert_eq!(stats.witness_tables_eliminated, 1);
        assert_eq!(stats.interfaces_eliminated, 1);
        assert_eq!(module.inst(call).operands[0], area);
        assert!(module.inst(table).removed);
    }
}
