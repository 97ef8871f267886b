//! Tests for generics lowering: dynamic dispatch, existential tuples,
//! any-value marshalling and the diagnostics each stage reports

use shadegen::compiler::ir::{
    BinaryOp, BlockId, Builder, Decoration, GenericParam, Inst, InstId, Module, Op, Requirement,
    ScalarKind, Type,
};
use shadegen::compiler::{lower_generics, Stage};
use shadegen::DiagnosticSink;

fn mark_entry(module: &mut Module, func: InstId) {
    module.inst_mut(func).decorate(Decoration::EntryPoint {
        stage: Stage::Fragment,
        name: "main".into(),
    });
}

fn is_generic_op(op: &Op) -> bool {
    matches!(
        op,
        Op::MakeExistential
            | Op::MakeExistentialWithRtti
            | Op::ExtractExistentialValue
            | Op::ExtractExistentialType
            | Op::ExtractExistentialWitnessTable
            | Op::LookupWitnessMethod { .. }
            | Op::PackAnyValue
            | Op::UnpackAnyValue
            | Op::Specialize
            | Op::WitnessTable { .. }
            | Op::RttiObject { .. }
            | Op::Interface { .. }
    )
}

/// Module with `IShape { float area(This) }`, conformances for `float` and
/// `float2`, and an entry point measuring a circle through an existential
struct Shapes {
    module: Module,
    existential: InstId,
    measure: InstId,
}

fn shapes_module() -> Shapes {
    let mut module = Module::new("shapes");
    let float = module.types.float();
    let float2 = module.types.vector(ScalarKind::Float, 2);
    let this = module.types.intern(Type::This);
    let witness_ty = module.types.intern(Type::WitnessTableId);

    let mut iface_inst = Inst::new(
        Op::Interface {
            requirements: vec![Requirement {
                name: "area".into(),
                params: vec![this],
                result: float,
            }],
        },
        None,
        vec![],
    );
    iface_inst.name = Some("IShape".into());
    let iface = module.add_global(iface_inst);

    let mut b = Builder::new(&mut module);
    let (circle_area, circle) = b.func_with_body("circle_area", vec![float], float);
    let squared = b.binary(BinaryOp::Mul, float, circle[0], circle[0]);
    b.ret(Some(squared));
    let (rect_area, rect) = b.func_with_body("rect_area", vec![float2], float);
    let w = b.swizzle(rect[0], vec![0], float);
    let h = b.swizzle(rect[0], vec![1], float);
    let product = b.binary(BinaryOp::Mul, float, w, h);
    b.ret(Some(product));

    let circle_table = b.module().add_global(Inst::new(
        Op::WitnessTable {
            interface: iface,
            concrete: float,
        },
        Some(witness_ty),
        vec![circle_area],
    ));
    b.module().add_global(Inst::new(
        Op::WitnessTable {
            interface: iface,
            concrete: float2,
        },
        Some(witness_ty),
        vec![rect_area],
    ));

    let shape_ty = b.interface_type(iface);
    let area_ty = b.module().types.func(vec![this], float);
    let (measure, shape) = b.func_with_body("measure", vec![shape_ty], float);
    let table = b.emit(Op::ExtractExistentialWitnessTable, Some(witness_ty), vec![shape[0]]);
    let value = b.emit(Op::ExtractExistentialValue, Some(this), vec![shape[0]]);
    let method = b.lookup_witness_method(table, iface, 0, area_ty);
    let area = b.call_typed(method, vec![value], Some(float));
    b.ret(Some(area));

    let (main, _) = b.func_with_body("entry", vec![], float);
    let radius = b.module().float_lit(2.0);
    let existential = b.make_existential(shape_ty, radius, circle_table);
    let measured = b.call_typed(measure, vec![existential], Some(float));
    b.ret(Some(measured));
    mark_entry(&mut module, main);

    Shapes {
        module,
        existential,
        measure,
    }
}

// ====================
// Dynamic Dispatch
// ====================

#[test]
fn test_dynamic_call_goes_through_generated_dispatcher() {
    let Shapes { mut module, .. } = shapes_module();
    let mut sink = DiagnosticSink::new();
    let stats = lower_generics(&mut module, 16, &mut sink).expect("lowering");

    assert!(!sink.has_errors(), "{:?}", sink.diagnostics());
    assert_eq!(stats.dynamic_calls_lowered, 1);
    assert_eq!(stats.dispatch_functions, 1);
    assert_eq!(stats.witness_tables_eliminated, 2);
    assert_eq!(stats.interfaces_eliminated, 1);
    assert_eq!(stats.existentials_augmented, 1);

    let dispatcher = module.global_by_name("dispatch_IShape_area").expect("dispatcher");
    let entry = module.entry_block(dispatcher).expect("body");
    let term = module.terminator(entry).expect("terminator");
    match &module.inst(term).op {
        Op::Switch { cases, default, .. } => {
            assert_eq!(cases.len(), 2);
            assert_eq!(*default, cases[1]);
        }
        other => panic!("expected switch, got {:?}", other),
    }
}

#[test]
fn test_no_generic_constructs_survive_lowering() {
    let Shapes { mut module, .. } = shapes_module();
    let mut sink = DiagnosticSink::new();
    lower_generics(&mut module, 16, &mut sink).expect("lowering");

    for id in module.live_insts() {
        let op = &module.inst(id).op;
        assert!(!is_generic_op(op), "%{} is still {}", id.0, op.mnemonic());
        if let Some(ty) = module.inst(id).ty {
            assert!(
                !matches!(
                    module.types.get(ty),
                    Type::Interface(_) | Type::WitnessTableId | Type::RttiHandle | Type::This
                ),
                "%{} still has a generic type",
                id.0
            );
        }
    }
}

#[test]
fn test_existential_becomes_three_field_tuple_with_dense_ids() {
    let Shapes {
        mut module,
        existential,
        measure,
    } = shapes_module();
    let mut sink = DiagnosticSink::new();
    lower_generics(&mut module, 16, &mut sink).expect("lowering");

    let inst = module.inst(existential);
    assert_eq!(inst.op, Op::MakeStruct);
    assert_eq!(inst.operands.len(), 3);
    // first RTTI object and first witness table both get id 0
    assert_eq!(module.inst(inst.operands[0]).op, Op::IntLit(0));
    assert_eq!(module.inst(inst.operands[1]).op, Op::IntLit(0));

    let tuple = inst.ty.expect("typed");
    let param_ty = module.type_of(module.func_params(measure)[0]).expect("param type");
    assert_eq!(param_ty, tuple);
}

#[test]
fn test_interface_without_conformances_is_reported() {
    let mut module = Module::new("lonely");
    let float = module.types.float();
    let this = module.types.intern(Type::This);
    let witness_ty = module.types.intern(Type::WitnessTableId);
    let mut iface_inst = Inst::new(
        Op::Interface {
            requirements: vec![Requirement {
                name: "weight".into(),
                params: vec![this],
                result: float,
            }],
        },
        None,
        vec![],
    );
    iface_inst.name = Some("IHeavy".into());
    let iface = module.add_global(iface_inst);

    let mut b = Builder::new(&mut module);
    let shape_ty = b.interface_type(iface);
    let fn_ty = b.module().types.func(vec![this], float);
    let (main, params) = b.func_with_body("entry", vec![shape_ty], float);
    let table = b.emit(Op::ExtractExistentialWitnessTable, Some(witness_ty), vec![params[0]]);
    let value = b.emit(Op::ExtractExistentialValue, Some(this), vec![params[0]]);
    let method = b.lookup_witness_method(table, iface, 0, fn_ty);
    let weight = b.call_typed(method, vec![value], Some(float));
    b.ret(Some(weight));
    mark_entry(&mut module, main);

    let mut sink = DiagnosticSink::new();
    let stats = lower_generics(&mut module, 16, &mut sink).expect("lowering returns diagnostics");
    assert_eq!(sink.error_count(), 1);
    assert!(sink.diagnostics()[0].message.contains("no type conforms to interface `IHeavy`"));
    assert_eq!(stats.dispatch_functions, 0);
}

// ====================
// Generic Functions
// ====================

fn generic_identity(module: &mut Module) -> (InstId, BlockId) {
    let t = module.types.intern(Type::GenericParam(0));
    let rtti_ty = module.types.intern(Type::RttiHandle);
    let placeholder = module.create_inst(Inst::new(Op::Param, Some(rtti_ty), vec![]));
    let mut b = Builder::new(module);
    let (identity, params) = b.func_with_body("identity", vec![t], t);
    let entry = b.current_block().expect("positioned");
    b.ret(Some(params[0]));
    module.inst_mut(identity).decorate(Decoration::Generic(vec![GenericParam {
        name: "T".into(),
        constraint: None,
        rtti: placeholder,
        witness: None,
    }]));
    (identity, entry)
}

#[test]
fn test_value_larger_than_any_value_is_reported() {
    let mut module = Module::new("big");
    let (identity, _) = generic_identity(&mut module);
    let float4 = module.types.vector(ScalarKind::Float, 4);
    let rtti_ty = module.types.intern(Type::RttiHandle);
    let rtti = module.add_global(Inst::new(Op::RttiObject { concrete: float4 }, Some(rtti_ty), vec![]));

    let mut b = Builder::new(&mut module);
    let spec_ty = b.module().types.func(vec![float4], float4);
    let (main, params) = b.func_with_body("entry", vec![float4], float4);
    let spec = b.specialize(identity, vec![rtti], spec_ty);
    let copy = b.call_typed(spec, vec![params[0]], Some(float4));
    b.ret(Some(copy));
    mark_entry(&mut module, main);

    let mut sink = DiagnosticSink::new();
    lower_generics(&mut module, 8, &mut sink).expect("lowering returns diagnostics");
    assert!(sink.has_errors());
    assert!(sink
        .diagnostics()
        .iter()
        .any(|d| d.message.contains("needs 16 bytes but an any-value holds 8")));
}

#[test]
fn test_specialization_used_as_value_is_reported() {
    let mut module = Module::new("escape");
    let (identity, _) = generic_identity(&mut module);
    let float = module.types.float();
    let void = module.types.void();
    let rtti_ty = module.types.intern(Type::RttiHandle);
    let rtti = module.add_global(Inst::new(Op::RttiObject { concrete: float }, Some(rtti_ty), vec![]));

    let mut b = Builder::new(&mut module);
    let spec_ty = b.module().types.func(vec![float], float);
    let keep = b.func("keep", vec![spec_ty], void);
    let (main, _) = b.func_with_body("entry", vec![], void);
    let spec = b.specialize(identity, vec![rtti], spec_ty);
    b.call(keep, vec![spec]);
    b.ret(None);
    mark_entry(&mut module, main);

    let mut sink = DiagnosticSink::new();
    lower_generics(&mut module, 16, &mut sink).expect("lowering returns diagnostics");
    assert!(sink
        .diagnostics()
        .iter()
        .any(|d| d.message.contains("can only be called, not used as a value")));
}

#[test]
fn test_module_without_generics_is_left_alone() {
    let mut module = Module::new("plain");
    let float = module.types.float();
    let mut b = Builder::new(&mut module);
    let (main, params) = b.func_with_body("entry", vec![float], float);
    b.ret(Some(params[0]));
    mark_entry(&mut module, main);
    let globals_before = module.globals().len();

    let mut sink = DiagnosticSink::new();
    let stats = lower_generics(&mut module, 16, &mut sink).expect("lowering");
    assert!(!sink.has_errors());
    assert_eq!(stats.generic_functions_lowered, 0);
    assert_eq!(stats.marshalling_functions, 0);
    assert_eq!(module.globals().len(), globals_before);
    assert_eq!(module.structs().count(), 0);
}
