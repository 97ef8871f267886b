//! End-to-end tests: IR module in, shader source or stage diagnostics out

use shadegen::compiler::ir::{
    BinaryOp, Builder, Decoration, Inst, InstId, Module, Op, ProgramLayout, Requirement,
    ScalarKind, Type,
};
use shadegen::compiler::{CompileOptions, Compiler, Stage, TargetDescriptor};
use shadegen::Error;

fn mark_entry(module: &mut Module, func: InstId, stage: Stage, name: &str) {
    module.inst_mut(func).decorate(Decoration::EntryPoint {
        stage,
        name: name.into(),
    });
}

fn compile(module: &mut Module, target: TargetDescriptor) -> shadegen::Result<shadegen::CompileResult> {
    Compiler::new(CompileOptions::for_target(target)).compile(module, &ProgramLayout::default())
}

/// `float4 fragMain(float4 color : COLOR) : SV_Target { return color * tint; }`
fn tinted_fragment() -> Module {
    let mut module = Module::new("tint");
    let float4 = module.types.vector(ScalarKind::Float, 4);
    let mut b = Builder::new(&mut module);
    let tint = b.global_param("tint", float4, None);
    let (main, params) = b.func_with_body("fragMain", vec![float4], float4);
    let shaded = b.binary(BinaryOp::Mul, float4, params[0], tint);
    b.ret(Some(shaded));

    module.inst_mut(params[0]).decorate(Decoration::Semantic {
        name: "COLOR".into(),
        index: 0,
    });
    module.inst_mut(main).decorate(Decoration::Semantic {
        name: "SV_Target".into(),
        index: 0,
    });
    mark_entry(&mut module, main, Stage::Fragment, "fragMain");
    module
}

// ====================
// Successful Compilation
// ====================

#[test]
fn test_hlsl_fragment_shader_end_to_end() {
    let mut module = tinted_fragment();
    let result = compile(&mut module, TargetDescriptor::hlsl(50)).expect("compile");

    assert!(result.warnings.is_empty());
    assert!(!result.source.contains("#version"));
    assert!(result.source.contains("float4 tint;\n"));
    assert!(result.source.contains("float4 fragMain(float4 "));
    assert!(result.source.contains(" : COLOR) : SV_Target\n{\n"));
    assert!(result.source.contains(" * tint;\n"));
}

#[test]
fn test_options_from_json_drive_the_pipeline() {
    let options = CompileOptions::from_json(
        r#"{ "target": { "dialect": "hlsl", "version": 61, "line_directive_mode": "none" } }"#,
    )
    .expect("options");
    let mut module = tinted_fragment();
    let result = Compiler::new(options)
        .compile(&mut module, &ProgramLayout::default())
        .expect("compile");
    assert!(result.source.contains("[shader(\"pixel\")]\n"));
}

#[test]
fn test_cleanup_promotes_locals_before_emission() {
    let mut module = Module::new("locals");
    let float = module.types.float();
    let two = module.float_lit(2.0);
    let mut b = Builder::new(&mut module);
    let (main, params) = b.func_with_body("scale", vec![float], float);
    let slot = b.var(float);
    b.store(slot, params[0]);
    let loaded = b.load(slot);
    let doubled = b.binary(BinaryOp::Mul, float, loaded, two);
    b.ret(Some(doubled));
    mark_entry(&mut module, main, Stage::Vertex, "scale");

    let result = compile(&mut module, TargetDescriptor::hlsl(50)).expect("compile");
    assert_eq!(result.cleanup_stats.promoted_variables, 1);
    assert!(module.inst(slot).removed);
    assert!(result.source.contains(" * 2.0;\n"), "{}", result.source);
}

#[test]
fn test_dynamic_dispatch_compiles_to_switch() {
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

    let (main, _) = b.func_with_body("computeArea", vec![], float);
    let radius = b.module().float_lit(2.0);
    let existential = b.make_existential(shape_ty, radius, circle_table);
    let measured = b.call_typed(measure, vec![existential], Some(float));
    b.ret(Some(measured));
    mark_entry(&mut module, main, Stage::Vertex, "computeArea");

    let result = compile(&mut module, TargetDescriptor::hlsl(50)).expect("compile");
    assert_eq!(result.generics_stats.dispatch_functions, 1);
    let source = &result.source;
    assert!(source.contains("struct Existential\n{\n"), "{}", source);
    assert!(source.contains("dispatch_IShape_area("), "{}", source);
    assert!(source.contains("switch("), "{}", source);
    assert!(source.contains("case 0ull:\n"), "{}", source);
}

// ====================
// Stage Failures
// ====================

#[test]
fn test_emission_errors_fail_the_emission_stage() {
    let mut module = Module::new("cs");
    let void = module.types.void();
    let mut b = Builder::new(&mut module);
    let (main, _) = b.func_with_body("csMain", vec![], void);
    b.ret(None);
    mark_entry(&mut module, main, Stage::Compute, "csMain");

    let err = compile(&mut module, TargetDescriptor::glsl(450)).expect_err("missing thread-group size");
    match &err {
        Error::CompilationFailed { stage, diagnostics } => {
            assert_eq!(*stage, "emission");
            assert_eq!(diagnostics.len(), 1);
            assert!(diagnostics[0].message.contains("thread-group size"));
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(!err.is_internal());
}

#[test]
fn test_generics_errors_stop_before_legalization() {
    let mut module = Module::new("lonely");
    let float = module.types.float();
    let this = module.types.intern(Type::This);
    let witness_ty = module.types.intern(Type::WitnessTableId);
    let iface = module.add_global(Inst::new(
        Op::Interface {
            requirements: vec![Requirement {
                name: "weight".into(),
                params: vec![this],
                result: float,
            }],
        },
        None,
        vec![],
    ));

    let mut b = Builder::new(&mut module);
    let shape_ty = b.interface_type(iface);
    let fn_ty = b.module().types.func(vec![this], float);
    let (main, params) = b.func_with_body("entry", vec![shape_ty], float);
    let table = b.emit(Op::ExtractExistentialWitnessTable, Some(witness_ty), vec![params[0]]);
    let value = b.emit(Op::ExtractExistentialValue, Some(this), vec![params[0]]);
    let method = b.lookup_witness_method(table, iface, 0, fn_ty);
    let weight = b.call_typed(method, vec![value], Some(float));
    b.ret(Some(weight));
    mark_entry(&mut module, main, Stage::Vertex, "entry");

    let err = compile(&mut module, TargetDescriptor::hlsl(50)).expect_err("no conformances");
    match err {
        Error::CompilationFailed { stage, .. } => assert_eq!(stage, "generics lowering"),
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_glsl_entry_point_with_parameters_is_rejected() {
    let mut module = tinted_fragment();
    let err = compile(&mut module, TargetDescriptor::glsl(450)).expect_err("varyings as parameters");
    assert_eq!(err.diagnostics().len(), 1);
    assert!(err.diagnostics()[0].message.contains("must take no parameters"));
}
