use criterion::{black_box, criterion_group, criterion_main, Criterion};
use shadegen::compiler::emit::emit_module;
use shadegen::compiler::ir::{BinaryOp, Builder, Decoration, Module, ProgramLayout, ScalarKind};
use shadegen::compiler::{CompileOptions, Compiler, Stage, TargetDescriptor};
use shadegen::DiagnosticSink;

/// Entry point with a chain of `steps` helper functions, each looping over
/// an accumulator
fn helper_chain(steps: usize) -> Module {
    let mut module = Module::new("bench");
    let float = module.types.float();
    let bool_ty = module.types.bool();
    let half = module.float_lit(0.5);

    let mut b = Builder::new(&mut module);
    let flag = b.global_param("keepGoing", bool_ty, None);
    let mut previous = None;
    for i in 0..steps {
        let (func, params) = b.func_with_body(&format!("step{}", i), vec![float], float);
        let header = b.block(func);
        let exit = b.block(func);
        let acc = b.param(header, float);
        b.loop_(header, exit, header, vec![params[0]]);
        b.set_block(header);
        let body = b.block(func);
        let after = b.block(func);
        b.if_else(flag, body, after, after);
        b.set_block(body);
        let next = b.binary(BinaryOp::Mul, float, acc, half);
        b.branch(header, vec![next]);
        b.set_block(after);
        b.branch(exit, vec![]);
        b.set_block(exit);
        let result = match previous {
            Some(callee) => b.call(callee, vec![acc]),
            None => acc,
        };
        b.ret(Some(result));
        previous = Some(func);
    }

    let float4 = b.module().types.vector(ScalarKind::Float, 4);
    let (main, _) = b.func_with_body("fragMain", vec![], float4);
    let one = b.module().float_lit(1.0);
    let value = match previous {
        Some(last) => b.call(last, vec![one]),
        None => one,
    };
    let color = b.make_vector(float4, vec![value, value, value, one]);
    b.ret(Some(color));
    module.inst_mut(main).decorate(Decoration::EntryPoint {
        stage: Stage::Fragment,
        name: "fragMain".into(),
    });
    module
}

fn emit_benchmark(c: &mut Criterion) {
    let module = helper_chain(64);
    let layout = ProgramLayout::default();

    c.bench_function("emit hlsl 64 functions", |b| {
        let target = TargetDescriptor::hlsl(50);
        b.iter(|| {
            let mut sink = DiagnosticSink::new();
            emit_module(black_box(&module), &layout, &target, &mut sink).unwrap()
        })
    });

    c.bench_function("emit glsl 64 functions", |b| {
        let target = TargetDescriptor::glsl(450);
        b.iter(|| {
            let mut sink = DiagnosticSink::new();
            emit_module(black_box(&module), &layout, &target, &mut sink).unwrap()
        })
    });
}

fn pipeline_benchmark(c: &mut Criterion) {
    let module = helper_chain(16);
    let compiler = Compiler::new(CompileOptions::for_target(TargetDescriptor::hlsl(50)));

    c.bench_function("compile hlsl 16 functions", |b| {
        b.iter(|| {
            let mut module = module.clone();
            compiler
                .compile(black_box(&mut module), &ProgramLayout::default())
                .unwrap()
        })
    });
}

criterion_group!(benches, emit_benchmark, pipeline_benchmark);
criterion_main!(benches);
