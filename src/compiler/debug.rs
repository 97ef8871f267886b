//! Debug utilities for inspecting the IR between pipeline stages

use super::ir::{BlockId, InstId, Module, Op, Type, TypeId};
use std::fmt::Write;

/// Render a module in human-readable form
pub fn dump_ir(module: &Module) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "═══════════════════════════════════════════════════════════");
    let _ = writeln!(out, "                    IR DUMP: {}", module.name);
    let _ = writeln!(out, "═══════════════════════════════════════════════════════════");

    for (id, decl) in module.structs() {
        let fields: Vec<String> = decl
            .fields
            .iter()
            .map(|f| format!("{}: {}", f.name, format_type(module, f.ty)))
            .collect();
        let _ = writeln!(out, "struct#{} {} {{ {} }}", id.0, decl.name, fields.join(", "));
    }

    for &global in module.globals() {
        let inst = module.inst(global);
        let _ = writeln!(out, "{}", format_inst(module, global));
        for &block in &inst.body {
            dump_block(module, block, &mut out);
        }
    }
    let _ = writeln!(out, "═══════════════════════════════════════════════════════════");
    out
}

fn dump_block(module: &Module, block: BlockId, out: &mut String) {
    let params: Vec<String> = module
        .block(block)
        .params
        .iter()
        .map(|&p| format!("%{}: {}", p.0, format_value_type(module, p)))
        .collect();
    let _ = writeln!(out, "  b{}({}):", block.0, params.join(", "));
    for &inst in &module.block(block).insts {
        let _ = writeln!(out, "    {}", format_inst(module, inst));
    }
}

fn format_value_type(module: &Module, id: InstId) -> String {
    match module.inst(id).ty {
        Some(ty) => format_type(module, ty),
        None => "void".to_string(),
    }
}

/// Format one type
pub fn format_type(module: &Module, ty: TypeId) -> String {
    match module.types.get(ty) {
        Type::Void => "void".to_string(),
        Type::Scalar(kind) => format!("{:?}", kind).to_lowercase(),
        Type::Vector { element, count } => format!("{:?}{}", element, count).to_lowercase(),
        Type::Matrix {
            element,
            rows,
            columns,
        } => format!("{:?}{}x{}", element, rows, columns).to_lowercase(),
        Type::Array { element, count } => match count {
            Some(n) => format!("{}[{}]", format_type(module, *element), n),
            None => format!("{}[]", format_type(module, *element)),
        },
        Type::Struct(id) => module.struct_decl(*id).name.clone(),
        Type::Texture(tex) => format!(
            "texture<{:?}, {:?}, {}>",
            tex.shape,
            tex.access,
            format_type(module, tex.element)
        ),
        Type::Sampler { comparison } => {
            if *comparison {
                "sampler_cmp".to_string()
            } else {
                "sampler".to_string()
            }
        }
        Type::UniformBuffer { kind, element } => {
            format!("{:?}<{}>", kind, format_type(module, *element))
        }
        Type::StructuredBuffer { access, element } => {
            format!("structured<{:?}, {}>", access, format_type(module, *element))
        }
        Type::Ptr { kind, pointee } => format!("{:?}<{}>", kind, format_type(module, *pointee)),
        Type::StreamOutput { kind, element } => {
            format!("stream<{:?}, {}>", kind, format_type(module, *element))
        }
        Type::Patch {
            kind,
            element,
            count,
        } => format!("patch<{:?}, {}, {}>", kind, format_type(module, *element), count),
        Type::GenericParam(i) => format!("T{}", i),
        Type::This => "This".to_string(),
        Type::Interface(id) => format!("interface(%{})", id.0),
        Type::AnyValue { size } => format!("any<{}>", size),
        Type::WitnessTableId => "witness_id".to_string(),
        Type::RttiHandle => "rtti".to_string(),
        Type::Func { params, result } => {
            let params: Vec<String> = params.iter().map(|&p| format_type(module, p)).collect();
            format!("({}) -> {}", params.join(", "), format_type(module, *result))
        }
    }
}

/// Format a single instruction
pub fn format_inst(module: &Module, id: InstId) -> String {
    let inst = module.inst(id);
    let operands: Vec<String> = inst.operands.iter().map(|o| format!("%{}", o.0)).collect();
    let payload = match &inst.op {
        Op::IntLit(v) => format!(" {}", v),
        Op::FloatLit(v) => format!(" {:?}", v),
        Op::BoolLit(v) => format!(" {}", v),
        Op::FieldExtract(key) | Op::FieldAddress(key) => format!(" .{}", module.field_name(*key)),
        Op::Swizzle(c) | Op::SwizzleSet(c) => format!(" {:?}", c),
        Op::Binary(op) => format!(" {}", op.symbol()),
        Op::Unary(op) => format!(" {:?}", op),
        Op::LookupWitnessMethod {
            interface,
            requirement,
        } => format!(" %{}#{}", interface.0, requirement),
        Op::WitnessTable { interface, concrete } => {
            format!(" %{}: {}", interface.0, format_type(module, *concrete))
        }
        Op::RttiObject { concrete } => format!(" {}", format_type(module, *concrete)),
        Op::Branch(target) => format!(" b{}", target.0),
        Op::ConditionalBranch {
            true_block,
            false_block,
        } => format!(" b{} b{}", true_block.0, false_block.0),
        Op::IfElse {
            true_block,
            false_block,
            after,
        } => format!(" b{} b{} after b{}", true_block.0, false_block.0, after.0),
        Op::Loop {
            target,
            break_block,
            continue_block,
        } => format!(
            " b{} break b{} continue b{}",
            target.0, break_block.0, continue_block.0
        ),
        Op::Switch {
            break_block,
            default,
            cases,
        } => {
            let cases: Vec<String> = cases.iter().map(|b| format!("b{}", b.0)).collect();
            format!(" [{}] default b{} break b{}", cases.join(", "), default.0, break_block.0)
        }
        _ => String::new(),
    };
    let name = inst
        .name
        .as_deref()
        .map(|n| format!(" @{}", n))
        .unwrap_or_default();
    match inst.ty {
        Some(ty) => format!(
            "%{}{}: {} = {}{} {}",
            id.0,
            name,
            format_type(module, ty),
            inst.op.mnemonic(),
            payload,
            operands.join(", ")
        )
        .trim_end()
        .to_string(),
        None => format!("{}{} {}", inst.op.mnemonic(), payload, operands.join(", "))
            .trim_end()
            .to_string(),
    }
}
