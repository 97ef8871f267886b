//! Dead code elimination
//!
//! Mark-and-sweep over the module: entry points and globals carrying a
//! resource layout are roots, and a live function keeps its parameters and
//! every instruction with a side effect. Everything not reached from those
//! is deleted.

use super::ir::{InstId, Module, Op};
use std::collections::HashSet;

/// Delete unreachable globals and unused instructions.
///
/// A module without entry points is treated as a library and keeps every
/// function. Returns the number of deleted instructions.
pub fn eliminate_dead_code(module: &mut Module) -> usize {
    let globals: Vec<InstId> = module.globals().to_vec();
    let has_entry_point = globals
        .iter()
        .any(|&g| module.inst(g).entry_point().is_some());

    let mut live: HashSet<InstId> = HashSet::new();
    let mut worklist: Vec<InstId> = globals
        .iter()
        .copied()
        .filter(|&g| {
            let inst = module.inst(g);
            inst.entry_point().is_some()
                || inst.layout().is_some()
                || (!has_entry_point && inst.op == Op::Func)
        })
        .collect();

    while let Some(id) = worklist.pop() {
        if !live.insert(id) {
            continue;
        }
        let inst = module.inst(id);
        worklist.extend(inst.operands.iter().copied());
        if let Some(ty) = inst.ty {
            if let Some(interface) = interface_of(module, ty) {
                worklist.push(interface);
            }
        }
        for &block in &inst.body {
            let block = module.block(block);
            worklist.extend(block.params.iter().copied());
            worklist.extend(
                block
                    .insts
                    .iter()
                    .copied()
                    .filter(|&i| module.inst(i).op.has_side_effects()),
            );
        }
    }

    let mut removed = 0;
    for &global in &globals {
        if !live.contains(&global) {
            removed += 1 + module.func_insts(global).len();
            tracing::trace!(global = global.0, "removing unreferenced global");
            module.remove_inst(global);
            continue;
        }
        for id in module.func_insts(global) {
            if !live.contains(&id) {
                module.remove_inst(id);
                removed += 1;
            }
        }
    }

    tracing::debug!(removed, "dead code elimination complete");
    removed
}

/// Interface declaration named by an existential type
fn interface_of(module: &Module, ty: super::ir::TypeId) -> Option<InstId> {
    match module.types.get(ty) {
        super::ir::Type::Interface(id) => Some(*id),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::{BinaryOp, Builder, Decoration};
    use crate::compiler::target::Stage;

    #[test]
    fn test_unused_function_and_value_removed() {
        let mut module = Module::new("dce");
        let float = module.types.float();
        let mut b = Builder::new(&mut module);
        let (helper, _) = b.func_with_body("unused_helper", vec![], float);
        let one = b.module().float_lit(1.0);
        b.ret(Some(one));

        let (main, params) = b.func_with_body("main", vec![float], float);
        let dead = b.binary(BinaryOp::Mul, float, params[0], params[0]);
        let live = b.binary(BinaryOp::Add, float, params[0], one);
        b.ret(Some(live));
        module.inst_mut(main).decorate(Decoration::EntryPoint {
            stage: Stage::Fragment,
            name: "main".into(),
        });

        let removed = eliminate_dead_code(&mut module);
        assert_eq!(removed, 3);
        assert!(module.inst(helper).removed);
        assert!(module.inst(dead).removed);
        assert!(!module.inst(live).removed);
    }

    #[test]
    fn test_library_module_keeps_functions() {
        let mut module = Module::new("lib");
        let void = module.types.void();
        let mut b = Builder::new(&mut module);
        let (func, _) = b.func_with_body("helper", vec![], void);
        b.ret(None);
        assert_eq!(eliminate_dead_code(&mut module), 0);
        assert!(!module.inst(func).removed);
    }
}
