//! SSA reconstruction
//!
//! Promotes function-local variables whose address never escapes (every use
//! is a direct `load` or `store`) into SSA values. Block parameters act as
//! phis; they are placed on demand while looking up the reaching definition
//! and removed again when trivial.
//!
//! Only `branch` and `loop` edges carry block arguments. When a variable
//! needs a phi in a block reached through any other edge, its promotion is
//! rolled back and the variable is kept in memory.

use super::ir::{BlockId, Inst, InstId, Module, Op, TypeId};
use crate::{Error, Result};
use std::collections::{HashMap, HashSet};

/// Promote local variables in every function of `module`.
///
/// Returns the number of promoted variables.
pub fn construct_ssa(module: &mut Module) -> Result<usize> {
    let funcs: Vec<InstId> = module
        .globals()
        .iter()
        .copied()
        .filter(|&g| module.inst(g).op == Op::Func && !module.inst(g).body.is_empty())
        .collect();

    let mut promoted = 0;
    for func in funcs {
        promoted += promote_function(module, func)?;
    }
    tracing::debug!(promoted, "SSA reconstruction complete");
    Ok(promoted)
}

fn promote_function(module: &mut Module, func: InstId) -> Result<usize> {
    let vars: Vec<InstId> = module
        .func_insts(func)
        .into_iter()
        .filter(|&id| module.inst(id).op == Op::Var && is_promotable(module, id))
        .collect();
    if vars.is_empty() {
        return Ok(0);
    }

    let preds = predecessors(module, func)?;
    let mut promoted = 0;
    for var in vars {
        let value_ty = module.types.value_type(module.type_of(var)?);
        let mut promotion = Promotion::new(module, func, var, value_ty, &preds);
        match promotion.run() {
            Ok(()) => {
                promotion.finish();
                promoted += 1;
            }
            Err(Abandon::Fault(err)) => return Err(err),
            Err(Abandon::Edge(block)) => {
                promotion.rollback();
                tracing::warn!(
                    var = var.0,
                    block = block.0,
                    "variable kept in memory: merge block has an edge without block arguments"
                );
            }
        }
    }
    Ok(promoted)
}

/// Every use is `load(var)` or `store(var, value)` with `var` as the address
fn is_promotable(module: &Module, var: InstId) -> bool {
    module.uses_of(var).into_iter().all(|user| {
        let inst = module.inst(user);
        match inst.op {
            Op::Load => true,
            Op::Store => inst.operands.first() == Some(&var) && inst.operands.get(1) != Some(&var),
            _ => false,
        }
    })
}

/// Predecessor blocks of each block, each listed once, in body order
fn predecessors(module: &Module, func: InstId) -> Result<HashMap<BlockId, Vec<BlockId>>> {
    let mut preds: HashMap<BlockId, Vec<BlockId>> = HashMap::new();
    for &block in &module.inst(func).body {
        preds.entry(block).or_default();
        let Some(term) = module.terminator(block) else {
            return Err(Error::invariant(format!("block b{} has no terminator", block.0)));
        };
        for succ in module.inst(term).op.successors() {
            let list = preds.entry(succ).or_default();
            if !list.contains(&block) {
                list.push(block);
            }
        }
    }
    Ok(preds)
}

enum Abandon {
    /// A phi was needed in this block but an incoming edge cannot carry it
    Edge(BlockId),
    Fault(Error),
}

impl From<Error> for Abandon {
    fn from(err: Error) -> Self {
        Abandon::Fault(err)
    }
}

/// Promotion of one variable, journaled so it can be rolled back
struct Promotion<'m, 'p> {
    module: &'m mut Module,
    func: InstId,
    var: InstId,
    ty: TypeId,
    preds: &'p HashMap<BlockId, Vec<BlockId>>,
    /// Last value stored in each block
    block_out: HashMap<BlockId, InstId>,
    /// Value reaching the start of each block
    block_in: HashMap<BlockId, InstId>,
    /// Phis created for this variable
    phis: Vec<(BlockId, InstId)>,
    /// Terminators given an extra argument, with their prior operand count
    edges: Vec<(InstId, usize)>,
    undefined: Option<InstId>,
    /// Loads already resolved, with their replacement
    resolved: HashMap<InstId, InstId>,
}

impl<'m, 'p> Promotion<'m, 'p> {
    fn new(
        module: &'m mut Module,
        func: InstId,
        var: InstId,
        ty: TypeId,
        preds: &'p HashMap<BlockId, Vec<BlockId>>,
    ) -> Self {
        Self {
            module,
            func,
            var,
            ty,
            preds,
            block_out: HashMap::new(),
            block_in: HashMap::new(),
            phis: Vec::new(),
            edges: Vec::new(),
            undefined: None,
            resolved: HashMap::new(),
        }
    }

    fn run(&mut self) -> std::result::Result<(), Abandon> {
        let body = self.module.inst(self.func).body.clone();
        for &block in &body {
            for &id in &self.module.block(block).insts {
                let inst = self.module.inst(id);
                if inst.op == Op::Store && inst.operands[0] == self.var {
                    self.block_out.insert(block, inst.operands[1]);
                }
            }
        }

        // Resolve every load to its reaching value without touching the IR
        // beyond phi placement, so a failure can still be undone.
        for &block in &body {
            let mut current: Option<InstId> = None;
            for id in self.module.block(block).insts.clone() {
                let inst = self.module.inst(id);
                if inst.operands.first() != Some(&self.var) {
                    continue;
                }
                match inst.op {
                    Op::Store => current = Some(inst.operands[1]),
                    Op::Load => {
                        let value = match current {
                            Some(value) => value,
                            None => self.value_in(block)?,
                        };
                        self.resolved.insert(id, value);
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    fn value_out(&mut self, block: BlockId) -> std::result::Result<InstId, Abandon> {
        match self.block_out.get(&block) {
            Some(&value) => Ok(value),
            None => self.value_in(block),
        }
    }

    fn value_in(&mut self, block: BlockId) -> std::result::Result<InstId, Abandon> {
        if let Some(&value) = self.block_in.get(&block) {
            return Ok(value);
        }
        let preds = self.preds.get(&block).cloned().unwrap_or_default();
        let value = match preds.len() {
            0 => self.undefined_value()?,
            1 => {
                let value = self.value_out(preds[0])?;
                self.block_in.insert(block, value);
                value
            }
            _ => {
                for &pred in &preds {
                    let term = self.module.expect_terminator(pred)?;
                    if !matches!(self.module.inst(term).op, Op::Branch(_) | Op::Loop { .. }) {
                        return Err(Abandon::Edge(block));
                    }
                }
                let phi = self.module.add_block_param(block, self.ty);
                self.phis.push((block, phi));
                self.block_in.insert(block, phi);
                for &pred in &preds {
                    let value = self.value_out(pred)?;
                    let term = self.module.expect_terminator(pred)?;
                    let operands = &mut self.module.inst_mut(term).operands;
                    self.edges.push((term, operands.len()));
                    operands.push(value);
                }
                phi
            }
        };
        self.block_in.insert(block, value);
        Ok(value)
    }

    fn undefined_value(&mut self) -> std::result::Result<InstId, Abandon> {
        if let Some(value) = self.undefined {
            return Ok(value);
        }
        let entry = self
            .module
            .entry_block(self.func)
            .ok_or_else(|| Error::invariant("function without entry block"))?;
        let value = self
            .module
            .prepend_inst(entry, Inst::new(Op::Undefined, Some(self.ty), Vec::new()));
        self.undefined = Some(value);
        Ok(value)
    }

    /// Undo phi placement; the variable stays in memory
    fn rollback(self) {
        for &(term, len) in self.edges.iter().rev() {
            self.module.inst_mut(term).operands.truncate(len);
        }
        for &(_, phi) in &self.phis {
            self.module.remove_inst(phi);
        }
        if let Some(undefined) = self.undefined {
            self.module.remove_inst(undefined);
        }
    }

    /// Rewrite loads to their values, delete the stores, the variable and
    /// every phi that turned out trivial
    fn finish(mut self) {
        for (&load, &value) in &self.resolved {
            let value = resolve(&self.resolved, value);
            self.module.replace_all_uses(load, value);
        }
        for user in self.module.uses_of(self.var) {
            self.module.remove_inst(user);
        }
        for load in self.resolved.keys().copied().collect::<Vec<_>>() {
            self.module.remove_inst(load);
        }
        self.module.remove_inst(self.var);
        self.remove_trivial_phis();
    }

    fn remove_trivial_phis(&mut self) {
        let mut removed: HashSet<InstId> = HashSet::new();
        loop {
            let mut changed = false;
            for &(block, phi) in &self.phis.clone() {
                if removed.contains(&phi) {
                    continue;
                }
                let Some(index) = self.module.block(block).params.iter().position(|&p| p == phi)
                else {
                    continue;
                };
                let incoming = self.incoming(block, index);
                let mut same = None;
                let mut trivial = true;
                for value in incoming {
                    if value == phi || Some(value) == same {
                        continue;
                    }
                    if same.is_some() {
                        trivial = false;
                        break;
                    }
                    same = Some(value);
                }
                if !trivial {
                    continue;
                }
                let replacement = match same {
                    Some(value) => value,
                    None => continue,
                };
                self.drop_phi_operand(block, index);
                self.module.replace_all_uses(phi, replacement);
                self.module.remove_inst(phi);
                removed.insert(phi);
                changed = true;
            }
            if !changed {
                break;
            }
        }
    }

    fn incoming(&self, block: BlockId, index: usize) -> Vec<InstId> {
        let mut values = Vec::new();
        for pred in self.preds.get(&block).into_iter().flatten() {
            if let Some(term) = self.module.terminator(*pred) {
                if let Some(&value) = self.module.inst(term).operands.get(index) {
                    values.push(value);
                }
            }
        }
        values
    }

    fn drop_phi_operand(&mut self, block: BlockId, index: usize) {
        for pred in self.preds.get(&block).into_iter().flatten() {
            if let Some(term) = self.module.terminator(*pred) {
                let operands = &mut self.module.inst_mut(term).operands;
                if index < operands.len() {
                    operands.remove(index);
                }
            }
        }
    }
}

/// Follow load-to-value replacements to a value that is not a removed load
fn resolve(resolved: &HashMap<InstId, InstId>, mut value: InstId) -> InstId {
    let mut seen = 0;
    while let Some(&next) = resolved.get(&value) {
        value = next;
        seen += 1;
        if seen > resolved.len() {
            break;
        }
    }
    value
}
