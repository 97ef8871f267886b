//! Structured control flow reconstruction
//!
//! A function body is printed by walking single-entry regions of its block
//! graph. The walk follows the terminator of each block; `if`, `for(;;)` and
//! `switch` recurse into sub-regions, and a jump to a block registered as an
//! enclosing `break`/`continue` target prints the keyword instead of the
//! block.

use super::{EmitContext, EmitMode};
use crate::compiler::ir::{BlockId, InstId, LoopControl, Op};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum LabelOp {
    Break,
    Continue,
}

impl LabelOp {
    fn keyword(self) -> &'static str {
        match self {
            LabelOp::Break => "break",
            LabelOp::Continue => "continue",
        }
    }
}

/// One entry of the break/continue label stack, innermost first
#[derive(Debug, Clone, Copy)]
pub(super) struct Label<'l> {
    pub op: LabelOp,
    pub block: BlockId,
    pub parent: Option<&'l Label<'l>>,
}

impl<'l> Label<'l> {
    fn iter(start: Option<&'l Label<'l>>) -> impl Iterator<Item = &'l Label<'l>> {
        std::iter::successors(start, |label| label.parent)
    }

    /// Innermost label targeting `block`
    fn find(labels: Option<&'l Label<'l>>, block: BlockId) -> Option<&'l Label<'l>> {
        Self::iter(labels).find(|label| label.block == block)
    }

    /// Target of the innermost label of kind `op`
    fn innermost(labels: Option<&'l Label<'l>>, op: LabelOp) -> Option<BlockId> {
        Self::iter(labels).find(|label| label.op == op).map(|label| label.block)
    }
}

impl EmitContext<'_> {
    /// Print the region starting at `begin` and ending at `end`.
    ///
    /// `initial_labels` apply to `begin` itself and `labels` to every block
    /// after it, so a loop header is not mistaken for its own `continue`.
    pub(super) fn emit_region(
        &mut self,
        begin: BlockId,
        end: Option<BlockId>,
        initial_labels: Option<&Label<'_>>,
        labels: Option<&Label<'_>>,
    ) -> Result<()> {
        let module = self.module;
        let mut block = begin;
        let mut use_labels = initial_labels;

        loop {
            if Some(block) == end {
                return Ok(());
            }

            if let Some(label) = Label::find(use_labels, block) {
                if Label::innermost(labels, label.op) == Some(block) {
                    self.emit(&format!("{};\n", label.op.keyword()));
                } else {
                    self.error(format!(
                        "multi-level {} out of nested control flow is not supported",
                        label.op.keyword()
                    ));
                }
                return Ok(());
            }

            let term = module.expect_terminator(block)?;
            for &inst in &module.block(block).insts {
                if inst != term {
                    self.emit_inst_stmt(inst)?;
                }
            }
            self.advance_to_inst(term);

            let term_inst = module.inst(term);
            match &term_inst.op {
                Op::Unreachable => return Ok(()),
                Op::Return => {
                    match term_inst.operands.first() {
                        Some(&value) => {
                            let value = self.operand(value, EmitMode::Default)?;
                            self.emit(&format!("return {};\n", value));
                        }
                        None => self.emit("return;\n"),
                    }
                    return Ok(());
                }
                Op::Discard => {
                    self.emit("discard;\n");
                    return Ok(());
                }
                Op::IfElse {
                    true_block,
                    false_block,
                    after,
                } => {
                    let cond = self.operand(term_inst.operands[0], EmitMode::Default)?;
                    self.emit(&format!("if({})\n{{\n", cond));
                    self.writer.indent();
                    self.emit_region(*true_block, Some(*after), labels, labels)?;
                    self.writer.dedent();
                    self.emit("}\n");
                    if false_block != after {
                        self.emit("else\n{\n");
                        self.writer.indent();
                        self.emit_region(*false_block, Some(*after), labels, labels)?;
                        self.writer.dedent();
                        self.emit("}\n");
                    }
                    block = *after;
                }
                Op::Loop {
                    target,
                    break_block,
                    ..
                } => {
                    self.emit_phi_assignments(*target, &term_inst.operands)?;

                    // `continue` always re-enters the header
                    let break_label = Label {
                        op: LabelOp::Break,
                        block: *break_block,
                        parent: labels,
                    };
                    let both = Label {
                        op: LabelOp::Continue,
                        block: *target,
                        parent: Some(&break_label),
                    };

                    if !self.is_glsl() {
                        match term_inst.loop_control() {
                            Some(LoopControl::Unroll) => self.emit("[unroll]\n"),
                            Some(LoopControl::Loop) => self.emit("[loop]\n"),
                            None => {}
                        }
                    }
                    self.emit("for(;;)\n{\n");
                    self.writer.indent();
                    self.emit_region(*target, None, Some(&break_label), Some(&both))?;
                    self.writer.dedent();
                    self.emit("}\n");
                    block = *break_block;
                }
                Op::Branch(target) => {
                    self.emit_phi_assignments(*target, &term_inst.operands)?;
                    block = *target;
                }
                Op::Switch {
                    break_block,
                    default,
                    cases,
                } => {
                    self.emit_switch(term, *break_block, *default, cases, labels)?;
                    block = *break_block;
                }
                Op::ConditionalBranch { .. } => {
                    return Err(Error::invariant(format!(
                        "unstructured conditional branch in b{} reached emission",
                        block.0
                    )))
                }
                other => {
                    return Err(Error::invariant(format!(
                        "b{} ends in non-terminator {}",
                        block.0,
                        other.mnemonic()
                    )))
                }
            }

            use_labels = labels;
            if block == begin {
                return Ok(());
            }
        }
    }

    fn emit_switch(
        &mut self,
        term: InstId,
        break_block: BlockId,
        default: BlockId,
        cases: &[BlockId],
        labels: Option<&Label<'_>>,
    ) -> Result<()> {
        let module = self.module;
        let operands = &module.inst(term).operands;
        if operands.len() != cases.len() + 1 {
            return Err(Error::invariant(format!(
                "switch %{} has {} case value(s) for {} target(s)",
                term.0,
                operands.len().saturating_sub(1),
                cases.len()
            )));
        }
        let selector = self.operand(operands[0], EmitMode::Default)?;
        self.emit(&format!("switch({})\n{{\n", selector));

        let sub = Label {
            op: LabelOp::Break,
            block: break_block,
            parent: labels,
        };
        let mut default_handled = default == break_block;

        let mut index = 0;
        while index < cases.len() {
            let target = cases[index];
            // Consecutive cases with one target share a label group
            loop {
                let value = self.operand(operands[index + 1], EmitMode::Default)?;
                self.emit(&format!("case {}:\n", value));
                if index + 1 < cases.len() && cases[index + 1] == target {
                    index += 1;
                } else {
                    break;
                }
            }
            if target == default && !default_handled {
                self.emit("default:\n");
                default_handled = true;
            }
            index += 1;
            // An empty case body falls through to the next case
            let case_end = cases.get(index).copied();

            self.writer.indent();
            self.emit("{\n");
            self.writer.indent();
            self.emit_region(target, case_end, Some(&sub), Some(&sub))?;
            self.writer.dedent();
            self.emit("}\n");
            self.writer.dedent();
        }

        if !default_handled {
            self.emit("default:\n");
            self.writer.indent();
            self.emit("{\n");
            self.writer.indent();
            self.emit_region(default, Some(break_block), Some(&sub), Some(&sub))?;
            self.emit("break;\n");
            self.writer.dedent();
            self.emit("}\n");
            self.writer.dedent();
        }
        self.emit("}\n");
        Ok(())
    }

    /// Assign branch arguments to the target block's parameters
    pub(super) fn emit_phi_assignments(&mut self, target: BlockId, args: &[InstId]) -> Result<()> {
        let module = self.module;
        let params = &module.block(target).params;
        if params.len() != args.len() {
            return Err(Error::invariant(format!(
                "branch to b{} passes {} argument(s) for {} parameter(s)",
                target.0,
                args.len(),
                params.len()
            )));
        }

        // Arguments that read a parameter assigned earlier in the same
        // transfer go through temporaries first
        let overlapping = args
            .iter()
            .enumerate()
            .any(|(i, arg)| params.iter().position(|p| p == arg).map_or(false, |j| j < i));

        let mut values = Vec::with_capacity(args.len());
        for (&param, &arg) in params.iter().zip(args) {
            if param == arg {
                values.push(None);
                continue;
            }
            let value = self.operand(arg, EmitMode::Default)?;
            if overlapping {
                let temp = format!("_S{}", self.allocate_unique_id());
                let decl = self.declarator(module.type_of(param)?, &temp)?;
                self.emit(&format!("{} = {};\n", decl, value));
                values.push(Some(temp));
            } else {
                values.push(Some(value));
            }
        }
        for (&param, value) in params.iter().zip(values) {
            if let Some(value) = value {
                let name = self.name_of(param);
                self.emit(&format!("{} = {};\n", name, value));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_innermost_label_lookup() {
        let outer_break = Label {
            op: LabelOp::Break,
            block: BlockId(9),
            parent: None,
        };
        let outer = Label {
            op: LabelOp::Continue,
            block: BlockId(1),
            parent: Some(&outer_break),
        };
        let inner_break = Label {
            op: LabelOp::Break,
            block: BlockId(5),
            parent: Some(&outer),
        };
        let inner = Label {
            op: LabelOp::Continue,
            block: BlockId(3),
            parent: Some(&inner_break),
        };

        assert_eq!(Label::innermost(Some(&inner), LabelOp::Continue), Some(BlockId(3)));
        assert_eq!(Label::innermost(Some(&inner), LabelOp::Break), Some(BlockId(5)));
        let outer_hit = Label::find(Some(&inner), BlockId(1)).map(|l| l.op);
        assert_eq!(outer_hit, Some(LabelOp::Continue));
        assert!(Label::find(Some(&inner), BlockId(7)).is_none());
    }
}
