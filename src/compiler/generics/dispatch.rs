//! Interface call lowering: devirtualization and witness-id switch dispatch

use super::GenericsLowering;
use crate::compiler::ir::{Builder, InstId, Op, Requirement, Type, TypeId};
use crate::diagnostics::SourceLoc;
use crate::{Error, Result};

impl GenericsLowering<'_> {
    /// Rewrite every call through `LookupWitnessMethod`.
    ///
    /// A lookup in a known witness table resolves to the implementing
    /// function. Any other lookup calls the generated dispatch function for
    /// the (interface, requirement) pair, passing the witness id first.
    pub(super) fn lower_interface_calls(&mut self) -> Result<()> {
        let lookups = self.ops_matching(|op| matches!(op, Op::LookupWitnessMethod { .. }));
        for lookup in lookups {
            let (interface, requirement) = match self.module.inst(lookup).op {
                Op::LookupWitnessMethod {
                    interface,
                    requirement,
                } => (interface, requirement),
                _ => continue,
            };
            let table = *self
                .module
                .inst(lookup)
                .operands
                .first()
                .ok_or_else(|| Error::invariant("witness lookup without a table operand"))?;
            let is_static = matches!(self.module.inst(table).op, Op::WitnessTable { .. });

            for user in self.module.uses_of(lookup) {
                let inst = self.module.inst(user);
                let loc = inst.loc.clone();
                if inst.op != Op::Call || inst.operands.first() != Some(&lookup) {
                    self.sink
                        .error(loc.as_ref(), "interface methods can only be called directly");
                    continue;
                }

                if is_static {
                    let implementation = *self
                        .module
                        .inst(table)
                        .operands
                        .get(requirement as usize)
                        .ok_or_else(|| {
                            Error::invariant(format!(
                                "witness table %{} has no entry for requirement {}",
                                table.0, requirement
                            ))
                        })?;
                    self.module.inst_mut(user).operands[0] = implementation;
                    self.stats.devirtualized_calls += 1;
                    continue;
                }

                let Some(dispatcher) = self.dispatch_function(interface, requirement, loc.as_ref())?
                else {
                    continue;
                };
                let result = self
                    .module
                    .type_of(dispatcher)
                    .ok()
                    .and_then(|t| self.module.types.func_signature(t).map(|(_, r)| r))
                    .filter(|&r| !self.module.types.is_void(r));
                let inst = self.module.inst_mut(user);
                let mut operands = vec![dispatcher, table];
                operands.extend_from_slice(&inst.operands[1..]);
                inst.operands = operands;
                inst.ty = result;
                self.stats.dynamic_calls_lowered += 1;
                tracing::trace!(call = user.0, "routed interface call through dispatcher");
            }

            if self.module.uses_of(lookup).is_empty() {
                self.module.remove_inst(lookup);
            }
        }
        Ok(())
    }

    fn requirement(&self, interface: InstId, index: u32) -> Result<(String, Requirement)> {
        let inst = self.module.inst(interface);
        let name = inst
            .name
            .clone()
            .unwrap_or_else(|| format!("interface{}", interface.0));
        match &inst.op {
            Op::Interface { requirements } => {
                let req = requirements.get(index as usize).cloned().ok_or_else(|| {
                    Error::invariant(format!("interface `{}` has no requirement {}", name, index))
                })?;
                Ok((name, req))
            }
            _ => Err(Error::invariant(format!(
                "witness lookup names %{} which is not an interface",
                interface.0
            ))),
        }
    }

    /// `This` replaced by the any-value type
    fn erase_this(&mut self, ty: TypeId) -> TypeId {
        if matches!(self.module.types.get(ty), Type::This) {
            self.any_value_type()
        } else {
            ty
        }
    }

    /// Dispatch function for one interface requirement, generated on first
    /// use: `switch (witness_id) { case id: return wrapper(args...); }`
    fn dispatch_function(
        &mut self,
        interface: InstId,
        index: u32,
        loc: Option<&SourceLoc>,
    ) -> Result<Option<InstId>> {
        if let Some(&existing) = self.dispatchers.get(&(interface, index)) {
            return Ok(Some(existing));
        }
        let (interface_name, requirement) = self.requirement(interface, index)?;

        let tables: Vec<(InstId, u64)> = self
            .witness_ids
            .iter()
            .copied()
            .filter(|&(table, _)| {
                matches!(self.module.inst(table).op, Op::WitnessTable { interface: i, .. } if i == interface)
            })
            .collect();
        if tables.is_empty() {
            self.sink.error(
                loc,
                format!(
                    "no type conforms to interface `{}`; call to `{}` cannot be dispatched",
                    interface_name, requirement.name
                ),
            );
            return Ok(None);
        }

        let mut targets = Vec::with_capacity(tables.len());
        for &(table, id) in &tables {
            targets.push((id, self.wrapper_function(table, index, &requirement)?));
        }

        let mut params = vec![self.module.types.intern(Type::WitnessTableId)];
        for &param in &requirement.params {
            params.push(self.erase_this(param));
        }
        let result = self.erase_this(requirement.result);
        let returns_value = !self.module.types.is_void(result);
        let selector_ty = params[0];

        let mut b = Builder::new(self.module);
        let (func, fparams) = b.func_with_body(
            &format!("dispatch_{}_{}", interface_name, requirement.name),
            params,
            result,
        );
        let entry = b.current_block().ok_or_else(|| Error::invariant("dispatcher without entry"))?;
        let args = fparams[1..].to_vec();

        let mut cases = Vec::with_capacity(targets.len());
        for (id, wrapper) in targets {
            let block = b.block(func);
            b.set_block(block);
            let value = b.call(wrapper, args.clone());
            b.ret(returns_value.then_some(value));
            let literal = b.module().int_literal(selector_ty, id as i64);
            cases.push((literal, block));
        }
        // The last conformance doubles as the default target.
        let default = cases[cases.len() - 1].1;
        let merge = b.block(func);
        b.set_block(merge);
        b.unreachable();
        b.set_block(entry);
        b.switch(fparams[0], merge, default, cases);

        self.dispatchers.insert((interface, index), func);
        self.stats.dispatch_functions += 1;
        tracing::debug!(
            interface = %interface_name,
            requirement = %requirement.name,
            conformances = tables.len(),
            "generated dispatch function"
        );
        Ok(Some(func))
    }

    /// Function adapting one implementation to the erased requirement
    /// signature; the implementation itself when no `This` is involved.
    fn wrapper_function(
        &mut self,
        table: InstId,
        index: u32,
        requirement: &Requirement,
    ) -> Result<InstId> {
        if let Some(&existing) = self.wrappers.get(&(table, index)) {
            return Ok(existing);
        }
        let (concrete, implementation) = match &self.module.inst(table).op {
            Op::WitnessTable { concrete, .. } => (
                *concrete,
                *self
                    .module
                    .inst(table)
                    .operands
                    .get(index as usize)
                    .ok_or_else(|| Error::invariant("witness table is missing a requirement"))?,
            ),
            _ => return Err(Error::invariant("dispatch target is not a witness table")),
        };

        let this = self.module.types.intern(Type::This);
        if !requirement.params.contains(&this) && requirement.result != this {
            self.wrappers.insert((table, index), implementation);
            return Ok(implementation);
        }

        let params: Vec<TypeId> = requirement
            .params
            .iter()
            .map(|&p| self.erase_this(p))
            .collect();
        let result = self.erase_this(requirement.result);
        let any_ty = self.any_value_type();
        let name = format!(
            "wrapper_{}",
            self.module
                .inst(implementation)
                .name
                .clone()
                .unwrap_or_else(|| format!("impl{}", implementation.0))
        );

        let mut b = Builder::new(self.module);
        let (func, fparams) = b.func_with_body(&name, params, result);
        let mut args = Vec::with_capacity(fparams.len());
        for (&param, &declared) in fparams.iter().zip(&requirement.params) {
            if declared == this {
                args.push(b.emit(Op::UnpackAnyValue, Some(concrete), vec![param]));
            } else {
                args.push(param);
            }
        }
        let value = b.call(implementation, args);
        if requirement.result == this {
            let packed = b.emit(Op::PackAnyValue, Some(any_ty), vec![value]);
            b.ret(Some(packed));
        } else if b.module_ref().types.is_void(result) {
            b.ret(None);
        } else {
            b.ret(Some(value));
        }

        self.wrappers.insert((table, index), func);
        Ok(func)
    }
}
