//! Positioned instruction builder used by passes and tests

use super::instruction::{BinaryOp, BlockId, Decoration, Inst, InstId, Op, UnaryOp};
use super::layout::VarLayout;
use super::program::Module;
use super::types::{FieldKey, PtrKind, Type, TypeId};
use crate::diagnostics::SourceLoc;
use std::rc::Rc;

/// Where new instructions go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InsertPoint {
    /// Not positioned; new instructions are created detached
    Detached,
    /// Append to the end of a block
    End(BlockId),
    /// Insert before an existing instruction
    Before(InstId),
}

/// Instruction builder
pub struct Builder<'m> {
    module: &'m mut Module,
    point: InsertPoint,
    loc: Option<SourceLoc>,
}

impl<'m> Builder<'m> {
    /// Create an unpositioned builder
    pub fn new(module: &'m mut Module) -> Self {
        Self {
            module,
            point: InsertPoint::Detached,
            loc: None,
        }
    }

    /// Underlying module
    pub fn module(&mut self) -> &mut Module {
        self.module
    }

    /// Read-only view of the module
    pub fn module_ref(&self) -> &Module {
        self.module
    }

    /// Append subsequent instructions to `block`
    pub fn set_block(&mut self, block: BlockId) {
        self.point = InsertPoint::End(block);
    }

    /// Insert subsequent instructions before `anchor`
    pub fn set_insert_before(&mut self, anchor: InstId) {
        self.point = InsertPoint::Before(anchor);
    }

    /// Block the builder is positioned in
    pub fn current_block(&self) -> Option<BlockId> {
        match self.point {
            InsertPoint::Detached => None,
            InsertPoint::End(block) => Some(block),
            InsertPoint::Before(anchor) => self.module.inst(anchor).parent,
        }
    }

    /// Source location stamped on subsequent instructions
    pub fn set_loc(&mut self, loc: Option<SourceLoc>) {
        self.loc = loc;
    }

    /// Create an instruction at the current position
    pub fn emit(&mut self, op: Op, ty: Option<TypeId>, operands: Vec<InstId>) -> InstId {
        let mut inst = Inst::new(op, ty, operands);
        inst.loc = self.loc.clone();
        match self.point {
            InsertPoint::Detached => self.module.create_inst(inst),
            InsertPoint::End(block) => self.module.append_inst(block, inst),
            InsertPoint::Before(anchor) => {
                let anchored = self.module.inst(anchor).parent.is_some();
                if anchored {
                    if let Ok(id) = self.module.insert_before(anchor, inst.clone()) {
                        return id;
                    }
                }
                self.module.create_inst(inst)
            }
        }
    }

    // =========================================================================
    // Globals
    // =========================================================================

    /// Declare a function with signature `params -> result`
    pub fn func(&mut self, name: &str, params: Vec<TypeId>, result: TypeId) -> InstId {
        let ty = self.module.types.func(params, result);
        let mut inst = Inst::new(Op::Func, Some(ty), Vec::new());
        inst.name = Some(name.to_string());
        self.module.add_global(inst)
    }

    /// Declare a function and create its entry block with one parameter per
    /// signature entry; leaves the builder positioned in that block
    pub fn func_with_body(
        &mut self,
        name: &str,
        params: Vec<TypeId>,
        result: TypeId,
    ) -> (InstId, Vec<InstId>) {
        let func = self.func(name, params.clone(), result);
        let entry = self.module.add_block(func);
        let params = params
            .into_iter()
            .map(|ty| self.module.add_block_param(entry, ty))
            .collect();
        self.set_block(entry);
        (func, params)
    }

    /// Declare a shader parameter
    pub fn global_param(&mut self, name: &str, ty: TypeId, layout: Option<VarLayout>) -> InstId {
        let mut inst = Inst::new(Op::GlobalParam, Some(ty), Vec::new());
        inst.name = Some(name.to_string());
        if let Some(layout) = layout {
            inst.decorate(Decoration::Layout(Rc::new(layout)));
        }
        self.module.add_global(inst)
    }

    /// Declare a module-scope variable holding `value_ty`
    pub fn global_var(&mut self, name: &str, value_ty: TypeId) -> InstId {
        let ty = self.module.types.ptr(PtrKind::Ptr, value_ty);
        let mut inst = Inst::new(Op::GlobalVar, Some(ty), Vec::new());
        inst.name = Some(name.to_string());
        self.module.add_global(inst)
    }

    /// Declare a module-scope constant; its body is created empty
    pub fn global_constant(&mut self, name: &str, ty: TypeId) -> InstId {
        let mut inst = Inst::new(Op::GlobalConstant, Some(ty), Vec::new());
        inst.name = Some(name.to_string());
        self.module.add_global(inst)
    }

    /// Create a block in `func`
    pub fn block(&mut self, func: InstId) -> BlockId {
        self.module.add_block(func)
    }

    /// Add a parameter to `block`
    pub fn param(&mut self, block: BlockId, ty: TypeId) -> InstId {
        self.module.add_block_param(block, ty)
    }

    // =========================================================================
    // Memory and aggregates
    // =========================================================================

    /// Local variable holding `value_ty`
    pub fn var(&mut self, value_ty: TypeId) -> InstId {
        let ty = self.module.types.ptr(PtrKind::Ptr, value_ty);
        self.emit(Op::Var, Some(ty), Vec::new())
    }

    /// Load through a pointer
    pub fn load(&mut self, ptr: InstId) -> InstId {
        let ty = self
            .module
            .inst(ptr)
            .ty
            .map(|t| self.module.types.value_type(t));
        self.emit(Op::Load, ty, vec![ptr])
    }

    /// Store through a pointer
    pub fn store(&mut self, ptr: InstId, value: InstId) -> InstId {
        self.emit(Op::Store, None, vec![ptr, value])
    }

    /// `base.field` on a value
    pub fn field_extract(&mut self, base: InstId, key: FieldKey) -> InstId {
        let ty = self
            .module
            .inst(base)
            .ty
            .and_then(|t| self.module.field_type(t, key));
        self.emit(Op::FieldExtract(key), ty, vec![base])
    }

    /// Address of `base->field`
    pub fn field_address(&mut self, base: InstId, key: FieldKey) -> InstId {
        let field_ty = self
            .module
            .inst(base)
            .ty
            .and_then(|t| self.module.field_type(t, key));
        let ty = field_ty.map(|t| self.module.types.ptr(PtrKind::Ptr, t));
        self.emit(Op::FieldAddress(key), ty, vec![base])
    }

    /// `base[index]` producing `ty`
    pub fn get_element(&mut self, base: InstId, index: InstId, ty: TypeId) -> InstId {
        self.emit(Op::GetElement, Some(ty), vec![base, index])
    }

    /// Address of `base[index]` holding `element_ty`
    pub fn get_element_ptr(&mut self, base: InstId, index: InstId, element_ty: TypeId) -> InstId {
        let ty = self.module.types.ptr(PtrKind::Ptr, element_ty);
        self.emit(Op::GetElementPtr, Some(ty), vec![base, index])
    }

    /// Component selection
    pub fn swizzle(&mut self, base: InstId, components: Vec<u32>, ty: TypeId) -> InstId {
        self.emit(Op::Swizzle(components), Some(ty), vec![base])
    }

    /// Struct value from field values
    pub fn make_struct(&mut self, ty: TypeId, fields: Vec<InstId>) -> InstId {
        self.emit(Op::MakeStruct, Some(ty), fields)
    }

    /// Vector value from components
    pub fn make_vector(&mut self, ty: TypeId, components: Vec<InstId>) -> InstId {
        self.emit(Op::MakeVector, Some(ty), components)
    }

    /// Conversion / constructor
    pub fn construct(&mut self, ty: TypeId, args: Vec<InstId>) -> InstId {
        self.emit(Op::Construct, Some(ty), args)
    }

    /// Bit reinterpretation
    pub fn bit_cast(&mut self, ty: TypeId, value: InstId) -> InstId {
        self.emit(Op::BitCast, Some(ty), vec![value])
    }

    /// Undefined value
    pub fn undefined(&mut self, ty: TypeId) -> InstId {
        self.emit(Op::Undefined, Some(ty), Vec::new())
    }

    // =========================================================================
    // Arithmetic and calls
    // =========================================================================

    /// Binary operation producing `ty`
    pub fn binary(&mut self, op: BinaryOp, ty: TypeId, lhs: InstId, rhs: InstId) -> InstId {
        self.emit(Op::Binary(op), Some(ty), vec![lhs, rhs])
    }

    /// Unary operation producing `ty`
    pub fn unary(&mut self, op: UnaryOp, ty: TypeId, value: InstId) -> InstId {
        self.emit(Op::Unary(op), Some(ty), vec![value])
    }

    /// Call; the result type comes from the callee's signature
    pub fn call(&mut self, callee: InstId, args: Vec<InstId>) -> InstId {
        let result = self
            .module
            .inst(callee)
            .ty
            .and_then(|t| self.module.types.func_signature(t).map(|(_, r)| r))
            .filter(|&r| !self.module.types.is_void(r));
        let mut operands = Vec::with_capacity(args.len() + 1);
        operands.push(callee);
        operands.extend(args);
        self.emit(Op::Call, result, operands)
    }

    /// Call with an explicit result type (indirect callees)
    pub fn call_typed(&mut self, callee: InstId, args: Vec<InstId>, result: Option<TypeId>) -> InstId {
        let mut operands = Vec::with_capacity(args.len() + 1);
        operands.push(callee);
        operands.extend(args);
        self.emit(Op::Call, result, operands)
    }

    // =========================================================================
    // Generics
    // =========================================================================

    /// Existential from a concrete value and its witness table
    pub fn make_existential(&mut self, interface_ty: TypeId, value: InstId, witness: InstId) -> InstId {
        self.emit(Op::MakeExistential, Some(interface_ty), vec![value, witness])
    }

    /// Method lookup in a witness table
    pub fn lookup_witness_method(
        &mut self,
        witness: InstId,
        interface: InstId,
        requirement: u32,
        fn_ty: TypeId,
    ) -> InstId {
        self.emit(
            Op::LookupWitnessMethod {
                interface,
                requirement,
            },
            Some(fn_ty),
            vec![witness],
        )
    }

    /// `generic<args...>` with the instantiated signature
    pub fn specialize(&mut self, generic: InstId, args: Vec<InstId>, fn_ty: TypeId) -> InstId {
        let mut operands = vec![generic];
        operands.extend(args);
        self.emit(Op::Specialize, Some(fn_ty), operands)
    }

    // =========================================================================
    // Terminators
    // =========================================================================

    /// `return value`
    pub fn ret(&mut self, value: Option<InstId>) -> InstId {
        self.emit(Op::Return, None, value.into_iter().collect())
    }

    /// `discard`
    pub fn discard(&mut self) -> InstId {
        self.emit(Op::Discard, None, Vec::new())
    }

    /// `unreachable`
    pub fn unreachable(&mut self) -> InstId {
        self.emit(Op::Unreachable, None, Vec::new())
    }

    /// Jump to `target` passing block arguments
    pub fn branch(&mut self, target: BlockId, args: Vec<InstId>) -> InstId {
        self.emit(Op::Branch(target), None, args)
    }

    /// Structured two-way branch
    pub fn if_else(&mut self, cond: InstId, true_block: BlockId, false_block: BlockId, after: BlockId) -> InstId {
        self.emit(
            Op::IfElse {
                true_block,
                false_block,
                after,
            },
            None,
            vec![cond],
        )
    }

    /// Structured loop entering `target`
    pub fn loop_(
        &mut self,
        target: BlockId,
        break_block: BlockId,
        continue_block: BlockId,
        args: Vec<InstId>,
    ) -> InstId {
        self.emit(
            Op::Loop {
                target,
                break_block,
                continue_block,
            },
            None,
            args,
        )
    }

    /// Structured switch
    pub fn switch(
        &mut self,
        selector: InstId,
        break_block: BlockId,
        default: BlockId,
        cases: Vec<(InstId, BlockId)>,
    ) -> InstId {
        let mut operands = vec![selector];
        let mut targets = Vec::with_capacity(cases.len());
        for (value, target) in cases {
            operands.push(value);
            targets.push(target);
        }
        self.emit(
            Op::Switch {
                break_block,
                default,
                cases: targets,
            },
            None,
            operands,
        )
    }

    /// Type helper: interface value type for a declaration
    pub fn interface_type(&mut self, interface: InstId) -> TypeId {
        self.module.types.intern(Type::Interface(interface))
    }
}
