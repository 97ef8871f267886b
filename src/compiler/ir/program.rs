//! IR module: instruction and block arenas, struct declarations, globals

use super::instruction::{BlockId, Inst, InstId, Op};
use super::types::{FieldKey, StructId, Type, TypeId, TypeTable};
use crate::{Error, Result};
use std::collections::{BTreeMap, HashMap};

/// Identity of an imported module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub u32);

/// Module whose declarations are pulled into the output verbatim
#[derive(Debug, Clone)]
pub struct ModuleImport {
    /// Stable identity used to emit it at most once
    pub id: ModuleId,
    /// Module name
    pub name: String,
    /// Target source text the module contributes
    pub prelude: String,
}

/// Basic block
#[derive(Debug, Clone)]
pub struct Block {
    /// Function or initializer owning the block
    pub parent: InstId,
    /// Block parameters (phis); function parameters in the entry block
    pub params: Vec<InstId>,
    /// Instructions in order; the last one is the terminator
    pub insts: Vec<InstId>,
}

/// Field of a struct declaration
#[derive(Debug, Clone)]
pub struct StructField {
    /// Field identity
    pub key: FieldKey,
    /// Field name
    pub name: String,
    /// Field type
    pub ty: TypeId,
}

/// Struct declaration
#[derive(Debug, Clone)]
pub struct StructDecl {
    /// Declared name
    pub name: String,
    /// Fields in declaration order
    pub fields: Vec<StructField>,
    /// Built into the target language; never declared in output
    pub builtin: bool,
}

impl StructDecl {
    /// Field with the given key
    pub fn field(&self, key: FieldKey) -> Option<&StructField> {
        self.fields.iter().find(|f| f.key == key)
    }
}

/// Part of a declaration whose storage was split by legalization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegalizedPart {
    /// Field path from the original declaration, e.g. `material.albedo`
    pub path: String,
    /// Replacement declaration
    pub inst: InstId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum LiteralBits {
    Int(i64),
    Float(u64),
    Bool(bool),
}

/// IR module
#[derive(Debug, Clone)]
pub struct Module {
    /// Module name
    pub name: String,
    /// Interned types
    pub types: TypeTable,
    /// Imported modules, in import order
    pub imports: Vec<ModuleImport>,
    /// Original name to legalized storage
    pub legalized_decls: BTreeMap<String, Vec<LegalizedPart>>,
    insts: Vec<Inst>,
    blocks: Vec<Block>,
    structs: Vec<StructDecl>,
    globals: Vec<InstId>,
    field_names: HashMap<FieldKey, String>,
    next_field_key: u32,
    literals: HashMap<(Option<TypeId>, LiteralBits), InstId>,
}

impl Module {
    /// Create an empty module
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            types: TypeTable::new(),
            imports: Vec::new(),
            legalized_decls: BTreeMap::new(),
            insts: Vec::new(),
            blocks: Vec::new(),
            structs: Vec::new(),
            globals: Vec::new(),
            field_names: HashMap::new(),
            next_field_key: 0,
            literals: HashMap::new(),
        }
    }

    // =========================================================================
    // Instructions
    // =========================================================================

    /// Instruction by id
    pub fn inst(&self, id: InstId) -> &Inst {
        &self.insts[id.0 as usize]
    }

    /// Mutable instruction by id
    pub fn inst_mut(&mut self, id: InstId) -> &mut Inst {
        &mut self.insts[id.0 as usize]
    }

    /// Number of instructions ever created
    pub fn inst_count(&self) -> usize {
        self.insts.len()
    }

    /// Every live instruction id in arena order
    pub fn live_insts(&self) -> impl Iterator<Item = InstId> + '_ {
        self.insts
            .iter()
            .enumerate()
            .filter(|(_, inst)| !inst.removed)
            .map(|(i, _)| InstId(i as u32))
    }

    /// Place a detached instruction in the arena
    pub fn create_inst(&mut self, inst: Inst) -> InstId {
        let id = InstId(self.insts.len() as u32);
        self.insts.push(inst);
        id
    }

    /// Create a module-scope value
    pub fn add_global(&mut self, inst: Inst) -> InstId {
        let id = self.create_inst(inst);
        self.globals.push(id);
        id
    }

    /// Module-scope values in declaration order
    pub fn globals(&self) -> &[InstId] {
        &self.globals
    }

    /// Global with the given linkage name
    pub fn global_by_name(&self, name: &str) -> Option<InstId> {
        self.globals
            .iter()
            .copied()
            .find(|&id| self.inst(id).name.as_deref() == Some(name))
    }

    /// Append an instruction to the end of `block`
    pub fn append_inst(&mut self, block: BlockId, mut inst: Inst) -> InstId {
        inst.parent = Some(block);
        let id = self.create_inst(inst);
        self.blocks[block.0 as usize].insts.push(id);
        id
    }

    /// Insert an instruction immediately before `anchor`
    pub fn insert_before(&mut self, anchor: InstId, mut inst: Inst) -> Result<InstId> {
        let block = self
            .inst(anchor)
            .parent
            .ok_or_else(|| Error::invariant("insertion anchor is not inside a block"))?;
        let pos = self.blocks[block.0 as usize]
            .insts
            .iter()
            .position(|&i| i == anchor)
            .ok_or_else(|| Error::invariant("insertion anchor is a block parameter"))?;
        inst.parent = Some(block);
        let id = self.create_inst(inst);
        self.blocks[block.0 as usize].insts.insert(pos, id);
        Ok(id)
    }

    /// Insert an instruction immediately after `anchor`
    pub fn insert_after(&mut self, anchor: InstId, mut inst: Inst) -> Result<InstId> {
        let block = self
            .inst(anchor)
            .parent
            .ok_or_else(|| Error::invariant("insertion anchor is not inside a block"))?;
        let pos = self.blocks[block.0 as usize]
            .insts
            .iter()
            .position(|&i| i == anchor)
            .ok_or_else(|| Error::invariant("insertion anchor is a block parameter"))?;
        inst.parent = Some(block);
        let id = self.create_inst(inst);
        self.blocks[block.0 as usize].insts.insert(pos + 1, id);
        Ok(id)
    }

    /// Insert an instruction at the start of `block`
    pub fn prepend_inst(&mut self, block: BlockId, mut inst: Inst) -> InstId {
        inst.parent = Some(block);
        let id = self.create_inst(inst);
        self.blocks[block.0 as usize].insts.insert(0, id);
        id
    }

    /// Append a block parameter
    pub fn add_block_param(&mut self, block: BlockId, ty: TypeId) -> InstId {
        let mut inst = Inst::new(Op::Param, Some(ty), Vec::new());
        inst.parent = Some(block);
        let id = self.create_inst(inst);
        self.blocks[block.0 as usize].params.push(id);
        id
    }

    /// Insert a block parameter at `index`
    pub fn insert_block_param(&mut self, block: BlockId, index: usize, ty: TypeId) -> InstId {
        let mut inst = Inst::new(Op::Param, Some(ty), Vec::new());
        inst.parent = Some(block);
        let id = self.create_inst(inst);
        self.blocks[block.0 as usize].params.insert(index, id);
        id
    }

    /// Mark an instruction removed and detach it from its container
    pub fn remove_inst(&mut self, id: InstId) {
        if self.inst(id).removed {
            return;
        }
        self.inst_mut(id).removed = true;
        match self.inst(id).parent {
            Some(block) => {
                let block = &mut self.blocks[block.0 as usize];
                block.insts.retain(|&i| i != id);
                block.params.retain(|&i| i != id);
            }
            None => self.globals.retain(|&i| i != id),
        }
        let body = std::mem::take(&mut self.inst_mut(id).body);
        for block in body {
            let block = &self.blocks[block.0 as usize];
            let owned: Vec<InstId> = block.params.iter().chain(&block.insts).copied().collect();
            for inst in owned {
                self.insts[inst.0 as usize].removed = true;
            }
        }
    }

    /// Redirect every operand referring to `old` to `new`
    pub fn replace_all_uses(&mut self, old: InstId, new: InstId) {
        for inst in self.insts.iter_mut().filter(|inst| !inst.removed) {
            for operand in inst.operands.iter_mut() {
                if *operand == old {
                    *operand = new;
                }
            }
        }
    }

    /// Live instructions that use `id` as an operand
    pub fn uses_of(&self, id: InstId) -> Vec<InstId> {
        self.live_insts()
            .filter(|&user| self.inst(user).operands.contains(&id))
            .collect()
    }

    /// Type of a value, failing on void values
    pub fn type_of(&self, id: InstId) -> Result<TypeId> {
        self.inst(id).ty.ok_or_else(|| {
            Error::invariant(format!(
                "{} value %{} has no type",
                self.inst(id).op.mnemonic(),
                id.0
            ))
        })
    }

    // =========================================================================
    // Literals
    // =========================================================================

    fn literal(&mut self, bits: LiteralBits, ty: TypeId) -> InstId {
        if let Some(&id) = self.literals.get(&(Some(ty), bits)) {
            return id;
        }
        let op = match bits {
            LiteralBits::Int(v) => Op::IntLit(v),
            LiteralBits::Float(v) => Op::FloatLit(f64::from_bits(v)),
            LiteralBits::Bool(v) => Op::BoolLit(v),
        };
        let id = self.create_inst(Inst::new(op, Some(ty), Vec::new()));
        self.literals.insert((Some(ty), bits), id);
        id
    }

    /// Integer literal of an explicit integer type
    pub fn int_literal(&mut self, ty: TypeId, value: i64) -> InstId {
        self.literal(LiteralBits::Int(value), ty)
    }

    /// `int` literal
    pub fn int_lit(&mut self, value: i64) -> InstId {
        let ty = self.types.int();
        self.int_literal(ty, value)
    }

    /// `uint` literal
    pub fn uint_lit(&mut self, value: u32) -> InstId {
        let ty = self.types.uint();
        self.int_literal(ty, i64::from(value))
    }

    /// `float` literal
    pub fn float_lit(&mut self, value: f64) -> InstId {
        let ty = self.types.float();
        self.literal(LiteralBits::Float(value.to_bits()), ty)
    }

    /// `bool` literal
    pub fn bool_lit(&mut self, value: bool) -> InstId {
        let ty = self.types.bool();
        self.literal(LiteralBits::Bool(value), ty)
    }

    // =========================================================================
    // Blocks
    // =========================================================================

    /// Block by id
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }

    /// Mutable block by id
    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.0 as usize]
    }

    /// Create a block at the end of `func`'s body
    pub fn add_block(&mut self, func: InstId) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block {
            parent: func,
            params: Vec::new(),
            insts: Vec::new(),
        });
        self.insts[func.0 as usize].body.push(id);
        id
    }

    /// Terminator of `block`
    pub fn terminator(&self, block: BlockId) -> Option<InstId> {
        self.block(block)
            .insts
            .last()
            .copied()
            .filter(|&id| self.inst(id).op.is_terminator())
    }

    /// Terminator of `block`, failing when the block is unterminated
    pub fn expect_terminator(&self, block: BlockId) -> Result<InstId> {
        self.terminator(block)
            .ok_or_else(|| Error::invariant(format!("block b{} has no terminator", block.0)))
    }

    /// Entry block of a function, if it has a body
    pub fn entry_block(&self, func: InstId) -> Option<BlockId> {
        self.inst(func).body.first().copied()
    }

    /// Parameters of a function
    pub fn func_params(&self, func: InstId) -> &[InstId] {
        match self.entry_block(func) {
            Some(block) => &self.block(block).params,
            None => &[],
        }
    }

    /// Every instruction (params first) in every block of `func`
    pub fn func_insts(&self, func: InstId) -> Vec<InstId> {
        let mut out = Vec::new();
        for &block in &self.inst(func).body {
            out.extend_from_slice(&self.block(block).params);
            out.extend_from_slice(&self.block(block).insts);
        }
        out
    }

    // =========================================================================
    // Structs and fields
    // =========================================================================

    /// Allocate a fresh field key
    pub fn new_field_key(&mut self, name: impl Into<String>) -> FieldKey {
        let key = FieldKey(self.next_field_key);
        self.next_field_key += 1;
        self.field_names.insert(key, name.into());
        key
    }

    /// Name of a field key
    pub fn field_name(&self, key: FieldKey) -> &str {
        self.field_names.get(&key).map_or("_field", String::as_str)
    }

    /// Declare a struct with fresh field keys
    pub fn add_struct(&mut self, name: impl Into<String>, fields: &[(&str, TypeId)]) -> StructId {
        let fields = fields
            .iter()
            .map(|&(field_name, ty)| StructField {
                key: self.new_field_key(field_name),
                name: field_name.to_string(),
                ty,
            })
            .collect();
        self.add_struct_decl(StructDecl {
            name: name.into(),
            fields,
            builtin: false,
        })
    }

    /// Declare a struct from a prepared declaration
    pub fn add_struct_decl(&mut self, decl: StructDecl) -> StructId {
        for field in &decl.fields {
            self.field_names
                .entry(field.key)
                .or_insert_with(|| field.name.clone());
        }
        let id = StructId(self.structs.len() as u32);
        self.structs.push(decl);
        id
    }

    /// Struct declaration by id
    pub fn struct_decl(&self, id: StructId) -> &StructDecl {
        &self.structs[id.0 as usize]
    }

    /// All struct declarations with their ids
    pub fn structs(&self) -> impl Iterator<Item = (StructId, &StructDecl)> {
        self.structs
            .iter()
            .enumerate()
            .map(|(i, decl)| (StructId(i as u32), decl))
    }

    /// Interned type for a struct declaration
    pub fn struct_type(&mut self, id: StructId) -> TypeId {
        self.types.intern(Type::Struct(id))
    }

    /// Key of the field named `name` in struct `id`
    pub fn field_key(&self, id: StructId, name: &str) -> Option<FieldKey> {
        self.struct_decl(id)
            .fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.key)
    }

    /// Type of field `key` in struct type `ty` (pointers are looked through)
    pub fn field_type(&self, ty: TypeId, key: FieldKey) -> Option<TypeId> {
        let value_ty = self.types.value_type(ty);
        let value_ty = match self.types.get(value_ty) {
            Type::UniformBuffer { element, .. } => *element,
            _ => value_ty,
        };
        match self.types.get(value_ty) {
            Type::Struct(id) => self.struct_decl(*id).field(key).map(|f| f.ty),
            _ => None,
        }
    }

    // =========================================================================
    // Whole-module rewrites
    // =========================================================================

    /// Rewrite every type reachable from instructions and struct fields.
    ///
    /// `f` sees each distinct type once; see [`TypeTable::rewrite`].
    pub fn rewrite_types(&mut self, f: &mut dyn FnMut(&mut TypeTable, TypeId) -> Option<TypeId>) {
        let Module {
            types,
            insts,
            structs,
            ..
        } = self;
        let mut memo = HashMap::new();
        for inst in insts.iter_mut().filter(|inst| !inst.removed) {
            if let Some(ty) = inst.ty {
                inst.ty = Some(types.rewrite(ty, f, &mut memo));
            }
            match &mut inst.op {
                Op::WitnessTable { concrete, .. } | Op::RttiObject { concrete } => {
                    *concrete = types.rewrite(*concrete, f, &mut memo);
                }
                Op::Interface { requirements } => {
                    for req in requirements.iter_mut() {
                        for param in req.params.iter_mut() {
                            *param = types.rewrite(*param, f, &mut memo);
                        }
                        req.result = types.rewrite(req.result, f, &mut memo);
                    }
                }
                _ => {}
            }
        }
        for decl in structs.iter_mut() {
            for field in decl.fields.iter_mut() {
                field.ty = types.rewrite(field.ty, f, &mut memo);
            }
        }
    }

    /// Recompute a function's signature from its entry-block parameters
    pub fn refresh_func_type(&mut self, func: InstId) -> Result<()> {
        let ty = self.type_of(func)?;
        let result = match self.types.func_signature(ty) {
            Some((_, result)) => result,
            None => return Err(Error::invariant("function value without a function type")),
        };
        let params = self
            .func_params(func)
            .iter()
            .map(|&p| self.type_of(p))
            .collect::<Result<Vec<_>>>()?;
        let new_ty = self.types.func(params, result);
        self.inst_mut(func).ty = Some(new_ty);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literals_are_deduplicated() {
        let mut module = Module::new("m");
        let a = module.int_lit(3);
        let b = module.int_lit(3);
        let c = module.uint_lit(3);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(module.inst(a).parent.is_none());
    }

    #[test]
    fn test_replace_and_remove() {
        let mut module = Module::new("m");
        let float = module.types.float();
        let void = module.types.void();
        let fn_ty = module.types.func(vec![float], void);
        let func = module.add_global(Inst::new(Op::Func, Some(fn_ty), vec![]));
        let block = module.add_block(func);
        let param = module.add_block_param(block, float);
        let one = module.float_lit(1.0);
        let add = module.append_inst(
            block,
            Inst::new(
                Op::Binary(super::super::instruction::BinaryOp::Add),
                Some(float),
                vec![param, one],
            ),
        );
        let ret = module.append_inst(block, Inst::new(Op::Return, None, vec![add]));

        let two = module.float_lit(2.0);
        module.replace_all_uses(one, two);
        assert_eq!(module.inst(add).operands, vec![param, two]);

        module.remove_inst(ret);
        assert!(module.terminator(block).is_none());
        assert_eq!(module.block(block).insts, vec![add]);
        assert_eq!(module.uses_of(add), Vec::<InstId>::new());
    }
}
