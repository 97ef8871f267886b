//! IR instruction definitions
//!
//! Every value in a module is an [`Inst`] stored in the module arena and
//! addressed by an [`InstId`]. The opcode set is a closed enum so each pass
//! matches on it exhaustively.

use super::layout::VarLayout;
use super::types::{FieldKey, TypeId};
use crate::compiler::target::{Dialect, Stage};
use crate::diagnostics::SourceLoc;
use std::rc::Rc;

/// Instruction handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstId(pub u32);

/// Block handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// Component-wise `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Rem,
    /// `&`
    BitAnd,
    /// `|`
    BitOr,
    /// `^`
    BitXor,
    /// `<<`
    Shl,
    /// `>>`
    Shr,
    /// `&&`
    And,
    /// `||`
    Or,
    /// `==`
    Eq,
    /// `!=`
    Neq,
    /// `<`
    Less,
    /// `<=`
    Leq,
    /// `>`
    Greater,
    /// `>=`
    Geq,
    /// Linear-algebra product (matrix*matrix, matrix*vector, vector*matrix)
    MatMul,
}

impl BinaryOp {
    /// Infix spelling shared by both dialects
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul | BinaryOp::MatMul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Eq => "==",
            BinaryOp::Neq => "!=",
            BinaryOp::Less => "<",
            BinaryOp::Leq => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::Geq => ">=",
        }
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// `-x`
    Neg,
    /// `!x` on bools, `~x` on integers
    Not,
}

/// One requirement of an interface
#[derive(Debug, Clone, PartialEq)]
pub struct Requirement {
    /// Requirement name
    pub name: String,
    /// Parameter types; [`super::Type::This`] marks the conforming type
    pub params: Vec<TypeId>,
    /// Result type
    pub result: TypeId,
}

/// Opcode plus any immediate payload
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    // Literals (detached, deduplicated by the module)
    /// Integer literal
    IntLit(i64),
    /// Floating-point literal
    FloatLit(f64),
    /// Boolean literal
    BoolLit(bool),

    // Global values
    /// Function; blocks live in `Inst::body`
    Func,
    /// Module-scope variable; type is a pointer to the stored type
    GlobalVar,
    /// Shader parameter bound through the layout
    GlobalParam,
    /// Constant whose body computes its value
    GlobalConstant,
    /// Conformance of `concrete` to `interface`; operands are the
    /// implementing functions in requirement order
    WitnessTable {
        /// Interface declaration
        interface: InstId,
        /// Conforming type
        concrete: TypeId,
    },
    /// Runtime type information object for `concrete`
    RttiObject {
        /// Described type
        concrete: TypeId,
    },
    /// Interface declaration
    Interface {
        /// Requirements in declaration order
        requirements: Vec<Requirement>,
    },

    // Local values
    /// Block parameter (function parameter in the entry block)
    Param,
    /// Local variable; type is a pointer to the stored type
    Var,
    /// Undefined value of the result type
    Undefined,
    /// `load(ptr)`
    Load,
    /// `store(ptr, value)`
    Store,
    /// `base.field` on a value
    FieldExtract(FieldKey),
    /// `&base->field`
    FieldAddress(FieldKey),
    /// `base[index]` on a value
    GetElement,
    /// `&base[index]`
    GetElementPtr,
    /// Component selection on a vector
    Swizzle(Vec<u32>),
    /// `base` with the selected components replaced by `source`
    SwizzleSet(Vec<u32>),
    /// Type conversion / constructor call
    Construct,
    /// Vector from components
    MakeVector,
    /// Array from elements
    MakeArray,
    /// Struct from field values in declaration order
    MakeStruct,
    /// `callee(args...)`
    Call,
    /// Binary arithmetic/logic
    Binary(BinaryOp),
    /// Unary arithmetic/logic
    Unary(UnaryOp),
    /// `cond ? a : b`
    Select,
    /// Reinterpret the bits of a 32-bit scalar
    BitCast,
    /// `buffer[index]`
    BufferLoad,
    /// `buffer[index] = value`
    BufferStore,
    /// Reference to `buffer[index]`
    BufferElementRef,
    /// `generic<args...>`
    Specialize,

    // Generics / existentials
    /// Wrap a concrete value and its witness table into an existential
    MakeExistential,
    /// `MakeExistential` with an explicit RTTI operand
    MakeExistentialWithRtti,
    /// Payload of an existential
    ExtractExistentialValue,
    /// Type identity of an existential
    ExtractExistentialType,
    /// Witness table of an existential
    ExtractExistentialWitnessTable,
    /// Function implementing `requirement` of `interface` in the operand's table
    LookupWitnessMethod {
        /// Interface declaration
        interface: InstId,
        /// Requirement index
        requirement: u32,
    },
    /// Marshal a concrete value into an any-value
    PackAnyValue,
    /// Marshal an any-value back into the result type
    UnpackAnyValue,

    // Terminators
    /// Return, with an optional value operand
    Return,
    /// Fragment discard
    Discard,
    /// Control never reaches here
    Unreachable,
    /// Unconditional jump; operands are the target's block arguments
    Branch(BlockId),
    /// Unstructured two-way jump
    ConditionalBranch {
        /// Taken when the condition holds
        true_block: BlockId,
        /// Taken otherwise
        false_block: BlockId,
    },
    /// Structured two-way branch; operand 0 is the condition
    IfElse {
        /// Taken when the condition holds
        true_block: BlockId,
        /// Taken otherwise; equals `after` when there is no else branch
        false_block: BlockId,
        /// Merge point
        after: BlockId,
    },
    /// Structured loop; operands are the header's block arguments
    Loop {
        /// Loop header
        target: BlockId,
        /// Block control reaches when leaving the loop
        break_block: BlockId,
        /// Block that continues the next iteration
        continue_block: BlockId,
    },
    /// Structured multi-way branch; operand 0 is the selector, operands
    /// `1..` the case values matching `cases`
    Switch {
        /// Merge point
        break_block: BlockId,
        /// Target for unmatched values
        default: BlockId,
        /// Targets of each case value
        cases: Vec<BlockId>,
    },
}

impl Op {
    /// True for block terminators
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Op::Return
                | Op::Discard
                | Op::Unreachable
                | Op::Branch(_)
                | Op::ConditionalBranch { .. }
                | Op::IfElse { .. }
                | Op::Loop { .. }
                | Op::Switch { .. }
        )
    }

    /// True for literals
    pub fn is_literal(&self) -> bool {
        matches!(self, Op::IntLit(_) | Op::FloatLit(_) | Op::BoolLit(_))
    }

    /// True for module-scope values
    pub fn is_global(&self) -> bool {
        matches!(
            self,
            Op::Func
                | Op::GlobalVar
                | Op::GlobalParam
                | Op::GlobalConstant
                | Op::WitnessTable { .. }
                | Op::RttiObject { .. }
                | Op::Interface { .. }
        )
    }

    /// True if the instruction must be kept even when its result is unused
    pub fn has_side_effects(&self) -> bool {
        self.is_terminator() || matches!(self, Op::Store | Op::Call | Op::BufferStore)
    }

    /// Successor blocks of a terminator in a stable order
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Op::Branch(target) => vec![*target],
            Op::ConditionalBranch {
                true_block,
                false_block,
            } => vec![*true_block, *false_block],
            Op::IfElse {
                true_block,
                false_block,
                ..
            } => vec![*true_block, *false_block],
            Op::Loop { target, .. } => vec![*target],
            Op::Switch { default, cases, .. } => {
                let mut succ = cases.clone();
                succ.push(*default);
                succ
            }
            _ => Vec::new(),
        }
    }

    /// Short mnemonic used by IR dumps and fault messages
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Op::IntLit(_) => "int_lit",
            Op::FloatLit(_) => "float_lit",
            Op::BoolLit(_) => "bool_lit",
            Op::Func => "func",
            Op::GlobalVar => "global_var",
            Op::GlobalParam => "global_param",
            Op::GlobalConstant => "global_constant",
            Op::WitnessTable { .. } => "witness_table",
            Op::RttiObject { .. } => "rtti_object",
            Op::Interface { .. } => "interface",
            Op::Param => "param",
            Op::Var => "var",
            Op::Undefined => "undefined",
            Op::Load => "load",
            Op::Store => "store",
            Op::FieldExtract(_) => "field_extract",
            Op::FieldAddress(_) => "field_address",
            Op::GetElement => "get_element",
            Op::GetElementPtr => "get_element_ptr",
            Op::Swizzle(_) => "swizzle",
            Op::SwizzleSet(_) => "swizzle_set",
            Op::Construct => "construct",
            Op::MakeVector => "make_vector",
            Op::MakeArray => "make_array",
            Op::MakeStruct => "make_struct",
            Op::Call => "call",
            Op::Binary(_) => "binary",
            Op::Unary(_) => "unary",
            Op::Select => "select",
            Op::BitCast => "bit_cast",
            Op::BufferLoad => "buffer_load",
            Op::BufferStore => "buffer_store",
            Op::BufferElementRef => "buffer_element_ref",
            Op::Specialize => "specialize",
            Op::MakeExistential => "make_existential",
            Op::MakeExistentialWithRtti => "make_existential_with_rtti",
            Op::ExtractExistentialValue => "extract_existential_value",
            Op::ExtractExistentialType => "extract_existential_type",
            Op::ExtractExistentialWitnessTable => "extract_existential_witness_table",
            Op::LookupWitnessMethod { .. } => "lookup_witness_method",
            Op::PackAnyValue => "pack_any_value",
            Op::UnpackAnyValue => "unpack_any_value",
            Op::Return => "return",
            Op::Discard => "discard",
            Op::Unreachable => "unreachable",
            Op::Branch(_) => "branch",
            Op::ConditionalBranch { .. } => "conditional_branch",
            Op::IfElse { .. } => "if_else",
            Op::Loop { .. } => "loop",
            Op::Switch { .. } => "switch",
        }
    }
}

/// Loop-control hint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    /// Request unrolling
    Unroll,
    /// Request a real loop
    Loop,
}

/// Interpolation qualifier on a varying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpolationMode {
    /// No interpolation
    Flat,
    /// Perspective-incorrect interpolation
    NoPerspective,
    /// Centroid sampling
    Centroid,
}

/// Type parameter of a generic function
///
/// The body refers to the parameter's runtime type identity and witness
/// table through detached placeholder values, which lowering replaces with
/// real function parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct GenericParam {
    /// Parameter name
    pub name: String,
    /// Interface the argument must conform to, if any
    pub constraint: Option<InstId>,
    /// Placeholder for the type identity
    pub rtti: InstId,
    /// Placeholder for the witness table, present when constrained
    pub witness: Option<InstId>,
}

/// Metadata attached to an instruction
#[derive(Debug, Clone)]
pub enum Decoration {
    /// Resource layout of a shader parameter or entry point parameter
    Layout(Rc<VarLayout>),
    /// Marks the function as a shader entry point
    EntryPoint {
        /// Pipeline stage
        stage: Stage,
        /// Source-level name
        name: String,
    },
    /// Readable name for a local value
    NameHint(String),
    /// Target-specific definition of an intrinsic
    TargetIntrinsic {
        /// Dialect the definition applies to; `None` for all
        dialect: Option<Dialect>,
        /// Plain function name or template string
        definition: String,
    },
    /// Loop-control hint on a `Loop` terminator
    LoopControl(LoopControl),
    /// Compute thread-group size
    NumThreads([u32; 3]),
    /// Geometry-shader output vertex bound
    MaxVertexCount(u32),
    /// Calling this intrinsic requires a GLSL extension
    RequireGlslExtension(String),
    /// Calling this intrinsic requires a GLSL version
    RequireGlslVersion(u32),
    /// Varying semantic on an entry point parameter
    Semantic {
        /// Semantic name
        name: String,
        /// Semantic index
        index: u32,
    },
    /// Interpolation qualifier
    Interpolation(InterpolationMode),
    /// Type parameters of a generic function
    Generic(Vec<GenericParam>),
}

/// One IR instruction
#[derive(Debug, Clone)]
pub struct Inst {
    /// Opcode
    pub op: Op,
    /// Ordered operands
    pub operands: Vec<InstId>,
    /// Result type; `None` for void
    pub ty: Option<TypeId>,
    /// Metadata
    pub decorations: Vec<Decoration>,
    /// Originating source location
    pub loc: Option<SourceLoc>,
    /// Linkage name of a global
    pub name: Option<String>,
    /// Owning block; `None` for globals and literals
    pub parent: Option<BlockId>,
    /// Blocks owned by a function or initializer
    pub body: Vec<BlockId>,
    /// Set once the instruction has been deleted
    pub removed: bool,
}

impl Inst {
    /// Create a detached instruction
    pub fn new(op: Op, ty: Option<TypeId>, operands: Vec<InstId>) -> Self {
        Self {
            op,
            operands,
            ty,
            decorations: Vec::new(),
            loc: None,
            name: None,
            parent: None,
            body: Vec::new(),
            removed: false,
        }
    }

    /// Resource layout attached to this value
    pub fn layout(&self) -> Option<&Rc<VarLayout>> {
        self.decorations.iter().find_map(|d| match d {
            Decoration::Layout(layout) => Some(layout),
            _ => None,
        })
    }

    /// Entry point stage and name
    pub fn entry_point(&self) -> Option<(Stage, &str)> {
        self.decorations.iter().find_map(|d| match d {
            Decoration::EntryPoint { stage, name } => Some((*stage, name.as_str())),
            _ => None,
        })
    }

    /// Readable name hint
    pub fn name_hint(&self) -> Option<&str> {
        self.decorations.iter().find_map(|d| match d {
            Decoration::NameHint(name) => Some(name.as_str()),
            _ => None,
        })
    }

    /// Type parameters of a generic function
    pub fn generic_params(&self) -> Option<&[GenericParam]> {
        self.decorations.iter().find_map(|d| match d {
            Decoration::Generic(params) => Some(params.as_slice()),
            _ => None,
        })
    }

    /// Intrinsic definition for `dialect`, preferring a dialect-specific one
    pub fn target_intrinsic(&self, dialect: Dialect) -> Option<&str> {
        let mut fallback = None;
        for decoration in &self.decorations {
            if let Decoration::TargetIntrinsic {
                dialect: d,
                definition,
            } = decoration
            {
                match d {
                    Some(d) if *d == dialect => return Some(definition.as_str()),
                    None => fallback = Some(definition.as_str()),
                    _ => {}
                }
            }
        }
        fallback
    }

    /// Varying semantic
    pub fn semantic(&self) -> Option<(&str, u32)> {
        self.decorations.iter().find_map(|d| match d {
            Decoration::Semantic { name, index } => Some((name.as_str(), *index)),
            _ => None,
        })
    }

    /// Interpolation qualifier
    pub fn interpolation(&self) -> Option<InterpolationMode> {
        self.decorations.iter().find_map(|d| match d {
            Decoration::Interpolation(mode) => Some(*mode),
            _ => None,
        })
    }

    /// Loop-control hint
    pub fn loop_control(&self) -> Option<LoopControl> {
        self.decorations.iter().find_map(|d| match d {
            Decoration::LoopControl(control) => Some(*control),
            _ => None,
        })
    }

    /// Add a decoration
    pub fn decorate(&mut self, decoration: Decoration) {
        self.decorations.push(decoration);
    }

    /// Remove every decoration matching `pred`
    pub fn strip_decorations(&mut self, pred: impl Fn(&Decoration) -> bool) {
        self.decorations.retain(|d| !pred(d));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_if_else_successors_without_else() {
        let op = Op::IfElse {
            true_block: BlockId(1),
            false_block: BlockId(2),
            after: BlockId(2),
        };
        assert_eq!(op.successors(), vec![BlockId(1), BlockId(2)]);
        assert!(op.is_terminator());
    }

    #[test]
    fn test_target_intrinsic_prefers_dialect() {
        let mut inst = Inst::new(Op::Func, None, vec![]);
        inst.decorate(Decoration::TargetIntrinsic {
            dialect: None,
            definition: "lerp".into(),
        });
        inst.decorate(Decoration::TargetIntrinsic {
            dialect: Some(Dialect::Glsl),
            definition: "mix".into(),
        });
        assert_eq!(inst.target_intrinsic(Dialect::Glsl), Some("mix"));
        assert_eq!(inst.target_intrinsic(Dialect::Hlsl), Some("lerp"));
    }
}
