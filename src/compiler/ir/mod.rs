//! # Intermediate Representation (IR) for shader back-end passes
//!
//! The IR is an arena of instructions addressed by stable indices. Functions
//! own their blocks, blocks own ordered instruction and parameter lists, and
//! every pass rewrites the module in place.
//!
//! ## Module Structure
//!
//! ```text
//! ir/
//! ├── mod.rs          # This file - module definition and re-exports
//! ├── types.rs        # Type, TypeTable (structural interning), StructId, FieldKey
//! ├── instruction.rs  # InstId, BlockId, Op (closed opcode set), Inst, Decoration
//! ├── program.rs      # Module (arenas, globals, literals, structs), Block
//! ├── layout.rs       # VarLayout, TypeLayout, ResourceKind, BindingChain
//! └── builder.rs      # Builder (positioned instruction construction)
//! ```
//!
//! ## Key Types
//!
//! - [`Module`] - owns every instruction, block, type and struct declaration
//! - [`Op`] - opcode plus immediate payload; passes match on it exhaustively
//! - [`TypeTable`] - deduplicates types by structure
//! - [`BindingChain`] - sums register offsets across nested layouts

mod builder;
mod instruction;
mod layout;
mod program;
mod types;

// Re-export all public types
pub use builder::Builder;
pub use instruction::{
    BinaryOp, BlockId, Decoration, GenericParam, Inst, InstId, InterpolationMode, LoopControl, Op,
    Requirement, UnaryOp,
};
pub use layout::{
    BindingChain, MatrixLayoutMode, ProgramLayout, ResourceInfo, ResourceKind, TypeLayout, VarLayout,
};
pub use program::{Block, LegalizedPart, Module, ModuleId, ModuleImport, StructDecl, StructField};
pub use types::{
    FieldKey, PatchKind, PtrKind, ResourceAccess, ScalarKind, StreamKind, StructId, TextureShape,
    TextureType, Type, TypeId, TypeTable, UniformBufferKind,
};
