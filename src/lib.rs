#![allow(clippy::too_many_arguments)]
//! # Shadegen - Shader Compiler Back End
//!
//! Shadegen takes a fully type-checked, target-agnostic shader IR module and
//! turns it into HLSL or GLSL source text for one entry point.
//!
//! ## Pipeline
//!
//! ```text
//! IR Module → Generics Lowering → Type Legalization → Cleanup (SSA + DCE) → Emission
//! ```
//!
//! - **Generics lowering** removes generic functions, interface-typed values and
//!   witness tables, replacing them with any-value marshalling and integer-ID
//!   switch dispatch.
//! - **Type legalization** splits aggregates holding opaque resource handles
//!   into ordinary/special halves the target can express.
//! - **Cleanup** reconstructs SSA form and drops dead code.
//! - **Emission** reconstructs structured control flow and prints the
//!   dialect-specific declarations, bindings and directives.
//!
//! ## Quick Start
//!
//! ```ignore
//! use shadegen::compiler::{CompileOptions, Compiler, TargetDescriptor};
//! use shadegen::compiler::ir::ProgramLayout;
//!
//! let mut module = build_module(); // produced by the front end
//! let options = CompileOptions::for_target(TargetDescriptor::glsl(450));
//! let result = Compiler::new(options).compile(&mut module, &ProgramLayout::default())?;
//! println!("{}", result.source);
//! ```
//!
//! ## Error Handling
//!
//! User-facing problems are collected in a [`DiagnosticSink`]; a stage that
//! finishes with errors stops the pipeline with [`Error::CompilationFailed`].
//! Violated IR invariants surface as [`Error::InvariantFault`].

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod compiler;
pub mod diagnostics;
pub mod error;

pub use compiler::{CompileOptions, CompileResult, Compiler};
pub use diagnostics::{Diagnostic, DiagnosticSink, Severity, SourceLoc};
pub use error::{Error, Result};
