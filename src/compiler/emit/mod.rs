//! # Emission Engine
//!
//! Prints a lowered, legalized module as HLSL or GLSL source text.
//!
//! ## Module Structure
//!
//! ```text
//! emit/
//! ├── mod.rs            # EmitContext, emit_module, final assembly
//! ├── writer.rs         # SourceWriter: indentation, cursor, #line directives
//! ├── extensions.rs     # ExtensionTracker: monotone #version / #extension set
//! ├── layout.rs         # register()/packoffset() and layout(...) from a BindingChain
//! ├── types.rs          # type spelling, struct declarations
//! ├── intrinsic.rs      # target intrinsic templates ($0-$9, $p, $P, $z, $N)
//! ├── expr.rs           # naming, fold policy, expressions and statements
//! ├── control_flow.rs   # structured region walk with a break/continue label stack
//! └── decls.rs          # globals, parameter groups, functions, entry attributes
//! ```
//!
//! ## Output
//!
//! ```text
//! #version N             (GLSL only)
//! #extension X : require (GLSL only, first-required order)
//! fallback sampler       (GLSL only, when a texel fetch needed one)
//! imports, structs, forward declarations, parameters, constants, functions
//! ```

mod control_flow;
mod decls;
mod expr;
mod extensions;
mod intrinsic;
mod layout;
mod types;
mod writer;

pub use extensions::{ExtensionTracker, FALLBACK_GLSL_VERSION, KNOWN_GLSL_VERSIONS};
pub use layout::{
    glsl_layout_qualifier, glsl_layout_qualifiers, hlsl_register_semantic, hlsl_register_semantics,
    split_uniform_offset, BindingError,
};
pub use writer::{SourceWriter, MAX_LINE_PADDING};

use super::ir::{InstId, Module, ModuleId, ProgramLayout, StructId, TypeId};
use super::target::{Dialect, TargetDescriptor};
use crate::diagnostics::{DiagnosticSink, SourceLoc};
use crate::Result;
use std::collections::{HashMap, HashSet};

/// Name of the sampler declared for texel fetches that lack one
pub const FALLBACK_SAMPLER_NAME: &str = "fallback_samplerForTexelFetch";

/// How operands are materialized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EmitMode {
    /// Ordinary statement emission
    Default,
    /// Inside a global constant initializer, which must be one expression
    GlobalConstant,
}

/// Emit `module` as source text for `target`.
///
/// Constructs the dialect cannot express are reported to `sink`; the
/// returned text is only meaningful when no errors were reported.
pub fn emit_module(
    module: &Module,
    layout: &ProgramLayout,
    target: &TargetDescriptor,
    sink: &mut DiagnosticSink,
) -> Result<String> {
    tracing::debug!(
        module = %module.name,
        dialect = target.dialect.as_str(),
        version = target.version,
        "emission"
    );
    let mut ctx = EmitContext::new(module, layout, target, sink);
    ctx.emit_module_body()?;
    let source = ctx.assemble();
    tracing::debug!(bytes = source.len(), "emission complete");
    Ok(source)
}

/// State for one emission request
struct EmitContext<'a> {
    module: &'a Module,
    layout: &'a ProgramLayout,
    target: &'a TargetDescriptor,
    sink: &'a mut DiagnosticSink,
    writer: SourceWriter,
    extensions: ExtensionTracker,
    names: HashMap<InstId, String>,
    next_unique_id: u32,
    declared_structs: HashSet<StructId>,
    emitted_imports: HashSet<ModuleId>,
    reported_types: HashSet<TypeId>,
    current_loc: Option<SourceLoc>,
    needs_fallback_sampler: bool,
}

impl<'a> EmitContext<'a> {
    fn new(
        module: &'a Module,
        layout: &'a ProgramLayout,
        target: &'a TargetDescriptor,
        sink: &'a mut DiagnosticSink,
    ) -> Self {
        Self {
            module,
            layout,
            target,
            sink,
            writer: SourceWriter::new(target.dialect, target.line_directive_mode),
            extensions: ExtensionTracker::new(),
            names: HashMap::new(),
            next_unique_id: 1,
            declared_structs: HashSet::new(),
            emitted_imports: HashSet::new(),
            reported_types: HashSet::new(),
            current_loc: None,
            needs_fallback_sampler: false,
        }
    }

    fn is_glsl(&self) -> bool {
        self.target.dialect == Dialect::Glsl
    }

    fn emit(&mut self, text: &str) {
        self.writer.emit(text);
    }

    /// Attribute following text to `id`'s source location
    fn advance_to_inst(&mut self, id: InstId) {
        let loc = self.module.inst(id).loc.clone();
        if loc.is_some() {
            self.writer.advance_to(loc.as_ref());
            self.current_loc = loc;
        }
    }

    fn error(&mut self, message: impl Into<String>) {
        let loc = self.current_loc.clone();
        self.sink.error(loc.as_ref(), message);
    }

    fn allocate_unique_id(&mut self) -> u32 {
        let id = self.next_unique_id;
        self.next_unique_id += 1;
        id
    }

    /// Stitch the preprocessor prefix onto the emitted code
    fn assemble(self) -> String {
        let mut out = String::new();
        if self.target.dialect == Dialect::Glsl {
            out.push_str(&self.extensions.version_directive());
            out.push_str(&self.extensions.extension_directives());
            if self.needs_fallback_sampler {
                out.push_str(&format!(
                    "layout(set = 0, binding = {}) uniform sampler {};\n",
                    self.layout.hack_sampler_binding, FALLBACK_SAMPLER_NAME
                ));
            }
        }
        out.push_str(&self.writer.finish());
        out
    }
}
