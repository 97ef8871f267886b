//! # Shader Compiler Back End
//!
//! This module turns a type-checked shader IR module into HLSL or GLSL
//! source text for one entry point and target.
//!
//! ## Architecture
//!
//! ```text
//! IR Module → Generics Lowering → Type Legalization → Cleanup → Emission → Source
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use shadegen::compiler::{Compiler, CompileOptions, TargetDescriptor};
//! use shadegen::compiler::ir::ProgramLayout;
//!
//! let options = CompileOptions::for_target(TargetDescriptor::hlsl(51));
//! let result = Compiler::new(options).compile(&mut module, &ProgramLayout::default())?;
//! std::fs::write("shader.hlsl", result.source)?;
//! ```

pub mod dce;
pub mod debug;
pub mod emit;
pub mod generics;
pub mod ir;
pub mod legalize;
pub mod optimizer;
pub mod ssa;
pub mod target;

pub use debug::dump_ir;
pub use emit::emit_module;
pub use generics::{lower_generics, GenericsLoweringStats};
pub use legalize::{legalize_module, LegalizeStats};
pub use optimizer::{CleanupStats, Optimizer};
pub use target::{Dialect, LineDirectiveMode, Stage, TargetCapabilities, TargetDescriptor};

use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::{Error, Result};
use ir::{Module, ProgramLayout};
use serde::{Deserialize, Serialize};

/// Default any-value payload size in bytes
pub const DEFAULT_ANY_VALUE_SIZE: u32 = 16;

/// Compilation options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Output dialect, profile version and directive mode
    pub target: TargetDescriptor,
    /// Aggregate shapes the legalizer may leave in place
    pub capabilities: TargetCapabilities,
    /// Payload size of the any-value type used for generic values
    pub any_value_size: u32,
    /// Log the IR after each stage
    pub dump_ir: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self::for_target(TargetDescriptor::default())
    }
}

impl CompileOptions {
    /// Options for `target` with that dialect's default capabilities
    pub fn for_target(target: TargetDescriptor) -> Self {
        Self {
            capabilities: TargetCapabilities::for_dialect(target.dialect),
            target,
            any_value_size: DEFAULT_ANY_VALUE_SIZE,
            dump_ir: false,
        }
    }

    /// Read options from a JSON document; missing fields take defaults
    pub fn from_json(text: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(text)?;
        if options.any_value_size == 0 || options.any_value_size % 4 != 0 {
            return Err(Error::config(format!(
                "any_value_size must be a nonzero multiple of 4, got {}",
                options.any_value_size
            )));
        }
        Ok(options)
    }
}

/// Compilation result with metadata
#[derive(Debug, Clone)]
pub struct CompileResult {
    /// Generated source text
    pub source: String,
    /// Warnings reported by any stage
    pub warnings: Vec<Diagnostic>,
    /// Generics lowering counters
    pub generics_stats: GenericsLoweringStats,
    /// Type legalization counters
    pub legalize_stats: LegalizeStats,
    /// Final cleanup counters
    pub cleanup_stats: CleanupStats,
}

/// IR to shader source compiler
pub struct Compiler {
    options: CompileOptions,
}

impl Compiler {
    /// Create a new compiler with options
    pub fn new(options: CompileOptions) -> Self {
        Self { options }
    }

    /// Options this compiler was created with
    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// Lower, legalize, clean up and emit `module`.
    ///
    /// The module is rewritten in place. When a stage reports errors, no
    /// later stage runs and the collected diagnostics are returned in
    /// [`Error::CompilationFailed`].
    pub fn compile(&self, module: &mut Module, layout: &ProgramLayout) -> Result<CompileResult> {
        let target = &self.options.target;
        tracing::info!(
            module = %module.name,
            dialect = target.dialect.as_str(),
            version = target.version,
            "compiling"
        );
        let mut sink = DiagnosticSink::new();

        // Phase 1: Generics lowering
        let generics_stats = lower_generics(module, self.options.any_value_size, &mut sink)?;
        self.finish_stage("generics lowering", module, &mut sink)?;

        // Phase 2: Type legalization
        let legalize_stats = legalize_module(module, self.options.capabilities, &mut sink)?;
        self.finish_stage("type legalization", module, &mut sink)?;

        // Phase 3: Cleanup (SSA + DCE)
        let cleanup_stats = Optimizer::new().run(module)?;
        self.finish_stage("cleanup", module, &mut sink)?;

        // Phase 4: Emission
        let source = emit_module(module, layout, target, &mut sink)?;
        self.finish_stage("emission", module, &mut sink)?;

        let warnings = sink
            .into_diagnostics()
            .into_iter()
            .filter(|d| !d.is_error())
            .collect::<Vec<_>>();
        for warning in &warnings {
            tracing::warn!(%warning, "compiled with warning");
        }

        Ok(CompileResult {
            source,
            warnings,
            generics_stats,
            legalize_stats,
            cleanup_stats,
        })
    }

    /// Stop the pipeline if `stage` left errors in the sink
    fn finish_stage(
        &self,
        stage: &'static str,
        module: &Module,
        sink: &mut DiagnosticSink,
    ) -> Result<()> {
        if self.options.dump_ir {
            tracing::debug!(stage, ir = %dump_ir(module), "IR after stage");
        }
        if sink.has_errors() {
            tracing::debug!(stage, errors = sink.error_count(), "stage failed");
            return Err(Error::CompilationFailed {
                stage,
                diagnostics: std::mem::take(sink).into_diagnostics(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compiler_creation() {
        let compiler = Compiler::new(CompileOptions::default());
        assert_eq!(compiler.options().any_value_size, DEFAULT_ANY_VALUE_SIZE);
        assert_eq!(compiler.options().target.dialect, Dialect::Hlsl);
    }

    #[test]
    fn test_options_from_json_fill_defaults() {
        let options = CompileOptions::from_json(
            r#"{ "target": { "dialect": "glsl", "version": 450 }, "dump_ir": true }"#,
        )
        .expect("valid options");
        assert_eq!(options.target.dialect, Dialect::Glsl);
        assert_eq!(options.target.line_directive_mode, LineDirectiveMode::Default);
        assert_eq!(options.any_value_size, DEFAULT_ANY_VALUE_SIZE);
        assert!(options.dump_ir);
    }

    #[test]
    fn test_options_from_json_rejects_bad_input() {
        assert!(matches!(CompileOptions::from_json("{ nope"), Err(Error::Config(_))));
        assert!(matches!(
            CompileOptions::from_json(r#"{ "any_value_size": 6 }"#),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            CompileOptions::from_json(r#"{ "any_value_size": 0 }"#),
            Err(Error::Config(_))
        ));
    }
}
