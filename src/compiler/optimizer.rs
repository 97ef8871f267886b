//! # Cleanup Pass
//!
//! Runs after generics lowering and legalization:
//! - SSA reconstruction of promotable locals ([`super::ssa`])
//! - Dead code elimination ([`super::dce`])

use super::ir::Module;
use super::{dce, ssa};
use crate::Result;

/// Counters reported by [`Optimizer::run`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CleanupStats {
    /// Local variables promoted to SSA values
    pub promoted_variables: usize,
    /// Instructions and globals deleted
    pub removed_instructions: usize,
}

impl CleanupStats {
    /// Fold another run's counters into this one
    pub fn merge(&mut self, other: CleanupStats) {
        self.promoted_variables += other.promoted_variables;
        self.removed_instructions += other.removed_instructions;
    }
}

/// Cleanup runner
#[derive(Debug, Clone)]
pub struct Optimizer {
    promote_locals: bool,
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Optimizer {
    /// Create a runner performing both SSA reconstruction and DCE
    pub fn new() -> Self {
        Self {
            promote_locals: true,
        }
    }

    /// Skip SSA reconstruction, only removing dead code
    pub fn without_promotion(mut self) -> Self {
        self.promote_locals = false;
        self
    }

    /// Run the cleanup passes over `module`
    pub fn run(&mut self, module: &mut Module) -> Result<CleanupStats> {
        tracing::debug!(module = %module.name, "cleanup");
        let mut stats = CleanupStats::default();

        if self.promote_locals {
            stats.promoted_variables = ssa::construct_ssa(module)?;
        }
        stats.removed_instructions = dce::eliminate_dead_code(module);

        tracing::debug!(
            promoted = stats.promoted_variables,
            removed = stats.removed_instructions,
            "cleanup complete"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::{Builder, Decoration};
    use crate::compiler::target::Stage;

    fn sample_module() -> Module {
        let mut module = Module::new("cleanup");
        let float = module.types.float();
        let mut b = Builder::new(&mut module);
        let (main, params) = b.func_with_body("main", vec![float], float);
        let var = b.var(float);
        b.store(var, params[0]);
        let value = b.load(var);
        b.ret(Some(value));
        module.inst_mut(main).decorate(Decoration::EntryPoint {
            stage: Stage::Fragment,
            name: "main".into(),
        });
        module
    }

    #[test]
    fn test_optimizer_promotes_and_sweeps() {
        let mut module = sample_module();
        let stats = Optimizer::new().run(&mut module).expect("cleanup");
        assert_eq!(stats.promoted_variables, 1);
    }

    #[test]
    fn test_without_promotion_keeps_variables() {
        let mut module = sample_module();
        let stats = Optimizer::new()
            .without_promotion()
            .run(&mut module)
            .expect("cleanup");
        assert_eq!(stats.promoted_variables, 0);
        assert_eq!(stats.removed_instructions, 0);
    }

    #[test]
    fn test_stats_merge() {
        let mut total = CleanupStats::default();
        total.merge(CleanupStats {
            promoted_variables: 2,
            removed_instructions: 5,
        });
        total.merge(CleanupStats {
            promoted_variables: 1,
            removed_instructions: 0,
        });
        assert_eq!(total.promoted_variables, 3);
        assert_eq!(total.removed_instructions, 5);
    }
}
