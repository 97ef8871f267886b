//! Property-based tests for the emission helpers
//!
//! These tests use proptest to generate random inputs and verify that:
//! 1. The required GLSL version is the maximum ever requested
//! 2. Line directives appear exactly when padding cannot close the gap
//! 3. Binding offsets along a chain are the sum of every level

use proptest::prelude::*;
use shadegen::compiler::emit::{
    split_uniform_offset, ExtensionTracker, SourceWriter, KNOWN_GLSL_VERSIONS, MAX_LINE_PADDING,
};
use shadegen::compiler::ir::{BindingChain, ResourceKind, VarLayout};
use shadegen::compiler::{Dialect, LineDirectiveMode};
use shadegen::SourceLoc;

// =============================================================================
// STRATEGY GENERATORS
// =============================================================================

fn known_version() -> impl Strategy<Value = u32> {
    prop::sample::select(KNOWN_GLSL_VERSIONS.to_vec())
}

fn binding_kind() -> impl Strategy<Value = ResourceKind> {
    prop_oneof![
        Just(ResourceKind::ConstantBuffer),
        Just(ResourceKind::ShaderResource),
        Just(ResourceKind::UnorderedAccess),
        Just(ResourceKind::SamplerState),
    ]
}

// =============================================================================
// VERSION TRACKING
// =============================================================================

proptest! {
    #[test]
    fn prop_version_is_maximum_requested(versions in prop::collection::vec(known_version(), 1..20)) {
        let mut tracker = ExtensionTracker::new();
        for &version in &versions {
            tracker.require_version(version);
        }
        let max = versions.iter().copied().max().unwrap_or_default();
        prop_assert_eq!(tracker.version(), max.max(ExtensionTracker::new().version()));
    }

    #[test]
    fn prop_extensions_deduplicated(names in prop::collection::vec("GL_EXT_[a-c]", 0..30)) {
        let mut tracker = ExtensionTracker::new();
        for name in &names {
            tracker.require_extension(name);
        }
        let mut expected: Vec<String> = Vec::new();
        for name in names {
            if !expected.contains(&name) {
                expected.push(name);
            }
        }
        prop_assert_eq!(tracker.extensions(), expected.as_slice());
    }
}

// =============================================================================
// LINE DIRECTIVES
// =============================================================================

proptest! {
    #[test]
    fn prop_forward_gap_directive_threshold(start in 1u32..1000, gap in 1u32..10) {
        let mut w = SourceWriter::new(Dialect::Hlsl, LineDirectiveMode::Standard);
        w.advance_to(Some(&SourceLoc::new("a.slang", start, 1)));
        w.emit("a;\n");
        w.advance_to(Some(&SourceLoc::new("a.slang", start + 1 + gap, 1)));
        w.emit("b;\n");

        let expected = if gap <= MAX_LINE_PADDING { 1 } else { 2 };
        prop_assert_eq!(w.directives_emitted(), expected);
    }

    #[test]
    fn prop_backwards_jump_always_emits_directive(start in 2u32..1000, back in 1u32..1000) {
        let target = start.saturating_sub(back).max(1);
        let mut w = SourceWriter::new(Dialect::Glsl, LineDirectiveMode::Standard);
        w.advance_to(Some(&SourceLoc::new("a.slang", start, 1)));
        w.emit("a;\n");
        w.advance_to(Some(&SourceLoc::new("a.slang", target, 1)));
        w.emit("b;\n");
        prop_assert_eq!(w.directives_emitted(), 2);
    }

    #[test]
    fn prop_suppressed_modes_never_emit(lines in prop::collection::vec(1u32..500, 1..20)) {
        for mode in [LineDirectiveMode::None, LineDirectiveMode::Default] {
            let mut w = SourceWriter::new(Dialect::Hlsl, mode);
            for &line in &lines {
                w.advance_to(Some(&SourceLoc::new("a.slang", line, 1)));
                w.emit("x;\n");
            }
            prop_assert_eq!(w.directives_emitted(), 0);
            prop_assert!(!w.text().contains("#line"));
        }
    }
}

// =============================================================================
// BINDINGS
// =============================================================================

proptest! {
    #[test]
    fn prop_chain_offset_is_sum_of_levels(
        kind in binding_kind(),
        outer in 0u32..64,
        middle in 0u32..64,
        inner in 0u32..64,
    ) {
        let outer_layout = VarLayout::simple().with_resource(kind, outer, 0);
        let middle_layout = VarLayout::simple().with_resource(kind, middle, 0);
        let inner_layout = VarLayout::simple().with_resource(kind, inner, 0);

        let root = BindingChain::new(&outer_layout);
        let mid = root.push(&middle_layout);
        let leaf = mid.push(&inner_layout);
        prop_assert_eq!(leaf.offset(kind), outer + middle + inner);
        prop_assert_eq!(leaf.flatten().resource_info(kind).map(|i| i.index), Some(outer + middle + inner));
    }

    #[test]
    fn prop_aligned_uniform_offsets_split(register in 0u32..256, component in 0u32..4) {
        let offset = register * 16 + component * 4;
        let (index, swizzle) = split_uniform_offset(offset).expect("aligned");
        prop_assert_eq!(index, register);
        prop_assert_eq!(swizzle.is_some(), component != 0);
    }

    #[test]
    fn prop_misaligned_uniform_offsets_rejected(offset in 0u32..4096) {
        prop_assume!(offset % 4 != 0);
        prop_assert!(split_uniform_offset(offset).is_err());
    }
}
