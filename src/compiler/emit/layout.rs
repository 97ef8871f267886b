//! Resource binding annotations computed from a [`BindingChain`]

use crate::compiler::ir::{BindingChain, ResourceKind};

/// Bytes in one HLSL `c` register
pub const REGISTER_SIZE: u32 = 16;
/// Bytes in one component of a `c` register
pub const COMPONENT_SIZE: u32 = 4;

const COMPONENT_NAMES: [&str; 4] = ["x", "y", "z", "w"];

/// Problem found while spelling a binding
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindingError {
    /// A uniform byte offset that does not start on a register component
    #[error("uniform offset {0} does not fall on a 4-byte register component")]
    MisalignedOffset(u32),
}

/// Split a byte offset into a `c` register index and an optional component
pub fn split_uniform_offset(offset: u32) -> Result<(u32, Option<&'static str>), BindingError> {
    let register = offset / REGISTER_SIZE;
    let within = offset % REGISTER_SIZE;
    if within == 0 {
        return Ok((register, None));
    }
    if within % COMPONENT_SIZE != 0 {
        return Err(BindingError::MisalignedOffset(offset));
    }
    Ok((register, Some(COMPONENT_NAMES[(within / COMPONENT_SIZE) as usize])))
}

/// One HLSL semantic for `kind`, e.g. ` : register(t3, space1)`.
///
/// `uniform_spelling` is `register` for globals and `packoffset` inside a
/// `cbuffer`. Kinds without a register class produce nothing.
pub fn hlsl_register_semantic(
    kind: ResourceKind,
    chain: &BindingChain<'_>,
    uniform_spelling: &str,
) -> Result<Option<String>, BindingError> {
    if chain.layout.resource_info(kind).is_none() {
        return Ok(None);
    }
    let index = chain.offset(kind);
    let space = chain.space(kind);

    let class = match kind {
        ResourceKind::Uniform => {
            let (register, component) = split_uniform_offset(index)?;
            let mut out = format!(" : {}(c{}", uniform_spelling, register);
            if let Some(component) = component {
                out.push('.');
                out.push_str(component);
            }
            out.push(')');
            return Ok(Some(out));
        }
        ResourceKind::ConstantBuffer => "b",
        ResourceKind::ShaderResource => "t",
        ResourceKind::UnorderedAccess => "u",
        ResourceKind::SamplerState => "s",
        _ => return Ok(None),
    };

    let mut out = format!(" : register({}{}", class, index);
    if space != 0 {
        out.push_str(&format!(", space{}", space));
    }
    out.push(')');
    Ok(Some(out))
}

/// Every HLSL semantic of the chain's innermost layout, in record order
pub fn hlsl_register_semantics(
    chain: &BindingChain<'_>,
    uniform_spelling: &str,
) -> Result<String, BindingError> {
    let mut out = String::new();
    for info in &chain.layout.resource_infos {
        if let Some(semantic) = hlsl_register_semantic(info.kind, chain, uniform_spelling)? {
            out.push_str(&semantic);
        }
    }
    Ok(out)
}

/// One GLSL `layout(...)` line for `kind`
pub fn glsl_layout_qualifier(kind: ResourceKind, chain: &BindingChain<'_>) -> Option<String> {
    chain.layout.resource_info(kind)?;
    let index = chain.offset(kind);
    let space = chain.space(kind);

    match kind {
        ResourceKind::VertexInput | ResourceKind::FragmentOutput => {
            Some(format!("layout(location = {})\n", index))
        }
        ResourceKind::SpecializationConstant => Some(format!("layout(constant_id = {})\n", index)),
        ResourceKind::ConstantBuffer
        | ResourceKind::ShaderResource
        | ResourceKind::UnorderedAccess
        | ResourceKind::SamplerState
        | ResourceKind::DescriptorTableSlot => {
            let mut out = format!("layout(binding = {}", index);
            if space != 0 {
                out.push_str(&format!(", set = {}", space));
            }
            out.push_str(")\n");
            Some(out)
        }
        ResourceKind::PushConstantBuffer => Some("layout(push_constant)\n".to_string()),
        // Explicit uniform offsets would need GL_ARB_enhanced_layouts
        ResourceKind::Uniform
        | ResourceKind::RegisterSpace
        | ResourceKind::VaryingInput
        | ResourceKind::VaryingOutput => None,
    }
}

/// Every GLSL layout line of the chain's innermost layout, in record order
pub fn glsl_layout_qualifiers(chain: &BindingChain<'_>) -> String {
    chain
        .layout
        .resource_infos
        .iter()
        .filter_map(|info| glsl_layout_qualifier(info.kind, chain))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::VarLayout;

    #[test]
    fn test_uniform_offset_decomposition() {
        assert_eq!(split_uniform_offset(0), Ok((0, None)));
        assert_eq!(split_uniform_offset(36), Ok((2, Some("y"))));
        assert_eq!(split_uniform_offset(6), Err(BindingError::MisalignedOffset(6)));
    }

    #[test]
    fn test_hlsl_register_with_space() {
        let layout = VarLayout::simple().with_resource(ResourceKind::ShaderResource, 3, 1);
        let chain = BindingChain::new(&layout);
        assert_eq!(
            hlsl_register_semantics(&chain, "register").unwrap(),
            " : register(t3, space1)"
        );
    }

    #[test]
    fn test_packoffset_inside_block() {
        let block = VarLayout::simple().with_resource(ResourceKind::Uniform, 16, 0);
        let field = VarLayout::simple().with_resource(ResourceKind::Uniform, 8, 0);
        let outer = BindingChain::new(&block);
        let chain = outer.push(&field);
        assert_eq!(
            hlsl_register_semantics(&chain, "packoffset").unwrap(),
            " : packoffset(c1.z)"
        );
    }

    #[test]
    fn test_glsl_binding_and_set() {
        let layout = VarLayout::simple()
            .with_resource(ResourceKind::DescriptorTableSlot, 2, 0)
            .with_resource(ResourceKind::RegisterSpace, 1, 0);
        let chain = BindingChain::new(&layout);
        assert_eq!(glsl_layout_qualifiers(&chain), "layout(binding = 2, set = 1)\n");
    }

    #[test]
    fn test_glsl_location_for_fragment_output() {
        let layout = VarLayout::simple().with_resource(ResourceKind::FragmentOutput, 1, 0);
        let chain = BindingChain::new(&layout);
        assert_eq!(glsl_layout_qualifiers(&chain), "layout(location = 1)\n");
    }
}
