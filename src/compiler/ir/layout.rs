//! Resource layout records computed upstream and attached to shader
//! parameters, plus the binding chain used to sum them.

use super::types::FieldKey;
use crate::compiler::target::Stage;
use serde::{Deserialize, Serialize};
use std::rc::Rc;

/// Register class a layout consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    /// Bytes of ordinary uniform data
    Uniform,
    /// Constant buffer slot (`b`)
    ConstantBuffer,
    /// Shader resource slot (`t`)
    ShaderResource,
    /// Unordered access slot (`u`)
    UnorderedAccess,
    /// Sampler slot (`s`)
    SamplerState,
    /// Whole register space / descriptor set
    RegisterSpace,
    /// Vulkan descriptor table slot
    DescriptorTableSlot,
    /// Vertex input location
    VertexInput,
    /// Fragment output location
    FragmentOutput,
    /// Other varying input
    VaryingInput,
    /// Other varying output
    VaryingOutput,
    /// Specialization constant id
    SpecializationConstant,
    /// Push-constant block
    PushConstantBuffer,
}

/// Offset consumed for one resource kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceInfo {
    /// Register class
    pub kind: ResourceKind,
    /// Register index, or byte offset for [`ResourceKind::Uniform`]
    pub index: u32,
    /// Register space
    pub space: u32,
}

/// Storage order of a matrix, named from the row/column convention of
/// the IR (the reverse of GLSL's naming)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatrixLayoutMode {
    /// Each row is contiguous
    RowMajor,
    /// Each column is contiguous
    ColumnMajor,
}

/// Layout of a type
#[derive(Debug, Clone)]
pub enum TypeLayout {
    /// Leaf type with no nested layout
    Simple,
    /// Per-field layouts of a struct
    Struct {
        /// Field layouts keyed by field identity
        fields: Vec<(FieldKey, Rc<VarLayout>)>,
    },
    /// Uniform-buffer-like container
    ParameterGroup {
        /// Binding of the block itself
        container: Rc<VarLayout>,
        /// Offsets of the data inside the block
        element: Rc<VarLayout>,
    },
    /// Matrix with an explicit storage order
    Matrix {
        /// Row or column major
        mode: MatrixLayoutMode,
    },
    /// Array of a laid-out element
    Array {
        /// Element layout
        element: Rc<TypeLayout>,
    },
}

impl TypeLayout {
    /// Layout of a struct field
    pub fn field(&self, key: FieldKey) -> Option<&Rc<VarLayout>> {
        match self {
            TypeLayout::Struct { fields } => {
                fields.iter().find(|(k, _)| *k == key).map(|(_, layout)| layout)
            }
            _ => None,
        }
    }

    /// Storage order, when this is a matrix layout
    pub fn matrix_mode(&self) -> Option<MatrixLayoutMode> {
        match self {
            TypeLayout::Matrix { mode } => Some(*mode),
            _ => None,
        }
    }
}

/// Layout of one variable
#[derive(Debug, Clone)]
pub struct VarLayout {
    /// Offsets per resource kind
    pub resource_infos: Vec<ResourceInfo>,
    /// Layout of the variable's type
    pub type_layout: Rc<TypeLayout>,
    /// Stage the variable belongs to, for varyings
    pub stage: Option<Stage>,
}

impl VarLayout {
    /// Layout with no resource usage
    pub fn new(type_layout: TypeLayout) -> Self {
        Self {
            resource_infos: Vec::new(),
            type_layout: Rc::new(type_layout),
            stage: None,
        }
    }

    /// Leaf layout with no nested type layout
    pub fn simple() -> Self {
        Self::new(TypeLayout::Simple)
    }

    /// Builder-style: add a resource usage
    pub fn with_resource(mut self, kind: ResourceKind, index: u32, space: u32) -> Self {
        self.resource_infos.push(ResourceInfo { kind, index, space });
        self
    }

    /// Usage for `kind`, if any
    pub fn resource_info(&self, kind: ResourceKind) -> Option<&ResourceInfo> {
        self.resource_infos.iter().find(|info| info.kind == kind)
    }
}

/// Whole-program layout facts the emitter needs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgramLayout {
    /// Binding reserved for the texel-fetch fallback sampler
    pub hack_sampler_binding: u32,
}

/// Nested layout records from the outermost variable down to a leaf.
///
/// Register indices and spaces are summed over every level of the chain.
#[derive(Debug, Clone, Copy)]
pub struct BindingChain<'a> {
    /// Layout at this level
    pub layout: &'a VarLayout,
    /// Enclosing level
    pub parent: Option<&'a BindingChain<'a>>,
}

impl<'a> BindingChain<'a> {
    /// Chain with a single level
    pub fn new(layout: &'a VarLayout) -> Self {
        Self {
            layout,
            parent: None,
        }
    }

    /// Chain one level deeper
    pub fn push<'b>(&'b self, layout: &'b VarLayout) -> BindingChain<'b> {
        BindingChain {
            layout,
            parent: Some(self),
        }
    }

    fn levels(&self) -> impl Iterator<Item = &'a VarLayout> + '_ {
        std::iter::successors(Some(self), |level| level.parent).map(|level| level.layout)
    }

    /// Summed register index for `kind`
    pub fn offset(&self, kind: ResourceKind) -> u32 {
        self.levels()
            .filter_map(|layout| layout.resource_info(kind))
            .map(|info| info.index)
            .sum()
    }

    /// Summed register space for `kind`, including enclosing register spaces
    pub fn space(&self, kind: ResourceKind) -> u32 {
        self.levels()
            .map(|layout| {
                let own = layout.resource_info(kind).map_or(0, |info| info.space);
                let nested = layout
                    .resource_info(ResourceKind::RegisterSpace)
                    .map_or(0, |info| info.index);
                own + nested
            })
            .sum()
    }

    /// Collapse the chain into one layout whose offsets are already summed
    pub fn flatten(&self) -> VarLayout {
        let leaf = self.layout;
        let resource_infos = leaf
            .resource_infos
            .iter()
            .map(|info| ResourceInfo {
                kind: info.kind,
                index: self.offset(info.kind),
                space: self.space(info.kind),
            })
            .collect();
        VarLayout {
            resource_infos,
            type_layout: leaf.type_layout.clone(),
            stage: leaf.stage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_sums_index_and_space() {
        let block = VarLayout::simple()
            .with_resource(ResourceKind::ShaderResource, 2, 1)
            .with_resource(ResourceKind::RegisterSpace, 3, 0);
        let field = VarLayout::simple().with_resource(ResourceKind::ShaderResource, 5, 0);

        let outer = BindingChain::new(&block);
        let inner = outer.push(&field);

        assert_eq!(inner.offset(ResourceKind::ShaderResource), 7);
        assert_eq!(inner.space(ResourceKind::ShaderResource), 4);
        assert_eq!(inner.offset(ResourceKind::SamplerState), 0);
    }

    #[test]
    fn test_flatten_keeps_leaf_kinds() {
        let outer = VarLayout::simple().with_resource(ResourceKind::Uniform, 32, 0);
        let leaf = VarLayout::simple().with_resource(ResourceKind::Uniform, 8, 0);
        let chain = BindingChain::new(&outer);
        let flat = chain.push(&leaf).flatten();
        assert_eq!(flat.resource_infos.len(), 1);
        assert_eq!(flat.resource_infos[0].index, 40);
    }
}
