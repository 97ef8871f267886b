//! Target description: output dialect, profile version, directive mode and
//! the capability set the type legalizer works against.

use serde::{Deserialize, Serialize};

/// Output source dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// C-like dialect with `register`/semantic syntax
    Hlsl,
    /// GLSL with `layout(...)` qualifiers
    Glsl,
}

impl Dialect {
    /// Lowercase dialect name
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Hlsl => "hlsl",
            Dialect::Glsl => "glsl",
        }
    }
}

/// How `#line` directives are produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineDirectiveMode {
    /// Never emit directives
    None,
    /// Back-end default; IR-based output does not emit directives
    #[default]
    Default,
    /// Always use the `#line N "path"` form
    Standard,
    /// Use the dialect's native form (path on HLSL, source ID on GLSL)
    DialectSpecific,
}

impl LineDirectiveMode {
    /// True if this mode suppresses directives entirely
    pub fn is_suppressed(&self) -> bool {
        matches!(self, LineDirectiveMode::None | LineDirectiveMode::Default)
    }
}

/// Pipeline stage of an entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Vertex shader
    Vertex,
    /// Hull / tessellation control shader
    Hull,
    /// Domain / tessellation evaluation shader
    Domain,
    /// Geometry shader
    Geometry,
    /// Fragment / pixel shader
    Fragment,
    /// Compute shader
    Compute,
}

impl Stage {
    /// Stage name used by HLSL `[shader("...")]` attributes
    pub fn hlsl_name(&self) -> &'static str {
        match self {
            Stage::Vertex => "vertex",
            Stage::Hull => "hull",
            Stage::Domain => "domain",
            Stage::Geometry => "geometry",
            Stage::Fragment => "pixel",
            Stage::Compute => "compute",
        }
    }
}

/// What we are generating code for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetDescriptor {
    /// Output dialect
    pub dialect: Dialect,
    /// Profile version: shader model times ten for HLSL (e.g. 51), `#version` number for GLSL
    pub version: u32,
    /// Directive policy requested by the caller
    pub line_directive_mode: LineDirectiveMode,
}

impl TargetDescriptor {
    /// GLSL target at the given `#version`
    pub fn glsl(version: u32) -> Self {
        Self {
            dialect: Dialect::Glsl,
            version,
            line_directive_mode: LineDirectiveMode::Default,
        }
    }

    /// HLSL target at the given shader model (times ten)
    pub fn hlsl(shader_model: u32) -> Self {
        Self {
            dialect: Dialect::Hlsl,
            version: shader_model,
            line_directive_mode: LineDirectiveMode::Default,
        }
    }

    /// Builder-style directive mode override
    pub fn with_line_directives(mut self, mode: LineDirectiveMode) -> Self {
        self.line_directive_mode = mode;
        self
    }
}

impl Default for TargetDescriptor {
    fn default() -> Self {
        Self::hlsl(50)
    }
}

/// Which aggregate shapes the target can express directly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetCapabilities {
    /// Opaque resource handles may be struct fields
    pub resources_in_structs: bool,
    /// Arrays of opaque resource handles are allowed
    pub arrays_of_resources: bool,
}

impl TargetCapabilities {
    /// Default capability set for a dialect
    pub fn for_dialect(dialect: Dialect) -> Self {
        match dialect {
            Dialect::Hlsl => Self {
                resources_in_structs: true,
                arrays_of_resources: true,
            },
            Dialect::Glsl => Self {
                resources_in_structs: false,
                arrays_of_resources: true,
            },
        }
    }
}

impl Default for TargetCapabilities {
    fn default() -> Self {
        Self::for_dialect(Dialect::Hlsl)
    }
}
