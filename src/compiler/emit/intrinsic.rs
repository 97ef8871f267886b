//! Calls to functions implemented by the target
//!
//! A bodiless function either carries a plain target name (`lerp`, `mix`)
//! or a template string expanded over the call's arguments:
//!
//! | Escape  | Expansion                                                   |
//! |---------|-------------------------------------------------------------|
//! | `$0-$9` | the argument, parenthesized                                 |
//! | `$p`    | combined GLSL sampler built from texture `$0` and sampler `$1`; a comparison sampler selects the `Shadow` form |
//! | `$P`    | combined sampler from `$0` and the fallback texel-fetch sampler |
//! | `$z`    | swizzle narrowing a 4-wide fetch to the texture's element width |
//! | `$N<d>` | component count of argument `d`                             |

use super::types::glsl_type_prefix;
use super::{EmitContext, EmitMode, FALLBACK_SAMPLER_NAME};
use crate::compiler::ir::{Decoration, InstId, Op, TextureShape, TextureType, Type};
use crate::{Error, Result};

const SWIZZLE_WIDTHS: [&str; 4] = ["", ".x", ".xy", ".xyz"];

/// True when `definition` names a function rather than a template
fn is_plain_name(definition: &str) -> bool {
    !definition.is_empty()
        && definition
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn malformed(definition: &str, detail: &str) -> Error {
    Error::invariant(format!(
        "malformed intrinsic template `{}`: {}",
        definition, detail
    ))
}

impl EmitContext<'_> {
    /// Follow `Specialize` wrappers down to the function being called
    pub(super) fn resolve_callee(&self, callee: InstId) -> InstId {
        let mut current = callee;
        loop {
            let inst = self.module.inst(current);
            match (&inst.op, inst.operands.first()) {
                (Op::Specialize, Some(&inner)) => current = inner,
                _ => return current,
            }
        }
    }

    /// Expression for a call to the bodiless function `func`
    pub(super) fn intrinsic_call(
        &mut self,
        func: InstId,
        args: &[InstId],
        mode: EmitMode,
    ) -> Result<String> {
        let module = self.module;
        let inst = module.inst(func);
        if self.is_glsl() {
            for decoration in &inst.decorations {
                match decoration {
                    Decoration::RequireGlslExtension(name) => self.extensions.require_extension(name),
                    Decoration::RequireGlslVersion(version) => {
                        self.extensions.require_version(*version)
                    }
                    _ => {}
                }
            }
        }

        let definition = inst.target_intrinsic(self.target.dialect).map(str::to_string);
        match definition {
            Some(name) if is_plain_name(&name) => self.plain_call(&name, args, mode),
            Some(template) => {
                let expanded = self.expand_template(&template, args, mode)?;
                Ok(format!("({})", expanded))
            }
            None => {
                let name = self.name_of(func);
                self.plain_call(&name, args, mode)
            }
        }
    }

    fn plain_call(&mut self, name: &str, args: &[InstId], mode: EmitMode) -> Result<String> {
        let mut parts = Vec::with_capacity(args.len());
        for &arg in args {
            parts.push(self.operand(arg, mode)?);
        }
        Ok(format!("{}({})", name, parts.join(", ")))
    }

    fn template_arg(&self, template: &str, args: &[InstId], index: usize) -> Result<InstId> {
        args.get(index).copied().ok_or_else(|| {
            malformed(
                template,
                &format!("argument {} out of range for {} argument(s)", index, args.len()),
            )
        })
    }

    fn expand_template(&mut self, template: &str, args: &[InstId], mode: EmitMode) -> Result<String> {
        let mut out = String::new();
        let mut chars = template.chars();
        while let Some(c) = chars.next() {
            if c != '$' {
                out.push(c);
                continue;
            }
            let escape = chars
                .next()
                .ok_or_else(|| malformed(template, "trailing `$`"))?;
            match escape {
                '0'..='9' => {
                    let index = escape as usize - '0' as usize;
                    let arg = self.template_arg(template, args, index)?;
                    out.push_str(&format!("({})", self.operand(arg, mode)?));
                }
                'p' => {
                    let texture = self.template_arg(template, args, 0)?;
                    let sampler = self.template_arg(template, args, 1)?;
                    let shadow = self.is_comparison_sampler(sampler)?;
                    let sampler_text = self.operand(sampler, mode)?;
                    out.push_str(&self.combined_sampler(
                        template,
                        texture,
                        &sampler_text,
                        Some(shadow),
                        mode,
                    )?);
                }
                'P' => {
                    let texture = self.template_arg(template, args, 0)?;
                    self.needs_fallback_sampler = true;
                    out.push_str(&self.combined_sampler(
                        template,
                        texture,
                        FALLBACK_SAMPLER_NAME,
                        None,
                        mode,
                    )?);
                }
                'z' => {
                    let texture = self.template_arg(template, args, 0)?;
                    let texture = self.texture_of(template, texture)?;
                    let types = &self.module.types;
                    let swizzle = match types.get(texture.element) {
                        Type::Scalar(_) => ".x",
                        Type::Vector { count, .. } => {
                            SWIZZLE_WIDTHS.get(*count as usize).copied().unwrap_or("")
                        }
                        _ => "",
                    };
                    out.push_str(swizzle);
                }
                'N' => {
                    let digit = chars
                        .next()
                        .and_then(|d| d.to_digit(10))
                        .ok_or_else(|| malformed(template, "`$N` needs an argument digit"))?;
                    let arg = self.template_arg(template, args, digit as usize)?;
                    let ty = self.module.type_of(arg)?;
                    let ty = self.module.types.value_type(ty);
                    let count = match self.module.types.get(ty) {
                        Type::Scalar(_) => 1,
                        Type::Vector { count, .. } => *count,
                        _ => return Err(malformed(template, "`$N` applied to a non-vector")),
                    };
                    out.push_str(&count.to_string());
                }
                other => {
                    return Err(malformed(template, &format!("unknown escape `${}`", other)));
                }
            }
        }
        Ok(out)
    }

    fn texture_of(&self, template: &str, arg: InstId) -> Result<TextureType> {
        let ty = self.module.type_of(arg)?;
        let ty = self.module.types.value_type(ty);
        match self.module.types.get(ty) {
            Type::Texture(texture) => Ok(*texture),
            _ => Err(malformed(template, "first argument is not a texture")),
        }
    }

    fn is_comparison_sampler(&self, arg: InstId) -> Result<bool> {
        let ty = self.module.type_of(arg)?;
        let ty = self.module.types.value_type(ty);
        Ok(matches!(
            self.module.types.get(ty),
            Type::Sampler { comparison: true }
        ))
    }

    /// `sampler2D(tex, samp)`-style combined sampler constructor
    ///
    /// `shadow` comes from the sampler argument when there is one; otherwise
    /// the texture's own shadow flag decides.
    fn combined_sampler(
        &mut self,
        template: &str,
        texture: InstId,
        sampler: &str,
        shadow: Option<bool>,
        mode: EmitMode,
    ) -> Result<String> {
        if !self.is_glsl() {
            return Err(malformed(template, "combined samplers only exist in GLSL"));
        }
        let texture_type = self.texture_of(template, texture)?;
        let texture_text = self.operand(texture, mode)?;
        let shadow = shadow.unwrap_or(texture_type.shadow);
        let prefix = self
            .module
            .types
            .scalar_kind(texture_type.element)
            .map(glsl_type_prefix)
            .unwrap_or("");
        let shape = match texture_type.shape {
            TextureShape::Texture1D => "1D",
            TextureShape::Texture2D => "2D",
            TextureShape::Texture3D => "3D",
            TextureShape::TextureCube => "Cube",
            TextureShape::TextureBuffer => "Buffer",
        };
        Ok(format!(
            "{}sampler{}{}{}{}({}, {})",
            prefix,
            shape,
            if texture_type.multisample { "MS" } else { "" },
            if texture_type.array { "Array" } else { "" },
            if shadow { "Shadow" } else { "" },
            texture_text,
            sampler
        ))
    }
}
