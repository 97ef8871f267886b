//! Module-scope declarations
//!
//! Output order is fixed: imported preludes, struct declarations, forward
//! declarations of every function, shader parameters and globals,
//! constants, then function bodies. Forward declarations come before any
//! initializer so no dependency sort is needed.

use super::layout::{glsl_layout_qualifiers, hlsl_register_semantic, hlsl_register_semantics};
use super::types::GLSL_STORAGE_BUFFER_VERSION;
use super::{EmitContext, EmitMode};
use crate::compiler::ir::{
    BindingChain, Decoration, InstId, InterpolationMode, MatrixLayoutMode, Op, ResourceAccess,
    ResourceKind, ScalarKind, TextureType, Type, TypeId, TypeLayout, UniformBufferKind, VarLayout,
};
use crate::compiler::target::Stage;
use crate::{Error, Result};
use std::rc::Rc;

/// First HLSL shader model accepting `[shader("stage")]`
const HLSL_SHADER_ATTRIBUTE_MODEL: u32 = 61;

fn semantic_suffix(semantic: Option<(&str, u32)>) -> String {
    match semantic {
        Some((name, 0)) => format!(" : {}", name),
        Some((name, index)) => format!(" : {}{}", name, index),
        None => String::new(),
    }
}

/// Storage qualifier implied by the first resource kind that has one
fn glsl_storage_qualifier(layout: &VarLayout) -> Option<&'static str> {
    layout.resource_infos.iter().find_map(|info| match info.kind {
        ResourceKind::Uniform
        | ResourceKind::ConstantBuffer
        | ResourceKind::ShaderResource
        | ResourceKind::UnorderedAccess
        | ResourceKind::SamplerState
        | ResourceKind::DescriptorTableSlot
        | ResourceKind::PushConstantBuffer => Some("uniform "),
        ResourceKind::VertexInput | ResourceKind::VaryingInput => Some("in "),
        ResourceKind::FragmentOutput | ResourceKind::VaryingOutput => Some("out "),
        ResourceKind::RegisterSpace | ResourceKind::SpecializationConstant => None,
    })
}

impl EmitContext<'_> {
    /// Emit every declaration of the module in output order
    pub(super) fn emit_module_body(&mut self) -> Result<()> {
        let module = self.module;
        if self.is_glsl() {
            self.extensions.require_version(self.target.version);
        }
        self.emit_imports();

        let globals = module.globals();
        for &global in globals {
            let op = &module.inst(global).op;
            if matches!(op, Op::WitnessTable { .. } | Op::RttiObject { .. } | Op::Interface { .. }) {
                return Err(Error::invariant(format!(
                    "{} %{} reached emission",
                    op.mnemonic(),
                    global.0
                )));
            }
        }

        for &global in globals {
            self.declare_used_types(global)?;
        }
        self.emit_forward_declarations()?;
        for &global in globals {
            match module.inst(global).op {
                Op::GlobalParam => self.emit_global_param(global)?,
                Op::GlobalVar => self.emit_global_var(global)?,
                _ => {}
            }
        }
        for &global in globals {
            if module.inst(global).op == Op::GlobalConstant {
                self.emit_global_constant(global)?;
            }
        }
        for &global in globals {
            if module.inst(global).op == Op::Func {
                self.emit_function(global)?;
            }
        }
        Ok(())
    }

    fn emit_imports(&mut self) {
        let module = self.module;
        for import in &module.imports {
            if !self.emitted_imports.insert(import.id) {
                continue;
            }
            tracing::trace!(import = %import.name, "emitting imported prelude");
            self.emit(&format!("// module {}\n", import.name));
            self.emit(&import.prelude);
            if !import.prelude.is_empty() && !import.prelude.ends_with('\n') {
                self.emit("\n");
            }
        }
    }

    /// Declare the structs a global's signature and body mention
    fn declare_used_types(&mut self, global: InstId) -> Result<()> {
        let module = self.module;
        let inst = module.inst(global);
        if inst.op == Op::Func && inst.body.is_empty() {
            return Ok(());
        }
        if let Some(ty) = inst.ty {
            self.ensure_types_declared(ty)?;
        }
        for id in module.func_insts(global) {
            if let Some(ty) = module.inst(id).ty {
                self.ensure_types_declared(ty)?;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Functions
    // =========================================================================

    fn emit_forward_declarations(&mut self) -> Result<()> {
        let module = self.module;
        let mut first = true;
        for &global in module.globals() {
            let inst = module.inst(global);
            if inst.op != Op::Func
                || inst.body.is_empty()
                || inst.entry_point().is_some()
                || inst.generic_params().is_some()
            {
                continue;
            }
            if first {
                self.emit("\n");
                first = false;
            }
            let signature = self.function_signature(global, true)?;
            self.emit(&format!("{};\n", signature));
        }
        Ok(())
    }

    /// `RetT name(params)`; forward declarations name parameters `_0, _1, ...`
    fn function_signature(&mut self, func: InstId, forward: bool) -> Result<String> {
        let module = self.module;
        let inst = module.inst(func);
        let fn_ty = module.type_of(func)?;
        let result = match module.types.func_signature(fn_ty) {
            Some((_, result)) => result,
            None => {
                return Err(Error::invariant(format!(
                    "function %{} does not have a function type",
                    func.0
                )))
            }
        };

        let name = self.name_of(func);
        let ret = self.spell_type(result)?;
        let mut params = Vec::new();
        for (index, &param) in module.func_params(func).iter().enumerate() {
            let param_name = if forward {
                format!("_{}", index)
            } else {
                self.name_of(param)
            };
            let mut text = self.param_declarator(module.type_of(param)?, &param_name)?;
            if !forward && !self.is_glsl() {
                text.push_str(&semantic_suffix(module.inst(param).semantic()));
            }
            params.push(text);
        }

        let mut out = format!("{} {}({}){}", ret.pre, name, params.join(", "), ret.post);
        if !forward && !self.is_glsl() {
            out.push_str(&semantic_suffix(inst.semantic()));
        }
        Ok(out)
    }

    fn emit_function(&mut self, func: InstId) -> Result<()> {
        let module = self.module;
        let inst = module.inst(func);
        let Some(&entry_block) = inst.body.first() else {
            return Ok(());
        };
        tracing::trace!(func = ?inst.name, "emitting function");

        self.advance_to_inst(func);
        self.emit("\n");
        let entry_point = inst.entry_point();
        if let Some((stage, _)) = entry_point {
            self.emit_entry_attributes(func, stage);
        }

        let signature = if self.is_glsl() && entry_point.is_some() {
            self.check_glsl_entry_signature(func)?;
            "void main()".to_string()
        } else {
            self.function_signature(func, false)?
        };
        self.emit(&format!("{}\n{{\n", signature));
        self.writer.indent();

        // Parameters of later blocks are locals assigned by each branch
        for &block in inst.body.iter().skip(1) {
            for &param in &module.block(block).params {
                let name = self.name_of(param);
                let decl = self.declarator(module.type_of(param)?, &name)?;
                self.emit(&format!("{};\n", decl));
            }
        }

        self.emit_region(entry_block, None, None, None)?;
        self.writer.dedent();
        self.emit("}\n");
        Ok(())
    }

    fn check_glsl_entry_signature(&mut self, func: InstId) -> Result<()> {
        let module = self.module;
        let fn_ty = module.type_of(func)?;
        let returns_value = module
            .types
            .func_signature(fn_ty)
            .map_or(false, |(_, result)| !module.types.is_void(result));
        if returns_value || !module.func_params(func).is_empty() {
            let name = module.inst(func).entry_point().map_or("", |(_, name)| name);
            self.error(format!(
                "GLSL entry point `{}` must take no parameters and return void; \
                 its varyings must be global declarations",
                name
            ));
        }
        Ok(())
    }

    fn emit_entry_attributes(&mut self, func: InstId, stage: Stage) {
        let module = self.module;
        let inst = module.inst(func);
        let num_threads = inst.decorations.iter().find_map(|d| match d {
            Decoration::NumThreads(size) => Some(*size),
            _ => None,
        });
        let max_vertices = inst.decorations.iter().find_map(|d| match d {
            Decoration::MaxVertexCount(count) => Some(*count),
            _ => None,
        });

        let glsl = self.is_glsl();
        if !glsl && self.target.version >= HLSL_SHADER_ATTRIBUTE_MODEL {
            self.emit(&format!("[shader(\"{}\")]\n", stage.hlsl_name()));
        }
        match stage {
            Stage::Compute => match num_threads {
                Some([x, y, z]) if glsl => self.emit(&format!(
                    "layout(local_size_x = {}, local_size_y = {}, local_size_z = {}) in;\n",
                    x, y, z
                )),
                Some([x, y, z]) => self.emit(&format!("[numthreads({}, {}, {})]\n", x, y, z)),
                None => {
                    let name = inst.entry_point().map_or("", |(_, name)| name);
                    self.error(format!(
                        "compute entry point `{}` does not declare a thread-group size",
                        name
                    ));
                }
            },
            Stage::Geometry => match max_vertices {
                Some(count) if glsl => self.emit(&format!("layout(max_vertices = {}) out;\n", count)),
                Some(count) => self.emit(&format!("[maxvertexcount({})]\n", count)),
                None => {}
            },
            _ => {}
        }
    }

    // =========================================================================
    // Globals
    // =========================================================================

    fn report_binding_error(&mut self, result: std::result::Result<String, super::BindingError>) -> String {
        match result {
            Ok(text) => text,
            Err(err) => {
                self.error(err.to_string());
                String::new()
            }
        }
    }

    /// Storage-order modifier for a matrix whose layout is not the dialect's
    /// default. GLSL names rows and columns the other way round.
    fn matrix_layout_modifier(&self, layout: &VarLayout) -> &'static str {
        match (self.is_glsl(), layout.type_layout.matrix_mode()) {
            (false, Some(MatrixLayoutMode::RowMajor)) => "row_major ",
            (true, Some(MatrixLayoutMode::RowMajor)) => "layout(column_major)\n",
            (true, Some(MatrixLayoutMode::ColumnMajor)) => "layout(row_major)\n",
            _ => "",
        }
    }

    /// `layout(...)`, interpolation and storage qualifiers for a GLSL global
    fn glsl_var_prefix(
        &mut self,
        id: InstId,
        layout: &VarLayout,
        value_ty: TypeId,
        default_storage: Option<&'static str>,
    ) -> String {
        let module = self.module;
        let mut out = String::from(self.matrix_layout_modifier(layout));
        if let Type::Texture(texture) = module.types.get(value_ty) {
            if let Some(format) = self.glsl_image_format(texture) {
                out.push_str(&format);
            }
        }
        out.push_str(&glsl_layout_qualifiers(&BindingChain::new(layout)));

        let storage = glsl_storage_qualifier(layout).or(default_storage);
        let is_integer = module
            .types
            .scalar_kind(value_ty)
            .map_or(false, ScalarKind::is_integer);
        let fragment = layout.stage == Some(Stage::Fragment);
        let mut flat = match storage {
            Some("in ") => is_integer && fragment,
            Some("out ") => is_integer && layout.stage.is_some() && !fragment,
            _ => false,
        };
        match module.inst(id).interpolation() {
            Some(InterpolationMode::Flat) => flat = true,
            Some(InterpolationMode::NoPerspective) => out.push_str("noperspective "),
            Some(InterpolationMode::Centroid) => out.push_str("centroid "),
            None => {}
        }
        if flat {
            out.push_str("flat ");
        }
        if let Some(storage) = storage {
            out.push_str(storage);
        }
        out
    }

    /// `layout(rgba32f)`-style format line for a writable image
    fn glsl_image_format(&self, texture: &TextureType) -> Option<String> {
        if !matches!(
            texture.access,
            ResourceAccess::ReadWrite | ResourceAccess::RasterOrdered
        ) {
            return None;
        }
        let types = &self.module.types;
        let channels = match types.vector_count(texture.element) {
            Some(1) => "r",
            Some(2) => "rg",
            _ => "rgba",
        };
        let suffix = match types.scalar_kind(texture.element) {
            Some(ScalarKind::Int) => "32i",
            Some(ScalarKind::UInt) => "32ui",
            Some(ScalarKind::Half) => "16f",
            _ => "32f",
        };
        Some(format!("layout({}{})\n", channels, suffix))
    }

    fn emit_global_param(&mut self, param: InstId) -> Result<()> {
        let module = self.module;
        let inst = module.inst(param);
        let ty = module.type_of(param)?;
        self.advance_to_inst(param);

        match module.types.get(ty) {
            Type::UniformBuffer { kind, element } => {
                return self.emit_parameter_group(param, *kind, *element);
            }
            Type::StructuredBuffer { access, element } if self.is_glsl() => {
                return self.emit_glsl_storage_buffer(param, *access, *element);
            }
            _ => {}
        }

        let name = self.name_of(param);
        if self.is_glsl() && name.starts_with("gl_") {
            return Ok(());
        }
        let layout = inst.layout().cloned();
        let mut line = String::new();
        if self.is_glsl() {
            let empty = VarLayout::simple();
            let layout = layout.as_deref().unwrap_or(&empty);
            line.push_str(&self.glsl_var_prefix(param, layout, ty, Some("uniform ")));
            line.push_str(&self.declarator(ty, &name)?);
        } else {
            if let Some(layout) = &layout {
                line.push_str(self.matrix_layout_modifier(layout));
            }
            line.push_str(&self.declarator(ty, &name)?);
            line.push_str(&semantic_suffix(inst.semantic()));
            if let Some(layout) = &layout {
                let registers = hlsl_register_semantics(&BindingChain::new(layout), "register");
                line.push_str(&self.report_binding_error(registers));
            }
        }
        self.emit(&format!("{};\n", line));
        Ok(())
    }

    /// `cbuffer`/`tbuffer` on HLSL, a `uniform`/`buffer` block on GLSL
    fn emit_parameter_group(
        &mut self,
        param: InstId,
        kind: UniformBufferKind,
        element: TypeId,
    ) -> Result<()> {
        let module = self.module;
        let inst = module.inst(param);
        let var_name = self.name_of(param);

        let simple = VarLayout::simple();
        let var_layout: &VarLayout = inst.layout().map_or(&simple, Rc::as_ref);
        let outer = BindingChain::new(var_layout);
        let (container_chain, element_layout) = match var_layout.type_layout.as_ref() {
            TypeLayout::ParameterGroup {
                container,
                element: contents,
            } => (outer.push(container.as_ref()), contents.as_ref()),
            _ => (outer, &simple),
        };
        let element_chain = outer.push(element_layout);

        // (member name, type, field layout)
        let mut members: Vec<(String, TypeId, Option<Rc<VarLayout>>)> = Vec::new();
        let wraps_whole_value = match module.types.get(element) {
            Type::Struct(id) if kind != UniformBufferKind::ParameterBlock => {
                for field in &module.struct_decl(*id).fields {
                    if module.types.is_void(field.ty) {
                        continue;
                    }
                    let field_layout = element_layout.type_layout.field(field.key).cloned();
                    members.push((field.name.clone(), field.ty, field_layout));
                }
                false
            }
            _ => {
                members.push((var_name.clone(), element, None));
                true
            }
        };
        let block_name = if wraps_whole_value {
            format!("_S{}", self.allocate_unique_id())
        } else {
            var_name
        };

        if self.is_glsl() {
            let (packing, storage) = match kind {
                UniformBufferKind::ShaderStorage => {
                    self.extensions.require_version(GLSL_STORAGE_BUFFER_VERSION);
                    ("std430", "buffer")
                }
                _ => ("std140", "uniform"),
            };
            let bindings = glsl_layout_qualifiers(&container_chain);
            self.emit(&format!(
                "\n{}layout({}) {} {}\n{{\n",
                bindings, packing, storage, block_name
            ));
            self.writer.indent();
            for (name, ty, field_layout) in &members {
                let modifier = field_layout
                    .as_deref()
                    .map_or("", |layout| self.matrix_layout_modifier(layout));
                let decl = self.declarator(*ty, name)?;
                self.emit(&format!("{}{};\n", modifier, decl));
            }
            self.writer.dedent();
            self.emit("};\n");
            return Ok(());
        }

        let keyword = match kind {
            UniformBufferKind::ConstantBuffer | UniformBufferKind::ParameterBlock => "cbuffer",
            UniformBufferKind::TextureBuffer => "tbuffer",
            UniformBufferKind::ShaderStorage => {
                self.error(format!(
                    "shader storage block `{}` has no HLSL spelling",
                    block_name
                ));
                return Ok(());
            }
        };
        let registers = hlsl_register_semantics(&container_chain, "register");
        let registers = self.report_binding_error(registers);
        self.emit(&format!("\n{} {}{}\n{{\n", keyword, block_name, registers));
        self.writer.indent();
        for (name, ty, field_layout) in &members {
            let modifier = field_layout
                .as_deref()
                .map_or("", |layout| self.matrix_layout_modifier(layout));
            let decl = self.declarator(*ty, name)?;
            let offset = match field_layout {
                Some(field_layout) => {
                    let chain = element_chain.push(field_layout);
                    match hlsl_register_semantic(ResourceKind::Uniform, &chain, "packoffset") {
                        Ok(offset) => offset.unwrap_or_default(),
                        Err(err) => {
                            self.error(err.to_string());
                            String::new()
                        }
                    }
                }
                None => String::new(),
            };
            self.emit(&format!("{}{}{};\n", modifier, decl, offset));
        }
        self.writer.dedent();
        self.emit("}\n");
        Ok(())
    }

    /// Structured buffers become `buffer` blocks holding a runtime-sized array
    fn emit_glsl_storage_buffer(
        &mut self,
        param: InstId,
        access: ResourceAccess,
        element: TypeId,
    ) -> Result<()> {
        self.extensions.require_version(GLSL_STORAGE_BUFFER_VERSION);
        let module = self.module;
        let name = self.name_of(param);
        let bindings = match module.inst(param).layout() {
            Some(layout) => glsl_layout_qualifiers(&BindingChain::new(layout)),
            None => String::new(),
        };
        let block_name = format!("_S{}", self.allocate_unique_id());
        let readonly = if access == ResourceAccess::Read { "readonly " } else { "" };
        let element = self.spell_type(element)?;

        self.emit(&format!("\n{}layout(std430) buffer {}\n{{\n", bindings, block_name));
        self.writer.indent();
        self.emit(&format!(
            "{}{} {}[]{};\n",
            readonly, element.pre, name, element.post
        ));
        self.writer.dedent();
        self.emit("};\n");
        Ok(())
    }

    fn emit_global_var(&mut self, var: InstId) -> Result<()> {
        let module = self.module;
        let inst = module.inst(var);
        let name = self.name_of(var);
        if self.is_glsl() && name.starts_with("gl_") {
            return Ok(());
        }
        self.advance_to_inst(var);
        let value_ty = module.types.value_type(module.type_of(var)?);

        let initializer = match inst.body.first() {
            Some(&entry) => {
                let init_name = format!("{}_init", name);
                let ret = self.spell_type(value_ty)?;
                self.emit(&format!("\n{} {}(){}\n{{\n", ret.pre, init_name, ret.post));
                self.writer.indent();
                self.emit_region(entry, None, None, None)?;
                self.writer.dedent();
                self.emit("}\n");
                format!(" = {}()", init_name)
            }
            None => String::new(),
        };

        let layout = inst.layout().cloned();
        let mut line = String::new();
        if self.is_glsl() {
            if let Some(layout) = &layout {
                line.push_str(&self.glsl_var_prefix(var, layout, value_ty, None));
            }
            line.push_str(&self.declarator(value_ty, &name)?);
        } else {
            match &layout {
                Some(layout) => line.push_str(self.matrix_layout_modifier(layout)),
                None => line.push_str("static "),
            }
            line.push_str(&self.declarator(value_ty, &name)?);
            line.push_str(&semantic_suffix(inst.semantic()));
            if let Some(layout) = &layout {
                let registers = hlsl_register_semantics(&BindingChain::new(layout), "register");
                line.push_str(&self.report_binding_error(registers));
            }
        }
        line.push_str(&initializer);
        self.emit(&format!("{};\n", line));
        Ok(())
    }

    fn emit_global_constant(&mut self, constant: InstId) -> Result<()> {
        let module = self.module;
        let ty = module.type_of(constant)?;
        self.advance_to_inst(constant);

        let entry = module.entry_block(constant).ok_or_else(|| {
            Error::invariant(format!("global constant %{} has no initializer", constant.0))
        })?;
        let term = module.inst(module.expect_terminator(entry)?);
        let value = match (&term.op, term.operands.first()) {
            (Op::Return, Some(&value)) => value,
            _ => {
                return Err(Error::invariant(format!(
                    "initializer of global constant %{} does not return a value",
                    constant.0
                )))
            }
        };

        let name = self.name_of(constant);
        let value = self.operand(value, EmitMode::GlobalConstant)?;
        let decl = self.declarator(ty, &name)?;
        let keyword = if self.is_glsl() { "const" } else { "static const" };
        self.emit(&format!("{} {} = {};\n", keyword, decl, value));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::emit::emit_module;
    use crate::compiler::ir::{Builder, Module, ProgramLayout};
    use crate::compiler::target::TargetDescriptor;
    use crate::diagnostics::DiagnosticSink;

    fn emit(module: &Module, target: TargetDescriptor) -> (String, DiagnosticSink) {
        let mut sink = DiagnosticSink::new();
        let text = emit_module(module, &ProgramLayout::default(), &target, &mut sink).expect("emit");
        (text, sink)
    }

    fn constant_buffer_module() -> Module {
        let mut module = Module::new("cb");
        let float4 = module.types.vector(ScalarKind::Float, 4);
        let float = module.types.float();
        let params = module.add_struct("Params", &[("tint", float4), ("scale", float)]);
        let params_ty = module.struct_type(params);
        let tint = module.field_key(params, "tint").expect("field");
        let scale = module.field_key(params, "scale").expect("field");
        let cb_ty = module.types.intern(Type::UniformBuffer {
            kind: UniformBufferKind::ConstantBuffer,
            element: params_ty,
        });

        let element = VarLayout::new(TypeLayout::Struct {
            fields: vec![
                (
                    tint,
                    Rc::new(VarLayout::simple().with_resource(ResourceKind::Uniform, 0, 0)),
                ),
                (
                    scale,
                    Rc::new(VarLayout::simple().with_resource(ResourceKind::Uniform, 16, 0)),
                ),
            ],
        });
        let container = VarLayout::simple().with_resource(ResourceKind::ConstantBuffer, 2, 0);
        let layout = VarLayout::new(TypeLayout::ParameterGroup {
            container: Rc::new(container),
            element: Rc::new(element),
        });
        let mut b = Builder::new(&mut module);
        b.global_param("material", cb_ty, Some(layout));
        module
    }

    #[test]
    fn test_hlsl_cbuffer_with_packoffsets() {
        let module = constant_buffer_module();
        let (text, sink) = emit(&module, TargetDescriptor::hlsl(50));
        assert!(!sink.has_errors());
        assert!(text.contains("cbuffer material : register(b2)\n{\n"));
        assert!(text.contains("    float4 tint : packoffset(c0);\n"));
        assert!(text.contains("    float scale : packoffset(c1);\n"));
    }

    #[test]
    fn test_glsl_uniform_block() {
        let module = constant_buffer_module();
        let (text, _) = emit(&module, TargetDescriptor::glsl(450));
        assert!(text.contains("layout(binding = 2)\nlayout(std140) uniform material\n{\n    vec4 tint;\n"));
    }

    /// `cbuffer transforms { row_major float4x4 world; float4x4 view; }`
    /// plus a loose row-major `float4x4 proj`
    fn matrix_layout_module() -> Module {
        let mut module = Module::new("matrices");
        let float4x4 = module.types.matrix(ScalarKind::Float, 4, 4);
        let transforms = module.add_struct("Transforms", &[("world", float4x4), ("view", float4x4)]);
        let transforms_ty = module.struct_type(transforms);
        let world = module.field_key(transforms, "world").expect("field");
        let view = module.field_key(transforms, "view").expect("field");
        let cb_ty = module.types.intern(Type::UniformBuffer {
            kind: UniformBufferKind::ConstantBuffer,
            element: transforms_ty,
        });

        let field = |mode, offset| {
            Rc::new(VarLayout::new(TypeLayout::Matrix { mode }).with_resource(ResourceKind::Uniform, offset, 0))
        };
        let element = VarLayout::new(TypeLayout::Struct {
            fields: vec![
                (world, field(MatrixLayoutMode::RowMajor, 0)),
                (view, field(MatrixLayoutMode::ColumnMajor, 64)),
            ],
        });
        let layout = VarLayout::new(TypeLayout::ParameterGroup {
            container: Rc::new(VarLayout::simple().with_resource(ResourceKind::ConstantBuffer, 0, 0)),
            element: Rc::new(element),
        });
        let proj_layout = VarLayout::new(TypeLayout::Matrix {
            mode: MatrixLayoutMode::RowMajor,
        });

        let mut b = Builder::new(&mut module);
        b.global_param("transforms", cb_ty, Some(layout));
        b.global_param("proj", float4x4, Some(proj_layout));
        module
    }

    #[test]
    fn test_hlsl_row_major_matrices() {
        let module = matrix_layout_module();
        let (text, sink) = emit(&module, TargetDescriptor::hlsl(50));
        assert!(!sink.has_errors(), "{:?}", sink.diagnostics());
        assert!(text.contains("    row_major float4x4 world : packoffset(c0);\n"), "{}", text);
        // column major is the HLSL default and gets no modifier
        assert!(text.contains("    float4x4 view : packoffset(c4);\n"), "{}", text);
        assert!(text.contains("row_major float4x4 proj;\n"), "{}", text);
    }

    #[test]
    fn test_glsl_matrix_layout_names_are_swapped() {
        let module = matrix_layout_module();
        let (text, sink) = emit(&module, TargetDescriptor::glsl(450));
        assert!(!sink.has_errors(), "{:?}", sink.diagnostics());
        assert!(
            text.contains("uniform transforms\n{\n    layout(column_major)\n    mat4x4 world;\n    layout(row_major)\n    mat4x4 view;\n};\n"),
            "{}",
            text
        );
        assert!(text.contains("layout(column_major)\nuniform mat4x4 proj;\n"), "{}", text);
    }

    #[test]
    fn test_structured_buffer_raises_glsl_version() {
        let mut module = Module::new("sb");
        let float = module.types.float();
        let sb_ty = module.types.intern(Type::StructuredBuffer {
            access: ResourceAccess::Read,
            element: float,
        });
        let mut b = Builder::new(&mut module);
        b.global_param("weights", sb_ty, None);
        let (text, _) = emit(&module, TargetDescriptor::glsl(330));
        assert!(text.starts_with("#version 430\n"));
        assert!(text.contains("layout(std430) buffer _S1\n{\n    readonly float weights[];\n};\n"));
    }

    #[test]
    fn test_compute_entry_without_thread_group_size() {
        let mut module = Module::new("cs");
        let void = module.types.void();
        let mut b = Builder::new(&mut module);
        let (main, _) = b.func_with_body("main", vec![], void);
        b.ret(None);
        module.inst_mut(main).decorate(Decoration::EntryPoint {
            stage: Stage::Compute,
            name: "main".into(),
        });
        let (_, sink) = emit(&module, TargetDescriptor::hlsl(50));
        assert_eq!(sink.error_count(), 1);

        module.inst_mut(main).decorate(Decoration::NumThreads([8, 8, 1]));
        let (text, sink) = emit(&module, TargetDescriptor::hlsl(61));
        assert!(!sink.has_errors());
        assert!(text.contains("[shader(\"compute\")]\n[numthreads(8, 8, 1)]\nvoid main()\n"));
    }

    #[test]
    fn test_global_constant_is_one_expression() {
        let mut module = Module::new("k");
        let float = module.types.float();
        let half = module.float_lit(0.5);
        let two = module.float_lit(2.0);
        let mut b = Builder::new(&mut module);
        let constant = b.global_constant("kScale", float);
        let entry = b.block(constant);
        b.set_block(entry);
        let product = b.binary(crate::compiler::ir::BinaryOp::Mul, float, half, two);
        b.ret(Some(product));
        let (text, _) = emit(&module, TargetDescriptor::hlsl(50));
        assert!(text.contains("static const float kScale = (0.5 * 2.0);\n"));
    }

    #[test]
    fn test_forward_declarations_precede_bodies() {
        let mut module = Module::new("fwd");
        let float = module.types.float();
        let mut b = Builder::new(&mut module);
        let (_, params) = b.func_with_body("helper", vec![float], float);
        b.ret(Some(params[0]));
        let (text, _) = emit(&module, TargetDescriptor::hlsl(50));
        let forward = text.find("float helper(float _0);").expect("forward declaration");
        let body = text.find("float helper(float _S1)\n{").expect("definition");
        assert!(forward < body);
    }
}
