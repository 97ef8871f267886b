//! Legal type trees and the memoized type classifier

use crate::compiler::ir::{FieldKey, Module, PtrKind, StructDecl, StructField, Type, TypeId};
use crate::compiler::target::TargetCapabilities;
use std::collections::HashMap;
use std::rc::Rc;

/// Legalized stand-in for an IR type
///
/// Composite variants are reference counted; the classifier hands out the
/// same tree every time it is asked about the same type.
#[derive(Debug, Clone)]
pub enum LegalType {
    /// No storage at all
    None,
    /// The IR type itself, possibly with rewritten children
    Simple(TypeId),
    /// A pointer-like wrapper collapsed away
    ImplicitDeref(Rc<LegalType>),
    /// Independent named parts replacing an aggregate
    Tuple(Rc<TupleType>),
    /// Ordinary aggregate plus special parts
    Pair(Rc<PairType>),
    /// Uniform buffer of the ordinary part, plus the split-off special parts
    WrappedBuffer(Rc<WrappedBufferType>),
}

/// One named part of a tuple
#[derive(Debug, Clone)]
pub struct TupleElement {
    /// Originating field
    pub key: FieldKey,
    /// Field name, used to name split declarations
    pub name: String,
    /// Legalized part type
    pub ty: LegalType,
}

/// Ordered tuple of parts
#[derive(Debug, Clone)]
pub struct TupleType {
    /// Parts in field declaration order
    pub elements: Vec<TupleElement>,
}

impl TupleType {
    /// Part for a field
    pub fn element(&self, key: FieldKey) -> Option<&TupleElement> {
        self.elements.iter().find(|e| e.key == key)
    }
}

/// Which side of a pair a field landed on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairSide {
    /// Kept in the ordinary aggregate
    Ordinary,
    /// Moved into the special tuple
    Special,
    /// Itself split: ordinary part stays, special part moves
    Both,
}

/// Per-field record of a pair split
#[derive(Debug, Clone)]
pub struct PairElement {
    /// Originating field
    pub key: FieldKey,
    /// Side the field landed on
    pub side: PairSide,
    /// Legalized field type
    pub ty: LegalType,
    /// Split of the field itself when `side` is [`PairSide::Both`]
    pub field_info: Option<Rc<PairInfo>>,
}

/// Field-by-field record of a pair split, mirroring the original aggregate
#[derive(Debug, Clone)]
pub struct PairInfo {
    /// One entry per original field
    pub elements: Vec<PairElement>,
}

impl PairInfo {
    /// Entry for a field
    pub fn element(&self, key: FieldKey) -> Option<&PairElement> {
        self.elements.iter().find(|e| e.key == key)
    }
}

/// Aggregate split into an ordinary and a special side
#[derive(Debug, Clone)]
pub struct PairType {
    /// Aggregate of the ordinary fields; always [`LegalType::Simple`]
    pub ordinary: LegalType,
    /// Tuple of the special fields
    pub special: LegalType,
    /// Which field went where
    pub info: Rc<PairInfo>,
}

/// Uniform buffer whose element was split
#[derive(Debug, Clone)]
pub struct WrappedBufferType {
    /// Buffer over the ordinary part of the element
    pub buffer: TypeId,
    /// Legalized element; a [`LegalType::Pair`]
    pub element: LegalType,
}

impl LegalType {
    /// True when the type needs no splitting
    pub fn is_simple(&self) -> bool {
        matches!(self, LegalType::Simple(_))
    }

    /// The IR type of a simple legal type
    pub fn as_simple(&self) -> Option<TypeId> {
        match self {
            LegalType::Simple(ty) => Some(*ty),
            _ => None,
        }
    }

    /// Identity comparison: simple types by id, composite trees by pointer
    pub fn same_as(&self, other: &LegalType) -> bool {
        match (self, other) {
            (LegalType::None, LegalType::None) => true,
            (LegalType::Simple(a), LegalType::Simple(b)) => a == b,
            (LegalType::ImplicitDeref(a), LegalType::ImplicitDeref(b)) => Rc::ptr_eq(a, b),
            (LegalType::Tuple(a), LegalType::Tuple(b)) => Rc::ptr_eq(a, b),
            (LegalType::Pair(a), LegalType::Pair(b)) => Rc::ptr_eq(a, b),
            (LegalType::WrappedBuffer(a), LegalType::WrappedBuffer(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Physical leaf types with their field paths, ordinary side first
    pub fn leaf_types(&self) -> Vec<(Vec<FieldKey>, TypeId)> {
        let mut out = Vec::new();
        self.collect_leaves(&mut Vec::new(), &mut out);
        out
    }

    fn collect_leaves(&self, path: &mut Vec<FieldKey>, out: &mut Vec<(Vec<FieldKey>, TypeId)>) {
        match self {
            LegalType::None => {}
            LegalType::Simple(ty) => out.push((path.clone(), *ty)),
            LegalType::ImplicitDeref(inner) => inner.collect_leaves(path, out),
            LegalType::Tuple(tuple) => {
                for element in &tuple.elements {
                    path.push(element.key);
                    element.ty.collect_leaves(path, out);
                    path.pop();
                }
            }
            LegalType::Pair(pair) => {
                pair.ordinary.collect_leaves(path, out);
                pair.special.collect_leaves(path, out);
            }
            LegalType::WrappedBuffer(wrapped) => {
                out.push((path.clone(), wrapped.buffer));
                if let LegalType::Pair(pair) = &wrapped.element {
                    pair.special.collect_leaves(path, out);
                }
            }
        }
    }
}

/// Memoized classifier from IR types to legal types
#[derive(Debug)]
pub struct TypeLegalizer {
    caps: TargetCapabilities,
    memo: HashMap<TypeId, LegalType>,
    problems: Vec<String>,
}

impl TypeLegalizer {
    /// Create a classifier for a target
    pub fn new(caps: TargetCapabilities) -> Self {
        Self {
            caps,
            memo: HashMap::new(),
            problems: Vec::new(),
        }
    }

    /// Number of types that legalized to something other than themselves
    pub fn split_count(&self) -> usize {
        self.memo
            .iter()
            .filter(|(ty, legal)| legal.as_simple() != Some(**ty))
            .count()
    }

    /// Problems found since the last call, as diagnostic messages
    pub fn take_problems(&mut self) -> Vec<String> {
        std::mem::take(&mut self.problems)
    }

    /// True for fields that cannot stay inside an ordinary aggregate
    pub fn is_special(&self, module: &Module, ty: TypeId) -> bool {
        match module.types.get(ty) {
            Type::Texture(_) | Type::Sampler { .. } | Type::StructuredBuffer { .. } => {
                !self.caps.resources_in_structs
            }
            Type::UniformBuffer { .. } => true,
            Type::Array { element, .. } => self.is_special(module, *element),
            _ => false,
        }
    }

    /// Legal type for `ty`, computed once per type
    pub fn legalize(&mut self, module: &mut Module, ty: TypeId) -> LegalType {
        if let Some(done) = self.memo.get(&ty) {
            return done.clone();
        }
        let legal = self.classify(module, ty);
        self.memo.insert(ty, legal.clone());
        legal
    }

    fn classify(&mut self, module: &mut Module, ty: TypeId) -> LegalType {
        match module.types.get(ty).clone() {
            Type::Void => LegalType::None,
            Type::Struct(id) => self.legalize_struct(module, ty, id),
            Type::Array { element, count } => {
                if !self.caps.arrays_of_resources && module.types.is_resource(element) {
                    self.problems.push(format!(
                        "arrays of `{}` are not supported on this target",
                        crate::compiler::debug::format_type(module, element)
                    ));
                    return LegalType::Simple(ty);
                }
                match self.legalize(module, element) {
                    LegalType::Simple(e) if e == element => LegalType::Simple(ty),
                    LegalType::Simple(e) => LegalType::Simple(module.types.array(e, count)),
                    _ => {
                        self.problems.push(format!(
                            "array of `{}` cannot be legalized: its elements hold resources",
                            crate::compiler::debug::format_type(module, element)
                        ));
                        LegalType::Simple(ty)
                    }
                }
            }
            Type::Ptr { kind, pointee } => {
                let inner = self.legalize(module, pointee);
                map_ptr(module, kind, &inner)
            }
            Type::UniformBuffer { kind, element } => match self.legalize(module, element) {
                LegalType::Simple(e) if e == element => LegalType::Simple(ty),
                LegalType::Simple(e) => {
                    LegalType::Simple(module.types.intern(Type::UniformBuffer { kind, element: e }))
                }
                LegalType::Pair(pair) => match pair.ordinary.as_simple() {
                    Some(ordinary) => {
                        let buffer = module.types.intern(Type::UniformBuffer {
                            kind,
                            element: ordinary,
                        });
                        LegalType::WrappedBuffer(Rc::new(WrappedBufferType {
                            buffer,
                            element: LegalType::Pair(pair),
                        }))
                    }
                    None => LegalType::ImplicitDeref(Rc::new(LegalType::Pair(pair))),
                },
                other => LegalType::ImplicitDeref(Rc::new(other)),
            },
            Type::StructuredBuffer { access, element } => match self.legalize(module, element) {
                LegalType::Simple(e) if e == element => LegalType::Simple(ty),
                LegalType::Simple(e) => {
                    LegalType::Simple(module.types.intern(Type::StructuredBuffer { access, element: e }))
                }
                _ => {
                    self.problems.push(format!(
                        "structured buffer elements of type `{}` cannot hold resources",
                        crate::compiler::debug::format_type(module, element)
                    ));
                    LegalType::Simple(ty)
                }
            },
            _ => LegalType::Simple(ty),
        }
    }

    fn legalize_struct(
        &mut self,
        module: &mut Module,
        ty: TypeId,
        id: crate::compiler::ir::StructId,
    ) -> LegalType {
        let decl = module.struct_decl(id).clone();
        if decl.builtin {
            return LegalType::Simple(ty);
        }

        let mut elements = Vec::with_capacity(decl.fields.len());
        for field in &decl.fields {
            let legal = self.legalize(module, field.ty);
            let side = if self.is_special(module, field.ty) {
                PairSide::Special
            } else {
                match &legal {
                    LegalType::Simple(_) | LegalType::None => PairSide::Ordinary,
                    LegalType::Pair(_) => PairSide::Both,
                    _ => PairSide::Special,
                }
            };
            let field_info = match (&legal, side) {
                (LegalType::Pair(pair), PairSide::Both) => Some(pair.info.clone()),
                _ => None,
            };
            elements.push(PairElement {
                key: field.key,
                side,
                ty: legal,
                field_info,
            });
        }

        let any_ordinary = elements
            .iter()
            .any(|e| matches!(e.side, PairSide::Ordinary | PairSide::Both));
        let all_ordinary = elements.iter().all(|e| e.side == PairSide::Ordinary);

        if all_ordinary {
            let unchanged = decl
                .fields
                .iter()
                .zip(&elements)
                .all(|(f, e)| e.ty.as_simple().map_or(true, |t| t == f.ty));
            if unchanged {
                return LegalType::Simple(ty);
            }
            let fields = decl
                .fields
                .iter()
                .zip(&elements)
                .map(|(f, e)| StructField {
                    key: f.key,
                    name: f.name.clone(),
                    ty: e.ty.as_simple().unwrap_or(f.ty),
                })
                .collect();
            return LegalType::Simple(rebuilt_struct(module, &decl, fields));
        }

        let special = LegalType::Tuple(Rc::new(TupleType {
            elements: decl
                .fields
                .iter()
                .zip(&elements)
                .filter_map(|(f, e)| {
                    let part = match (&e.ty, e.side) {
                        (_, PairSide::Ordinary) => return None,
                        (LegalType::Pair(pair), PairSide::Both) => pair.special.clone(),
                        (legal, _) => legal.clone(),
                    };
                    Some(TupleElement {
                        key: f.key,
                        name: f.name.clone(),
                        ty: part,
                    })
                })
                .collect(),
        }));

        if !any_ordinary {
            return special;
        }

        let ordinary_fields = decl
            .fields
            .iter()
            .zip(&elements)
            .filter_map(|(f, e)| {
                let ty = match (&e.ty, e.side) {
                    (_, PairSide::Special) => return None,
                    (LegalType::Pair(pair), PairSide::Both) => pair.ordinary.as_simple()?,
                    (legal, _) => legal.as_simple().unwrap_or(f.ty),
                };
                Some(StructField {
                    key: f.key,
                    name: f.name.clone(),
                    ty,
                })
            })
            .collect();
        let ordinary = LegalType::Simple(rebuilt_struct(module, &decl, ordinary_fields));

        LegalType::Pair(Rc::new(PairType {
            ordinary,
            special,
            info: Rc::new(PairInfo { elements }),
        }))
    }
}

/// Declare a copy of `decl` with a new field list, keeping its name
fn rebuilt_struct(module: &mut Module, decl: &StructDecl, fields: Vec<StructField>) -> TypeId {
    let id = module.add_struct_decl(StructDecl {
        name: decl.name.clone(),
        fields,
        builtin: false,
    });
    module.struct_type(id)
}

/// Distribute a pointer-like wrapper over the parts of a legal type
fn map_ptr(module: &mut Module, kind: PtrKind, legal: &LegalType) -> LegalType {
    match legal {
        LegalType::None => LegalType::None,
        LegalType::Simple(ty) => LegalType::Simple(module.types.ptr(kind, *ty)),
        LegalType::Tuple(tuple) => LegalType::Tuple(Rc::new(TupleType {
            elements: tuple
                .elements
                .iter()
                .map(|e| TupleElement {
                    key: e.key,
                    name: e.name.clone(),
                    ty: map_ptr(module, kind, &e.ty),
                })
                .collect(),
        })),
        LegalType::Pair(pair) => LegalType::Pair(Rc::new(PairType {
            ordinary: map_ptr(module, kind, &pair.ordinary),
            special: map_ptr(module, kind, &pair.special),
            info: pair.info.clone(),
        })),
        LegalType::ImplicitDeref(_) | LegalType::WrappedBuffer(_) => legal.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::{ScalarKind, TextureShape, TextureType};

    fn material(module: &mut Module) -> (TypeId, FieldKey, FieldKey) {
        let float4 = module.types.vector(ScalarKind::Float, 4);
        let tex = module
            .types
            .intern(Type::Texture(TextureType::sampled(TextureShape::Texture2D, float4)));
        let id = module.add_struct("Material", &[("albedo", float4), ("map", tex)]);
        let albedo = module.field_key(id, "albedo").expect("albedo");
        let map = module.field_key(id, "map").expect("map");
        (module.struct_type(id), albedo, map)
    }

    #[test]
    fn test_mixed_struct_becomes_pair() {
        let mut module = Module::new("legal");
        let (ty, albedo, map) = material(&mut module);
        let mut legalizer = TypeLegalizer::new(TargetCapabilities {
            resources_in_structs: false,
            arrays_of_resources: true,
        });

        let legal = legalizer.legalize(&mut module, ty);
        let LegalType::Pair(pair) = &legal else {
            panic!("expected a pair, got {:?}", legal);
        };
        assert_eq!(pair.info.element(albedo).map(|e| e.side), Some(PairSide::Ordinary));
        assert_eq!(pair.info.element(map).map(|e| e.side), Some(PairSide::Special));
        assert_eq!(legal.leaf_types().len(), 2);
        assert_eq!(legal.leaf_types()[1].0, vec![map]);
    }

    #[test]
    fn test_legalization_is_memoized() {
        let mut module = Module::new("legal");
        let (ty, _, _) = material(&mut module);
        let mut legalizer = TypeLegalizer::new(TargetCapabilities {
            resources_in_structs: false,
            arrays_of_resources: true,
        });
        let first = legalizer.legalize(&mut module, ty);
        let second = legalizer.legalize(&mut module, ty);
        assert!(first.same_as(&second));
        assert_eq!(legalizer.split_count(), 1);
    }

    #[test]
    fn test_resources_allowed_in_structs_stay_simple() {
        let mut module = Module::new("legal");
        let (ty, _, _) = material(&mut module);
        let mut legalizer = TypeLegalizer::new(TargetCapabilities {
            resources_in_structs: true,
            arrays_of_resources: true,
        });
        assert_eq!(legalizer.legalize(&mut module, ty).as_simple(), Some(ty));
    }

    #[test]
    fn test_array_of_resources_reported() {
        let mut module = Module::new("legal");
        let sampler = module.types.intern(Type::Sampler { comparison: false });
        let array = module.types.array(sampler, Some(4));
        let mut legalizer = TypeLegalizer::new(TargetCapabilities {
            resources_in_structs: false,
            arrays_of_resources: false,
        });
        assert!(legalizer.legalize(&mut module, array).is_simple());
        assert_eq!(legalizer.take_problems().len(), 1);
    }
}
