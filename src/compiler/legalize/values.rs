//! Legalized values: the value-level mirror of [`LegalType`]

use super::types::{LegalType, PairInfo};
use crate::compiler::ir::{FieldKey, InstId};
use crate::{Error, Result};
use std::rc::Rc;

/// Replacement for one original value
#[derive(Debug, Clone)]
pub enum LegalVal {
    /// No storage
    None,
    /// A single IR value
    Simple(InstId),
    /// Value reached by implicitly dereferencing a collapsed wrapper
    ImplicitDeref(Box<LegalVal>),
    /// Independent parts keyed by field
    Tuple(Vec<(FieldKey, LegalVal)>),
    /// Ordinary and special halves; a wrapped buffer keeps the buffer on the
    /// ordinary side and its special parts behind an implicit dereference
    Pair {
        /// Ordinary half
        ordinary: Box<LegalVal>,
        /// Special half
        special: Box<LegalVal>,
        /// Field placement
        info: Rc<PairInfo>,
    },
}

impl LegalVal {
    /// The single IR value, when there is exactly one
    pub fn as_simple(&self) -> Option<InstId> {
        match self {
            LegalVal::Simple(id) => Some(*id),
            _ => None,
        }
    }

    /// Part of a tuple for `key`
    pub fn tuple_element(&self, key: FieldKey) -> Option<&LegalVal> {
        match self {
            LegalVal::Tuple(elements) => elements.iter().find(|(k, _)| *k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Physical values in leaf order, ordinary side first
    pub fn leaves(&self) -> Vec<InstId> {
        let mut out = Vec::new();
        self.collect(&mut out);
        out
    }

    fn collect(&self, out: &mut Vec<InstId>) {
        match self {
            LegalVal::None => {}
            LegalVal::Simple(id) => out.push(*id),
            LegalVal::ImplicitDeref(inner) => inner.collect(out),
            LegalVal::Tuple(elements) => elements.iter().for_each(|(_, v)| v.collect(out)),
            LegalVal::Pair {
                ordinary, special, ..
            } => {
                ordinary.collect(out);
                special.collect(out);
            }
        }
    }

    /// Rebuild the value tree of `ty` from physical leaves, in the order
    /// [`LegalType::leaf_types`] lists them.
    pub fn from_leaves(ty: &LegalType, leaves: &mut impl Iterator<Item = InstId>) -> Result<LegalVal> {
        Ok(match ty {
            LegalType::None => LegalVal::None,
            LegalType::Simple(_) => LegalVal::Simple(next_leaf(leaves)?),
            LegalType::ImplicitDeref(inner) => {
                LegalVal::ImplicitDeref(Box::new(Self::from_leaves(inner, leaves)?))
            }
            LegalType::Tuple(tuple) => {
                let mut elements = Vec::with_capacity(tuple.elements.len());
                for element in &tuple.elements {
                    elements.push((element.key, Self::from_leaves(&element.ty, leaves)?));
                }
                LegalVal::Tuple(elements)
            }
            LegalType::Pair(pair) => {
                let ordinary = Self::from_leaves(&pair.ordinary, leaves)?;
                let special = Self::from_leaves(&pair.special, leaves)?;
                LegalVal::Pair {
                    ordinary: Box::new(ordinary),
                    special: Box::new(special),
                    info: pair.info.clone(),
                }
            }
            LegalType::WrappedBuffer(wrapped) => {
                let buffer = next_leaf(leaves)?;
                match &wrapped.element {
                    LegalType::Pair(pair) => LegalVal::Pair {
                        ordinary: Box::new(LegalVal::Simple(buffer)),
                        special: Box::new(LegalVal::ImplicitDeref(Box::new(Self::from_leaves(
                            &pair.special,
                            leaves,
                        )?))),
                        info: pair.info.clone(),
                    },
                    _ => LegalVal::Simple(buffer),
                }
            }
        })
    }
}

fn next_leaf(leaves: &mut impl Iterator<Item = InstId>) -> Result<InstId> {
    leaves
        .next()
        .ok_or_else(|| Error::invariant("too few leaf values for a legalized type"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::TypeId;
    use crate::compiler::legalize::types::{TupleElement, TupleType};

    #[test]
    fn test_from_leaves_matches_leaf_order() {
        let ty = LegalType::Tuple(Rc::new(TupleType {
            elements: vec![
                TupleElement {
                    key: FieldKey(0),
                    name: "a".into(),
                    ty: LegalType::Simple(TypeId(1)),
                },
                TupleElement {
                    key: FieldKey(1),
                    name: "b".into(),
                    ty: LegalType::Simple(TypeId(2)),
                },
            ],
        }));
        let value = LegalVal::from_leaves(&ty, &mut [InstId(7), InstId(9)].into_iter())
            .expect("two leaves");
        assert_eq!(value.leaves(), vec![InstId(7), InstId(9)]);
        assert_eq!(value.tuple_element(FieldKey(1)).and_then(|v| v.as_simple()), Some(InstId(9)));
    }

    #[test]
    fn test_from_leaves_reports_shortfall() {
        let ty = LegalType::Simple(TypeId(0));
        assert!(LegalVal::from_leaves(&ty, &mut std::iter::empty()).is_err());
    }
}
