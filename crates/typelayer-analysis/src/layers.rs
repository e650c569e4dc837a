//! The base-type resolver.
//!
//! A layer is one memory indirection: a load or a field access separating two
//! base types along an access path. [`TypeLayers`] answers two questions
//! about a value: what composite type is visible at its current layer
//! ([`TypeLayers::base_type`]), and what slots does one step outward cross
//! ([`TypeLayers::next_layer_base_type`]). [`TypeLayers::base_type_chain`]
//! composes the two into the full chain used by the collectors.
//!
//! Every walk carries an explicit visited set keyed by value identity, so
//! phi cycles and self-referential constants terminate with "no chain"
//! instead of recursing forever.

use std::collections::{HashSet, VecDeque};

use typelayer_ir::{CastKind, DataLayout, Program, Type, ValueId, ValueKind};

use crate::alias::AliasMap;
use crate::config::AnalysisConfig;
use crate::digest::type_hash;
use crate::store::TypeStore;

/// A (type, field-index) pair on an access path.
pub type TypeIdx = (Type, i64);

/// Walker over the layered type structure of a program's values.
pub struct TypeLayers<'a> {
    program: &'a Program,
    layout: &'a DataLayout,
    aliases: &'a AliasMap,
    config: &'a AnalysisConfig,
}

impl<'a> TypeLayers<'a> {
    pub fn new(
        program: &'a Program,
        layout: &'a DataLayout,
        aliases: &'a AliasMap,
        config: &'a AnalysisConfig,
    ) -> Self {
        Self {
            program,
            layout,
            aliases,
            config,
        }
    }

    /// The typed alias of a byte-pointer instruction, if its function
    /// recorded a unique one.
    fn recover_alias(&self, v: ValueId) -> Option<ValueId> {
        let data = self.program.value(v);
        if !data.is_instruction() {
            return None;
        }
        self.aliases.get(&data.parent?)?.get(&v).copied()
    }

    /// The composite base type visible at the value's current memory layer,
    /// looking through reinterpret casts, selects, phis, and loads.
    pub fn base_type(&self, v: ValueId, visited: &mut HashSet<ValueId>) -> Option<Type> {
        if !visited.insert(v) {
            return None;
        }

        let ty = self.program.ty(v);
        if ty.is_composite() {
            return Some(ty.clone());
        }
        if let Some(pointee) = ty.pointee() {
            if pointee.is_composite() {
                return Some(pointee.clone());
            }
            if let Some(alias) = self.recover_alias(v) {
                return self.program.ty(alias).pointee().cloned();
            }
        }

        match &self.program.value(v).kind {
            ValueKind::Cast {
                kind: CastKind::BitCast,
                operand,
            } => self.base_type(*operand, visited),
            // Both arms are assumed to share a type; take the true arm.
            ValueKind::Select { if_true, .. } => self.base_type(*if_true, visited),
            ValueKind::Phi { incoming } => incoming
                .iter()
                .find_map(|&iv| self.base_type(iv, visited)),
            ValueKind::Load { ptr } => self.base_type(*ptr, visited),
            _ => None,
        }
    }

    /// Advance one memory layer outward from `v`.
    ///
    /// On success, appends the slot keys crossed by the step to `ty_list`
    /// (immediate container first, outermost container last) and returns
    /// `(true, Some(remaining))`. On failure returns `(false, next)` where
    /// `next` is the terminal value: `Some(v)` for arguments and revisits,
    /// `None` when the walk has nowhere to go.
    pub fn next_layer_base_type(
        &self,
        v: ValueId,
        ty_list: &mut Vec<TypeIdx>,
        visited: &mut HashSet<ValueId>,
    ) -> (bool, Option<ValueId>) {
        let data = self.program.value(v);
        if matches!(data.kind, ValueKind::Argument { .. }) {
            return (false, Some(v));
        }
        if !visited.insert(v) {
            return (false, Some(v));
        }

        match &data.kind {
            // The only way to cross into the next layer is a field access.
            ValueKind::Gep { base, .. } => {
                if self.gep_layer_types(v, ty_list) {
                    (true, Some(*base))
                } else {
                    (false, None)
                }
            }
            ValueKind::Load { ptr } => self.next_layer_base_type(*ptr, ty_list, visited),
            ValueKind::Cast {
                kind: CastKind::BitCast,
                operand,
            } => self.next_layer_base_type(*operand, ty_list, visited),
            ValueKind::Phi { incoming } => {
                // Try incoming values in order; the first one that extends
                // the chain wins, otherwise the last attempt's state is
                // kept.
                let mut result = (false, None);
                let mut chosen_list = ty_list.clone();
                let mut chosen_visited = visited.clone();
                for &iv in incoming {
                    let mut n_list = ty_list.clone();
                    let mut n_visited = visited.clone();
                    result = self.next_layer_base_type(iv, &mut n_list, &mut n_visited);
                    let extended = n_list.len() > ty_list.len();
                    chosen_list = n_list;
                    chosen_visited = n_visited;
                    if extended {
                        break;
                    }
                }
                *ty_list = chosen_list;
                *visited = chosen_visited;
                result
            }
            ValueKind::Select { if_true, .. } => {
                self.next_layer_base_type(*if_true, ty_list, visited)
            }
            ValueKind::Unary { operand, .. } => {
                self.next_layer_base_type(*operand, ty_list, visited)
            }
            _ => (false, None),
        }
    }

    /// Decompose a field access into the slot keys it crosses.
    fn gep_layer_types(&self, gep: ValueId, ty_list: &mut Vec<TypeIdx>) -> bool {
        let ValueKind::Gep {
            base,
            source_ty,
            indices,
        } = &self.program.value(gep).kind
        else {
            panic!("gep_layer_types on non-gep value");
        };

        let mut elem_ty = source_ty.clone();
        let mut idx_vals: Vec<i64> = Vec::new();

        // A nonzero leading index is a downcast or an intentional
        // out-of-bounds access: the declared source type is not the real
        // base. Try to recover the true base through the alias map and
        // resynthesize the index chain from the byte offset.
        let first_const = indices.first().and_then(|&i| self.program.const_int(i));
        if let Some(first) = first_const {
            if first != 0 {
                if let Some(recovered) = self.recover_alias(*base) {
                    if let Some(pointee) = self.program.ty(recovered).pointee() {
                        if let Some(chain) = self
                            .layout
                            .gep_indices_for_offset(pointee, first as u64)
                        {
                            elem_ty = pointee.clone();
                            idx_vals = chain;
                        }
                    }
                } else if elem_ty.is_struct() && self.config.sound {
                    // Recovery failed on a structure access; a downstream
                    // reinterpret cast means the access escapes the declared
                    // type, so give up on this chain entirely.
                    let reinterpreted = self.program.users(gep).iter().any(|&u| {
                        matches!(
                            self.program.value(u).kind,
                            ValueKind::Cast {
                                kind: CastKind::BitCast,
                                ..
                            }
                        )
                    });
                    if reinterpreted {
                        return false;
                    }
                }
            }
        }

        if idx_vals.is_empty() {
            idx_vals = indices
                .iter()
                .map(|&iv| self.program.const_int(iv).unwrap_or(-1))
                .collect();
        }

        let mut layers: VecDeque<TypeIdx> = VecDeque::new();
        for &idx in idx_vals.iter().skip(1) {
            let emit_idx = if self.config.field_insensitive { 0 } else { idx };
            layers.push_front((elem_ty.clone(), emit_idx));

            let sub = match &elem_ty {
                Type::Struct(_) => {
                    let field = elem_ty.field_type(idx);
                    assert!(field.is_some(), "field index {idx} outside {elem_ty:?}");
                    field.cloned()
                }
                Type::Array { element, .. } | Type::Vector { element, .. } => {
                    Some((**element).clone())
                }
                _ => None,
            };
            let Some(sub) = sub else {
                return false;
            };
            elem_ty = sub;
        }

        // Optimizers elide the access when a field's index is 0, so a
        // base-structure pointer can stand in for a pointer to its first
        // field. Add the field-0 slot when a downstream cast confirms the
        // first field's type.
        if let Type::Struct(st) = &elem_ty {
            if let Some(ty0) = st.fields.first() {
                for &u in self.program.users(gep) {
                    let is_confirming_cast = matches!(
                        self.program.value(u).kind,
                        ValueKind::Cast {
                            kind: CastKind::BitCast,
                            ..
                        }
                    ) && self.program.ty(u).pointee() == Some(ty0);
                    if is_confirming_cast {
                        layers.push_front((elem_ty.clone(), 0));
                    }
                }
            }
        }

        if layers.is_empty() {
            false
        } else {
            ty_list.extend(layers);
            true
        }
    }

    /// The full chain of base types for `v`: the current-layer base type
    /// first (if any), then every slot crossed walking outward to
    /// exhaustion.
    ///
    /// The returned flag is the chain's completeness: `false` when the walk
    /// ended at a pointer-typed argument, at a value whose address is stored
    /// through, or nowhere at all. An incomplete chain caps its outermost
    /// type in `store`.
    pub fn base_type_chain(&self, v: ValueId, store: &mut TypeStore) -> (Vec<TypeIdx>, bool) {
        let mut chain = Vec::new();
        let mut visited = HashSet::new();

        if let Some(base) = self.base_type(v, &mut visited) {
            chain.push((base, 0));
        }
        visited.clear();

        let mut ty_list = Vec::new();
        let mut cv = v;
        let mut terminal;
        loop {
            let (advanced, next) = self.next_layer_base_type(cv, &mut ty_list, &mut visited);
            terminal = next;
            if !advanced {
                break;
            }
            cv = next.expect("layer step without a successor");
        }
        chain.extend(ty_list);

        let complete = match terminal {
            None => false,
            Some(end) => {
                let data = self.program.value(end);
                if matches!(data.kind, ValueKind::Argument { .. }) && data.ty.is_pointer() {
                    false
                } else {
                    // A terminal whose address is written through can
                    // receive values the walk never saw.
                    !self.program.users(end).iter().any(|&u| {
                        matches!(self.program.value(u).kind,
                            ValueKind::Store { ptr, .. } if ptr == end)
                    })
                }
            }
        };

        if !chain.is_empty() && !complete {
            let (outermost, _) = chain.last().expect("non-empty chain");
            store.cap(type_hash(outermost, self.layout));
        }

        (chain, complete)
    }
}
