//! First-layer signature indexing and fuzzy type equality.
//!
//! The signature index maps a call-site signature digest to every
//! address-taken, non-intrinsic function whose declared signature produces
//! the same digest. Fuzzy equality is the looser, per-argument comparison
//! used by the fallback matcher to reconcile pointer and integer-pointer
//! representations across modules.

use std::collections::HashMap;

use typelayer_ir::{DataLayout, FunctionId, Program, Type};

use crate::digest::func_hash;
use crate::FuncSet;

/// Index over address-taken functions, built once before any query.
#[derive(Debug, Default)]
pub struct SignatureIndex {
    /// Signature digest → address-taken functions with that digest.
    by_signature: HashMap<u64, FuncSet>,
    /// Function guid → canonical definition, for resolving declarations.
    by_guid: HashMap<u64, FunctionId>,
    /// Every address-taken, non-intrinsic function.
    address_taken: Vec<FunctionId>,
}

impl SignatureIndex {
    /// Build the index over a whole program.
    pub fn build(program: &Program) -> Self {
        let mut index = Self::default();
        for (id, func) in program.functions() {
            if func.is_definition {
                index.by_guid.entry(func.guid).or_insert(id);
            }
            if func.is_address_taken && !func.is_intrinsic() {
                index.address_taken.push(id);
                index
                    .by_signature
                    .entry(func_hash(program, id))
                    .or_default()
                    .insert(id);
            }
        }
        index
    }

    /// Functions whose signature digest equals `sig`.
    pub fn functions_for(&self, sig: u64) -> Option<&FuncSet> {
        self.by_signature.get(&sig)
    }

    /// The canonical definition behind a guid, if one exists.
    pub fn definition(&self, guid: u64) -> Option<FunctionId> {
        self.by_guid.get(&guid).copied()
    }

    /// Resolve a possibly-declared function to its definition. Functions
    /// with a body resolve to themselves.
    pub fn resolve_definition(&self, program: &Program, f: FunctionId) -> Option<FunctionId> {
        if program.function(f).is_definition {
            Some(f)
        } else {
            self.definition(program.function(f).guid)
        }
    }

    /// All address-taken, non-intrinsic functions.
    pub fn address_taken(&self) -> &[FunctionId] {
        &self.address_taken
    }
}

/// Fuzzy type compatibility between a callee-side and a caller-side type.
///
/// After stripping equal levels of pointer indirection, two types are
/// compatible when they are structurally identical, are structures with the
/// same name, are integers of the same width, or one side is the generic
/// byte pointer and the other is any pointer or that module's pointer-sized
/// integer.
pub fn fuzzy_type_match(
    ty1: &Type,
    ty2: &Type,
    layout1: &DataLayout,
    layout2: &DataLayout,
) -> bool {
    let (mut t1, mut t2) = (ty1, ty2);
    while let (Type::Pointer(i1), Type::Pointer(i2)) = (t1, t2) {
        t1 = i1;
        t2 = i2;
    }

    if t1 == t2 {
        return true;
    }

    if let (Some(n1), Some(n2)) = (t1.struct_name(), t2.struct_name()) {
        if n1 == n2 {
            return true;
        }
    }

    if let (Some(b1), Some(b2)) = (t1.integer_bits(), t2.integer_bits()) {
        if b1 == b2 {
            return true;
        }
    }

    // Generic byte pointers stand in for any pointer, and for the
    // pointer-sized integer of the opposite module.
    let int_ptr = |ty: &Type, layout: &DataLayout| ty.integer_bits() == Some(layout.int_ptr_bits());
    if t1.is_byte_pointer() && (t2.is_pointer() || int_ptr(t2, layout2)) {
        return true;
    }
    if t2.is_byte_pointer() && (t1.is_pointer() || int_ptr(t1, layout1)) {
        return true;
    }

    false
}
