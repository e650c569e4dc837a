//! Alias recovery for generic byte pointers.
//!
//! Allocation-style helpers return `i8*`, and the typed view of the object
//! only appears at the cast site. When a function contains exactly one cast
//! of a given call result into a pointer-to-composite, that cast is a safe
//! typed alias for the raw pointer; with two or more casts the source is
//! ambiguous and no alias is recorded.

use std::collections::{HashMap, HashSet};

use typelayer_ir::{FunctionId, Program, ValueId, ValueKind};

/// Per-function map from a byte-pointer call result to its unique typed
/// alias.
pub type AliasMap = HashMap<FunctionId, HashMap<ValueId, ValueId>>;

/// Scan one function for unique byte-pointer-to-composite casts.
pub fn collect_alias_struct_ptrs(program: &Program, f: FunctionId) -> HashMap<ValueId, ValueId> {
    let mut map: HashMap<ValueId, ValueId> = HashMap::new();
    let mut ambiguous: HashSet<ValueId> = HashSet::new();

    for &inst in &program.function(f).instructions {
        let ValueKind::Cast { operand, .. } = program.value(inst).kind else {
            continue;
        };
        if !matches!(program.value(operand).kind, ValueKind::Call { .. }) {
            continue;
        }
        if !program.ty(operand).is_byte_pointer() {
            continue;
        }
        let Some(pointee) = program.ty(inst).pointee() else {
            continue;
        };
        if !pointee.is_composite() {
            continue;
        }
        if map.contains_key(&operand) {
            ambiguous.insert(operand);
            continue;
        }
        map.insert(operand, inst);
    }

    for source in ambiguous {
        map.remove(&source);
    }
    map
}
