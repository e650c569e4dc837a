//! The seeded analysis maps.
//!
//! One [`TypeStore`] holds everything the collectors learn about a program:
//! which functions are confined to which (type, field) slot, which slots feed
//! which other slots through copies, which slots escaped precise tracking,
//! which types cap the layer walk, and which globals look like vtables.
//! Collectors build one partial store per module; the partials are merged
//! sequentially and the result is read-only from then on.

use std::collections::{BTreeSet, HashMap, HashSet};

use indexmap::IndexMap;
use typelayer_ir::{FunctionId, GlobalId};

use crate::FuncSet;

/// A (type digest, field index) pair. Index `-1` is the wildcard covering
/// every field of the type.
pub type SlotKey = (u64, i64);

/// The wildcard field index.
pub const ANY_FIELD: i64 = -1;

/// Seeded confinement, propagation, escape, cap, and vtable data.
#[derive(Debug, Default, Clone)]
pub struct TypeStore {
    /// Type digest → field index → functions confined to that slot.
    confined: HashMap<u64, IndexMap<i64, FuncSet>>,
    /// Type digest → field index → slots whose confinement also applies
    /// there.
    propagated: HashMap<u64, IndexMap<i64, BTreeSet<SlotKey>>>,
    /// Slot digests that escaped precise tracking.
    escaped: HashSet<u64>,
    /// Type digests past which the layer walk must stop. Also holds
    /// signature digests of functions whose storage site had no recoverable
    /// chain at all.
    capped: HashSet<u64>,
    /// Globals holding function addresses in non-structure slots.
    vtables: HashMap<GlobalId, FuncSet>,
}

impl TypeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `func` may be stored into `(type digest, idx)`.
    pub fn confine(&mut self, ty_hash: u64, idx: i64, func: FunctionId) {
        self.confined
            .entry(ty_hash)
            .or_default()
            .entry(idx)
            .or_default()
            .insert(func);
    }

    /// Record that slot `to` may receive whatever is confined to `from`.
    pub fn propagate(&mut self, to: SlotKey, from: SlotKey) {
        self.propagated
            .entry(to.0)
            .or_default()
            .entry(to.1)
            .or_default()
            .insert(from);
    }

    /// Record that a slot digest escaped precise tracking.
    pub fn escape(&mut self, slot_hash: u64) {
        self.escaped.insert(slot_hash);
    }

    /// Record a cap digest.
    pub fn cap(&mut self, hash: u64) {
        self.capped.insert(hash);
    }

    /// Record a function held by a vtable-like global.
    pub fn add_vtable_func(&mut self, global: GlobalId, func: FunctionId) {
        self.vtables.entry(global).or_default().insert(func);
    }

    /// Check whether a slot digest escaped.
    pub fn is_escaped(&self, slot_hash: u64) -> bool {
        self.escaped.contains(&slot_hash)
    }

    /// Check whether a type (or signature) digest is capped.
    pub fn is_capped(&self, hash: u64) -> bool {
        self.capped.contains(&hash)
    }

    /// Functions held by a vtable-like global.
    pub fn vtable_funcs(&self, global: GlobalId) -> Option<&FuncSet> {
        self.vtables.get(&global)
    }

    /// Check whether a global was recorded as vtable-like.
    pub fn is_vtable(&self, global: GlobalId) -> bool {
        self.vtables.contains_key(&global)
    }

    /// Functions confined directly to a slot. The wildcard index returns the
    /// union over every field; a concrete index additionally picks up the
    /// wildcard bucket.
    pub fn targets_with_layer_type(&self, ty_hash: u64, idx: i64) -> FuncSet {
        let mut set = FuncSet::new();
        let Some(by_idx) = self.confined.get(&ty_hash) else {
            return set;
        };
        if idx == ANY_FIELD {
            for funcs in by_idx.values() {
                set.extend(funcs.iter().copied());
            }
        } else {
            if let Some(funcs) = by_idx.get(&idx) {
                set.extend(funcs.iter().copied());
            }
            if let Some(funcs) = by_idx.get(&ANY_FIELD) {
                set.extend(funcs.iter().copied());
            }
        }
        set
    }

    /// Every slot reachable from `(ty_hash, idx)` through propagation edges,
    /// transitively, wildcard buckets included.
    pub fn dependent_slots(&self, ty_hash: u64, idx: i64) -> BTreeSet<SlotKey> {
        let mut result = BTreeSet::new();
        let mut visited: HashSet<SlotKey> = HashSet::new();
        let mut worklist = vec![(ty_hash, idx)];

        while let Some(slot) = worklist.pop() {
            if !visited.insert(slot) {
                continue;
            }
            let Some(by_idx) = self.propagated.get(&slot.0) else {
                continue;
            };
            for bucket in [slot.1, ANY_FIELD] {
                if let Some(from) = by_idx.get(&bucket) {
                    for &dep in from {
                        result.insert(dep);
                        worklist.push(dep);
                    }
                }
                if slot.1 == ANY_FIELD {
                    break;
                }
            }
        }
        result
    }

    /// Merge another store into this one. All writes are additive, so merge
    /// order does not affect the result.
    pub fn merge(&mut self, other: TypeStore) {
        for (ty_hash, by_idx) in other.confined {
            let dst = self.confined.entry(ty_hash).or_default();
            for (idx, funcs) in by_idx {
                dst.entry(idx).or_default().extend(funcs);
            }
        }
        for (ty_hash, by_idx) in other.propagated {
            let dst = self.propagated.entry(ty_hash).or_default();
            for (idx, slots) in by_idx {
                dst.entry(idx).or_default().extend(slots);
            }
        }
        self.escaped.extend(other.escaped);
        self.capped.extend(other.capped);
        for (global, funcs) in other.vtables {
            self.vtables.entry(global).or_default().extend(funcs);
        }
    }
}
