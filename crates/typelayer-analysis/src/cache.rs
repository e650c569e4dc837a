//! Query-phase result caching.
//!
//! After seeding, the analysis maps are read-only; the only mutated state is
//! these digest-keyed result caches. Entries are idempotent (the set computed
//! on a miss equals any concurrently computed set), so concurrent inserts can
//! race harmlessly and last-writer-wins is acceptable.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::FuncSet;

/// A digest-keyed memo of resolved function sets.
#[derive(Debug, Default)]
pub struct ResultCache {
    map: RwLock<HashMap<u64, FuncSet>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached set for a digest, if present.
    pub fn get(&self, key: u64) -> Option<FuncSet> {
        self.map.read().expect("cache lock poisoned").get(&key).cloned()
    }

    /// Insert a computed set.
    pub fn insert(&self, key: u64, set: FuncSet) {
        self.map.write().expect("cache lock poisoned").insert(key, set);
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.map.read().expect("cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
