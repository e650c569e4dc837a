//! # typelayer-analysis
//!
//! Multi-layer type analysis: resolving the possible callees of indirect
//! calls in a whole-program IR.
//!
//! This crate provides:
//! - Content digests for types, (type, field) slots, and call signatures
//! - A signature index over address-taken functions, with fuzzy matching
//! - A base-type resolver that walks values outward through memory layers
//! - Confinement, propagation, escape, and alias collection (the seed phase)
//! - The layered callee resolver with per-slot and per-signature caches
//!
//! The seed phase runs once over every module and freezes; queries are then
//! concurrent reads plus idempotent cache fills. A resolution starts from
//! the functions matching the call site's signature and intersects, layer by
//! layer, the candidates confined to each slot the callee pointer was loaded
//! from.

pub mod alias;
pub mod cache;
pub mod config;
pub mod confine;
pub mod digest;
pub mod layers;
pub mod propagate;
pub mod resolver;
pub mod signature;
pub mod store;

use std::collections::BTreeSet;

use typelayer_ir::FunctionId;

/// An unordered set of function identities. Backed by an ordered set so
/// query results iterate deterministically.
pub type FuncSet = BTreeSet<FunctionId>;

pub use alias::{collect_alias_struct_ptrs, AliasMap};
pub use cache::ResultCache;
pub use config::{AnalysisConfig, MltaMode, DEFAULT_MAX_TYPE_LAYER};
pub use confine::ConfinementCollector;
pub use digest::{call_hash, func_hash, type_hash, type_idx_hash};
pub use layers::{TypeIdx, TypeLayers};
pub use propagate::PropagationCollector;
pub use resolver::{
    IndirectCallAnalysis, ResolutionMethod, ResolutionStats, ResolvedCall,
};
pub use signature::{fuzzy_type_match, SignatureIndex};
pub use store::{SlotKey, TypeStore, ANY_FIELD};
