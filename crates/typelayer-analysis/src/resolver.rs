//! The seeded analysis and its layered callee resolver.
//!
//! [`IndirectCallAnalysis::seed`] runs the collectors over every module (in
//! parallel, merging per-module partial stores sequentially) and freezes the
//! result. Queries then refine the first-layer signature-matched set of
//! a call site by walking outward through its type layers, intersecting the
//! candidate set confined at each slot (propagation dependents included).

use std::collections::HashSet;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use typelayer_ir::{DataLayout, GlobalId, ModuleId, Program, ValueId, ValueKind};

use crate::alias::{collect_alias_struct_ptrs, AliasMap};
use crate::cache::ResultCache;
use crate::config::{AnalysisConfig, MltaMode};
use crate::confine::ConfinementCollector;
use crate::digest::{call_hash, func_hash, type_hash, type_idx_hash};
use crate::layers::TypeLayers;
use crate::propagate::PropagationCollector;
use crate::signature::{fuzzy_type_match, SignatureIndex};
use crate::store::{TypeStore, ANY_FIELD};
use crate::FuncSet;

/// How a call site's target set was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMethod {
    /// Indirect-call analysis is disabled.
    Disabled,
    /// Signature matching only; no layering attempted.
    SignatureOnly,
    /// The walk never got past the first (signature) layer.
    FirstLayer,
    /// At least one composite layer refined the set.
    MultiLayer,
    /// The first layer was already empty.
    Unknown,
}

/// One resolved indirect call.
#[derive(Debug, Clone)]
pub struct ResolvedCall {
    /// The call value.
    pub call: ValueId,
    /// Possible callees.
    pub targets: FuncSet,
    /// How the set was obtained.
    pub method: ResolutionMethod,
    /// Number of layers consumed, counting the signature layer.
    pub layers: usize,
}

/// Aggregate statistics over a batch of resolutions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolutionStats {
    /// Total indirect calls analyzed.
    pub total_calls: usize,
    /// Calls refined past the first layer.
    pub multi_layer: usize,
    /// Calls answered by the signature layer alone.
    pub first_layer: usize,
    /// Calls with an empty first layer.
    pub unresolved: usize,
    /// Sum of target-set sizes.
    pub total_targets: usize,
}

impl ResolutionStats {
    /// Compute statistics from a list of resolutions.
    pub fn from_results(results: &[ResolvedCall]) -> Self {
        let mut stats = Self {
            total_calls: results.len(),
            ..Self::default()
        };
        for resolved in results {
            match resolved.method {
                ResolutionMethod::MultiLayer => stats.multi_layer += 1,
                ResolutionMethod::FirstLayer | ResolutionMethod::SignatureOnly => {
                    stats.first_layer += 1
                }
                ResolutionMethod::Unknown => stats.unresolved += 1,
                ResolutionMethod::Disabled => {}
            }
            stats.total_targets += resolved.targets.len();
        }
        stats
    }

    /// Mean target-set size over resolved calls.
    pub fn average_targets(&self) -> f64 {
        let resolved = self.total_calls - self.unresolved;
        if resolved == 0 {
            0.0
        } else {
            self.total_targets as f64 / resolved as f64
        }
    }
}

/// The seeded whole-program analysis.
pub struct IndirectCallAnalysis<'p> {
    program: &'p Program,
    config: AnalysisConfig,
    sig: SignatureIndex,
    store: TypeStore,
    aliases: AliasMap,
    sig_cache: ResultCache,
    slot_cache: ResultCache,
}

impl<'p> IndirectCallAnalysis<'p> {
    /// Seed the analysis over every module of the program. Modules are
    /// processed in parallel into partial stores, which merge sequentially;
    /// all writes are additive, so the merged result is independent of task
    /// order.
    pub fn seed(program: &'p Program, config: AnalysisConfig) -> Self {
        let sig = SignatureIndex::build(program);

        let module_ids: Vec<ModuleId> = (0..program.modules().len() as u32)
            .map(ModuleId)
            .collect();
        let partials: Vec<(TypeStore, AliasMap)> = module_ids
            .par_iter()
            .map(|&m| seed_module(program, &config, &sig, m))
            .collect();

        let mut store = TypeStore::new();
        let mut aliases = AliasMap::new();
        for (partial, alias) in partials {
            store.merge(partial);
            aliases.extend(alias);
        }

        Self {
            program,
            config,
            sig,
            store,
            aliases,
            sig_cache: ResultCache::new(),
            slot_cache: ResultCache::new(),
        }
    }

    /// The configuration this analysis was seeded with.
    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// The seeded store (read-only).
    pub fn store(&self) -> &TypeStore {
        &self.store
    }

    /// Resolve an indirect call according to the configured mode. Always
    /// returns a set; over-approximation is the failure mode, never an
    /// error.
    pub fn resolve(&self, call: ValueId) -> FuncSet {
        self.resolve_with_method(call).0
    }

    fn resolve_with_method(&self, call: ValueId) -> (FuncSet, ResolutionMethod, usize) {
        match self.config.mode {
            MltaMode::NoIndirectCalls => (FuncSet::new(), ResolutionMethod::Disabled, 0),
            MltaMode::MatchSignatures => {
                let set = self
                    .sig
                    .functions_for(call_hash(self.program, call))
                    .cloned()
                    .unwrap_or_default();
                (set, ResolutionMethod::SignatureOnly, 1)
            }
            MltaMode::FullMlta => match self.callees_with_layers(call) {
                Some((set, layers)) => {
                    let method = if layers > 1 {
                        ResolutionMethod::MultiLayer
                    } else {
                        ResolutionMethod::FirstLayer
                    };
                    (set, method, layers)
                }
                None => (FuncSet::new(), ResolutionMethod::Unknown, 0),
            },
        }
    }

    /// Resolve an indirect call by multi-layer refinement. Returns `None`
    /// when the first-layer signature set is already empty.
    pub fn callees_with_mlta(&self, call: ValueId) -> Option<FuncSet> {
        self.callees_with_layers(call).map(|(set, _)| set)
    }

    fn callees_with_layers(&self, call: ValueId) -> Option<(FuncSet, usize)> {
        let mut fs = self
            .sig
            .functions_for(call_hash(self.program, call))?
            .clone();
        if fs.is_empty() {
            return None;
        }

        let layout = self.program.layout_of_value(call);
        let layers = TypeLayers::new(self.program, &layout, &self.aliases, &self.config);
        let ValueKind::Call { callee, .. } = &self.program.value(call).kind else {
            panic!("callees_with_mlta on non-call value");
        };

        // The signature layer is layer one; its "type" is the call's
        // signature digest, so caps recorded against bare function
        // signatures stop the walk before any layering.
        let mut prev_hash = call_hash(self.program, call);
        let mut cv = *callee;
        let mut layer_no = 1usize;

        'walk: loop {
            if layer_no >= self.config.max_type_layer {
                break;
            }
            if self.config.sound && self.store.is_capped(prev_hash) {
                break;
            }

            let mut ty_list = Vec::new();
            let mut visited = HashSet::new();
            let (_, next) = layers.next_layer_base_type(cv, &mut ty_list, &mut visited);
            if ty_list.is_empty() {
                break;
            }
            let Some(next) = next else {
                break;
            };

            for (ty, idx) in &ty_list {
                if layer_no >= self.config.max_type_layer {
                    break 'walk;
                }
                layer_no += 1;

                let slot_hash = type_idx_hash(ty, &layout, *idx);
                let ty_h = type_hash(ty, &layout);

                let fs1 = match self.slot_cache.get(slot_hash) {
                    Some(cached) => cached,
                    None => {
                        if self.config.sound
                            && (self.store.is_escaped(slot_hash)
                                || self
                                    .store
                                    .is_escaped(type_idx_hash(ty, &layout, ANY_FIELD)))
                        {
                            // The slot admits anything; refining further
                            // would be unsound.
                            break 'walk;
                        }

                        let mut computed = self.store.targets_with_layer_type(ty_h, *idx);
                        for (dep_hash, dep_idx) in self.store.dependent_slots(ty_h, *idx) {
                            computed
                                .extend(self.store.targets_with_layer_type(dep_hash, dep_idx));
                        }
                        self.slot_cache.insert(slot_hash, computed.clone());
                        computed
                    }
                };

                // Casting means a layer's candidates are not necessarily a
                // subset of the previous layer's, so intersect rather than
                // replace.
                fs = fs.intersection(&fs1).copied().collect();
                cv = next;

                if self.config.sound && self.store.is_capped(ty_h) {
                    break 'walk;
                }
                prev_hash = ty_h;
            }
        }

        Some((fs, layer_no))
    }

    /// Signature-only fallback: every address-taken function whose signature
    /// fuzzily matches the call site is added to `out`. Results are cached
    /// by call-signature digest.
    pub fn callees_with_type(&self, call: ValueId, out: &mut FuncSet) {
        let ValueKind::Call {
            args, inline_asm, ..
        } = &self.program.value(call).kind
        else {
            panic!("callees_with_type on non-call value");
        };
        if *inline_asm {
            return;
        }

        let cih = call_hash(self.program, call);
        if let Some(cached) = self.sig_cache.get(cih) {
            out.extend(cached);
            return;
        }

        let caller_layout = self.program.layout_of_value(call);
        let mut matched_set = FuncSet::new();

        for &cand in self.sig.address_taken() {
            let func = self.program.function(cand);
            if func.is_variadic() {
                // Compare only the fixed prefix.
                if args.len() < func.arg_size() {
                    continue;
                }
            } else if func.arg_size() != args.len() {
                continue;
            }

            // Exact signature digests match: done.
            if cih == func_hash(self.program, cand) {
                matched_set.insert(cand);
                continue;
            }

            let callee_layout = *self.program.layout(func.module);
            let mut matched = true;
            for (param_ty, &arg) in func.ty.params.iter().zip(args.iter()) {
                if !fuzzy_type_match(
                    param_ty,
                    self.program.ty(arg),
                    &callee_layout,
                    &caller_layout,
                ) {
                    matched = false;
                    break;
                }
            }
            if matched
                && !fuzzy_type_match(
                    &func.ty.return_type,
                    self.program.ty(call),
                    &callee_layout,
                    &caller_layout,
                )
            {
                matched = false;
            }
            if matched {
                matched_set.insert(cand);
            }
        }

        self.sig_cache.insert(cih, matched_set.clone());
        out.extend(matched_set);
    }

    /// All indirect call sites in the program, in module order.
    pub fn indirect_calls(&self) -> Vec<ValueId> {
        let mut calls = Vec::new();
        for (_, func) in self.program.functions() {
            for &inst in &func.instructions {
                if self.program.is_indirect_call(inst) {
                    calls.push(inst);
                }
            }
        }
        calls
    }

    /// Resolve every indirect call in the program. Queries only read the
    /// seeded maps (plus the idempotent caches), so they run in parallel.
    pub fn resolve_all(&self) -> Vec<ResolvedCall> {
        self.indirect_calls()
            .par_iter()
            .map(|&call| {
                let (targets, method, layers) = self.resolve_with_method(call);
                ResolvedCall {
                    call,
                    targets,
                    method,
                    layers,
                }
            })
            .collect()
    }

    /// The functions a vtable-like global holds, if the seed phase recorded
    /// any.
    pub fn vtable_funcs(&self, global: GlobalId) -> Option<&FuncSet> {
        self.store.vtable_funcs(global)
    }

    /// The vtable-like global a value addresses, looking through reinterpret
    /// casts and field accesses.
    pub fn vtable_of(&self, v: ValueId) -> Option<GlobalId> {
        match &self.program.value(v).kind {
            ValueKind::Cast {
                kind: typelayer_ir::CastKind::BitCast,
                operand,
            } => self.vtable_of(*operand),
            ValueKind::Gep { base, .. } => self.vtable_of(*base),
            ValueKind::GlobalRef(g) if self.store.is_vtable(*g) => Some(*g),
            _ => None,
        }
    }
}

/// Seed one module: alias maps first (the walkers consult them), then
/// confinement over globals and bodies, then propagation.
fn seed_module(
    program: &Program,
    config: &AnalysisConfig,
    sig: &SignatureIndex,
    m: ModuleId,
) -> (TypeStore, AliasMap) {
    let module = program.module(m);
    let layout: DataLayout = module.layout;

    let mut aliases = AliasMap::new();
    for &f in &module.functions {
        if program.function(f).is_definition {
            aliases.insert(f, collect_alias_struct_ptrs(program, f));
        }
    }

    let mut store = TypeStore::new();
    {
        let layers = TypeLayers::new(program, &layout, &aliases, config);
        let confine = ConfinementCollector::new(program, &layout, config, sig, layers);
        for &g in &module.globals {
            confine.collect_initializer(g, &mut store);
        }
        for &f in &module.functions {
            if program.function(f).is_definition {
                confine.collect_function(f, &mut store);
            }
        }
    }
    {
        let layers = TypeLayers::new(program, &layout, &aliases, config);
        let prop = PropagationCollector::new(program, &layout, layers);
        for &f in &module.functions {
            if program.function(f).is_definition {
                prop.collect_function(f, &mut store);
            }
        }
    }

    (store, aliases)
}
