//! Propagation and escape collection.
//!
//! Stores of non-function values move whole objects around: whatever is
//! confined to the source's slots may reappear at the destination's slots.
//! Those flows become propagation edges. When the source cannot be typed at
//! all but is still a pointer, the destination's slots escape precise
//! tracking. Aggregate copies through memcpy-style intrinsics are handled as
//! stores of the source operand into the destination operand.
//!
//! Pointer-to-pointer structure casts emit no propagation edge: the resolver
//! already tolerates casts by intersecting candidate sets per layer, so a
//! standalone cast carries no extra information.

use std::collections::HashSet;

use typelayer_ir::{DataLayout, FunctionId, Program, Type, ValueId, ValueKind};

use crate::digest::{type_hash, type_idx_hash};
use crate::layers::TypeLayers;
use crate::store::TypeStore;

/// Collector over one module's function bodies.
pub struct PropagationCollector<'a> {
    program: &'a Program,
    layout: &'a DataLayout,
    layers: TypeLayers<'a>,
}

impl<'a> PropagationCollector<'a> {
    pub fn new(program: &'a Program, layout: &'a DataLayout, layers: TypeLayers<'a>) -> Self {
        Self {
            program,
            layout,
            layers,
        }
    }

    /// Collect propagation edges and escapes from a function body.
    pub fn collect_function(&self, f: FunctionId, store: &mut TypeStore) {
        for &inst in &self.program.function(f).instructions {
            let (dest, source) = match &self.program.value(inst).kind {
                ValueKind::Store { ptr, value } => (*ptr, *value),
                ValueKind::Call { args, .. } => {
                    // Aggregate assignment often compiles to a memcpy
                    // intrinsic; treat it as a store of operand 1 into
                    // operand 0.
                    let is_memcpy = self
                        .program
                        .called_function(inst)
                        .map(|cf| self.program.function(cf).is_memcpy())
                        .unwrap_or(false);
                    if !is_memcpy || args.len() < 2 {
                        continue;
                    }
                    (args[0], args[1])
                }
                _ => continue,
            };

            // Constant payloads are confinement's business, not
            // propagation's.
            if matches!(
                self.program.value(source).kind,
                ValueKind::ConstAggregate { .. }
                    | ValueKind::ConstData
                    | ValueKind::ConstInt { .. }
                    | ValueKind::ConstNull
            ) {
                continue;
            }

            self.collect_pair(dest, source, store);
        }
    }

    /// Process one (destination, source) flow.
    fn collect_pair(&self, dest: ValueId, source: ValueId, store: &mut TypeStore) {
        // Best case: the source has visible outer layers.
        let mut ty_list = Vec::new();
        let mut visited = HashSet::new();
        self.layers
            .next_layer_base_type(source, &mut ty_list, &mut visited);
        if !ty_list.is_empty() {
            for (ty, idx) in &ty_list {
                self.propagate_type(dest, ty, *idx, store);
            }
            return;
        }

        // No layers, but the current layer has a composite base type.
        visited.clear();
        if let Some(base) = self.layers.base_type(source, &mut visited) {
            self.propagate_type(dest, &base, 0, store);
            return;
        }

        // A function-pointer-typed value that is not itself a known
        // function propagates by its function type.
        let stripped = self.program.strip_pointer_casts(source);
        if let Some(ft) = self.program.func_ptr_type(stripped) {
            if self.program.base_function(source).is_none() {
                self.propagate_type(dest, &Type::Function(ft.clone()), 0, store);
            }
            return;
        }

        // A general pointer with no recoverable type: the destination's
        // slots can no longer be tracked precisely.
        if self.program.ty(source).is_pointer() {
            self.escape_type(dest, store);
        }
    }

    /// Add an edge from every slot on the destination's chain to the source
    /// slot `(from_ty, from_idx)`.
    fn propagate_type(&self, dest: ValueId, from_ty: &Type, from_idx: i64, store: &mut TypeStore) {
        let from_hash = type_hash(from_ty, self.layout);
        let (chain, _complete) = self.layers.base_type_chain(dest, store);
        for (ty, idx) in &chain {
            let to_hash = type_hash(ty, self.layout);
            if to_hash == from_hash && *idx == from_idx {
                continue;
            }
            store.propagate((to_hash, *idx), (from_hash, from_idx));
        }
    }

    /// Mark every slot on the value's chain as escaped.
    fn escape_type(&self, v: ValueId, store: &mut TypeStore) {
        let (chain, _complete) = self.layers.base_type_chain(v, store);
        for (ty, idx) in &chain {
            store.escape(type_idx_hash(ty, self.layout, *idx));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alias::AliasMap;
    use crate::config::AnalysisConfig;
    use typelayer_ir::{FunctionType, Intrinsic, ProgramBuilder};

    fn fp_ty() -> Type {
        Type::ptr(Type::func(Type::void(), vec![]))
    }

    struct Fixture {
        program: Program,
        layout: DataLayout,
        aliases: AliasMap,
        config: AnalysisConfig,
    }

    impl Fixture {
        fn collector(&self) -> PropagationCollector<'_> {
            let layers =
                TypeLayers::new(&self.program, &self.layout, &self.aliases, &self.config);
            PropagationCollector::new(&self.program, &self.layout, layers)
        }
    }

    fn fixture(program: Program) -> Fixture {
        Fixture {
            program,
            layout: DataLayout::default(),
            aliases: AliasMap::new(),
            config: AnalysisConfig::default(),
        }
    }

    #[test]
    fn test_memcpy_adds_propagation_edge() {
        let mut b = ProgramBuilder::new();
        let m = b.add_module("m.bc", DataLayout::default());
        let a = Type::strukt("a_ops", vec![fp_ty()]);
        let bb = Type::strukt("b_ops", vec![fp_ty()]);

        let memcpy = b.add_function(
            m,
            "llvm.memcpy.p0i8.p0i8.i64",
            FunctionType::new(
                Type::void(),
                vec![Type::byte_ptr(), Type::byte_ptr(), Type::int(64)],
            ),
        );
        b.set_intrinsic(memcpy, Intrinsic::MemCpy);

        let f = b.add_function(
            m,
            "copy_ops",
            FunctionType::new(
                Type::void(),
                vec![Type::ptr(a.clone()), Type::ptr(bb.clone())],
            ),
        );
        let dst = b.param(f, 0);
        let src = b.param(f, 1);
        let dst_raw = b.inst_bitcast(f, Type::byte_ptr(), dst);
        let src_raw = b.inst_bitcast(f, Type::byte_ptr(), src);
        let n = b.const_int(64, 8);
        let memcpy_ref = b.function_ref(memcpy);
        b.inst_call(f, memcpy_ref, vec![dst_raw, src_raw, n]);

        let fx = fixture(b.finish());
        let mut store = TypeStore::new();
        fx.collector().collect_function(f, &mut store);

        // The destination chain has no outer layers, so the source's base
        // type propagates at the whole-object slot.
        let a_hash = type_hash(&a, &fx.layout);
        let b_hash = type_hash(&bb, &fx.layout);
        let deps = store.dependent_slots(a_hash, 0);
        assert!(deps.contains(&(b_hash, 0)));
    }

    #[test]
    fn test_unknown_function_pointer_propagates_by_type() {
        let mut b = ProgramBuilder::new();
        let m = b.add_module("m.bc", DataLayout::default());
        let ops = Type::strukt("ops", vec![fp_ty()]);
        let f = b.add_function(
            m,
            "stash",
            FunctionType::new(Type::void(), vec![Type::ptr(ops.clone()), fp_ty()]),
        );
        let obj = b.param(f, 0);
        let unknown_fp = b.param(f, 1);
        let field = b.inst_gep(f, obj, &[0, 0]);
        b.inst_store(f, unknown_fp, field);

        let fx = fixture(b.finish());
        let mut store = TypeStore::new();
        fx.collector().collect_function(f, &mut store);

        let fn_ty = Type::func(Type::void(), vec![]);
        let deps = store.dependent_slots(type_hash(&ops, &fx.layout), 0);
        assert!(deps.contains(&(type_hash(&fn_ty, &fx.layout), 0)));
    }

    #[test]
    fn test_generic_pointer_store_escapes() {
        let mut b = ProgramBuilder::new();
        let m = b.add_module("m.bc", DataLayout::default());
        let ops = Type::strukt("ops", vec![Type::byte_ptr()]);
        let f = b.add_function(
            m,
            "leak",
            FunctionType::new(Type::void(), vec![Type::ptr(ops.clone()), Type::byte_ptr()]),
        );
        let obj = b.param(f, 0);
        let raw = b.param(f, 1);
        let field = b.inst_gep(f, obj, &[0, 0]);
        b.inst_store(f, raw, field);

        let fx = fixture(b.finish());
        let mut store = TypeStore::new();
        fx.collector().collect_function(f, &mut store);

        assert!(store.is_escaped(type_idx_hash(&ops, &fx.layout, 0)));
    }

    #[test]
    fn test_known_function_store_is_not_propagation() {
        let mut b = ProgramBuilder::new();
        let m = b.add_module("m.bc", DataLayout::default());
        let cb = b.add_function(m, "cb", FunctionType::new(Type::void(), vec![]));
        let ops = Type::strukt("ops", vec![fp_ty()]);
        let f = b.add_function(
            m,
            "install",
            FunctionType::new(Type::void(), vec![Type::ptr(ops.clone())]),
        );
        let obj = b.param(f, 0);
        let field = b.inst_gep(f, obj, &[0, 0]);
        let fref = b.function_ref(cb);
        b.inst_store(f, fref, field);

        let fx = fixture(b.finish());
        let mut store = TypeStore::new();
        fx.collector().collect_function(f, &mut store);

        // A known function constant is confinement's case; no edge and no
        // escape appear here.
        assert!(store.dependent_slots(type_hash(&ops, &fx.layout), 0).is_empty());
        assert!(!store.is_escaped(type_idx_hash(&ops, &fx.layout, 0)));
    }
}
