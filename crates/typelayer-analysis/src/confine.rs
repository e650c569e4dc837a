//! Confinement collection.
//!
//! Confinement records which functions may be stored into which (type,
//! field) slot. Two sources feed it: global initializers, where functions
//! appear inside constant aggregate trees, and function bodies, where
//! function addresses are stored through pointers or passed as call
//! arguments.

use std::collections::{HashMap, HashSet, VecDeque};

use typelayer_ir::{
    CastKind, DataLayout, FunctionId, GlobalId, Program, Type, ValueId, ValueKind,
};

use crate::config::AnalysisConfig;
use crate::digest::{func_hash, type_hash};
use crate::layers::TypeLayers;
use crate::signature::SignatureIndex;
use crate::store::TypeStore;

/// Collector over one module's globals and function bodies.
pub struct ConfinementCollector<'a> {
    program: &'a Program,
    layout: &'a DataLayout,
    config: &'a AnalysisConfig,
    sig: &'a SignatureIndex,
    layers: TypeLayers<'a>,
}

impl<'a> ConfinementCollector<'a> {
    pub fn new(
        program: &'a Program,
        layout: &'a DataLayout,
        config: &'a AnalysisConfig,
        sig: &'a SignatureIndex,
        layers: TypeLayers<'a>,
    ) -> Self {
        Self {
            program,
            layout,
            config,
            sig,
            layers,
        }
    }

    /// Collect confinements from a global's initializer tree. Returns false
    /// when the global has no aggregate initializer.
    pub fn collect_initializer(&self, gv: GlobalId, store: &mut TypeStore) -> bool {
        let Some(init) = self.program.global(gv).initializer else {
            return false;
        };
        if !matches!(
            self.program.value(init).kind,
            ValueKind::ConstAggregate { .. }
        ) {
            return false;
        }

        // Each operand remembers the node it was attached to and at which
        // index, so a found function can be confined into every enclosing
        // container.
        let mut containers: HashMap<ValueId, (ValueId, i64)> = HashMap::new();
        let mut worklist: VecDeque<ValueId> = VecDeque::from([init]);
        let mut visited: HashSet<ValueId> = HashSet::new();

        while let Some(u) = worklist.pop_front() {
            if !visited.insert(u) {
                continue;
            }

            let udata = self.program.value(u);
            assert!(!udata.ty.is_function(), "function constant as container");

            let operands: Vec<ValueId> = match &udata.kind {
                ValueKind::ConstAggregate { operands } => {
                    if let Type::Struct(st) = &udata.ty {
                        if operands.is_empty() {
                            continue;
                        }
                        assert_eq!(
                            st.fields.len(),
                            operands.len(),
                            "aggregate arity mismatch in initializer"
                        );
                    }
                    operands.clone()
                }
                // A referenced global contributes its own initializer tree.
                ValueKind::GlobalRef(g) => {
                    self.program.global(*g).initializer.into_iter().collect()
                }
                _ => udata.kind.operands(),
            };

            for (op_no, &o) in operands.iter().enumerate() {
                let odata = self.program.value(o);
                containers.insert(o, (u, op_no as i64));

                let mut found: Option<FunctionId> = None;
                match &odata.kind {
                    // A function address sits directly in a slot.
                    ValueKind::FunctionRef(f) => found = Some(*f),

                    // A nested composite object: descend.
                    _ if odata.ty.is_composite() => worklist.push_back(o),

                    ValueKind::Cast {
                        kind: CastKind::PtrToInt,
                        operand,
                    } => match self.program.value(*operand).kind {
                        ValueKind::FunctionRef(f) => found = Some(f),
                        _ => worklist.push_back(*operand),
                    },

                    ValueKind::Cast {
                        kind: CastKind::BitCast,
                        operand,
                    } => match self.program.value(*operand).kind {
                        ValueKind::FunctionRef(f) => {
                            // A cast function pointer in a non-structure
                            // container is how vtables are emitted.
                            if !udata.ty.is_struct() {
                                store.add_vtable_func(gv, f);
                            }
                            found = Some(f);
                        }
                        _ => worklist.push_back(*operand),
                    },

                    _ if odata.ty.is_pointer() => {
                        if matches!(odata.kind, ValueKind::ConstNull) {
                            continue;
                        }
                        worklist.push_back(o);
                        // A pointer to another structured global caps the
                        // pointed-to type: the next layer cannot be walked
                        // through it.
                        if let ValueKind::GlobalRef(g) = odata.kind {
                            let pointee = &self.program.global(g).ty;
                            if pointee.is_struct() {
                                store.cap(type_hash(pointee, self.layout));
                            }
                        }
                    }

                    _ => {}
                }

                let Some(func) = found else { continue };
                if self.program.function(func).is_intrinsic() {
                    continue;
                }

                // Confine the function into every container on the chain.
                let mut cv = o;
                let mut walk_visited: HashSet<ValueId> = HashSet::new();
                while let Some(&(container, op_idx)) = containers.get(&cv) {
                    let cty = self.program.ty(container);
                    let idx = if self.config.field_insensitive { 0 } else { op_idx };
                    store.confine(type_hash(cty, self.layout), idx, func);

                    walk_visited.insert(cv);
                    if walk_visited.contains(&container) {
                        break;
                    }
                    cv = container;
                }
            }
        }

        true
    }

    /// Collect confinements from a function body.
    pub fn collect_function(&self, f: FunctionId, store: &mut TypeStore) {
        for &inst in &self.program.function(f).instructions {
            match &self.program.value(inst).kind {
                ValueKind::Store { ptr, value } => {
                    let stripped = self.program.strip_pointer_casts(*value);
                    if let Some(stored) = self.program.base_function(stripped) {
                        self.confine_target_function(*ptr, stored, store);
                    }
                }
                ValueKind::Call { args, .. } => {
                    for (arg_no, &arg) in args.iter().enumerate() {
                        let ValueKind::FunctionRef(passed) = self.program.value(arg).kind
                        else {
                            continue;
                        };
                        if self.program.function(passed).is_intrinsic() {
                            continue;
                        }
                        if self.program.is_indirect_call(inst) {
                            // No callee to look into; the operand's own slot
                            // is all we have.
                            self.confine_target_function(arg, passed, store);
                            continue;
                        }
                        let Some(callee) = self.program.called_function(inst) else {
                            continue;
                        };
                        let Some(def) = self.sig.resolve_definition(self.program, callee)
                        else {
                            continue;
                        };
                        let Some(param) = self.program.function(def).param(arg_no) else {
                            continue;
                        };
                        // The function flows into the callee's formal; every
                        // store or cast of that formal confines it.
                        for &user in self.program.users(param) {
                            if matches!(
                                self.program.value(user).kind,
                                ValueKind::Store { .. }
                                    | ValueKind::Cast {
                                        kind: CastKind::BitCast,
                                        ..
                                    }
                            ) {
                                self.confine_target_function(user, passed, store);
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }

    /// Record `func` into every slot on the base-type chain of `v`. An
    /// incomplete chain caps its outermost type, or the function's own
    /// signature when there is no chain at all.
    pub fn confine_target_function(&self, v: ValueId, func: FunctionId, store: &mut TypeStore) {
        if self.program.function(func).is_intrinsic() {
            return;
        }

        let (chain, complete) = self.layers.base_type_chain(v, store);
        for (ty, idx) in &chain {
            store.confine(type_hash(ty, self.layout), *idx, func);
        }
        if !complete {
            match chain.last() {
                Some((outermost, _)) => store.cap(type_hash(outermost, self.layout)),
                None => store.cap(func_hash(self.program, func)),
            }
        }
    }
}
