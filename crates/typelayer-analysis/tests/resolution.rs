//! End-to-end resolution tests over small whole programs.
//!
//! Each test assembles a program through the IR builder, seeds the analysis,
//! and checks the callee sets of its indirect calls.

use typelayer_analysis::{
    AnalysisConfig, FuncSet, IndirectCallAnalysis, MltaMode, ResolutionMethod, ResolutionStats,
};
use typelayer_ir::{
    DataLayout, FunctionId, FunctionType, ProgramBuilder, Type, ValueId,
};

fn fp_ty() -> Type {
    Type::ptr(Type::func(Type::void(), vec![]))
}

/// Add an address-taken `void()` handler.
fn add_handler(b: &mut ProgramBuilder, m: typelayer_ir::ModuleId, name: &str) -> FunctionId {
    let f = b.add_function(m, name, FunctionType::new(Type::void(), vec![]));
    b.set_address_taken(f);
    f
}

/// Add a caller that loads `obj.field` and calls it, returning the call.
fn add_call_through_field(
    b: &mut ProgramBuilder,
    m: typelayer_ir::ModuleId,
    name: &str,
    obj_ty: &Type,
    field: i64,
) -> ValueId {
    let caller = b.add_function(
        m,
        name,
        FunctionType::new(Type::void(), vec![Type::ptr(obj_ty.clone())]),
    );
    let obj = b.param(caller, 0);
    let slot = b.inst_gep(caller, obj, &[0, field]);
    let fp = b.inst_load(caller, slot);
    b.inst_call(caller, fp, vec![])
}

#[test]
fn direct_vtable_style_global() {
    let mut b = ProgramBuilder::new();
    let m = b.add_module("m.bc", DataLayout::default());
    let f = add_handler(&mut b, m, "on_tick");
    let other = add_handler(&mut b, m, "on_other");

    let ops = Type::strukt("tick_ops", vec![fp_ty()]);
    let g = b.add_global(m, "default_tick_ops", ops.clone());
    let fref = b.function_ref(f);
    let init = b.const_aggregate(ops.clone(), vec![fref]).unwrap();
    b.set_initializer(g, init).unwrap();

    let call = add_call_through_field(&mut b, m, "dispatch", &ops, 0);
    let program = b.finish();

    let analysis = IndirectCallAnalysis::seed(&program, AnalysisConfig::default());
    let targets = analysis.callees_with_mlta(call).unwrap();

    // `other` matches the signature but was never confined to the slot.
    assert_eq!(targets, FuncSet::from([f]));
    let _ = other;
}

#[test]
fn per_field_candidate_split() {
    let mut b = ProgramBuilder::new();
    let m = b.add_module("m.bc", DataLayout::default());
    let f = add_handler(&mut b, m, "f");
    let g = add_handler(&mut b, m, "g");
    let h = add_handler(&mut b, m, "h");

    let pair = Type::strukt("pair_ops", vec![fp_ty(), fp_ty()]);

    let ga = b.add_global(m, "a", pair.clone());
    let (fr, gr) = (b.function_ref(f), b.function_ref(g));
    let init_a = b.const_aggregate(pair.clone(), vec![fr, gr]).unwrap();
    b.set_initializer(ga, init_a).unwrap();

    let gb = b.add_global(m, "b", pair.clone());
    let (hr, gr2) = (b.function_ref(h), b.function_ref(g));
    let init_b = b.const_aggregate(pair.clone(), vec![hr, gr2]).unwrap();
    b.set_initializer(gb, init_b).unwrap();

    let call_field0 = add_call_through_field(&mut b, m, "call0", &pair, 0);
    let call_field1 = add_call_through_field(&mut b, m, "call1", &pair, 1);
    let program = b.finish();

    let analysis = IndirectCallAnalysis::seed(&program, AnalysisConfig::default());

    assert_eq!(
        analysis.callees_with_mlta(call_field0).unwrap(),
        FuncSet::from([f, h])
    );
    assert_eq!(
        analysis.callees_with_mlta(call_field1).unwrap(),
        FuncSet::from([g])
    );
}

#[test]
fn alias_recovery_confines_through_generic_pointer() {
    let mut b = ProgramBuilder::new();
    let m = b.add_module("m.bc", DataLayout::default());
    let f = add_handler(&mut b, m, "handler");

    let conn = Type::strukt("conn", vec![fp_ty()]);
    let alloc = b.add_function(m, "alloc", FunctionType::new(Type::byte_ptr(), vec![]));

    // setup(): raw = alloc(); typed = (conn*)raw; *(i8**)raw = (i8*)&f;
    let setup = b.add_function(m, "setup", FunctionType::new(Type::void(), vec![]));
    let alloc_ref = b.function_ref(alloc);
    let raw = b.inst_call(setup, alloc_ref, vec![]);
    let _typed = b.inst_bitcast(setup, Type::ptr(conn.clone()), raw);
    let slot = b.inst_bitcast(setup, Type::ptr(Type::byte_ptr()), raw);
    let fref = b.function_ref(f);
    let fraw = b.const_bitcast(Type::byte_ptr(), fref);
    b.inst_store(setup, fraw, slot);

    let call = add_call_through_field(&mut b, m, "dispatch", &conn, 0);
    let program = b.finish();

    let analysis = IndirectCallAnalysis::seed(&program, AnalysisConfig::default());
    // The unique cast to conn* recovers the base type, so the function is
    // confined to conn's whole-object slot.
    assert_eq!(
        analysis.callees_with_mlta(call).unwrap(),
        FuncSet::from([f])
    );
}

#[test]
fn memcpy_unions_source_candidates() {
    let mut b = ProgramBuilder::new();
    let m = b.add_module("m.bc", DataLayout::default());
    let fa = add_handler(&mut b, m, "a_handler");
    let fb = add_handler(&mut b, m, "b_handler");
    let unrelated = add_handler(&mut b, m, "unrelated");

    let a_ops = Type::strukt("a_ops", vec![fp_ty()]);
    let b_ops = Type::strukt("b_ops", vec![fp_ty()]);

    for (name, ty, func) in [("ga", &a_ops, fa), ("gb", &b_ops, fb)] {
        let g = b.add_global(m, name, ty.clone());
        let r = b.function_ref(func);
        let init = b.const_aggregate(ty.clone(), vec![r]).unwrap();
        b.set_initializer(g, init).unwrap();
    }

    let memcpy = b.add_function(
        m,
        "llvm.memcpy.p0i8.p0i8.i64",
        FunctionType::new(
            Type::void(),
            vec![Type::byte_ptr(), Type::byte_ptr(), Type::int(64)],
        ),
    );
    b.set_intrinsic(memcpy, typelayer_ir::Intrinsic::MemCpy);

    // copy(dst: a_ops*, src: b_ops*): memcpy(dst, src, n)
    let copy = b.add_function(
        m,
        "copy",
        FunctionType::new(
            Type::void(),
            vec![Type::ptr(a_ops.clone()), Type::ptr(b_ops.clone())],
        ),
    );
    let dst = b.param(copy, 0);
    let src = b.param(copy, 1);
    let dst_raw = b.inst_bitcast(copy, Type::byte_ptr(), dst);
    let src_raw = b.inst_bitcast(copy, Type::byte_ptr(), src);
    let n = b.const_int(64, 8);
    let memcpy_ref = b.function_ref(memcpy);
    b.inst_call(copy, memcpy_ref, vec![dst_raw, src_raw, n]);

    let call = add_call_through_field(&mut b, m, "dispatch", &a_ops, 0);
    let program = b.finish();

    let analysis = IndirectCallAnalysis::seed(&program, AnalysisConfig::default());
    // The copy means b_ops's candidates can surface through a_ops.
    assert_eq!(
        analysis.callees_with_mlta(call).unwrap(),
        FuncSet::from([fa, fb])
    );
    let _ = unrelated;
}

/// Build the escape scenario: holder.0 receives an untyped pointer, and also
/// legitimately holds one handler. Returns (program, call, confined handler,
/// other signature-compatible handler).
fn escape_scenario() -> (typelayer_ir::Program, ValueId, FunctionId, FunctionId) {
    let mut b = ProgramBuilder::new();
    let m = b.add_module("m.bc", DataLayout::default());
    let f = add_handler(&mut b, m, "legit");
    let other = add_handler(&mut b, m, "other");

    let holder = Type::strukt("holder", vec![Type::byte_ptr()]);
    let g = b.add_global(m, "holder_obj", holder.clone());
    let fref = b.function_ref(f);
    let fraw = b.const_bitcast(Type::byte_ptr(), fref);
    let init = b.const_aggregate(holder.clone(), vec![fraw]).unwrap();
    b.set_initializer(g, init).unwrap();

    // leak(q: holder*, v: i8*): *(i8**)&q->0 = v
    let leak = b.add_function(
        m,
        "leak",
        FunctionType::new(
            Type::void(),
            vec![Type::ptr(holder.clone()), Type::byte_ptr()],
        ),
    );
    let q = b.param(leak, 0);
    let v = b.param(leak, 1);
    let slot = b.inst_gep(leak, q, &[0, 0]);
    b.inst_store(leak, v, slot);

    // dispatch(p: holder*): ((void(*)())p->0)()
    let caller = b.add_function(
        m,
        "dispatch",
        FunctionType::new(Type::void(), vec![Type::ptr(holder.clone())]),
    );
    let p = b.param(caller, 0);
    let field = b.inst_gep(caller, p, &[0, 0]);
    let loaded = b.inst_load(caller, field);
    let fp = b.inst_bitcast(caller, fp_ty(), loaded);
    let call = b.inst_call(caller, fp, vec![]);

    (b.finish(), call, f, other)
}

#[test]
fn escaped_slot_stops_sound_walk() {
    let (program, call, f, other) = escape_scenario();

    let sound = IndirectCallAnalysis::seed(&program, AnalysisConfig::default().with_sound(true));
    // The slot escaped, so the sound walk refuses to refine past the
    // signature layer.
    assert_eq!(
        sound.callees_with_mlta(call).unwrap(),
        FuncSet::from([f, other])
    );
}

#[test]
fn escaped_slot_ignored_in_permissive_walk() {
    let (program, call, f, _other) = escape_scenario();

    let permissive = IndirectCallAnalysis::seed(&program, AnalysisConfig::default());
    // Permissive mode keeps layering and uses what was confined.
    assert_eq!(
        permissive.callees_with_mlta(call).unwrap(),
        FuncSet::from([f])
    );
}

#[test]
fn depth_bound_terminates_cleanly() {
    let mut b = ProgramBuilder::new();
    let m = b.add_module("m.bc", DataLayout::default());
    let f = add_handler(&mut b, m, "deep_handler");

    // Four nested levels around one function pointer.
    let l1 = Type::strukt("l1", vec![fp_ty()]);
    let l2 = Type::strukt("l2", vec![l1.clone()]);
    let l3 = Type::strukt("l3", vec![l2.clone()]);
    let l4 = Type::strukt("l4", vec![l3.clone()]);

    let g = b.add_global(m, "deep", l4.clone());
    let fref = b.function_ref(f);
    let i1 = b.const_aggregate(l1.clone(), vec![fref]).unwrap();
    let i2 = b.const_aggregate(l2.clone(), vec![i1]).unwrap();
    let i3 = b.const_aggregate(l3.clone(), vec![i2]).unwrap();
    let i4 = b.const_aggregate(l4.clone(), vec![i3]).unwrap();
    b.set_initializer(g, i4).unwrap();

    let caller = b.add_function(
        m,
        "dispatch",
        FunctionType::new(Type::void(), vec![Type::ptr(l4.clone())]),
    );
    let p = b.param(caller, 0);
    let slot = b.inst_gep(caller, p, &[0, 0, 0, 0, 0]);
    let fp = b.inst_load(caller, slot);
    let call = b.inst_call(caller, fp, vec![]);
    let program = b.finish();

    // A bound lower than the chain depth stops the walk mid-chain without
    // error.
    let bounded = IndirectCallAnalysis::seed(
        &program,
        AnalysisConfig::default().with_max_type_layer(2),
    );
    assert_eq!(
        bounded.callees_with_mlta(call).unwrap(),
        FuncSet::from([f])
    );

    let unbounded = IndirectCallAnalysis::seed(&program, AnalysisConfig::default());
    assert_eq!(
        unbounded.callees_with_mlta(call).unwrap(),
        FuncSet::from([f])
    );
}

#[test]
fn vtable_side_table_and_lookup() {
    let mut b = ProgramBuilder::new();
    let m = b.add_module("m.bc", DataLayout::default());
    let draw = add_handler(&mut b, m, "widget_draw");

    let table_ty = Type::array(Type::byte_ptr(), 1);
    let g = b.add_global(m, "widget_vtable", table_ty.clone());
    let fref = b.function_ref(draw);
    let cast = b.const_bitcast(Type::byte_ptr(), fref);
    let init = b.const_aggregate(table_ty, vec![cast]).unwrap();
    b.set_initializer(g, init).unwrap();

    // A user takes the table's address through a cast and a field access.
    let user = b.add_function(m, "use_table", FunctionType::new(Type::void(), vec![]));
    let gref = b.global_ref(g);
    let entry = b.inst_gep(user, gref, &[0, 0]);
    let as_raw = b.inst_bitcast(user, Type::byte_ptr(), entry);
    let program = b.finish();

    let analysis = IndirectCallAnalysis::seed(&program, AnalysisConfig::default());
    assert_eq!(analysis.vtable_funcs(g), Some(&FuncSet::from([draw])));
    // The lookup walks back through the cast and the field access.
    assert_eq!(analysis.vtable_of(as_raw), Some(g));
}

#[test]
fn modes_are_ordered_by_precision() {
    let mut b = ProgramBuilder::new();
    let m = b.add_module("m.bc", DataLayout::default());
    let f = add_handler(&mut b, m, "f");
    let other = add_handler(&mut b, m, "other");

    let ops = Type::strukt("ops", vec![fp_ty()]);
    let g = b.add_global(m, "obj", ops.clone());
    let fref = b.function_ref(f);
    let init = b.const_aggregate(ops.clone(), vec![fref]).unwrap();
    b.set_initializer(g, init).unwrap();

    let call = add_call_through_field(&mut b, m, "dispatch", &ops, 0);
    let program = b.finish();

    let off = IndirectCallAnalysis::seed(
        &program,
        AnalysisConfig::default().with_mode(MltaMode::NoIndirectCalls),
    );
    let sig_only = IndirectCallAnalysis::seed(
        &program,
        AnalysisConfig::default().with_mode(MltaMode::MatchSignatures),
    );
    let full = IndirectCallAnalysis::seed(&program, AnalysisConfig::default());

    let none_set = off.resolve(call);
    let full_set = full.resolve(call);
    let sig_set = sig_only.resolve(call);

    assert!(none_set.is_empty());
    assert!(none_set.is_subset(&full_set));
    assert!(full_set.is_subset(&sig_set));
    assert_eq!(full_set, FuncSet::from([f]));
    assert_eq!(sig_set, FuncSet::from([f, other]));
}

#[test]
fn fallback_matcher_uses_fuzzy_equality() {
    let mut b = ProgramBuilder::new();
    let m = b.add_module("m.bc", DataLayout::default());

    // The call site passes a pointer-sized integer; a callee declaring a
    // byte pointer is still compatible under the fuzzy rules.
    let byte_taker = b.add_function(
        m,
        "raw_poll",
        FunctionType::new(Type::int(32), vec![Type::byte_ptr()]),
    );
    b.set_address_taken(byte_taker);

    let narrow_taker = b.add_function(
        m,
        "short_poll",
        FunctionType::new(Type::int(32), vec![Type::int(32)]),
    );
    b.set_address_taken(narrow_taker);

    let wrong_arity = b.add_function(m, "no_args", FunctionType::new(Type::int(32), vec![]));
    b.set_address_taken(wrong_arity);

    let caller = b.add_function(
        m,
        "run",
        FunctionType::new(
            Type::void(),
            vec![
                Type::ptr(Type::func(Type::int(32), vec![Type::int(64)])),
                Type::int(64),
            ],
        ),
    );
    let fp = b.param(caller, 0);
    let arg = b.param(caller, 1);
    let call = b.inst_call(caller, fp, vec![arg]);
    let program = b.finish();

    let analysis = IndirectCallAnalysis::seed(&program, AnalysisConfig::default());
    let mut set = FuncSet::new();
    analysis.callees_with_type(call, &mut set);
    // The narrow integer and the nullary function both fail.
    assert_eq!(set, FuncSet::from([byte_taker]));
    let _ = (narrow_taker, wrong_arity);

    // Cached second query returns the same set.
    let mut again = FuncSet::new();
    analysis.callees_with_type(call, &mut again);
    assert_eq!(again, set);
}

#[test]
fn resolve_all_reports_stats() {
    let mut b = ProgramBuilder::new();
    let m = b.add_module("m.bc", DataLayout::default());
    let f = add_handler(&mut b, m, "f");

    let ops = Type::strukt("ops", vec![fp_ty()]);
    let g = b.add_global(m, "obj", ops.clone());
    let fref = b.function_ref(f);
    let init = b.const_aggregate(ops.clone(), vec![fref]).unwrap();
    b.set_initializer(g, init).unwrap();

    let _call = add_call_through_field(&mut b, m, "dispatch", &ops, 0);
    let program = b.finish();

    let analysis = IndirectCallAnalysis::seed(&program, AnalysisConfig::default());
    let results = analysis.resolve_all();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].targets, FuncSet::from([f]));
    assert_eq!(results[0].method, ResolutionMethod::MultiLayer);

    let stats = ResolutionStats::from_results(&results);
    assert_eq!(stats.total_calls, 1);
    assert_eq!(stats.multi_layer, 1);
    assert_eq!(stats.unresolved, 0);
    assert!((stats.average_targets() - 1.0).abs() < f64::EPSILON);
}

#[test]
fn cross_module_confinement_by_struct_name() {
    // The same source type lands in two modules as differently suffixed
    // clones; confinement in one module must refine calls in the other.
    let mut b = ProgramBuilder::new();
    let m1 = b.add_module("a.bc", DataLayout::default());
    let m2 = b.add_module("b.bc", DataLayout::default());

    let f = add_handler(&mut b, m1, "impl_read");
    let ops1 = Type::strukt("io_ops", vec![fp_ty()]);
    let ops2 = Type::strukt("io_ops.31", vec![fp_ty()]);

    let g = b.add_global(m1, "default_io", ops1.clone());
    let fref = b.function_ref(f);
    let init = b.const_aggregate(ops1, vec![fref]).unwrap();
    b.set_initializer(g, init).unwrap();

    let call = add_call_through_field(&mut b, m2, "dispatch", &ops2, 0);
    let program = b.finish();

    let analysis = IndirectCallAnalysis::seed(&program, AnalysisConfig::default());
    assert_eq!(
        analysis.callees_with_mlta(call).unwrap(),
        FuncSet::from([f])
    );
}

#[test]
fn field_insensitive_mode_is_a_superset() {
    let mut b = ProgramBuilder::new();
    let m = b.add_module("m.bc", DataLayout::default());
    let f = add_handler(&mut b, m, "f");
    let g = add_handler(&mut b, m, "g");

    let pair = Type::strukt("pair_ops", vec![fp_ty(), fp_ty()]);
    let ga = b.add_global(m, "a", pair.clone());
    let (fr, gr) = (b.function_ref(f), b.function_ref(g));
    let init = b.const_aggregate(pair.clone(), vec![fr, gr]).unwrap();
    b.set_initializer(ga, init).unwrap();

    let call = add_call_through_field(&mut b, m, "call1", &pair, 1);
    let program = b.finish();

    let sensitive = IndirectCallAnalysis::seed(&program, AnalysisConfig::default());
    let insensitive = IndirectCallAnalysis::seed(
        &program,
        AnalysisConfig::default().with_field_insensitive(true),
    );

    let precise = sensitive.callees_with_mlta(call).unwrap();
    let collapsed = insensitive.callees_with_mlta(call).unwrap();

    assert_eq!(precise, FuncSet::from([g]));
    // Collapsing the field dimension merges both fields' candidates.
    assert_eq!(collapsed, FuncSet::from([f, g]));
    assert!(precise.is_subset(&collapsed));
}
