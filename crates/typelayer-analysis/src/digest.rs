//! Content digests for types, slots, and call signatures.
//!
//! Digests are the primary keys of every cross-module map in the analysis.
//! They are computed from the structural content of a type under a data
//! layout, so two modules compiled against the same layout produce the same
//! digest for the same type. Named structures digest by their canonical name
//! alone, which keeps per-module clones of one source type (and recursive
//! structures) in agreement.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use typelayer_ir::{DataLayout, FunctionId, FunctionType, Program, Type, ValueId, ValueKind};

// Domain tags keep the digest spaces of types, slots, and signatures apart.
const TAG_TYPE: u8 = 0x71;
const TAG_SLOT: u8 = 0x51;
const TAG_SIGNATURE: u8 = 0x5f;

/// Digest of a type under a data layout.
pub fn type_hash(ty: &Type, layout: &DataLayout) -> u64 {
    let mut hasher = DefaultHasher::new();
    TAG_TYPE.hash(&mut hasher);
    layout.pointer_bits.hash(&mut hasher);
    hash_type(ty, &mut hasher);
    hasher.finish()
}

/// Digest of a (type, field-index) slot, distinct from any plain type digest.
pub fn type_idx_hash(ty: &Type, layout: &DataLayout, idx: i64) -> u64 {
    let mut hasher = DefaultHasher::new();
    TAG_SLOT.hash(&mut hasher);
    type_hash(ty, layout).hash(&mut hasher);
    idx.hash(&mut hasher);
    hasher.finish()
}

/// Digest of the signature observed at a call site: the callee operand's
/// function type, stripped of pointer indirection.
pub fn call_hash(program: &Program, call: ValueId) -> u64 {
    let layout = program.layout_of_value(call);
    let callee = match &program.value(call).kind {
        ValueKind::Call { callee, .. } => *callee,
        other => panic!("call_hash on non-call value: {other:?}"),
    };
    let (base, _) = program.ty(callee).strip_pointers();
    match base {
        Type::Function(ft) => signature_hash(ft, &layout),
        other => type_hash(other, &layout),
    }
}

/// Digest of a function's declared signature; matches [`call_hash`] for
/// signature-compatible call sites.
pub fn func_hash(program: &Program, f: FunctionId) -> u64 {
    let func = program.function(f);
    let layout = *program.layout(func.module);
    signature_hash(&func.ty, &layout)
}

fn signature_hash(ft: &FunctionType, layout: &DataLayout) -> u64 {
    let mut hasher = DefaultHasher::new();
    TAG_SIGNATURE.hash(&mut hasher);
    layout.pointer_bits.hash(&mut hasher);
    ft.variadic.hash(&mut hasher);
    hash_type(&ft.return_type, &mut hasher);
    ft.params.len().hash(&mut hasher);
    for param in &ft.params {
        hash_type(param, &mut hasher);
    }
    hasher.finish()
}

fn hash_type(ty: &Type, hasher: &mut DefaultHasher) {
    match ty {
        Type::Void => 0u8.hash(hasher),
        Type::Integer { bits } => {
            1u8.hash(hasher);
            bits.hash(hasher);
        }
        Type::Float { bits } => {
            2u8.hash(hasher);
            bits.hash(hasher);
        }
        Type::Pointer(inner) => {
            3u8.hash(hasher);
            hash_type(inner, hasher);
        }
        Type::Array { element, len } => {
            4u8.hash(hasher);
            len.hash(hasher);
            hash_type(element, hasher);
        }
        Type::Vector { element, len } => {
            5u8.hash(hasher);
            len.hash(hasher);
            hash_type(element, hasher);
        }
        // Named structures (and opaque references to them) digest by
        // canonical name only; anonymous structures by field sequence.
        Type::Struct(_) | Type::Named(_) => match ty.struct_name() {
            Some(name) => {
                6u8.hash(hasher);
                name.hash(hasher);
            }
            None => {
                let Type::Struct(st) = ty else { unreachable!() };
                7u8.hash(hasher);
                st.fields.len().hash(hasher);
                for field in &st.fields {
                    hash_type(field, hasher);
                }
            }
        },
        Type::Function(ft) => {
            8u8.hash(hasher);
            ft.variadic.hash(hasher);
            hash_type(&ft.return_type, hasher);
            ft.params.len().hash(hasher);
            for param in &ft.params {
                hash_type(param, hasher);
            }
        }
    }
}
