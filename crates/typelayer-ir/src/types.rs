//! Structural IR type representation.
//!
//! Types are plain trees: a pointer carries its pointee, a structure carries
//! its field list. Recursive structures are expressed with [`Type::Named`]
//! opaque references, which compare and digest like a named structure but
//! cannot be descended into.

use serde::{Deserialize, Serialize};

/// An IR type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Type {
    /// void
    Void,

    /// Integer of a given bit width.
    Integer { bits: u32 },

    /// Floating-point of a given bit width.
    Float { bits: u32 },

    /// Pointer to another type.
    Pointer(Box<Type>),

    /// Fixed-length array.
    Array { element: Box<Type>, len: u64 },

    /// SIMD vector.
    Vector { element: Box<Type>, len: u64 },

    /// Structure type.
    Struct(StructType),

    /// Function type.
    Function(FunctionType),

    /// Opaque named reference to a structure (forward or recursive use).
    Named(String),
}

/// Structure type details.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StructType {
    /// Optional structure name.
    pub name: Option<String>,
    /// Field types in declaration order.
    pub fields: Vec<Type>,
    /// Whether the structure is packed (no inter-field padding).
    pub packed: bool,
}

impl StructType {
    pub fn new(name: Option<String>, fields: Vec<Type>) -> Self {
        Self {
            name,
            fields,
            packed: false,
        }
    }
}

/// Function type details.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionType {
    /// Return type.
    pub return_type: Box<Type>,
    /// Parameter types.
    pub params: Vec<Type>,
    /// Whether the function accepts further arguments after `params`.
    pub variadic: bool,
}

impl FunctionType {
    pub fn new(return_type: Type, params: Vec<Type>) -> Self {
        Self {
            return_type: Box::new(return_type),
            params,
            variadic: false,
        }
    }

    pub fn variadic(mut self) -> Self {
        self.variadic = true;
        self
    }
}

impl Type {
    /// Check if this is a composite type (structure, array, or vector).
    ///
    /// Named references are opaque: they denote a structure but expose no
    /// fields, so they do not count as composite here.
    pub fn is_composite(&self) -> bool {
        matches!(
            self,
            Type::Struct(_) | Type::Array { .. } | Type::Vector { .. }
        )
    }

    /// Check if this is a pointer type.
    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Pointer(_))
    }

    /// Check if this is an integer type.
    pub fn is_integer(&self) -> bool {
        matches!(self, Type::Integer { .. })
    }

    /// Check if this is a structure type (named reference included).
    pub fn is_struct(&self) -> bool {
        matches!(self, Type::Struct(_) | Type::Named(_))
    }

    /// Check if this is a function type.
    pub fn is_function(&self) -> bool {
        matches!(self, Type::Function(_))
    }

    /// The pointed-to type, if this is a pointer.
    pub fn pointee(&self) -> Option<&Type> {
        match self {
            Type::Pointer(inner) => Some(inner),
            _ => None,
        }
    }

    /// The element type of an array or vector.
    pub fn element(&self) -> Option<&Type> {
        match self {
            Type::Array { element, .. } | Type::Vector { element, .. } => Some(element),
            _ => None,
        }
    }

    /// The integer bit width, if this is an integer.
    pub fn integer_bits(&self) -> Option<u32> {
        match self {
            Type::Integer { bits } => Some(*bits),
            _ => None,
        }
    }

    /// The structure name, canonicalized, for named structures and named
    /// references.
    pub fn struct_name(&self) -> Option<&str> {
        match self {
            Type::Struct(st) => st.name.as_deref().map(canonical_struct_name),
            Type::Named(name) => Some(canonical_struct_name(name)),
            _ => None,
        }
    }

    /// True for `i8*`, the generic byte pointer.
    pub fn is_byte_pointer(&self) -> bool {
        matches!(self.pointee(), Some(Type::Integer { bits: 8 }))
    }

    /// Strip all pointer indirection, returning the underlying type and the
    /// number of levels removed.
    pub fn strip_pointers(&self) -> (&Type, usize) {
        let mut ty = self;
        let mut levels = 0;
        while let Type::Pointer(inner) = ty {
            ty = inner;
            levels += 1;
        }
        (ty, levels)
    }

    /// Number of fields for structures, elements for arrays and vectors.
    pub fn composite_len(&self) -> Option<usize> {
        match self {
            Type::Struct(st) => Some(st.fields.len()),
            Type::Array { len, .. } | Type::Vector { len, .. } => Some(*len as usize),
            _ => None,
        }
    }

    /// The type of the field or element at `idx`, descending one composite
    /// level. Arrays and vectors ignore the index value.
    pub fn field_type(&self, idx: i64) -> Option<&Type> {
        match self {
            Type::Struct(st) => {
                if idx < 0 {
                    return None;
                }
                st.fields.get(idx as usize)
            }
            Type::Array { element, .. } | Type::Vector { element, .. } => Some(element),
            _ => None,
        }
    }
}

// Constructors, shorthand for tests and builders.
impl Type {
    pub fn void() -> Self {
        Type::Void
    }

    pub fn int(bits: u32) -> Self {
        Type::Integer { bits }
    }

    pub fn float(bits: u32) -> Self {
        Type::Float { bits }
    }

    pub fn ptr(inner: Type) -> Self {
        Type::Pointer(Box::new(inner))
    }

    /// The generic byte pointer, `i8*`.
    pub fn byte_ptr() -> Self {
        Type::ptr(Type::int(8))
    }

    pub fn array(element: Type, len: u64) -> Self {
        Type::Array {
            element: Box::new(element),
            len,
        }
    }

    pub fn vector(element: Type, len: u64) -> Self {
        Type::Vector {
            element: Box::new(element),
            len,
        }
    }

    pub fn strukt(name: impl Into<String>, fields: Vec<Type>) -> Self {
        Type::Struct(StructType::new(Some(name.into()), fields))
    }

    pub fn anon_struct(fields: Vec<Type>) -> Self {
        Type::Struct(StructType::new(None, fields))
    }

    pub fn func(return_type: Type, params: Vec<Type>) -> Self {
        Type::Function(FunctionType::new(return_type, params))
    }
}

/// Canonical form of a structure name: per-module clones of one source type
/// get numeric suffixes (`foo.123`), which are stripped so the clones agree.
pub fn canonical_struct_name(name: &str) -> &str {
    match name.rfind('.') {
        Some(dot) if name[dot + 1..].chars().all(|c| c.is_ascii_digit())
            && !name[dot + 1..].is_empty() =>
        {
            &name[..dot]
        }
        _ => name,
    }
}
