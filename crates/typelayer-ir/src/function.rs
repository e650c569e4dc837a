//! Functions and their analysis-relevant flags.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::module::ModuleId;
use crate::types::FunctionType;
use crate::value::ValueId;

/// Identifies a function across the whole program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionId(pub u32);

/// Intrinsic classification. Memory copies get their own kind because the
/// propagation analysis treats them as stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intrinsic {
    /// A `memcpy`-style aggregate copy.
    MemCpy,
    /// Any other compiler intrinsic.
    Other,
}

/// A function in the program.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    /// Symbol name.
    pub name: String,
    /// Module that carries this function.
    pub module: ModuleId,
    /// Signature type.
    pub ty: FunctionType,
    /// Whether the function's address flows into a value somewhere in the
    /// program (it is used other than as a direct callee).
    pub is_address_taken: bool,
    /// Intrinsic classification, if this is a compiler intrinsic.
    pub intrinsic: Option<Intrinsic>,
    /// Whether the function has a body in its module. Declarations are
    /// resolved to their defining module through the guid.
    pub is_definition: bool,
    /// Stable identity derived from the name, shared between a declaration
    /// and its definition across modules.
    pub guid: u64,
    /// Formal parameters, as argument values.
    pub params: Vec<ValueId>,
    /// Body instructions in program order (empty for declarations).
    pub instructions: Vec<ValueId>,
}

impl Function {
    /// Check if this is a compiler intrinsic.
    pub fn is_intrinsic(&self) -> bool {
        self.intrinsic.is_some()
    }

    /// Check if this is a memory-copy intrinsic.
    pub fn is_memcpy(&self) -> bool {
        self.intrinsic == Some(Intrinsic::MemCpy)
    }

    /// Check if the signature is variadic.
    pub fn is_variadic(&self) -> bool {
        self.ty.variadic
    }

    /// Number of formal parameters.
    pub fn arg_size(&self) -> usize {
        self.params.len()
    }

    /// The formal parameter at `index`, if within bounds.
    pub fn param(&self, index: usize) -> Option<ValueId> {
        self.params.get(index).copied()
    }
}

/// Global identity of a function name, shared by declarations and the
/// definition.
pub fn function_guid(name: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guid_stable() {
        assert_eq!(function_guid("open"), function_guid("open"));
        assert_ne!(function_guid("open"), function_guid("close"));
    }
}
