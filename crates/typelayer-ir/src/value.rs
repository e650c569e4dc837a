//! The SSA value graph.
//!
//! Every program entity a dataflow walk can land on is a value: arguments,
//! instructions, constants, and references to functions and globals. Cast and
//! field-access operators cover both their instruction and constant-expression
//! forms with a single kind, so walks do not need to care which one produced
//! a node.

use serde::{Deserialize, Serialize};

use crate::function::FunctionId;
use crate::module::GlobalId;
use crate::types::Type;

/// Identifies a value in the program's value arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueId(pub u32);

/// The kind of a cast operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CastKind {
    /// Reinterpret a value at a different type of the same size.
    BitCast,
    /// Pointer to integer.
    PtrToInt,
    /// Integer to pointer.
    IntToPtr,
    /// Any other conversion (truncation, extension, fp casts).
    Other,
}

/// Unary operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    /// Floating-point negation.
    FNeg,
}

/// A value in the program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueData {
    /// Static type of the value.
    pub ty: Type,
    /// What the value is.
    pub kind: ValueKind,
    /// Owning function for arguments and instructions; `None` for constants
    /// and references.
    pub parent: Option<FunctionId>,
}

/// The payload of a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    /// Formal parameter of a function.
    Argument { index: u32 },

    /// The address of a function.
    FunctionRef(FunctionId),

    /// The address of a global variable.
    GlobalRef(GlobalId),

    /// Constant integer.
    ConstInt { value: i64 },

    /// Null pointer constant.
    ConstNull,

    /// Other constant data (zero initializers, strings, undef).
    ConstData,

    /// Constant aggregate: a structure, array, or vector initializer whose
    /// operands are themselves values.
    ConstAggregate { operands: Vec<ValueId> },

    /// Stack allocation; the value is a pointer to the allocated type.
    Alloca,

    /// Cast operator (instruction or constant expression).
    Cast { kind: CastKind, operand: ValueId },

    /// Field/element access: `base` is a pointer into `source_ty`, `indices`
    /// select the access path (instruction or constant expression).
    Gep {
        base: ValueId,
        source_ty: Type,
        indices: Vec<ValueId>,
    },

    /// Memory load through `ptr`.
    Load { ptr: ValueId },

    /// Memory store of `value` through `ptr`.
    Store { ptr: ValueId, value: ValueId },

    /// Function call. `callee` is the called operand; the call is indirect
    /// when the operand does not strip to a function reference.
    Call {
        callee: ValueId,
        args: Vec<ValueId>,
        inline_asm: bool,
    },

    /// SSA phi; only the incoming values matter to the analyses.
    Phi { incoming: Vec<ValueId> },

    /// Two-way select.
    Select {
        cond: ValueId,
        if_true: ValueId,
        if_false: ValueId,
    },

    /// Unary operator.
    Unary { op: UnaryOp, operand: ValueId },
}

impl ValueKind {
    /// Operand list of this value, in a stable order.
    pub fn operands(&self) -> Vec<ValueId> {
        match self {
            ValueKind::Argument { .. }
            | ValueKind::FunctionRef(_)
            | ValueKind::GlobalRef(_)
            | ValueKind::ConstInt { .. }
            | ValueKind::ConstNull
            | ValueKind::ConstData
            | ValueKind::Alloca => Vec::new(),
            ValueKind::ConstAggregate { operands } => operands.clone(),
            ValueKind::Cast { operand, .. } | ValueKind::Unary { operand, .. } => vec![*operand],
            ValueKind::Gep { base, indices, .. } => {
                let mut ops = vec![*base];
                ops.extend_from_slice(indices);
                ops
            }
            ValueKind::Load { ptr } => vec![*ptr],
            ValueKind::Store { ptr, value } => vec![*value, *ptr],
            ValueKind::Call { callee, args, .. } => {
                let mut ops = args.clone();
                ops.push(*callee);
                ops
            }
            ValueKind::Phi { incoming } => incoming.clone(),
            ValueKind::Select {
                cond,
                if_true,
                if_false,
            } => vec![*cond, *if_true, *if_false],
        }
    }

}

impl ValueData {
    /// Check if this value is an instruction: it lives in a function body and
    /// is not a formal parameter. A cast or field access used as a constant
    /// expression has no parent and is not an instruction.
    pub fn is_instruction(&self) -> bool {
        self.parent.is_some() && !matches!(self.kind, ValueKind::Argument { .. })
    }
}
