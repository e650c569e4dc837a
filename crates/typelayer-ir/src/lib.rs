//! # typelayer-ir
//!
//! Whole-program intermediate representation consumed by the typelayer
//! analyses. This crate defines the structural type system, per-module data
//! layouts, and an SSA value graph covering the instruction and constant
//! shapes the call-target analysis walks: stores, loads, calls, casts,
//! phi/select, field accesses, and aggregate initializers.

pub mod builder;
pub mod error;
pub mod function;
pub mod layout;
pub mod module;
pub mod types;
pub mod value;

pub use builder::ProgramBuilder;
pub use error::Error;
pub use function::{Function, FunctionId, Intrinsic};
pub use layout::{DataLayout, StructLayout};
pub use module::{GlobalId, GlobalVariable, Module, ModuleId, Program};
pub use types::{FunctionType, StructType, Type};
pub use value::{CastKind, UnaryOp, ValueData, ValueId, ValueKind};
