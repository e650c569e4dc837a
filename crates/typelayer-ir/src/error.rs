//! Error types for typelayer-ir.

use thiserror::Error;

/// IR construction error.
#[derive(Error, Debug)]
pub enum Error {
    /// A global variable was given a second initializer.
    #[error("global {0:?} already has an initializer")]
    AlreadyInitialized(crate::GlobalId),

    /// An initializer's type does not match the global's value type.
    #[error("initializer type mismatch for global {0:?}")]
    InitializerTypeMismatch(crate::GlobalId),

    /// A struct constant was built with the wrong number of operands.
    #[error("aggregate operand count {got} does not match {expected} declared fields")]
    MalformedAggregate { expected: usize, got: usize },
}
