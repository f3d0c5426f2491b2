//! Error types for IR lowering.
//!
//! Wording is fixed per error kind so the driver's stderr output stays
//! stable across REPL turns and test runs.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LowerError {
    #[error("Unknown variable name")]
    UnknownVariable,

    #[error("Unknown function referenced")]
    UnknownFunction(String),

    #[error("Incorrect # arguments passed")]
    ArityMismatch,

    #[error("Unknown binary operator")]
    UnknownBinaryOperator,

    #[error("Unknown unary operator")]
    UnknownUnaryOperator,

    #[error("destination of '=' must be a variable")]
    AssignmentToNonVariable,

    #[error("Function cannot be redefined")]
    Redefinition(String),

    #[error("LLVM operation failed: {0}")]
    LlvmOperationFailed(String),
}

pub type Result<T> = std::result::Result<T, LowerError>;
