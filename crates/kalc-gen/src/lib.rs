//! kalc-gen - AST-to-LLVM-IR lowering and JIT installation.

pub mod codegen;
pub mod error;
pub mod jit;

pub use codegen::CodeGenerator;
pub use error::{LowerError, Result};
pub use jit::{create_context, create_target_machine, optimize_module, Jit};
