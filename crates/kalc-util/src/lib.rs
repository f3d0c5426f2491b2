//! kalc-util - shared symbol-table types and diagnostic reporting.
//!
//! This crate holds the state that is shared across the lexer/parser and the
//! IR lowerer but belongs to neither: operator precedences, the cross-module
//! function prototype registry, and the small diagnostic reporter every other
//! crate funnels its user-facing error messages through.

pub mod diagnostic;
pub mod symbols;

pub use diagnostic::{report, Level};
pub use symbols::{OperatorKind, PrecedenceTable, Prototype, PrototypeRegistry};
