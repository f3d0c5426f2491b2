//! kalc-par - recursive-descent / operator-precedence parsing.
//!
//! Turns a [`kalc_lex::Lexer`]'s token stream into one [`TopLevelItem`] at a
//! time. Binary operator precedence is read from, and in the case of
//! `binary` declarations later written to, a shared [`kalc_util::PrecedenceTable`]
//! owned by the driver — the parser only ever borrows it.

pub mod ast;
pub mod parser;

pub use ast::{Expr, Function, TopLevelItem, ANON_EXPR_NAME};
pub use parser::{ParseError, Parser};
