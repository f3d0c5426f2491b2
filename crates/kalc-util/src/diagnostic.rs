//! Minimal diagnostic reporting.
//!
//! The source language has no error recovery beyond a single-token skip, so
//! diagnostics here are a severity plus a message, written straight to
//! stderr. There is no span tracking: the lexer and parser don't carry
//! source positions, so every diagnostic is just a short message.

use std::fmt;

/// Diagnostic severity. Only `Error` is produced by this compiler today, but
/// the level is kept as its own type (rather than always printing "error:")
/// so a future warning class doesn't need a signature change everywhere.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Error => write!(f, "error"),
        }
    }
}

/// Print `message` to stderr prefixed by `level`. This is the single place
/// user-facing parse/lowering diagnostics funnel through; it is independent
/// of the `-v`/`--verbose` log filter, since the source-language author
/// needs to see these regardless of how the driver is invoked.
pub fn report(level: Level, message: &str) {
    eprintln!("{}: {}", level, message);
}
