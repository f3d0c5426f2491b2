//! Shared symbol-table state: operator precedences, function prototypes.
//!
//! These types are owned by the driver and threaded through the parser (read
//! access to [`PrecedenceTable`]) and the lowerer (read/write access to both
//! tables). Keeping them in their own crate lets `kalc-par` and `kalc-gen`
//! share the exact same data without either depending on the other.

use std::collections::HashMap;

/// What kind of operator a [`Prototype`] declares, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorKind {
    /// An ordinary named function.
    None,
    /// `unary OP (x) ...` — the function name is `"unary" + OP`.
    Unary,
    /// `binary OP [prec] (x y) ...` — the function name is `"binary" + OP`.
    Binary,
}

/// A function's name, parameter list, and operator role — no body. Every
/// `extern` and `def` is registered as a `Prototype` in the
/// [`PrototypeRegistry`] so later modules can rematerialise a declaration for
/// a function they didn't define themselves.
#[derive(Debug, Clone)]
pub struct Prototype {
    pub name: String,
    pub params: Vec<String>,
    pub kind: OperatorKind,
    /// Only meaningful when `kind == OperatorKind::Binary`; in `[1, 100]`.
    pub precedence: Option<u8>,
}

impl Prototype {
    pub fn new(
        name: String,
        params: Vec<String>,
        kind: OperatorKind,
        precedence: Option<u8>,
    ) -> Self {
        Prototype {
            name,
            params,
            kind,
            precedence,
        }
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn is_binary_op(&self) -> bool {
        self.kind == OperatorKind::Binary
    }

    pub fn is_unary_op(&self) -> bool {
        self.kind == OperatorKind::Unary
    }

    /// The operator character this prototype installs, for `unary`/`binary`
    /// prototypes. `name` is always `"unary"` or `"binary"` followed by the
    /// single operator character for these, so the last char recovers it.
    pub fn operator_char(&self) -> Option<char> {
        match self.kind {
            OperatorKind::None => None,
            OperatorKind::Unary | OperatorKind::Binary => self.name.chars().last(),
        }
    }
}

/// Operator-precedence table for the Pratt/precedence-climbing parser.
///
/// Seeded with the built-in operators at startup; user `binary` definitions
/// install new entries at lowering time, rolling back on failure so the
/// table's keys are always exactly the built-ins plus the user binary
/// operators whose defining function is currently installed in some module.
#[derive(Debug, Clone)]
pub struct PrecedenceTable {
    table: HashMap<char, i32>,
}

impl PrecedenceTable {
    pub fn new() -> Self {
        let mut table = HashMap::new();
        table.insert('=', 2);
        table.insert('<', 10);
        table.insert('+', 20);
        table.insert('-', 20);
        table.insert('*', 40);
        PrecedenceTable { table }
    }

    /// Precedence of `c`, or `-1` if `c` isn't a declared operator (forcing
    /// the precedence-climbing parser to stop).
    pub fn precedence_of(&self, c: char) -> i32 {
        if !c.is_ascii() {
            return -1;
        }
        match self.table.get(&c) {
            Some(&p) if p > 0 => p,
            _ => -1,
        }
    }

    pub fn contains(&self, c: char) -> bool {
        self.table.contains_key(&c)
    }

    /// Install `c -> prec`, returning whatever was previously there so the
    /// caller can restore it verbatim on a failed definition.
    pub fn install(&mut self, c: char, prec: u8) -> Option<i32> {
        self.table.insert(c, prec as i32)
    }

    /// Undo an `install`: restore the previous entry, or remove `c` entirely
    /// if there wasn't one.
    pub fn restore(&mut self, c: char, previous: Option<i32>) {
        match previous {
            Some(p) => {
                self.table.insert(c, p);
            }
            None => {
                self.table.remove(&c);
            }
        }
    }
}

impl Default for PrecedenceTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Cross-module registry of the most-recently-parsed prototype for each
/// function name. Populated by every parsed `extern` and `def`; survives
/// across modules for the lifetime of the process, letting the lowerer
/// rematerialise a declaration in a new module for any function defined or
/// declared earlier.
#[derive(Debug, Clone, Default)]
pub struct PrototypeRegistry {
    protos: HashMap<String, Prototype>,
}

impl PrototypeRegistry {
    pub fn new() -> Self {
        PrototypeRegistry {
            protos: HashMap::new(),
        }
    }

    pub fn insert(&mut self, proto: Prototype) {
        self.protos.insert(proto.name.clone(), proto);
    }

    pub fn get(&self, name: &str) -> Option<&Prototype> {
        self.protos.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeds_builtin_precedences() {
        let table = PrecedenceTable::new();
        assert_eq!(table.precedence_of('='), 2);
        assert_eq!(table.precedence_of('<'), 10);
        assert_eq!(table.precedence_of('+'), 20);
        assert_eq!(table.precedence_of('-'), 20);
        assert_eq!(table.precedence_of('*'), 40);
        assert_eq!(table.precedence_of('%'), -1);
    }

    #[test]
    fn install_and_restore_roundtrips() {
        let mut table = PrecedenceTable::new();
        let previous = table.install(':', 1);
        assert_eq!(previous, None);
        assert_eq!(table.precedence_of(':'), 1);

        table.restore(':', previous);
        assert_eq!(table.precedence_of(':'), -1);
        assert!(!table.contains(':'));
    }

    #[test]
    fn restore_brings_back_shadowed_precedence() {
        let mut table = PrecedenceTable::new();
        let previous = table.install('+', 5);
        assert_eq!(previous, Some(20));
        assert_eq!(table.precedence_of('+'), 5);

        table.restore('+', previous);
        assert_eq!(table.precedence_of('+'), 20);
    }

    #[test]
    fn registry_tracks_arity() {
        let mut registry = PrototypeRegistry::new();
        registry.insert(Prototype::new(
            "foo".to_string(),
            vec!["x".to_string()],
            OperatorKind::None,
            None,
        ));
        assert_eq!(registry.get("foo").unwrap().arity(), 1);
        assert!(registry.get("bar").is_none());
    }

    #[test]
    fn operator_char_recovers_from_synthesized_name() {
        let proto = Prototype::new(
            "binary:".to_string(),
            vec!["x".to_string(), "y".to_string()],
            OperatorKind::Binary,
            Some(1),
        );
        assert_eq!(proto.operator_char(), Some(':'));
    }
}
