//! kalc-runtime - the two foreign functions the source language can call.
//!
//! These are plain Rust functions exported with a stable `extern "C"` ABI;
//! the driver binds their addresses into the JIT via `add_global_mapping`
//! rather than relying on the host process exporting them dynamically.

use std::io::Write;

/// Writes `x` truncated to a byte as a character to standard output, and
/// returns `0.0` (the source language has no `unit` type, so every foreign
/// function returns something).
#[no_mangle]
pub extern "C" fn kalc_putchard(x: f64) -> f64 {
    let byte = x as u8 as char;
    print!("{byte}");
    let _ = std::io::stdout().flush();
    0.0
}

/// Prints `x` as a double followed by a newline, and returns `0.0`.
#[no_mangle]
pub extern "C" fn kalc_printd(x: f64) -> f64 {
    println!("{x:.6}");
    0.0
}

/// Name-to-address table for the symbols the runtime prelude declares,
/// consulted by the driver when it installs each `extern` into the JIT.
pub fn native_symbols() -> &'static [(&'static str, usize)] {
    &[
        ("putchard", kalc_putchard as usize),
        ("printd", kalc_printd as usize),
    ]
}

/// `extern` declarations loaded before any user input, so `putchard`/`printd`
/// are callable from the first REPL turn or file onward.
pub const RUNTIME_PRELUDE: &str = include_str!("runtime.kal");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_functions_always_return_zero() {
        assert_eq!(kalc_putchard(65.0), 0.0);
        assert_eq!(kalc_printd(3.5), 0.0);
    }

    #[test]
    fn native_symbols_cover_every_prelude_extern() {
        let names: Vec<&str> = native_symbols().iter().map(|(name, _)| *name).collect();
        assert!(names.contains(&"putchard"));
        assert!(names.contains(&"printd"));
        assert!(native_symbols().iter().all(|(_, addr)| *addr != 0));
    }

    #[test]
    fn prelude_declares_exactly_the_native_symbols() {
        for (name, _) in native_symbols() {
            assert!(
                RUNTIME_PRELUDE.contains(&format!("extern {name}(")),
                "prelude is missing an extern declaration for {name}"
            );
        }
    }
}
