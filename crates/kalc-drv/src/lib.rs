//! kalc-drv - the `kalc` CLI/REPL driver.
//!
//! Owns all shared mutable state: the current LLVM context (process-lifetime;
//! inkwell ties one `ExecutionEngine` to a single `Context` for its whole
//! life, so unlike the classic per-item `InitializeModuleAndManagers()`
//! pattern we allocate the context once and a fresh
//! [`kalc_gen::CodeGenerator`]/`Module` per top-level item instead), the
//! operator-precedence table, the prototype registry, and the lexer's input
//! stream. Everything here runs on one thread with no suspension points.

use std::io::{self, Write};
use std::path::PathBuf;

use inkwell::context::Context;
use inkwell::targets::TargetMachine;
use thiserror::Error;

use kalc_gen::{create_context, create_target_machine, optimize_module, CodeGenerator, Jit};
use kalc_lex::Lexer;
use kalc_par::{Parser, TopLevelItem, ANON_EXPR_NAME};
use kalc_util::{report, Level, PrecedenceTable, PrototypeRegistry};

/// Command-line configuration, hand-parsed from `std::env::args` (no `clap`
/// dependency in this crate).
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// `--llvmir`: emit textual IR to stdout instead of executing bare
    /// expressions.
    pub emit_ir: bool,
    /// `-v`/`--verbose`: internal diagnostics (read-items, IR dumps,
    /// file-load messages) via the `log` crate.
    pub verbose: bool,
    /// Positional source file. `None` starts the REPL on standard input.
    pub input_file: Option<PathBuf>,
}

/// What `Config::parse_args` decided to do: print help and stop, or run the
/// driver with a parsed configuration.
#[derive(Debug, Clone)]
pub enum Action {
    Help,
    Run(Config),
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("could not open source file: {0}")]
    Io(#[from] io::Error),
    #[error("unrecognized argument: {0}")]
    InvalidArgs(String),
    #[error("{0}")]
    Jit(#[from] kalc_gen::LowerError),
}

pub type Result<T> = std::result::Result<T, DriverError>;

const USAGE: &str = "\
Usage: kalc [options] [file]

A just-in-time compiler and interactive evaluator for the kalc numeric
language. With no FILE, starts a REPL on standard input.

Options:
  --llvmir        emit textual LLVM IR to stdout instead of executing
  -v, --verbose   print internal diagnostics (read items, IR dumps) to stderr
  -h, --help      print this help text and exit
";

impl Config {
    /// Parses a CLI argument vector (excluding argv[0]). Recognises
    /// `--llvmir`, `-v`/`--verbose`, `-h`/`--help`, and at most one
    /// positional file path.
    pub fn parse_args<I>(args: I) -> Result<Action>
    where
        I: IntoIterator<Item = String>,
    {
        let mut emit_ir = false;
        let mut verbose = false;
        let mut input_file = None;

        for arg in args {
            match arg.as_str() {
                "-h" | "--help" => return Ok(Action::Help),
                "-v" | "--verbose" => verbose = true,
                "--llvmir" => emit_ir = true,
                other if other.starts_with('-') && other != "-" => {
                    return Err(DriverError::InvalidArgs(other.to_string()));
                }
                other => {
                    if input_file.is_some() {
                        return Err(DriverError::InvalidArgs(format!(
                            "unexpected positional argument: {other}"
                        )));
                    }
                    input_file = Some(PathBuf::from(other));
                }
            }
        }

        Ok(Action::Run(Config {
            emit_ir,
            verbose,
            input_file,
        }))
    }
}

pub fn print_usage() {
    print!("{USAGE}");
}

/// Installs `env_logger` filtered to `debug` when `-v`/`--verbose` is set,
/// `warn` otherwise, independent of the unconditional user-facing diagnostics
/// that go through [`kalc_util::diagnostic::report`].
pub fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .try_init();
}

/// Top-level entry point used by `main.rs`. Parses arguments, sets up
/// logging, and runs the compile/execute loop.
pub fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match Config::parse_args(args)? {
        Action::Help => {
            print_usage();
            Ok(())
        }
        Action::Run(config) => {
            init_logging(config.verbose);
            run(config)
        }
    }
}

/// Loads the embedded runtime prelude's `extern` declarations into a
/// bootstrap module, binds their native addresses, and returns the `Jit`
/// that every later module installs into.
fn bootstrap<'ctx>(
    context: &'ctx Context,
    precedence: &PrecedenceTable,
    registry: &mut PrototypeRegistry,
) -> Result<Jit<'ctx>> {
    let mut lexer = Lexer::new();
    lexer.set_str(kalc_runtime::RUNTIME_PRELUDE);
    let mut parser = Parser::new(lexer);

    let mut generator = CodeGenerator::new(context, "kalc_runtime_prelude");
    while !parser.is_eof() {
        if parser.is_semicolon() {
            parser.skip_token();
            continue;
        }
        let item = parser
            .parse_item(precedence)
            .expect("embedded runtime prelude must parse");
        match item {
            TopLevelItem::Extern(proto) => {
                generator
                    .lower_extern(proto, registry)
                    .expect("embedded runtime prelude must lower");
            }
            other => unreachable!("runtime prelude only declares externs, got {other:?}"),
        }
    }

    let module = generator.into_module();
    let jit = Jit::new(&module)?;
    for (name, address) in kalc_runtime::native_symbols() {
        if let Some(function) = module.get_function(name) {
            jit.add_global_mapping(&function, *address);
        }
    }
    Ok(jit)
}

/// The per-top-level-item compile/execute loop.
pub fn run(config: Config) -> Result<()> {
    let context = create_context();
    let target_machine = create_target_machine()?;

    let mut precedence = PrecedenceTable::new();
    let mut registry = PrototypeRegistry::new();

    let jit = bootstrap(&context, &precedence, &mut registry)?;

    let mut lexer = Lexer::new();
    match &config.input_file {
        Some(path) => {
            lexer.set_file(path)?;
            log::debug!("loaded source file {}", path.display());
        }
        None => lexer.reset_to_stdin(),
    }
    let mut parser = Parser::new(lexer);

    let mut item_counter: u64 = 0;

    loop {
        eprint!("> ");
        let _ = io::stderr().flush();

        if parser.is_eof() {
            break;
        }
        if parser.is_semicolon() {
            parser.skip_token();
            continue;
        }

        match parser.parse_item(&precedence) {
            Ok(item) => {
                item_counter += 1;
                process_item(
                    item,
                    item_counter,
                    &context,
                    &jit,
                    &target_machine,
                    &mut precedence,
                    &mut registry,
                    &config,
                )?;
            }
            Err(e) => {
                report(Level::Error, &e.to_string());
                parser.skip_token();
            }
        }
    }

    Ok(())
}

/// Lowers and installs one top-level item into its own fresh module,
/// executing and releasing the resource handle if it's a bare expression.
/// Parse/lowering errors are reported to stderr and otherwise swallowed;
/// JIT/optimizer failures propagate as fatal [`DriverError`]s.
fn process_item<'ctx>(
    item: TopLevelItem,
    item_counter: u64,
    context: &'ctx Context,
    jit: &Jit<'ctx>,
    target_machine: &TargetMachine,
    precedence: &mut PrecedenceTable,
    registry: &mut PrototypeRegistry,
    config: &Config,
) -> Result<()> {
    match item {
        TopLevelItem::Definition(func) => {
            let name = func.proto.name.clone();
            let module_name = format!("def_{item_counter}_{name}");
            let mut generator = CodeGenerator::new(context, &module_name);
            match generator.lower_function(func, precedence, registry) {
                Ok(_) => {
                    let module = generator.into_module();
                    optimize_module(&module, target_machine)?;
                    log::debug!("defined function '{name}'");
                    if config.verbose {
                        log::debug!("module '{module_name}' IR:\n{}", module.print_to_string().to_string());
                    }
                    if config.emit_ir {
                        print!("{}", module.print_to_string().to_string());
                    }
                    jit.install(&module)?;
                }
                Err(e) => report(Level::Error, &e.to_string()),
            }
        }

        TopLevelItem::Extern(proto) => {
            let name = proto.name.clone();
            let module_name = format!("extern_{item_counter}_{name}");
            let mut generator = CodeGenerator::new(context, &module_name);
            match generator.lower_extern(proto, registry) {
                Ok(_) => {
                    let module = generator.into_module();
                    log::debug!("declared extern '{name}'");
                    if config.emit_ir {
                        print!("{}", module.print_to_string().to_string());
                    }
                    jit.install(&module)?;
                }
                Err(e) => report(Level::Error, &e.to_string()),
            }
        }

        TopLevelItem::Expression(func) => {
            let module_name = format!("anon_expr_{item_counter}");
            let mut generator = CodeGenerator::new(context, &module_name);
            match generator.lower_function(func, precedence, registry) {
                Ok(_) => {
                    let module = generator.into_module();
                    optimize_module(&module, target_machine)?;
                    if config.verbose {
                        log::debug!("module '{module_name}' IR:\n{}", module.print_to_string().to_string());
                    }
                    if config.emit_ir {
                        print!("{}", module.print_to_string().to_string());
                    } else {
                        jit.install(&module)?;
                        let value = jit.call_nullary_f64(ANON_EXPR_NAME)?;
                        println!("{value:.6}");
                        jit.release(&module)?;
                    }
                }
                Err(e) => report(Level::Error, &e.to_string()),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_help_flag() {
        let action = Config::parse_args(vec!["--help".to_string()]).unwrap();
        assert!(matches!(action, Action::Help));

        let action = Config::parse_args(vec!["-h".to_string()]).unwrap();
        assert!(matches!(action, Action::Help));
    }

    #[test]
    fn parses_verbose_and_llvmir_and_file() {
        let action = Config::parse_args(vec![
            "--verbose".to_string(),
            "--llvmir".to_string(),
            "prog.kal".to_string(),
        ])
        .unwrap();
        let Action::Run(config) = action else {
            panic!("expected Action::Run");
        };
        assert!(config.verbose);
        assert!(config.emit_ir);
        assert_eq!(config.input_file, Some(PathBuf::from("prog.kal")));
    }

    #[test]
    fn rejects_unknown_flag() {
        let result = Config::parse_args(vec!["--bogus".to_string()]);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_second_positional_argument() {
        let result = Config::parse_args(vec!["a.kal".to_string(), "b.kal".to_string()]);
        assert!(result.is_err());
    }

    #[test]
    fn defaults_have_no_file_and_quiet_execution() {
        let action = Config::parse_args(Vec::<String>::new()).unwrap();
        let Action::Run(config) = action else {
            panic!("expected Action::Run");
        };
        assert!(!config.verbose);
        assert!(!config.emit_ir);
        assert!(config.input_file.is_none());
    }
}
