//! JIT installation and the fixed optimisation pipeline.
//!
//! inkwell's `ExecutionEngine` is tied to a single `Context` for its whole
//! lifetime, unlike LLVM ORC's `ThreadSafeModule`/`ResourceTracker` pair. We
//! adapt by keeping one `Context` for the whole process and only ever
//! allocating a fresh `Module` per top-level item; `add_module`/
//! `remove_module` play the role ORC's resource tracker would: installing a
//! module's functions into the running process and later reclaiming them.

use inkwell::context::Context;
use inkwell::execution_engine::ExecutionEngine;
use inkwell::module::Module;
use inkwell::passes::PassBuilderOptions;
use inkwell::targets::{CodeModel, InitializationConfig, RelocMode, Target, TargetMachine};
use inkwell::OptimizationLevel;

use crate::error::{LowerError, Result};

/// The fixed optimisation pipeline: promote allocas to registers, then the
/// usual scalar cleanups. Run once per module, after every item in it has
/// been lowered.
const OPT_PASSES: &str = "mem2reg,instcombine,reassociate,gvn,simplifycfg";

pub fn create_target_machine() -> Result<TargetMachine> {
    Target::initialize_native(&InitializationConfig::default())
        .map_err(LowerError::LlvmOperationFailed)?;
    let triple = TargetMachine::get_default_triple();
    let target = Target::from_triple(&triple)
        .map_err(|e| LowerError::LlvmOperationFailed(e.to_string()))?;
    target
        .create_target_machine(
            &triple,
            &TargetMachine::get_host_cpu_name().to_string_lossy(),
            &TargetMachine::get_host_cpu_features().to_string_lossy(),
            OptimizationLevel::None,
            RelocMode::Default,
            CodeModel::Default,
        )
        .ok_or_else(|| LowerError::LlvmOperationFailed("no target machine for host triple".to_string()))
}

pub fn optimize_module(module: &Module<'_>, machine: &TargetMachine) -> Result<()> {
    module
        .run_passes(OPT_PASSES, machine, PassBuilderOptions::create())
        .map_err(|e| LowerError::LlvmOperationFailed(e.to_string()))
}

/// Wraps the process-lifetime `ExecutionEngine`. Every top-level item's
/// module is installed here; anonymous expressions are installed, called,
/// and removed again within the same driver turn.
pub struct Jit<'ctx> {
    engine: ExecutionEngine<'ctx>,
}

impl<'ctx> Jit<'ctx> {
    /// Creates the engine from the first module the driver builds (typically
    /// the runtime prelude). The module becomes part of the engine as a side
    /// effect of this call; do not also `install` it.
    pub fn new(bootstrap_module: &Module<'ctx>) -> Result<Self> {
        let engine = bootstrap_module
            .create_jit_execution_engine(OptimizationLevel::None)
            .map_err(|e| LowerError::LlvmOperationFailed(e.to_string()))?;
        Ok(Jit { engine })
    }

    pub fn install(&self, module: &Module<'ctx>) -> Result<()> {
        log::debug!("installing module '{}' into the JIT", module.get_name().to_string_lossy());
        self.engine
            .add_module(module)
            .map_err(|()| LowerError::LlvmOperationFailed("module already installed".to_string()))
    }

    pub fn release(&self, module: &Module<'ctx>) -> Result<()> {
        log::debug!("releasing module '{}' from the JIT", module.get_name().to_string_lossy());
        self.engine
            .remove_module(module)
            .map_err(|e| LowerError::LlvmOperationFailed(e.to_string()))
    }

    /// Bind a runtime symbol (`putchard`, `printd`, ...) declared as an
    /// `extern` in some module to its native address, sidestepping reliance
    /// on the host binary exporting the symbol via `-rdynamic`/dlsym.
    pub fn add_global_mapping(&self, function: &inkwell::values::FunctionValue<'ctx>, address: usize) {
        self.engine.add_global_mapping(function, address);
    }

    /// Look up and call a zero-argument `f64`-returning function, i.e. the
    /// anonymous top-level expression.
    pub fn call_nullary_f64(&self, name: &str) -> Result<f64> {
        unsafe {
            let f = self
                .engine
                .get_function::<unsafe extern "C" fn() -> f64>(name)
                .map_err(|e| LowerError::LlvmOperationFailed(e.to_string()))?;
            Ok(f.call())
        }
    }
}

pub fn create_context() -> Context {
    Context::create()
}
