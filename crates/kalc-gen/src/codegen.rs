//! AST → LLVM IR lowering.
//!
//! One [`CodeGenerator`] is created per top-level item and owns exactly one
//! fresh [`Module`]; the driver hands that module to the JIT once lowering
//! succeeds and discards the generator. Every local binding — function
//! parameters, `for` induction variables, `var` bindings — is realised as an
//! `alloca` in the function's entry block rather than as a φ-node; the
//! register-promotion pass in the fixed optimisation pipeline is relied on to
//! turn these back into SSA registers. `if/then/else` is the one construct
//! that does need a real φ, since its value is produced by two genuinely
//! different control-flow paths.

use std::collections::HashMap;

use inkwell::builder::Builder;
use inkwell::context::Context;
use inkwell::module::Module;
use inkwell::values::{BasicValue, BasicValueEnum, FunctionValue, PointerValue};
use inkwell::FloatPredicate;

use kalc_par::ast::{Expr, Function};
use kalc_util::{PrecedenceTable, Prototype, PrototypeRegistry};

use crate::error::{LowerError, Result};

pub struct CodeGenerator<'ctx> {
    context: &'ctx Context,
    module: Module<'ctx>,
    builder: Builder<'ctx>,
    variables: HashMap<String, PointerValue<'ctx>>,
    current_function: Option<FunctionValue<'ctx>>,
}

impl<'ctx> CodeGenerator<'ctx> {
    pub fn new(context: &'ctx Context, module_name: &str) -> Self {
        CodeGenerator {
            context,
            module: context.create_module(module_name),
            builder: context.create_builder(),
            variables: HashMap::new(),
            current_function: None,
        }
    }

    pub fn module(&self) -> &Module<'ctx> {
        &self.module
    }

    pub fn into_module(self) -> Module<'ctx> {
        self.module
    }

    /// Declare (without a body) the LLVM function for `proto`, or return the
    /// one already present in this module.
    pub fn declare_prototype(&mut self, proto: &Prototype) -> FunctionValue<'ctx> {
        if let Some(existing) = self.module.get_function(&proto.name) {
            return existing;
        }
        let f64_type = self.context.f64_type();
        let param_types: Vec<_> = (0..proto.arity()).map(|_| f64_type.into()).collect();
        let fn_type = f64_type.fn_type(&param_types, false);
        let function = self.module.add_function(&proto.name, fn_type, None);
        for (param, name) in function.get_param_iter().zip(proto.params.iter()) {
            param.into_float_value().set_name(name);
        }
        function
    }

    /// `extern` lowering: declare the prototype and record it in the global
    /// registry so later modules (and this one, for forward references) can
    /// find it.
    pub fn lower_extern(
        &mut self,
        proto: Prototype,
        registry: &mut PrototypeRegistry,
    ) -> Result<FunctionValue<'ctx>> {
        let function = self.declare_prototype(&proto);
        registry.insert(proto);
        Ok(function)
    }

    /// `def` (and the synthetic `__anon_expr` wrapper) lowering.
    pub fn lower_function(
        &mut self,
        func: Function,
        precedence: &mut PrecedenceTable,
        registry: &mut PrototypeRegistry,
    ) -> Result<FunctionValue<'ctx>> {
        let Function { proto, body } = func;

        if let Some(existing) = self.module.get_function(&proto.name) {
            if existing.count_basic_blocks() > 0 {
                return Err(LowerError::Redefinition(proto.name));
            }
        }

        log::debug!("lowering function '{}' ({} param(s))", proto.name, proto.arity());
        registry.insert(proto.clone());

        let previous_precedence = if proto.is_binary_op() {
            let op = proto.operator_char().unwrap_or('\0');
            let prec = proto.precedence.unwrap_or(30);
            Some((op, precedence.install(op, prec)))
        } else {
            None
        };

        match self.lower_function_body(&proto, &body, registry) {
            Ok(function) => Ok(function),
            Err(e) => {
                if let Some(function) = self.module.get_function(&proto.name) {
                    unsafe { function.delete() };
                }
                if let Some((op, prev)) = previous_precedence {
                    precedence.restore(op, prev);
                }
                Err(e)
            }
        }
    }

    fn lower_function_body(
        &mut self,
        proto: &Prototype,
        body: &Expr,
        registry: &PrototypeRegistry,
    ) -> Result<FunctionValue<'ctx>> {
        let function = self.declare_prototype(proto);
        let entry = self.context.append_basic_block(function, "entry");
        self.builder.position_at_end(entry);

        self.variables.clear();
        self.current_function = Some(function);
        for (param, name) in function.get_param_iter().zip(proto.params.iter()) {
            let alloca = self.create_entry_alloca(function, name)?;
            self.builder
                .build_store(alloca, param.into_float_value())
                .map_err(llvm_err)?;
            self.variables.insert(name.clone(), alloca);
        }

        let return_value = self.lower_expr(body, registry)?;
        self.builder
            .build_return(Some(&return_value))
            .map_err(llvm_err)?;

        if !function.verify(true) {
            return Err(LowerError::LlvmOperationFailed(format!(
                "function '{}' failed verification",
                proto.name
            )));
        }
        Ok(function)
    }

    fn create_entry_alloca(
        &self,
        function: FunctionValue<'ctx>,
        name: &str,
    ) -> Result<PointerValue<'ctx>> {
        let entry_builder = self.context.create_builder();
        let entry = function
            .get_first_basic_block()
            .expect("function has an entry block by the time locals are allocated");
        match entry.get_first_instruction() {
            Some(first) => entry_builder.position_before(&first),
            None => entry_builder.position_at_end(entry),
        }
        entry_builder
            .build_alloca(self.context.f64_type(), name)
            .map_err(llvm_err)
    }

    fn resolve_function(
        &mut self,
        name: &str,
        registry: &PrototypeRegistry,
    ) -> Option<FunctionValue<'ctx>> {
        if let Some(existing) = self.module.get_function(name) {
            return Some(existing);
        }
        registry.get(name).map(|proto| self.declare_prototype(proto))
    }

    fn lower_expr(&mut self, expr: &Expr, registry: &PrototypeRegistry) -> Result<BasicValueEnum<'ctx>> {
        match expr {
            Expr::Number(n) => Ok(self.context.f64_type().const_float(*n).as_basic_value_enum()),

            Expr::Variable(name) => {
                let ptr = *self
                    .variables
                    .get(name)
                    .ok_or(LowerError::UnknownVariable)?;
                self.builder
                    .build_load(self.context.f64_type(), ptr, "loadtmp")
                    .map_err(llvm_err)
            }

            Expr::Unary(op, operand) => {
                let operand_val = self.lower_expr(operand, registry)?;
                let fn_name = format!("unary{op}");
                let function = self
                    .resolve_function(&fn_name, registry)
                    .ok_or(LowerError::UnknownUnaryOperator)?;
                self.build_call(function, &[operand_val])
            }

            Expr::Binary(op, lhs, rhs) => self.lower_binary(*op, lhs, rhs, registry),

            Expr::Call(name, args) => {
                let function = self
                    .resolve_function(name, registry)
                    .ok_or_else(|| LowerError::UnknownFunction(name.clone()))?;
                if function.count_params() as usize != args.len() {
                    return Err(LowerError::ArityMismatch);
                }
                let mut arg_vals = Vec::with_capacity(args.len());
                for arg in args {
                    arg_vals.push(self.lower_expr(arg, registry)?);
                }
                self.build_call(function, &arg_vals)
            }

            Expr::If {
                cond,
                then_branch,
                else_branch,
            } => self.lower_if(cond, then_branch, else_branch, registry),

            Expr::For {
                var,
                start,
                end,
                step,
                body,
            } => self.lower_for(var, start, end, step.as_deref(), body, registry),

            Expr::Var { bindings, body } => self.lower_var(bindings, body, registry),
        }
    }

    fn build_call(
        &self,
        function: FunctionValue<'ctx>,
        args: &[BasicValueEnum<'ctx>],
    ) -> Result<BasicValueEnum<'ctx>> {
        let args: Vec<_> = args.iter().map(|v| (*v).into()).collect();
        let call_site = self.builder.build_call(function, &args, "calltmp").map_err(llvm_err)?;
        call_site
            .try_as_basic_value()
            .left()
            .ok_or_else(|| LowerError::LlvmOperationFailed("call produced no value".to_string()))
    }

    fn lower_binary(
        &mut self,
        op: char,
        lhs: &Expr,
        rhs: &Expr,
        registry: &PrototypeRegistry,
    ) -> Result<BasicValueEnum<'ctx>> {
        if op == '=' {
            let Expr::Variable(name) = lhs else {
                return Err(LowerError::AssignmentToNonVariable);
            };
            let rhs_val = self.lower_expr(rhs, registry)?.into_float_value();
            let ptr = *self
                .variables
                .get(name)
                .ok_or(LowerError::UnknownVariable)?;
            self.builder.build_store(ptr, rhs_val).map_err(llvm_err)?;
            return Ok(rhs_val.as_basic_value_enum());
        }

        if matches!(op, '+' | '-' | '*' | '<') {
            let lhs_val = self.lower_expr(lhs, registry)?.into_float_value();
            let rhs_val = self.lower_expr(rhs, registry)?.into_float_value();
            let result = match op {
                '+' => self.builder.build_float_add(lhs_val, rhs_val, "addtmp"),
                '-' => self.builder.build_float_sub(lhs_val, rhs_val, "subtmp"),
                '*' => self.builder.build_float_mul(lhs_val, rhs_val, "multmp"),
                '<' => {
                    let cmp = self
                        .builder
                        .build_float_compare(FloatPredicate::ULT, lhs_val, rhs_val, "cmptmp")
                        .map_err(llvm_err)?;
                    return self
                        .builder
                        .build_unsigned_int_to_float(cmp, self.context.f64_type(), "booltmp")
                        .map(|v| v.as_basic_value_enum())
                        .map_err(llvm_err);
                }
                _ => unreachable!(),
            };
            return result.map(|v| v.as_basic_value_enum()).map_err(llvm_err);
        }

        // User-defined binary operator: a call to "binary<op>".
        let lhs_val = self.lower_expr(lhs, registry)?;
        let rhs_val = self.lower_expr(rhs, registry)?;
        let fn_name = format!("binary{op}");
        let function = self
            .resolve_function(&fn_name, registry)
            .ok_or(LowerError::UnknownBinaryOperator)?;
        self.build_call(function, &[lhs_val, rhs_val])
    }

    fn lower_if(
        &mut self,
        cond: &Expr,
        then_branch: &Expr,
        else_branch: &Expr,
        registry: &PrototypeRegistry,
    ) -> Result<BasicValueEnum<'ctx>> {
        let function = self.current_function.expect("if lowered inside a function");
        let f64_type = self.context.f64_type();

        let cond_val = self.lower_expr(cond, registry)?.into_float_value();
        let zero = f64_type.const_float(0.0);
        let cond_bool = self
            .builder
            .build_float_compare(FloatPredicate::ONE, cond_val, zero, "ifcond")
            .map_err(llvm_err)?;

        let then_bb = self.context.append_basic_block(function, "then");
        let else_bb = self.context.append_basic_block(function, "else");
        let merge_bb = self.context.append_basic_block(function, "ifcont");

        self.builder
            .build_conditional_branch(cond_bool, then_bb, else_bb)
            .map_err(llvm_err)?;

        self.builder.position_at_end(then_bb);
        let then_val = self.lower_expr(then_branch, registry)?;
        self.builder.build_unconditional_branch(merge_bb).map_err(llvm_err)?;
        // Lowering `then_branch` may itself have opened and closed further
        // blocks (nested `if`, `for`); the φ must cite wherever the builder
        // actually ended up, not the original `then_bb`.
        let then_end_bb = self.builder.get_insert_block().unwrap_or(then_bb);

        self.builder.position_at_end(else_bb);
        let else_val = self.lower_expr(else_branch, registry)?;
        self.builder.build_unconditional_branch(merge_bb).map_err(llvm_err)?;
        let else_end_bb = self.builder.get_insert_block().unwrap_or(else_bb);

        self.builder.position_at_end(merge_bb);
        let phi = self.builder.build_phi(f64_type, "iftmp").map_err(llvm_err)?;
        phi.add_incoming(&[(&then_val, then_end_bb), (&else_val, else_end_bb)]);
        Ok(phi.as_basic_value())
    }

    fn lower_for(
        &mut self,
        var: &str,
        start: &Expr,
        end: &Expr,
        step: Option<&Expr>,
        body: &Expr,
        registry: &PrototypeRegistry,
    ) -> Result<BasicValueEnum<'ctx>> {
        let function = self.current_function.expect("for lowered inside a function");
        let f64_type = self.context.f64_type();

        let start_val = self.lower_expr(start, registry)?.into_float_value();
        let alloca = self.create_entry_alloca(function, var)?;
        self.builder.build_store(alloca, start_val).map_err(llvm_err)?;

        let loop_bb = self.context.append_basic_block(function, "loop");
        self.builder.build_unconditional_branch(loop_bb).map_err(llvm_err)?;
        self.builder.position_at_end(loop_bb);

        let shadowed = self.variables.insert(var.to_string(), alloca);
        self.lower_expr(body, registry)?; // body's value is discarded

        let step_val = match step {
            Some(e) => self.lower_expr(e, registry)?.into_float_value(),
            None => f64_type.const_float(1.0),
        };
        let end_val = self.lower_expr(end, registry)?.into_float_value();

        let cur = self
            .builder
            .build_load(f64_type, alloca, "curvar")
            .map_err(llvm_err)?
            .into_float_value();
        let next = self.builder.build_float_add(cur, step_val, "nextvar").map_err(llvm_err)?;
        self.builder.build_store(alloca, next).map_err(llvm_err)?;

        let zero = f64_type.const_float(0.0);
        let loop_cond = self
            .builder
            .build_float_compare(FloatPredicate::ONE, end_val, zero, "loopcond")
            .map_err(llvm_err)?;

        let after_bb = self.context.append_basic_block(function, "afterloop");
        self.builder
            .build_conditional_branch(loop_cond, loop_bb, after_bb)
            .map_err(llvm_err)?;
        self.builder.position_at_end(after_bb);

        match shadowed {
            Some(prev) => {
                self.variables.insert(var.to_string(), prev);
            }
            None => {
                self.variables.remove(var);
            }
        }

        Ok(f64_type.const_float(0.0).as_basic_value_enum())
    }

    fn lower_var(
        &mut self,
        bindings: &[(String, Option<Expr>)],
        body: &Expr,
        registry: &PrototypeRegistry,
    ) -> Result<BasicValueEnum<'ctx>> {
        let function = self.current_function.expect("var lowered inside a function");
        let mut saved = Vec::with_capacity(bindings.len());

        for (name, init) in bindings {
            let init_val = match init {
                Some(e) => self.lower_expr(e, registry)?.into_float_value(),
                None => self.context.f64_type().const_float(0.0),
            };
            let alloca = self.create_entry_alloca(function, name)?;
            self.builder.build_store(alloca, init_val).map_err(llvm_err)?;
            let previous = self.variables.insert(name.clone(), alloca);
            saved.push((name.clone(), previous));
        }

        let result = self.lower_expr(body, registry);

        for (name, previous) in saved.into_iter().rev() {
            match previous {
                Some(p) => {
                    self.variables.insert(name, p);
                }
                None => {
                    self.variables.remove(&name);
                }
            }
        }

        result
    }
}

fn llvm_err(e: impl std::fmt::Display) -> LowerError {
    LowerError::LlvmOperationFailed(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kalc_par::ast::Expr;
    use kalc_util::OperatorKind;

    fn proto(name: &str, params: &[&str]) -> Prototype {
        Prototype::new(
            name.to_string(),
            params.iter().map(|p| p.to_string()).collect(),
            OperatorKind::None,
            None,
        )
    }

    #[test]
    fn lowers_a_constant_returning_function() {
        let context = Context::create();
        let mut gen = CodeGenerator::new(&context, "test");
        let mut precedence = PrecedenceTable::new();
        let mut registry = PrototypeRegistry::new();

        let func = Function {
            proto: proto("answer", &[]),
            body: Expr::Number(42.0),
        };
        gen.lower_function(func, &mut precedence, &mut registry)
            .expect("constant function should lower");

        let ir = gen.into_module().print_to_string().to_string();
        assert!(ir.contains("define double @answer"));
        assert!(ir.contains("ret double"));
    }

    #[test]
    fn call_with_wrong_arity_fails() {
        let context = Context::create();
        let mut gen = CodeGenerator::new(&context, "test");
        let mut precedence = PrecedenceTable::new();
        let mut registry = PrototypeRegistry::new();

        registry.insert(proto("takes_one", &["x"]));

        let func = Function {
            proto: proto("caller", &[]),
            body: Expr::Call("takes_one".to_string(), vec![Expr::Number(1.0), Expr::Number(2.0)]),
        };
        let err = gen
            .lower_function(func, &mut precedence, &mut registry)
            .expect_err("arity mismatch should fail lowering");
        assert!(matches!(err, LowerError::ArityMismatch));
    }

    #[test]
    fn unknown_variable_fails() {
        let context = Context::create();
        let mut gen = CodeGenerator::new(&context, "test");
        let mut precedence = PrecedenceTable::new();
        let mut registry = PrototypeRegistry::new();

        let func = Function {
            proto: proto("bad", &[]),
            body: Expr::Variable("ghost".to_string()),
        };
        let err = gen
            .lower_function(func, &mut precedence, &mut registry)
            .expect_err("unbound variable should fail lowering");
        assert!(matches!(err, LowerError::UnknownVariable));
    }

    #[test]
    fn assignment_to_non_variable_fails() {
        let context = Context::create();
        let mut gen = CodeGenerator::new(&context, "test");
        let mut precedence = PrecedenceTable::new();
        let mut registry = PrototypeRegistry::new();

        let func = Function {
            proto: proto("bad", &["x"]),
            body: Expr::Binary('=', Box::new(Expr::Number(1.0)), Box::new(Expr::Number(2.0))),
        };
        let err = gen
            .lower_function(func, &mut precedence, &mut registry)
            .expect_err("assigning to a non-variable should fail lowering");
        assert!(matches!(err, LowerError::AssignmentToNonVariable));
    }

    #[test]
    fn redefinition_within_one_module_is_an_error() {
        let context = Context::create();
        let mut gen = CodeGenerator::new(&context, "test");
        let mut precedence = PrecedenceTable::new();
        let mut registry = PrototypeRegistry::new();

        let first = Function {
            proto: proto("f", &["x"]),
            body: Expr::Variable("x".to_string()),
        };
        gen.lower_function(first, &mut precedence, &mut registry)
            .expect("first definition should lower");

        let second = Function {
            proto: proto("f", &["x"]),
            body: Expr::Variable("x".to_string()),
        };
        let err = gen
            .lower_function(second, &mut precedence, &mut registry)
            .expect_err("redefining f in the same module should fail");
        assert!(matches!(err, LowerError::Redefinition(_)));
    }

    #[test]
    fn binary_operator_installs_and_rolls_back_precedence() {
        let context = Context::create();
        let mut gen = CodeGenerator::new(&context, "test");
        let mut precedence = PrecedenceTable::new();
        let mut registry = PrototypeRegistry::new();

        assert!(!precedence.contains(':'));

        let bad = Function {
            proto: Prototype::new(
                "binary:".to_string(),
                vec!["x".to_string(), "y".to_string()],
                OperatorKind::Binary,
                Some(5),
            ),
            body: Expr::Variable("ghost".to_string()),
        };
        gen.lower_function(bad, &mut precedence, &mut registry)
            .expect_err("body references an unbound variable");

        // A failed `def binary` must not leave the operator installed.
        assert!(!precedence.contains(':'));
    }

    #[test]
    fn if_then_else_builds_a_phi_merge() {
        let context = Context::create();
        let mut gen = CodeGenerator::new(&context, "test");
        let mut precedence = PrecedenceTable::new();
        let mut registry = PrototypeRegistry::new();

        let func = Function {
            proto: proto("choose", &["x"]),
            body: Expr::If {
                cond: Box::new(Expr::Variable("x".to_string())),
                then_branch: Box::new(Expr::Number(1.0)),
                else_branch: Box::new(Expr::Number(2.0)),
            },
        };
        gen.lower_function(func, &mut precedence, &mut registry)
            .expect("if/then/else should lower");

        let ir = gen.into_module().print_to_string().to_string();
        assert!(ir.contains("phi double"));
    }

    #[test]
    fn for_loop_does_not_leak_the_induction_variable_binding() {
        let context = Context::create();
        let mut gen = CodeGenerator::new(&context, "test");
        let mut precedence = PrecedenceTable::new();
        let mut registry = PrototypeRegistry::new();

        let func = Function {
            proto: proto("count", &[]),
            body: Expr::For {
                var: "i".to_string(),
                start: Box::new(Expr::Number(0.0)),
                end: Box::new(Expr::Binary(
                    '<',
                    Box::new(Expr::Variable("i".to_string())),
                    Box::new(Expr::Number(10.0)),
                )),
                step: None,
                body: Box::new(Expr::Number(0.0)),
            },
        };
        gen.lower_function(func, &mut precedence, &mut registry)
            .expect("for loop should lower");
        // The induction variable must not remain bound after the loop: a
        // reference to `i` right after, in a fresh call, would otherwise
        // succeed when it shouldn't.
        assert!(!gen.variables.contains_key("i"));
    }
}
