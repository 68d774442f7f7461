//! Macro driver (spec.md §4.8, §4.9): `__defmacro` compiles a macro body
//! into an independently assembled bytecode blob and registers it;
//! `__comptime` compiles and runs a body once, splicing its result into the
//! runtime assembly; a macro *call* replays that bytecode against the
//! comptime VM and splices its result back in place of the call.

use crate::ast::{Ast, AstKind};
use crate::bridge::{ast_to_object, object_to_ast};
use crate::compile_state::CompileState;
use crate::compiler::{Compiler, MacroDef};
use crate::error::CompileError;
use crate::instruction::{Arg, Opcode};
use crate::lower;
use crate::scope::FunctionKind;
use crate::span::Span;

/// `(__defmacro name (params...) body)`: compiles `body` into a
/// self-contained comptime bytecode blob parameterized on `params`, and
/// registers `name` as a macro in the currently active scope. Nothing is
/// emitted into the runtime assembly (spec.md §4.9).
pub fn define_macro(
    compiler: &mut Compiler,
    state: &mut CompileState,
    expr: &[Ast],
    span: Span,
) -> Result<(), CompileError> {
    let (name, params, body) = parse_defmacro_shape(expr)?;

    let macro_index = compiler.macros.len() as u32;
    let bytecode = compile_comptime_body(compiler, state, &params, body, span)?;
    compiler.macros.push(MacroDef {
        param_count: params.len() as u32,
        bytecode,
    });

    state
        .active_mut()
        .scopes
        .define_function(&name, FunctionKind::Macro, macro_index);
    Ok(())
}

/// `(__comptime body)`: compiles and executes `body` once during
/// compilation, splicing its result into the runtime assembly in place of
/// the `__comptime` form itself.
pub fn run_comptime(
    compiler: &mut Compiler,
    state: &mut CompileState,
    expr: &[Ast],
    span: Span,
) -> Result<(), CompileError> {
    let body = expr.get(1).ok_or_else(|| CompileError::WrongArity {
        name: "__comptime".to_string(),
        expected: "1".to_string(),
        got: expr.len().saturating_sub(1),
    })?;

    let bytecode = compile_comptime_body(compiler, state, &[], body, span)?;
    compiler.comptime_vm.clear_stack();
    let result = compiler
        .comptime_vm
        .execute(&bytecode, &mut compiler.symbols)
        .map_err(|e| CompileError::MacroError(e.to_string()))?;
    // Always spliced unquoted (`use_exprs: true`) so the result can call
    // further generators and macros rather than compiling to inert data.
    let spliced = object_to_ast(&result, &compiler.symbols, span, true)?;
    lower::compile_compound(compiler, state, &spliced, false)?;
    Ok(())
}

/// Replays a macro's bytecode against the comptime VM with `args` reified
/// as a single cons-list argument (slot 0 inside the macro body), then
/// splices the result back into the lowerer at the call site.
pub fn expand_macro_call(
    compiler: &mut Compiler,
    state: &mut CompileState,
    macro_index: u32,
    name: &str,
    args: &[Ast],
    span: Span,
) -> Result<u32, CompileError> {
    let macro_def = compiler
        .macros
        .get(macro_index as usize)
        .cloned()
        .ok_or_else(|| CompileError::NotCallable(format!("macro {name}")))?;

    let arglist_ast = Ast::expression(args.to_vec(), span);
    let arglist = ast_to_object(&arglist_ast, &mut compiler.symbols);

    compiler.comptime_vm.clear_stack();
    compiler.comptime_vm.push_value(arglist);
    let result = compiler
        .comptime_vm
        .execute(&macro_def.bytecode, &mut compiler.symbols)
        .map_err(|e| CompileError::MacroError(format!("in macro \"{name}\": {e}")))?;

    let spliced = object_to_ast(&result, &compiler.symbols, span, true)?;
    lower::compile_compound(compiler, state, &spliced, false)
}

/// Pulls `(name (params...) body)` out of a `__defmacro` call's argument
/// list (`expr[0]` is the `__defmacro` head itself).
fn parse_defmacro_shape(expr: &[Ast]) -> Result<(String, Vec<String>, &Ast), CompileError> {
    if expr.len() != 4 {
        return Err(CompileError::WrongArity {
            name: "__defmacro".to_string(),
            expected: "3".to_string(),
            got: expr.len().saturating_sub(1),
        });
    }
    let name = match &expr[1].kind {
        AstKind::Identifier(n) => n.clone(),
        _ => {
            return Err(CompileError::MalformedForm(
                "__defmacro name must be an identifier".to_string(),
            ))
        }
    };
    let params = match &expr[2].kind {
        AstKind::Expression(children) => children
            .iter()
            .map(|c| match &c.kind {
                AstKind::Identifier(n) => Ok(n.clone()),
                _ => Err(CompileError::MalformedForm(
                    "__defmacro parameter list must contain only identifiers".to_string(),
                )),
            })
            .collect::<Result<Vec<_>, _>>()?,
        _ => {
            return Err(CompileError::MalformedForm(
                "__defmacro expects a parameter list".to_string(),
            ))
        }
    };
    Ok((name, params, &expr[3]))
}

/// Compiles `body` into its own, independent comptime assembly: a fresh
/// function scope whose slot 0 is the macro's reified argument list,
/// destructured into `params` via `car`/`cdr` chains, followed by `body`
/// and a trailing `halt`. Isolated by swapping the comptime assembly
/// buffer out and back, so this never pollutes already-compiled comptime
/// code (e.g. an enclosing `__defmacro`).
fn compile_comptime_body(
    compiler: &mut Compiler,
    state: &mut CompileState,
    params: &[String],
    body: &Ast,
    span: Span,
) -> Result<Vec<u8>, CompileError> {
    let saved = std::mem::take(&mut state.comptime.assembly);

    let result = state.with_comptime(|cs| -> Result<(), CompileError> {
        cs.push_scope(true);
        cs.active_mut().locals_length = 0;

        // Slot 0 is always the reified argument list, whether or not this
        // particular body has named parameters to pull out of it.
        cs.active_mut().push_depth(1);
        cs.active_mut().scopes.define_local("\0arglist", 0);

        for (i, param) in params.iter().enumerate() {
            lower::emit_push(cs, Opcode::PushIndex, vec![Arg::Slot(0)], span);
            for _ in 0..i {
                lower::emit(cs, Opcode::Cdr, vec![], span);
            }
            lower::emit(cs, Opcode::Car, vec![], span);
            let slot = cs.active().locals_length - 1;
            cs.active_mut().scopes.define_local(param, slot);
        }

        lower::compile_compound(compiler, cs, body, false)?;
        lower::emit(cs, Opcode::Halt, vec![], span);
        cs.pop_scope();
        Ok(())
    });

    let instrs = std::mem::replace(&mut state.comptime.assembly, saved);
    result?;
    crate::assemble::assemble(&instrs).map_err(|e| CompileError::MacroError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{Compiler, CompilerOptions};

    fn parse(src: &[u8]) -> Vec<Ast> {
        crate::reader::read_all(src, None).unwrap()
    }

    #[test]
    fn defmacro_registers_a_callable_macro_with_no_runtime_emission() {
        let mut compiler = Compiler::new(CompilerOptions::default());
        let mut state = CompileState::new();
        state.file_name = "t.lisp".to_string();
        state.runtime.scopes.push(false, true);

        let forms = parse(b"(__defmacro m (a) (__list (__quote __+) a a))");
        lower::compile_top_level_form(&mut compiler, &mut state, &forms[0]).unwrap();

        assert!(state.runtime.assembly.is_empty());
        assert_eq!(compiler.macros.len(), 1);
        assert_eq!(compiler.macros[0].param_count, 1);
    }

    #[test]
    fn macro_call_splices_its_expansion_in_place_of_the_call() {
        let mut compiler = Compiler::new(CompilerOptions::default());
        let mut state = CompileState::new();
        state.file_name = "t.lisp".to_string();
        state.runtime.scopes.push(false, true);

        let forms = parse(b"(__defmacro m (a) (__list (__quote __+) a a)) (m 21)");
        for form in &forms {
            lower::compile_top_level_form(&mut compiler, &mut state, form).unwrap();
        }

        let has_add = state.runtime.assembly.iter().any(|i| i.op == Opcode::Add);
        assert!(has_add, "macro expansion should have compiled to an `add`");
        let mentions_m = state
            .runtime
            .assembly
            .iter()
            .any(|i| i.args.iter().any(|a| matches!(a, Arg::Bytes(b) if b == b"m")));
        assert!(!mentions_m);
    }
}
