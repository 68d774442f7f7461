//! The compiler's built-in generators (spec.md §4.4, §4.9): the handful of
//! special forms that can't be expressed as ordinary calls — `__defmacro`
//! and `__comptime` (which need access to the comptime side directly),
//! `__quote`/`__list` (the minimal data-construction vocabulary macro
//! bodies need), arithmetic, `if`, `lambda`, `apply`, `set!`, and the
//! short-circuiting `or`/`and`. Everything else in a program is either a
//! C-callback the embedder links in or a macro the program itself defines.

use crate::ast::{Ast, AstKind};
use crate::compile_state::CompileState;
use crate::compiler::Compiler;
use crate::error::CompileError;
use crate::instruction::{encode_upvalue_source, Arg, Opcode};
use crate::lower;
use crate::span::Span;
use crate::upvalue::resolve_free_local;

pub fn install_default_generators(compiler: &mut Compiler) {
    compiler.add_generator("__defmacro", std::rc::Rc::new(crate::macros::define_macro));
    compiler.add_generator("__comptime", std::rc::Rc::new(crate::macros::run_comptime));
    compiler.add_generator("__quote", std::rc::Rc::new(generator_quote));
    compiler.add_generator("__list", std::rc::Rc::new(generator_list));
    compiler.add_generator("if", std::rc::Rc::new(generator_if));
    compiler.add_generator("lambda", std::rc::Rc::new(generator_lambda));
    compiler.add_generator("apply", std::rc::Rc::new(generator_apply));
    compiler.add_generator("set!", std::rc::Rc::new(generator_set));
    compiler.add_generator("or", std::rc::Rc::new(generator_or));
    compiler.add_generator("and", std::rc::Rc::new(generator_and));
    let add = std::rc::Rc::new(generator_add);
    compiler.add_generator("__+", add.clone());
    compiler.add_generator("+", add);
}

/// `(__quote x)`: reifies `x` as data rather than evaluating it — the same
/// construction [`lower::compile_literal`] uses for a `'`-quoted form, just
/// reachable by name for macro bodies.
fn generator_quote(
    compiler: &mut Compiler,
    state: &mut CompileState,
    expr: &[Ast],
    _span: Span,
) -> Result<(), CompileError> {
    let x = expr.get(1).ok_or_else(|| CompileError::WrongArity {
        name: "__quote".to_string(),
        expected: "1".to_string(),
        got: expr.len().saturating_sub(1),
    })?;
    lower::compile_literal_node(compiler, state, x)
}

/// `(__list e1 … en)`: evaluates each argument and conses them into a list,
/// the runtime counterpart of [`lower::compile_literal`]'s quoted-data
/// construction.
fn generator_list(
    compiler: &mut Compiler,
    state: &mut CompileState,
    expr: &[Ast],
    span: Span,
) -> Result<(), CompileError> {
    let args = &expr[1..];
    for arg in args {
        lower::compile_compound(compiler, state, arg, true)?;
    }
    lower::emit_push(state, Opcode::Nil, vec![], span);
    for _ in 0..args.len() {
        lower::emit(state, Opcode::Cons, vec![], span);
        state.active_mut().pop_depth(1); // cons pops 2, pushes 1: net -1
    }
    Ok(())
}

/// `(+ a b)` / `(__+ a b)`: binary numeric addition.
fn generator_add(
    compiler: &mut Compiler,
    state: &mut CompileState,
    expr: &[Ast],
    span: Span,
) -> Result<(), CompileError> {
    if expr.len() != 3 {
        return Err(CompileError::WrongArity {
            name: "+".to_string(),
            expected: "2".to_string(),
            got: expr.len().saturating_sub(1),
        });
    }
    lower::compile_compound(compiler, state, &expr[1], true)?;
    lower::compile_compound(compiler, state, &expr[2], true)?;
    lower::emit(state, Opcode::Add, vec![], span);
    state.active_mut().pop_depth(1); // add pops 2, pushes 1: net -1
    Ok(())
}

/// `(apply f args)`: evaluates `f` and `args` (the latter must reduce to a
/// proper list), then invokes `f` with that list as its argument vector —
/// the runtime counterpart of `Funcall`'s fixed arity. Pushes callee then
/// argument list, matching `Opcode::Apply`'s pop order (list first, callee
/// underneath).
fn generator_apply(
    compiler: &mut Compiler,
    state: &mut CompileState,
    expr: &[Ast],
    span: Span,
) -> Result<(), CompileError> {
    if expr.len() != 3 {
        return Err(CompileError::WrongArity {
            name: "apply".to_string(),
            expected: "2".to_string(),
            got: expr.len().saturating_sub(1),
        });
    }
    lower::compile_compound(compiler, state, &expr[1], true)?;
    lower::compile_compound(compiler, state, &expr[2], true)?;
    lower::emit(state, Opcode::Apply, vec![], span);
    state.active_mut().pop_depth(1); // apply pops (callee, args-list), pushes 1: net -1
    Ok(())
}

/// `(set! name value)`: evaluates `value` into a local slot, then writes it
/// into whichever binding `name` resolves to — a local (`Move`), a captured
/// upvalue (`SetUpvalue`), or a late-bound global (`SetStatic`) — mirroring
/// [`lower::compile_identifier`]'s own local/upvalue/global dispatch order.
/// The assigned value is left on the stack as the form's result, since none
/// of the three target opcodes pop it.
fn generator_set(
    compiler: &mut Compiler,
    state: &mut CompileState,
    expr: &[Ast],
    span: Span,
) -> Result<(), CompileError> {
    if expr.len() != 3 {
        return Err(CompileError::WrongArity {
            name: "set!".to_string(),
            expected: "2".to_string(),
            got: expr.len().saturating_sub(1),
        });
    }
    let name = match &expr[1].kind {
        AstKind::Identifier(n) => n.clone(),
        _ => {
            return Err(CompileError::MalformedForm(
                "set! expects an identifier as its first argument".to_string(),
            ))
        }
    };
    let value_slot = lower::compile_compound(compiler, state, &expr[2], false)?;

    if let Some(target) = state.active().scopes.get_local(&name) {
        lower::emit(
            state,
            Opcode::Move,
            vec![Arg::Slot(target), Arg::Slot(value_slot)],
            span,
        );
        return Ok(());
    }
    if let Some(uv) = resolve_free_local(&mut state.active_mut().scopes, &name) {
        lower::emit(
            state,
            Opcode::SetUpvalue,
            vec![Arg::Slot(value_slot), Arg::Slot(uv)],
            span,
        );
        return Ok(());
    }
    let symbol = compiler.symbols.intern(&name);
    let slot = compiler.globals.slot_for(symbol);
    lower::emit(
        state,
        Opcode::SetStatic,
        vec![Arg::Slot(value_slot), Arg::Slot(slot)],
        span,
    );
    Ok(())
}

/// `(or a b)`: desugars to `((lambda (tmp) (if tmp tmp b)) a)` so `a` is
/// only evaluated once, using a gensym'd parameter name so it can never
/// shadow a binding already visible at the call site.
fn generator_or(
    compiler: &mut Compiler,
    state: &mut CompileState,
    expr: &[Ast],
    span: Span,
) -> Result<(), CompileError> {
    if expr.len() != 3 {
        return Err(CompileError::WrongArity {
            name: "or".to_string(),
            expected: "2".to_string(),
            got: expr.len().saturating_sub(1),
        });
    }
    let tmp = compiler.gensym.next();
    let desugared = short_circuit_thunk(&tmp, &expr[1], &expr[2], true, span);
    lower::compile_compound(compiler, state, &desugared, false)?;
    Ok(())
}

/// `(and a b)`: desugars to `((lambda (tmp) (if tmp b tmp)) a)`, the mirror
/// image of [`generator_or`].
fn generator_and(
    compiler: &mut Compiler,
    state: &mut CompileState,
    expr: &[Ast],
    span: Span,
) -> Result<(), CompileError> {
    if expr.len() != 3 {
        return Err(CompileError::WrongArity {
            name: "and".to_string(),
            expected: "2".to_string(),
            got: expr.len().saturating_sub(1),
        });
    }
    let tmp = compiler.gensym.next();
    let desugared = short_circuit_thunk(&tmp, &expr[1], &expr[2], false, span);
    lower::compile_compound(compiler, state, &desugared, false)?;
    Ok(())
}

/// Builds `((lambda (tmp) (if tmp <then> <else>)) first)`, where `is_or`
/// picks whether `tmp` or `second` fills the then-arm.
fn short_circuit_thunk(tmp: &str, first: &Ast, second: &Ast, is_or: bool, span: Span) -> Ast {
    let (then_arm, else_arm) = if is_or {
        (Ast::identifier(tmp, span), second.clone())
    } else {
        (second.clone(), Ast::identifier(tmp, span))
    };
    let body = Ast::expression(
        vec![
            Ast::identifier("if", span),
            Ast::identifier(tmp, span),
            then_arm,
            else_arm,
        ],
        span,
    );
    let lambda = Ast::expression(
        vec![
            Ast::identifier("lambda", span),
            Ast::expression(vec![Ast::identifier(tmp, span)], span),
            body,
        ],
        span,
    );
    Ast::expression(vec![lambda, first.clone()], span)
}

/// `(if cond then else)`. Both arms are compiled against the same baseline
/// stack depth (the depth right after the condition is consumed), so the
/// `if`'s net depth contribution is the same regardless of which arm
/// actually runs.
fn generator_if(
    compiler: &mut Compiler,
    state: &mut CompileState,
    expr: &[Ast],
    span: Span,
) -> Result<(), CompileError> {
    if expr.len() != 4 {
        return Err(CompileError::WrongArity {
            name: "if".to_string(),
            expected: "3".to_string(),
            got: expr.len().saturating_sub(1),
        });
    }
    lower::compile_compound(compiler, state, &expr[1], true)?;
    state.active_mut().pop_depth(1); // brz consumes the condition

    let else_label = state.active_mut().fresh_label();
    let end_label = state.active_mut().fresh_label();
    lower::emit(state, Opcode::Brz, vec![Arg::Label(else_label)], span);

    let baseline = state.active().locals_length;
    lower::compile_compound(compiler, state, &expr[2], false)?;
    lower::emit(state, Opcode::Jump, vec![Arg::Label(end_label)], span);

    state.active_mut().mark_label(else_label, span);
    state.active_mut().locals_length = baseline;
    lower::compile_compound(compiler, state, &expr[3], false)?;

    state.active_mut().mark_label(end_label, span);
    Ok(())
}

/// `(lambda (params...) body)`: emits the body inline (skipped over at
/// definition time by a leading jump) and pushes a closure value whose
/// entry point targets it.
fn generator_lambda(
    compiler: &mut Compiler,
    state: &mut CompileState,
    expr: &[Ast],
    span: Span,
) -> Result<(), CompileError> {
    if expr.len() != 3 {
        return Err(CompileError::WrongArity {
            name: "lambda".to_string(),
            expected: "2".to_string(),
            got: expr.len().saturating_sub(1),
        });
    }
    let params = match &expr[1].kind {
        AstKind::Expression(children) => children
            .iter()
            .map(|c| match &c.kind {
                AstKind::Identifier(n) => Ok(n.clone()),
                _ => Err(CompileError::MalformedForm(
                    "lambda parameter list must contain only identifiers".to_string(),
                )),
            })
            .collect::<Result<Vec<_>, _>>()?,
        _ => {
            return Err(CompileError::MalformedForm(
                "lambda expects a parameter list".to_string(),
            ))
        }
    };
    let body = &expr[2];

    let entry_label = state.active_mut().fresh_label();
    let skip_label = state.active_mut().fresh_label();

    lower::emit(state, Opcode::Jump, vec![Arg::Label(skip_label)], span);
    state.active_mut().mark_label(entry_label, span);

    let outer_depth = state.active().locals_length;
    state.push_scope(true);
    state.active_mut().locals_length = 0;
    for param in &params {
        state.active_mut().push_depth(1);
        let slot = state.active().locals_length - 1;
        state.active_mut().scopes.define_local(param, slot);
    }

    lower::compile_compound(compiler, state, body, false)?;

    // Box any param/local of this scope a nested closure captured, before
    // `return` truncates the stack out from under it.
    let scope_uvs = state.active().scopes.top().scope_uvs.clone();
    if !scope_uvs.is_empty() {
        lower::emit(state, Opcode::ReleaseUpvalues, vec![Arg::Slots(scope_uvs)], span);
    }
    lower::emit(state, Opcode::Return, vec![], span);

    let popped = state.pop_scope();
    state.active_mut().locals_length = outer_depth;

    state.active_mut().mark_label(skip_label, span);

    let encoded: Vec<u32> = popped
        .function_uvs
        .iter()
        .map(|&src| encode_upvalue_source(src))
        .collect();

    lower::emit_push(
        state,
        Opcode::PushClosure,
        vec![
            Arg::Label(entry_label),
            Arg::Int(params.len() as i64),
            Arg::Int(0),
            Arg::Slots(encoded),
        ],
        span,
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{Compiler, CompilerOptions};
    use crate::symbol::SymbolTable;
    use crate::vm::Vm;

    fn parse(src: &[u8]) -> Vec<Ast> {
        crate::reader::read_all(src, None).unwrap()
    }

    fn compile(src: &[u8]) -> Vec<u8> {
        let mut compiler = Compiler::new(CompilerOptions::default());
        let (bytecode, diagnostics) =
            crate::compiler::load_string(&mut compiler, src, "t.lisp", None);
        assert!(diagnostics.is_empty(), "unexpected diagnostics: {diagnostics:?}");
        bytecode
    }

    #[test]
    fn if_true_takes_the_then_arm() {
        let bytecode = compile(b"(if true 1 2)");
        let mut vm = Vm::new();
        let mut symbols = SymbolTable::new();
        assert_eq!(
            vm.execute(&bytecode, &mut symbols).unwrap(),
            crate::vmvalue::VmValue::Int(1)
        );
    }

    #[test]
    fn if_false_takes_the_else_arm() {
        let bytecode = compile(b"(if false 1 2)");
        let mut vm = Vm::new();
        let mut symbols = SymbolTable::new();
        assert_eq!(
            vm.execute(&bytecode, &mut symbols).unwrap(),
            crate::vmvalue::VmValue::Int(2)
        );
    }

    #[test]
    fn nested_lambda_captures_the_outer_parameter() {
        let mut compiler = Compiler::new(CompilerOptions::default());
        let mut state = CompileState::new();
        state.file_name = "t.lisp".to_string();
        state.runtime.scopes.push(false, true);

        let forms = parse(b"((lambda (x) (lambda (y) (+ x y))) 3)");
        lower::compile_top_level_form(&mut compiler, &mut state, &forms[0]).unwrap();
        state.runtime.emit(crate::instruction::Instruction::simple(
            Opcode::Halt,
            Span::dummy(),
        ));

        let bytecode = crate::assemble::assemble(&state.runtime.assembly).unwrap();
        let mut vm = Vm::new();
        let mut symbols = SymbolTable::new();
        let outer_closure = vm.execute(&bytecode, &mut symbols).unwrap();

        match outer_closure {
            crate::vmvalue::VmValue::Closure(ref c) => assert_eq!(c.arity, 1),
            other => panic!("expected a closure, got {other:?}"),
        }
    }

    #[test]
    fn macro_expansion_end_to_end_yields_forty_two() {
        let bytecode = compile(b"(__defmacro m (a) (__list (__quote __+) a a)) (m 21)");
        let mut vm = Vm::new();
        let mut symbols = SymbolTable::new();
        assert_eq!(
            vm.execute(&bytecode, &mut symbols).unwrap(),
            crate::vmvalue::VmValue::Int(42)
        );
    }

    #[test]
    fn apply_invokes_a_closure_with_a_list_of_arguments() {
        let bytecode = compile(b"(apply (lambda (x y) (+ x y)) (__list 3 4))");
        let mut vm = Vm::new();
        let mut symbols = SymbolTable::new();
        assert_eq!(
            vm.execute(&bytecode, &mut symbols).unwrap(),
            crate::vmvalue::VmValue::Int(7)
        );
    }

    #[test]
    fn set_bang_rebinds_a_local_and_returns_the_new_value() {
        let bytecode = compile(b"((lambda (x) (set! x 9)) 1)");
        let mut vm = Vm::new();
        let mut symbols = SymbolTable::new();
        assert_eq!(
            vm.execute(&bytecode, &mut symbols).unwrap(),
            crate::vmvalue::VmValue::Int(9)
        );
    }

    #[test]
    fn set_bang_rebinds_a_captured_upvalue() {
        let bytecode = compile(b"((lambda (x) ((lambda () (set! x 5)))) 1)");
        let mut vm = Vm::new();
        let mut symbols = SymbolTable::new();
        assert_eq!(
            vm.execute(&bytecode, &mut symbols).unwrap(),
            crate::vmvalue::VmValue::Int(5)
        );
    }

    #[test]
    fn or_short_circuits_on_a_truthy_first_argument() {
        let bytecode = compile(b"(or true false)");
        let mut vm = Vm::new();
        let mut symbols = SymbolTable::new();
        assert_eq!(
            vm.execute(&bytecode, &mut symbols).unwrap(),
            crate::vmvalue::VmValue::Bool(true)
        );
    }

    #[test]
    fn or_falls_through_to_the_second_argument_when_the_first_is_false() {
        let bytecode = compile(b"(or false true)");
        let mut vm = Vm::new();
        let mut symbols = SymbolTable::new();
        assert_eq!(
            vm.execute(&bytecode, &mut symbols).unwrap(),
            crate::vmvalue::VmValue::Bool(true)
        );
    }

    #[test]
    fn and_returns_the_second_argument_when_the_first_is_truthy() {
        let bytecode = compile(b"(and true 42)");
        let mut vm = Vm::new();
        let mut symbols = SymbolTable::new();
        assert_eq!(
            vm.execute(&bytecode, &mut symbols).unwrap(),
            crate::vmvalue::VmValue::Int(42)
        );
    }

    #[test]
    fn and_short_circuits_on_a_falsy_first_argument() {
        let bytecode = compile(b"(and false 42)");
        let mut vm = Vm::new();
        let mut symbols = SymbolTable::new();
        assert_eq!(
            vm.execute(&bytecode, &mut symbols).unwrap(),
            crate::vmvalue::VmValue::Bool(false)
        );
    }
}
