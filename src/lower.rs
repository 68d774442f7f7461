//! Expression lowerer (spec.md §4.5): recursive dispatch from AST nodes to
//! emitted instructions, consulting the scope stack and the callable
//! registry as it goes.

use crate::ast::{Ast, AstKind};
use crate::compile_state::CompileState;
use crate::compiler::Compiler;
use crate::error::CompileError;
use crate::instruction::{Arg, Instruction, Opcode};
use crate::scope::FunctionKind;
use crate::span::Span;
use crate::upvalue::resolve_free_local;

pub(crate) fn emit(state: &mut CompileState, op: Opcode, args: Vec<Arg>, span: Span) {
    state.active_mut().emit(Instruction::new(op, args, span));
}

pub(crate) fn emit_push(state: &mut CompileState, op: Opcode, args: Vec<Arg>, span: Span) -> u32 {
    emit(state, op, args, span);
    state.active_mut().push_depth(1);
    state.active().locals_length - 1
}

/// Lowers one top-level form, driving it through [`compile_compound`] and
/// discarding its result slot (a top-level form's value has nowhere to go
/// but the stack, which `compile_top_level` callers collapse — here we
/// follow spec.md §4.5's `compile_AST`: compile, then collapse to a single
/// predictable slot).
pub fn compile_top_level_form(
    compiler: &mut Compiler,
    state: &mut CompileState,
    node: &Ast,
) -> Result<(), CompileError> {
    let before = state.active().locals_length;
    compile_compound(compiler, state, node, false)?;
    let produced = state.active().locals_length.saturating_sub(before);
    if produced > 1 {
        // Move the topmost result down to the slot right above `before`,
        // then pop the rest, so the form's value sits at a predictable
        // location regardless of how many intermediate temporaries it used.
        let dst = before;
        let src = state.active().locals_length - 1;
        emit(state, Opcode::Move, vec![Arg::Slot(dst), Arg::Slot(src)], node.span);
        let extra = produced - 1;
        for _ in 0..extra {
            emit(state, Opcode::Pop, vec![], node.span);
        }
        state.active_mut().pop_depth(extra);
    }
    Ok(())
}

/// `compile_compound(node, want_reference)` (spec.md §4.5). Returns the
/// stack slot holding the node's value.
pub fn compile_compound(
    compiler: &mut Compiler,
    state: &mut CompileState,
    node: &Ast,
    want_reference: bool,
) -> Result<u32, CompileError> {
    match &node.kind {
        AstKind::Bool(b) => {
            let op = if *b {
                Opcode::PushBooleanTrue
            } else {
                Opcode::PushBooleanFalse
            };
            Ok(emit_push(state, op, vec![], node.span))
        }
        AstKind::Int(v) => Ok(emit_push(state, Opcode::PushInteger, vec![Arg::Int(*v)], node.span)),
        AstKind::Float(v) => Ok(emit_push(
            state,
            Opcode::PushDoubleFloat,
            vec![Arg::Float(*v)],
            node.span,
        )),
        AstKind::String(bytes) => Ok(emit_push(
            state,
            Opcode::PushString,
            vec![Arg::Bytes(bytes.clone())],
            node.span,
        )),
        AstKind::Callback(name) => {
            let symbol = compiler.symbols.intern(name);
            Ok(emit_push(
                state,
                Opcode::PushSymbol,
                vec![Arg::Int(symbol as i64)],
                node.span,
            ))
        }
        AstKind::Identifier(name) => compile_identifier(compiler, state, name, node.span, want_reference),
        AstKind::Expression(children) => compile_expression(compiler, state, children, node.span),
        AstKind::LiteralExpression(children) => compile_literal(compiler, state, children, node.span),
    }
}

fn compile_identifier(
    compiler: &mut Compiler,
    state: &mut CompileState,
    name: &str,
    span: Span,
    want_reference: bool,
) -> Result<u32, CompileError> {
    if let Some(slot) = state.active().scopes.get_local(name) {
        if want_reference {
            return Ok(emit_push(state, Opcode::PushIndex, vec![Arg::Slot(slot)], span));
        }
        return Ok(slot);
    }

    if let Some(uv) = resolve_free_local(&mut state.active_mut().scopes, name) {
        return Ok(emit_push(state, Opcode::PushUpvalue, vec![Arg::Slot(uv)], span));
    }

    // Global fallback (spec.md §4.3 edge case, §8 S6): not an abort, the
    // form still compiles, just against a late-bound global slot.
    let symbol = compiler.symbols.intern(name);
    let slot = compiler.globals.slot_for(symbol);
    let diagnostic = CompileError::UnresolvedVariable(name.to_string()).into_diagnostic(span);
    compiler.diagnose(diagnostic, &state.file_name.clone());
    Ok(emit_push(state, Opcode::PushGlobal, vec![Arg::Slot(slot)], span))
}

/// A quoted/literal compound: every child reifies as data rather than being
/// evaluated, built the same way [`crate::bridge::ast_to_object`] would,
/// but directly as bytecode (so it survives being spliced into *either*
/// the runtime or comptime assembly, not just interpreted once here).
pub(crate) fn compile_literal(
    compiler: &mut Compiler,
    state: &mut CompileState,
    children: &[Ast],
    span: Span,
) -> Result<u32, CompileError> {
    if children.is_empty() {
        return Ok(emit_push(state, Opcode::Nil, vec![], span));
    }
    // Push every element left to right, then a trailing `nil`, then fold
    // with `cons` right to left: each `cons` takes (cdr=top, car=next),
    // so consing N times against a final nil on top rebuilds the list in
    // its original order.
    for child in children {
        compile_literal_node(compiler, state, child)?;
    }
    emit_push(state, Opcode::Nil, vec![], span);
    for _ in 0..children.len() {
        emit(state, Opcode::Cons, vec![], span);
        state.active_mut().pop_depth(1); // Cons pops 2, pushes 1: net -1
    }
    Ok(state.active().locals_length - 1)
}

pub(crate) fn compile_literal_node(
    compiler: &mut Compiler,
    state: &mut CompileState,
    node: &Ast,
) -> Result<(), CompileError> {
    match &node.kind {
        AstKind::Identifier(name) | AstKind::Callback(name) => {
            let symbol = compiler.symbols.intern(name);
            emit_push(state, Opcode::PushSymbol, vec![Arg::Int(symbol as i64)], node.span);
        }
        AstKind::Expression(inner) | AstKind::LiteralExpression(inner) => {
            compile_literal(compiler, state, inner, node.span)?;
        }
        _ => {
            compile_compound(compiler, state, node, false)?;
        }
    }
    Ok(())
}

/// `compile_expression` (spec.md §4.5, §4.4): dispatch on the head.
pub fn compile_expression(
    compiler: &mut Compiler,
    state: &mut CompileState,
    children: &[Ast],
    span: Span,
) -> Result<u32, CompileError> {
    let Some(head) = children.first() else {
        return Err(CompileError::MalformedForm("empty expression".to_string()));
    };
    let args = &children[1..];

    if let AstKind::Identifier(name) = &head.kind {
        if state.active().scopes.get_local(name).is_some()
            || resolve_free_local_peek(state, name)
        {
            return compile_indirect_call(compiler, state, head, args, span);
        }

        if let Some((kind, index)) = compiler.registry.resolve_callable(&state.active().scopes, name)
        {
            return match kind {
                FunctionKind::CCallback => compile_ccall(compiler, state, index, args, span),
                FunctionKind::Generator => compile_generator_call(compiler, state, index, children, span),
                FunctionKind::Macro => {
                    crate::macros::expand_macro_call(compiler, state, index, name, args, span)
                }
                FunctionKind::Lisp | FunctionKind::PureLisp => {
                    compile_indirect_call(compiler, state, head, args, span)
                }
            };
        }

        // Not found anywhere: diagnostic, then fall back to a late-bound
        // global funcall (spec.md §4.4 "else emit a diagnostic ... fall
        // back to treating f as a late-bound global", exercised by S6).
        return compile_indirect_call(compiler, state, head, args, span);
    }

    // Head is itself an expression: evaluate it, then call indirectly.
    compile_indirect_call(compiler, state, head, args, span)
}

fn resolve_free_local_peek(state: &mut CompileState, name: &str) -> bool {
    // `resolve_free_local` mutates `function_uvs` as a side effect of
    // resolving, which is exactly the registration spec.md §4.3 wants, so
    // "peeking" here really performs the registration once. Doing it twice
    // (once to decide dispatch, once to actually emit `PushUpvalue`) is
    // harmless — `resolve_at`'s dedup means a repeat capture reuses the
    // same upvalue slot instead of registering a second one.
    resolve_free_local(&mut state.active_mut().scopes, name).is_some()
}

/// Emits code for `(f a1 … an)` where `f` is evaluated as a value (local,
/// upvalue, or unresolved-global fallback) and invoked indirectly.
fn compile_indirect_call(
    compiler: &mut Compiler,
    state: &mut CompileState,
    callee: &Ast,
    args: &[Ast],
    span: Span,
) -> Result<u32, CompileError> {
    let before = state.active().locals_length;
    for arg in args {
        compile_compound(compiler, state, arg, true)?;
    }
    compile_compound(compiler, state, callee, true)?;
    emit(state, Opcode::Funcall, vec![Arg::Int(args.len() as i64)], span);
    // Funcall pops (args + callee) and pushes one result.
    state.active_mut().pop_depth((args.len() + 1) as u32);
    state.active_mut().push_depth(1);
    debug_assert_eq!(state.active().locals_length, before + 1);
    Ok(state.active().locals_length - 1)
}

fn compile_ccall(
    compiler: &mut Compiler,
    state: &mut CompileState,
    symbol_id: u32,
    args: &[Ast],
    span: Span,
) -> Result<u32, CompileError> {
    for arg in args {
        compile_compound(compiler, state, arg, true)?;
    }
    // `ccall` carries only `symbol_id` as an operand (spec.md §6); the
    // argument count rides on top of the data stack instead, pushed after
    // the arguments themselves so `Ccall`'s handler can pop it first.
    emit_push(state, Opcode::PushInteger, vec![Arg::Int(args.len() as i64)], span);
    emit(state, Opcode::Ccall, vec![Arg::Int(symbol_id as i64)], span);
    state.active_mut().pop_depth((args.len() + 1) as u32);
    state.active_mut().push_depth(1);
    Ok(state.active().locals_length - 1)
}

fn compile_generator_call(
    compiler: &mut Compiler,
    state: &mut CompileState,
    slot: u32,
    whole_expression: &[Ast],
    span: Span,
) -> Result<u32, CompileError> {
    let generator = compiler
        .generator_fns
        .get(slot as usize)
        .cloned()
        .ok_or_else(|| CompileError::NotCallable(format!("generator slot {slot}")))?;
    generator(compiler, state, whole_expression, span)?;
    Ok(state.active().locals_length - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{Compiler, CompilerOptions};

    #[test]
    fn literal_integer_pushes_and_leaves_one_slot() {
        let mut compiler = Compiler::new(CompilerOptions::default());
        let mut state = CompileState::new();
        state.runtime.scopes.push(false, true);
        let node = Ast::int(42, Span::dummy());
        let slot = compile_compound(&mut compiler, &mut state, &node, false).unwrap();
        assert_eq!(slot, 0);
        assert_eq!(state.runtime.locals_length, 1);
    }

    #[test]
    fn unresolved_identifier_call_falls_back_to_global_funcall_with_a_diagnostic() {
        let mut compiler = Compiler::new(CompilerOptions::default());
        let mut state = CompileState::new();
        state.file_name = "t.lisp".to_string();
        state.runtime.scopes.push(false, true);
        let node = Ast::expression(vec![Ast::identifier("foo", Span::dummy())], Span::dummy());
        compile_top_level_form(&mut compiler, &mut state, &node).unwrap();
        assert_eq!(compiler.diagnostics.len(), 1);
        assert!(compiler.diagnostics[0].message.contains("foo"));
        let has_funcall = state
            .runtime
            .assembly
            .iter()
            .any(|i| i.op == Opcode::Funcall);
        let has_global = state
            .runtime
            .assembly
            .iter()
            .any(|i| i.op == Opcode::PushGlobal);
        assert!(has_funcall && has_global);
    }
}
