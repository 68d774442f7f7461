//! The two-tier compile state (spec.md §3, §4.9).
//!
//! A `CompileState` pairs a *runtime* and a *comptime* [`SubCompileState`]
//! and tracks which one is currently active. Macros work by flipping
//! `current` to comptime for the duration of `__defmacro`/`__comptime`,
//! compiling and (for `__comptime`) executing against the comptime VM, then
//! flipping back — the runtime assembly is never polluted by macro bodies.

use crate::instruction::{Instruction, LabelId, Opcode};
use crate::scope::ScopeStack;
use crate::span::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Runtime,
    Comptime,
}

/// A stack of scopes, a label counter, a running stack-depth counter, and
/// an assembly buffer — everything one compilation pass (runtime or
/// comptime) needs (spec.md §3).
#[derive(Debug, Default)]
pub struct SubCompileState {
    pub scopes: ScopeStack,
    pub assembly: Vec<Instruction>,
    next_label: LabelId,
    /// Depth of the stack the compiled code will produce at runtime for
    /// the function currently being compiled.
    pub locals_length: u32,
}

impl SubCompileState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh_label(&mut self) -> LabelId {
        let id = self.next_label;
        self.next_label += 1;
        id
    }

    pub fn emit(&mut self, instr: Instruction) {
        self.assembly.push(instr);
    }

    pub fn mark_label(&mut self, label: LabelId, span: Span) {
        self.emit(Instruction::new(
            Opcode::Label,
            vec![crate::instruction::Arg::Label(label)],
            span,
        ));
    }

    /// Every emitted push increments this; every pop decrements it. Each
    /// generator is responsible for leaving it consistent with the stack
    /// depth it actually produces (spec.md §4.5).
    pub fn push_depth(&mut self, n: u32) {
        self.locals_length += n;
    }

    pub fn pop_depth(&mut self, n: u32) {
        self.locals_length = self.locals_length.saturating_sub(n);
    }
}

/// Pairs a runtime and a comptime sub-compile-state. Initialized at the
/// start of one `load_string` call and dropped at its end.
pub struct CompileState {
    pub runtime: SubCompileState,
    pub comptime: SubCompileState,
    pub current: Side,
    /// Name of the file being compiled, for diagnostics emitted mid-lowering
    /// (e.g. the S6 "assuming global scope" warning) that aren't funneled
    /// back through a `CompileError`.
    pub file_name: String,
}

impl CompileState {
    pub fn new() -> Self {
        Self {
            runtime: SubCompileState::new(),
            comptime: SubCompileState::new(),
            current: Side::Runtime,
            file_name: String::new(),
        }
    }

    pub fn active(&self) -> &SubCompileState {
        match self.current {
            Side::Runtime => &self.runtime,
            Side::Comptime => &self.comptime,
        }
    }

    pub fn active_mut(&mut self) -> &mut SubCompileState {
        match self.current {
            Side::Runtime => &mut self.runtime,
            Side::Comptime => &mut self.comptime,
        }
    }

    /// Push a scope on *both* sides, so lexical nesting stays coherent
    /// regardless of which side a later macro expansion consults. Only the
    /// currently active side gets `function_scope = true` when requested.
    pub fn push_scope(&mut self, is_function: bool) {
        let active = self.current;
        self.runtime
            .scopes
            .push(is_function, active == Side::Runtime);
        self.comptime
            .scopes
            .push(is_function, active == Side::Comptime);
    }

    /// Pops the active side's scope and returns it; mirrors the pop on the
    /// inactive side so the two stacks stay the same depth. Spec.md §9
    /// Open Question (i): rather than guard an empty-stack pop on the
    /// inactive side (a source bug), we always push/pop scopes in lockstep
    /// on both sides, so both are always the same depth and never empty
    /// when the other isn't.
    pub fn pop_scope(&mut self) -> crate::scope::Scope {
        let popped = self.active_mut().scopes.pop();
        let inactive = match self.current {
            Side::Runtime => &mut self.comptime,
            Side::Comptime => &mut self.runtime,
        };
        inactive.scopes.pop();
        popped
    }

    /// Run `f` with `current` temporarily switched to comptime, restoring
    /// the previous side afterward even if `f` returns early (spec.md §4.8
    /// step 1 and step 6).
    pub fn with_comptime<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let previous = self.current;
        self.current = Side::Comptime;
        let result = f(self);
        self.current = previous;
        result
    }
}

impl Default for CompileState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_runtime() {
        let cs = CompileState::new();
        assert_eq!(cs.current, Side::Runtime);
    }

    #[test]
    fn scopes_are_pushed_on_both_sides() {
        let mut cs = CompileState::new();
        cs.push_scope(true);
        assert_eq!(cs.runtime.scopes.len(), 1);
        assert_eq!(cs.comptime.scopes.len(), 1);
        assert!(cs.runtime.scopes.top().function_scope);
        assert!(!cs.comptime.scopes.top().function_scope);
    }

    #[test]
    fn with_comptime_restores_the_previous_side() {
        let mut cs = CompileState::new();
        cs.with_comptime(|inner| {
            assert_eq!(inner.current, Side::Comptime);
        });
        assert_eq!(cs.current, Side::Runtime);
    }

    #[test]
    fn with_comptime_flips_function_scope_to_the_comptime_side() {
        let mut cs = CompileState::new();
        cs.with_comptime(|inner| {
            inner.push_scope(true);
        });
        assert!(cs.comptime.scopes.top().function_scope);
        assert!(!cs.runtime.scopes.top().function_scope);
    }

    #[test]
    fn pop_scope_keeps_both_sides_at_equal_depth() {
        let mut cs = CompileState::new();
        cs.push_scope(false);
        cs.push_scope(false);
        cs.pop_scope();
        assert_eq!(cs.runtime.scopes.len(), 1);
        assert_eq!(cs.comptime.scopes.len(), 1);
    }
}
