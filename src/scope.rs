//! Lexical scopes and the scope-stack resolution rules (spec.md §3, §4.2).

use crate::symbol::SymbolId;
use std::collections::HashMap;

/// How a name bound in `functions` should be dispatched when called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Lisp,
    PureLisp,
    CCallback,
    Generator,
    Macro,
}

/// Where a captured free variable lives, relative to the function that
/// captured it. Replaces the source's negative-index-means-upvalue trick
/// (spec.md §9 REDESIGN FLAGS) with a tagged enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpvalueSource {
    /// A local slot of the immediately enclosing function.
    Local(u32),
    /// Upvalue `i` already registered on the immediately enclosing function
    /// (chained capture through an intermediate closure).
    Upvalue(u32),
}

/// A lexical frame.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    pub locals: HashMap<String, u32>,
    pub functions: HashMap<String, (FunctionKind, u32)>,
    pub labels: HashMap<String, u32>,
    /// Local slots in *this* scope that some inner function has captured.
    /// Marks them for boxing (a release-upvalues instruction) at scope exit.
    pub scope_uvs: Vec<u32>,
    /// Only meaningful when `function_scope` is true: the captured values
    /// this function itself closes over, in registration order.
    pub function_uvs: Vec<UpvalueSource>,
    /// Marks this scope as the root of a function body.
    pub function_scope: bool,
}

impl Scope {
    pub fn new(function_scope: bool) -> Self {
        Self {
            function_scope,
            ..Default::default()
        }
    }
}

/// Stack of lexical scopes for one sub-compile-state (spec.md §3).
#[derive(Debug, Default)]
pub struct ScopeStack {
    frames: Vec<Scope>,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a new scope. `is_function` is only honored when `is_active`
    /// (the target sub-compile-state is the currently active one) — this
    /// asymmetry keeps comptime and runtime scope shapes aligned during
    /// macro definition (spec.md §4.2, §4.9).
    pub fn push(&mut self, is_function: bool, is_active: bool) {
        self.frames.push(Scope::new(is_function && is_active));
    }

    pub fn pop(&mut self) -> Scope {
        self.frames.pop().expect("scope stack underflow")
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn top(&self) -> &Scope {
        self.frames.last().expect("scope stack is empty")
    }

    pub fn top_mut(&mut self) -> &mut Scope {
        self.frames.last_mut().expect("scope stack is empty")
    }

    pub fn get(&self, index: usize) -> &Scope {
        &self.frames[index]
    }

    pub fn get_mut(&mut self, index: usize) -> &mut Scope {
        &mut self.frames[index]
    }

    /// Walk the stack top-down; stop descent when crossing a function-scope
    /// boundary without a hit (the name is free, not local).
    pub fn get_local(&self, name: &str) -> Option<u32> {
        for scope in self.frames.iter().rev() {
            if let Some(&slot) = scope.locals.get(name) {
                return Some(slot);
            }
            if scope.function_scope {
                break;
            }
        }
        None
    }

    /// Same walk, but crosses function boundaries: labels and macros are
    /// lexically visible through nested functions.
    pub fn get_label(&self, name: &str) -> Option<u32> {
        for scope in self.frames.iter().rev() {
            if let Some(&id) = scope.labels.get(name) {
                return Some(id);
            }
        }
        None
    }

    pub fn get_callable(&self, name: &str) -> Option<(FunctionKind, u32)> {
        for scope in self.frames.iter().rev() {
            if let Some(&hit) = scope.functions.get(name) {
                return Some(hit);
            }
        }
        None
    }

    /// The index (from the bottom) of the nearest function scope at or
    /// above `start`, searching upward (toward the top of the stack).
    pub fn nearest_function_scope_from(&self, start: usize) -> Option<usize> {
        (start..self.frames.len()).find(|&i| self.frames[i].function_scope)
    }

    pub fn define_local(&mut self, name: &str, slot: u32) {
        self.top_mut().locals.insert(name.to_string(), slot);
    }

    pub fn define_function(&mut self, name: &str, kind: FunctionKind, index: u32) {
        self.top_mut()
            .functions
            .insert(name.to_string(), (kind, index));
    }

    pub fn define_label(&mut self, name: &str, id: u32) {
        self.top_mut().labels.insert(name.to_string(), id);
    }
}

/// Allocates a global symbol table slot (spec.md §6 `add_static`).
#[derive(Debug, Default)]
pub struct Globals {
    next_slot: u32,
    slots: HashMap<SymbolId, u32>,
}

impl Globals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slot_for(&mut self, symbol: SymbolId) -> u32 {
        *self.slots.entry(symbol).or_insert_with(|| {
            let slot = self.next_slot;
            self.next_slot += 1;
            slot
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_local_stops_at_function_boundary() {
        let mut stack = ScopeStack::new();
        stack.push(true, true); // outer function
        stack.define_local("x", 0);
        stack.push(true, true); // inner function: new function scope
        assert_eq!(stack.get_local("x"), None, "x is free, not local, here");
    }

    #[test]
    fn get_local_finds_within_same_function() {
        let mut stack = ScopeStack::new();
        stack.push(true, true);
        stack.define_local("x", 0);
        stack.push(false, true); // nested block, same function
        assert_eq!(stack.get_local("x"), Some(0));
    }

    #[test]
    fn get_label_and_get_macro_cross_function_boundaries() {
        let mut stack = ScopeStack::new();
        stack.push(true, true);
        stack.define_function("m", FunctionKind::Macro, 7);
        stack.push(true, true); // nested function
        assert_eq!(stack.get_callable("m"), Some((FunctionKind::Macro, 7)));
    }

    #[test]
    fn pushing_non_function_scope_never_sets_function_scope_true() {
        let mut stack = ScopeStack::new();
        stack.push(false, true);
        assert!(!stack.top().function_scope);
    }

    #[test]
    fn inactive_side_never_gets_function_scope_true_even_when_requested() {
        let mut stack = ScopeStack::new();
        stack.push(true, false);
        assert!(!stack.top().function_scope);
    }
}
