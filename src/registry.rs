//! Callable resolution across scopes and the two compiler-global registries
//! (spec.md §4.4): C-callbacks linked in by the embedder and generators
//! built into the compiler itself.

use crate::scope::{FunctionKind, ScopeStack};
use crate::symbol::SymbolId;
use std::collections::HashMap;

/// Generators are indexed by position in a fixed internal table rather than
/// by name once registered, mirroring how the scope-local `functions` trie
/// stores a `(kind, index)` pair instead of a direct callable pointer.
#[derive(Debug, Default)]
pub struct Registry {
    callbacks: HashMap<String, SymbolId>,
    generators: HashMap<String, u32>,
    next_generator_slot: u32,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `link_c_function` (spec.md §6): bind `name` to a callback identified
    /// by the symbol the embedder will look up at call time.
    pub fn link_c_function(&mut self, name: &str, symbol: SymbolId) {
        self.callbacks.insert(name.to_string(), symbol);
    }

    /// `add_generator` (spec.md §6): reserve the next generator slot for
    /// `name`, returning the slot assigned.
    pub fn add_generator(&mut self, name: &str) -> u32 {
        let slot = self.next_generator_slot;
        self.next_generator_slot += 1;
        self.generators.insert(name.to_string(), slot);
        slot
    }

    pub fn is_callback(&self, name: &str) -> bool {
        self.callbacks.contains_key(name)
    }

    pub fn is_generator(&self, name: &str) -> bool {
        self.generators.contains_key(name)
    }

    /// `resolve_callable(name) -> (kind, index)` (spec.md §4.4): the scope
    /// chain is consulted first (a lexical `Macro`/`Lisp`/`PureLisp` hit
    /// always shadows a same-named global), then the compiler-global
    /// callbacks trie, then the compiler-global generators trie. First hit
    /// wins.
    pub fn resolve_callable(
        &self,
        scopes: &ScopeStack,
        name: &str,
    ) -> Option<(FunctionKind, u32)> {
        if let Some(hit) = scopes.get_callable(name) {
            return Some(hit);
        }
        if let Some(&symbol) = self.callbacks.get(name) {
            return Some((FunctionKind::CCallback, symbol));
        }
        if let Some(&slot) = self.generators.get(name) {
            return Some((FunctionKind::Generator, slot));
        }
        None
    }
}
