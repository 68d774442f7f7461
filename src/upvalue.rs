//! Free-variable resolution and upvalue registration (spec.md §4.3).
//!
//! Grounded line-for-line on
//! `duckLisp_scope_getFreeLocalIndexFromName_helper` in
//! `original_source/duckLisp.c`, but expressed with the tagged
//! `UpvalueSource` enum from `scope.rs` instead of the source's
//! negative-index encoding (spec.md §9 REDESIGN FLAGS).

use crate::scope::{ScopeStack, UpvalueSource};

/// Resolves `name` as a free variable of the *current* function (the
/// function whose scope is on top of the stack). Call only after
/// [`ScopeStack::get_local`] has already missed.
///
/// Returns the index within the current function's own `function_uvs` that
/// the lowerer should emit a `PushUpvalue` against, registering whatever
/// intermediate captures are needed along the way.
pub fn resolve_free_local(stack: &mut ScopeStack, name: &str) -> Option<u32> {
    let top = stack.len();
    if top == 0 {
        return None;
    }
    let current_fn_idx = (0..top).rev().find(|&i| stack.get(i).function_scope)?;
    if current_fn_idx == 0 {
        // No enclosing function: whatever called us is already at the
        // outermost scope, so there is nothing to capture from.
        return None;
    }
    resolve_at(stack, name, current_fn_idx, current_fn_idx)
}

/// Registers (and returns the index of) a capture in the function-root
/// scope at `registrant_idx`, sourced by searching scopes strictly below
/// `search_below_idx` down to (and including) the next function boundary.
fn resolve_at(
    stack: &mut ScopeStack,
    name: &str,
    registrant_idx: usize,
    search_below_idx: usize,
) -> Option<u32> {
    let mut i = search_below_idx;
    let mut found_local: Option<(usize, u32)> = None;
    let function_root_idx = loop {
        if i == 0 {
            break 0;
        }
        i -= 1;
        if let Some(&slot) = stack.get(i).locals.get(name) {
            found_local = Some((i, slot));
            break i;
        }
        if stack.get(i).function_scope {
            break i;
        }
    };

    let source = match found_local {
        Some((defining_idx, slot)) => {
            let defining = stack.get_mut(defining_idx);
            if !defining.scope_uvs.contains(&slot) {
                defining.scope_uvs.push(slot);
            }
            UpvalueSource::Local(slot)
        }
        None => {
            if function_root_idx == 0 && !stack.get(0).locals.contains_key(name) {
                return None; // genuinely a global: no enclosing function has it
            }
            let parent_idx = resolve_at(stack, name, function_root_idx, function_root_idx)?;
            UpvalueSource::Upvalue(parent_idx)
        }
    };

    register(stack, registrant_idx, source)
}

fn register(stack: &mut ScopeStack, registrant_idx: usize, source: UpvalueSource) -> Option<u32> {
    let registrant = stack.get_mut(registrant_idx);
    if let Some(pos) = registrant.function_uvs.iter().position(|&s| s == source) {
        return Some(pos as u32);
    }
    registrant.function_uvs.push(source);
    Some((registrant.function_uvs.len() - 1) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_level_capture_is_a_direct_local() {
        let mut stack = ScopeStack::new();
        stack.push(true, true); // outer function
        stack.define_local("x", 0);
        stack.push(true, true); // inner function body
        assert_eq!(stack.get_local("x"), None);

        let uv = resolve_free_local(&mut stack, "x").expect("should resolve");
        assert_eq!(uv, 0);
        assert_eq!(
            stack.get(1).function_uvs,
            vec![UpvalueSource::Local(0)],
            "inner function captured x as a direct local of its parent"
        );
        assert_eq!(
            stack.get(0).scope_uvs,
            vec![0],
            "defining scope marks slot 0 for boxing"
        );
    }

    #[test]
    fn two_level_capture_chains_through_an_upvalue() {
        let mut stack = ScopeStack::new();
        stack.push(true, true); // outermost function
        stack.define_local("x", 0);
        stack.push(true, true); // middle function
        stack.push(true, true); // innermost function

        let uv = resolve_free_local(&mut stack, "x").expect("should resolve");
        assert_eq!(uv, 0);
        assert_eq!(
            stack.get(2).function_uvs,
            vec![UpvalueSource::Upvalue(0)],
            "innermost function chains through the middle function's upvalue 0"
        );
        assert_eq!(
            stack.get(1).function_uvs,
            vec![UpvalueSource::Local(0)],
            "middle function captured x directly from the outer function"
        );
        assert_eq!(stack.get(0).scope_uvs, vec![0]);
    }

    #[test]
    fn repeated_capture_reuses_the_same_slot() {
        let mut stack = ScopeStack::new();
        stack.push(true, true);
        stack.define_local("x", 0);
        stack.push(true, true);

        let first = resolve_free_local(&mut stack, "x").unwrap();
        let second = resolve_free_local(&mut stack, "x").unwrap();
        assert_eq!(first, second);
        assert_eq!(stack.get(1).function_uvs.len(), 1);
    }

    #[test]
    fn unresolved_name_is_none() {
        let mut stack = ScopeStack::new();
        stack.push(true, true);
        stack.push(true, true);
        assert_eq!(resolve_free_local(&mut stack, "nope"), None);
    }
}
