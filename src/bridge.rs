//! AST ↔ VM object bridge (spec.md §4.7), used to marshal macro arguments
//! into the comptime VM and marshal its result back into an AST splice.

use crate::ast::{Ast, AstKind};
use crate::error::CompileError;
use crate::span::Span;
use crate::symbol::SymbolTable;
use crate::vmvalue::{list_from_vec, list_to_vec, VmString, VmValue};

/// Converts an AST node into the VM value a macro body would see as an
/// argument. `Expression`/`LiteralExpression` both become cons-lists — the
/// distinction only matters to the compiler, not to macro bodies inspecting
/// their arguments as data.
pub fn ast_to_object(ast: &Ast, symbols: &mut SymbolTable) -> VmValue {
    match &ast.kind {
        AstKind::Bool(b) => VmValue::Bool(*b),
        AstKind::Int(i) => VmValue::Int(*i),
        AstKind::Float(f) => VmValue::Float(*f),
        AstKind::String(bytes) => VmValue::String(VmString::from_bytes(bytes.clone())),
        AstKind::Identifier(name) => VmValue::Symbol(symbols.intern(name)),
        AstKind::Callback(name) => VmValue::Symbol(symbols.intern(name)),
        AstKind::Expression(children) | AstKind::LiteralExpression(children) => {
            let items = children.iter().map(|c| ast_to_object(c, symbols)).collect();
            list_from_vec(items)
        }
    }
}

/// Converts a VM value produced by a macro body back into an AST node to
/// splice into the surrounding program (spec.md §4.7, §4.8 step 5).
/// `use_exprs` controls whether a list becomes a plain `Expression`
/// (re-entering the compiler as a callable form) or a `LiteralExpression`
/// (spec.md's "literal expressions compile to themselves" invariant) — a
/// `__defmacro`/`__comptime` result is always spliced with `use_exprs: true`
/// so it can call further generators and macros.
pub fn object_to_ast(
    value: &VmValue,
    symbols: &SymbolTable,
    span: Span,
    use_exprs: bool,
) -> Result<Ast, CompileError> {
    let make_list = |children: Vec<Ast>| {
        if use_exprs {
            Ast::expression(children, span)
        } else {
            Ast::literal_expression(children, span)
        }
    };
    match value {
        VmValue::Nil => Ok(make_list(Vec::new())),
        VmValue::Bool(b) => Ok(Ast::bool(*b, span)),
        VmValue::Int(i) => Ok(Ast::int(*i, span)),
        VmValue::Float(f) => Ok(Ast::float(*f, span)),
        VmValue::String(s) => Ok(Ast::string(s.as_bytes().to_vec(), span)),
        VmValue::Symbol(id) => Ok(Ast::identifier(symbols.name(*id), span)),
        VmValue::Cons(_) => {
            let items = list_to_vec(value.clone()).ok_or_else(|| {
                CompileError::MacroError("macro returned an improper list".to_string())
            })?;
            let children = items
                .iter()
                .map(|v| object_to_ast(v, symbols, span, use_exprs))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(make_list(children))
        }
        VmValue::Closure(_) | VmValue::Function(_) | VmValue::Type(_) | VmValue::Instance(_) => {
            Err(CompileError::MacroError(
                "macro returned a value with no AST representation".to_string(),
            ))
        }
        VmValue::Vector(elements) => {
            let children = elements
                .borrow()
                .iter()
                .map(|v| object_to_ast(v, symbols, span, use_exprs))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(make_list(children))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_roundtrip() {
        let mut symbols = SymbolTable::new();
        for ast in [
            Ast::bool(true, Span::dummy()),
            Ast::int(42, Span::dummy()),
            Ast::float(1.5, Span::dummy()),
            Ast::string(b"hi".to_vec(), Span::dummy()),
        ] {
            let object = ast_to_object(&ast, &mut symbols);
            let back = object_to_ast(&object, &symbols, Span::dummy(), true).unwrap();
            assert_eq!(back.kind, ast.kind);
        }
    }

    #[test]
    fn identifier_roundtrips_through_the_symbol_table() {
        let mut symbols = SymbolTable::new();
        let ast = Ast::identifier("foo", Span::dummy());
        let object = ast_to_object(&ast, &mut symbols);
        assert!(matches!(object, VmValue::Symbol(0)));
        let back = object_to_ast(&object, &symbols, Span::dummy(), true).unwrap();
        assert_eq!(back.kind, AstKind::Identifier("foo".to_string()));
    }

    #[test]
    fn expression_becomes_a_cons_list_and_back() {
        let mut symbols = SymbolTable::new();
        let ast = Ast::expression(
            vec![
                Ast::identifier("+", Span::dummy()),
                Ast::int(1, Span::dummy()),
                Ast::int(2, Span::dummy()),
            ],
            Span::dummy(),
        );
        let object = ast_to_object(&ast, &mut symbols);
        let back = object_to_ast(&object, &symbols, Span::dummy(), true).unwrap();
        match back.kind {
            AstKind::Expression(children) => assert_eq!(children.len(), 3),
            other => panic!("expected Expression, got {other:?}"),
        }
    }

    #[test]
    fn use_exprs_false_produces_a_literal_expression() {
        let mut symbols = SymbolTable::new();
        let ast = Ast::expression(vec![Ast::int(1, Span::dummy())], Span::dummy());
        let object = ast_to_object(&ast, &mut symbols);
        let back = object_to_ast(&object, &symbols, Span::dummy(), false).unwrap();
        assert!(matches!(back.kind, AstKind::LiteralExpression(_)));
    }

    #[test]
    fn closures_have_no_ast_representation() {
        let symbols = SymbolTable::new();
        let closure = VmValue::Closure(std::rc::Rc::new(crate::vmvalue::Closure {
            entry: 0,
            arity: 0,
            variadic: false,
            upvalues: Vec::new(),
        }));
        assert!(object_to_ast(&closure, &symbols, Span::dummy(), true).is_err());
    }
}
