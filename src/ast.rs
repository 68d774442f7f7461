//! Abstract syntax tree.
//!
//! Spec.md §3: a tagged union of boolean | integer | float | string |
//! identifier | expression | literal-expression | callback. Each node
//! exclusively owns its payload and children; Rust's ordinary `Drop`
//! (post-order, depth-first) gives us the "destroyed by post-order release"
//! invariant for free — no manual arena or release routine is needed.

use crate::span::Span;

#[derive(Debug, Clone, PartialEq)]
pub enum AstKind {
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Owns a fresh copy of its source bytes.
    String(Vec<u8>),
    Identifier(String),
    /// An ordinary compound form: `(f a b)`.
    Expression(Vec<Ast>),
    /// A quoted/literal compound form that must not be evaluated as a call.
    LiteralExpression(Vec<Ast>),
    /// A reference to a registered C-callback, by name.
    Callback(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ast {
    pub kind: AstKind,
    pub span: Span,
}

impl Ast {
    pub fn new(kind: AstKind, span: Span) -> Self {
        Self { kind, span }
    }

    pub fn bool(value: bool, span: Span) -> Self {
        Self::new(AstKind::Bool(value), span)
    }

    pub fn int(value: i64, span: Span) -> Self {
        Self::new(AstKind::Int(value), span)
    }

    pub fn float(value: f64, span: Span) -> Self {
        Self::new(AstKind::Float(value), span)
    }

    pub fn string(bytes: impl Into<Vec<u8>>, span: Span) -> Self {
        Self::new(AstKind::String(bytes.into()), span)
    }

    pub fn identifier(name: impl Into<String>, span: Span) -> Self {
        Self::new(AstKind::Identifier(name.into()), span)
    }

    pub fn expression(children: Vec<Ast>, span: Span) -> Self {
        Self::new(AstKind::Expression(children), span)
    }

    pub fn literal_expression(children: Vec<Ast>, span: Span) -> Self {
        Self::new(AstKind::LiteralExpression(children), span)
    }

    /// The identifier naming the head of an expression, if this node is an
    /// expression whose first child is an identifier.
    pub fn head_identifier(&self) -> Option<&str> {
        match &self.kind {
            AstKind::Expression(children) => match children.first() {
                Some(Ast {
                    kind: AstKind::Identifier(name),
                    ..
                }) => Some(name.as_str()),
                _ => None,
            },
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn head_identifier_of_a_call_form() {
        let call = Ast::expression(
            vec![
                Ast::identifier("+", Span::dummy()),
                Ast::int(1, Span::dummy()),
                Ast::int(2, Span::dummy()),
            ],
            Span::dummy(),
        );
        assert_eq!(call.head_identifier(), Some("+"));
    }

    #[test]
    fn head_identifier_is_none_for_a_scalar() {
        assert_eq!(Ast::int(42, Span::dummy()).head_identifier(), None);
    }
}
