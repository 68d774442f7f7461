//! Unified diagnostic type for the compiler, assembler, and macro driver.
//!
//! Grounded on `atlas-runtime/src/diagnostic.rs`: a single struct carrying
//! severity, message, and span, accumulated in an ordered buffer owned by
//! the compiler instance (spec.md §7) and drained by the caller — never
//! thrown, never a process-global static.

use crate::span::Span;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Error,
    Warning,
}

impl fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticLevel::Error => write!(f, "error"),
            DiagnosticLevel::Warning => write!(f, "warning"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub message: String,
    pub span: Span,
    pub file: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub notes: Vec<String>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>, span: Span) -> Self {
        Self {
            level: DiagnosticLevel::Error,
            message: message.into(),
            span,
            file: String::new(),
            notes: Vec::new(),
        }
    }

    pub fn warning(message: impl Into<String>, span: Span) -> Self {
        Self {
            level: DiagnosticLevel::Warning,
            message: message.into(),
            span,
            file: String::new(),
            notes: Vec::new(),
        }
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = file.into();
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Render a caret-underlined, `file:line:column`-style message.
    ///
    /// `source` is used to recover the line/column and the source snippet
    /// for the caret underline; when the span is the dummy "no location"
    /// span, only the bare message is produced.
    pub fn to_human_string(&self, source: &str) -> String {
        if self.span.is_empty() && self.span.start == 0 {
            return format!("{}: {}", self.level, self.message);
        }

        let (line, column, snippet) = locate(source, self.span.start);
        let mut out = format!(
            "{}: {}\n  --> {}:{}:{}\n",
            self.level, self.message, self.file, line, column
        );
        if !snippet.is_empty() {
            out.push_str(&format!("   |\n{:>3} | {}\n", line, snippet));
            let padding = " ".repeat(column.saturating_sub(1));
            let carets = "^".repeat(self.span.len().max(1));
            out.push_str(&format!("   | {}{}\n", padding, carets));
        }
        for note in &self.notes {
            out.push_str(&format!("   = note: {}\n", note));
        }
        out
    }
}

/// Find the 1-based line/column and the containing line's text for a byte offset.
fn locate(source: &str, offset: usize) -> (usize, usize, String) {
    let mut line = 1usize;
    let mut line_start = 0usize;
    for (idx, ch) in source.char_indices() {
        if idx >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            line_start = idx + 1;
        }
    }
    let column = offset.saturating_sub(line_start) + 1;
    let snippet = source[line_start..]
        .lines()
        .next()
        .unwrap_or("")
        .to_string();
    (line, column, snippet)
}

/// Diagnostics are FIFO by emission order; sorting here only breaks ties
/// between equal-severity diagnostics emitted at different locations so
/// output is deterministic across runs that emit in a different order
/// (e.g. parallel generators — not currently a thing, but kept cheap).
pub fn sort_diagnostics(diagnostics: &mut [Diagnostic]) {
    diagnostics.sort_by(|a, b| match (a.level, b.level) {
        (DiagnosticLevel::Error, DiagnosticLevel::Warning) => std::cmp::Ordering::Less,
        (DiagnosticLevel::Warning, DiagnosticLevel::Error) => std::cmp::Ordering::Greater,
        _ => a.span.start.cmp(&b.span.start),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_string_includes_code_location() {
        let diag = Diagnostic::error("bad thing", Span::new(6, 7)).with_file("t.lisp");
        let rendered = diag.to_human_string("(foo bar)");
        assert!(rendered.contains("t.lisp:1:7"));
        assert!(rendered.contains("^"));
    }

    #[test]
    fn sort_puts_errors_before_warnings() {
        let mut diags = vec![
            Diagnostic::warning("w", Span::dummy()),
            Diagnostic::error("e", Span::dummy()),
        ];
        sort_diagnostics(&mut diags);
        assert_eq!(diags[0].level, DiagnosticLevel::Error);
    }
}
