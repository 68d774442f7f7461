//! Error taxonomy (spec.md §7).
//!
//! `out-of-memory` has no Rust counterpart (allocation failure aborts the
//! process rather than returning a recoverable error) and is omitted here;
//! `invalid-value` and `lookup-miss`-turned-diagnostic map to `CompileError`;
//! `buffer-underflow/overflow`-class internal invariant violations are
//! `panic!`/`debug_assert!` in the affected helpers rather than a variant
//! here, matching "treated as fatal" in the source spec.

use thiserror::Error;

/// Errors a generator or the lowerer can raise while compiling one form.
///
/// These are *recoverable*: the offending form contributes no bytecode but
/// its siblings still compile (spec.md §7). Callers turn these into
/// [`crate::diagnostic::Diagnostic`]s via [`CompileError::into_diagnostic`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CompileError {
    #[error("Could not find variable \"{0}\". Assuming global scope.")]
    UnresolvedVariable(String),
    #[error("\"{name}\" expects {expected} argument(s), got {got}")]
    WrongArity {
        name: String,
        expected: String,
        got: usize,
    },
    #[error("malformed form: {0}")]
    MalformedForm(String),
    #[error("{0} is not callable")]
    NotCallable(String),
    #[error("macro expansion failed: {0}")]
    MacroError(String),
}

/// Errors raised while assembling instruction objects into a byte stream.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AssembleError {
    #[error("undefined label {0}")]
    UndefinedLabel(u32),
    #[error("operand {0} does not fit in 32 bits")]
    OperandTooLarge(i64),
    #[error("assembler did not reach a fixed point after {0} widening passes")]
    DidNotConverge(usize),
}

/// Errors raised by the VM while executing bytecode.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum VmError {
    #[error("stack underflow")]
    StackUnderflow,
    #[error("type error: {0}")]
    TypeError(String),
    #[error("unbound global symbol {0}")]
    UnboundGlobal(u32),
    #[error("unknown c-callback {0}")]
    UnknownCallback(u32),
    #[error("illegal opcode byte {0:#04x}")]
    IllegalOpcode(u8),
    #[error("index {index} out of bounds (len {len})")]
    OutOfBounds { index: i64, len: usize },
    #[error("division by zero")]
    DivisionByZero,
}
